// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core type definitions for secrets management.
//!
//! This module defines the foundational types used throughout the secrets
//! system:
//!
//! - **ID newtypes**: Type-safe wrappers around UUIDs for projects,
//!   environments, secrets, versions, and actors
//! - **Environment**: metadata plus the nullable inheritance pointer
//! - **Secret / SecretVersion**: current state and ledger entries, carrying
//!   only ciphertext (values are never held decrypted here)
//! - **ResolvedSecret**: the derived result of an inheritance merge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::encryption::EncryptedValue;

// =============================================================================
// ID Newtypes
// =============================================================================

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			/// Create a new ID from a UUID.
			pub fn new(id: Uuid) -> Self {
				Self(id)
			}

			/// Generate a new random ID.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			/// Get the inner UUID value.
			pub fn into_inner(self) -> Uuid {
				self.0
			}

			/// Get a reference to the inner UUID.
			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}

		impl From<$name> for Uuid {
			fn from(id: $name) -> Self {
				id.0
			}
		}
	};
}

define_id_type!(ProjectId, "Unique identifier for a project.");
define_id_type!(EnvironmentId, "Unique identifier for an environment.");
define_id_type!(SecretId, "Unique identifier for a secret.");
define_id_type!(
	SecretVersionId,
	"Unique identifier for a specific version of a secret."
);
define_id_type!(ActorId, "Unique identifier for the user performing a mutation.");

// =============================================================================
// Environment
// =============================================================================

/// An environment within a project (e.g., development, staging, production).
///
/// `inherits_from` is a weak reference used only for chain traversal; it
/// carries no ownership semantics. Parent deletion is guarded independently
/// by rejecting removal while dependents exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Environment {
	pub id: EnvironmentId,
	pub project_id: ProjectId,
	/// Human-readable name (e.g., "Production").
	pub name: String,
	/// URL-safe identifier, unique within the project.
	pub slug: String,
	/// Display color as `#rrggbb`.
	pub color: String,
	/// Parent environment whose secrets this one inherits, if any.
	pub inherits_from: Option<EnvironmentId>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Secret
// =============================================================================

/// Current state of a secret: the latest ciphertext triple and version.
///
/// Contains no plaintext, making it safe to log, return from list
/// operations, and pass around freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Secret {
	pub id: SecretId,
	/// Owning environment; keys are unique within it.
	pub environment_id: EnvironmentId,
	/// Secret key, `[A-Z][A-Z0-9_]*` (e.g., "STRIPE_API_KEY").
	pub key: String,
	/// Current ciphertext triple.
	pub value: EncryptedValue,
	/// Current version number (starts at 1, incremented on each mutation).
	pub version: u64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Version Ledger
// =============================================================================

/// The kind of mutation a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
	Created,
	Updated,
	Deleted,
	Rollback,
}

impl ChangeType {
	/// Returns the change type as a string for database storage.
	pub fn as_str(&self) -> &'static str {
		match self {
			ChangeType::Created => "created",
			ChangeType::Updated => "updated",
			ChangeType::Deleted => "deleted",
			ChangeType::Rollback => "rollback",
		}
	}

	/// Parse a change type from its stored string.
	///
	/// Returns an error for unknown values to prevent silent data corruption.
	pub fn parse(s: &str) -> Result<Self, &'static str> {
		match s {
			"created" => Ok(ChangeType::Created),
			"updated" => Ok(ChangeType::Updated),
			"deleted" => Ok(ChangeType::Deleted),
			"rollback" => Ok(ChangeType::Rollback),
			_ => Err("unknown change type"),
		}
	}
}

impl fmt::Display for ChangeType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One immutable entry in a secret's version ledger.
///
/// Ledger rows are append-only: never mutated, never reordered, and they
/// survive deletion of the live secret row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SecretVersion {
	pub id: SecretVersionId,
	pub secret_id: SecretId,
	/// Version number this entry introduced (1-indexed, strictly increasing).
	pub version: u64,
	/// Ciphertext triple as of this version. For `Deleted` entries this is
	/// the last known ciphertext before removal.
	pub value: EncryptedValue,
	pub change_type: ChangeType,
	/// Free-form provenance tag (e.g., "dashboard", "cli import").
	pub change_source: String,
	pub created_at: DateTime<Utc>,
}

// =============================================================================
// Resolved Secrets
// =============================================================================

/// A secret as visible from a given environment after the inheritance merge.
///
/// Derived, never persisted. Carries the owning environment for UI
/// attribution; `inherited` is false only when the owner is the environment
/// the resolution was run for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResolvedSecret {
	pub id: SecretId,
	pub key: String,
	pub value: EncryptedValue,
	pub version: u64,
	pub environment_id: EnvironmentId,
	pub inherited: bool,
	pub source_environment_id: EnvironmentId,
	pub source_environment_name: String,
}
