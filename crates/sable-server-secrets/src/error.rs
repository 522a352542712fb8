// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the secrets management system.

use thiserror::Error;

use crate::types::{EnvironmentId, ProjectId, SecretId, SecretVersionId};
use sable_server_db::DbError;

/// Result type alias for secrets operations.
pub type SecretsResult<T> = Result<T, SecretsError>;

/// Coarse classification of a [`SecretsError`].
///
/// A tampered ciphertext must stay distinguishable from a missing secret, so
/// crypto failures are a kind of their own and are never folded into
/// `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	NotFound,
	Conflict,
	InvalidInput,
	Crypto,
	Storage,
}

/// Errors that can occur during secrets operations.
#[derive(Debug, Error)]
pub enum SecretsError {
	// =========================================================================
	// Configuration Errors
	// =========================================================================
	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("master key not configured")]
	MasterKeyNotConfigured,

	#[error("invalid master key size: expected {expected} bytes, got {actual}")]
	InvalidKeySize { expected: usize, actual: usize },

	// =========================================================================
	// Encryption Errors
	// =========================================================================
	#[error("encryption failed: {0}")]
	Encryption(String),

	#[error("decryption failed: {0}")]
	Decryption(String),

	#[error("ciphertext authentication failed")]
	AuthenticationFailed,

	#[error("invalid IV: {0}")]
	InvalidIv(String),

	#[error("invalid auth tag: {0}")]
	InvalidTag(String),

	// =========================================================================
	// Not Found
	// =========================================================================
	#[error("environment not found: {0}")]
	EnvironmentNotFound(EnvironmentId),

	#[error("secret not found: {0}")]
	SecretNotFound(SecretId),

	#[error("secret version not found: {0}")]
	VersionNotFound(SecretVersionId),

	// =========================================================================
	// Conflicts
	// =========================================================================
	#[error("secret key already exists in environment {environment_id}: {key}")]
	DuplicateKey {
		environment_id: EnvironmentId,
		key: String,
	},

	#[error("environment slug already exists in project {project_id}: {slug}")]
	DuplicateSlug { project_id: ProjectId, slug: String },

	#[error("environment cannot inherit from itself: {0}")]
	SelfInheritance(EnvironmentId),

	#[error("circular inheritance: {environment_id} is an ancestor of {proposed_parent_id}")]
	CircularInheritance {
		environment_id: EnvironmentId,
		proposed_parent_id: EnvironmentId,
	},

	#[error("environment {environment_id} has {dependents} dependent environment(s)")]
	EnvironmentHasDependents {
		environment_id: EnvironmentId,
		dependents: u64,
	},

	#[error("secret was modified concurrently: {0}")]
	VersionConflict(SecretId),

	// =========================================================================
	// Invalid Input
	// =========================================================================
	#[error("invalid secret key: {0}")]
	InvalidSecretKey(String),

	#[error("invalid environment slug: {0}")]
	InvalidSlug(String),

	#[error("invalid environment color: {0}")]
	InvalidColor(String),

	#[error("secret value too large: {actual} bytes (max {max})")]
	ValueTooLarge { max: usize, actual: usize },

	#[error("cannot roll back to a deletion marker: {0}")]
	RollbackTargetDeleted(SecretVersionId),

	// =========================================================================
	// Infrastructure Errors
	// =========================================================================
	#[error("database error: {0}")]
	Database(#[from] DbError),

	#[error("internal error: {0}")]
	Internal(String),
}

impl SecretsError {
	/// Classify this error into one of the coarse kinds.
	pub fn kind(&self) -> ErrorKind {
		match self {
			SecretsError::Configuration(_)
			| SecretsError::MasterKeyNotConfigured
			| SecretsError::InvalidKeySize { .. }
			| SecretsError::Encryption(_)
			| SecretsError::Decryption(_)
			| SecretsError::AuthenticationFailed
			| SecretsError::InvalidIv(_)
			| SecretsError::InvalidTag(_) => ErrorKind::Crypto,

			SecretsError::EnvironmentNotFound(_)
			| SecretsError::SecretNotFound(_)
			| SecretsError::VersionNotFound(_) => ErrorKind::NotFound,

			SecretsError::DuplicateKey { .. }
			| SecretsError::DuplicateSlug { .. }
			| SecretsError::SelfInheritance(_)
			| SecretsError::CircularInheritance { .. }
			| SecretsError::EnvironmentHasDependents { .. }
			| SecretsError::VersionConflict(_) => ErrorKind::Conflict,

			SecretsError::InvalidSecretKey(_)
			| SecretsError::InvalidSlug(_)
			| SecretsError::InvalidColor(_)
			| SecretsError::ValueTooLarge { .. }
			| SecretsError::RollbackTargetDeleted(_) => ErrorKind::InvalidInput,

			SecretsError::Database(DbError::Conflict(_)) => ErrorKind::Conflict,
			SecretsError::Database(_) | SecretsError::Internal(_) => ErrorKind::Storage,
		}
	}

	/// Returns true if this error should be logged at error level.
	pub fn is_internal(&self) -> bool {
		matches!(self.kind(), ErrorKind::Storage)
			|| matches!(
				self,
				SecretsError::Configuration(_) | SecretsError::MasterKeyNotConfigured
			)
	}

	/// Returns the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self.kind() {
			ErrorKind::NotFound => 404,
			ErrorKind::Conflict => 409,
			ErrorKind::InvalidInput => 400,
			// Crypto failures are server-side conditions: a tampered row or a
			// misconfigured key, never the caller's fault.
			ErrorKind::Crypto => 500,
			ErrorKind::Storage => 500,
		}
	}
}
