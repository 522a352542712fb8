// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core event types for audit logging.
//!
//! Every successful mutation in the secrets core produces one
//! [`AuditEvent`]. Events reference entities by raw UUID so this crate stays
//! below the domain-type layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Actions recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
	// Environment events
	EnvironmentCreated,
	EnvironmentReparented,
	EnvironmentDeleted,

	// Secret events
	SecretCreated,
	SecretUpdated,
	SecretDeleted,
	SecretRolledBack,
}

impl AuditAction {
	/// Returns the action as a string for storage.
	pub fn as_str(&self) -> &'static str {
		match self {
			AuditAction::EnvironmentCreated => "environment_created",
			AuditAction::EnvironmentReparented => "environment_reparented",
			AuditAction::EnvironmentDeleted => "environment_deleted",
			AuditAction::SecretCreated => "secret_created",
			AuditAction::SecretUpdated => "secret_updated",
			AuditAction::SecretDeleted => "secret_deleted",
			AuditAction::SecretRolledBack => "secret_rolled_back",
		}
	}
}

impl fmt::Display for AuditAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One audit record.
///
/// Metadata is free-form JSON supplied by the caller; it must never contain
/// secret values or key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
	pub id: Uuid,
	pub action: AuditAction,
	pub project_id: Uuid,
	pub environment_id: Option<Uuid>,
	pub secret_id: Option<Uuid>,
	pub actor_id: Uuid,
	pub metadata: serde_json::Value,
	pub created_at: DateTime<Utc>,
}

impl AuditEvent {
	/// Start building an event for the given action.
	pub fn builder(action: AuditAction, project_id: Uuid, actor_id: Uuid) -> AuditEventBuilder {
		AuditEventBuilder {
			action,
			project_id,
			environment_id: None,
			secret_id: None,
			actor_id,
			metadata: serde_json::Value::Null,
		}
	}
}

/// Fluent builder for [`AuditEvent`].
#[derive(Debug)]
pub struct AuditEventBuilder {
	action: AuditAction,
	project_id: Uuid,
	environment_id: Option<Uuid>,
	secret_id: Option<Uuid>,
	actor_id: Uuid,
	metadata: serde_json::Value,
}

impl AuditEventBuilder {
	pub fn environment(mut self, environment_id: Uuid) -> Self {
		self.environment_id = Some(environment_id);
		self
	}

	pub fn secret(mut self, secret_id: Uuid) -> Self {
		self.secret_id = Some(secret_id);
		self
	}

	pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
		self.metadata = metadata;
		self
	}

	pub fn build(self) -> AuditEvent {
		AuditEvent {
			id: Uuid::new_v4(),
			action: self.action,
			project_id: self.project_id,
			environment_id: self.environment_id,
			secret_id: self.secret_id,
			actor_id: self.actor_id,
			metadata: self.metadata,
			created_at: Utc::now(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn action_serializes_snake_case() {
		let json = serde_json::to_string(&AuditAction::SecretRolledBack).unwrap();
		assert_eq!(json, "\"secret_rolled_back\"");
	}

	#[test]
	fn action_as_str_matches_serde() {
		for action in [
			AuditAction::EnvironmentCreated,
			AuditAction::EnvironmentReparented,
			AuditAction::EnvironmentDeleted,
			AuditAction::SecretCreated,
			AuditAction::SecretUpdated,
			AuditAction::SecretDeleted,
			AuditAction::SecretRolledBack,
		] {
			let json = serde_json::to_string(&action).unwrap();
			assert_eq!(json, format!("\"{}\"", action.as_str()));
		}
	}

	#[test]
	fn builder_populates_fields() {
		let project_id = Uuid::new_v4();
		let actor_id = Uuid::new_v4();
		let secret_id = Uuid::new_v4();

		let event = AuditEvent::builder(AuditAction::SecretCreated, project_id, actor_id)
			.secret(secret_id)
			.metadata(serde_json::json!({ "key": "API_KEY" }))
			.build();

		assert_eq!(event.action, AuditAction::SecretCreated);
		assert_eq!(event.project_id, project_id);
		assert_eq!(event.actor_id, actor_id);
		assert_eq!(event.secret_id, Some(secret_id));
		assert!(event.environment_id.is_none());
		assert_eq!(event.metadata["key"], "API_KEY");
	}
}
