// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secrets service providing high-level secret management operations.
//!
//! This service combines:
//! - Environment inheritance resolution
//! - Value encryption with the process-wide master key
//! - The append-only version ledger with rollback
//! - Audit notification after successful mutations
//!
//! # Security
//!
//! The service does not enforce user-level authorization; callers MUST
//! authorize at the API layer before invoking these methods. Plaintext only
//! ever appears in [`SecretString`] values, on the way into `encrypt` or out
//! of `decrypt`.

use std::sync::Arc;

use sable_common_secret::SecretString;
use sable_server_audit::{AuditAction, AuditEvent, AuditSink};
use tracing::{info, instrument, warn};

use crate::config::SecretsConfig;
use crate::encryption::{self, MasterKey};
use crate::error::{SecretsError, SecretsResult};
use crate::resolver::{self, MAX_INHERITANCE_DEPTH};
use crate::store::{NewEnvironment, NewSecret, SecretStore};
use crate::types::{
	ActorId, ChangeType, Environment, EnvironmentId, ProjectId, ResolvedSecret, Secret, SecretId,
	SecretVersion, SecretVersionId,
};

/// Maximum size of a secret value in bytes.
const MAX_SECRET_VALUE_SIZE: usize = 64 * 1024;

/// Request to create a new environment.
#[derive(Debug)]
pub struct CreateEnvironmentInput {
	pub project_id: ProjectId,
	pub name: String,
	pub slug: String,
	pub color: String,
	pub inherits_from: Option<EnvironmentId>,
	pub actor: ActorId,
}

/// Request to create a new secret.
#[derive(Debug)]
pub struct CreateSecretInput {
	pub environment_id: EnvironmentId,
	pub key: String,
	pub value: SecretString,
	pub change_source: String,
	pub actor: ActorId,
}

/// A decrypted secret value with metadata.
#[derive(Debug)]
pub struct PlaintextSecret {
	pub id: SecretId,
	pub environment_id: EnvironmentId,
	pub key: String,
	pub version: u64,
	pub value: SecretString,
}

/// Secrets service for managing encrypted, versioned, inheritable secrets.
pub struct SecretsService<S: SecretStore> {
	store: Arc<S>,
	master_key: Arc<MasterKey>,
	audit: Option<Arc<dyn AuditSink>>,
}

impl<S: SecretStore> SecretsService<S> {
	pub fn new(store: Arc<S>, config: &SecretsConfig) -> Self {
		Self {
			store,
			master_key: Arc::clone(config.master_key()),
			audit: None,
		}
	}

	/// Attach an audit sink notified after each successful mutation.
	pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
		self.audit = Some(sink);
		self
	}

	// =========================================================================
	// Environments
	// =========================================================================

	#[instrument(skip(self, input), fields(project_id = %input.project_id, slug = %input.slug))]
	pub async fn create_environment(
		&self,
		input: CreateEnvironmentInput,
	) -> SecretsResult<Environment> {
		validate_slug(&input.slug)?;
		validate_color(&input.color)?;

		if let Some(parent_id) = input.inherits_from {
			let parent = self
				.store
				.get_environment(parent_id)
				.await?
				.ok_or(SecretsError::EnvironmentNotFound(parent_id))?;
			if parent.project_id != input.project_id {
				return Err(SecretsError::EnvironmentNotFound(parent_id));
			}
		}

		let request = NewEnvironment {
			project_id: input.project_id,
			name: input.name,
			slug: input.slug.clone(),
			color: input.color,
			inherits_from: input.inherits_from,
		};

		let environment = match self.store.create_environment(request).await {
			Ok(environment) => environment,
			Err(SecretsError::Database(sable_server_db::DbError::Conflict(_))) => {
				return Err(SecretsError::DuplicateSlug {
					project_id: input.project_id,
					slug: input.slug,
				});
			}
			Err(e) => return Err(e),
		};

		info!(environment_id = %environment.id, slug = %environment.slug, "Created environment");

		self.publish_audit(
			AuditEvent::builder(
				AuditAction::EnvironmentCreated,
				environment.project_id.into_inner(),
				input.actor.into_inner(),
			)
			.environment(environment.id.into_inner())
			.metadata(serde_json::json!({ "slug": environment.slug }))
			.build(),
		)
		.await;

		Ok(environment)
	}

	pub async fn get_environment(&self, id: EnvironmentId) -> SecretsResult<Option<Environment>> {
		self.store.get_environment(id).await
	}

	pub async fn list_environments(
		&self,
		project_id: ProjectId,
	) -> SecretsResult<Vec<Environment>> {
		self.store.list_environments(project_id).await
	}

	/// Change an environment's parent pointer.
	///
	/// Self-inheritance and cycles are rejected before any write; the
	/// chain-builder's own repeated-id break stays as an independent safety
	/// net for data already inconsistent.
	#[instrument(skip(self), fields(environment_id = %id, inherits_from = ?inherits_from))]
	pub async fn reparent_environment(
		&self,
		id: EnvironmentId,
		inherits_from: Option<EnvironmentId>,
		actor: ActorId,
	) -> SecretsResult<Environment> {
		let environment = self
			.store
			.get_environment(id)
			.await?
			.ok_or(SecretsError::EnvironmentNotFound(id))?;

		if let Some(parent_id) = inherits_from {
			if parent_id == id {
				return Err(SecretsError::SelfInheritance(id));
			}

			let environments = self.store.list_environments(environment.project_id).await?;
			if !environments.iter().any(|env| env.id == parent_id) {
				return Err(SecretsError::EnvironmentNotFound(parent_id));
			}
			if resolver::detect_circular_inheritance(id, parent_id, &environments) {
				return Err(SecretsError::CircularInheritance {
					environment_id: id,
					proposed_parent_id: parent_id,
				});
			}
		}

		let updated = self.store.set_environment_parent(id, inherits_from).await?;

		info!(environment_id = %id, inherits_from = ?inherits_from, "Reparented environment");

		self.publish_audit(
			AuditEvent::builder(
				AuditAction::EnvironmentReparented,
				updated.project_id.into_inner(),
				actor.into_inner(),
			)
			.environment(id.into_inner())
			.metadata(serde_json::json!({
				"inherits_from": inherits_from.map(|p| p.to_string()),
			}))
			.build(),
		)
		.await;

		Ok(updated)
	}

	/// Delete an environment.
	///
	/// Rejected while any environment still names this one as parent; the
	/// inheritance pointer is a weak reference, so the guard lives here
	/// rather than in referential integrity.
	#[instrument(skip(self), fields(environment_id = %id))]
	pub async fn delete_environment(
		&self,
		id: EnvironmentId,
		change_source: &str,
		actor: ActorId,
	) -> SecretsResult<()> {
		let environment = self
			.store
			.get_environment(id)
			.await?
			.ok_or(SecretsError::EnvironmentNotFound(id))?;

		let dependents = self.store.count_environment_dependents(id).await?;
		if dependents > 0 {
			return Err(SecretsError::EnvironmentHasDependents {
				environment_id: id,
				dependents,
			});
		}

		self.store.delete_environment(id, change_source).await?;

		info!(environment_id = %id, "Deleted environment");

		self.publish_audit(
			AuditEvent::builder(
				AuditAction::EnvironmentDeleted,
				environment.project_id.into_inner(),
				actor.into_inner(),
			)
			.environment(id.into_inner())
			.metadata(serde_json::json!({ "slug": environment.slug }))
			.build(),
		)
		.await;

		Ok(())
	}

	// =========================================================================
	// Resolution & Reads
	// =========================================================================

	/// Compute the merged, override-aware set of secrets visible from an
	/// environment. Returns ciphertext only; nothing is decrypted.
	#[instrument(skip(self), fields(environment_id = %id))]
	pub async fn resolve_secrets(&self, id: EnvironmentId) -> SecretsResult<Vec<ResolvedSecret>> {
		let environment = self
			.store
			.get_environment(id)
			.await?
			.ok_or(SecretsError::EnvironmentNotFound(id))?;

		let environments = self.store.list_environments(environment.project_id).await?;
		let chain = resolver::build_chain(id, &environments, MAX_INHERITANCE_DEPTH);
		let secrets = self.store.list_secrets_for_environments(&chain).await?;

		Ok(resolver::resolve_secrets(id, &environments, &secrets))
	}

	/// Decrypt a single secret's current value.
	#[instrument(skip(self), fields(secret_id = %id))]
	pub async fn get_secret_value(&self, id: SecretId) -> SecretsResult<PlaintextSecret> {
		let secret = self
			.store
			.get_secret(id)
			.await?
			.ok_or(SecretsError::SecretNotFound(id))?;

		let value = encryption::decrypt(&self.master_key, &secret.value)?;

		Ok(PlaintextSecret {
			id: secret.id,
			environment_id: secret.environment_id,
			key: secret.key,
			version: secret.version,
			value,
		})
	}

	/// List a secret's ledger entries, newest first.
	///
	/// Also valid for deleted secrets; the ledger outlives the live row.
	pub async fn list_versions(&self, secret_id: SecretId) -> SecretsResult<Vec<SecretVersion>> {
		self.store.list_versions(secret_id).await
	}

	// =========================================================================
	// Mutations
	// =========================================================================

	#[instrument(skip(self, input), fields(environment_id = %input.environment_id, key = %input.key))]
	pub async fn create_secret(&self, input: CreateSecretInput) -> SecretsResult<Secret> {
		validate_secret_key(&input.key)?;
		validate_value_size(input.value.expose())?;

		let environment = self
			.store
			.get_environment(input.environment_id)
			.await?
			.ok_or(SecretsError::EnvironmentNotFound(input.environment_id))?;

		if self
			.store
			.get_secret_by_key(input.environment_id, &input.key)
			.await?
			.is_some()
		{
			return Err(SecretsError::DuplicateKey {
				environment_id: input.environment_id,
				key: input.key,
			});
		}

		let encrypted = encryption::encrypt(&self.master_key, input.value.expose())?;

		let request = NewSecret {
			environment_id: input.environment_id,
			key: input.key.clone(),
			value: encrypted,
			change_source: input.change_source.clone(),
		};

		let secret = match self.store.create_secret(request).await {
			Ok(secret) => secret,
			// The unique index backstops a race between the pre-check and
			// the insert.
			Err(SecretsError::Database(sable_server_db::DbError::Conflict(_))) => {
				return Err(SecretsError::DuplicateKey {
					environment_id: input.environment_id,
					key: input.key,
				});
			}
			Err(e) => return Err(e),
		};

		info!(secret_id = %secret.id, key = %secret.key, "Created secret");

		self.publish_audit(
			AuditEvent::builder(
				AuditAction::SecretCreated,
				environment.project_id.into_inner(),
				input.actor.into_inner(),
			)
			.environment(environment.id.into_inner())
			.secret(secret.id.into_inner())
			.metadata(serde_json::json!({
				"key": secret.key,
				"change_source": input.change_source,
			}))
			.build(),
		)
		.await;

		Ok(secret)
	}

	#[instrument(skip(self, value), fields(secret_id = %id))]
	pub async fn update_secret(
		&self,
		id: SecretId,
		value: SecretString,
		change_source: &str,
		actor: ActorId,
	) -> SecretsResult<Secret> {
		validate_value_size(value.expose())?;

		let secret = self
			.store
			.get_secret(id)
			.await?
			.ok_or(SecretsError::SecretNotFound(id))?;

		let encrypted = encryption::encrypt(&self.master_key, value.expose())?;

		let updated = self
			.store
			.advance_secret(id, secret.version, encrypted, ChangeType::Updated, change_source)
			.await?;

		info!(secret_id = %id, version = updated.version, "Updated secret");

		self.audit_secret_mutation(AuditAction::SecretUpdated, &updated, actor, change_source)
			.await;

		Ok(updated)
	}

	#[instrument(skip(self), fields(secret_id = %id))]
	pub async fn delete_secret(
		&self,
		id: SecretId,
		change_source: &str,
		actor: ActorId,
	) -> SecretsResult<()> {
		let secret = self
			.store
			.get_secret(id)
			.await?
			.ok_or(SecretsError::SecretNotFound(id))?;

		self.store.delete_secret(id, change_source).await?;

		info!(secret_id = %id, key = %secret.key, "Deleted secret");

		self.audit_secret_mutation(AuditAction::SecretDeleted, &secret, actor, change_source)
			.await;

		Ok(())
	}

	/// Restore a secret's value to the content of an earlier version.
	///
	/// A rollback is additive: the target's ciphertext becomes the current
	/// state under a brand-new version number, and the ledger gains a
	/// `Rollback` entry. The target's own version number is never reused.
	#[instrument(skip(self), fields(secret_id = %id, target_version_id = %target_version_id))]
	pub async fn rollback_secret(
		&self,
		id: SecretId,
		target_version_id: SecretVersionId,
		change_source: &str,
		actor: ActorId,
	) -> SecretsResult<Secret> {
		let secret = self
			.store
			.get_secret(id)
			.await?
			.ok_or(SecretsError::SecretNotFound(id))?;

		let target = self
			.store
			.get_version(target_version_id)
			.await?
			.ok_or(SecretsError::VersionNotFound(target_version_id))?;

		if target.secret_id != secret.id {
			// A version belonging to another secret is indistinguishable
			// from an absent one to the caller.
			return Err(SecretsError::VersionNotFound(target_version_id));
		}

		if target.change_type == ChangeType::Deleted {
			return Err(SecretsError::RollbackTargetDeleted(target_version_id));
		}

		let updated = self
			.store
			.advance_secret(
				id,
				secret.version,
				target.value.clone(),
				ChangeType::Rollback,
				change_source,
			)
			.await?;

		info!(
			secret_id = %id,
			version = updated.version,
			restored_version = target.version,
			"Rolled back secret"
		);

		self.audit_secret_mutation(AuditAction::SecretRolledBack, &updated, actor, change_source)
			.await;

		Ok(updated)
	}

	// =========================================================================
	// Audit plumbing
	// =========================================================================

	async fn audit_secret_mutation(
		&self,
		action: AuditAction,
		secret: &Secret,
		actor: ActorId,
		change_source: &str,
	) {
		if self.audit.is_none() {
			return;
		}

		let project_id = match self.store.get_environment(secret.environment_id).await {
			Ok(Some(environment)) => environment.project_id.into_inner(),
			Ok(None) | Err(_) => uuid::Uuid::nil(),
		};

		self.publish_audit(
			AuditEvent::builder(action, project_id, actor.into_inner())
				.environment(secret.environment_id.into_inner())
				.secret(secret.id.into_inner())
				.metadata(serde_json::json!({
					"key": secret.key,
					"version": secret.version,
					"change_source": change_source,
				}))
				.build(),
		)
		.await;
	}

	/// Fire-and-forget: a failing sink is logged and never fails the
	/// operation it records.
	async fn publish_audit(&self, event: AuditEvent) {
		if let Some(sink) = &self.audit {
			if let Err(e) = sink.publish(&event).await {
				warn!(sink = sink.name(), error = %e, "audit sink publish failed");
			}
		}
	}
}

fn validate_secret_key(key: &str) -> SecretsResult<()> {
	if key.is_empty() || key.len() > 128 {
		return Err(SecretsError::InvalidSecretKey(
			"key must be 1-128 characters".into(),
		));
	}

	let first_char = key.chars().next().unwrap();
	if !first_char.is_ascii_uppercase() {
		return Err(SecretsError::InvalidSecretKey(
			"key must start with an uppercase letter".into(),
		));
	}

	if !key
		.chars()
		.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
	{
		return Err(SecretsError::InvalidSecretKey(
			"key must contain only uppercase letters, digits, and underscores".into(),
		));
	}

	Ok(())
}

fn validate_slug(slug: &str) -> SecretsResult<()> {
	if slug.is_empty() || slug.len() > 64 {
		return Err(SecretsError::InvalidSlug(
			"slug must be 1-64 characters".into(),
		));
	}

	let first_char = slug.chars().next().unwrap();
	if !first_char.is_ascii_lowercase() && !first_char.is_ascii_digit() {
		return Err(SecretsError::InvalidSlug(
			"slug must start with a lowercase letter or digit".into(),
		));
	}

	if !slug
		.chars()
		.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
	{
		return Err(SecretsError::InvalidSlug(
			"slug must contain only lowercase letters, digits, and dashes".into(),
		));
	}

	Ok(())
}

fn validate_color(color: &str) -> SecretsResult<()> {
	let valid = color.len() == 7
		&& color.starts_with('#')
		&& color.chars().skip(1).all(|c| c.is_ascii_hexdigit());

	if !valid {
		return Err(SecretsError::InvalidColor(format!(
			"expected #rrggbb, got {color:?}"
		)));
	}

	Ok(())
}

fn validate_value_size(value: &str) -> SecretsResult<()> {
	if value.len() > MAX_SECRET_VALUE_SIZE {
		return Err(SecretsError::ValueTooLarge {
			max: MAX_SECRET_VALUE_SIZE,
			actual: value.len(),
		});
	}

	Ok(())
}
