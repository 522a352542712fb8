// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret storage with SQLite backend.
//!
//! [`SecretStore`] exposes semantic operations whose writes are atomic: the
//! current-state row and the matching version ledger row always land in one
//! transaction. A ledger entry without the current-state update (or vice
//! versa) must never become visible, so the transaction boundary lives here,
//! not in application-level compensation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::encryption::EncryptedValue;
use crate::error::{SecretsError, SecretsResult};
use crate::types::{
	ChangeType, Environment, EnvironmentId, ProjectId, Secret, SecretId, SecretVersion,
	SecretVersionId,
};
use sable_server_db::{
	CreateEnvironmentParams, CreateSecretParams, CreateVersionParams, EnvironmentRow,
	EnvironmentsRepository, SecretRow, SecretVersionRow, SecretsRepository,
};

/// Request to create a new environment.
#[derive(Debug, Clone)]
pub struct NewEnvironment {
	pub project_id: ProjectId,
	pub name: String,
	pub slug: String,
	pub color: String,
	pub inherits_from: Option<EnvironmentId>,
}

/// Request to create a new secret with its initial version.
#[derive(Debug, Clone)]
pub struct NewSecret {
	pub environment_id: EnvironmentId,
	pub key: String,
	pub value: EncryptedValue,
	pub change_source: String,
}

/// Trait for secret storage operations.
///
/// Mutating methods are atomic at the persistence layer; read methods
/// operate on committed state only.
#[async_trait]
pub trait SecretStore: Send + Sync {
	/// Create a new environment.
	async fn create_environment(&self, request: NewEnvironment) -> SecretsResult<Environment>;

	/// Get an environment by ID.
	async fn get_environment(&self, id: EnvironmentId) -> SecretsResult<Option<Environment>>;

	/// List all environments in a project.
	async fn list_environments(&self, project_id: ProjectId) -> SecretsResult<Vec<Environment>>;

	/// Update an environment's parent pointer.
	async fn set_environment_parent(
		&self,
		id: EnvironmentId,
		inherits_from: Option<EnvironmentId>,
	) -> SecretsResult<Environment>;

	/// Count environments that inherit directly from this one.
	async fn count_environment_dependents(&self, id: EnvironmentId) -> SecretsResult<u64>;

	/// Delete an environment and its live secrets.
	///
	/// Each live secret receives a final `Deleted` ledger entry in the same
	/// transaction; version history is retained.
	async fn delete_environment(&self, id: EnvironmentId, change_source: &str)
		-> SecretsResult<()>;

	/// Create a new secret at version 1 with a `Created` ledger entry.
	async fn create_secret(&self, request: NewSecret) -> SecretsResult<Secret>;

	/// Get a secret by ID.
	async fn get_secret(&self, id: SecretId) -> SecretsResult<Option<Secret>>;

	/// Get a secret by key within an environment.
	async fn get_secret_by_key(
		&self,
		environment_id: EnvironmentId,
		key: &str,
	) -> SecretsResult<Option<Secret>>;

	/// List all secrets owned by any of the given environments.
	async fn list_secrets_for_environments(
		&self,
		environment_ids: &[EnvironmentId],
	) -> SecretsResult<Vec<Secret>>;

	/// Replace a secret's current ciphertext at `expected_version + 1` and
	/// append the matching ledger entry.
	///
	/// The compare-and-swap on `expected_version` rejects the second of two
	/// racing writers with [`SecretsError::VersionConflict`], so version
	/// numbers never collide.
	async fn advance_secret(
		&self,
		id: SecretId,
		expected_version: u64,
		value: EncryptedValue,
		change_type: ChangeType,
		change_source: &str,
	) -> SecretsResult<Secret>;

	/// Delete a secret's live row, appending a final `Deleted` ledger entry
	/// carrying the last known ciphertext.
	async fn delete_secret(&self, id: SecretId, change_source: &str) -> SecretsResult<()>;

	/// Get a version ledger entry by ID.
	async fn get_version(&self, id: SecretVersionId) -> SecretsResult<Option<SecretVersion>>;

	/// List a secret's ledger entries, newest first.
	///
	/// Works for deleted secrets too: the ledger outlives the live row.
	async fn list_versions(&self, secret_id: SecretId) -> SecretsResult<Vec<SecretVersion>>;
}

/// SQLite implementation of [`SecretStore`].
pub struct SqliteSecretStore {
	environments: EnvironmentsRepository,
	secrets: SecretsRepository,
}

impl SqliteSecretStore {
	/// Create a new SQLite secret store.
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			environments: EnvironmentsRepository::new(pool.clone()),
			secrets: SecretsRepository::new(pool),
		}
	}
}

#[async_trait]
impl SecretStore for SqliteSecretStore {
	#[instrument(skip(self, request), fields(slug = %request.slug, project_id = %request.project_id))]
	async fn create_environment(&self, request: NewEnvironment) -> SecretsResult<Environment> {
		let id = EnvironmentId::generate();
		let now = Utc::now();
		let now_str = now.to_rfc3339();

		let params = CreateEnvironmentParams {
			id: id.to_string(),
			project_id: request.project_id.to_string(),
			name: request.name.clone(),
			slug: request.slug.clone(),
			color: request.color.clone(),
			inherits_from: request.inherits_from.map(|p| p.to_string()),
			created_at: now_str.clone(),
			updated_at: now_str,
		};
		self.environments.insert_environment(&params).await?;

		Ok(Environment {
			id,
			project_id: request.project_id,
			name: request.name,
			slug: request.slug,
			color: request.color,
			inherits_from: request.inherits_from,
			created_at: now,
			updated_at: now,
		})
	}

	async fn get_environment(&self, id: EnvironmentId) -> SecretsResult<Option<Environment>> {
		let row = self.environments.get_environment(&id.to_string()).await?;
		row.map(|row| environment_from_row(&row)).transpose()
	}

	async fn list_environments(&self, project_id: ProjectId) -> SecretsResult<Vec<Environment>> {
		let rows = self
			.environments
			.list_environments_for_project(&project_id.to_string())
			.await?;
		rows.iter().map(environment_from_row).collect()
	}

	#[instrument(skip(self), fields(environment_id = %id))]
	async fn set_environment_parent(
		&self,
		id: EnvironmentId,
		inherits_from: Option<EnvironmentId>,
	) -> SecretsResult<Environment> {
		let now_str = Utc::now().to_rfc3339();
		let parent_str = inherits_from.map(|p| p.to_string());
		let affected = self
			.environments
			.set_parent(&id.to_string(), parent_str.as_deref(), &now_str)
			.await?;

		if affected == 0 {
			return Err(SecretsError::EnvironmentNotFound(id));
		}

		self.get_environment(id)
			.await?
			.ok_or(SecretsError::EnvironmentNotFound(id))
	}

	async fn count_environment_dependents(&self, id: EnvironmentId) -> SecretsResult<u64> {
		let count = self.environments.count_children(&id.to_string()).await?;
		Ok(count as u64)
	}

	#[instrument(skip(self), fields(environment_id = %id))]
	async fn delete_environment(
		&self,
		id: EnvironmentId,
		change_source: &str,
	) -> SecretsResult<()> {
		let live = self
			.secrets
			.list_secrets_for_environments(&[id.to_string()])
			.await?;

		let mut tx = self.secrets.begin().await?;

		for row in &live {
			// Re-read inside the transaction; a row deleted since the listing
			// simply drops out.
			let Some(current) = self.secrets.get_secret_in_tx(&mut tx, &row.id).await? else {
				continue;
			};
			self.secrets
				.insert_version_in_tx(&mut tx, &tombstone_params(&current, change_source))
				.await?;
			self.secrets.delete_secret_in_tx(&mut tx, &current.id).await?;
		}

		let affected = self
			.environments
			.delete_environment_in_tx(&mut tx, &id.to_string())
			.await?;
		if affected == 0 {
			return Err(SecretsError::EnvironmentNotFound(id));
		}

		tx.commit().await.map_err(sable_server_db::DbError::from)?;

		debug!(environment_id = %id, secrets = live.len(), "environment deleted");
		Ok(())
	}

	#[instrument(skip(self, request), fields(environment_id = %request.environment_id, key = %request.key))]
	async fn create_secret(&self, request: NewSecret) -> SecretsResult<Secret> {
		let secret_id = SecretId::generate();
		let version_id = SecretVersionId::generate();
		let now = Utc::now();
		let now_str = now.to_rfc3339();

		let secret_params = CreateSecretParams {
			id: secret_id.to_string(),
			environment_id: request.environment_id.to_string(),
			key: request.key.clone(),
			encrypted_value: request.value.ciphertext.clone(),
			iv: request.value.iv.clone(),
			auth_tag: request.value.auth_tag.clone(),
			created_at: now_str.clone(),
			updated_at: now_str.clone(),
		};
		let version_params = CreateVersionParams {
			id: version_id.to_string(),
			secret_id: secret_id.to_string(),
			version: 1,
			encrypted_value: request.value.ciphertext.clone(),
			iv: request.value.iv.clone(),
			auth_tag: request.value.auth_tag.clone(),
			change_type: ChangeType::Created.as_str().to_string(),
			change_source: request.change_source.clone(),
			created_at: now_str,
		};

		let mut tx = self.secrets.begin().await?;
		self.secrets.insert_secret_in_tx(&mut tx, &secret_params).await?;
		self.secrets.insert_version_in_tx(&mut tx, &version_params).await?;
		tx.commit().await.map_err(sable_server_db::DbError::from)?;

		Ok(Secret {
			id: secret_id,
			environment_id: request.environment_id,
			key: request.key,
			value: request.value,
			version: 1,
			created_at: now,
			updated_at: now,
		})
	}

	async fn get_secret(&self, id: SecretId) -> SecretsResult<Option<Secret>> {
		let row = self.secrets.get_secret(&id.to_string()).await?;
		row.map(|row| secret_from_row(&row)).transpose()
	}

	async fn get_secret_by_key(
		&self,
		environment_id: EnvironmentId,
		key: &str,
	) -> SecretsResult<Option<Secret>> {
		let row = self
			.secrets
			.get_secret_by_key(&environment_id.to_string(), key)
			.await?;
		row.map(|row| secret_from_row(&row)).transpose()
	}

	async fn list_secrets_for_environments(
		&self,
		environment_ids: &[EnvironmentId],
	) -> SecretsResult<Vec<Secret>> {
		let ids: Vec<String> = environment_ids.iter().map(|id| id.to_string()).collect();
		let rows = self.secrets.list_secrets_for_environments(&ids).await?;
		rows.iter().map(secret_from_row).collect()
	}

	#[instrument(skip(self, value), fields(secret_id = %id, expected_version, change_type = %change_type))]
	async fn advance_secret(
		&self,
		id: SecretId,
		expected_version: u64,
		value: EncryptedValue,
		change_type: ChangeType,
		change_source: &str,
	) -> SecretsResult<Secret> {
		let new_version = expected_version + 1;
		let now_str = Utc::now().to_rfc3339();

		let mut tx = self.secrets.begin().await?;
		let affected = self
			.secrets
			.update_current_in_tx(
				&mut tx,
				&id.to_string(),
				expected_version as i64,
				&value.ciphertext,
				&value.iv,
				&value.auth_tag,
				new_version as i64,
				&now_str,
			)
			.await?;

		if affected == 0 {
			// Either the secret is gone or another writer advanced it first.
			drop(tx);
			return match self.get_secret(id).await? {
				Some(_) => Err(SecretsError::VersionConflict(id)),
				None => Err(SecretsError::SecretNotFound(id)),
			};
		}

		let version_params = CreateVersionParams {
			id: SecretVersionId::generate().to_string(),
			secret_id: id.to_string(),
			version: new_version as i64,
			encrypted_value: value.ciphertext.clone(),
			iv: value.iv.clone(),
			auth_tag: value.auth_tag.clone(),
			change_type: change_type.as_str().to_string(),
			change_source: change_source.to_string(),
			created_at: now_str,
		};
		self.secrets.insert_version_in_tx(&mut tx, &version_params).await?;

		let updated = self
			.secrets
			.get_secret_in_tx(&mut tx, &id.to_string())
			.await?
			.ok_or_else(|| SecretsError::Internal("secret vanished mid-transaction".into()))?;

		tx.commit().await.map_err(sable_server_db::DbError::from)?;

		debug!(secret_id = %id, version = new_version, change_type = %change_type, "secret advanced");
		secret_from_row(&updated)
	}

	#[instrument(skip(self), fields(secret_id = %id))]
	async fn delete_secret(&self, id: SecretId, change_source: &str) -> SecretsResult<()> {
		let mut tx = self.secrets.begin().await?;

		let Some(current) = self.secrets.get_secret_in_tx(&mut tx, &id.to_string()).await? else {
			return Err(SecretsError::SecretNotFound(id));
		};

		self.secrets
			.insert_version_in_tx(&mut tx, &tombstone_params(&current, change_source))
			.await?;
		self.secrets.delete_secret_in_tx(&mut tx, &current.id).await?;

		tx.commit().await.map_err(sable_server_db::DbError::from)?;

		debug!(secret_id = %id, "secret deleted");
		Ok(())
	}

	async fn get_version(&self, id: SecretVersionId) -> SecretsResult<Option<SecretVersion>> {
		let row = self.secrets.get_version_by_id(&id.to_string()).await?;
		row.map(|row| version_from_row(&row)).transpose()
	}

	async fn list_versions(&self, secret_id: SecretId) -> SecretsResult<Vec<SecretVersion>> {
		let rows = self.secrets.list_versions(&secret_id.to_string()).await?;
		rows.iter().map(version_from_row).collect()
	}
}

/// Final `Deleted` ledger entry for a live secret row.
fn tombstone_params(current: &SecretRow, change_source: &str) -> CreateVersionParams {
	CreateVersionParams {
		id: SecretVersionId::generate().to_string(),
		secret_id: current.id.clone(),
		version: current.version + 1,
		encrypted_value: current.encrypted_value.clone(),
		iv: current.iv.clone(),
		auth_tag: current.auth_tag.clone(),
		change_type: ChangeType::Deleted.as_str().to_string(),
		change_source: change_source.to_string(),
		created_at: Utc::now().to_rfc3339(),
	}
}

fn parse_uuid(value: &str, what: &str) -> SecretsResult<Uuid> {
	Uuid::parse_str(value).map_err(|e| SecretsError::Internal(format!("invalid {what} UUID: {e}")))
}

fn parse_datetime(value: &str, what: &str) -> SecretsResult<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| SecretsError::Internal(format!("invalid {what}: {e}")))
}

fn environment_from_row(row: &EnvironmentRow) -> SecretsResult<Environment> {
	let inherits_from = row
		.inherits_from
		.as_deref()
		.map(|p| parse_uuid(p, "inherits_from").map(EnvironmentId::new))
		.transpose()?;

	Ok(Environment {
		id: EnvironmentId::new(parse_uuid(&row.id, "environment id")?),
		project_id: ProjectId::new(parse_uuid(&row.project_id, "project_id")?),
		name: row.name.clone(),
		slug: row.slug.clone(),
		color: row.color.clone(),
		inherits_from,
		created_at: parse_datetime(&row.created_at, "created_at")?,
		updated_at: parse_datetime(&row.updated_at, "updated_at")?,
	})
}

fn secret_from_row(row: &SecretRow) -> SecretsResult<Secret> {
	Ok(Secret {
		id: SecretId::new(parse_uuid(&row.id, "secret id")?),
		environment_id: EnvironmentId::new(parse_uuid(&row.environment_id, "environment_id")?),
		key: row.key.clone(),
		value: EncryptedValue {
			ciphertext: row.encrypted_value.clone(),
			iv: row.iv.clone(),
			auth_tag: row.auth_tag.clone(),
		},
		version: row.version as u64,
		created_at: parse_datetime(&row.created_at, "created_at")?,
		updated_at: parse_datetime(&row.updated_at, "updated_at")?,
	})
}

fn version_from_row(row: &SecretVersionRow) -> SecretsResult<SecretVersion> {
	let change_type = ChangeType::parse(&row.change_type)
		.map_err(|e| SecretsError::Internal(format!("invalid change_type: {e}")))?;

	Ok(SecretVersion {
		id: SecretVersionId::new(parse_uuid(&row.id, "version id")?),
		secret_id: SecretId::new(parse_uuid(&row.secret_id, "secret_id")?),
		version: row.version as u64,
		value: EncryptedValue {
			ciphertext: row.encrypted_value.clone(),
			iv: row.iv.clone(),
			auth_tag: row.auth_tag.clone(),
		},
		change_type,
		change_source: row.change_source.clone(),
		created_at: parse_datetime(&row.created_at, "created_at")?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
	use std::str::FromStr;

	async fn make_store() -> SqliteSecretStore {
		let options = SqliteConnectOptions::from_str(":memory:")
			.unwrap()
			.create_if_missing(true);

		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(options)
			.await
			.expect("Failed to create test pool");

		sable_server_db::ensure_schema(&pool).await.unwrap();
		SqliteSecretStore::new(pool)
	}

	fn fake_value(marker: &str) -> EncryptedValue {
		EncryptedValue {
			ciphertext: marker.to_string(),
			iv: "aXZpdml2aXZpdg==".to_string(),
			auth_tag: "dGFndGFndGFndGFndGFn".to_string(),
		}
	}

	async fn make_environment(store: &SqliteSecretStore, slug: &str) -> Environment {
		store
			.create_environment(NewEnvironment {
				project_id: ProjectId::new(uuid::Uuid::from_u128(1)),
				name: slug.to_string(),
				slug: slug.to_string(),
				color: "#6366f1".to_string(),
				inherits_from: None,
			})
			.await
			.unwrap()
	}

	async fn make_secret(store: &SqliteSecretStore, env: &Environment, key: &str) -> Secret {
		store
			.create_secret(NewSecret {
				environment_id: env.id,
				key: key.to_string(),
				value: fake_value("v1"),
				change_source: "test".to_string(),
			})
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn create_secret_writes_current_state_and_ledger() {
		let store = make_store().await;
		let env = make_environment(&store, "dev").await;
		let secret = make_secret(&store, &env, "API_KEY").await;

		assert_eq!(secret.version, 1);

		let fetched = store.get_secret(secret.id).await.unwrap().unwrap();
		assert_eq!(fetched.key, "API_KEY");
		assert_eq!(fetched.version, 1);

		let versions = store.list_versions(secret.id).await.unwrap();
		assert_eq!(versions.len(), 1);
		assert_eq!(versions[0].version, 1);
		assert_eq!(versions[0].change_type, ChangeType::Created);
		assert_eq!(versions[0].change_source, "test");
	}

	#[tokio::test]
	async fn advance_bumps_version_and_appends_ledger() {
		let store = make_store().await;
		let env = make_environment(&store, "dev").await;
		let secret = make_secret(&store, &env, "API_KEY").await;

		let updated = store
			.advance_secret(secret.id, 1, fake_value("v2"), ChangeType::Updated, "test")
			.await
			.unwrap();
		assert_eq!(updated.version, 2);
		assert_eq!(updated.value.ciphertext, "v2");

		let versions = store.list_versions(secret.id).await.unwrap();
		let numbers: Vec<u64> = versions.iter().map(|v| v.version).collect();
		assert_eq!(numbers, vec![2, 1]);
		assert_eq!(versions[0].change_type, ChangeType::Updated);
	}

	#[tokio::test]
	async fn advance_rejects_stale_version() {
		let store = make_store().await;
		let env = make_environment(&store, "dev").await;
		let secret = make_secret(&store, &env, "API_KEY").await;

		store
			.advance_secret(secret.id, 1, fake_value("v2"), ChangeType::Updated, "test")
			.await
			.unwrap();

		// A second writer that also read version 1 must lose.
		let result = store
			.advance_secret(secret.id, 1, fake_value("v2b"), ChangeType::Updated, "test")
			.await;
		assert!(matches!(result, Err(SecretsError::VersionConflict(_))));

		// And the losing writer must not have left a ledger row behind.
		let versions = store.list_versions(secret.id).await.unwrap();
		assert_eq!(versions.len(), 2);
	}

	#[tokio::test]
	async fn advance_missing_secret_is_not_found() {
		let store = make_store().await;
		let result = store
			.advance_secret(
				SecretId::generate(),
				1,
				fake_value("v2"),
				ChangeType::Updated,
				"test",
			)
			.await;
		assert!(matches!(result, Err(SecretsError::SecretNotFound(_))));
	}

	#[tokio::test]
	async fn delete_appends_tombstone_and_removes_live_row() {
		let store = make_store().await;
		let env = make_environment(&store, "dev").await;
		let secret = make_secret(&store, &env, "API_KEY").await;

		store.delete_secret(secret.id, "test").await.unwrap();

		assert!(store.get_secret(secret.id).await.unwrap().is_none());

		let versions = store.list_versions(secret.id).await.unwrap();
		assert_eq!(versions.len(), 2);
		assert_eq!(versions[0].version, 2);
		assert_eq!(versions[0].change_type, ChangeType::Deleted);
		// The tombstone carries the last known ciphertext.
		assert_eq!(versions[0].value.ciphertext, "v1");
	}

	#[tokio::test]
	async fn delete_missing_secret_is_not_found() {
		let store = make_store().await;
		let result = store.delete_secret(SecretId::generate(), "test").await;
		assert!(matches!(result, Err(SecretsError::SecretNotFound(_))));
	}

	#[tokio::test]
	async fn delete_environment_tombstones_its_secrets() {
		let store = make_store().await;
		let env = make_environment(&store, "dev").await;
		let a = make_secret(&store, &env, "KEY_A").await;
		let b = make_secret(&store, &env, "KEY_B").await;

		store.delete_environment(env.id, "teardown").await.unwrap();

		assert!(store.get_environment(env.id).await.unwrap().is_none());
		assert!(store.get_secret(a.id).await.unwrap().is_none());
		assert!(store.get_secret(b.id).await.unwrap().is_none());

		for id in [a.id, b.id] {
			let versions = store.list_versions(id).await.unwrap();
			assert_eq!(versions.len(), 2);
			assert_eq!(versions[0].change_type, ChangeType::Deleted);
			assert_eq!(versions[0].change_source, "teardown");
		}
	}

	#[tokio::test]
	async fn set_parent_roundtrips() {
		let store = make_store().await;
		let parent = make_environment(&store, "dev").await;
		let child = make_environment(&store, "prod").await;

		let updated = store
			.set_environment_parent(child.id, Some(parent.id))
			.await
			.unwrap();
		assert_eq!(updated.inherits_from, Some(parent.id));

		assert_eq!(store.count_environment_dependents(parent.id).await.unwrap(), 1);

		let cleared = store.set_environment_parent(child.id, None).await.unwrap();
		assert!(cleared.inherits_from.is_none());
	}

	#[tokio::test]
	async fn set_parent_missing_environment_is_not_found() {
		let store = make_store().await;
		let result = store
			.set_environment_parent(EnvironmentId::generate(), None)
			.await;
		assert!(matches!(result, Err(SecretsError::EnvironmentNotFound(_))));
	}

	#[tokio::test]
	async fn get_version_scopes_by_id() {
		let store = make_store().await;
		let env = make_environment(&store, "dev").await;
		let secret = make_secret(&store, &env, "API_KEY").await;

		let versions = store.list_versions(secret.id).await.unwrap();
		let fetched = store.get_version(versions[0].id).await.unwrap().unwrap();
		assert_eq!(fetched.secret_id, secret.id);

		assert!(store
			.get_version(SecretVersionId::generate())
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn list_secrets_for_environments_converts_rows() {
		let store = make_store().await;
		let dev = make_environment(&store, "dev").await;
		let prod = make_environment(&store, "prod").await;
		make_secret(&store, &dev, "SHARED").await;
		make_secret(&store, &prod, "OWN").await;

		let secrets = store
			.list_secrets_for_environments(&[dev.id, prod.id])
			.await
			.unwrap();
		assert_eq!(secrets.len(), 2);

		let none = store.list_secrets_for_environments(&[]).await.unwrap();
		assert!(none.is_empty());
	}
}
