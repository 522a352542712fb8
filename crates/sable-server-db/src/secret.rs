// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secrets repository for database operations.
//!
//! This module provides database access for secrets management including:
//! - Current-state secret rows (ciphertext triple + version)
//! - The append-only version ledger
//! - In-transaction helpers so callers can group the current-state write and
//!   the ledger append atomically
//!
//! The ciphertext, IV and auth tag are stored as three separate base64 TEXT
//! columns; this layer never inspects or combines them.

use sqlx::{sqlite::SqlitePool, Row};

use crate::error::{DbError, Result};

/// Stored secret row (current state).
#[derive(Debug, Clone)]
pub struct SecretRow {
	pub id: String,
	pub environment_id: String,
	pub key: String,
	pub encrypted_value: String,
	pub iv: String,
	pub auth_tag: String,
	pub version: i64,
	pub created_at: String,
	pub updated_at: String,
}

/// Stored secret version row (ledger entry).
#[derive(Debug, Clone)]
pub struct SecretVersionRow {
	pub id: String,
	pub secret_id: String,
	pub version: i64,
	pub encrypted_value: String,
	pub iv: String,
	pub auth_tag: String,
	pub change_type: String,
	pub change_source: String,
	pub created_at: String,
}

/// Parameters for creating a secret row.
#[derive(Debug, Clone)]
pub struct CreateSecretParams {
	pub id: String,
	pub environment_id: String,
	pub key: String,
	pub encrypted_value: String,
	pub iv: String,
	pub auth_tag: String,
	pub created_at: String,
	pub updated_at: String,
}

/// Parameters for appending a version ledger row.
#[derive(Debug, Clone)]
pub struct CreateVersionParams {
	pub id: String,
	pub secret_id: String,
	pub version: i64,
	pub encrypted_value: String,
	pub iv: String,
	pub auth_tag: String,
	pub change_type: String,
	pub change_source: String,
	pub created_at: String,
}

/// Repository for secrets database operations.
#[derive(Clone)]
pub struct SecretsRepository {
	pool: SqlitePool,
}

impl SecretsRepository {
	/// Create a new secrets repository with the given pool.
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Begin a new transaction.
	pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>> {
		Ok(self.pool.begin().await?)
	}

	/// Insert a secret row at version 1 within a transaction.
	///
	/// Returns `Err(DbError::Conflict)` if the key is already taken within
	/// the environment.
	pub async fn insert_secret_in_tx(
		&self,
		tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
		params: &CreateSecretParams,
	) -> Result<()> {
		let result = sqlx::query(
			r#"
			INSERT INTO secrets (id, environment_id, key, encrypted_value, iv, auth_tag, version, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
			"#,
		)
		.bind(&params.id)
		.bind(&params.environment_id)
		.bind(&params.key)
		.bind(&params.encrypted_value)
		.bind(&params.iv)
		.bind(&params.auth_tag)
		.bind(&params.created_at)
		.bind(&params.updated_at)
		.execute(&mut **tx)
		.await;

		match result {
			Ok(_) => {
				tracing::debug!(secret_id = %params.id, key = %params.key, "secret created");
				Ok(())
			}
			Err(e) if is_unique_constraint_error(&e) => Err(DbError::Conflict(format!(
				"secret key already exists: {}",
				params.key
			))),
			Err(e) => Err(DbError::Sqlx(e)),
		}
	}

	/// Append a version ledger row within a transaction.
	pub async fn insert_version_in_tx(
		&self,
		tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
		params: &CreateVersionParams,
	) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO secret_versions (id, secret_id, version, encrypted_value, iv, auth_tag, change_type, change_source, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&params.id)
		.bind(&params.secret_id)
		.bind(params.version)
		.bind(&params.encrypted_value)
		.bind(&params.iv)
		.bind(&params.auth_tag)
		.bind(&params.change_type)
		.bind(&params.change_source)
		.bind(&params.created_at)
		.execute(&mut **tx)
		.await?;

		tracing::debug!(
			version_id = %params.id,
			secret_id = %params.secret_id,
			version = params.version,
			change_type = %params.change_type,
			"secret version appended"
		);
		Ok(())
	}

	/// Replace a secret's current ciphertext and bump its version, guarded by
	/// a compare-and-swap on the expected version.
	///
	/// Returns the number of rows affected: 0 means either the secret is gone
	/// or another writer advanced the version first.
	pub async fn update_current_in_tx(
		&self,
		tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
		secret_id: &str,
		expected_version: i64,
		encrypted_value: &str,
		iv: &str,
		auth_tag: &str,
		new_version: i64,
		updated_at: &str,
	) -> Result<u64> {
		let result = sqlx::query(
			r#"
			UPDATE secrets
			SET encrypted_value = ?, iv = ?, auth_tag = ?, version = ?, updated_at = ?
			WHERE id = ? AND version = ?
			"#,
		)
		.bind(encrypted_value)
		.bind(iv)
		.bind(auth_tag)
		.bind(new_version)
		.bind(updated_at)
		.bind(secret_id)
		.bind(expected_version)
		.execute(&mut **tx)
		.await?;

		Ok(result.rows_affected())
	}

	/// Delete a secret's live row within a transaction.
	///
	/// The caller is responsible for appending the final `deleted` ledger row
	/// in the same transaction; history is never removed here.
	pub async fn delete_secret_in_tx(
		&self,
		tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
		secret_id: &str,
	) -> Result<u64> {
		let result = sqlx::query("DELETE FROM secrets WHERE id = ?")
			.bind(secret_id)
			.execute(&mut **tx)
			.await?;

		Ok(result.rows_affected())
	}

	/// Get a secret by ID within a transaction.
	pub async fn get_secret_in_tx(
		&self,
		tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
		id: &str,
	) -> Result<Option<SecretRow>> {
		let row = sqlx::query(
			r#"
			SELECT id, environment_id, key, encrypted_value, iv, auth_tag, version, created_at, updated_at
			FROM secrets
			WHERE id = ?
			"#,
		)
		.bind(id)
		.fetch_optional(&mut **tx)
		.await?;

		Ok(row.map(|row| parse_secret_row(&row)))
	}

	/// Get a secret by ID.
	#[tracing::instrument(skip(self), fields(secret_id = %id))]
	pub async fn get_secret(&self, id: &str) -> Result<Option<SecretRow>> {
		let row = sqlx::query(
			r#"
			SELECT id, environment_id, key, encrypted_value, iv, auth_tag, version, created_at, updated_at
			FROM secrets
			WHERE id = ?
			"#,
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|row| parse_secret_row(&row)))
	}

	/// Get a secret by key within an environment.
	#[tracing::instrument(skip(self), fields(environment_id = %environment_id, key = %key))]
	pub async fn get_secret_by_key(
		&self,
		environment_id: &str,
		key: &str,
	) -> Result<Option<SecretRow>> {
		let row = sqlx::query(
			r#"
			SELECT id, environment_id, key, encrypted_value, iv, auth_tag, version, created_at, updated_at
			FROM secrets
			WHERE environment_id = ? AND key = ?
			"#,
		)
		.bind(environment_id)
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|row| parse_secret_row(&row)))
	}

	/// List all secrets owned by any of the given environments.
	///
	/// Used by the inheritance resolver to fetch every contributing
	/// environment's secrets in one query.
	#[tracing::instrument(skip(self, environment_ids), fields(count = environment_ids.len()))]
	pub async fn list_secrets_for_environments(
		&self,
		environment_ids: &[String],
	) -> Result<Vec<SecretRow>> {
		if environment_ids.is_empty() {
			return Ok(Vec::new());
		}

		let placeholders = vec!["?"; environment_ids.len()].join(", ");
		let query = format!(
			r#"
			SELECT id, environment_id, key, encrypted_value, iv, auth_tag, version, created_at, updated_at
			FROM secrets
			WHERE environment_id IN ({placeholders})
			ORDER BY key ASC
			"#,
		);

		let mut q = sqlx::query(&query);
		for id in environment_ids {
			q = q.bind(id);
		}

		let rows = q.fetch_all(&self.pool).await?;
		let secrets = rows.iter().map(parse_secret_row).collect();
		Ok(secrets)
	}

	/// Get a version ledger row by ID.
	#[tracing::instrument(skip(self), fields(version_id = %id))]
	pub async fn get_version_by_id(&self, id: &str) -> Result<Option<SecretVersionRow>> {
		let row = sqlx::query(
			r#"
			SELECT id, secret_id, version, encrypted_value, iv, auth_tag, change_type, change_source, created_at
			FROM secret_versions
			WHERE id = ?
			"#,
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|row| parse_version_row(&row)))
	}

	/// List all version ledger rows for a secret, newest first.
	#[tracing::instrument(skip(self), fields(secret_id = %secret_id))]
	pub async fn list_versions(&self, secret_id: &str) -> Result<Vec<SecretVersionRow>> {
		let rows = sqlx::query(
			r#"
			SELECT id, secret_id, version, encrypted_value, iv, auth_tag, change_type, change_source, created_at
			FROM secret_versions
			WHERE secret_id = ?
			ORDER BY version DESC
			"#,
		)
		.bind(secret_id)
		.fetch_all(&self.pool)
		.await?;

		let versions = rows.iter().map(parse_version_row).collect();
		Ok(versions)
	}
}

fn parse_secret_row(row: &sqlx::sqlite::SqliteRow) -> SecretRow {
	SecretRow {
		id: row.get("id"),
		environment_id: row.get("environment_id"),
		key: row.get("key"),
		encrypted_value: row.get("encrypted_value"),
		iv: row.get("iv"),
		auth_tag: row.get("auth_tag"),
		version: row.get("version"),
		created_at: row.get("created_at"),
		updated_at: row.get("updated_at"),
	}
}

fn parse_version_row(row: &sqlx::sqlite::SqliteRow) -> SecretVersionRow {
	SecretVersionRow {
		id: row.get("id"),
		secret_id: row.get("secret_id"),
		version: row.get("version"),
		encrypted_value: row.get("encrypted_value"),
		iv: row.get("iv"),
		auth_tag: row.get("auth_tag"),
		change_type: row.get("change_type"),
		change_source: row.get("change_source"),
		created_at: row.get("created_at"),
	}
}

fn is_unique_constraint_error(e: &sqlx::Error) -> bool {
	if let sqlx::Error::Database(ref db_err) = e {
		return db_err.message().contains("UNIQUE constraint failed");
	}
	false
}
