// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Environment repository for database operations.
//!
//! Environments are project-scoped and carry a nullable `inherits_from`
//! pointer used by the inheritance resolver. The pointer is a plain id
//! column, not a foreign key with cascade semantics: parent deletion is
//! guarded at the service layer, never by the database.

use sqlx::{sqlite::SqlitePool, Row};

use crate::error::{DbError, Result};

/// Stored environment row.
#[derive(Debug, Clone)]
pub struct EnvironmentRow {
	pub id: String,
	pub project_id: String,
	pub name: String,
	pub slug: String,
	pub color: String,
	pub inherits_from: Option<String>,
	pub created_at: String,
	pub updated_at: String,
}

/// Parameters for creating an environment.
#[derive(Debug, Clone)]
pub struct CreateEnvironmentParams {
	pub id: String,
	pub project_id: String,
	pub name: String,
	pub slug: String,
	pub color: String,
	pub inherits_from: Option<String>,
	pub created_at: String,
	pub updated_at: String,
}

/// Repository for environment database operations.
#[derive(Clone)]
pub struct EnvironmentsRepository {
	pool: SqlitePool,
}

impl EnvironmentsRepository {
	/// Create a new environments repository with the given pool.
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert an environment record.
	///
	/// Returns `Err(DbError::Conflict)` if the slug is already taken within
	/// the project.
	#[tracing::instrument(skip(self, params), fields(environment_id = %params.id, slug = %params.slug))]
	pub async fn insert_environment(&self, params: &CreateEnvironmentParams) -> Result<()> {
		let result = sqlx::query(
			r#"
			INSERT INTO environments (id, project_id, name, slug, color, inherits_from, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&params.id)
		.bind(&params.project_id)
		.bind(&params.name)
		.bind(&params.slug)
		.bind(&params.color)
		.bind(&params.inherits_from)
		.bind(&params.created_at)
		.bind(&params.updated_at)
		.execute(&self.pool)
		.await;

		match result {
			Ok(_) => {
				tracing::debug!(environment_id = %params.id, slug = %params.slug, "environment created");
				Ok(())
			}
			Err(e) if is_unique_constraint_error(&e) => Err(DbError::Conflict(format!(
				"environment slug already exists: {}",
				params.slug
			))),
			Err(e) => Err(DbError::Sqlx(e)),
		}
	}

	/// Get an environment by ID.
	#[tracing::instrument(skip(self), fields(environment_id = %id))]
	pub async fn get_environment(&self, id: &str) -> Result<Option<EnvironmentRow>> {
		let row = sqlx::query(
			r#"
			SELECT id, project_id, name, slug, color, inherits_from, created_at, updated_at
			FROM environments
			WHERE id = ?
			"#,
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|row| parse_environment_row(&row)))
	}

	/// List all environments in a project, oldest first.
	#[tracing::instrument(skip(self), fields(project_id = %project_id))]
	pub async fn list_environments_for_project(
		&self,
		project_id: &str,
	) -> Result<Vec<EnvironmentRow>> {
		let rows = sqlx::query(
			r#"
			SELECT id, project_id, name, slug, color, inherits_from, created_at, updated_at
			FROM environments
			WHERE project_id = ?
			ORDER BY created_at ASC, id ASC
			"#,
		)
		.bind(project_id)
		.fetch_all(&self.pool)
		.await?;

		let environments = rows.iter().map(parse_environment_row).collect();
		Ok(environments)
	}

	/// Update an environment's parent pointer.
	///
	/// Returns the number of rows affected (0 if the environment is gone).
	#[tracing::instrument(skip(self), fields(environment_id = %id))]
	pub async fn set_parent(
		&self,
		id: &str,
		inherits_from: Option<&str>,
		updated_at: &str,
	) -> Result<u64> {
		let result = sqlx::query(
			r#"
			UPDATE environments
			SET inherits_from = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(inherits_from)
		.bind(updated_at)
		.bind(id)
		.execute(&self.pool)
		.await?;

		tracing::debug!(environment_id = %id, "environment parent updated");
		Ok(result.rows_affected())
	}

	/// Count environments that name this one as their parent.
	#[tracing::instrument(skip(self), fields(environment_id = %id))]
	pub async fn count_children(&self, id: &str) -> Result<i64> {
		let count: i64 =
			sqlx::query_scalar("SELECT COUNT(*) FROM environments WHERE inherits_from = ?")
				.bind(id)
				.fetch_one(&self.pool)
				.await?;

		Ok(count)
	}

	/// Delete an environment row within a transaction.
	///
	/// Returns the number of rows affected.
	pub async fn delete_environment_in_tx(
		&self,
		tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
		id: &str,
	) -> Result<u64> {
		let result = sqlx::query("DELETE FROM environments WHERE id = ?")
			.bind(id)
			.execute(&mut **tx)
			.await?;

		Ok(result.rows_affected())
	}

	/// Begin a new transaction.
	pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>> {
		Ok(self.pool.begin().await?)
	}
}

fn parse_environment_row(row: &sqlx::sqlite::SqliteRow) -> EnvironmentRow {
	EnvironmentRow {
		id: row.get("id"),
		project_id: row.get("project_id"),
		name: row.get("name"),
		slug: row.get("slug"),
		color: row.get("color"),
		inherits_from: row.get("inherits_from"),
		created_at: row.get("created_at"),
		updated_at: row.get("updated_at"),
	}
}

fn is_unique_constraint_error(e: &sqlx::Error) -> bool {
	if let sqlx::Error::Database(ref db_err) = e {
		return db_err.message().contains("UNIQUE constraint failed");
	}
	false
}
