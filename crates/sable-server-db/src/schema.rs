// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schema bootstrap for the secrets database.
//!
//! All statements are idempotent so the function can run on every startup.

use sqlx::SqlitePool;

use crate::error::Result;

/// Create the secrets tables and indexes if they do not exist.
#[tracing::instrument(skip(pool))]
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS environments (
			id TEXT PRIMARY KEY,
			project_id TEXT NOT NULL,
			name TEXT NOT NULL,
			slug TEXT NOT NULL,
			color TEXT NOT NULL,
			inherits_from TEXT,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE UNIQUE INDEX IF NOT EXISTS idx_environments_project_slug
		ON environments(project_id, slug)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS secrets (
			id TEXT PRIMARY KEY,
			environment_id TEXT NOT NULL REFERENCES environments(id),
			key TEXT NOT NULL,
			encrypted_value TEXT NOT NULL,
			iv TEXT NOT NULL,
			auth_tag TEXT NOT NULL,
			version INTEGER NOT NULL DEFAULT 1,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			UNIQUE(environment_id, key)
		)
		"#,
	)
	.execute(pool)
	.await?;

	// No foreign key to secrets: version rows must outlive the live secret
	// row, which is hard-deleted while its history is retained.
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS secret_versions (
			id TEXT PRIMARY KEY,
			secret_id TEXT NOT NULL,
			version INTEGER NOT NULL,
			encrypted_value TEXT NOT NULL,
			iv TEXT NOT NULL,
			auth_tag TEXT NOT NULL,
			change_type TEXT NOT NULL,
			change_source TEXT NOT NULL,
			created_at TEXT NOT NULL,
			UNIQUE(secret_id, version)
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE INDEX IF NOT EXISTS idx_secret_versions_secret
		ON secret_versions(secret_id, version)
		"#,
	)
	.execute(pool)
	.await?;

	tracing::debug!("secrets schema ensured");
	Ok(())
}
