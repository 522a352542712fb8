// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::error::AuditSinkError;
use crate::event::AuditEvent;
use crate::sink::AuditSink;

/// Sink that appends events to an `audit_events` table.
pub struct SqliteAuditSink {
	pool: SqlitePool,
	name: String,
}

impl SqliteAuditSink {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool,
			name: "sqlite".to_string(),
		}
	}

	/// Create the audit table if it does not exist.
	pub async fn ensure_schema(&self) -> Result<(), AuditSinkError> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS audit_events (
				id TEXT PRIMARY KEY,
				action TEXT NOT NULL,
				project_id TEXT NOT NULL,
				environment_id TEXT,
				secret_id TEXT,
				actor_id TEXT NOT NULL,
				metadata TEXT NOT NULL,
				created_at TEXT NOT NULL
			)
			"#,
		)
		.execute(&self.pool)
		.await
		.map_err(|e| AuditSinkError::Transient(format!("failed to create audit table: {e}")))?;

		Ok(())
	}
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
	fn name(&self) -> &str {
		&self.name
	}

	async fn publish(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
		let metadata_json = serde_json::to_string(&event.metadata)
			.map_err(|e| AuditSinkError::Permanent(format!("failed to serialize metadata: {e}")))?;

		sqlx::query(
			r#"
			INSERT INTO audit_events (id, action, project_id, environment_id, secret_id, actor_id, metadata, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(event.id.to_string())
		.bind(event.action.as_str())
		.bind(event.project_id.to_string())
		.bind(event.environment_id.map(|id| id.to_string()))
		.bind(event.secret_id.map(|id| id.to_string()))
		.bind(event.actor_id.to_string())
		.bind(&metadata_json)
		.bind(event.created_at.to_rfc3339())
		.execute(&self.pool)
		.await
		.map_err(|e| AuditSinkError::Transient(format!("failed to insert audit event: {e}")))?;

		tracing::debug!(audit_id = %event.id, action = %event.action, "audit event persisted");
		Ok(())
	}
}
