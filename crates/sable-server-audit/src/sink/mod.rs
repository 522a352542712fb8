// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit sinks.
//!
//! A sink receives events after the mutation they describe has committed;
//! publishing is fire-and-forget from the caller's perspective and a failing
//! sink must never fail the operation it records.

use async_trait::async_trait;

use crate::error::AuditSinkError;
use crate::event::AuditEvent;

#[cfg(feature = "sink-sqlite")]
pub mod sqlite;

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
	/// Short sink name for diagnostics.
	fn name(&self) -> &str;

	/// Publish one event.
	async fn publish(&self, event: &AuditEvent) -> Result<(), AuditSinkError>;
}

/// Sink that emits events as structured tracing records.
#[cfg(feature = "sink-tracing")]
pub struct TracingAuditSink;

#[cfg(feature = "sink-tracing")]
#[async_trait]
impl AuditSink for TracingAuditSink {
	fn name(&self) -> &str {
		"tracing"
	}

	async fn publish(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
		tracing::info!(
			audit_id = %event.id,
			action = %event.action,
			project_id = %event.project_id,
			environment_id = ?event.environment_id,
			secret_id = ?event.secret_id,
			actor_id = %event.actor_id,
			"audit event"
		);
		Ok(())
	}
}

/// Sink that discards events; used in tests and when auditing is disabled.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
	fn name(&self) -> &str {
		"noop"
	}

	async fn publish(&self, _event: &AuditEvent) -> Result<(), AuditSinkError> {
		Ok(())
	}
}
