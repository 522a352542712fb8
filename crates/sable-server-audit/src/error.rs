// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors a sink can report when publishing an event.
///
/// The distinction matters only to operators reading logs: callers treat the
/// audit channel as fire-and-forget either way.
#[derive(Debug, Error)]
pub enum AuditSinkError {
	/// The event can never be published (e.g., it does not serialize).
	#[error("permanent sink failure: {0}")]
	Permanent(String),

	/// The sink is currently unable to accept events (e.g., storage outage).
	#[error("transient sink failure: {0}")]
	Transient(String),
}
