// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod error;
pub mod event;
pub mod sink;

pub use error::AuditSinkError;
pub use event::{AuditAction, AuditEvent, AuditEventBuilder};
pub use sink::{AuditSink, NoopAuditSink};

#[cfg(feature = "sink-sqlite")]
pub use sink::sqlite::SqliteAuditSink;

#[cfg(feature = "sink-tracing")]
pub use sink::TracingAuditSink;
