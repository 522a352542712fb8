// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer for the Sable server.
//!
//! SQLite-backed repositories for environments, secrets, and the append-only
//! secret version ledger. Rows cross this boundary as plain strings and
//! integers; typed ids and domain enums live one layer up.

pub mod environment;
pub mod error;
pub mod pool;
pub mod schema;
pub mod secret;

pub use environment::{CreateEnvironmentParams, EnvironmentRow, EnvironmentsRepository};
pub use error::{DbError, Result};
pub use pool::create_pool;
pub use schema::ensure_schema;
pub use secret::{
	CreateSecretParams, CreateVersionParams, SecretRow, SecretVersionRow, SecretsRepository,
};
