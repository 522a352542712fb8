// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sable Secrets System
//!
//! This crate provides per-project, per-environment secret management:
//!
//! - **Encryption at rest**: AES-256-GCM with a process-wide master key;
//!   tampering is detected on read and fails closed
//! - **Environment inheritance**: a child environment sees its ancestors'
//!   secrets, with child values overriding parents key by key
//! - **Version ledger**: every mutation appends an immutable history entry;
//!   rollback restores earlier content under a brand-new version
//! - **Audit integration**: mutation events for an optional sink
//!
//! # Security Design
//!
//! - Plaintext values only ever travel in [`SecretString`] wrappers
//! - The master key is validated at startup and never logged or serialized
//! - Current-state writes and ledger appends share one transaction
//!
//! [`SecretString`]: sable_common_secret::SecretString

pub mod config;
pub mod encryption;
pub mod error;
pub mod resolver;
pub mod service;
pub mod store;
pub mod types;

pub use config::SecretsConfig;
pub use encryption::{
	encrypt, decrypt, validate_master_key, EncryptedValue, MasterKey, KEY_SIZE, NONCE_SIZE,
	TAG_SIZE,
};
pub use error::{ErrorKind, SecretsError, SecretsResult};
pub use resolver::{
	build_chain, detect_circular_inheritance, resolve_secrets, MAX_INHERITANCE_DEPTH,
};
pub use service::{
	CreateEnvironmentInput, CreateSecretInput, PlaintextSecret, SecretsService,
};
pub use store::{NewEnvironment, NewSecret, SecretStore, SqliteSecretStore};
pub use types::{
	ActorId, ChangeType, Environment, EnvironmentId, ProjectId, ResolvedSecret, Secret, SecretId,
	SecretVersion, SecretVersionId,
};
