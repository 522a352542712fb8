// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the secrets system.
//!
//! The master key is loaded and validated once at process start. A missing
//! or malformed key is a fatal startup error; the service must never fall
//! back to encrypting with a truncated or garbage key.

use std::path::PathBuf;
use std::sync::Arc;

use sable_common_secret::SecretString;
use tracing::instrument;

use crate::encryption::MasterKey;
use crate::error::{SecretsError, SecretsResult};

/// Environment variable holding the base64-encoded 32-byte master key.
const MASTER_KEY_ENV: &str = "SABLE_SECRETS_MASTER_KEY";

/// Configuration for the secrets system.
#[derive(Clone)]
pub struct SecretsConfig {
	/// Master key for value encryption, decoded and validated at load time.
	master_key: Arc<MasterKey>,
}

impl SecretsConfig {
	/// Create a configuration from an already-validated master key.
	pub fn new(master_key: MasterKey) -> Self {
		Self {
			master_key: Arc::new(master_key),
		}
	}

	/// Load configuration from environment variables.
	///
	/// Environment variables:
	/// - `SABLE_SECRETS_MASTER_KEY` - Master key (base64, 32 bytes decoded)
	/// - `SABLE_SECRETS_MASTER_KEY_FILE` - Path to file containing the key
	#[instrument(skip_all)]
	pub fn from_env() -> SecretsResult<Self> {
		let encoded = load_secret_from_env(MASTER_KEY_ENV)?
			.ok_or(SecretsError::MasterKeyNotConfigured)?;

		let master_key = MasterKey::from_base64(encoded.expose())?;
		Ok(Self::new(master_key))
	}

	/// Get the cached master key.
	pub fn master_key(&self) -> &Arc<MasterKey> {
		&self.master_key
	}
}

impl std::fmt::Debug for SecretsConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SecretsConfig")
			.field("master_key", &"[REDACTED]")
			.finish()
	}
}

/// Load a secret from environment, with support for _FILE suffix.
///
/// Checks for:
/// 1. `{prefix}` - Direct value
/// 2. `{prefix}_FILE` - Path to file containing value
fn load_secret_from_env(prefix: &str) -> SecretsResult<Option<SecretString>> {
	// Try direct value first
	if let Ok(value) = std::env::var(prefix) {
		if !value.is_empty() {
			return Ok(Some(SecretString::new(value)));
		}
	}

	// Try _FILE variant
	let file_var = format!("{prefix}_FILE");
	if let Ok(path_str) = std::env::var(&file_var) {
		let path = PathBuf::from(&path_str);
		if path.exists() {
			let content = std::fs::read_to_string(&path).map_err(|e| {
				SecretsError::Configuration(format!("failed to read {file_var} from {path_str}: {e}"))
			})?;
			return Ok(Some(SecretString::new(content.trim().to_string())));
		} else {
			return Err(SecretsError::Configuration(format!(
				"file specified in {file_var} does not exist: {path_str}"
			)));
		}
	}

	Ok(None)
}
