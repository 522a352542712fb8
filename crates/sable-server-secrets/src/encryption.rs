// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authenticated encryption for secret values.
//!
//! Uses AES-256-GCM with a single process-wide master key. Every value is
//! encrypted with a fresh 96-bit random IV and carries a 128-bit auth tag,
//! so decryption fails closed on any tampering. The ciphertext, IV and tag
//! are returned as three independent base64 strings and are persisted as
//! three separate columns; the tag is never folded into the ciphertext.

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

use sable_common_secret::{SecretString, REDACTED};

use crate::error::{SecretsError, SecretsResult};

/// Size of the master key in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM IV in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// An encrypted secret value: ciphertext, IV and auth tag, each base64.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EncryptedValue {
	pub ciphertext: String,
	pub iv: String,
	pub auth_tag: String,
}

/// The process-wide master key.
///
/// Decoded and validated once at startup, then cached for the process
/// lifetime. Read-only after construction, so concurrent use needs no
/// synchronization. Never logged or serialized.
pub struct MasterKey(Zeroizing<[u8; KEY_SIZE]>);

impl MasterKey {
	/// Decode a base64-encoded master key and validate its length.
	///
	/// A wrong-length key is rejected outright rather than truncated or
	/// padded; callers treat this as fatal at startup.
	pub fn from_base64(encoded: &str) -> SecretsResult<Self> {
		let decoded = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|e| {
			SecretsError::Configuration(format!("master key is not valid base64: {e}"))
		})?);

		if decoded.len() != KEY_SIZE {
			return Err(SecretsError::InvalidKeySize {
				expected: KEY_SIZE,
				actual: decoded.len(),
			});
		}

		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		key.copy_from_slice(&decoded);
		Ok(Self(key))
	}

	/// Generate a random master key (setup tooling and tests).
	pub fn generate() -> Self {
		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		OsRng.fill_bytes(key.as_mut());
		Self(key)
	}

	fn as_bytes(&self) -> &[u8; KEY_SIZE] {
		&self.0
	}
}

impl fmt::Debug for MasterKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("MasterKey").field(&REDACTED).finish()
	}
}

/// Check whether a candidate string decodes to a valid 32-byte key.
///
/// Used by setup and health tooling; only the decoded length is checked.
pub fn validate_master_key(candidate: &str) -> bool {
	STANDARD
		.decode(candidate.trim())
		.map(|decoded| decoded.len() == KEY_SIZE)
		.unwrap_or(false)
}

/// Generate a random IV.
///
/// Uses 96-bit random IVs from OsRng. The same (key, IV) pair must never be
/// reused; AES-GCM has a 2^-32 collision probability after approximately
/// 2^32 encryptions with the same key - well beyond expected usage patterns.
/// If encryption volumes grow very large under a single key, consider a
/// counter-based scheme.
fn generate_iv() -> [u8; NONCE_SIZE] {
	let mut iv = [0u8; NONCE_SIZE];
	OsRng.fill_bytes(&mut iv);
	iv
}

/// Encrypt a plaintext value with the master key.
pub fn encrypt(master_key: &MasterKey, plaintext: &str) -> SecretsResult<EncryptedValue> {
	let key = Key::<Aes256Gcm>::from_slice(master_key.as_bytes());
	let cipher = Aes256Gcm::new(key);

	let iv_bytes = generate_iv();
	let nonce = Nonce::from_slice(&iv_bytes);

	let combined = cipher
		.encrypt(nonce, plaintext.as_bytes())
		.map_err(|e| SecretsError::Encryption(format!("value encryption failed: {e}")))?;

	// aes-gcm appends the tag to the ciphertext; split it back out so the
	// three fields are stored independently.
	let split = combined.len() - TAG_SIZE;
	let (body, tag) = combined.split_at(split);

	Ok(EncryptedValue {
		ciphertext: STANDARD.encode(body),
		iv: STANDARD.encode(iv_bytes),
		auth_tag: STANDARD.encode(tag),
	})
}

/// Decrypt an encrypted value with the master key.
///
/// Fails with [`SecretsError::AuthenticationFailed`] when the tag does not
/// verify: tampered ciphertext, a flipped IV, a corrupted tag, or the wrong
/// key all land here. Malformed encodings and wrong field lengths are
/// rejected before the cipher runs, also as crypto-kind errors.
pub fn decrypt(master_key: &MasterKey, value: &EncryptedValue) -> SecretsResult<SecretString> {
	let body = STANDARD
		.decode(&value.ciphertext)
		.map_err(|e| SecretsError::Decryption(format!("ciphertext is not valid base64: {e}")))?;
	let iv = STANDARD
		.decode(&value.iv)
		.map_err(|e| SecretsError::Decryption(format!("IV is not valid base64: {e}")))?;
	let tag = STANDARD
		.decode(&value.auth_tag)
		.map_err(|e| SecretsError::Decryption(format!("auth tag is not valid base64: {e}")))?;

	if iv.len() != NONCE_SIZE {
		return Err(SecretsError::InvalidIv(format!(
			"expected {NONCE_SIZE}-byte IV, got {} bytes",
			iv.len()
		)));
	}
	if tag.len() != TAG_SIZE {
		return Err(SecretsError::InvalidTag(format!(
			"expected {TAG_SIZE}-byte auth tag, got {} bytes",
			tag.len()
		)));
	}

	let key = Key::<Aes256Gcm>::from_slice(master_key.as_bytes());
	let cipher = Aes256Gcm::new(key);
	let nonce = Nonce::from_slice(&iv);

	let mut combined = Vec::with_capacity(body.len() + TAG_SIZE);
	combined.extend_from_slice(&body);
	combined.extend_from_slice(&tag);

	let plaintext = cipher
		.decrypt(nonce, combined.as_slice())
		.map_err(|_| SecretsError::AuthenticationFailed)?;

	let text = String::from_utf8(plaintext)
		.map_err(|e| SecretsError::Decryption(format!("decrypted value is not valid UTF-8: {e}")))?;

	Ok(SecretString::new(text))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ErrorKind;
	use proptest::prelude::*;

	fn flip_bit(encoded: &str, bit: usize) -> String {
		let mut bytes = STANDARD.decode(encoded).unwrap();
		let idx = (bit / 8) % bytes.len();
		bytes[idx] ^= 1 << (bit % 8);
		STANDARD.encode(bytes)
	}

	#[test]
	fn roundtrip_preserves_plaintext() {
		let key = MasterKey::generate();
		let encrypted = encrypt(&key, "super secret value").unwrap();
		let decrypted = decrypt(&key, &encrypted).unwrap();
		assert_eq!(decrypted.expose(), "super secret value");
	}

	#[test]
	fn roundtrip_empty_plaintext() {
		let key = MasterKey::generate();
		let encrypted = encrypt(&key, "").unwrap();
		let decrypted = decrypt(&key, &encrypted).unwrap();
		assert_eq!(decrypted.expose(), "");
	}

	#[test]
	fn fields_are_separate_base64() {
		let key = MasterKey::generate();
		let encrypted = encrypt(&key, "value").unwrap();
		assert_eq!(STANDARD.decode(&encrypted.iv).unwrap().len(), NONCE_SIZE);
		assert_eq!(STANDARD.decode(&encrypted.auth_tag).unwrap().len(), TAG_SIZE);
		// The tag lives in its own field, not appended to the ciphertext.
		assert_eq!(
			STANDARD.decode(&encrypted.ciphertext).unwrap().len(),
			"value".len()
		);
	}

	#[test]
	fn wrong_key_fails_authentication() {
		let key1 = MasterKey::generate();
		let key2 = MasterKey::generate();
		let encrypted = encrypt(&key1, "secret").unwrap();

		let result = decrypt(&key2, &encrypted);
		assert!(matches!(result, Err(SecretsError::AuthenticationFailed)));
	}

	#[test]
	fn tampered_ciphertext_fails_authentication() {
		let key = MasterKey::generate();
		let mut encrypted = encrypt(&key, "secret").unwrap();
		encrypted.ciphertext = flip_bit(&encrypted.ciphertext, 0);

		let result = decrypt(&key, &encrypted);
		assert!(matches!(result, Err(SecretsError::AuthenticationFailed)));
	}

	#[test]
	fn tampered_iv_fails_authentication() {
		let key = MasterKey::generate();
		let mut encrypted = encrypt(&key, "secret").unwrap();
		encrypted.iv = flip_bit(&encrypted.iv, 3);

		let result = decrypt(&key, &encrypted);
		assert!(matches!(result, Err(SecretsError::AuthenticationFailed)));
	}

	#[test]
	fn tampered_tag_fails_authentication() {
		let key = MasterKey::generate();
		let mut encrypted = encrypt(&key, "secret").unwrap();
		encrypted.auth_tag = flip_bit(&encrypted.auth_tag, 17);

		let result = decrypt(&key, &encrypted);
		assert!(matches!(result, Err(SecretsError::AuthenticationFailed)));
	}

	#[test]
	fn truncated_iv_is_rejected_before_decryption() {
		let key = MasterKey::generate();
		let mut encrypted = encrypt(&key, "secret").unwrap();
		encrypted.iv = STANDARD.encode([0u8; 8]);

		let result = decrypt(&key, &encrypted);
		assert!(matches!(result, Err(SecretsError::InvalidIv(_))));
		assert_eq!(result.unwrap_err().kind(), ErrorKind::Crypto);
	}

	#[test]
	fn truncated_tag_is_rejected_before_decryption() {
		let key = MasterKey::generate();
		let mut encrypted = encrypt(&key, "secret").unwrap();
		encrypted.auth_tag = STANDARD.encode([0u8; 4]);

		let result = decrypt(&key, &encrypted);
		assert!(matches!(result, Err(SecretsError::InvalidTag(_))));
	}

	#[test]
	fn garbage_base64_is_a_crypto_error() {
		let key = MasterKey::generate();
		let mut encrypted = encrypt(&key, "secret").unwrap();
		encrypted.ciphertext = "not base64!!!".to_string();

		let result = decrypt(&key, &encrypted);
		assert_eq!(result.unwrap_err().kind(), ErrorKind::Crypto);
	}

	#[test]
	fn master_key_from_base64_accepts_32_bytes() {
		let encoded = STANDARD.encode([7u8; KEY_SIZE]);
		assert!(MasterKey::from_base64(&encoded).is_ok());
		// Surrounding whitespace (e.g., from a key file) is tolerated.
		assert!(MasterKey::from_base64(&format!("{encoded}\n")).is_ok());
	}

	#[test]
	fn master_key_from_base64_rejects_wrong_length() {
		let encoded = STANDARD.encode([7u8; 16]);
		let result = MasterKey::from_base64(&encoded);
		assert!(matches!(
			result,
			Err(SecretsError::InvalidKeySize {
				expected: KEY_SIZE,
				actual: 16
			})
		));
	}

	#[test]
	fn master_key_from_base64_rejects_garbage() {
		let result = MasterKey::from_base64("!!definitely not base64!!");
		assert!(matches!(result, Err(SecretsError::Configuration(_))));
	}

	#[test]
	fn validate_master_key_checks_decoded_length() {
		assert!(validate_master_key(&STANDARD.encode([0u8; KEY_SIZE])));
		assert!(!validate_master_key(&STANDARD.encode([0u8; 31])));
		assert!(!validate_master_key(&STANDARD.encode([0u8; 33])));
		assert!(!validate_master_key("not base64"));
	}

	#[test]
	fn master_key_debug_is_redacted() {
		let key = MasterKey::generate();
		let debug = format!("{key:?}");
		assert!(debug.contains(REDACTED));
	}

	proptest! {
		#[test]
		fn prop_roundtrip(plaintext in ".*") {
			let key = MasterKey::generate();
			let encrypted = encrypt(&key, &plaintext).unwrap();
			let decrypted = decrypt(&key, &encrypted).unwrap();
			prop_assert_eq!(decrypted.expose(), &plaintext);
		}

		#[test]
		fn prop_different_encryptions_differ(plaintext in ".+") {
			let key = MasterKey::generate();
			let first = encrypt(&key, &plaintext).unwrap();
			let second = encrypt(&key, &plaintext).unwrap();
			prop_assert_ne!(&first.iv, &second.iv);
			prop_assert_ne!(&first.ciphertext, &second.ciphertext);
		}

		#[test]
		fn prop_bit_flips_never_yield_plaintext(
			plaintext in ".+",
			field in 0usize..3,
			bit in 0usize..256,
		) {
			let key = MasterKey::generate();
			let mut encrypted = encrypt(&key, &plaintext).unwrap();
			match field {
				0 => encrypted.ciphertext = flip_bit(&encrypted.ciphertext, bit),
				1 => encrypted.iv = flip_bit(&encrypted.iv, bit),
				_ => encrypted.auth_tag = flip_bit(&encrypted.auth_tag, bit),
			}

			let result = decrypt(&key, &encrypted);
			prop_assert!(matches!(result, Err(SecretsError::AuthenticationFailed)));
		}
	}
}
