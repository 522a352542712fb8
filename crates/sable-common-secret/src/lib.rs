// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret wrapper type that prevents accidental logging of sensitive values.
//!
//! [`Secret<T>`] holds a sensitive value and renders as `[REDACTED]` through
//! `Debug` and `Display`. The inner value is zeroized on drop and is only
//! reachable through an explicit [`Secret::expose`] call, making every access
//! to the raw value visible in the source.
//!
//! Serialization is intentionally one-way: secrets can be deserialized from
//! configuration, but there is no `Serialize` impl, so a secret can never
//! leave the process through serde by accident.

use std::fmt;

use zeroize::Zeroize;

/// Placeholder emitted wherever a secret would otherwise appear in output.
pub const REDACTED: &str = "[REDACTED]";

/// A sensitive value that must not leak through logs or serialization.
#[derive(Clone)]
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
	/// Wrap a sensitive value.
	pub fn new(value: T) -> Self {
		Self(value)
	}

	/// Access the inner value.
	///
	/// The name is deliberately loud: grep for `expose` to find every place
	/// raw secret material is handled.
	pub fn expose(&self) -> &T {
		&self.0
	}
}

impl<T: Zeroize> Drop for Secret<T> {
	fn drop(&mut self) {
		self.0.zeroize();
	}
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T: Zeroize> fmt::Display for Secret<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T: Zeroize + PartialEq> PartialEq for Secret<T> {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}

impl<T: Zeroize + Eq> Eq for Secret<T> {}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for Secret<T>
where
	T: Zeroize + serde::Deserialize<'de>,
{
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		T::deserialize(deserializer).map(Secret::new)
	}
}

/// The common case: a sensitive string.
pub type SecretString = Secret<String>;

impl SecretString {
	/// Borrow the inner value as a `&str`.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

impl From<&str> for SecretString {
	fn from(value: &str) -> Self {
		Self::new(value.to_string())
	}
}
