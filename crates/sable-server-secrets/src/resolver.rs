// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Environment inheritance resolution.
//!
//! Pure functions over snapshots of environment and secret metadata: no
//! locks, no I/O, no decryption. The resolver only ever sees ciphertext, so
//! it can be tested with synthetic values and called concurrently without
//! restriction.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::types::{Environment, EnvironmentId, ResolvedSecret, Secret};

/// Maximum number of environments in an inheritance chain.
pub const MAX_INHERITANCE_DEPTH: usize = 10;

/// Build the ancestor chain for an environment.
///
/// Walks `inherits_from` starting at `env_id`; the result is ordered from
/// the environment itself (index 0) to its most distant ancestor. The walk
/// stops at a null parent, at `max_depth` entries, when an id repeats, or
/// when an ancestor is absent from the snapshot (a chain broken by a
/// concurrent deletion truncates silently rather than erroring).
///
/// The repeated-id break is a defensive backstop for data that became
/// inconsistent through some other path; the authoritative cycle guard is
/// [`detect_circular_inheritance`], which runs before any parent pointer is
/// written. Both checks stay.
pub fn build_chain(
	env_id: EnvironmentId,
	environments: &[Environment],
	max_depth: usize,
) -> Vec<EnvironmentId> {
	let by_id: HashMap<EnvironmentId, &Environment> =
		environments.iter().map(|env| (env.id, env)).collect();

	let mut chain = Vec::new();
	let mut seen = HashSet::new();
	let mut current = Some(env_id);

	while let Some(id) = current {
		if chain.len() >= max_depth {
			break;
		}
		if !seen.insert(id) {
			break;
		}
		let Some(env) = by_id.get(&id) else {
			break;
		};
		chain.push(id);
		current = env.inherits_from;
	}

	chain
}

/// Check whether making `proposed_parent_id` the parent of `env_id` would
/// close a cycle.
///
/// Must be called before persisting any parent-pointer mutation; this is the
/// authoritative guard, evaluated against the supplied snapshot.
pub fn detect_circular_inheritance(
	env_id: EnvironmentId,
	proposed_parent_id: EnvironmentId,
	environments: &[Environment],
) -> bool {
	if env_id == proposed_parent_id {
		return true;
	}

	build_chain(proposed_parent_id, environments, MAX_INHERITANCE_DEPTH).contains(&env_id)
}

/// Compute the merged, override-aware set of secrets visible from an
/// environment.
///
/// The chain is walked from the most distant ancestor down to the
/// environment itself, inserting each secret into a key-ordered map. Walking
/// root-to-leaf means a child's own secret for a key always overwrites
/// whatever an ancestor contributed for it. Output is sorted by key.
pub fn resolve_secrets(
	env_id: EnvironmentId,
	environments: &[Environment],
	secrets: &[Secret],
) -> Vec<ResolvedSecret> {
	let chain = build_chain(env_id, environments, MAX_INHERITANCE_DEPTH);

	let names: HashMap<EnvironmentId, &str> = environments
		.iter()
		.map(|env| (env.id, env.name.as_str()))
		.collect();

	let mut by_environment: HashMap<EnvironmentId, Vec<&Secret>> = HashMap::new();
	for secret in secrets {
		by_environment
			.entry(secret.environment_id)
			.or_default()
			.push(secret);
	}

	let mut merged: BTreeMap<&str, ResolvedSecret> = BTreeMap::new();
	for &contributor in chain.iter().rev() {
		let Some(contributed) = by_environment.get(&contributor) else {
			continue;
		};
		for secret in contributed {
			merged.insert(
				secret.key.as_str(),
				ResolvedSecret {
					id: secret.id,
					key: secret.key.clone(),
					value: secret.value.clone(),
					version: secret.version,
					environment_id: secret.environment_id,
					inherited: contributor != env_id,
					source_environment_id: contributor,
					source_environment_name: names
						.get(&contributor)
						.map(|name| name.to_string())
						.unwrap_or_default(),
				},
			);
		}
	}

	merged.into_values().collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::encryption::EncryptedValue;
	use crate::types::{ProjectId, SecretId};
	use chrono::Utc;

	fn make_environment(name: &str, inherits_from: Option<EnvironmentId>) -> Environment {
		let now = Utc::now();
		Environment {
			id: EnvironmentId::generate(),
			project_id: ProjectId::new(uuid::Uuid::from_u128(1)),
			name: name.to_string(),
			slug: name.to_lowercase(),
			color: "#6366f1".to_string(),
			inherits_from,
			created_at: now,
			updated_at: now,
		}
	}

	fn make_secret(env: &Environment, key: &str, marker: &str) -> Secret {
		let now = Utc::now();
		Secret {
			id: SecretId::generate(),
			environment_id: env.id,
			key: key.to_string(),
			value: EncryptedValue {
				// The resolver never decrypts; any opaque strings will do.
				ciphertext: marker.to_string(),
				iv: "aXY=".to_string(),
				auth_tag: "dGFn".to_string(),
			},
			version: 1,
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn chain_without_parent_is_self_only() {
		let env = make_environment("dev", None);
		let chain = build_chain(env.id, &[env.clone()], MAX_INHERITANCE_DEPTH);
		assert_eq!(chain, vec![env.id]);
	}

	#[test]
	fn chain_orders_self_to_root() {
		let root = make_environment("dev", None);
		let middle = make_environment("staging", Some(root.id));
		let leaf = make_environment("prod", Some(middle.id));
		let envs = vec![root.clone(), middle.clone(), leaf.clone()];

		let chain = build_chain(leaf.id, &envs, MAX_INHERITANCE_DEPTH);
		assert_eq!(chain, vec![leaf.id, middle.id, root.id]);
	}

	#[test]
	fn chain_is_capped_at_max_depth() {
		// 15 nested environments; only the first 10 resolve.
		let mut envs: Vec<Environment> = Vec::new();
		let mut parent = None;
		for i in 0..15 {
			let env = make_environment(&format!("env{i}"), parent);
			parent = Some(env.id);
			envs.push(env);
		}

		let leaf_id = envs.last().unwrap().id;
		let chain = build_chain(leaf_id, &envs, MAX_INHERITANCE_DEPTH);
		assert_eq!(chain.len(), MAX_INHERITANCE_DEPTH);
		assert_eq!(chain[0], leaf_id);
	}

	#[test]
	fn chain_breaks_on_cycle_without_panicking() {
		// a -> b -> a, as if two concurrent reparents both passed validation.
		let mut a = make_environment("a", None);
		let b = make_environment("b", Some(a.id));
		a.inherits_from = Some(b.id);
		let envs = vec![a.clone(), b.clone()];

		let chain = build_chain(a.id, &envs, MAX_INHERITANCE_DEPTH);
		assert_eq!(chain, vec![a.id, b.id]);
	}

	#[test]
	fn chain_truncates_at_missing_ancestor() {
		let ghost = EnvironmentId::generate();
		let middle = make_environment("staging", Some(ghost));
		let leaf = make_environment("prod", Some(middle.id));
		let envs = vec![middle.clone(), leaf.clone()];

		let chain = build_chain(leaf.id, &envs, MAX_INHERITANCE_DEPTH);
		assert_eq!(chain, vec![leaf.id, middle.id]);
	}

	#[test]
	fn detects_self_inheritance() {
		let env = make_environment("dev", None);
		assert!(detect_circular_inheritance(env.id, env.id, &[env.clone()]));
	}

	#[test]
	fn detects_transitive_cycle() {
		let a = make_environment("a", None);
		let b = make_environment("b", Some(a.id));
		let c = make_environment("c", Some(b.id));
		let envs = vec![a.clone(), b.clone(), c.clone()];

		// c transitively inherits from a, so a may not adopt c as parent.
		assert!(detect_circular_inheritance(a.id, c.id, &envs));
		// The other direction is fine: b -> a contains no cycle through c.
		assert!(!detect_circular_inheritance(c.id, a.id, &envs));
	}

	#[test]
	fn resolves_own_secrets_only_without_parent() {
		let env = make_environment("dev", None);
		let secrets = vec![
			make_secret(&env, "LOG_LEVEL", "debug"),
			make_secret(&env, "API_KEY", "abc"),
		];

		let resolved = resolve_secrets(env.id, &[env.clone()], &secrets);
		assert_eq!(resolved.len(), 2);
		assert!(resolved.iter().all(|r| !r.inherited));
		assert!(resolved.iter().all(|r| r.source_environment_id == env.id));
	}

	#[test]
	fn child_overrides_parent_for_same_key() {
		let parent = make_environment("dev", None);
		let child = make_environment("prod", Some(parent.id));
		let envs = vec![parent.clone(), child.clone()];
		let secrets = vec![
			make_secret(&parent, "LOG_LEVEL", "debug"),
			make_secret(&child, "LOG_LEVEL", "info"),
		];

		let resolved = resolve_secrets(child.id, &envs, &secrets);
		assert_eq!(resolved.len(), 1);
		let entry = &resolved[0];
		assert_eq!(entry.value.ciphertext, "info");
		assert!(!entry.inherited);
		assert_eq!(entry.source_environment_id, child.id);
	}

	#[test]
	fn inherited_secret_carries_source_attribution() {
		let parent = make_environment("dev", None);
		let child = make_environment("prod", Some(parent.id));
		let envs = vec![parent.clone(), child.clone()];
		let secrets = vec![make_secret(&parent, "LOG_LEVEL", "debug")];

		let resolved = resolve_secrets(child.id, &envs, &secrets);
		assert_eq!(resolved.len(), 1);
		let entry = &resolved[0];
		assert_eq!(entry.value.ciphertext, "debug");
		assert!(entry.inherited);
		assert_eq!(entry.source_environment_id, parent.id);
		assert_eq!(entry.source_environment_name, "dev");
		assert_eq!(entry.environment_id, parent.id);
	}

	#[test]
	fn three_level_scenario() {
		// dev has LOG_LEVEL=debug; staging overrides nothing; prod sets
		// LOG_LEVEL=info.
		let dev = make_environment("dev", None);
		let staging = make_environment("staging", Some(dev.id));
		let prod = make_environment("prod", Some(staging.id));
		let envs = vec![dev.clone(), staging.clone(), prod.clone()];
		let secrets = vec![
			make_secret(&dev, "LOG_LEVEL", "debug"),
			make_secret(&prod, "LOG_LEVEL", "info"),
		];

		let from_staging = resolve_secrets(staging.id, &envs, &secrets);
		assert_eq!(from_staging.len(), 1);
		assert_eq!(from_staging[0].value.ciphertext, "debug");
		assert!(from_staging[0].inherited);
		assert_eq!(from_staging[0].source_environment_id, dev.id);

		let from_prod = resolve_secrets(prod.id, &envs, &secrets);
		assert_eq!(from_prod.len(), 1);
		assert_eq!(from_prod[0].value.ciphertext, "info");
		assert!(!from_prod[0].inherited);
	}

	#[test]
	fn output_is_sorted_by_key() {
		let env = make_environment("dev", None);
		let secrets = vec![
			make_secret(&env, "ZEBRA", "z"),
			make_secret(&env, "ALPHA", "a"),
			make_secret(&env, "MIDDLE", "m"),
		];

		let resolved = resolve_secrets(env.id, &[env.clone()], &secrets);
		let keys: Vec<&str> = resolved.iter().map(|r| r.key.as_str()).collect();
		assert_eq!(keys, vec!["ALPHA", "MIDDLE", "ZEBRA"]);
	}

	#[test]
	fn secrets_outside_chain_are_ignored() {
		let env = make_environment("dev", None);
		let unrelated = make_environment("other", None);
		let envs = vec![env.clone(), unrelated.clone()];
		let secrets = vec![
			make_secret(&env, "MINE", "1"),
			make_secret(&unrelated, "THEIRS", "2"),
		];

		let resolved = resolve_secrets(env.id, &envs, &secrets);
		assert_eq!(resolved.len(), 1);
		assert_eq!(resolved[0].key, "MINE");
	}

	#[test]
	fn resolution_for_unknown_environment_is_empty() {
		let env = make_environment("dev", None);
		let secrets = vec![make_secret(&env, "KEY_A", "a")];

		let resolved = resolve_secrets(EnvironmentId::generate(), &[env.clone()], &secrets);
		assert!(resolved.is_empty());
	}
}
