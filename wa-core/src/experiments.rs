// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Sticky A/B bucket assignment.
//!
//! The first lookup for an experiment name performs a weighted draw and
//! persists the result; every later lookup returns that stored variant,
//! whatever variants or weights it is called with, until the assignment is
//! cleared or force-overwritten.

use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::BucketingStrategy;
use crate::storage::{Storage, AB_TEST_KEY};

pub type Assignments = BTreeMap<String, String>;

pub struct ABBucketer {
    persistent: Arc<dyn Storage>,
    privacy_mode: bool,
    strategy: BucketingStrategy,
    assignments: Assignments,
}

impl ABBucketer {
    pub fn new(
        persistent: Arc<dyn Storage>,
        privacy_mode: bool,
        strategy: BucketingStrategy,
    ) -> Self {
        Self {
            persistent,
            privacy_mode,
            strategy,
            assignments: Assignments::new(),
        }
    }

    /// Load persisted assignments. A missing, unreadable or malformed map
    /// starts empty; privacy mode never reads.
    pub fn load(&mut self) {
        self.assignments = if self.privacy_mode {
            Assignments::new()
        } else {
            match self.persistent.get(AB_TEST_KEY) {
                Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                    warn!(error = %e, "discarding malformed A/B assignment map");
                    Assignments::new()
                }),
                Ok(None) => Assignments::new(),
                Err(e) => {
                    debug!(error = %e, "A/B assignments unavailable");
                    Assignments::new()
                }
            }
        };
    }

    fn save(&self) {
        if self.privacy_mode {
            return;
        }
        let result = serde_json::to_string(&self.assignments)
            .map_err(crate::error::StorageError::from)
            .and_then(|raw| self.persistent.set(AB_TEST_KEY, &raw));
        if let Err(e) = result {
            debug!(error = %e, "could not persist A/B assignments");
        }
    }

    /// Variant for `name`, assigning one on first use.
    ///
    /// Returns `None` (and assigns nothing) for an empty name or fewer than
    /// two variants.
    pub fn get_variant<R: Rng + ?Sized>(
        &mut self,
        name: &str,
        variants: &[String],
        weights: Option<&[f64]>,
        rng: &mut R,
        visitor_id: Option<&str>,
    ) -> Option<String> {
        if name.is_empty() || variants.len() < 2 {
            return None;
        }
        if let Some(existing) = self.assignments.get(name) {
            return Some(existing.clone());
        }

        let unit = match (self.strategy, visitor_id) {
            (BucketingStrategy::VisitorHash, Some(visitor)) => hash_unit(visitor, name),
            _ => rng.gen::<f64>(),
        };
        let selected = select_weighted(variants, weights, unit).to_string();

        debug!(experiment = name, variant = %selected, "assigned A/B variant");
        self.assignments.insert(name.to_string(), selected.clone());
        self.save();
        Some(selected)
    }

    /// Force `variant` for `name`. Ignored when either is empty.
    pub fn set_variant(&mut self, name: &str, variant: &str) -> bool {
        if name.is_empty() || variant.is_empty() {
            return false;
        }
        self.assignments
            .insert(name.to_string(), variant.to_string());
        self.save();
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.assignments.get(name).map(String::as_str)
    }

    /// Copy of every assignment.
    pub fn all(&self) -> Assignments {
        self.assignments.clone()
    }

    /// Snapshot for the envelope; `None` while nothing is assigned.
    pub fn active(&self) -> Option<Assignments> {
        if self.assignments.is_empty() {
            None
        } else {
            Some(self.assignments.clone())
        }
    }

    /// Remove one assignment, or all of them.
    pub fn clear(&mut self, name: Option<&str>) {
        match name {
            Some(name) => {
                self.assignments.remove(name);
            }
            None => self.assignments.clear(),
        }
        self.save();
    }
}

/// Walk `variants` accumulating weight and pick the first whose cumulative
/// weight exceeds `unit * total`.
///
/// Weights are used only when there is one per variant and all are finite
/// and non-negative; otherwise every variant weighs 1. Falls back to the
/// first variant.
pub fn select_weighted<'a>(variants: &'a [String], weights: Option<&[f64]>, unit: f64) -> &'a str {
    let uniform;
    let weights = match weights {
        Some(w) if w.len() == variants.len() && w.iter().all(|x| x.is_finite() && *x >= 0.0) => w,
        _ => {
            uniform = vec![1.0; variants.len()];
            &uniform[..]
        }
    };

    let total: f64 = weights.iter().sum();
    let draw = unit.clamp(0.0, 1.0) * total;

    let mut cumulative = 0.0;
    for (variant, weight) in variants.iter().zip(weights) {
        cumulative += weight;
        if draw < cumulative {
            return variant;
        }
    }
    variants.first().map(String::as_str).unwrap_or_default()
}

/// Deterministic value in `[0, 1)` for a visitor/experiment pair.
fn hash_unit(visitor_id: &str, name: &str) -> f64 {
    let hash = seahash::hash(format!("{}:{}", visitor_id, name).as_bytes());
    (hash >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn bucketer(privacy: bool, strategy: BucketingStrategy) -> (ABBucketer, MemoryStorage) {
        let storage = MemoryStorage::new();
        let mut ab = ABBucketer::new(Arc::new(storage.clone()), privacy, strategy);
        ab.load();
        (ab, storage)
    }

    #[test]
    fn test_assignment_is_sticky_regardless_of_arguments() {
        let (mut ab, _) = bucketer(false, BucketingStrategy::Random);
        let mut rng = StdRng::seed_from_u64(7);

        let first = ab
            .get_variant("hero", &names(&["a", "b"]), None, &mut rng, None)
            .unwrap();
        for _ in 0..20 {
            let again = ab
                .get_variant("hero", &names(&["x", "y", "z"]), Some(&[0.0, 0.0, 1.0]), &mut rng, None)
                .unwrap();
            assert_eq!(again, first);
        }

        ab.clear(Some("hero"));
        let fresh = ab
            .get_variant("hero", &names(&["x", "y"]), Some(&[0.0, 1.0]), &mut rng, None)
            .unwrap();
        assert_eq!(fresh, "y");
    }

    #[test]
    fn test_invalid_input_is_ignored() {
        let (mut ab, storage) = bucketer(false, BucketingStrategy::Random);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(ab.get_variant("", &names(&["a", "b"]), None, &mut rng, None), None);
        assert_eq!(ab.get_variant("t", &names(&["a"]), None, &mut rng, None), None);
        assert!(!ab.set_variant("t", ""));
        assert!(ab.all().is_empty());
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn test_persisted_and_reloaded() {
        let (mut ab, storage) = bucketer(false, BucketingStrategy::Random);
        let mut rng = StdRng::seed_from_u64(3);
        let v = ab
            .get_variant("pricing", &names(&["cheap", "dear"]), None, &mut rng, None)
            .unwrap();

        let mut reloaded = ABBucketer::new(Arc::new(storage.clone()), false, BucketingStrategy::Random);
        reloaded.load();
        assert_eq!(reloaded.get("pricing"), Some(v.as_str()));
    }

    #[test]
    fn test_set_variant_overwrites() {
        let (mut ab, _) = bucketer(false, BucketingStrategy::Random);
        let mut rng = StdRng::seed_from_u64(3);
        ab.get_variant("t", &names(&["a", "b"]), Some(&[1.0, 0.0]), &mut rng, None);
        assert_eq!(ab.get("t"), Some("a"));
        assert!(ab.set_variant("t", "b"));
        assert_eq!(
            ab.get_variant("t", &names(&["a", "b"]), None, &mut rng, None).as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_clear_all() {
        let (mut ab, storage) = bucketer(false, BucketingStrategy::Random);
        ab.set_variant("a", "1");
        ab.set_variant("b", "2");
        ab.clear(None);
        assert!(ab.active().is_none());
        assert_eq!(storage.get(AB_TEST_KEY).unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_malformed_stored_map_is_empty() {
        let storage = MemoryStorage::new();
        storage.set(AB_TEST_KEY, "[1,2").unwrap();
        let mut ab = ABBucketer::new(Arc::new(storage), false, BucketingStrategy::Random);
        ab.load();
        assert!(ab.all().is_empty());
    }

    #[test]
    fn test_privacy_mode_keeps_memory_only() {
        let (mut ab, storage) = bucketer(true, BucketingStrategy::Random);
        let mut rng = StdRng::seed_from_u64(3);
        assert!(ab.get_variant("t", &names(&["a", "b"]), None, &mut rng, None).is_some());
        ab.set_variant("u", "x");
        ab.clear(Some("t"));
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn test_visitor_hash_is_deterministic_across_stores() {
        let variants = names(&["a", "b", "c", "d"]);
        let mut picks = Vec::new();
        for seed in 0..2 {
            let (mut ab, _) = bucketer(false, BucketingStrategy::VisitorHash);
            let mut rng = StdRng::seed_from_u64(seed);
            picks.push(ab.get_variant("t", &variants, None, &mut rng, Some("visitor-42")));
        }
        assert_eq!(picks[0], picks[1]);
    }

    #[test]
    fn test_select_weighted_walk() {
        let v = names(&["a", "b", "c"]);
        let w = [1.0, 2.0, 1.0];
        assert_eq!(select_weighted(&v, Some(&w), 0.0), "a");
        assert_eq!(select_weighted(&v, Some(&w), 0.24), "a");
        assert_eq!(select_weighted(&v, Some(&w), 0.25), "b");
        assert_eq!(select_weighted(&v, Some(&w), 0.74), "b");
        assert_eq!(select_weighted(&v, Some(&w), 0.75), "c");
        // Mismatched length falls back to uniform.
        assert_eq!(select_weighted(&v, Some(&[5.0]), 0.5), "b");
        // All-zero weights fall back to the first variant.
        assert_eq!(select_weighted(&v, Some(&[0.0, 0.0, 0.0]), 0.9), "a");
    }

    proptest! {
        #[test]
        fn prop_selection_is_a_listed_variant(
            weights in proptest::collection::vec(0.0f64..10.0, 2..6),
            unit in 0.0f64..1.0,
        ) {
            let variants: Vec<String> = (0..weights.len()).map(|i| format!("v{}", i)).collect();
            let chosen = select_weighted(&variants, Some(&weights), unit);
            prop_assert!(variants.iter().any(|v| v == chosen));
        }

        #[test]
        fn prop_zero_weight_variant_never_chosen(unit in 0.0f64..1.0) {
            let variants = names(&["never", "always"]);
            prop_assert_eq!(select_weighted(&variants, Some(&[0.0, 3.0]), unit), "always");
        }
    }
}
