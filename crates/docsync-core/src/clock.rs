// File: src/clock.rs
//
// Vector clock: per-authority progress counters used as a multi-authority
// sync cursor

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Map from authority identifier to the highest sequence number the holder
/// has seen from that authority. An absent key reads as zero; merging never
/// reduces a counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(HashMap<String, i64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock with a single authority entry.
    pub fn single(authority: impl Into<String>, value: i64) -> Self {
        let mut clock = Self::new();
        clock.insert(authority, value);
        clock
    }

    /// Counter for an authority; zero when the authority is unknown.
    pub fn get(&self, authority: &str) -> i64 {
        self.0.get(authority).copied().unwrap_or(0)
    }

    pub fn insert(&mut self, authority: impl Into<String>, value: i64) {
        self.0.insert(authority.into(), value);
    }

    pub fn contains(&self, authority: &str) -> bool {
        self.0.contains_key(authority)
    }

    /// Per-key maximum merge. Monotonic: no counter ever decreases.
    pub fn merge(&mut self, other: &VectorClock) {
        for (authority, &value) in &other.0 {
            let entry = self.0.entry(authority.clone()).or_insert(0);
            if value > *entry {
                *entry = value;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.0.iter()
    }
}

impl FromIterator<(String, i64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        VectorClock(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, i64); N]> for VectorClock {
    fn from(entries: [(&str, i64); N]) -> Self {
        entries
            .into_iter()
            .map(|(authority, value)| (authority.to_string(), value))
            .collect()
    }
}
