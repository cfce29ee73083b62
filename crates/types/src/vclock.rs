// Path: crates/types/src/vclock.rs
//! The per-source version vector.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A version vector mapping each source nickname to the highest transaction
/// id applied from that source.
///
/// A missing key is equivalent to `0`. The vector is monotone non-decreasing
/// over the lifetime of a node. On the wire it is a plain JSON object of
/// string keys and unsigned values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VClock(BTreeMap<String, u64>);

impl VClock {
    /// Creates an empty version vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the highest applied id for `source`, or `0` if the source has
    /// never been observed.
    pub fn get(&self, source: &str) -> u64 {
        self.0.get(source).copied().unwrap_or(0)
    }

    /// Returns the recorded entry for `source`, distinguishing "never heard
    /// of" (`None`) from an explicit value.
    pub fn entry(&self, source: &str) -> Option<u64> {
        self.0.get(source).copied()
    }

    /// Whether `source` has an explicit entry.
    pub fn contains(&self, source: &str) -> bool {
        self.0.contains_key(source)
    }

    /// Number of explicit entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the vector has no explicit entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Records `id` as the highest applied id for `source`. Ignores the
    /// update if it would move an entry backwards.
    pub fn advance(&mut self, source: String, id: u64) {
        let slot = self.0.entry(source).or_insert(0);
        if id > *slot {
            *slot = id;
        }
    }

    /// Iterates over the explicit `(source, id)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Componentwise `self <= other`, treating missing keys as `0`. Two
    /// observations of the same node's vclock always compare in one
    /// direction or the other.
    pub fn dominated_by(&self, other: &VClock) -> bool {
        self.0.iter().all(|(k, v)| *v <= other.get(k))
    }
}
