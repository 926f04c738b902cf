//! Vector clocks: per-replica logical time.
//!
//! A clock maps replica ids to non-negative counters. "A happens-before
//! B" iff every counter in A is ≤ its counterpart in B and at least one
//! is strictly smaller. Two clocks where neither happens-before the
//! other are concurrent.
//!
//! # Encoding
//!
//! The string encoding (the single documented format for the whole
//! crate) is `replica:counter` pairs joined by commas, replicas in
//! lexicographic order: `"r1:2,r2:1"`. The empty clock encodes to the
//! empty string. [`VectorClock::decode`] accepts exactly what
//! [`VectorClock::encode`] emits, so any emitted clock round-trips.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// A mapping from replica id to logical counter.
///
/// Backed by a `BTreeMap` so iteration (and therefore the encoding) is
/// deterministic without extra sorting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    counters: BTreeMap<String, u64>,
}

impl VectorClock {
    /// Creates an empty clock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counters: BTreeMap::new(),
        }
    }

    /// Returns true if no replica has ticked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Returns the counter for a replica (0 if unseen).
    #[must_use]
    pub fn get(&self, replica: &str) -> u64 {
        self.counters.get(replica).copied().unwrap_or(0)
    }

    /// Advances this replica's counter by one.
    pub fn increment(&mut self, replica: impl Into<String>) {
        *self.counters.entry(replica.into()).or_insert(0) += 1;
    }

    /// Folds another clock in, keeping the component-wise maximum.
    pub fn merge(&mut self, other: &Self) {
        for (replica, &count) in &other.counters {
            let entry = self.counters.entry(replica.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
    }

    /// Returns the component-wise maximum of two clocks.
    #[must_use]
    pub fn merged_with(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    /// Returns true if `self` happens-before `other`.
    ///
    /// Component-wise ≤ with at least one component strictly smaller.
    #[must_use]
    pub fn happens_before(&self, other: &Self) -> bool {
        let mut strictly_less = false;
        for (replica, &count) in &self.counters {
            let theirs = other.get(replica);
            if count > theirs {
                return false;
            }
            if count < theirs {
                strictly_less = true;
            }
        }
        for (replica, &theirs) in &other.counters {
            if self.get(replica) < theirs {
                strictly_less = true;
            }
        }
        strictly_less
    }

    /// Returns true if neither clock happens-before the other.
    #[must_use]
    pub fn concurrent(&self, other: &Self) -> bool {
        !self.happens_before(other) && !other.happens_before(self)
    }

    /// Encodes the clock as `replica:counter` pairs joined by commas.
    #[must_use]
    pub fn encode(&self) -> String {
        self.counters
            .iter()
            .map(|(replica, count)| format!("{replica}:{count}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Decodes a clock from its string encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] on anything [`encode`](Self::encode)
    /// would not emit: empty replica names, missing or non-numeric
    /// counters, dangling separators.
    pub fn decode(input: &str) -> Result<Self> {
        let mut counters = BTreeMap::new();
        if input.is_empty() {
            return Ok(Self { counters });
        }

        for pair in input.split(',') {
            let (replica, count) = pair.rsplit_once(':').ok_or_else(|| {
                Error::BadRequest(format!("malformed vector clock component: {pair:?}"))
            })?;
            if replica.is_empty() {
                return Err(Error::BadRequest(format!(
                    "empty replica id in vector clock component: {pair:?}"
                )));
            }
            let count: u64 = count.parse().map_err(|_| {
                Error::BadRequest(format!("non-numeric counter in vector clock: {pair:?}"))
            })?;
            counters.insert(replica.to_string(), count);
        }

        Ok(Self { counters })
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(pairs: &[(&str, u64)]) -> VectorClock {
        let mut c = VectorClock::new();
        for (replica, count) in pairs {
            for _ in 0..*count {
                c.increment(*replica);
            }
        }
        c
    }

    #[test]
    fn test_increment_and_get() {
        let mut c = VectorClock::new();
        assert_eq!(c.get("r1"), 0);
        c.increment("r1");
        c.increment("r1");
        c.increment("r2");
        assert_eq!(c.get("r1"), 2);
        assert_eq!(c.get("r2"), 1);
    }

    #[test]
    fn test_encode_sorted() {
        let c = clock(&[("r2", 1), ("r1", 2)]);
        assert_eq!(c.encode(), "r1:2,r2:1");
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for c in [
            VectorClock::new(),
            clock(&[("r1", 1)]),
            clock(&[("r1", 2), ("r2", 1), ("replica-with-dash", 9)]),
        ] {
            let decoded = VectorClock::decode(&c.encode()).unwrap();
            assert_eq!(decoded, c);
        }
    }

    #[test]
    fn test_decode_malformed() {
        for input in ["r1", "r1:x", ":3", "r1:1,,r2:2", "r1:1,"] {
            assert!(
                matches!(VectorClock::decode(input), Err(Error::BadRequest(_))),
                "expected decode({input:?}) to fail"
            );
        }
    }

    #[test]
    fn test_happens_before() {
        let a = clock(&[("r1", 1), ("r2", 1)]);
        let b = clock(&[("r1", 2), ("r2", 1)]);

        assert!(a.happens_before(&b));
        assert!(!b.happens_before(&a));
        assert!(!a.happens_before(&a));
    }

    #[test]
    fn test_happens_before_missing_components() {
        // {} < {r1:1}, and {r1:1} < {r1:1, r2:1}
        let empty = VectorClock::new();
        let a = clock(&[("r1", 1)]);
        let b = clock(&[("r1", 1), ("r2", 1)]);

        assert!(empty.happens_before(&a));
        assert!(a.happens_before(&b));
        assert!(!b.happens_before(&a));
    }

    #[test]
    fn test_concurrent() {
        let a = clock(&[("r1", 2), ("r2", 1)]);
        let b = clock(&[("r1", 1), ("r2", 2)]);

        assert!(a.concurrent(&b));
        assert!(b.concurrent(&a));
        assert!(!a.concurrent(&a));
    }

    #[test]
    fn test_merge_componentwise_max() {
        let a = clock(&[("r1", 2), ("r2", 1)]);
        let b = clock(&[("r1", 1), ("r2", 2), ("r3", 1)]);

        let merged = a.merged_with(&b);
        assert_eq!(merged.get("r1"), 2);
        assert_eq!(merged.get("r2"), 2);
        assert_eq!(merged.get("r3"), 1);

        // Both inputs happen-before (or equal) the merge.
        assert!(a.happens_before(&merged));
        assert!(b.happens_before(&merged));
    }
}
