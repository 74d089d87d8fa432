//! Version vectors and their partial order
//!
//! A version vector is the engine's compact representation of "how much of
//! each peer's history I have". Sync decisions only ever need the four-way
//! comparison below, so the wrapper keeps the underlying `yrs` state
//! vector opaque to the rest of the runtime.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::StateVector;

/// Outcome of comparing two version vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    /// `self` is strictly behind `other`
    Less,
    /// Identical histories
    Equal,
    /// `self` is strictly ahead of `other`
    Greater,
    /// Each side has history the other lacks
    Concurrent,
}

/// Compact per-client clock map over a document's history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionVector(StateVector);

impl VersionVector {
    /// The empty version (a fresh copy with no history)
    pub fn new() -> Self {
        Self(StateVector::default())
    }

    /// Wrap an engine state vector
    pub fn from_state_vector(sv: StateVector) -> Self {
        Self(sv)
    }

    /// Borrow the underlying engine state vector
    pub fn state_vector(&self) -> &StateVector {
        &self.0
    }

    /// True when no history is known at all
    pub fn is_empty(&self) -> bool {
        self.0 == StateVector::default()
    }

    /// Pointwise partial-order comparison over the union of client ids
    pub fn compare(&self, other: &Self) -> VersionOrdering {
        let mut ahead = false;
        let mut behind = false;
        for (client, &clock) in self.0.iter() {
            let theirs = other.0.get(client);
            if clock > theirs {
                ahead = true;
            } else if clock < theirs {
                behind = true;
            }
        }
        for (client, &clock) in other.0.iter() {
            if self.0.get(client) < clock {
                behind = true;
            }
        }
        match (behind, ahead) {
            (false, false) => VersionOrdering::Equal,
            (true, false) => VersionOrdering::Less,
            (false, true) => VersionOrdering::Greater,
            (true, true) => VersionOrdering::Concurrent,
        }
    }

    /// True when `self` already covers everything in `other`
    pub fn covers(&self, other: &Self) -> bool {
        matches!(
            self.compare(other),
            VersionOrdering::Equal | VersionOrdering::Greater
        )
    }

    /// Encode to the engine's v1 binary form
    pub fn encode(&self) -> Vec<u8> {
        self.0.encode_v1()
    }

    /// Decode from the engine's v1 binary form
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        StateVector::decode_v1(bytes)
            .map(Self)
            .map_err(|e| e.to_string())
    }
}

impl From<StateVector> for VersionVector {
    fn from(sv: StateVector) -> Self {
        Self(sv)
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("v{}");
        }
        write!(f, "v{{{} clients}}", self.0.iter().count())
    }
}

// Version vectors cross the wire in their engine encoding so the codec
// stays independent of the state vector's in-memory layout.
impl Serialize for VersionVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.encode().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VersionVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Self::decode(&bytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::SharedDoc;
    use yrs::Map;

    fn doc_with_entries(entries: &[(&str, &str)]) -> SharedDoc {
        let doc = SharedDoc::new();
        let map = doc.get_map("root");
        doc.with_transaction(|txn| {
            for (k, v) in entries {
                map.insert(txn, *k, *v);
            }
        });
        doc
    }

    #[test]
    fn empty_versions_are_equal() {
        let a = VersionVector::new();
        let b = VersionVector::new();
        assert!(a.is_empty());
        assert_eq!(a.compare(&b), VersionOrdering::Equal);
        assert!(a.covers(&b));
    }

    #[test]
    fn history_orders_ahead_of_its_prefix() {
        let doc = doc_with_entries(&[("a", "1")]);
        let early = doc.version();
        let map = doc.get_map("root");
        doc.with_transaction(|txn| {
            map.insert(txn, "b", "2");
        });
        let late = doc.version();

        assert_eq!(late.compare(&early), VersionOrdering::Greater);
        assert_eq!(early.compare(&late), VersionOrdering::Less);
        assert!(late.covers(&early));
        assert!(!early.covers(&late));
    }

    #[test]
    fn independent_histories_are_concurrent() {
        let a = doc_with_entries(&[("a", "1")]).version();
        let b = doc_with_entries(&[("b", "2")]).version();
        assert_eq!(a.compare(&b), VersionOrdering::Concurrent);
        assert_eq!(b.compare(&a), VersionOrdering::Concurrent);
    }

    #[test]
    fn merged_history_covers_both_sources() {
        let a = doc_with_entries(&[("a", "1")]);
        let b = doc_with_entries(&[("b", "2")]);
        let merged = SharedDoc::new();
        merged.import(&a.export(None)).unwrap();
        merged.import(&b.export(None)).unwrap();
        let v = merged.version();
        assert_eq!(v.compare(&a.version()), VersionOrdering::Greater);
        assert_eq!(v.compare(&b.version()), VersionOrdering::Greater);
    }

    #[test]
    fn encode_decode_round_trip() {
        let doc = doc_with_entries(&[("a", "1"), ("b", "2")]);
        let v = doc.version();
        let decoded = VersionVector::decode(&v.encode()).unwrap();
        assert_eq!(v, decoded);
        assert_eq!(v.compare(&decoded), VersionOrdering::Equal);
    }

    #[test]
    fn serde_round_trip_via_bincode() {
        let doc = doc_with_entries(&[("k", "v")]);
        let v = doc.version();
        let bytes = bincode::serialize(&v).unwrap();
        let back: VersionVector = bincode::deserialize(&bytes).unwrap();
        assert_eq!(v, back);
    }
}
