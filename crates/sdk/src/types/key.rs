use std::{borrow::Borrow, fmt, sync::Arc};

use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque identifier of one unit of remotely watchable state.
///
/// Keys compare lexically, which keeps demand snapshots stable for diffing.
/// See [`crate::domain`] for deterministic derivation from domain identifiers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Arc<str>);

impl Key {
    pub fn new(key: impl AsRef<str>) -> Self { Self(Arc::from(key.as_ref())) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self { Self::new(value) }
}

impl From<String> for Key {
    fn from(value: String) -> Self { Self(Arc::from(value)) }
}

impl From<&Key> for Key {
    fn from(value: &Key) -> Self { value.clone() }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str { &self.0 }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str { &self.0 }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:?}", &*self.0) }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Key::from)
    }
}

/// Deduplicated, sorted union of all demanded keys at a point in time.
///
/// Equality is structural, so an unchanged union never triggers downstream
/// work.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DemandSnapshot(Arc<[Key]>);

impl DemandSnapshot {
    pub fn from_keys(keys: impl IntoIterator<Item = Key>) -> Self {
        Self(keys.into_iter().sorted().dedup().collect())
    }

    pub fn keys(&self) -> &[Key] { &self.0 }

    pub fn iter(&self) -> impl Iterator<Item = &Key> { self.0.iter() }

    pub fn contains(&self, key: &Key) -> bool { self.0.binary_search(key).is_ok() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl<'a> IntoIterator for &'a DemandSnapshot {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_sorted_and_deduplicated() {
        let snapshot = DemandSnapshot::from_keys(["c", "a", "b", "a", "c"].map(Key::from));
        assert_eq!(snapshot.keys(), ["a", "b", "c"].map(Key::from));
        assert!(snapshot.contains(&Key::from("b")));
        assert!(!snapshot.contains(&Key::from("d")));
    }

    #[test]
    fn snapshot_equality_is_structural() {
        let a = DemandSnapshot::from_keys(["x", "y"].map(Key::from));
        let b = DemandSnapshot::from_keys(["y", "x", "y"].map(Key::from));
        assert_eq!(a, b);
        assert_ne!(a, DemandSnapshot::default());
    }

    #[test]
    fn key_serializes_as_plain_string() {
        let key = Key::from("0xabc||native");
        assert_eq!(serde_json::to_string(&key).unwrap(), r#""0xabc||native""#);

        let map: std::collections::BTreeMap<Key, u8> = [(key.clone(), 1)].into();
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"0xabc||native":1}"#);
    }
}
