//! Bijection between internal ids and external ids.
//!
//! Canonically keyed by integer. On the wire it is a JSON object whose keys
//! are the decimal internal ids, e.g. `{"0": "cat.jpg", "1": "dog.jpg"}`.

use crate::vector::InternalId;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Internal id ↔ external id mapping covering exactly `0..len`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMapping {
    forward: BTreeMap<InternalId, String>,
    reverse: HashMap<String, InternalId>,
}

impl IdMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next internal id to `external_id`.
    ///
    /// Returns `None` without changing anything if the external id is
    /// already mapped.
    pub fn assign(&mut self, external_id: &str) -> Option<InternalId> {
        if self.reverse.contains_key(external_id) {
            return None;
        }
        let id = self.next_id();
        self.forward.insert(id, external_id.to_string());
        self.reverse.insert(external_id.to_string(), id);
        Some(id)
    }

    /// The id the next assignment will receive.
    #[must_use]
    pub fn next_id(&self) -> InternalId {
        InternalId::new(self.forward.len() as u64)
    }

    #[must_use]
    pub fn external_id(&self, id: InternalId) -> Option<&str> {
        self.forward.get(&id).map(String::as_str)
    }

    #[must_use]
    pub fn internal_id(&self, external_id: &str) -> Option<InternalId> {
        self.reverse.get(external_id).copied()
    }

    #[must_use]
    pub fn contains_external(&self, external_id: &str) -> bool {
        self.reverse.contains_key(external_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Entries in ascending internal id order.
    pub fn iter(&self) -> impl Iterator<Item = (InternalId, &str)> {
        self.forward.iter().map(|(id, ext)| (*id, ext.as_str()))
    }

    /// Serializes to the JSON wire form.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses the JSON wire form, enforcing the bijection over `0..len`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Serialize for IdMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.forward.len()))?;
        for (id, external) in &self.forward {
            map.serialize_entry(&id.get().to_string(), external)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for IdMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(MappingVisitor)
    }
}

struct MappingVisitor;

impl<'de> Visitor<'de> for MappingVisitor {
    type Value = IdMapping;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object mapping decimal internal ids to external ids")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<IdMapping, A::Error> {
        let mut mapping = IdMapping::new();

        while let Some((key, external)) = access.next_entry::<String, String>()? {
            let raw: u64 = key
                .parse()
                .map_err(|_| de::Error::custom(format!("internal id '{key}' is not an integer")))?;
            let id = InternalId::new(raw);

            if mapping.forward.contains_key(&id) {
                return Err(de::Error::custom(format!("internal id {id} appears twice")));
            }
            if let Some(previous) = mapping.reverse.insert(external.clone(), id) {
                return Err(de::Error::custom(format!(
                    "external id '{external}' is mapped by both {previous} and {id}"
                )));
            }
            mapping.forward.insert(id, external);
        }

        // Keys are unique, so a maximum of len - 1 means exactly 0..len
        if let Some((last, _)) = mapping.forward.last_key_value() {
            if last.get() + 1 != mapping.forward.len() as u64 {
                return Err(de::Error::custom(format!(
                    "internal ids are not contiguous: {} entries but highest id is {last}",
                    mapping.forward.len()
                )));
            }
        }
        Ok(mapping)
    }
}
