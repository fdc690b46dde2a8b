// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The MQTT-5 user-property bag (component B): an insertion-ordered
//! key/value list, built over [`iotcore_mqtt::control_packet::UserProperty`].
//!
//! Rust's ownership means there is no separate `free` call for a read view:
//! [`PropertyBag::find_string_pair`] and [`PropertyBag::find_all`] borrow
//! from the bag they're called on, and the borrow checker enforces the
//! "don't outlive the bag" contract the original C `free`-function pairing
//! existed to approximate.

use iotcore_mqtt::control_packet::UserProperty;

/// A bag is rejected if inserting a property would exceed this many entries.
/// Chosen generously above anything a single request/response needs; exists
/// to bound memory for a bag built from untrusted wire data.
pub const MAX_PROPERTIES: usize = 256;

/// Error appending to a [`PropertyBag`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyBagError {
    /// Appending would exceed [`MAX_PROPERTIES`].
    #[error("property bag is full (max {MAX_PROPERTIES})")]
    NotEnoughSpace,
}

/// An insertion-ordered collection of MQTT-5 user properties.
#[derive(Debug, Clone, Default)]
pub struct PropertyBag {
    entries: Vec<UserProperty>,
}

impl PropertyBag {
    /// An empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bag from the user properties attached to an inbound publish,
    /// preserving their wire order.
    #[must_use]
    pub fn from_user_properties(properties: Vec<UserProperty>) -> Self {
        Self { entries: properties }
    }

    /// Append a key/value pair, preserving insertion order.
    ///
    /// # Errors
    /// Returns [`PropertyBagError::NotEnoughSpace`] if the bag is already at
    /// [`MAX_PROPERTIES`].
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), PropertyBagError> {
        if self.entries.len() >= MAX_PROPERTIES {
            return Err(PropertyBagError::NotEnoughSpace);
        }
        self.entries.push((key.into(), value.into()));
        Ok(())
    }

    /// The first value for `key`, case-sensitive.
    #[must_use]
    pub fn find_string_pair(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in insertion order.
    pub fn find_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The properties in insertion order, as wire pairs.
    #[must_use]
    pub fn as_slice(&self) -> &[UserProperty] {
        &self.entries
    }

    /// Consume the bag, returning its entries in insertion order.
    #[must_use]
    pub fn into_vec(self) -> Vec<UserProperty> {
        self.entries
    }

    /// Number of properties currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bag holds no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let mut bag = PropertyBag::new();
        bag.append("a", "1").unwrap();
        bag.append("b", "2").unwrap();
        bag.append("a", "3").unwrap();
        assert_eq!(
            bag.as_slice(),
            &[
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn find_string_pair_returns_first_match() {
        let mut bag = PropertyBag::new();
        bag.append("status", "200").unwrap();
        bag.append("status", "500").unwrap();
        assert_eq!(bag.find_string_pair("status"), Some("200"));
        assert_eq!(bag.find_string_pair("missing"), None);
    }

    #[test]
    fn find_all_returns_every_match_in_order() {
        let mut bag = PropertyBag::new();
        bag.append("tag", "x").unwrap();
        bag.append("other", "y").unwrap();
        bag.append("tag", "z").unwrap();
        let values: Vec<&str> = bag.find_all("tag").collect();
        assert_eq!(values, vec!["x", "z"]);
    }

    #[test]
    fn append_rejects_once_full() {
        let mut bag = PropertyBag::new();
        for i in 0..MAX_PROPERTIES {
            bag.append("k", i.to_string()).unwrap();
        }
        assert_eq!(bag.append("k", "overflow"), Err(PropertyBagError::NotEnoughSpace));
    }
}
