// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MQTT 5.0 control packet and property types used throughout the crate.
//!
//! These are thin wrappers over the wire types of the concrete transport
//! (`rumqttc`), kept in one place so the rest of the crate never takes a
//! direct dependency on the transport crate's module layout.

use std::fmt;

use bytes::Bytes;

/// Quality of service level for a publish.
pub type QoS = rumqttc::v5::mqttbytes::QoS;

/// Properties carried on an MQTT 5 PUBLISH packet.
pub type PublishProperties = rumqttc::v5::mqttbytes::v5::PublishProperties;

/// Properties carried on an MQTT 5 SUBSCRIBE packet.
pub type SubscribeProperties = rumqttc::v5::mqttbytes::v5::SubscribeProperties;

/// Properties carried on an MQTT 5 UNSUBSCRIBE packet.
pub type UnsubscribeProperties = rumqttc::v5::mqttbytes::v5::UnsubscribeProperties;

/// A single MQTT 5 user property (key/value pair).
pub type UserProperty = (String, String);

/// An MQTT topic name, i.e. a concrete (non-wildcarded) publish destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName(String);

impl TopicName {
    /// Build a [`TopicName`], rejecting wildcards and reserved leading characters.
    pub fn new(name: impl Into<String>) -> Result<Self, TopicError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TopicError::Empty);
        }
        if name.contains(['+', '#']) {
            return Err(TopicError::ContainsWildcard);
        }
        Ok(Self(name))
    }

    /// Borrow the topic name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TopicName> for String {
    fn from(value: TopicName) -> Self {
        value.0
    }
}

/// An MQTT topic filter, i.e. a subscription pattern which may contain
/// `+` (single-level) or `#` (multi-level) wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Build a [`TopicFilter`] from a raw subscription string.
    pub fn new(filter: impl Into<String>) -> Result<Self, TopicError> {
        let filter = filter.into();
        if filter.is_empty() {
            return Err(TopicError::Empty);
        }
        Ok(Self(filter))
    }

    /// Borrow the filter as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if `topic_name` matches this filter, honouring `+` and `#` wildcards
    /// per the MQTT 5 topic matching rules.
    #[must_use]
    pub fn matches_topic_name(&self, topic_name: &TopicName) -> bool {
        let filter_levels: Vec<&str> = self.0.split('/').collect();
        let topic_levels: Vec<&str> = topic_name.0.split('/').collect();

        let mut fi = 0;
        let mut ti = 0;
        while fi < filter_levels.len() {
            match filter_levels[fi] {
                "#" => return true,
                "+" => {
                    if ti >= topic_levels.len() {
                        return false;
                    }
                }
                lvl => {
                    if ti >= topic_levels.len() || topic_levels[ti] != lvl {
                        return false;
                    }
                }
            }
            fi += 1;
            ti += 1;
        }
        fi == filter_levels.len() && ti == topic_levels.len()
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors constructing [`TopicName`] or [`TopicFilter`] values.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TopicError {
    /// The topic string was empty.
    #[error("topic must not be empty")]
    Empty,
    /// A topic name (not a filter) contained a wildcard character.
    #[error("topic name must not contain '+' or '#'")]
    ContainsWildcard,
}

/// An inbound or outbound MQTT 5 PUBLISH, decoupled from the transport crate's
/// wire representation.
#[derive(Debug, Clone)]
pub struct Publish {
    /// The topic the publish was sent to, or will be sent to.
    pub topic_name: TopicName,
    /// The publish payload.
    pub payload: Bytes,
    /// The delivery quality of service.
    pub qos: QoS,
    /// Whether the broker is retaining this publish as the topic's last value.
    pub retain: bool,
    /// MQTT 5 properties attached to the publish (correlation data, response
    /// topic, content type, user properties, and so on).
    pub properties: Option<PublishProperties>,
}

impl Publish {
    /// Look up a single user property by key, returning the first match.
    #[must_use]
    pub fn user_property(&self, key: &str) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.user_properties.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.as_str())
    }

    /// The `content_type` MQTT 5 property, if present.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.content_type.as_deref())
    }

    /// The `correlation_data` MQTT 5 property, if present.
    #[must_use]
    pub fn correlation_data(&self) -> Option<&Bytes> {
        self.properties
            .as_ref()
            .and_then(|p| p.correlation_data.as_ref())
    }

    /// The `response_topic` MQTT 5 property, if present.
    #[must_use]
    pub fn response_topic(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.response_topic.as_deref())
    }
}
