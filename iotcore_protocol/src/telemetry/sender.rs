// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Telemetry producer, the publish-side counterpart to [`super::receiver`].
//!
//! Not a state machine in its own right (the consumer state machine is
//! component K; a producer has nothing to wait on), but shares the same
//! topic-template and property-bag machinery, so it lives alongside the
//! receiver rather than as a standalone component.

use std::collections::HashMap;
use std::time::Duration;

use iotcore_mqtt::control_packet::{PublishProperties, QoS};
use iotcore_mqtt::error::PublishError;
use iotcore_mqtt::interface::MqttPubSub;

use crate::common::payload_serialize::PayloadSerialize;
use crate::common::topic_processor::{TopicPattern, TopicTemplateError};
use crate::telemetry::TELEMETRY_PROTOCOL_VERSION;

const PROTOCOL_VERSION_PROPERTY: &str = "__protVer";

/// Telemetry sender options.
#[derive(Builder, Clone)]
#[builder(setter(into, strip_option))]
pub struct Options {
    /// Topic pattern for the telemetry message; see [`TopicPattern`].
    topic_pattern: String,
    /// Optional topic namespace prepended to the pattern.
    #[builder(default = "None")]
    topic_namespace: Option<String>,
    /// Token keys/values bound into the pattern at construction time.
    #[builder(default)]
    topic_token_map: HashMap<String, String>,
}

/// A single outbound telemetry publish.
#[derive(Debug, Clone)]
pub struct Message<T: PayloadSerialize> {
    payload: T,
    topic_tokens: HashMap<String, String>,
    message_expiry: Option<Duration>,
    custom_user_data: Vec<(String, String)>,
}

impl<T: PayloadSerialize> Message<T> {
    /// Start building a message carrying `payload`.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            topic_tokens: HashMap::new(),
            message_expiry: None,
            custom_user_data: Vec::new(),
        }
    }

    /// Dynamic token values to resolve in the sender's topic pattern, in
    /// addition to any bound at sender construction time.
    #[must_use]
    pub fn with_topic_tokens(mut self, topic_tokens: HashMap<String, String>) -> Self {
        self.topic_tokens = topic_tokens;
        self
    }

    /// The MQTT 5 `message_expiry_interval`, in whole seconds.
    #[must_use]
    pub fn with_message_expiry(mut self, message_expiry: Duration) -> Self {
        self.message_expiry = Some(message_expiry);
        self
    }

    /// Additional MQTT 5 user properties beyond the protocol version.
    #[must_use]
    pub fn with_custom_user_data(mut self, custom_user_data: Vec<(String, String)>) -> Self {
        self.custom_user_data = custom_user_data;
        self
    }
}

/// Error sending a telemetry message.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The payload could not be serialized.
    #[error("failed to serialize telemetry payload: {0}")]
    Serialization(String),
    /// The topic pattern could not be rendered for this message (a dynamic
    /// token was missing or invalid).
    #[error(transparent)]
    InvalidTopic(#[from] TopicTemplateError),
    /// Publishing failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Telemetry producer bound to a topic template.
pub struct Sender<T, C>
where
    T: PayloadSerialize,
    C: MqttPubSub,
{
    mqtt_client: C,
    topic_pattern: TopicPattern,
    _payload: std::marker::PhantomData<T>,
}

impl<T, C> Sender<T, C>
where
    T: PayloadSerialize,
    C: MqttPubSub,
{
    /// Build a new [`Sender`] bound to `options.topic_pattern`.
    ///
    /// # Errors
    /// Returns [`TopicTemplateError`] if the pattern, namespace, or any
    /// statically-bound token replacement is invalid.
    pub fn new(client: C, options: Options) -> Result<Self, TopicTemplateError> {
        let topic_pattern = TopicPattern::new(
            &options.topic_pattern,
            options.topic_namespace.as_deref(),
            &options.topic_token_map,
        )?;
        Ok(Self {
            mqtt_client: client,
            topic_pattern,
            _payload: std::marker::PhantomData,
        })
    }

    /// Serialize and publish `message` at QoS 1.
    ///
    /// # Errors
    /// Returns [`SendError`] if serialization, topic resolution, or the
    /// publish itself fails.
    pub async fn send(&self, message: Message<T>) -> Result<(), SendError> {
        let topic = self.topic_pattern.as_publish_topic(&message.topic_tokens)?;
        let payload = message
            .payload
            .serialize()
            .map_err(|e| SendError::Serialization(format!("{e:?}")))?;

        let mut user_properties = message.custom_user_data;
        user_properties.push((PROTOCOL_VERSION_PROPERTY.to_string(), TELEMETRY_PROTOCOL_VERSION.to_string()));

        let properties = PublishProperties {
            content_type: Some(T::content_type().to_string()),
            payload_format_indicator: u8::from(T::format_indicator() == crate::common::payload_serialize::FormatIndicator::Utf8EncodedCharacterData),
            message_expiry_interval: message.message_expiry.map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX)),
            user_properties,
            ..Default::default()
        };

        self.mqtt_client
            .publish_with_properties(topic, QoS::AtLeastOnce, false, payload, properties)
            .await?
            .wait()
            .await
            .map_err(|e| SendError::Publish(PublishError::new(iotcore_mqtt::error::PublishErrorKind::Transport(e.to_string()))))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_builder_carries_expiry_and_custom_data() {
        #[derive(Clone, Debug)]
        struct Dummy;
        impl PayloadSerialize for Dummy {
            type SerializerError = String;
            fn content_type() -> &'static str {
                "application/octet-stream"
            }
            fn format_indicator() -> crate::common::payload_serialize::FormatIndicator {
                crate::common::payload_serialize::FormatIndicator::UnspecifiedBytes
            }
            fn serialize(&self) -> Result<Vec<u8>, String> {
                Ok(Vec::new())
            }
            fn deserialize(_payload: &[u8]) -> Result<Self, String> {
                Ok(Dummy)
            }
        }

        let message = Message::new(Dummy)
            .with_message_expiry(Duration::from_secs(30))
            .with_custom_user_data(vec![("region".to_string(), "west".to_string())]);
        assert_eq!(message.message_expiry, Some(Duration::from_secs(30)));
        assert_eq!(message.custom_user_data, vec![("region".to_string(), "west".to_string())]);
    }
}
