// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Telemetry consumer protocol state machine (component K).
//!
//! One logical state, `Ready`, tracked here as `New -> Subscribed`: a
//! `SUB_REQ` is issued on the first [`Receiver::recv`] call, racing a
//! subscribe-timeout timer against the SUBACK (or, per spec, an implicit
//! proof of subscription in the form of the first matching publish). A
//! timeout moves the receiver to `Faulted`, after which every call returns
//! the same error and no further `SUB_REQ` is attempted.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;

use iotcore_mqtt::control_packet::{Publish, QoS, TopicFilter};
use iotcore_mqtt::error::TelemetryError;
use iotcore_mqtt::interface::{ManagedClient, MqttAck, PubReceiver};

use crate::common::payload_serialize::PayloadSerialize;
use crate::common::topic_processor::{TopicPattern, TopicTemplateError};
use crate::telemetry::{DEFAULT_TELEMETRY_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};
use crate::ProtocolVersion;

/// User property carrying the [`ProtocolVersion`] of a telemetry publish.
const PROTOCOL_VERSION_PROPERTY: &str = "__protVer";

/// A telemetry message delivered to the application: the `TELEMETRY_CONSUMER_IND` event.
#[derive(Debug)]
pub struct Message<T: PayloadSerialize> {
    /// The deserialized payload.
    pub payload: T,
    /// The `content_type` MQTT 5 property carried on the publish, if any.
    pub content_type: Option<String>,
    /// Every user property other than [`PROTOCOL_VERSION_PROPERTY`], in wire order.
    pub custom_user_data: Vec<(String, String)>,
    /// Token values extracted from the publish's topic against the bound template.
    pub topic_tokens: HashMap<String, String>,
    /// The concrete topic the message arrived on.
    pub topic: String,
}

impl<T: PayloadSerialize> Message<T> {
    fn from_publish(publish: Publish, topic_pattern: &TopicPattern) -> Result<Self, TelemetryError> {
        let properties = publish.properties.clone().unwrap_or_default();

        let mut custom_user_data = Vec::with_capacity(properties.user_properties.len());
        let mut protocol_version = DEFAULT_TELEMETRY_PROTOCOL_VERSION;
        for (key, value) in properties.user_properties {
            if key == PROTOCOL_VERSION_PROPERTY {
                match ProtocolVersion::parse_protocol_version(&value) {
                    Some(version) => protocol_version = version,
                    None => {
                        return Err(TelemetryError::Deserialization(format!(
                            "unparsable protocol version '{value}'"
                        )));
                    }
                }
            } else {
                custom_user_data.push((key, value));
            }
        }
        if !protocol_version.is_supported(SUPPORTED_PROTOCOL_VERSIONS) {
            return Err(TelemetryError::Deserialization(format!(
                "unsupported protocol version '{protocol_version}'"
            )));
        }

        let content_type = publish.content_type().map(str::to_owned);
        let payload =
            T::deserialize(&publish.payload).map_err(|e| TelemetryError::Deserialization(format!("{e:?}")))?;
        let topic = publish.topic_name.as_str().to_string();
        let topic_tokens = topic_pattern.parse_tokens(&topic);

        Ok(Message {
            payload,
            content_type,
            custom_user_data,
            topic_tokens,
            topic,
        })
    }
}

/// Telemetry receiver options.
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
    /// If true, each received publish is acknowledged automatically.
    #[builder(default = "true")]
    auto_ack: bool,
    /// Seconds to wait for the SUBACK (or an implicit matching publish)
    /// before faulting. Spec default: 10.
    #[builder(default = "10")]
    subscribe_timeout_in_seconds: u64,
}

/// Subscription progress. The telemetry consumer state machine only exposes
/// `Ready` (this receiver, subscribed or not) or `Faulted` to the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Subscribed,
    Faulted,
}

/// Telemetry consumer (component K): subscribes to a topic template and
/// yields deserialized [`Message`]s.
pub struct Receiver<T, C>
where
    T: PayloadSerialize + Send + Sync + 'static,
    C: ManagedClient + MqttAck + Clone + Send + Sync + 'static,
    C::PubReceiver: Send + 'static,
{
    mqtt_client: C,
    mqtt_receiver: C::PubReceiver,
    telemetry_topic_filter: TopicFilter,
    topic_pattern: TopicPattern,
    subscribe_timeout: Duration,
    auto_ack: bool,
    state: State,
    _payload: PhantomData<T>,
}

impl<T, C> Receiver<T, C>
where
    T: PayloadSerialize + Send + Sync + 'static,
    C: ManagedClient + MqttAck + Clone + Send + Sync + 'static,
    C::PubReceiver: Send + 'static,
{
    /// Build a new [`Receiver`] bound to `options.topic_pattern`.
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
        let telemetry_topic_filter =
            TopicFilter::new(topic_pattern.as_subscribe_topic()).map_err(|_| TopicTemplateError::Empty)?;
        let mqtt_receiver = client.create_filtered_pub_receiver(&telemetry_topic_filter);

        Ok(Self {
            mqtt_client: client,
            mqtt_receiver,
            telemetry_topic_filter,
            topic_pattern,
            subscribe_timeout: Duration::from_secs(options.subscribe_timeout_in_seconds),
            auto_ack: options.auto_ack,
            state: State::New,
            _payload: PhantomData,
        })
    }

    async fn try_subscribe(&mut self) -> Result<(), TelemetryError> {
        let completion = self
            .mqtt_client
            .subscribe(self.telemetry_topic_filter.as_str(), QoS::AtLeastOnce)
            .await?;
        match completion.wait().await {
            Ok(()) => {
                self.state = State::Subscribed;
                Ok(())
            }
            Err(e) => Err(TelemetryError::SubscribeRejected(e.to_string())),
        }
    }

    /// Receive the next telemetry message, or `None` once the underlying
    /// connection is gone.
    ///
    /// Subscribes (and races the subscribe timer) on the first call. A
    /// publish matching the bound topic that arrives before the SUBACK is
    /// itself treated as proof of subscription, per spec.
    pub async fn recv(&mut self) -> Option<Result<Message<T>, TelemetryError>> {
        if self.state == State::Faulted {
            return Some(Err(TelemetryError::SubscribeTimeout));
        }

        if self.state == State::New {
            let subscribe = self.try_subscribe();
            tokio::pin!(subscribe);
            tokio::select! {
                result = &mut subscribe => {
                    if let Err(e) = result {
                        return Some(Err(e));
                    }
                }
                publish = self.mqtt_receiver.recv() => {
                    return match publish {
                        Some(publish) => {
                            self.state = State::Subscribed;
                            Some(self.finish_publish(publish).await)
                        }
                        None => None,
                    };
                }
                () = tokio::time::sleep(self.subscribe_timeout) => {
                    self.state = State::Faulted;
                    log::error!("telemetry consumer subscribe timed out");
                    return Some(Err(TelemetryError::SubscribeTimeout));
                }
            }
        }

        let publish = self.mqtt_receiver.recv().await?;
        Some(self.finish_publish(publish).await)
    }

    async fn finish_publish(&self, publish: Publish) -> Result<Message<T>, TelemetryError> {
        if self.auto_ack {
            if let Err(e) = self.mqtt_client.ack(&publish).await {
                log::warn!("failed to ack telemetry publish: {e}");
            }
        }
        Message::from_publish(publish, &self.topic_pattern)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use iotcore_mqtt::control_packet::{PublishProperties, TopicName};

    use super::*;
    use crate::common::payload_serialize::FormatIndicator;

    #[derive(Clone, Debug)]
    struct TextPayload(String);

    impl PayloadSerialize for TextPayload {
        type SerializerError = String;

        fn content_type() -> &'static str {
            "text/plain"
        }

        fn format_indicator() -> FormatIndicator {
            FormatIndicator::Utf8EncodedCharacterData
        }

        fn serialize(&self) -> Result<Vec<u8>, String> {
            Ok(self.0.clone().into_bytes())
        }

        fn deserialize(payload: &[u8]) -> Result<Self, String> {
            String::from_utf8(payload.to_vec())
                .map(TextPayload)
                .map_err(|e| e.to_string())
        }
    }

    fn publish_with(user_properties: Vec<(String, String)>, content_type: Option<&str>, topic: &str) -> Publish {
        Publish {
            topic_name: TopicName::new(topic).unwrap(),
            payload: Bytes::from_static(b"hello"),
            qos: QoS::AtLeastOnce,
            retain: false,
            properties: Some(PublishProperties {
                content_type: content_type.map(str::to_string),
                user_properties,
                ..Default::default()
            }),
        }
    }

    fn pattern() -> TopicPattern {
        TopicPattern::new("svc/{deviceId}/telemetry", None, &HashMap::new()).unwrap()
    }

    #[test]
    fn extracts_content_type_and_custom_properties() {
        let publish = publish_with(
            vec![("region".to_string(), "west".to_string())],
            Some("text/plain"),
            "svc/device-1/telemetry",
        );
        let message = Message::<TextPayload>::from_publish(publish, &pattern()).unwrap();
        assert_eq!(message.content_type.as_deref(), Some("text/plain"));
        assert_eq!(message.custom_user_data, vec![("region".to_string(), "west".to_string())]);
        assert_eq!(message.payload.0, "hello");
        assert_eq!(message.topic_tokens.get("deviceId"), Some(&"device-1".to_string()));
    }

    #[test]
    fn strips_protocol_version_property_from_custom_data() {
        let publish = publish_with(
            vec![("__protVer".to_string(), "1.0".to_string())],
            None,
            "svc/device-1/telemetry",
        );
        let message = Message::<TextPayload>::from_publish(publish, &pattern()).unwrap();
        assert!(message.custom_user_data.is_empty());
    }

    #[test]
    fn rejects_unsupported_protocol_version() {
        let publish = publish_with(
            vec![("__protVer".to_string(), "2.0".to_string())],
            None,
            "svc/device-1/telemetry",
        );
        let result = Message::<TextPayload>::from_publish(publish, &pattern());
        assert!(matches!(result, Err(TelemetryError::Deserialization(_))));
    }

    #[test]
    fn defaults_to_qos1_and_ten_second_subscribe_timeout() {
        let options = OptionsBuilder::default()
            .topic_pattern("svc/{deviceId}/telemetry")
            .build()
            .unwrap();
        assert!(options.auto_ack);
        assert_eq!(options.subscribe_timeout_in_seconds, 10);
    }
}
