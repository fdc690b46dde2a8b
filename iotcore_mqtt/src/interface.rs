// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Traits defining the transport adapter contract (component G): what a
//! concrete MQTT transport must accept (connect/sub/unsub/pub/disconnect)
//! and what it must eventually deliver back (the matching `*_RSP` event, or
//! an inbound publish).
//!
//! Of the transport shapes this project inherited, this is the one kept:
//! a thin async trait set backed by [`rumqttc`], the one published MQTT
//! client crate in the dependency stack. A from-scratch MQTT wire codec is
//! out of scope for this core.

use async_trait::async_trait;
use bytes::Bytes;

use crate::control_packet::{Publish, PublishProperties, QoS, SubscribeProperties, UnsubscribeProperties};
use crate::error::{CompletionError, ConnectErrorKind, PublishError};

/// Awaitable token indicating completion of MQTT message delivery
/// (the matching PUBACK/SUBACK/UNSUBACK having been received).
pub struct CompletionToken(pub rumqttc::NoticeFuture);

impl CompletionToken {
    /// Wait for the acknowledgement to arrive.
    ///
    /// # Errors
    /// Returns [`CompletionError`] if the broker's response indicated failure.
    pub async fn wait(self) -> Result<(), CompletionError> {
        self.0
            .wait_async()
            .await
            .map_err(|e| CompletionError(e.to_string()))
    }
}

/// MQTT publish, subscribe, and unsubscribe functionality.
#[async_trait]
pub trait MqttPubSub {
    /// Publish a message. If the connection is currently unavailable, the
    /// publish is queued and sent once reconnected.
    async fn publish(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
    ) -> Result<CompletionToken, PublishError>;

    /// As [`MqttPubSub::publish`], with MQTT 5 properties attached.
    async fn publish_with_properties(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
        properties: PublishProperties,
    ) -> Result<CompletionToken, PublishError>;

    /// Subscribe to a topic filter.
    async fn subscribe(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
    ) -> Result<CompletionToken, PublishError>;

    /// As [`MqttPubSub::subscribe`], with MQTT 5 properties attached.
    async fn subscribe_with_properties(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        properties: SubscribeProperties,
    ) -> Result<CompletionToken, PublishError>;

    /// Unsubscribe from a topic filter.
    async fn unsubscribe(&self, topic: impl Into<String> + Send) -> Result<CompletionToken, PublishError>;

    /// As [`MqttPubSub::unsubscribe`], with MQTT 5 properties attached.
    async fn unsubscribe_with_properties(
        &self,
        topic: impl Into<String> + Send,
        properties: UnsubscribeProperties,
    ) -> Result<CompletionToken, PublishError>;
}

/// Acknowledging a received QoS 1 publish.
#[async_trait]
pub trait MqttAck {
    /// Acknowledge a received publish.
    async fn ack(&self, publish: &Publish) -> Result<(), PublishError>;
}

/// Disconnecting from the broker.
#[async_trait]
pub trait MqttDisconnect {
    /// Disconnect from the MQTT broker.
    async fn disconnect(&self) -> Result<(), PublishError>;
}

/// Internal, lower-level client surface used by the connection state
/// machine (component J); not intended for sub-client use.
#[async_trait]
pub trait InternalClient: MqttPubSub + MqttAck + MqttDisconnect {}

/// Polling the underlying transport's event loop.
#[async_trait]
pub trait MqttEventLoop {
    /// The event type yielded by this event loop.
    type Event: Send;

    /// Poll for the next event (connack, suback, puback, pub-recv, disconnect, ...).
    async fn poll(&mut self) -> Result<Self::Event, ConnectErrorKind>;
}

/// An MQTT client whose connection lifecycle is managed externally (by the
/// connection state machine), used to send messages and create receivers.
pub trait ManagedClient: MqttPubSub {
    /// The receiver type produced for this client's subscriptions.
    type PubReceiver: PubReceiver;

    /// The client ID presented on the underlying MQTT connection.
    fn client_id(&self) -> &str;

    /// Register a new receiver for publishes matching `topic_filter`.
    fn create_filtered_pub_receiver(
        &self,
        topic_filter: &crate::control_packet::TopicFilter,
    ) -> Self::PubReceiver;
}

/// Receiver for incoming MQTT publishes dispatched by the pipeline.
#[async_trait]
pub trait PubReceiver: Send {
    /// Receive the next matching publish, or `None` once the connection that
    /// produced this receiver is gone.
    async fn recv(&mut self) -> Option<Publish>;
}
