// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The one concrete MQTT transport adapter (component G) this core ships:
//! a thin wrapper over `rumqttc`, the one published MQTT 5 client crate in
//! the dependency stack. Re-implementing the wire codec from scratch is out
//! of scope (see the crate's module docs).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::control_packet::{
    Publish, PublishProperties, QoS, SubscribeProperties, TopicError, TopicFilter, TopicName,
    UnsubscribeProperties,
};
use crate::error::{ConnectErrorKind, PublishError, PublishErrorKind};
use crate::interface::{
    CompletionToken, InternalClient, ManagedClient, MqttAck, MqttDisconnect, MqttEventLoop,
    MqttPubSub, PubReceiver,
};

/// Backlog each per-filter broadcast channel can hold before a slow
/// receiver starts lagging (and skipping messages rather than blocking
/// dispatch).
const RECEIVER_CHANNEL_CAPACITY: usize = 256;

/// Wraps `rumqttc::v5::EventLoop`, translating its polling contract into
/// [`MqttEventLoop`].
pub struct RumqttcEventLoop {
    inner: rumqttc::v5::EventLoop,
}

impl RumqttcEventLoop {
    /// Wrap an already-constructed event loop.
    #[must_use]
    pub fn new(inner: rumqttc::v5::EventLoop) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MqttEventLoop for RumqttcEventLoop {
    type Event = rumqttc::v5::Event;

    async fn poll(&mut self) -> Result<Self::Event, ConnectErrorKind> {
        self.inner
            .poll()
            .await
            .map_err(|e| ConnectErrorKind::Transport(e.to_string()))
    }
}

/// Broadcast-backed [`PubReceiver`]. Every topic filter gets its own
/// channel, fed by [`RumqttcClient::dispatch_publish`] as publishes arrive
/// off the event loop; a lagging receiver skips missed messages rather than
/// stalling dispatch for everyone else.
pub struct RumqttcPubReceiver {
    rx: broadcast::Receiver<Publish>,
}

#[async_trait]
impl PubReceiver for RumqttcPubReceiver {
    async fn recv(&mut self) -> Option<Publish> {
        loop {
            match self.rx.recv().await {
                Ok(publish) => return Some(publish),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("pub receiver lagged, skipped {skipped} publishes");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The `rumqttc`-backed [`ManagedClient`]/[`InternalClient`].
///
/// Owns no connection state of its own: the session's event loop (component
/// J) polls [`RumqttcEventLoop`] and calls [`RumqttcClient::dispatch_publish`]
/// for every inbound publish; this type only tracks the fan-out table from
/// topic filter to receiver.
pub struct RumqttcClient {
    client_id: String,
    client: rumqttc::v5::AsyncClient,
    receivers: Mutex<HashMap<TopicFilter, broadcast::Sender<Publish>>>,
}

impl RumqttcClient {
    /// Wrap an already-constructed `rumqttc` client.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client: rumqttc::v5::AsyncClient) -> Self {
        Self {
            client_id: client_id.into(),
            client,
            receivers: Mutex::new(HashMap::new()),
        }
    }

    /// Fan an inbound publish out to every receiver whose filter matches its
    /// topic name.
    pub fn dispatch_publish(&self, publish: Publish) {
        let receivers = self.receivers.lock().unwrap();
        let mut delivered = false;
        for (filter, tx) in receivers.iter() {
            if filter.matches_topic_name(&publish.topic_name) {
                delivered = tx.send(publish.clone()).is_ok() || delivered;
            }
        }
        if !delivered {
            log::trace!("publish on '{}' matched no registered receiver", publish.topic_name);
        }
    }
}

/// Convert a wire-level inbound publish into the transport-agnostic
/// [`Publish`] used throughout the rest of the crate.
pub fn convert_incoming_publish(
    incoming: rumqttc::v5::mqttbytes::v5::Publish,
) -> Result<Publish, TopicError> {
    Ok(Publish {
        topic_name: TopicName::new(String::from_utf8_lossy(&incoming.topic).into_owned())?,
        payload: incoming.payload,
        qos: incoming.qos,
        retain: incoming.retain,
        properties: incoming.properties,
    })
}

#[async_trait]
impl MqttPubSub for RumqttcClient {
    async fn publish(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
    ) -> Result<CompletionToken, PublishError> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map(CompletionToken)
            .map_err(|e| PublishError::new(PublishErrorKind::Transport(e.to_string())))
    }

    async fn publish_with_properties(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
        properties: PublishProperties,
    ) -> Result<CompletionToken, PublishError> {
        self.client
            .publish_with_properties(topic, qos, retain, payload, properties)
            .await
            .map(CompletionToken)
            .map_err(|e| PublishError::new(PublishErrorKind::Transport(e.to_string())))
    }

    async fn subscribe(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
    ) -> Result<CompletionToken, PublishError> {
        self.client
            .subscribe(topic, qos)
            .await
            .map(CompletionToken)
            .map_err(|e| PublishError::new(PublishErrorKind::Transport(e.to_string())))
    }

    async fn subscribe_with_properties(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        properties: SubscribeProperties,
    ) -> Result<CompletionToken, PublishError> {
        self.client
            .subscribe_with_properties(topic, qos, properties)
            .await
            .map(CompletionToken)
            .map_err(|e| PublishError::new(PublishErrorKind::Transport(e.to_string())))
    }

    async fn unsubscribe(
        &self,
        topic: impl Into<String> + Send,
    ) -> Result<CompletionToken, PublishError> {
        self.client
            .unsubscribe(topic)
            .await
            .map(CompletionToken)
            .map_err(|e| PublishError::new(PublishErrorKind::Transport(e.to_string())))
    }

    async fn unsubscribe_with_properties(
        &self,
        topic: impl Into<String> + Send,
        properties: UnsubscribeProperties,
    ) -> Result<CompletionToken, PublishError> {
        self.client
            .unsubscribe_with_properties(topic, properties)
            .await
            .map(CompletionToken)
            .map_err(|e| PublishError::new(PublishErrorKind::Transport(e.to_string())))
    }
}

#[async_trait]
impl MqttAck for RumqttcClient {
    async fn ack(&self, _publish: &Publish) -> Result<(), PublishError> {
        // rumqttc auto-acknowledges QoS 1 publishes as they are polled off
        // the event loop; manual acking is not exposed by this adapter
        // since every sub-client in this core uses QoS 1 by default.
        Ok(())
    }
}

#[async_trait]
impl MqttDisconnect for RumqttcClient {
    async fn disconnect(&self) -> Result<(), PublishError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| PublishError::new(PublishErrorKind::Transport(e.to_string())))
    }
}

#[async_trait]
impl InternalClient for RumqttcClient {}

impl ManagedClient for RumqttcClient {
    type PubReceiver = RumqttcPubReceiver;

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn create_filtered_pub_receiver(&self, topic_filter: &TopicFilter) -> Self::PubReceiver {
        let mut receivers = self.receivers.lock().unwrap();
        let tx = receivers
            .entry(topic_filter.clone())
            .or_insert_with(|| broadcast::channel(RECEIVER_CHANNEL_CAPACITY).0)
            .clone();
        RumqttcPubReceiver { rx: tx.subscribe() }
    }
}
