// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! RPC command invoker (component M): subscribes once to the response
//! topic template, issues correlated command requests, and matches each
//! inbound response back to its caller by MQTT-5 `correlation_data`.
//!
//! A single background task (spawned in [`Invoker::new`], mirroring the
//! teacher's `receive_response_loop`) owns the response
//! [`PubReceiver`](iotcore_mqtt::interface::PubReceiver) and fans responses
//! out to whichever [`Invoker::invoke`] call is waiting on that
//! correlation ID, so many invocations can be in flight concurrently
//! against one subscription.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use iotcore_mqtt::control_packet::{Publish, PublishProperties, QoS, TopicFilter};
use iotcore_mqtt::error::RpcError;
use iotcore_mqtt::interface::{ManagedClient, MqttPubSub, PubReceiver};
use tokio::sync::oneshot;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::common::payload_serialize::PayloadSerialize;
use crate::common::topic_processor::{TopicPattern, TopicTemplateError};
use crate::rpc::{status, DEFAULT_COMMAND_RESPONSE_TEMPLATE, STATUS_MESSAGE_PROPERTY, STATUS_PROPERTY};

/// Default cap on concurrently in-flight requests (spec §4.M / §6).
const DEFAULT_MAX_PENDING_REQUESTS: usize = 10;
/// Default per-request timeout, in seconds, when a [`Request`] does not
/// override it.
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;
/// Default seconds to wait for the response-topic SUBACK.
const DEFAULT_SUBSCRIBE_TIMEOUT_SECONDS: u64 = 10;

/// A single outbound command invocation.
#[derive(Clone, Debug)]
pub struct Request<Req: PayloadSerialize> {
    /// The command payload.
    pub payload: Req,
    /// `{executorId}` token value, if the bound template needs one.
    pub executor_id: Option<String>,
    /// Additional dynamic token values for the request/response templates.
    pub topic_tokens: HashMap<String, String>,
    /// How long to wait for a response before returning [`RpcError::Timeout`].
    pub timeout: Duration,
    /// Correlation ID to use; a random UUID is generated if `None`.
    pub correlation_id: Option<Bytes>,
    /// Additional MQTT-5 user properties to attach to the request.
    pub custom_user_data: Vec<(String, String)>,
}

impl<Req: PayloadSerialize> Request<Req> {
    /// Start building an invocation of `payload` with `timeout`.
    #[must_use]
    pub fn new(payload: Req, timeout: Duration) -> Self {
        Self {
            payload,
            executor_id: None,
            topic_tokens: HashMap::new(),
            timeout,
            correlation_id: None,
            custom_user_data: Vec::new(),
        }
    }

    /// Start building a request using the spec's default timeout (10s).
    #[must_use]
    pub fn with_default_timeout(payload: Req) -> Self {
        Self::new(payload, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS))
    }

    /// Set the `{executorId}` token value.
    #[must_use]
    pub fn with_executor_id(mut self, executor_id: impl Into<String>) -> Self {
        self.executor_id = Some(executor_id.into());
        self
    }

    /// Set additional dynamic topic token values.
    #[must_use]
    pub fn with_topic_tokens(mut self, topic_tokens: HashMap<String, String>) -> Self {
        self.topic_tokens = topic_tokens;
        self
    }

    /// Use an explicit correlation ID instead of a random one.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Bytes) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set additional MQTT-5 user properties.
    #[must_use]
    pub fn with_custom_user_data(mut self, custom_user_data: Vec<(String, String)>) -> Self {
        self.custom_user_data = custom_user_data;
        self
    }
}

/// A successfully matched command response.
#[derive(Debug, Clone)]
pub struct Response<Resp: PayloadSerialize> {
    /// The deserialized response payload.
    pub payload: Resp,
    /// `content_type` property carried on the response, if any.
    pub content_type: Option<String>,
    /// Every user property other than `status`/`status-message`.
    pub custom_user_data: Vec<(String, String)>,
}

/// Invoker options.
#[derive(Builder, Clone)]
#[builder(setter(into, strip_option))]
pub struct Options {
    /// Topic pattern used to publish command requests; see [`TopicPattern`].
    pub request_topic_pattern: String,
    /// Topic pattern used to subscribe for command responses. Defaults to
    /// the spec's `clients/{invokerClientId}/services/{modelId}/{executorId}/command/{commandName}/response`.
    #[builder(default = "crate::rpc::DEFAULT_COMMAND_RESPONSE_TEMPLATE.to_string()")]
    pub response_topic_pattern: String,
    /// Optional topic namespace prepended to both patterns.
    #[builder(default = "None")]
    pub topic_namespace: Option<String>,
    /// Token keys/values bound into both patterns at construction time
    /// (e.g. `modelId`, `commandName`); `invokerClientId` is bound
    /// automatically from the client's MQTT client ID.
    #[builder(default)]
    pub topic_token_map: HashMap<String, String>,
    /// Maximum number of concurrently in-flight requests. Spec default: 10.
    #[builder(default = "10")]
    pub max_pending_requests: usize,
    /// Seconds to wait for the response-topic SUBACK. Spec default: 10.
    #[builder(default = "10")]
    pub subscribe_timeout_in_seconds: u64,
}

struct PendingTable {
    entries: Mutex<HashMap<Bytes, oneshot::Sender<Publish>>>,
}

impl PendingTable {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a slot for `correlation_id`, or fail if the table is full or
    /// the ID is already in flight.
    fn insert(
        &self,
        correlation_id: Bytes,
        max_pending_requests: usize,
    ) -> Result<oneshot::Receiver<Publish>, RpcError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&correlation_id) {
            return Err(RpcError::InvalidTopic(
                "correlation_id already has a request in flight".to_string(),
            ));
        }
        if entries.len() >= max_pending_requests {
            return Err(RpcError::TooManyPendingRequests(max_pending_requests));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(correlation_id, tx);
        Ok(rx)
    }

    fn remove(&self, correlation_id: &Bytes) {
        self.entries.lock().unwrap().remove(correlation_id);
    }

    fn complete(&self, correlation_id: &Bytes, publish: Publish) -> bool {
        let sender = self.entries.lock().unwrap().remove(correlation_id);
        match sender {
            Some(tx) => tx.send(publish).is_ok(),
            None => false,
        }
    }
}

/// RPC command invoker (component M).
pub struct Invoker<Req, Resp, C>
where
    Req: PayloadSerialize + Send + Sync + 'static,
    Resp: PayloadSerialize + Send + Sync + 'static,
    C: ManagedClient + MqttPubSub + Clone + Send + Sync + 'static,
    C::PubReceiver: Send + 'static,
{
    mqtt_client: C,
    request_topic_pattern: TopicPattern,
    response_topic_pattern: TopicPattern,
    response_topic_filter: TopicFilter,
    pending: Arc<PendingTable>,
    subscribed: Arc<AsyncMutex<bool>>,
    subscribe_timeout: Duration,
    max_pending_requests: usize,
    cancel: CancellationToken,
    _req: PhantomData<Req>,
    _resp: PhantomData<Resp>,
}

impl<Req, Resp, C> Invoker<Req, Resp, C>
where
    Req: PayloadSerialize + Send + Sync + 'static,
    Resp: PayloadSerialize + Send + Sync + 'static,
    C: ManagedClient + MqttPubSub + Clone + Send + Sync + 'static,
    C::PubReceiver: Send + 'static,
{
    /// Build a new [`Invoker`] bound to `options`' request/response
    /// topic patterns. Spawns the background response-matching task.
    ///
    /// # Errors
    /// Returns [`TopicTemplateError`] if either pattern, the namespace, or
    /// any statically-bound token replacement is invalid.
    pub fn new(client: C, options: Options) -> Result<Self, TopicTemplateError> {
        let mut token_map = options.topic_token_map;
        token_map
            .entry("invokerClientId".to_string())
            .or_insert_with(|| client.client_id().to_string());

        let request_topic_pattern = TopicPattern::new(
            &options.request_topic_pattern,
            options.topic_namespace.as_deref(),
            &token_map,
        )?;
        let response_topic_pattern = TopicPattern::new(
            &options.response_topic_pattern,
            options.topic_namespace.as_deref(),
            &token_map,
        )?;
        let response_topic_filter =
            TopicFilter::new(response_topic_pattern.as_subscribe_topic()).map_err(|_| TopicTemplateError::Empty)?;

        let mqtt_receiver = client.create_filtered_pub_receiver(&response_topic_filter);
        let pending = Arc::new(PendingTable::new());
        let cancel = CancellationToken::new();

        tokio::spawn(receive_response_loop(mqtt_receiver, pending.clone(), cancel.clone()));

        Ok(Self {
            mqtt_client: client,
            request_topic_pattern,
            response_topic_pattern,
            response_topic_filter,
            pending,
            subscribed: Arc::new(AsyncMutex::new(false)),
            subscribe_timeout: Duration::from_secs(options.subscribe_timeout_in_seconds),
            max_pending_requests: options.max_pending_requests,
            cancel,
            _req: PhantomData,
            _resp: PhantomData,
        })
    }

    /// Subscribe to the response topic, if not already subscribed.
    /// Idempotent; safe to call from every [`Invoker::invoke`].
    async fn ensure_subscribed(&self) -> Result<(), RpcError> {
        let mut subscribed = self.subscribed.lock().await;
        if *subscribed {
            return Ok(());
        }
        let completion = self
            .mqtt_client
            .subscribe(self.response_topic_filter.as_str(), QoS::AtLeastOnce)
            .await?;
        match tokio::time::timeout(self.subscribe_timeout, completion.wait()).await {
            Ok(Ok(())) => {
                *subscribed = true;
                Ok(())
            }
            Ok(Err(e)) => Err(RpcError::SubscribeRejected(e.to_string())),
            Err(_) => {
                log::warn!("rpc invoker response-topic subscribe timed out");
                Err(RpcError::SubscribeRejected("subscribe timed out".to_string()))
            }
        }
    }

    /// Invoke a command and await its response.
    ///
    /// # Errors
    /// Returns [`RpcError::TooManyPendingRequests`] if
    /// `max_pending_requests` in-flight requests are already outstanding,
    /// [`RpcError::Timeout`] if no response arrives within
    /// `request.timeout`, or the executor's non-success `status` mapped to
    /// [`RpcError::ExecutionFailed`].
    pub async fn invoke(&self, request: Request<Req>) -> Result<Response<Resp>, RpcError> {
        self.ensure_subscribed().await?;

        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Bytes::copy_from_slice(Uuid::new_v4().as_bytes()));

        let response_rx = self.pending.insert(correlation_id.clone(), self.max_pending_requests)?;

        if let Err(e) = self.publish_request(&request, &correlation_id).await {
            self.pending.remove(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(request.timeout, response_rx).await {
            Ok(Ok(publish)) => parse_response(&publish),
            Ok(Err(_)) => {
                // Sender dropped without a value; treat as a timeout, the
                // invoker is shutting down.
                Err(RpcError::Timeout)
            }
            Err(_) => {
                self.pending.remove(&correlation_id);
                Err(RpcError::Timeout)
            }
        }
    }

    async fn publish_request(&self, request: &Request<Req>, correlation_id: &Bytes) -> Result<(), RpcError> {
        let mut tokens = request.topic_tokens.clone();
        if let Some(executor_id) = &request.executor_id {
            tokens.entry("executorId".to_string()).or_insert_with(|| executor_id.clone());
        }

        let request_topic = self
            .request_topic_pattern
            .as_publish_topic(&tokens)
            .map_err(|e| RpcError::InvalidTopic(e.to_string()))?;
        let response_topic = self
            .response_topic_pattern
            .as_publish_topic(&tokens)
            .map_err(|e| RpcError::InvalidTopic(e.to_string()))?;

        let payload = request
            .payload
            .serialize()
            .map_err(|e| RpcError::Serialization(format!("{e:?}")))?;

        let properties = PublishProperties {
            correlation_data: Some(correlation_id.clone()),
            response_topic: Some(response_topic),
            content_type: Some(Req::content_type().to_string()),
            message_expiry_interval: Some(u32::try_from(request.timeout.as_secs()).unwrap_or(u32::MAX)),
            user_properties: request.custom_user_data.clone(),
            ..Default::default()
        };

        self.mqtt_client
            .publish_with_properties(request_topic, QoS::AtLeastOnce, false, payload, properties)
            .await?
            .wait()
            .await
            .map_err(|e| RpcError::Publish(iotcore_mqtt::error::PublishError::new(iotcore_mqtt::error::PublishErrorKind::Transport(e.to_string()))))?;
        Ok(())
    }
}

impl<Req, Resp, C> Drop for Invoker<Req, Resp, C>
where
    Req: PayloadSerialize + Send + Sync + 'static,
    Resp: PayloadSerialize + Send + Sync + 'static,
    C: ManagedClient + MqttPubSub + Clone + Send + Sync + 'static,
    C::PubReceiver: Send + 'static,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Background task owning the response [`PubReceiver`]: routes each
/// inbound publish to the [`Invoker::invoke`] call awaiting its
/// `correlation_data`, dropping anything unmatched.
async fn receive_response_loop<R: PubReceiver>(mut receiver: R, pending: Arc<PendingTable>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            publish = receiver.recv() => {
                let Some(publish) = publish else { return };
                let Some(correlation_id) = publish.correlation_data().cloned() else {
                    log::warn!("rpc response missing correlation_data, dropping");
                    continue;
                };
                if !pending.complete(&correlation_id, publish) {
                    log::debug!("rpc response for unknown or already-completed correlation id, dropping");
                }
            }
        }
    }
}

fn parse_response<Resp: PayloadSerialize>(publish: &Publish) -> Result<Response<Resp>, RpcError> {
    let status_code: u16 = publish
        .user_property(STATUS_PROPERTY)
        .ok_or_else(|| RpcError::Deserialization("response missing 'status' user property".to_string()))?
        .parse()
        .map_err(|_| RpcError::Deserialization("response 'status' is not a valid integer".to_string()))?;

    if status_code != status::OK {
        let message = publish
            .user_property(STATUS_MESSAGE_PROPERTY)
            .map(str::to_string)
            .unwrap_or_default();
        return Err(RpcError::ExecutionFailed(format!("{status_code}: {message}")));
    }

    let payload = Resp::deserialize(&publish.payload).map_err(|e| RpcError::Deserialization(format!("{e:?}")))?;
    let content_type = publish.content_type().map(str::to_owned);
    let custom_user_data = publish
        .properties
        .as_ref()
        .map(|p| {
            p.user_properties
                .iter()
                .filter(|(k, _)| k != STATUS_PROPERTY && k != STATUS_MESSAGE_PROPERTY)
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    Ok(Response {
        payload,
        content_type,
        custom_user_data,
    })
}

#[cfg(test)]
mod tests {
    use iotcore_mqtt::control_packet::TopicName;

    use super::*;

    fn publish_with(status_code: u16, message: Option<&str>, payload: &'static [u8]) -> Publish {
        let mut user_properties = vec![(STATUS_PROPERTY.to_string(), status_code.to_string())];
        if let Some(message) = message {
            user_properties.push((STATUS_MESSAGE_PROPERTY.to_string(), message.to_string()));
        }
        Publish {
            topic_name: TopicName::new("clients/invoker-1/services/v1/exec1/command/unlock/response").unwrap(),
            payload: Bytes::from_static(payload),
            qos: QoS::AtLeastOnce,
            retain: false,
            properties: Some(PublishProperties {
                content_type: Some("application/json".to_string()),
                user_properties,
                ..Default::default()
            }),
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct TextPayload(String);

    impl PayloadSerialize for TextPayload {
        type SerializerError = String;
        fn content_type() -> &'static str {
            "application/json"
        }
        fn format_indicator() -> crate::common::payload_serialize::FormatIndicator {
            crate::common::payload_serialize::FormatIndicator::Utf8EncodedCharacterData
        }
        fn serialize(&self) -> Result<Vec<u8>, String> {
            Ok(self.0.clone().into_bytes())
        }
        fn deserialize(payload: &[u8]) -> Result<Self, String> {
            String::from_utf8(payload.to_vec()).map(TextPayload).map_err(|e| e.to_string())
        }
    }

    #[test]
    fn parse_response_maps_ok_status_to_success() {
        let publish = publish_with(status::OK, None, b"pong");
        let response = parse_response::<TextPayload>(&publish).unwrap();
        assert_eq!(response.payload, TextPayload("pong".to_string()));
    }

    #[test]
    fn parse_response_maps_non_ok_status_to_execution_failed() {
        let publish = publish_with(status::INTERNAL_SERVER_ERROR, Some("boom"), b"");
        let err = parse_response::<TextPayload>(&publish).unwrap_err();
        assert!(matches!(err, RpcError::ExecutionFailed(msg) if msg.contains("boom")));
    }

    #[test]
    fn parse_response_missing_status_is_an_error() {
        let publish = Publish {
            topic_name: TopicName::new("clients/invoker-1/response").unwrap(),
            payload: Bytes::from_static(b"pong"),
            qos: QoS::AtLeastOnce,
            retain: false,
            properties: Some(PublishProperties::default()),
        };
        let err = parse_response::<TextPayload>(&publish).unwrap_err();
        assert!(matches!(err, RpcError::Deserialization(_)));
    }

    #[test]
    fn pending_table_rejects_eleventh_request_at_default_capacity() {
        let table = PendingTable::new();
        for i in 0..DEFAULT_MAX_PENDING_REQUESTS {
            table
                .insert(Bytes::from(i.to_string()), DEFAULT_MAX_PENDING_REQUESTS)
                .unwrap();
        }
        let err = table
            .insert(Bytes::from_static(b"eleventh"), DEFAULT_MAX_PENDING_REQUESTS)
            .unwrap_err();
        assert!(matches!(err, RpcError::TooManyPendingRequests(10)));
    }

    #[test]
    fn defaults_match_spec() {
        let options = OptionsBuilder::default()
            .request_topic_pattern("services/{modelId}/{executorId}/command/{commandName}/request")
            .build()
            .unwrap();
        assert_eq!(options.max_pending_requests, DEFAULT_MAX_PENDING_REQUESTS);
        assert_eq!(options.subscribe_timeout_in_seconds, DEFAULT_SUBSCRIBE_TIMEOUT_SECONDS);
        assert_eq!(options.response_topic_pattern, DEFAULT_COMMAND_RESPONSE_TEMPLATE);
    }
}
