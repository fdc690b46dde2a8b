// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! RPC command executor (component L): subscribes to a command-request
//! topic template, correlates each inbound request by its MQTT-5
//! `correlation_data`/`response_topic` properties, and publishes exactly
//! one response per request — either the application's, via
//! [`Request::complete`], or (if `command_execution_timeout_s` elapses
//! first) an automatic [`status::GATEWAY_TIMEOUT`] response.
//!
//! Subscribing follows the same `New -> Subscribed -> Faulted` shape as
//! [`crate::telemetry::Receiver`]: a `SUB_REQ` is raced against the
//! subscribe timer, and a matching publish arriving before the SUBACK is
//! itself treated as proof of subscription.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;

use bytes::Bytes;
use iotcore_mqtt::control_packet::{Publish, PublishProperties, QoS, TopicFilter};
use iotcore_mqtt::error::RpcError;
use iotcore_mqtt::interface::{ManagedClient, MqttAck, MqttPubSub, PubReceiver};
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};

use crate::common::payload_serialize::PayloadSerialize;
use crate::common::topic_processor::{TopicPattern, TopicTemplateError};
use crate::rpc::{status, DEFAULT_COMMAND_REQUEST_TEMPLATE, STATUS_MESSAGE_PROPERTY, STATUS_PROPERTY};

/// Default seconds an executor waits for the application to [`Request::complete`]
/// a request before auto-responding with [`status::GATEWAY_TIMEOUT`].
const DEFAULT_EXECUTION_TIMEOUT_SECONDS: u64 = 10;
/// Default seconds an executor waits for its command-topic SUBACK.
const DEFAULT_SUBSCRIBE_TIMEOUT_SECONDS: u64 = 10;
/// Message published on the auto-timeout response, per spec §4.L.
const EXECUTION_TIMEOUT_MESSAGE: &str = "Command Server timeout";

/// A command request delivered to the application by [`Executor::recv`].
///
/// Dropping a `Request` without calling [`Request::complete`] has the same
/// effect as letting the execution timer fire: the executor still
/// auto-publishes the timeout response in its place.
pub struct Request<Req, Resp>
where
    Req: PayloadSerialize,
    Resp: PayloadSerialize,
{
    /// The deserialized command payload.
    pub payload: Req,
    /// `content_type` property carried on the request, if any.
    pub content_type: Option<String>,
    /// Every user property other than those MQTT-5 reserves for correlation.
    pub custom_user_data: Vec<(String, String)>,
    /// Token values extracted from the request topic against the bound template.
    pub topic_tokens: HashMap<String, String>,
    response_tx: oneshot::Sender<Response<Resp>>,
    completion_rx: oneshot::Receiver<Result<(), RpcError>>,
    _payload: PhantomData<Req>,
}

impl<Req, Resp> Request<Req, Resp>
where
    Req: PayloadSerialize,
    Resp: PayloadSerialize,
{
    /// Hand `response` to the executor to be serialized and published on
    /// this request's `response_topic`.
    ///
    /// # Errors
    /// Returns [`RpcError::Timeout`] if the execution timer already fired
    /// and published the automatic timeout response in its place, or the
    /// publish's own error if it failed.
    pub async fn complete(self, response: Response<Resp>) -> Result<(), RpcError> {
        // If the receiver has already been dropped (the execution timer
        // fired), this send is a no-op; the await below reports why.
        let _ = self.response_tx.send(response);
        self.completion_rx.await.map_err(|_| RpcError::Timeout)?
    }

    /// Whether the executor has stopped waiting for a response to this
    /// request (the execution timer fired, or the executor was dropped).
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.response_tx.is_closed()
    }
}

/// A command response, built by the application and handed to [`Request::complete`].
#[derive(Debug, Clone)]
pub struct Response<Resp: PayloadSerialize> {
    /// The response payload.
    pub payload: Resp,
    /// HTTP-like status code, per [`status`]. Default [`status::OK`].
    pub status: u16,
    /// Human-readable detail accompanying a non-success `status`.
    pub status_message: Option<String>,
    /// Additional MQTT-5 user properties beyond `status`/`status-message`.
    pub custom_user_data: Vec<(String, String)>,
}

impl<Resp: PayloadSerialize> Response<Resp> {
    /// A successful ([`status::OK`]) response carrying `payload`.
    #[must_use]
    pub fn ok(payload: Resp) -> Self {
        Self {
            payload,
            status: status::OK,
            status_message: None,
            custom_user_data: Vec::new(),
        }
    }

    /// Set this response's status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set this response's status message.
    #[must_use]
    pub fn with_status_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    /// Set this response's custom user properties.
    #[must_use]
    pub fn with_custom_user_data(mut self, custom_user_data: Vec<(String, String)>) -> Self {
        self.custom_user_data = custom_user_data;
        self
    }
}

/// Executor options.
#[derive(Builder, Clone)]
#[builder(setter(into, strip_option))]
pub struct Options {
    /// Topic pattern for the command request; see [`TopicPattern`]. Defaults
    /// to the spec's `services/{modelId}/{executorId}/command/{commandName}/request`.
    #[builder(default = "crate::rpc::DEFAULT_COMMAND_REQUEST_TEMPLATE.to_string()")]
    topic_pattern: String,
    /// Optional topic namespace prepended to the pattern.
    #[builder(default = "None")]
    topic_namespace: Option<String>,
    /// Token keys/values bound into the pattern at construction time (e.g.
    /// `modelId`, `executorId`, `commandName`).
    #[builder(default)]
    topic_token_map: HashMap<String, String>,
    /// If set, a request whose `content_type` does not match this value is
    /// rejected with [`status::UNSUPPORTED_MEDIA_TYPE`] instead of being
    /// delivered to the application.
    #[builder(default = "None")]
    content_type: Option<String>,
    /// Seconds to wait for the SUBACK (or an implicit matching publish)
    /// before faulting. Spec default: 10.
    #[builder(default = "10")]
    subscribe_timeout_in_seconds: u64,
    /// Seconds to wait for [`Request::complete`] before auto-responding
    /// with [`status::GATEWAY_TIMEOUT`]. Spec default: 10.
    #[builder(default = "10")]
    command_execution_timeout_s: u64,
}

/// Subscription progress, mirroring [`crate::telemetry::receiver`]'s state shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Subscribed,
    Faulted,
}

/// RPC command executor (component L).
pub struct Executor<Req, Resp, C>
where
    Req: PayloadSerialize + Send + Sync + 'static,
    Resp: PayloadSerialize + Send + Sync + 'static,
    C: ManagedClient + MqttAck + MqttPubSub + Clone + Send + Sync + 'static,
    C::PubReceiver: Send + 'static,
{
    mqtt_client: C,
    mqtt_receiver: C::PubReceiver,
    command_topic_filter: TopicFilter,
    topic_pattern: TopicPattern,
    expected_content_type: Option<String>,
    subscribe_timeout: Duration,
    execution_timeout: Duration,
    state: State,
    _req: PhantomData<Req>,
    _resp: PhantomData<Resp>,
}

impl<Req, Resp, C> Executor<Req, Resp, C>
where
    Req: PayloadSerialize + Send + Sync + 'static,
    Resp: PayloadSerialize + Send + Sync + 'static,
    C: ManagedClient + MqttAck + MqttPubSub + Clone + Send + Sync + 'static,
    C::PubReceiver: Send + 'static,
{
    /// Build a new [`Executor`] bound to `options.topic_pattern`.
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
        let command_topic_filter =
            TopicFilter::new(topic_pattern.as_subscribe_topic()).map_err(|_| TopicTemplateError::Empty)?;
        let mqtt_receiver = client.create_filtered_pub_receiver(&command_topic_filter);

        Ok(Self {
            mqtt_client: client,
            mqtt_receiver,
            command_topic_filter,
            topic_pattern,
            expected_content_type: options.content_type,
            subscribe_timeout: Duration::from_secs(options.subscribe_timeout_in_seconds),
            execution_timeout: Duration::from_secs(options.command_execution_timeout_s),
            state: State::New,
            _req: PhantomData,
            _resp: PhantomData,
        })
    }

    async fn try_subscribe(&mut self) -> Result<(), RpcError> {
        let completion = self
            .mqtt_client
            .subscribe(self.command_topic_filter.as_str(), QoS::AtLeastOnce)
            .await?;
        match completion.wait().await {
            Ok(()) => {
                self.state = State::Subscribed;
                Ok(())
            }
            Err(e) => Err(RpcError::SubscribeRejected(e.to_string())),
        }
    }

    /// Receive the next command request, or `None` once the underlying
    /// connection is gone.
    ///
    /// Subscribes (and races the subscribe timer) on the first call, as
    /// [`crate::telemetry::Receiver::recv`] does. A request whose
    /// `content_type` does not match the configured one, or that is
    /// missing `correlation_data`/`response_topic`, is answered or dropped
    /// in-line and never surfaced to the caller; the next call resumes
    /// waiting for the following request.
    pub async fn recv(&mut self) -> Option<Result<Request<Req, Resp>, RpcError>> {
        loop {
            if self.state == State::Faulted {
                return Some(Err(RpcError::SubscribeRejected("subscribe timed out".to_string())));
            }

            let publish = if self.state == State::New {
                let subscribe = self.try_subscribe();
                tokio::pin!(subscribe);
                tokio::select! {
                    result = &mut subscribe => {
                        if let Err(e) = result {
                            return Some(Err(e));
                        }
                        match self.mqtt_receiver.recv().await {
                            Some(publish) => publish,
                            None => return None,
                        }
                    }
                    publish = self.mqtt_receiver.recv() => {
                        match publish {
                            Some(publish) => {
                                self.state = State::Subscribed;
                                publish
                            }
                            None => return None,
                        }
                    }
                    () = tokio::time::sleep(self.subscribe_timeout) => {
                        self.state = State::Faulted;
                        log::error!("rpc executor subscribe timed out");
                        return Some(Err(RpcError::SubscribeRejected("subscribe timed out".to_string())));
                    }
                }
            } else {
                match self.mqtt_receiver.recv().await {
                    Some(publish) => publish,
                    None => return None,
                }
            };

            if let Some(request) = self.handle_publish(publish).await {
                return Some(Ok(request));
            }
        }
    }

    /// Turn one inbound publish into a delivered [`Request`], or handle it
    /// in-line (auto-response / drop) and return `None` to keep waiting.
    async fn handle_publish(&self, publish: Publish) -> Option<Request<Req, Resp>> {
        let Some(correlation_data) = publish.correlation_data().cloned() else {
            log::warn!("rpc command request missing correlation_data, dropping");
            return None;
        };
        let Some(response_topic) = publish.response_topic().map(str::to_string) else {
            log::warn!("rpc command request missing response_topic, dropping");
            return None;
        };

        let content_type = publish.content_type().map(str::to_owned);
        if let Some(expected) = &self.expected_content_type {
            if content_type.as_deref() != Some(expected.as_str()) {
                log::warn!("rpc command request content_type mismatch, responding {}", status::UNSUPPORTED_MEDIA_TYPE);
                self.auto_respond(
                    &response_topic,
                    &correlation_data,
                    status::UNSUPPORTED_MEDIA_TYPE,
                    "unsupported content_type",
                )
                .await;
                return None;
            }
        }

        let payload = match Req::deserialize(&publish.payload) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("rpc command request payload failed to deserialize: {e:?}");
                self.auto_respond(&response_topic, &correlation_data, status::BAD_REQUEST, "malformed request payload")
                    .await;
                return None;
            }
        };

        let properties = publish.properties.clone().unwrap_or_default();
        let custom_user_data = properties.user_properties;
        let topic_tokens = self.topic_pattern.parse_tokens(publish.topic_name.as_str());

        let (response_tx, response_rx) = oneshot::channel();
        let (completion_tx, completion_rx) = oneshot::channel();

        let deadline = Instant::now() + self.execution_timeout;
        tokio::spawn(run_execution_timer(
            self.mqtt_client.clone(),
            response_topic,
            correlation_data,
            deadline,
            response_rx,
            completion_tx,
        ));

        Some(Request {
            payload,
            content_type,
            custom_user_data,
            topic_tokens,
            response_tx,
            completion_rx,
            _payload: PhantomData,
        })
    }

    async fn auto_respond(&self, response_topic: &str, correlation_data: &Bytes, status: u16, message: &str) {
        let properties = build_response_properties::<Resp>(correlation_data.clone(), status, Some(message.to_string()), None);
        if let Err(e) = self
            .mqtt_client
            .publish_with_properties(response_topic.to_string(), QoS::AtLeastOnce, false, Bytes::new(), properties)
            .await
        {
            log::warn!("failed to auto-respond to rpc command request: {e}");
        }
    }
}

/// Race the application completing the request against `deadline`.
///
/// On completion, serialize and publish the application's response, then
/// report the publish outcome back through `completion_tx` so
/// [`Request::complete`] can return it. On timeout, publish the automatic
/// [`status::GATEWAY_TIMEOUT`] response; `completion_tx` is simply dropped,
/// so a late [`Request::complete`] observes [`RpcError::Timeout`].
async fn run_execution_timer<C, Resp>(
    mqtt_client: C,
    response_topic: String,
    correlation_data: Bytes,
    deadline: Instant,
    response_rx: oneshot::Receiver<Response<Resp>>,
    completion_tx: oneshot::Sender<Result<(), RpcError>>,
) where
    C: MqttPubSub,
    Resp: PayloadSerialize,
{
    match timeout(deadline.saturating_duration_since(Instant::now()), response_rx).await {
        Ok(Ok(response)) => {
            let result = publish_response(&mqtt_client, &response_topic, correlation_data, response).await;
            let _ = completion_tx.send(result);
        }
        Ok(Err(_)) => {
            // The Request was dropped without calling complete(); nothing
            // to publish. Fall through to an implicit timeout response so
            // the invoker is never left hanging.
            publish_timeout_response::<C, Resp>(&mqtt_client, &response_topic, correlation_data).await;
        }
        Err(_) => {
            log::warn!("rpc command execution timed out, auto-responding {}", status::GATEWAY_TIMEOUT);
            publish_timeout_response::<C, Resp>(&mqtt_client, &response_topic, correlation_data).await;
        }
    }
}

async fn publish_timeout_response<C, Resp>(mqtt_client: &C, response_topic: &str, correlation_data: Bytes)
where
    C: MqttPubSub,
    Resp: PayloadSerialize,
{
    let properties = build_response_properties::<Resp>(
        correlation_data,
        status::GATEWAY_TIMEOUT,
        Some(EXECUTION_TIMEOUT_MESSAGE.to_string()),
        None,
    );
    if let Err(e) = mqtt_client
        .publish_with_properties(response_topic.to_string(), QoS::AtLeastOnce, false, Bytes::new(), properties)
        .await
    {
        log::warn!("failed to publish rpc command timeout response: {e}");
    }
}

async fn publish_response<C, Resp>(
    mqtt_client: &C,
    response_topic: &str,
    correlation_data: Bytes,
    response: Response<Resp>,
) -> Result<(), RpcError>
where
    C: MqttPubSub,
    Resp: PayloadSerialize,
{
    let payload = response
        .payload
        .serialize()
        .map_err(|e| RpcError::Serialization(format!("{e:?}")))?;
    let mut properties = build_response_properties::<Resp>(
        correlation_data,
        response.status,
        response.status_message,
        Some(response.custom_user_data),
    );
    properties.content_type = Some(Resp::content_type().to_string());

    mqtt_client
        .publish_with_properties(response_topic.to_string(), QoS::AtLeastOnce, false, payload, properties)
        .await?
        .wait()
        .await
        .map_err(|e| RpcError::Publish(iotcore_mqtt::error::PublishError::new(iotcore_mqtt::error::PublishErrorKind::Transport(e.to_string()))))?;
    Ok(())
}

fn build_response_properties<Resp: PayloadSerialize>(
    correlation_data: Bytes,
    status: u16,
    status_message: Option<String>,
    custom_user_data: Option<Vec<(String, String)>>,
) -> PublishProperties {
    let mut user_properties = custom_user_data.unwrap_or_default();
    user_properties.push((STATUS_PROPERTY.to_string(), status.to_string()));
    if let Some(message) = status_message {
        user_properties.push((STATUS_MESSAGE_PROPERTY.to_string(), message));
    }
    PublishProperties {
        correlation_data: Some(correlation_data),
        user_properties,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_ten_second_subscribe_and_execution_timeouts() {
        let options = OptionsBuilder::default().build().unwrap();
        assert_eq!(options.subscribe_timeout_in_seconds, 10);
        assert_eq!(options.command_execution_timeout_s, 10);
        assert_eq!(options.topic_pattern, DEFAULT_COMMAND_REQUEST_TEMPLATE);
    }

    #[test]
    fn response_ok_defaults_to_status_200() {
        #[derive(Clone, Debug)]
        struct Dummy;
        impl PayloadSerialize for Dummy {
            type SerializerError = String;
            fn content_type() -> &'static str {
                "application/json"
            }
            fn format_indicator() -> crate::common::payload_serialize::FormatIndicator {
                crate::common::payload_serialize::FormatIndicator::Utf8EncodedCharacterData
            }
            fn serialize(&self) -> Result<Vec<u8>, String> {
                Ok(Vec::new())
            }
            fn deserialize(_payload: &[u8]) -> Result<Self, String> {
                Ok(Dummy)
            }
        }
        let response = Response::ok(Dummy).with_status_message("all good");
        assert_eq!(response.status, status::OK);
        assert_eq!(response.status_message.as_deref(), Some("all good"));
    }

    #[test]
    fn build_response_properties_carries_status_and_correlation() {
        let properties = build_response_properties::<crate::common::payload_serialize::MockPayload>(
            Bytes::from_static(b"correlation-id"),
            status::GATEWAY_TIMEOUT,
            Some(EXECUTION_TIMEOUT_MESSAGE.to_string()),
            None,
        );
        assert_eq!(properties.correlation_data, Some(Bytes::from_static(b"correlation-id")));
        assert!(properties
            .user_properties
            .contains(&(STATUS_PROPERTY.to_string(), status::GATEWAY_TIMEOUT.to_string())));
        assert!(properties
            .user_properties
            .contains(&(STATUS_MESSAGE_PROPERTY.to_string(), EXECUTION_TIMEOUT_MESSAGE.to_string())));
    }
}
