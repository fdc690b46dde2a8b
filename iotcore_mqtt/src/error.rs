// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Facility-tagged error types shared across the crate.
//!
//! Each subsystem gets its own error type rather than one crate-wide enum, so
//! that callers narrowly match on the failures a given call can actually
//! produce.

use std::fmt;

use thiserror::Error;

pub use crate::control_packet::TopicError;

/// Error connecting to an MQTT server.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ConnectError {
    kind: ConnectErrorKind,
}

impl ConnectError {
    /// Build a new [`ConnectError`] from its [`ConnectErrorKind`].
    #[must_use]
    pub fn new(kind: ConnectErrorKind) -> Self {
        Self { kind }
    }

    /// The category of connection failure.
    #[must_use]
    pub fn kind(&self) -> &ConnectErrorKind {
        &self.kind
    }
}

/// Categories of [`ConnectError`].
#[derive(Debug)]
pub enum ConnectErrorKind {
    /// The TCP/TLS transport could not be established.
    Transport(String),
    /// The broker rejected the CONNECT with a non-success reason code.
    Refused(String),
    /// The connection attempt did not complete within `connection_timeout`.
    Timeout,
}

impl fmt::Display for ConnectErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectErrorKind::Transport(msg) => write!(f, "transport error: {msg}"),
            ConnectErrorKind::Refused(reason) => write!(f, "connection refused: {reason}"),
            ConnectErrorKind::Timeout => write!(f, "connection attempt timed out"),
        }
    }
}

/// Error publishing, subscribing, or acknowledging on an established connection.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct PublishError {
    kind: PublishErrorKind,
}

impl PublishError {
    /// Build a new [`PublishError`] from its [`PublishErrorKind`].
    #[must_use]
    pub fn new(kind: PublishErrorKind) -> Self {
        Self { kind }
    }

    /// The category of publish failure.
    #[must_use]
    pub fn kind(&self) -> &PublishErrorKind {
        &self.kind
    }
}

/// Categories of [`PublishError`].
#[derive(Debug)]
pub enum PublishErrorKind {
    /// The client has become detached from the connection it was issued against.
    Detached,
    /// The topic name or filter was rejected.
    Topic(TopicError),
    /// The transport rejected the operation outright (e.g. queue full).
    Transport(String),
}

impl fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishErrorKind::Detached => write!(f, "client is detached from its connection"),
            PublishErrorKind::Topic(e) => write!(f, "{e}"),
            PublishErrorKind::Transport(msg) => write!(f, "transport rejected operation: {msg}"),
        }
    }
}

/// Indicates that an outstanding acknowledgement (PUBACK/SUBACK/UNSUBACK) did
/// not complete successfully.
#[derive(Debug, Error)]
#[error("operation did not complete successfully: {0}")]
pub struct CompletionError(pub String);

/// Indicates a handle (e.g. a `ManagedClient`) has become detached from the
/// session that produced it, because the session has ended.
#[derive(Debug, Error)]
#[error("handle is detached from its originating session")]
pub struct DetachedError;

/// Error surfaced by the connection state machine (component J) while the
/// session is live.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct SessionError {
    kind: SessionErrorKind,
}

impl SessionError {
    /// Build a new [`SessionError`] from its [`SessionErrorKind`].
    #[must_use]
    pub fn new(kind: SessionErrorKind) -> Self {
        Self { kind }
    }

    /// The category of session failure.
    #[must_use]
    pub fn kind(&self) -> &SessionErrorKind {
        &self.kind
    }
}

/// Categories of [`SessionError`].
#[derive(Debug)]
pub enum SessionErrorKind {
    /// Could not (re)connect to the broker.
    Connect(ConnectErrorKind),
    /// The reconnect policy gave up retrying.
    ReconnectExhausted,
    /// An event was delivered to a state with no handler for it and no
    /// ancestor state handled it either (HFSM root-unhandled).
    UnhandledEvent(String),
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionErrorKind::Connect(kind) => write!(f, "{kind}"),
            SessionErrorKind::ReconnectExhausted => {
                write!(f, "reconnect policy exhausted its retry budget")
            }
            SessionErrorKind::UnhandledEvent(event) => {
                write!(f, "event '{event}' reached the root state unhandled")
            }
        }
    }
}

/// Error returned when a session exits irrecoverably.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct SessionExitError {
    kind: SessionExitErrorKind,
}

impl SessionExitError {
    /// Build a new [`SessionExitError`] from its [`SessionExitErrorKind`].
    #[must_use]
    pub fn new(kind: SessionExitErrorKind) -> Self {
        Self { kind }
    }

    /// The category of exit.
    #[must_use]
    pub fn kind(&self) -> &SessionExitErrorKind {
        &self.kind
    }
}

/// Categories of [`SessionExitError`].
#[derive(Debug)]
pub enum SessionExitErrorKind {
    /// The caller requested the session stop.
    UserRequested,
    /// The HFSM escalated an event all the way to the root without a handler.
    CriticalError(SessionErrorKind),
}

impl fmt::Display for SessionExitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionExitErrorKind::UserRequested => write!(f, "session stopped by caller"),
            SessionExitErrorKind::CriticalError(kind) => {
                write!(f, "session exited on critical error: {kind}")
            }
        }
    }
}

/// Error acquiring or refreshing a credential (component H).
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The HTTP request to the token endpoint failed at the transport level.
    #[error("token request failed: {0}")]
    Request(String),
    /// The token endpoint responded with a non-success status.
    #[error("token endpoint returned status {status}: {body}")]
    Rejected {
        /// HTTP status code returned by the token endpoint.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The token response could not be parsed.
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
    /// A value required to build the credential request was invalid.
    #[error("invalid credential configuration: {0}")]
    InvalidConfiguration(String),
}

/// Error executing an RPC command (component L/M).
#[derive(Debug, Error)]
pub enum RpcError {
    /// The request was not acknowledged/responded to within its timeout.
    #[error("request timed out waiting for a response")]
    Timeout,
    /// The executor responded with a non-success status in the `status` user property.
    #[error("executor responded with status {0}")]
    ExecutionFailed(String),
    /// The response payload could not be deserialized.
    #[error("failed to deserialize response payload: {0}")]
    Deserialization(String),
    /// The request payload could not be serialized.
    #[error("failed to serialize request payload: {0}")]
    Serialization(String),
    /// Publishing the request or response failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
    /// The invoker has too many requests outstanding (`max_pending_requests`).
    #[error("too many pending requests: limit is {0}")]
    TooManyPendingRequests(usize),
    /// The topic pattern could not be rendered for this request.
    #[error("invalid topic pattern: {0}")]
    InvalidTopic(String),
    /// The broker rejected the command-topic subscribe (a non-success SUBACK reason code).
    #[error("subscribe rejected: {0}")]
    SubscribeRejected(String),
}

/// Error raised by the telemetry consumer (component K).
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The subscribe did not complete within `subscribe_timeout_in_seconds`.
    #[error("subscribe timed out")]
    SubscribeTimeout,
    /// Subscribing failed outright.
    #[error(transparent)]
    Publish(#[from] PublishError),
    /// The broker rejected the subscribe (a non-success SUBACK reason code).
    #[error("subscribe rejected: {0}")]
    SubscribeRejected(String),
    /// The payload could not be deserialized.
    #[error("failed to deserialize telemetry payload: {0}")]
    Deserialization(String),
}
