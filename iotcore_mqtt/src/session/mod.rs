// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The MQTT session: the connection state machine (component J), its
//! reconnect policy, and the [`Session`] runtime that drives both against a
//! concrete transport.

pub mod reconnect_policy;
pub mod state;

mod session;

pub use reconnect_policy::{ConnectionLossReason, ExponentialBackoffWithJitter, ReconnectPolicy};
pub use session::{Session, SessionEvent, SessionExitHandle};
pub use state::{ConnectionContext, ConnectionEvent, ConnectionState};
