// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The MQTT connection state machine (component J): `Idle -> Connecting ->
//! Connected`, with `close` (from any state) and transport-initiated drops
//! both routing through `Disconnecting` back to `Idle`.
//!
//! Built on the generic [`crate::hfsm`] runtime: every state here is a
//! direct child of [`ConnectionState::Root`], so an event unhandled by the
//! current leaf always bubbles exactly one level before becoming a critical
//! error.

use crate::hfsm::{HfsmState, Outcome};

/// Events the connection state machine reacts to. `open`/`close` originate
/// from the application; the rest are delivered by the transport.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The application asked to establish a connection.
    Open,
    /// The broker accepted the CONNECT.
    ConnAckOk {
        /// Whether the broker resumed a prior session.
        session_present: bool,
    },
    /// The broker rejected the CONNECT, or the handshake otherwise failed.
    ConnAckErr(String),
    /// The CONNECT attempt did not complete within `connection_timeout`.
    ConnectTimeout,
    /// The application asked to close the connection.
    Close,
    /// The broker (or transport) confirmed the disconnect.
    DisconnectRsp,
    /// The transport reported the connection was lost without an explicit
    /// `close`.
    TransportDropped(String),
}

/// A leaf or the root of the connection HFSM. All non-root states are
/// direct children of [`ConnectionState::Root`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The implicit root; only reached when no leaf state handles an event.
    Root,
    /// Not connected and no connection attempt in progress.
    Idle,
    /// A CONNECT has been sent; awaiting CONNACK.
    Connecting,
    /// The broker has accepted the connection.
    Connected,
    /// A DISCONNECT has been sent, or the transport dropped; awaiting
    /// confirmation (or a timeout) before returning to `Idle`.
    Disconnecting,
}

/// Context shared across dispatches of the connection HFSM. Holds no
/// transport handle: the owning [`crate::session::Session`] performs the
/// actual network operation once the HFSM has confirmed the transition is
/// legal, and feeds the resulting event back in.
#[derive(Debug, Default)]
pub struct ConnectionContext {
    /// The reason the session most recently moved to `Disconnecting`, for
    /// diagnostics and for `SessionExitError` construction.
    pub last_fault: Option<String>,
}

impl HfsmState for ConnectionState {
    type Event = ConnectionEvent;
    type Context = ConnectionContext;

    fn parent(&self) -> Option<Self> {
        match self {
            ConnectionState::Root => None,
            _ => Some(ConnectionState::Root),
        }
    }

    fn handle(&self, ctx: &mut ConnectionContext, event: &ConnectionEvent) -> Outcome<Self> {
        match (self, event) {
            (ConnectionState::Idle, ConnectionEvent::Open) => {
                Outcome::TransitionSubstate(ConnectionState::Connecting)
            }
            (ConnectionState::Idle, ConnectionEvent::Close) => Outcome::Handled,

            (ConnectionState::Connecting, ConnectionEvent::ConnAckOk { .. }) => {
                Outcome::TransitionSubstate(ConnectionState::Connected)
            }
            (ConnectionState::Connecting, ConnectionEvent::ConnAckErr(reason)) => {
                ctx.last_fault = Some(reason.clone());
                Outcome::TransitionSubstate(ConnectionState::Disconnecting)
            }
            (ConnectionState::Connecting, ConnectionEvent::ConnectTimeout) => {
                ctx.last_fault = Some("connection attempt timed out".to_string());
                Outcome::TransitionSubstate(ConnectionState::Disconnecting)
            }
            (ConnectionState::Connecting, ConnectionEvent::Close) => {
                Outcome::TransitionSubstate(ConnectionState::Disconnecting)
            }

            (ConnectionState::Connected, ConnectionEvent::Close) => {
                Outcome::TransitionSubstate(ConnectionState::Disconnecting)
            }
            (ConnectionState::Connected, ConnectionEvent::TransportDropped(reason)) => {
                ctx.last_fault = Some(reason.clone());
                Outcome::TransitionSubstate(ConnectionState::Disconnecting)
            }

            (ConnectionState::Disconnecting, ConnectionEvent::DisconnectRsp) => {
                Outcome::TransitionSubstate(ConnectionState::Idle)
            }
            (ConnectionState::Disconnecting, ConnectionEvent::ConnectTimeout) => {
                // The broker never confirmed the disconnect; give up waiting
                // and treat the session as idle regardless.
                Outcome::TransitionSubstate(ConnectionState::Idle)
            }
            (ConnectionState::Disconnecting, ConnectionEvent::TransportDropped(_)) => {
                Outcome::TransitionSubstate(ConnectionState::Idle)
            }
            (ConnectionState::Disconnecting, ConnectionEvent::Close) => Outcome::Handled,

            _ => Outcome::HandleBySuperstate,
        }
    }

    fn on_enter(&self, _ctx: &mut ConnectionContext) {
        log::debug!("connection entering {self:?}");
    }

    fn on_exit(&self, _ctx: &mut ConnectionContext) {
        log::debug!("connection exiting {self:?}");
    }
}

/// Whether `open` is accepted in `state`, per the component J contract
/// ("`open` is rejected in Connecting/Connected with `NOT_SUPPORTED`").
#[must_use]
pub fn open_is_supported(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Idle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hfsm::Hfsm;

    #[test]
    fn open_connack_ok_reaches_connected() {
        let mut ctx = ConnectionContext::default();
        let mut hfsm = Hfsm::new(ConnectionState::Idle, &mut ctx);
        hfsm.dispatch(&mut ctx, &ConnectionEvent::Open).unwrap();
        assert_eq!(*hfsm.current(), ConnectionState::Connecting);
        hfsm.dispatch(
            &mut ctx,
            &ConnectionEvent::ConnAckOk {
                session_present: false,
            },
        )
        .unwrap();
        assert_eq!(*hfsm.current(), ConnectionState::Connected);
    }

    #[test]
    fn connack_error_routes_through_disconnecting_back_to_idle() {
        let mut ctx = ConnectionContext::default();
        let mut hfsm = Hfsm::new(ConnectionState::Idle, &mut ctx);
        hfsm.dispatch(&mut ctx, &ConnectionEvent::Open).unwrap();
        hfsm.dispatch(
            &mut ctx,
            &ConnectionEvent::ConnAckErr("bad credentials".to_string()),
        )
        .unwrap();
        assert_eq!(*hfsm.current(), ConnectionState::Disconnecting);
        assert_eq!(ctx.last_fault.as_deref(), Some("bad credentials"));
        hfsm.dispatch(&mut ctx, &ConnectionEvent::DisconnectRsp)
            .unwrap();
        assert_eq!(*hfsm.current(), ConnectionState::Idle);
    }

    #[test]
    fn transport_drop_while_connected_returns_to_idle() {
        let mut ctx = ConnectionContext::default();
        let mut hfsm = Hfsm::new(ConnectionState::Connected, &mut ctx);
        hfsm.dispatch(
            &mut ctx,
            &ConnectionEvent::TransportDropped("reset by peer".to_string()),
        )
        .unwrap();
        assert_eq!(*hfsm.current(), ConnectionState::Disconnecting);
        hfsm.dispatch(&mut ctx, &ConnectionEvent::DisconnectRsp)
            .unwrap();
        assert_eq!(*hfsm.current(), ConnectionState::Idle);
    }

    #[test]
    fn open_is_only_supported_while_idle() {
        assert!(open_is_supported(ConnectionState::Idle));
        assert!(!open_is_supported(ConnectionState::Connecting));
        assert!(!open_is_supported(ConnectionState::Connected));
        assert!(!open_is_supported(ConnectionState::Disconnecting));
    }

    #[test]
    fn unhandled_event_in_idle_bubbles_to_root_and_errors() {
        let mut ctx = ConnectionContext::default();
        let mut hfsm = Hfsm::new(ConnectionState::Idle, &mut ctx);
        let result = hfsm.dispatch(&mut ctx, &ConnectionEvent::DisconnectRsp);
        assert!(result.is_err());
    }
}
