// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Drives the connection state machine (component J) against a live
//! `rumqttc` client and event loop: opens the connection, feeds every
//! polled transport event through the HFSM, and reconnects per the
//! configured [`ReconnectPolicy`] on loss.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection_settings::MqttConnectionSettings;
use crate::control_packet::Publish;
use crate::error::{SessionErrorKind, SessionExitError, SessionExitErrorKind};
use crate::hfsm::Hfsm;
use crate::interface::MqttDisconnect;
use crate::rumqttc_adapter::{convert_incoming_publish, RumqttcClient, RumqttcEventLoop};
use crate::session::reconnect_policy::{ConnectionLossReason, ReconnectPolicy};
use crate::session::state::{open_is_supported, ConnectionContext, ConnectionEvent, ConnectionState};

/// Connection-lifecycle notifications fanned out to the application and to
/// sub-clients, distinct from the [`ConnectionEvent`]s that drive the HFSM
/// itself.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The connection reached `Connected`.
    Connected {
        /// Whether the broker resumed a prior session.
        session_present: bool,
    },
    /// The connection left `Connected`, either cleanly or via a drop.
    Disconnected,
    /// An inbound publish was polled off the transport. Sub-clients
    /// ordinarily observe publishes through a registered
    /// [`crate::interface::PubReceiver`] instead of this broadcast.
    PublishReceived(Publish),
}

/// Owns the connection HFSM and drives it against a live `rumqttc` client
/// and event loop. One [`Session`] is one physical MQTT connection,
/// dispatched single-threaded and cooperatively.
pub struct Session {
    client: Arc<RumqttcClient>,
    event_loop: RumqttcEventLoop,
    hfsm: Hfsm<ConnectionState>,
    ctx: ConnectionContext,
    reconnect_policy: Box<dyn ReconnectPolicy>,
    cancel: CancellationToken,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

/// A cloneable handle used to request that a running [`Session`] exit.
#[derive(Clone)]
pub struct SessionExitHandle {
    cancel: CancellationToken,
}

impl SessionExitHandle {
    /// Request the session stop. The run loop exits at its next
    /// opportunity to observe the cancellation.
    pub fn exit(&self) {
        self.cancel.cancel();
    }
}

impl Session {
    /// Build a new, not-yet-connected session and the handles used to
    /// operate it: the [`RumqttcClient`] for publish/subscribe, the
    /// [`SessionExitHandle`] to request a clean stop, and a channel of
    /// [`SessionEvent`]s for observing connection lifecycle transitions.
    #[must_use]
    pub fn new(
        settings: &MqttConnectionSettings,
        reconnect_policy: impl ReconnectPolicy + 'static,
    ) -> (
        Self,
        Arc<RumqttcClient>,
        SessionExitHandle,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let mqtt_options = build_mqtt_options(settings);
        let (async_client, event_loop) = rumqttc::v5::AsyncClient::new(mqtt_options, 64);
        let client = Arc::new(RumqttcClient::new(settings.client_id.clone(), async_client));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut ctx = ConnectionContext::default();
        let hfsm = Hfsm::new(ConnectionState::Idle, &mut ctx);

        let session = Self {
            client: client.clone(),
            event_loop: RumqttcEventLoop::new(event_loop),
            hfsm,
            ctx,
            reconnect_policy: Box::new(reconnect_policy),
            cancel: cancel.clone(),
            events_tx,
        };

        (session, client, SessionExitHandle { cancel }, events_rx)
    }

    /// Drive the connection until [`SessionExitHandle::exit`] is called or
    /// the HFSM hits a root-unhandled (critical) event.
    pub async fn run(mut self) -> Result<(), SessionExitError> {
        self.open();
        let mut reconnect_attempts: u32 = 0;

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => {
                    self.close().await;
                    return Err(SessionExitError::new(SessionExitErrorKind::UserRequested));
                }
                polled = self.event_loop.poll() => polled,
            };

            match event {
                Ok(rumqttc::v5::Event::Incoming(incoming)) => {
                    if self.handle_incoming(incoming)? {
                        reconnect_attempts = 0;
                    }
                }
                Ok(rumqttc::v5::Event::Outgoing(_)) => {}
                Err(kind) => {
                    self.dispatch(ConnectionEvent::TransportDropped(kind.to_string()))?;
                    let _ = self.events_tx.send(SessionEvent::Disconnected);
                    let reason = ConnectionLossReason::Transport(kind.to_string());
                    match self
                        .reconnect_policy
                        .connection_loss_reconnect_delay(&reason)
                    {
                        Some(delay) => {
                            reconnect_attempts += 1;
                            log::warn!(
                                "transport error, reconnecting in {delay:?} (attempt {reconnect_attempts})"
                            );
                            tokio::time::sleep(delay).await;
                            self.open();
                        }
                        None => {
                            return Err(SessionExitError::new(SessionExitErrorKind::CriticalError(
                                SessionErrorKind::ReconnectExhausted,
                            )));
                        }
                    }
                }
            }
        }
    }

    fn open(&mut self) {
        if !open_is_supported(*self.hfsm.current()) {
            log::debug!("open ignored: connection already {:?}", self.hfsm.current());
            return;
        }
        let _ = self.dispatch(ConnectionEvent::Open);
    }

    async fn close(&mut self) {
        let _ = self.dispatch(ConnectionEvent::Close);
        let _ = MqttDisconnect::disconnect(self.client.as_ref()).await;
    }

    /// Returns `true` when the incoming event indicates forward connection
    /// progress (used by the caller to reset its reconnect-attempt counter).
    fn handle_incoming(&mut self, incoming: rumqttc::v5::Incoming) -> Result<bool, SessionExitError> {
        use rumqttc::v5::Incoming;
        match incoming {
            Incoming::ConnAck(connack) => {
                if connack.code == rumqttc::v5::mqttbytes::v5::ConnectReturnCode::Success {
                    self.dispatch(ConnectionEvent::ConnAckOk {
                        session_present: connack.session_present,
                    })?;
                    let _ = self.events_tx.send(SessionEvent::Connected {
                        session_present: connack.session_present,
                    });
                    return Ok(true);
                }
                self.dispatch(ConnectionEvent::ConnAckErr(format!("{:?}", connack.code)))?;
            }
            Incoming::Disconnect(_) => {
                self.dispatch(ConnectionEvent::DisconnectRsp)?;
                let _ = self.events_tx.send(SessionEvent::Disconnected);
            }
            Incoming::Publish(publish) => match convert_incoming_publish(publish) {
                Ok(publish) => {
                    self.client.dispatch_publish(publish.clone());
                    let _ = self.events_tx.send(SessionEvent::PublishReceived(publish));
                }
                Err(e) => log::warn!("dropping publish with invalid topic: {e}"),
            },
            _ => {}
        }
        Ok(false)
    }

    fn dispatch(&mut self, event: ConnectionEvent) -> Result<(), SessionExitError> {
        self.hfsm.dispatch(&mut self.ctx, &event).map_err(|_| {
            crate::platform::critical_error("connection event unhandled at root");
            SessionExitError::new(SessionExitErrorKind::CriticalError(
                SessionErrorKind::UnhandledEvent(format!("{event:?}")),
            ))
        })
    }
}

fn build_mqtt_options(settings: &MqttConnectionSettings) -> rumqttc::v5::MqttOptions {
    let mut options = rumqttc::v5::MqttOptions::new(
        settings.client_id.clone(),
        settings.hostname.clone(),
        settings.tcp_port,
    );
    options.set_clean_start(settings.clean_start);
    options.set_keep_alive(Duration::from_secs(u64::from(settings.keep_alive_s)));
    if let Some(username) = &settings.username {
        options.set_credentials(username.clone(), settings.password.clone().unwrap_or_default());
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MqttConnectionSettings {
        crate::connection_settings::MqttConnectionSettingsBuilder::default()
            .client_id("device-1")
            .hostname("broker.example.com")
            .build()
            .unwrap()
    }

    #[test]
    fn build_mqtt_options_applies_keep_alive_and_clean_start() {
        let settings = settings();
        let options = build_mqtt_options(&settings);
        assert_eq!(options.keep_alive(), Duration::from_secs(240));
        assert!(!options.clean_start());
    }

    #[tokio::test]
    async fn exit_handle_cancels_the_run_loop() {
        let (session, _client, exit_handle, _events) =
            Session::new(&settings(), crate::session::reconnect_policy::ExponentialBackoffWithJitter::default());
        exit_handle.exit();
        let result = session.run().await;
        assert!(result.is_err());
    }
}
