// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The event pipeline: a bidirectional chain of policies sitting between the
//! transport and the sub-clients (telemetry consumer, RPC server/client).
//!
//! Inbound events flow transport -> policies -> sub-clients; outbound events
//! flow sub-clients -> policies -> transport. Because `Pipeline::post_inbound`
//! and `Pipeline::post_outbound` both take `&mut self`, Rust's aliasing rules
//! already provide the "only one event dispatched at a time" guarantee the
//! source enforces with an explicit critical section.

use tokio::sync::mpsc;

/// What a policy decided to do with an event it observed.
pub enum PolicyOutcome {
    /// Forward the (possibly modified) event to the next link in the chain.
    Continue,
    /// Stop the chain here; the event is not forwarded further.
    ShortCircuit,
}

/// A policy participating in the inbound chain (transport -> sub-clients).
pub trait InboundPolicy<E>: Send {
    /// Observe or modify an inbound event in place.
    fn on_inbound(&mut self, event: &mut E) -> PolicyOutcome;
}

/// A policy participating in the outbound chain (sub-clients -> transport).
pub trait OutboundPolicy<E>: Send {
    /// Observe or modify an outbound event in place.
    fn on_outbound(&mut self, event: &mut E) -> PolicyOutcome;
}

/// The bidirectional policy chain for one connection.
pub struct Pipeline<E> {
    inbound_policies: Vec<Box<dyn InboundPolicy<E>>>,
    outbound_policies: Vec<Box<dyn OutboundPolicy<E>>>,
    sub_clients: Vec<mpsc::UnboundedSender<E>>,
    transport_out: Option<mpsc::UnboundedSender<E>>,
}

impl<E: Clone> Pipeline<E> {
    /// Build an empty pipeline with no policies, sub-clients, or transport sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inbound_policies: Vec::new(),
            outbound_policies: Vec::new(),
            sub_clients: Vec::new(),
            transport_out: None,
        }
    }

    /// Append a policy to the inbound chain, nearest-transport-first.
    pub fn add_inbound_policy(&mut self, policy: impl InboundPolicy<E> + 'static) {
        self.inbound_policies.push(Box::new(policy));
    }

    /// Append a policy to the outbound chain, nearest-sub-client-first.
    pub fn add_outbound_policy(&mut self, policy: impl OutboundPolicy<E> + 'static) {
        self.outbound_policies.push(Box::new(policy));
    }

    /// Register a sub-client to receive every inbound event that survives
    /// the inbound policy chain.
    pub fn register_sub_client(&mut self, tx: mpsc::UnboundedSender<E>) {
        self.sub_clients.push(tx);
    }

    /// Wire the sink that outbound events are forwarded to once they have
    /// passed the outbound policy chain (i.e. the transport adapter).
    pub fn set_transport_sink(&mut self, tx: mpsc::UnboundedSender<E>) {
        self.transport_out = Some(tx);
    }

    /// Run an event delivered by the transport through the inbound chain and
    /// fan it out to every registered sub-client.
    pub fn post_inbound(&mut self, mut event: E) {
        for policy in &mut self.inbound_policies {
            match policy.on_inbound(&mut event) {
                PolicyOutcome::Continue => {}
                PolicyOutcome::ShortCircuit => {
                    log::trace!("inbound event short-circuited by a policy");
                    return;
                }
            }
        }
        self.sub_clients.retain(|tx| {
            let sent = tx.send(event.clone()).is_ok();
            if !sent {
                log::trace!("dropping closed sub-client channel");
            }
            sent
        });
    }

    /// Run an event originated by a sub-client through the outbound chain
    /// and forward it to the transport sink.
    pub fn post_outbound(&mut self, mut event: E) {
        for policy in &mut self.outbound_policies {
            match policy.on_outbound(&mut event) {
                PolicyOutcome::Continue => {}
                PolicyOutcome::ShortCircuit => {
                    log::trace!("outbound event short-circuited by a policy");
                    return;
                }
            }
        }
        if let Some(tx) = &self.transport_out {
            let _ = tx.send(event);
        } else {
            log::trace!("outbound event dropped: no transport sink configured");
        }
    }
}

impl<E: Clone> Default for Pipeline<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Event(u32);

    struct DoublingPolicy;
    impl InboundPolicy<Event> for DoublingPolicy {
        fn on_inbound(&mut self, event: &mut Event) -> PolicyOutcome {
            event.0 *= 2;
            PolicyOutcome::Continue
        }
    }

    struct DropOddPolicy;
    impl OutboundPolicy<Event> for DropOddPolicy {
        fn on_outbound(&mut self, event: &mut Event) -> PolicyOutcome {
            if event.0 % 2 == 1 {
                PolicyOutcome::ShortCircuit
            } else {
                PolicyOutcome::Continue
            }
        }
    }

    #[test]
    fn inbound_policy_runs_before_fan_out() {
        let mut pipeline: Pipeline<Event> = Pipeline::new();
        pipeline.add_inbound_policy(DoublingPolicy);
        let (tx, mut rx) = mpsc::unbounded_channel();
        pipeline.register_sub_client(tx);

        pipeline.post_inbound(Event(5));
        assert_eq!(rx.try_recv().unwrap(), Event(10));
    }

    #[test]
    fn outbound_short_circuit_prevents_transport_send() {
        let mut pipeline: Pipeline<Event> = Pipeline::new();
        pipeline.add_outbound_policy(DropOddPolicy);
        let (tx, mut rx) = mpsc::unbounded_channel();
        pipeline.set_transport_sink(tx);

        pipeline.post_outbound(Event(3));
        assert!(rx.try_recv().is_err());

        pipeline.post_outbound(Event(4));
        assert_eq!(rx.try_recv().unwrap(), Event(4));
    }

    #[test]
    fn closed_sub_client_channels_are_pruned() {
        let mut pipeline: Pipeline<Event> = Pipeline::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        pipeline.register_sub_client(tx);
        assert_eq!(pipeline.sub_clients.len(), 1);
        pipeline.post_inbound(Event(1));
        assert_eq!(pipeline.sub_clients.len(), 0);
    }
}
