// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A generic hierarchical finite state machine (HFSM) runtime.
//!
//! States are modelled as a tagged union (`S: HfsmState`) rather than the
//! function-pointer-chain shape of the C original: each state value knows
//! its own parent, and `handle` is exhaustively matched over the enum
//! instead of dispatched through a vtable. Unhandled events bubble to the
//! parent; a state-initiated transition walks exit events up to the least
//! common ancestor and entry events back down to the new leaf.

use std::fmt;

/// What a state's handler decided to do with an event.
pub enum Outcome<S> {
    /// The event was fully handled; stop walking up the parent chain.
    Handled,
    /// This state has no handler for the event; re-dispatch to the parent.
    /// Dispatching an event at the root state that returns this variant is
    /// a critical error (component D's `critical_error` hook fires).
    HandleBySuperstate,
    /// Transition to `S`, which is a descendant of the current state (or
    /// otherwise reachable without leaving the current branch of the tree).
    /// Exit/entry events fire for every state strictly between the current
    /// leaf and the least common ancestor with `S`.
    TransitionSubstate(S),
    /// Transition to `S`, a peer (or otherwise unrelated) state. Semantically
    /// identical to [`Outcome::TransitionSubstate`]; kept distinct because
    /// callers reason about the two differently, mirroring the source's
    /// `transition_substate`/`transition_peer` split.
    TransitionPeer(S),
}

/// A state in a hierarchical state machine.
///
/// `Event` is the alphabet of events the machine accepts; `Context` is
/// mutable data shared across all states (e.g. the owning session).
pub trait HfsmState: Sized + Clone + PartialEq + fmt::Debug {
    /// The event type this machine dispatches.
    type Event;
    /// Mutable state shared by every state in the machine.
    type Context;

    /// This state's parent, or `None` if this is the root.
    fn parent(&self) -> Option<Self>;

    /// Handle `event`. Implementations exhaustively match over `Self`'s
    /// variants and delegate to per-variant handler functions.
    fn handle(&self, ctx: &mut Self::Context, event: &Self::Event) -> Outcome<Self>;

    /// Run on entry to this state, after any ancestor `on_enter`s that are
    /// newly entered by the same transition.
    fn on_enter(&self, _ctx: &mut Self::Context) {}

    /// Run on exit from this state, before any ancestor `on_exit`s triggered
    /// by the same transition.
    fn on_exit(&self, _ctx: &mut Self::Context) {}
}

/// Error raised when an event bubbles past the root state unhandled.
#[derive(Debug, Clone, thiserror::Error)]
#[error("event was not handled by state '{state:?}' or any ancestor")]
pub struct UnhandledEventError<S: fmt::Debug> {
    /// The leaf state the event was originally dispatched to.
    pub state: S,
}

/// The runtime driving a single [`HfsmState`] machine.
pub struct Hfsm<S: HfsmState> {
    current: S,
}

impl<S: HfsmState> Hfsm<S> {
    /// Start the machine in `initial`, running its entry chain from the root down.
    pub fn new(initial: S, ctx: &mut S::Context) -> Self {
        let chain = ancestor_chain(&initial);
        for state in chain.iter().rev() {
            state.on_enter(ctx);
        }
        Self { current: initial }
    }

    /// The current leaf state.
    pub fn current(&self) -> &S {
        &self.current
    }

    /// Dispatch `event` to the current leaf, walking up through parents
    /// until a handler claims it, applying any resulting transition.
    ///
    /// Returns `Err` if the event reaches the root unhandled; the caller is
    /// expected to treat this as fatal per [`crate::platform::critical_error`].
    pub fn dispatch(
        &mut self,
        ctx: &mut S::Context,
        event: &S::Event,
    ) -> Result<(), UnhandledEventError<S>> {
        let original = self.current.clone();
        let mut probe = self.current.clone();
        loop {
            match probe.handle(ctx, event) {
                Outcome::Handled => return Ok(()),
                Outcome::HandleBySuperstate => match probe.parent() {
                    Some(parent) => probe = parent,
                    None => return Err(UnhandledEventError { state: original }),
                },
                Outcome::TransitionSubstate(next) | Outcome::TransitionPeer(next) => {
                    self.transition_to(ctx, next);
                    return Ok(());
                }
            }
        }
    }

    /// Force a transition without going through event dispatch; used by the
    /// runtime when a state machine starts a sub-client or reacts to a
    /// connection-level event outside the normal dispatch path.
    pub fn transition_to(&mut self, ctx: &mut S::Context, next: S) {
        let old_chain = ancestor_chain(&self.current);
        let new_chain = ancestor_chain(&next);

        let lca_index_in_old = old_chain
            .iter()
            .position(|s| new_chain.contains(s))
            .unwrap_or(old_chain.len());

        for state in &old_chain[..lca_index_in_old] {
            state.on_exit(ctx);
        }

        let lca = old_chain.get(lca_index_in_old);
        let lca_index_in_new = lca
            .and_then(|l| new_chain.iter().position(|s| s == l))
            .unwrap_or(new_chain.len());

        for state in new_chain[..lca_index_in_new].iter().rev() {
            state.on_enter(ctx);
        }

        log::debug!("hfsm transition: {:?} -> {:?}", self.current, next);
        self.current = next;
    }
}

/// `[leaf, parent, grandparent, ..., root]`
fn ancestor_chain<S: HfsmState>(state: &S) -> Vec<S> {
    let mut chain = vec![state.clone()];
    let mut cursor = state.clone();
    while let Some(parent) = cursor.parent() {
        chain.push(parent.clone());
        cursor = parent;
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestState {
        Root,
        Idle,
        Connecting,
        Connected,
    }

    #[derive(Debug)]
    enum TestEvent {
        Connect,
        ConnAck,
        Disconnect,
        Unknown,
    }

    #[derive(Default)]
    struct Log(Vec<String>);

    impl HfsmState for TestState {
        type Event = TestEvent;
        type Context = Log;

        fn parent(&self) -> Option<Self> {
            match self {
                TestState::Root => None,
                TestState::Idle | TestState::Connecting | TestState::Connected => {
                    Some(TestState::Root)
                }
            }
        }

        fn handle(&self, ctx: &mut Log, event: &TestEvent) -> Outcome<Self> {
            match (self, event) {
                (TestState::Idle, TestEvent::Connect) => {
                    Outcome::TransitionSubstate(TestState::Connecting)
                }
                (TestState::Connecting, TestEvent::ConnAck) => {
                    Outcome::TransitionSubstate(TestState::Connected)
                }
                (TestState::Connected, TestEvent::Disconnect) => {
                    Outcome::TransitionSubstate(TestState::Idle)
                }
                (TestState::Root, TestEvent::Unknown) => {
                    ctx.0.push("root saw unknown".to_string());
                    Outcome::Handled
                }
                _ => Outcome::HandleBySuperstate,
            }
        }

        fn on_enter(&self, ctx: &mut Log) {
            ctx.0.push(format!("enter {self:?}"));
        }

        fn on_exit(&self, ctx: &mut Log) {
            ctx.0.push(format!("exit {self:?}"));
        }
    }

    #[test]
    fn unhandled_events_bubble_to_parent_and_root_handles_it() {
        let mut ctx = Log::default();
        let mut hfsm = Hfsm::new(TestState::Idle, &mut ctx);
        hfsm.dispatch(&mut ctx, &TestEvent::Unknown).unwrap();
        assert!(ctx.0.contains(&"root saw unknown".to_string()));
    }

    #[test]
    fn unhandled_event_at_root_is_an_error() {
        let mut ctx = Log::default();
        let mut hfsm = Hfsm::new(TestState::Idle, &mut ctx);
        // No handler anywhere for Disconnect while Idle.
        let result = hfsm.dispatch(&mut ctx, &TestEvent::Disconnect);
        assert!(result.is_err());
    }

    #[test]
    fn transition_fires_exit_then_entry_through_common_ancestor() {
        let mut ctx = Log::default();
        let mut hfsm = Hfsm::new(TestState::Idle, &mut ctx);
        ctx.0.clear();

        hfsm.dispatch(&mut ctx, &TestEvent::Connect).unwrap();
        assert_eq!(*hfsm.current(), TestState::Connecting);
        assert_eq!(ctx.0, vec!["exit Idle", "enter Connecting"]);

        ctx.0.clear();
        hfsm.dispatch(&mut ctx, &TestEvent::ConnAck).unwrap();
        assert_eq!(*hfsm.current(), TestState::Connected);
        assert_eq!(ctx.0, vec!["exit Connecting", "enter Connected"]);
    }
}
