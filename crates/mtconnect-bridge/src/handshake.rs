//! ACTIVE/READY handshake between the machine tool and the action server.
//!
//! The machine raises a watched data item to `ACTIVE` to request an action.
//! The bridge runs the action, reports its result on the matching outbound
//! data item and remembers the element's `name` as the handshake in flight.
//! When the machine drops the item back to `READY` for that same name, the
//! bridge echoes `READY` and clears the handshake. Only one handshake is in
//! flight at any time.

#![allow(missing_docs)]

use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::adapter::{publish, EventSink};
use crate::dispatch::Dispatch;
use crate::error::DispatchError;
use crate::goal::GoalSource;
use crate::names::data_item_name;
use crate::snapshot::{ElementState, WatchedElement};

const STATE_READY: &str = "READY";

/// Collaborators used while processing one chunk.
pub struct StepContext<'a> {
    pub goals: &'a dyn GoalSource,
    pub dispatcher: &'a mut dyn Dispatch,
    pub sink: &'a mut dyn EventSink,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Action ran; `handshake` is now in flight.
    Dispatched {
        action: SmolStr,
        handshake: SmolStr,
        result: SmolStr,
        superseded: Option<SmolStr>,
    },
    /// Matching READY seen; no handshake in flight.
    Completed { action: SmolStr, handshake: SmolStr },
    /// Request dropped, handshake untouched.
    DispatchFailed {
        action: SmolStr,
        handshake: SmolStr,
        error: DispatchError,
    },
    Ignored {
        action: SmolStr,
        handshake: SmolStr,
        state: SmolStr,
    },
}

#[derive(Debug, Default)]
pub struct HandshakeMachine {
    in_flight: Option<SmolStr>,
}

impl HandshakeMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    /// Processing order for one chunk. A READY closing the current handshake
    /// and a new request can share a chunk; when the first element is not the
    /// in-flight handshake the list is reversed so the close is seen first.
    ///
    /// Only observed with two elements per chunk.
    #[must_use]
    pub fn order(&self, mut elements: Vec<WatchedElement>) -> Vec<WatchedElement> {
        let reverse = elements.len() > 1
            && elements
                .first()
                .is_some_and(|first| self.in_flight.as_deref() != Some(first.handshake.as_str()));
        if reverse {
            debug!(in_flight = ?self.in_flight, "reversing element order");
            elements.reverse();
        }
        elements
    }

    pub fn step(
        &mut self,
        elements: Vec<WatchedElement>,
        ctx: &mut StepContext<'_>,
    ) -> Vec<Transition> {
        self.order(elements)
            .into_iter()
            .map(|element| self.apply(element, ctx))
            .collect()
    }

    fn apply(&mut self, element: WatchedElement, ctx: &mut StepContext<'_>) -> Transition {
        let in_flight = self.in_flight.as_deref() == Some(element.handshake.as_str());
        match &element.state {
            ElementState::Active if !in_flight => self.request(element, ctx),
            ElementState::Ready if in_flight => {
                publish(&mut *ctx.sink, &data_item_name(&element.action), STATE_READY);
                self.in_flight = None;
                info!(
                    action = %element.action,
                    handshake = %element.handshake,
                    "handshake complete"
                );
                Transition::Completed {
                    action: element.action,
                    handshake: element.handshake,
                }
            }
            _ => {
                let state = SmolStr::new(element.state.as_str());
                debug!(
                    action = %element.action,
                    handshake = %element.handshake,
                    %state,
                    "no transition"
                );
                Transition::Ignored {
                    action: element.action,
                    handshake: element.handshake,
                    state,
                }
            }
        }
    }

    fn request(&mut self, element: WatchedElement, ctx: &mut StepContext<'_>) -> Transition {
        info!(action = %element.action, handshake = %element.handshake, "action requested");
        let outcome = match ctx.goals.goal_for(&element.action) {
            Ok(goal) => ctx.dispatcher.dispatch(&goal, &mut *ctx.sink),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(result) => {
                let superseded = self.in_flight.replace(element.handshake.clone());
                if let Some(previous) = superseded.as_deref() {
                    warn!(previous, next = %element.handshake, "handshake superseded before READY");
                }
                publish(&mut *ctx.sink, &data_item_name(&element.action), &result);
                Transition::Dispatched {
                    action: element.action,
                    handshake: element.handshake,
                    result,
                    superseded,
                }
            }
            Err(error) => {
                warn!(action = %element.action, %error, "dispatch failed, request dropped");
                Transition::DispatchFailed {
                    action: element.action,
                    handshake: element.handshake,
                    error,
                }
            }
        }
    }
}
