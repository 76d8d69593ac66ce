//! Pipeline wiring: stream chunks in, handshake transitions and sink updates out.

#![allow(missing_docs)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::adapter::EventSink;
use crate::dispatch::Dispatch;
use crate::error::BridgeError;
use crate::goal::{GoalRegistry, GoalSource};
use crate::handshake::{HandshakeMachine, StepContext, Transition};
use crate::snapshot::{parse_snapshot, parse_snapshot_bytes};
use crate::stream::AgentClient;

const STATE_READY: &str = "READY";

/// Collaborators a bridge drives.
pub struct BridgeParts {
    pub goals: Box<dyn GoalSource>,
    pub dispatcher: Box<dyn Dispatch>,
    pub sink: Box<dyn EventSink>,
}

#[derive(Debug)]
pub enum ChunkOutcome {
    Processed(Vec<Transition>),
    /// The chunk could not be parsed and was skipped.
    Dropped(BridgeError),
}

impl ChunkOutcome {
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        match self {
            Self::Processed(transitions) => transitions,
            Self::Dropped(_) => &[],
        }
    }
}

pub struct Bridge {
    registry: Arc<GoalRegistry>,
    namespace: SmolStr,
    watched: Vec<SmolStr>,
    core: Mutex<BridgeCore>,
}

struct BridgeCore {
    machine: HandshakeMachine,
    parts: BridgeParts,
}

impl Bridge {
    pub fn new(
        registry: Arc<GoalRegistry>,
        namespace: impl Into<SmolStr>,
        parts: BridgeParts,
    ) -> Self {
        let watched = registry.actions();
        Self {
            registry,
            namespace: namespace.into(),
            watched,
            core: Mutex::new(BridgeCore {
                machine: HandshakeMachine::new(),
                parts,
            }),
        }
    }

    #[must_use]
    pub fn watched(&self) -> &[SmolStr] {
        &self.watched
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<SmolStr> {
        self.lock().machine.in_flight().map(SmolStr::new)
    }

    /// Sets every outbound data item to `READY` in a single transaction.
    pub fn announce_ready(&self) {
        let mut core = self.lock();
        let sink = &mut core.parts.sink;
        sink.begin_transaction();
        for schema in self.registry.schemas() {
            sink.set_value(&schema.data_item(), STATE_READY);
        }
        sink.complete_transaction();
        info!(data_items = self.registry.len(), "outbound data items ready");
    }

    /// Runs one chunk through parse, handshake and dispatch while holding the
    /// bridge lock, so chunks never interleave.
    pub fn on_chunk(&self, chunk: &[u8]) -> ChunkOutcome {
        let mut core = self.lock();
        let snapshot = match parse_snapshot_bytes(chunk, &self.namespace, &self.watched) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(%err, bytes = chunk.len(), "dropping unparsable chunk");
                return ChunkOutcome::Dropped(err);
            }
        };
        debug!(
            next_sequence = %snapshot.next_sequence,
            elements = snapshot.elements.len(),
            "chunk parsed"
        );
        let BridgeCore { machine, parts } = &mut *core;
        let mut ctx = StepContext {
            goals: parts.goals.as_ref(),
            dispatcher: parts.dispatcher.as_mut(),
            sink: parts.sink.as_mut(),
        };
        ChunkOutcome::Processed(machine.step(snapshot.elements, &mut ctx))
    }

    /// Reads the agent's current document for the starting sequence, then
    /// follows the sample stream until the agent closes it. Failing to fetch
    /// or parse the starting document is fatal.
    pub fn run(&self, agent: &AgentClient) -> Result<usize, BridgeError> {
        let current = agent.current()?;
        let snapshot = parse_snapshot(&current, &self.namespace, &self.watched)?;
        info!(
            agent = agent.base_url(),
            from = %snapshot.next_sequence,
            "following sample stream"
        );
        agent.stream_from(&snapshot.next_sequence, |chunk| {
            self.on_chunk(chunk);
        })
    }

    fn lock(&self) -> MutexGuard<'_, BridgeCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
