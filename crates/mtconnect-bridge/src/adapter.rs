//! Outbound event sink and the SHDR adapter that serves it to agents.

#![allow(missing_docs)]

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use indexmap::IndexMap;
use smol_str::SmolStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::AdapterConfig;
use crate::error::BridgeError;

const UNAVAILABLE: &str = "UNAVAILABLE";
/// Longest a single write to an agent may block before it is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Named, string-valued state slots updated inside begin/complete brackets.
pub trait EventSink: Send {
    fn begin_transaction(&mut self);
    fn set_value(&mut self, name: &str, value: &str);
    fn complete_transaction(&mut self);
}

/// Writes a single value in its own transaction.
pub fn publish(sink: &mut dyn EventSink, name: &str, value: &str) {
    info!(data_item = name, value, "changing data item");
    sink.begin_transaction();
    sink.set_value(name, value);
    sink.complete_transaction();
}

/// SHDR adapter: agents connect over TCP and receive pipe-delimited updates.
pub struct ShdrAdapter {
    shared: Arc<Mutex<AdapterShared>>,
    local_addr: SocketAddr,
}

struct AdapterShared {
    items: IndexMap<SmolStr, ItemSlot>,
    clients: Vec<AgentConnection>,
    gathering: bool,
    heartbeat_ms: u64,
    next_client: u64,
}

#[derive(Default)]
struct ItemSlot {
    value: Option<SmolStr>,
    changed: bool,
}

struct AgentConnection {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
}

impl ShdrAdapter {
    pub fn start(
        config: &AdapterConfig,
        data_items: impl IntoIterator<Item = SmolStr>,
    ) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(config.listen.as_str()).map_err(|err| {
            BridgeError::Adapter(format!("bind {}: {err}", config.listen).into())
        })?;
        let local_addr = listener.local_addr()?;
        let shared = Arc::new(Mutex::new(AdapterShared {
            items: data_items
                .into_iter()
                .map(|name| (name, ItemSlot::default()))
                .collect(),
            clients: Vec::new(),
            gathering: false,
            heartbeat_ms: config.heartbeat_ms,
            next_client: 0,
        }));
        let accept_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("shdr-accept".into())
            .spawn(move || accept_loop(&listener, &accept_shared))?;
        info!(%local_addr, "SHDR adapter listening");
        Ok(Self { shared, local_addr })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        lock(&self.shared).clients.len()
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<SmolStr> {
        lock(&self.shared)
            .items
            .get(name)
            .and_then(|slot| slot.value.clone())
    }
}

impl EventSink for ShdrAdapter {
    fn begin_transaction(&mut self) {
        lock(&self.shared).gathering = true;
    }

    fn set_value(&mut self, name: &str, value: &str) {
        let mut shared = lock(&self.shared);
        let Some(slot) = shared.items.get_mut(name) else {
            warn!(data_item = name, "ignoring update for unknown data item");
            return;
        };
        if slot.value.as_deref() != Some(value) {
            slot.value = Some(SmolStr::new(value));
            slot.changed = true;
        }
        if !shared.gathering {
            shared.flush();
        }
    }

    fn complete_transaction(&mut self) {
        let mut shared = lock(&self.shared);
        shared.gathering = false;
        shared.flush();
    }
}

impl AdapterShared {
    fn flush(&mut self) {
        let mut line = timestamp();
        let mut any = false;
        for (name, slot) in &mut self.items {
            if slot.changed {
                slot.changed = false;
                any = true;
                push_field(&mut line, name, slot.value.as_deref().unwrap_or(UNAVAILABLE));
            }
        }
        if !any {
            return;
        }
        line.push('\n');
        self.broadcast(&line);
    }

    fn full_state(&self) -> Option<String> {
        if self.items.is_empty() {
            return None;
        }
        let mut line = timestamp();
        for (name, slot) in &self.items {
            push_field(&mut line, name, slot.value.as_deref().unwrap_or(UNAVAILABLE));
        }
        line.push('\n');
        Some(line)
    }

    fn broadcast(&mut self, line: &str) {
        debug!(line = line.trim_end(), clients = self.clients.len(), "SHDR update");
        self.clients.retain_mut(|client| match client.stream.write_all(line.as_bytes()) {
            Ok(()) => true,
            Err(err) => {
                warn!(peer = %client.peer, %err, "dropping agent connection");
                false
            }
        });
    }
}

fn push_field(line: &mut String, name: &str, value: &str) {
    line.push('|');
    line.push_str(name);
    line.push('|');
    line.push_str(&value.replace('|', "/"));
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn lock(shared: &Mutex<AdapterShared>) -> MutexGuard<'_, AdapterShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn accept_loop(listener: &TcpListener, shared: &Arc<Mutex<AdapterShared>>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(err) = register_agent(stream, shared) {
                    warn!(%err, "failed to register agent connection");
                }
            }
            Err(err) => warn!(%err, "SHDR accept failed"),
        }
    }
}

fn register_agent(
    stream: TcpStream,
    shared: &Arc<Mutex<AdapterShared>>,
) -> std::io::Result<()> {
    let peer = stream.peer_addr()?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    let reader = stream.try_clone()?;
    let mut writer = stream;

    let mut guard = lock(shared);
    if let Some(line) = guard.full_state() {
        writer.write_all(line.as_bytes())?;
    }
    let id = guard.next_client;
    guard.next_client += 1;
    guard.clients.push(AgentConnection {
        id,
        peer,
        stream: writer,
    });
    drop(guard);
    info!(%peer, "agent connected");

    let client_shared = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("shdr-agent-{id}"))
        .spawn(move || agent_loop(id, peer, reader, &client_shared))?;
    Ok(())
}

/// Answers heartbeats until the agent hangs up.
fn agent_loop(id: u64, peer: SocketAddr, reader: TcpStream, shared: &Mutex<AdapterShared>) {
    for line in BufReader::new(reader).lines() {
        let Ok(line) = line else {
            break;
        };
        if !line.trim_start().starts_with("* PING") {
            debug!(%peer, command = line.trim(), "ignoring agent command");
            continue;
        }
        let mut guard = lock(shared);
        let pong = format!("* PONG {}\n", guard.heartbeat_ms);
        let delivered = guard
            .clients
            .iter_mut()
            .find(|client| client.id == id)
            .is_some_and(|client| client.stream.write_all(pong.as_bytes()).is_ok());
        if !delivered {
            break;
        }
    }
    lock(shared).clients.retain(|client| client.id != id);
    info!(%peer, "agent disconnected");
}

/// Sink that keeps every update in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    open: bool,
    pending: Vec<(SmolStr, SmolStr)>,
    committed: Vec<(SmolStr, SmolStr)>,
    transactions: usize,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn updates(&self) -> Vec<(SmolStr, SmolStr)> {
        self.committed.clone()
    }

    pub(crate) fn transactions(&self) -> usize {
        self.transactions
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn begin_transaction(&mut self) {
        assert!(!self.open, "nested transaction");
        self.open = true;
    }

    fn set_value(&mut self, name: &str, value: &str) {
        assert!(self.open, "update outside transaction");
        self.pending.push((SmolStr::new(name), SmolStr::new(value)));
    }

    fn complete_transaction(&mut self) {
        assert!(self.open, "complete without begin");
        self.open = false;
        self.transactions += 1;
        self.committed.append(&mut self.pending);
    }
}
