//! MTConnect to remote-action bridge.
//!
//! Watches an MTConnect agent stream for action requests, runs the matching
//! remote action and reports the outcome back through an SHDR adapter using
//! the ACTIVE/READY handshake.

pub mod action;
pub mod adapter;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod goal;
pub mod handshake;
pub mod names;
pub mod snapshot;
pub mod stream;

pub use bridge::{Bridge, BridgeParts, ChunkOutcome};
pub use config::BridgeConfig;
pub use error::{BridgeError, DispatchError};
pub use handshake::HandshakeMachine;
