//! Jade Core - Real-time bridge between an audio server and a synthesis engine
//!
//! The audio server calls the [`bridge::Bridge`] once per frame period on its
//! real-time thread. The bridge moves frames between native port buffers and
//! bounded lock-free queues, one per port. Everything slower (synthesis,
//! MIDI handling, diagnostics) runs on ordinary threads on the far side of
//! those queues.

pub mod backend;
pub mod bridge;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod port;
pub mod pump;
pub mod queue;
pub mod registry;
pub mod signal;
pub mod types;
pub mod xrun;

pub use client::{Client, ClientState};
pub use error::{BackendError, ClientError, ClientResult};
pub use types::*;
