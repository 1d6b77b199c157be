//! Native audio connection adapters
//!
//! The bridge and the client only depend on the narrow [`Backend`]
//! capability: open/activate/close, port registration, a per-cycle buffer
//! accessor ([`ProcessCycle`]) and connect-by-name. Each binding supplies an
//! adapter:
//!
//! - **JACK** (`jack-backend` feature, Linux): native port-level routing
//! - **Offline**: cycles driven manually, for tests and headless rendering

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::bridge::Bridge;
use crate::error::BackendResult;
use crate::types::{MidiEvent, PortClass, PortId, Sample};

pub mod offline;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub mod jack_backend;

pub use offline::{OfflineBackend, OfflineDriver};

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use jack_backend::JackBackend;

/// Physical ports exposed by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPorts {
    /// Speakers: physical ports we write into
    Playback,
    /// Sources: physical ports we read from
    Capture,
}

/// Native buffers for one process cycle
///
/// Implemented by each adapter over its server's per-cycle buffers. The
/// `PortId` is the per-class index the adapter returned at registration.
/// Unknown ids yield empty buffers.
pub trait ProcessCycle {
    /// Frames in this cycle
    fn frames(&self) -> usize;

    /// Captured samples for an audio input port
    fn audio_in(&self, port: PortId) -> &[Sample];

    /// Playback buffer for an audio output port
    fn audio_out(&mut self, port: PortId) -> &mut [Sample];

    /// Visit this cycle's MIDI input events in server order
    fn midi_in(&self, port: PortId, visit: &mut dyn FnMut(u32, &[u8]));

    /// Write MIDI events (non-decreasing times) to an output port
    ///
    /// Called once per cycle per port, even with no events, so the adapter
    /// can clear the native buffer. Returns the number of refused events.
    fn midi_out(&mut self, port: PortId, events: &mut dyn Iterator<Item = MidiEvent>) -> usize;
}

/// Audio server connection
pub trait Backend: Send {
    /// Client name as assigned by the server
    fn name(&self) -> &str;

    /// True when the server had to rename the client
    fn name_not_unique(&self) -> bool {
        false
    }

    fn sample_rate(&self) -> u32;

    /// Frames per process cycle
    fn buffer_size(&self) -> u32;

    /// Register a native port; returns its per-class index
    fn register_port(&mut self, name: &str, class: PortClass) -> BackendResult<PortId>;

    /// Install the bridge as the process callback and start processing
    ///
    /// `events` receives server notifications (xruns, shutdown).
    fn activate(&mut self, bridge: Bridge, events: std::sync::Arc<ServerEvents>) -> BackendResult<()>;

    /// Connect two ports by full name (`client:port`)
    fn connect(&self, source: &str, destination: &str) -> BackendResult<()>;

    /// Full names of the server's physical ports
    fn system_ports(&self, which: SystemPorts) -> BackendResult<Vec<String>>;

    /// Deactivate and release the connection (drops the bridge)
    fn close(&mut self) -> BackendResult<()>;
}

/// Server notifications, written from the server's notification thread
///
/// Only atomics: JACK requires the shutdown handler to behave like a signal
/// handler. The diagnostics worker turns these into diagnostics.
#[derive(Debug, Default)]
pub struct ServerEvents {
    shutdown: AtomicBool,
    xruns: AtomicU64,
}

impl ServerEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_xrun(&self) {
        self.xruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn server_xruns(&self) -> u64 {
        self.xruns.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Qualify a port name with its client name
pub fn full_port_name(client: &str, port: &str) -> String {
    format!("{}:{}", client, port)
}
