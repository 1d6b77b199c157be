//! Offline backend
//!
//! A server-less [`Backend`]: nothing runs on its own. An [`OfflineDriver`]
//! obtained before the backend is handed to a client plays the part of the
//! audio server. It fills native input buffers, runs process cycles on the
//! calling thread, reads native output buffers and raises server
//! notifications. Used for tests and headless rendering.
//!
//! System ports are simulated as `system:playback_N` and `system:capture_N`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{full_port_name, Backend, ProcessCycle, ServerEvents, SystemPorts};
use crate::bridge::Bridge;
use crate::error::{BackendError, BackendResult};
use crate::types::{MidiEvent, PortClass, PortId, Sample, SILENCE};
use crate::xrun::CycleReport;

/// Default number of simulated system ports per direction
const DEFAULT_SYSTEM_PORTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OfflineState {
    Inactive,
    Active,
    ShutDown,
    Closed,
}

/// Native per-cycle buffers, indexed by per-class port id
struct OfflineBuffers {
    frames: usize,
    audio_in: Vec<Vec<Sample>>,
    audio_out: Vec<Vec<Sample>>,
    midi_in: Vec<Vec<(u32, Vec<u8>)>>,
    midi_out: Vec<Vec<MidiEvent>>,
    midi_out_capacity: usize,
}

impl ProcessCycle for OfflineBuffers {
    fn frames(&self) -> usize {
        self.frames
    }

    fn audio_in(&self, port: PortId) -> &[Sample] {
        self.audio_in.get(port.0).map(Vec::as_slice).unwrap_or(&[])
    }

    fn audio_out(&mut self, port: PortId) -> &mut [Sample] {
        match self.audio_out.get_mut(port.0) {
            Some(buffer) => buffer.as_mut_slice(),
            None => &mut [],
        }
    }

    fn midi_in(&self, port: PortId, visit: &mut dyn FnMut(u32, &[u8])) {
        if let Some(events) = self.midi_in.get(port.0) {
            for (time, bytes) in events {
                visit(*time, bytes);
            }
        }
    }

    fn midi_out(&mut self, port: PortId, events: &mut dyn Iterator<Item = MidiEvent>) -> usize {
        let capacity = self.midi_out_capacity;
        let Some(buffer) = self.midi_out.get_mut(port.0) else {
            return events.count();
        };
        buffer.clear();
        let mut rejected = 0;
        for event in events {
            if buffer.len() < capacity {
                buffer.push(event);
            } else {
                rejected += 1;
            }
        }
        rejected
    }
}

struct OfflineShared {
    client_name: String,
    state: OfflineState,
    /// Port names per class, in per-class id order
    names: [Vec<String>; 4],
    buffers: OfflineBuffers,
    bridge: Option<Bridge>,
    events: Option<Arc<ServerEvents>>,
    playback: Vec<String>,
    capture: Vec<String>,
    connections: Vec<(String, String)>,
}

impl OfflineShared {
    fn class_index(class: PortClass) -> usize {
        match class {
            PortClass::AudioIn => 0,
            PortClass::AudioOut => 1,
            PortClass::MidiIn => 2,
            PortClass::MidiOut => 3,
        }
    }

    fn port_id(&self, name: &str, class: PortClass) -> BackendResult<usize> {
        self.names[Self::class_index(class)]
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| BackendError::UnknownPort(full_port_name(&self.client_name, name)))
    }

    /// Whether `full_name` is a port data can flow out of (or into)
    fn has_port(&self, full_name: &str, output: bool) -> bool {
        let system = if output { &self.capture } else { &self.playback };
        if system.iter().any(|p| p == full_name) {
            return true;
        }
        let Some(port) = full_name
            .strip_prefix(self.client_name.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
        else {
            return false;
        };
        let classes = if output {
            [PortClass::AudioOut, PortClass::MidiOut]
        } else {
            [PortClass::AudioIn, PortClass::MidiIn]
        };
        classes
            .iter()
            .any(|&class| self.names[Self::class_index(class)].iter().any(|n| n == port))
    }
}

/// Backend whose process cycles are driven by an [`OfflineDriver`]
pub struct OfflineBackend {
    name: String,
    name_not_unique: bool,
    sample_rate: u32,
    buffer_size: u32,
    shared: Arc<Mutex<OfflineShared>>,
}

impl OfflineBackend {
    pub fn new(name: &str, sample_rate: u32, buffer_size: u32) -> Self {
        let system = |kind: &str| {
            (1..=DEFAULT_SYSTEM_PORTS)
                .map(|i| format!("system:{}_{}", kind, i))
                .collect::<Vec<_>>()
        };
        let shared = OfflineShared {
            client_name: name.to_string(),
            state: OfflineState::Inactive,
            names: Default::default(),
            buffers: OfflineBuffers {
                frames: buffer_size as usize,
                audio_in: Vec::new(),
                audio_out: Vec::new(),
                midi_in: Vec::new(),
                midi_out: Vec::new(),
                midi_out_capacity: usize::MAX,
            },
            bridge: None,
            events: None,
            playback: system("playback"),
            capture: system("capture"),
            connections: Vec::new(),
        };
        Self {
            name: name.to_string(),
            name_not_unique: false,
            sample_rate,
            buffer_size,
            shared: Arc::new(Mutex::new(shared)),
        }
    }

    /// Simulate the server assigning another client name
    pub fn renamed(mut self, assigned: &str) -> Self {
        self.name = assigned.to_string();
        self.name_not_unique = true;
        self.lock().client_name = assigned.to_string();
        self
    }

    /// Set the number of simulated system playback and capture ports
    pub fn with_system_ports(self, playback: usize, capture: usize) -> Self {
        {
            let mut shared = self.lock();
            shared.playback = (1..=playback).map(|i| format!("system:playback_{}", i)).collect();
            shared.capture = (1..=capture).map(|i| format!("system:capture_{}", i)).collect();
        }
        self
    }

    /// Handle for driving this backend's cycles
    pub fn driver(&self) -> OfflineDriver {
        OfflineDriver {
            shared: self.shared.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OfflineShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for OfflineBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn name_not_unique(&self) -> bool {
        self.name_not_unique
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    fn register_port(&mut self, name: &str, class: PortClass) -> BackendResult<PortId> {
        let frames = self.buffer_size as usize;
        let mut shared = self.lock();
        if shared.state != OfflineState::Inactive {
            return Err(BackendError::InvalidState("ports must be registered before activation"));
        }

        let names = &mut shared.names[OfflineShared::class_index(class)];
        names.push(name.to_string());
        let id = PortId(names.len() - 1);

        let buffers = &mut shared.buffers;
        match class {
            PortClass::AudioIn => buffers.audio_in.push(vec![SILENCE; frames]),
            PortClass::AudioOut => buffers.audio_out.push(vec![SILENCE; frames]),
            PortClass::MidiIn => buffers.midi_in.push(Vec::new()),
            PortClass::MidiOut => buffers.midi_out.push(Vec::new()),
        }
        Ok(id)
    }

    fn activate(&mut self, bridge: Bridge, events: Arc<ServerEvents>) -> BackendResult<()> {
        let mut shared = self.lock();
        if shared.state != OfflineState::Inactive {
            return Err(BackendError::InvalidState("client already activated or closed"));
        }
        shared.bridge = Some(bridge);
        shared.events = Some(events);
        shared.state = OfflineState::Active;
        Ok(())
    }

    fn connect(&self, source: &str, destination: &str) -> BackendResult<()> {
        let mut shared = self.lock();
        if shared.state != OfflineState::Active {
            return Err(BackendError::InvalidState("connections require an active client"));
        }
        let missing = if !shared.has_port(source, true) {
            Some(source)
        } else if !shared.has_port(destination, false) {
            Some(destination)
        } else {
            None
        };
        if let Some(port) = missing {
            return Err(BackendError::Connection {
                source_port: source.to_string(),
                destination: destination.to_string(),
                reason: format!("no such port `{}'", port),
            });
        }
        shared
            .connections
            .push((source.to_string(), destination.to_string()));
        Ok(())
    }

    fn system_ports(&self, which: SystemPorts) -> BackendResult<Vec<String>> {
        let shared = self.lock();
        if shared.state == OfflineState::Closed {
            return Err(BackendError::InvalidState("client closed"));
        }
        Ok(match which {
            SystemPorts::Playback => shared.playback.clone(),
            SystemPorts::Capture => shared.capture.clone(),
        })
    }

    fn close(&mut self) -> BackendResult<()> {
        let mut shared = self.lock();
        shared.bridge = None;
        shared.connections.clear();
        shared.state = OfflineState::Closed;
        Ok(())
    }
}

/// Plays the audio server for an [`OfflineBackend`]
#[derive(Clone)]
pub struct OfflineDriver {
    shared: Arc<Mutex<OfflineShared>>,
}

impl OfflineDriver {
    fn lock(&self) -> MutexGuard<'_, OfflineShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Frames per cycle
    pub fn frames(&self) -> usize {
        self.lock().buffers.frames
    }

    /// True while cycles are being delivered
    pub fn is_active(&self) -> bool {
        self.lock().state == OfflineState::Active
    }

    /// Native input samples for the next cycle (missing frames are silence)
    pub fn set_audio_input(&self, port: &str, samples: &[Sample]) -> BackendResult<()> {
        let mut shared = self.lock();
        let id = shared.port_id(port, PortClass::AudioIn)?;
        let buffer = &mut shared.buffers.audio_in[id];
        buffer.fill(SILENCE);
        for (slot, &sample) in buffer.iter_mut().zip(samples) {
            *slot = sample;
        }
        Ok(())
    }

    /// Queue a native MIDI event for the next cycle
    pub fn push_midi_input(&self, port: &str, time: u32, bytes: &[u8]) -> BackendResult<()> {
        let mut shared = self.lock();
        let id = shared.port_id(port, PortClass::MidiIn)?;
        shared.buffers.midi_in[id].push((time, bytes.to_vec()));
        Ok(())
    }

    /// Native MIDI output buffer size in events per port per cycle
    pub fn set_midi_output_capacity(&self, capacity: usize) {
        self.lock().buffers.midi_out_capacity = capacity;
    }

    /// Run one process cycle on the calling thread
    ///
    /// Returns `None` unless the client is active. Native inputs are
    /// consumed: audio inputs fall back to silence, MIDI inputs are cleared.
    pub fn run_cycle(&self) -> Option<CycleReport> {
        let mut guard = self.lock();
        if guard.state != OfflineState::Active {
            return None;
        }
        let shared = &mut *guard;
        let report = shared.bridge.as_mut()?.process(&mut shared.buffers);

        for buffer in &mut shared.buffers.audio_in {
            buffer.fill(SILENCE);
        }
        for events in &mut shared.buffers.midi_in {
            events.clear();
        }
        Some(report)
    }

    /// Native output buffer of the last cycle
    pub fn audio_output(&self, port: &str) -> Option<Vec<Sample>> {
        let shared = self.lock();
        let id = shared.port_id(port, PortClass::AudioOut).ok()?;
        Some(shared.buffers.audio_out[id].clone())
    }

    /// Native MIDI output of the last cycle
    pub fn midi_output(&self, port: &str) -> Option<Vec<MidiEvent>> {
        let shared = self.lock();
        let id = shared.port_id(port, PortClass::MidiOut).ok()?;
        Some(shared.buffers.midi_out[id].clone())
    }

    /// Connections made through the backend, as (source, destination)
    pub fn connections(&self) -> Vec<(String, String)> {
        self.lock().connections.clone()
    }

    /// Raise a server xrun notification
    pub fn simulate_xrun(&self) {
        if let Some(events) = &self.lock().events {
            events.record_xrun();
        }
    }

    /// Simulate the server shutting the client down; cycles stop
    pub fn simulate_shutdown(&self) {
        let mut shared = self.lock();
        if let Some(events) = &shared.events {
            events.mark_shutdown();
        }
        if shared.state == OfflineState::Active {
            shared.state = OfflineState::ShutDown;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeLanes;
    use crate::xrun::XrunCounters;

    fn empty_bridge() -> Bridge {
        let (tx, _rx) = rtrb::RingBuffer::new(4);
        Bridge::new(BridgeLanes::default(), Arc::new(XrunCounters::new()), tx)
    }

    #[test]
    fn test_ports_get_per_class_ids() {
        let mut backend = OfflineBackend::new("jade", 48_000, 64);
        assert_eq!(backend.register_port("a", PortClass::AudioOut).unwrap(), PortId(0));
        assert_eq!(backend.register_port("b", PortClass::AudioOut).unwrap(), PortId(1));
        assert_eq!(backend.register_port("m", PortClass::MidiIn).unwrap(), PortId(0));
    }

    #[test]
    fn test_cycles_only_run_while_active() {
        let mut backend = OfflineBackend::new("jade", 48_000, 64);
        let driver = backend.driver();
        assert!(driver.run_cycle().is_none());

        backend.activate(empty_bridge(), Arc::new(ServerEvents::new())).unwrap();
        assert_eq!(driver.run_cycle().map(|r| r.frames), Some(64));
        assert!(matches!(
            backend.register_port("late", PortClass::AudioIn),
            Err(BackendError::InvalidState(_))
        ));

        backend.close().unwrap();
        assert!(driver.run_cycle().is_none());
    }

    #[test]
    fn test_connect_validates_names_and_direction() {
        let mut backend = OfflineBackend::new("jade", 48_000, 64);
        backend.register_port("out", PortClass::AudioOut).unwrap();
        backend.register_port("in", PortClass::AudioIn).unwrap();
        backend.activate(empty_bridge(), Arc::new(ServerEvents::new())).unwrap();

        backend.connect("jade:out", "system:playback_1").unwrap();
        backend.connect("system:capture_2", "jade:in").unwrap();
        assert!(backend.connect("jade:in", "system:playback_1").is_err());
        assert!(backend.connect("jade:out", "system:playback_9").is_err());
        assert_eq!(backend.driver().connections().len(), 2);
    }

    #[test]
    fn test_renamed_client_uses_assigned_name() {
        let mut backend = OfflineBackend::new("jade", 48_000, 64).renamed("jade-01");
        assert!(backend.name_not_unique());
        backend.register_port("out", PortClass::AudioOut).unwrap();
        backend.activate(empty_bridge(), Arc::new(ServerEvents::new())).unwrap();
        assert!(backend.connect("jade-01:out", "system:playback_1").is_ok());
        assert!(backend.connect("jade:out", "system:playback_1").is_err());
    }

    #[test]
    fn test_shutdown_stops_cycles_and_sets_flag() {
        let mut backend = OfflineBackend::new("jade", 48_000, 64);
        let driver = backend.driver();
        let events = Arc::new(ServerEvents::new());
        backend.activate(empty_bridge(), events.clone()).unwrap();

        driver.simulate_xrun();
        driver.simulate_shutdown();
        assert_eq!(events.server_xruns(), 1);
        assert!(events.is_shut_down());
        assert!(driver.run_cycle().is_none());
    }

    #[test]
    fn test_system_ports_configurable() {
        let backend = OfflineBackend::new("jade", 48_000, 64).with_system_ports(4, 0);
        assert_eq!(backend.system_ports(SystemPorts::Playback).unwrap().len(), 4);
        assert!(backend.system_ports(SystemPorts::Capture).unwrap().is_empty());
    }
}
