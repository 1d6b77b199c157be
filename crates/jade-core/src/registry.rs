//! Port registry
//!
//! Owns the set of ports registered by a client. Registration checks the
//! name against its class, creates the port's queue, asks the backend for a
//! native port and splits the queue: one half goes to the caller as a
//! handle, the other is kept as a bridge lane until activation.

use crate::bridge::{AudioInLane, AudioOutLane, BridgeLanes, MidiInLane, MidiOutLane};
use crate::error::{BackendResult, ClientError, ClientResult};
use crate::port::{AudioInput, AudioOutput, MidiInput, MidiOutput, PortReceiver, PortSender};
use crate::queue::port_queue;
use crate::types::{PortClass, PortId, SILENCE};

/// A registered port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub class: PortClass,
    /// Per-class index assigned by the backend
    pub id: PortId,
    /// Queue capacity in samples or events
    pub capacity: usize,
}

/// Registered ports of one client
#[derive(Default)]
pub struct PortRegistry {
    ports: Vec<PortInfo>,
    lanes: BridgeLanes,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a port by name within a class
    pub fn get(&self, name: &str, class: PortClass) -> Option<&PortInfo> {
        self.ports.iter().find(|p| p.class == class && p.name == name)
    }

    pub fn contains(&self, name: &str, class: PortClass) -> bool {
        self.get(name, class).is_some()
    }

    /// Look up a port by name in any class
    pub fn find(&self, name: &str) -> Option<&PortInfo> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// All ports in registration order
    pub fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    /// Names of the ports in one class
    pub fn names(&self, class: PortClass) -> impl Iterator<Item = &str> + '_ {
        self.ports
            .iter()
            .filter(move |p| p.class == class)
            .map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Register an audio input port with a queue of `capacity` samples
    ///
    /// `native` registers the port with the audio server; it is only called
    /// once the name is known to be free.
    pub fn register_audio_in<F>(&mut self, name: &str, capacity: usize, native: F) -> ClientResult<AudioInput>
    where
        F: FnOnce(&str, PortClass) -> BackendResult<PortId>,
    {
        self.ensure_available(name, PortClass::AudioIn)?;
        let (tx, rx) = port_queue(capacity)?;
        let port = self.claim(name, PortClass::AudioIn, capacity, native)?;
        self.lanes.audio_ins.push(AudioInLane { port, queue: tx });
        Ok(PortReceiver::new(name, rx))
    }

    /// Register an audio output port with a queue of `capacity` samples
    pub fn register_audio_out<F>(&mut self, name: &str, capacity: usize, native: F) -> ClientResult<AudioOutput>
    where
        F: FnOnce(&str, PortClass) -> BackendResult<PortId>,
    {
        self.ensure_available(name, PortClass::AudioOut)?;
        let (tx, rx) = port_queue(capacity)?;
        let port = self.claim(name, PortClass::AudioOut, capacity, native)?;
        self.lanes.audio_outs.push(AudioOutLane {
            port,
            queue: rx,
            held: SILENCE,
        });
        Ok(PortSender::new(name, tx))
    }

    /// Register a MIDI input port with a queue of `capacity` events
    pub fn register_midi_in<F>(&mut self, name: &str, capacity: usize, native: F) -> ClientResult<MidiInput>
    where
        F: FnOnce(&str, PortClass) -> BackendResult<PortId>,
    {
        self.ensure_available(name, PortClass::MidiIn)?;
        let (tx, rx) = port_queue(capacity)?;
        let port = self.claim(name, PortClass::MidiIn, capacity, native)?;
        self.lanes.midi_ins.push(MidiInLane { port, queue: tx });
        Ok(PortReceiver::new(name, rx))
    }

    /// Register a MIDI output port with a queue of `capacity` events
    pub fn register_midi_out<F>(&mut self, name: &str, capacity: usize, native: F) -> ClientResult<MidiOutput>
    where
        F: FnOnce(&str, PortClass) -> BackendResult<PortId>,
    {
        self.ensure_available(name, PortClass::MidiOut)?;
        let (tx, rx) = port_queue(capacity)?;
        let port = self.claim(name, PortClass::MidiOut, capacity, native)?;
        self.lanes.midi_outs.push(MidiOutLane { port, queue: rx });
        Ok(PortSender::new(name, tx))
    }

    /// Hand every bridge lane over for activation
    pub(crate) fn take_lanes(&mut self) -> BridgeLanes {
        std::mem::take(&mut self.lanes)
    }

    fn ensure_available(&self, name: &str, class: PortClass) -> ClientResult<()> {
        if self.contains(name, class) {
            return Err(ClientError::DuplicateName {
                name: name.to_string(),
                class,
            });
        }
        Ok(())
    }

    fn claim<F>(&mut self, name: &str, class: PortClass, capacity: usize, native: F) -> ClientResult<PortId>
    where
        F: FnOnce(&str, PortClass) -> BackendResult<PortId>,
    {
        let id = native(name, class)?;
        log::debug!("Registered {} port '{}' (queue capacity {})", class, name, capacity);
        self.ports.push(PortInfo {
            name: name.to_string(),
            class,
            id,
            capacity,
        });
        Ok(id)
    }
}
