//! Native JACK backend for Linux
//!
//! Registers named JACK ports, installs the [`Bridge`] as the process
//! callback and routes ports by name. Works with JACK2 and PipeWire's JACK
//! compatibility layer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                     ┌─────────────────────┐
//! │  Pump / Consumer │───push()/pop()─────►│    Port Queues      │
//! │     Threads      │                     │  (lock-free SPSC)   │
//! └──────────────────┘                     └──────────┬──────────┘
//!                                                     │ pop()/push()
//! ┌──────────────────┐                     ┌──────────▼──────────┐
//! │   ServerEvents   │◄──── atomics ───────│  JACK RT Thread     │
//! │   (lock-free)    │  (notifications)    │  (owns the Bridge)  │
//! └──────────────────┘                     └─────────────────────┘
//! ```

use std::sync::Arc;

use jack::{
    AudioIn, AudioOut, Client, ClientOptions, ClientStatus, Control, MidiIn, MidiOut, Port, PortFlags,
    ProcessScope, RawMidi,
};

use super::{Backend, ProcessCycle, ServerEvents, SystemPorts};
use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::{BackendError, BackendResult};
use crate::types::{MidiEvent, PortClass, PortId, Sample};

/// Matches JACK's default audio port type ("32 bit float mono audio")
const AUDIO_TYPE_PATTERN: &str = "audio";

/// Native JACK ports, indexed by per-class port id
#[derive(Default)]
struct NativePorts {
    audio_in: Vec<Port<AudioIn>>,
    audio_out: Vec<Port<AudioOut>>,
    midi_in: Vec<Port<MidiIn>>,
    midi_out: Vec<Port<MidiOut>>,
}

impl NativePorts {
    fn register(&mut self, client: &Client, name: &str, class: PortClass) -> Result<PortId, jack::Error> {
        let id = match class {
            PortClass::AudioIn => {
                self.audio_in.push(client.register_port(name, AudioIn::default())?);
                self.audio_in.len()
            }
            PortClass::AudioOut => {
                self.audio_out.push(client.register_port(name, AudioOut::default())?);
                self.audio_out.len()
            }
            PortClass::MidiIn => {
                self.midi_in.push(client.register_port(name, MidiIn::default())?);
                self.midi_in.len()
            }
            PortClass::MidiOut => {
                self.midi_out.push(client.register_port(name, MidiOut::default())?);
                self.midi_out.len()
            }
        };
        Ok(PortId(id - 1))
    }
}

/// JACK process handler
///
/// Owns the bridge exclusively - no mutex needed.
struct JackProcessor {
    ports: NativePorts,
    bridge: Bridge,
}

impl jack::ProcessHandler for JackProcessor {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        let mut cycle = JackCycle {
            ps,
            ports: &mut self.ports,
        };
        self.bridge.process(&mut cycle);

        // Degradation is reported through the bridge, never to the server
        Control::Continue
    }
}

/// Per-cycle view of the native port buffers
struct JackCycle<'a> {
    ps: &'a ProcessScope,
    ports: &'a mut NativePorts,
}

impl ProcessCycle for JackCycle<'_> {
    fn frames(&self) -> usize {
        self.ps.n_frames() as usize
    }

    fn audio_in(&self, port: PortId) -> &[Sample] {
        match self.ports.audio_in.get(port.0) {
            Some(p) => p.as_slice(self.ps),
            None => &[],
        }
    }

    fn audio_out(&mut self, port: PortId) -> &mut [Sample] {
        match self.ports.audio_out.get_mut(port.0) {
            Some(p) => p.as_mut_slice(self.ps),
            None => &mut [],
        }
    }

    fn midi_in(&self, port: PortId, visit: &mut dyn FnMut(u32, &[u8])) {
        if let Some(p) = self.ports.midi_in.get(port.0) {
            for raw in p.iter(self.ps) {
                visit(raw.time, raw.bytes);
            }
        }
    }

    fn midi_out(&mut self, port: PortId, events: &mut dyn Iterator<Item = MidiEvent>) -> usize {
        let Some(p) = self.ports.midi_out.get_mut(port.0) else {
            return events.count();
        };
        // Creating the writer clears this cycle's buffer
        let mut writer = p.writer(self.ps);
        let mut rejected = 0;
        for event in events {
            let raw = RawMidi {
                time: event.time(),
                bytes: event.bytes(),
            };
            if writer.write(&raw).is_err() {
                rejected += 1;
            }
        }
        rejected
    }
}

/// JACK notification handler
///
/// Runs on JACK's notification thread; only touches atomics.
struct JackNotifications {
    events: Arc<ServerEvents>,
}

impl jack::NotificationHandler for JackNotifications {
    fn shutdown(&mut self, _status: ClientStatus, _reason: &str) {
        self.events.mark_shutdown();
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        self.events.record_xrun();
        Control::Continue
    }
}

enum JackState {
    Inactive { client: Client, ports: NativePorts },
    Active(jack::AsyncClient<JackNotifications, JackProcessor>),
    Closed,
}

/// JACK server connection
pub struct JackBackend {
    name: String,
    name_not_unique: bool,
    sample_rate: u32,
    buffer_size: u32,
    state: JackState,
}

impl JackBackend {
    /// Open a JACK client named after `config.client_name`
    ///
    /// JACK may assign a different name if the requested one is taken.
    pub fn open(config: &BridgeConfig) -> BackendResult<Self> {
        let options = if config.start_server {
            ClientOptions::empty()
        } else {
            ClientOptions::NO_START_SERVER
        };
        let (client, status) = Client::new(&config.client_name, options)
            .map_err(|e| BackendError::Open(format!("Failed to create JACK client: {}", e)))?;

        let name = client.name().to_string();
        let sample_rate = client.sample_rate() as u32;
        let buffer_size = client.buffer_size();

        log::info!(
            "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames)",
            name,
            sample_rate,
            buffer_size
        );

        Ok(Self {
            name,
            name_not_unique: status.contains(ClientStatus::NAME_NOT_UNIQUE),
            sample_rate,
            buffer_size,
            state: JackState::Inactive {
                client,
                ports: NativePorts::default(),
            },
        })
    }

    fn client(&self) -> BackendResult<&Client> {
        match &self.state {
            JackState::Inactive { client, .. } => Ok(client),
            JackState::Active(async_client) => Ok(async_client.as_client()),
            JackState::Closed => Err(BackendError::InvalidState("JACK client closed")),
        }
    }
}

impl Backend for JackBackend {
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
        match &mut self.state {
            JackState::Inactive { client, ports } => {
                ports
                    .register(client, name, class)
                    .map_err(|e| BackendError::PortRegistration {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })
            }
            _ => Err(BackendError::InvalidState("ports must be registered before activation")),
        }
    }

    fn activate(&mut self, bridge: Bridge, events: Arc<ServerEvents>) -> BackendResult<()> {
        let (client, ports) = match std::mem::replace(&mut self.state, JackState::Closed) {
            JackState::Inactive { client, ports } => (client, ports),
            other => {
                self.state = other;
                return Err(BackendError::InvalidState("JACK client already activated or closed"));
            }
        };

        let processor = JackProcessor { ports, bridge };
        let notifications = JackNotifications { events };
        let async_client = client
            .activate_async(notifications, processor)
            .map_err(|e| BackendError::Activation(format!("Failed to activate JACK client: {}", e)))?;

        log::info!("JACK client '{}' activated", self.name);
        self.state = JackState::Active(async_client);
        Ok(())
    }

    fn connect(&self, source: &str, destination: &str) -> BackendResult<()> {
        self.client()?
            .connect_ports_by_name(source, destination)
            .map_err(|e| BackendError::Connection {
                source_port: source.to_string(),
                destination: destination.to_string(),
                reason: e.to_string(),
            })
    }

    fn system_ports(&self, which: SystemPorts) -> BackendResult<Vec<String>> {
        // Playback ports are inputs from JACK's point of view
        let direction = match which {
            SystemPorts::Playback => PortFlags::IS_INPUT,
            SystemPorts::Capture => PortFlags::IS_OUTPUT,
        };
        let ports = self.client()?.ports(
            None,
            Some(AUDIO_TYPE_PATTERN),
            direction | PortFlags::IS_PHYSICAL,
        );
        log::debug!("Found {} physical JACK {:?} ports", ports.len(), which);
        Ok(ports)
    }

    fn close(&mut self) -> BackendResult<()> {
        match std::mem::replace(&mut self.state, JackState::Closed) {
            JackState::Active(async_client) => {
                async_client
                    .deactivate()
                    .map_err(|e| BackendError::Close(format!("Failed to deactivate JACK client: {}", e)))?;
                log::info!("JACK client '{}' closed", self.name);
            }
            JackState::Inactive { .. } | JackState::Closed => {}
        }
        Ok(())
    }
}
