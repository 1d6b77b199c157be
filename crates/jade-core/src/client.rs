//! Client: composition root of the bridge
//!
//! A client owns the audio-server connection, the port registry, the
//! diagnostics worker and the xrun counters. Its lifecycle is linear:
//!
//! ```text
//! open ──► add ports ──► activate ──► connect / play ──► close
//! ```
//!
//! Ports are registered while the client is open and frozen at activation,
//! when the registry's lanes are moved into the [`Bridge`] and the bridge
//! into the backend. After `close()` every operation fails with
//! [`ClientError::ClientClosed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{full_port_name, Backend, ServerEvents, SystemPorts};
use crate::bridge::Bridge;
use crate::config::{validate_buffer_ratio, BridgeConfig};
use crate::diagnostics::{Diagnostic, DiagnosticsProducer, DiagnosticsSink, DiagnosticsWorker};
use crate::engine::SampleSource;
use crate::error::{ClientError, ClientResult};
use crate::port::{AudioInput, AudioOutput, MidiInput, MidiOutput};
use crate::pump::SynthesisPump;
use crate::queue::{input_capacity, output_capacity, port_queue};
use crate::registry::{PortInfo, PortRegistry};
use crate::types::PortClass;
use crate::xrun::{XrunCounters, XrunStats};

/// Observable client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, ports may be added
    Open,
    /// Processing cycles
    Active,
    /// The audio server shut the client down
    ServerShutdown,
    /// Closed by the caller
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Active,
    Closed,
}

/// A connection to the audio server with its ports and bridge
pub struct Client<B: Backend> {
    backend: B,
    config: BridgeConfig,
    registry: PortRegistry,
    sink: Arc<dyn DiagnosticsSink>,
    counters: Arc<XrunCounters>,
    events: Arc<ServerEvents>,
    /// Handed to the bridge at activation
    diagnostics_tx: Option<DiagnosticsProducer>,
    worker: Option<DiagnosticsWorker>,
    pump_active: Arc<AtomicBool>,
    lifecycle: Lifecycle,
}

impl<B: Backend> Client<B> {
    /// Wrap an opened backend connection
    ///
    /// Starts the diagnostics worker. If the server assigned another name,
    /// a [`Diagnostic::ClientNameNotUnique`] is reported.
    pub fn open(backend: B, config: BridgeConfig, sink: Arc<dyn DiagnosticsSink>) -> ClientResult<Self> {
        config.validate()?;

        let counters = Arc::new(XrunCounters::new());
        let events = Arc::new(ServerEvents::new());
        let (diagnostics_tx, diagnostics_rx) = port_queue(config.diagnostics_capacity)?;
        let worker = DiagnosticsWorker::spawn(
            diagnostics_rx,
            sink.clone(),
            events.clone(),
            counters.clone(),
            Duration::from_millis(config.diagnostics_poll_ms),
        )?;

        if backend.name_not_unique() {
            sink.report(&Diagnostic::ClientNameNotUnique {
                assigned: backend.name().to_string(),
            });
        }

        let client = Self {
            backend,
            config,
            registry: PortRegistry::new(),
            sink,
            counters,
            events,
            diagnostics_tx: Some(diagnostics_tx),
            worker: Some(worker),
            pump_active: Arc::new(AtomicBool::new(false)),
            lifecycle: Lifecycle::Open,
        };

        log::info!(
            "Client '{}' opened (sample rate: {}Hz, buffer: {} frames, latency: {:.1}ms)",
            client.name(),
            client.sample_rate(),
            client.buffer_size(),
            client.latency_ms()
        );
        Ok(client)
    }

    // ───────────────────────────────────────────────────────────────
    // Properties
    // ───────────────────────────────────────────────────────────────

    /// Client name as assigned by the server
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn sample_rate(&self) -> u32 {
        self.backend.sample_rate()
    }

    /// Frames per process cycle
    pub fn buffer_size(&self) -> u32 {
        self.backend.buffer_size()
    }

    /// Duration of one frame period in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size() as f32 / self.sample_rate().max(1) as f32) * 1000.0
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> ClientState {
        match self.lifecycle {
            Lifecycle::Closed => ClientState::Closed,
            _ if self.events.is_shut_down() => ClientState::ServerShutdown,
            Lifecycle::Open => ClientState::Open,
            Lifecycle::Active => ClientState::Active,
        }
    }

    /// Registered ports in registration order
    pub fn ports(&self) -> &[PortInfo] {
        self.registry.ports()
    }

    /// Snapshot of the cumulative xrun counters
    pub fn xrun_stats(&self) -> XrunStats {
        self.counters.snapshot(self.events.server_xruns())
    }

    // ───────────────────────────────────────────────────────────────
    // Port registration
    // ───────────────────────────────────────────────────────────────

    fn frames(&self) -> usize {
        self.buffer_size() as usize
    }

    fn ensure_registrable(&self) -> ClientResult<()> {
        match self.lifecycle {
            Lifecycle::Open => Ok(()),
            Lifecycle::Active => Err(ClientError::AlreadyActive),
            Lifecycle::Closed => Err(ClientError::ClientClosed),
        }
    }

    fn ensure_active(&self) -> ClientResult<()> {
        match self.lifecycle {
            Lifecycle::Active => Ok(()),
            Lifecycle::Open => Err(ClientError::NotActive),
            Lifecycle::Closed => Err(ClientError::ClientClosed),
        }
    }

    fn ensure_not_closed(&self) -> ClientResult<()> {
        if self.lifecycle == Lifecycle::Closed {
            return Err(ClientError::ClientClosed);
        }
        Ok(())
    }

    /// Add an audio input port; its queue holds one frame period
    pub fn add_audio_in(&mut self, name: &str) -> ClientResult<AudioInput> {
        self.ensure_registrable()?;
        let capacity = input_capacity(self.frames());
        let backend = &mut self.backend;
        self.registry
            .register_audio_in(name, capacity, |n, class| backend.register_port(n, class))
    }

    /// Add an audio output port
    ///
    /// The queue holds one frame period plus `buffer_ratio` periods of
    /// headroom for the pump.
    pub fn add_audio_out(&mut self, name: &str, buffer_ratio: f32) -> ClientResult<AudioOutput> {
        self.ensure_registrable()?;
        validate_buffer_ratio(buffer_ratio)?;
        let capacity = output_capacity(self.frames(), buffer_ratio);
        let backend = &mut self.backend;
        self.registry
            .register_audio_out(name, capacity, |n, class| backend.register_port(n, class))
    }

    /// Add an audio output port with the configured buffer ratio
    pub fn add_audio_out_default(&mut self, name: &str) -> ClientResult<AudioOutput> {
        let ratio = self.config.output_buffer_ratio;
        self.add_audio_out(name, ratio)
    }

    /// Add a MIDI input port
    pub fn add_midi_in(&mut self, name: &str) -> ClientResult<MidiInput> {
        self.ensure_registrable()?;
        let capacity = self.config.midi_capacity(self.frames());
        let backend = &mut self.backend;
        self.registry
            .register_midi_in(name, capacity, |n, class| backend.register_port(n, class))
    }

    /// Add a MIDI output port
    pub fn add_midi_out(&mut self, name: &str) -> ClientResult<MidiOutput> {
        self.ensure_registrable()?;
        let capacity = self.config.midi_capacity(self.frames());
        let backend = &mut self.backend;
        self.registry
            .register_midi_out(name, capacity, |n, class| backend.register_port(n, class))
    }

    // ───────────────────────────────────────────────────────────────
    // Activation and routing
    // ───────────────────────────────────────────────────────────────

    /// Install the bridge and start processing
    ///
    /// The port set is frozen from here on. A failed activation closes the
    /// client.
    pub fn activate(&mut self) -> ClientResult<()> {
        self.ensure_registrable()?;
        let diagnostics = self.diagnostics_tx.take().ok_or(ClientError::AlreadyActive)?;
        let bridge = Bridge::new(self.registry.take_lanes(), self.counters.clone(), diagnostics);

        if let Err(e) = self.backend.activate(bridge, self.events.clone()) {
            log::error!("Client '{}' activation failed: {}", self.name(), e);
            if let Err(close_err) = self.close() {
                log::warn!("Failed to close client after activation failure: {}", close_err);
            }
            return Err(e.into());
        }

        self.lifecycle = Lifecycle::Active;
        log::info!(
            "Client '{}' active with {} ports",
            self.name(),
            self.registry.len()
        );
        Ok(())
    }

    /// Qualify a bare port name with this client's name
    fn full_name(&self, port: &str) -> String {
        if port.contains(':') {
            port.to_string()
        } else {
            full_port_name(self.name(), port)
        }
    }

    /// Connect two ports by name
    ///
    /// Bare names (no `client:` prefix) refer to this client's ports.
    pub fn connect(&self, source: &str, destination: &str) -> ClientResult<()> {
        self.ensure_active()?;
        let source = self.full_name(source);
        let destination = self.full_name(destination);
        self.backend.connect(&source, &destination)?;
        log::info!("Connected {} to {}", source, destination);
        Ok(())
    }

    fn system_ports(&self, which: SystemPorts) -> ClientResult<Vec<String>> {
        self.ensure_not_closed()?;
        match self.backend.system_ports(which) {
            Ok(ports) => Ok(ports),
            Err(e) => {
                self.sink.report(&Diagnostic::PortEnumeration { reason: e.to_string() });
                Ok(Vec::new())
            }
        }
    }

    /// Physical playback ports (speakers)
    pub fn system_playback_ports(&self) -> ClientResult<Vec<String>> {
        self.system_ports(SystemPorts::Playback)
    }

    /// Physical capture ports (sources)
    pub fn system_capture_ports(&self) -> ClientResult<Vec<String>> {
        self.system_ports(SystemPorts::Capture)
    }

    pub fn n_system_speakers(&self) -> ClientResult<usize> {
        Ok(self.system_playback_ports()?.len())
    }

    pub fn n_system_sources(&self) -> ClientResult<usize> {
        Ok(self.system_capture_ports()?.len())
    }

    /// Connect one of our audio outputs to the `index`th system speaker
    pub fn connect_system_speaker(&self, output: &str, index: usize) -> ClientResult<()> {
        self.ensure_active()?;
        self.ensure_port(output, PortClass::AudioOut)?;
        let speakers = self.system_playback_ports()?;
        let speaker = speakers.get(index).ok_or(ClientError::NoSuchSystemPort {
            index,
            available: speakers.len(),
        })?;
        self.connect(output, speaker)
    }

    /// Connect the `index`th system source to one of our audio inputs
    pub fn connect_system_source(&self, input: &str, index: usize) -> ClientResult<()> {
        self.ensure_active()?;
        self.ensure_port(input, PortClass::AudioIn)?;
        let sources = self.system_capture_ports()?;
        let source = sources.get(index).ok_or(ClientError::NoSuchSystemPort {
            index,
            available: sources.len(),
        })?;
        self.connect(source, input)
    }

    fn ensure_port(&self, name: &str, class: PortClass) -> ClientResult<()> {
        if !self.registry.contains(name, class) {
            return Err(ClientError::UnknownPort {
                name: name.to_string(),
                class,
            });
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────
    // Synthesis
    // ───────────────────────────────────────────────────────────────

    /// Start the synthesis pump feeding `output` from `engine`
    ///
    /// Only one pump runs per client; stop the previous one first.
    pub fn play<S: SampleSource>(&self, engine: S, output: AudioOutput) -> ClientResult<SynthesisPump<S>> {
        self.ensure_not_closed()?;
        if self
            .pump_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ClientError::PumpRunning);
        }

        match SynthesisPump::spawn(engine, output) {
            Ok(pump) => Ok(pump.with_guard(self.pump_active.clone())),
            Err(e) => {
                self.pump_active.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Teardown
    // ───────────────────────────────────────────────────────────────

    /// Release the server connection
    ///
    /// Port handles see a disconnected queue afterwards, so pumps and
    /// consumers wind down on their own. Closing twice fails with
    /// [`ClientError::ClientClosed`].
    pub fn close(&mut self) -> ClientResult<()> {
        self.ensure_not_closed()?;
        self.lifecycle = Lifecycle::Closed;

        let result = self.backend.close();
        drop(self.registry.take_lanes());
        self.diagnostics_tx = None;
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }

        let stats = self.xrun_stats();
        log::info!(
            "Client '{}' closed after {} cycles ({} degraded, {} server xruns)",
            self.name(),
            stats.cycles,
            stats.degraded_cycles,
            stats.server_xruns
        );
        result.map_err(ClientError::from)
    }
}

impl<B: Backend> Drop for Client<B> {
    fn drop(&mut self) {
        if self.lifecycle != Lifecycle::Closed {
            if let Err(e) = self.close() {
                log::warn!("Failed to close client: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{OfflineBackend, OfflineDriver};
    use crate::error::{BackendError, BackendResult};
    use crate::queue::MAX_BUFFER_RATIO;
    use crate::types::PortId;
    use crate::diagnostics::MemorySink;
    use crate::engine::{MixBus, SampleSequence};
    use crate::error::SendError;
    use crate::signal::StopSignal;
    use crate::types::{MidiEvent, SILENCE};
    use std::time::Instant;

    fn open_client(frames: u32) -> (Client<OfflineBackend>, OfflineDriver, Arc<MemorySink>) {
        let backend = OfflineBackend::new("jade", 48_000, frames);
        let driver = backend.driver();
        let sink = Arc::new(MemorySink::new());
        let config = BridgeConfig::default().with_diagnostics_poll_ms(1);
        let client = Client::open(backend, config, sink.clone()).unwrap();
        (client, driver, sink)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_duplicate_port_name_rejected_per_class() {
        let (mut client, _driver, _sink) = open_client(64);

        client.add_audio_out("out", 1.0).unwrap();
        let err = client.add_audio_out("out", 0.5).err().unwrap();
        assert!(matches!(err, ClientError::DuplicateName { class: PortClass::AudioOut, .. }));

        client.add_audio_in("out").unwrap();
        client.add_midi_in("out").unwrap();
        assert!(matches!(
            client.add_midi_in("out"),
            Err(ClientError::DuplicateName { class: PortClass::MidiIn, .. })
        ));
        assert_eq!(client.ports().len(), 3);
    }

    #[test]
    fn test_output_capacity_follows_buffer_ratio() {
        let (mut client, _driver, _sink) = open_client(64);
        assert_eq!(client.add_audio_out("a", 0.0).unwrap().capacity(), 64);
        assert_eq!(client.add_audio_out("b", 1.0).unwrap().capacity(), 128);
        assert_eq!(client.add_audio_out_default("c").unwrap().capacity(), 128);
        assert_eq!(client.add_audio_in("in").unwrap().capacity(), 64);
        assert!(matches!(
            client.add_audio_out("bad", -0.5),
            Err(ClientError::InvalidBufferRatio(_))
        ));
    }

    #[test]
    fn test_oversized_buffer_ratio_rejected() {
        let (mut client, _driver, _sink) = open_client(1024);
        assert!(matches!(
            client.add_audio_out("out", 1.0e30),
            Err(ClientError::InvalidBufferRatio(_))
        ));
        assert!(matches!(
            client.add_audio_out("out", MAX_BUFFER_RATIO * 2.0),
            Err(ClientError::InvalidBufferRatio(_))
        ));
        assert!(client.ports().is_empty());

        let output = client.add_audio_out("out", MAX_BUFFER_RATIO).unwrap();
        assert_eq!(output.capacity(), 1024 * 65);
    }

    /// Backend whose server refuses activation and then fails to close
    struct RefusingBackend {
        registered: usize,
    }

    impl Backend for RefusingBackend {
        fn name(&self) -> &str {
            "refusing"
        }

        fn sample_rate(&self) -> u32 {
            48_000
        }

        fn buffer_size(&self) -> u32 {
            64
        }

        fn register_port(&mut self, _name: &str, _class: PortClass) -> BackendResult<PortId> {
            self.registered += 1;
            Ok(PortId(self.registered - 1))
        }

        fn activate(&mut self, _bridge: Bridge, _events: Arc<ServerEvents>) -> BackendResult<()> {
            Err(BackendError::Activation("server refused the callback".into()))
        }

        fn connect(&self, source: &str, _destination: &str) -> BackendResult<()> {
            Err(BackendError::UnknownPort(source.to_string()))
        }

        fn system_ports(&self, _which: SystemPorts) -> BackendResult<Vec<String>> {
            Ok(Vec::new())
        }

        fn close(&mut self) -> BackendResult<()> {
            Err(BackendError::Close("connection already gone".into()))
        }
    }

    #[test]
    fn test_activation_failure_closes_client() {
        let backend = RefusingBackend { registered: 0 };
        let mut client = Client::open(backend, BridgeConfig::default(), Arc::new(MemorySink::new())).unwrap();
        let output = client.add_audio_out("out", 1.0).unwrap();

        let err = client.activate().err().unwrap();
        assert!(matches!(err, ClientError::Backend(BackendError::Activation(_))));
        assert_eq!(client.state(), ClientState::Closed);
        assert!(output.is_disconnected());

        assert!(matches!(client.add_audio_in("in"), Err(ClientError::ClientClosed)));
        assert!(matches!(client.activate(), Err(ClientError::ClientClosed)));
        assert!(matches!(client.close(), Err(ClientError::ClientClosed)));
    }

    #[test]
    fn test_output_underrun_holds_last_sample() {
        let (mut client, driver, sink) = open_client(4);
        let mut output = client.add_audio_out("out", 0.0).unwrap();
        client.activate().unwrap();

        for s in [0.1, 0.2, 0.3, 0.4] {
            output.try_send(s).unwrap();
        }
        assert_eq!(output.try_send(0.5), Err(SendError::Full(0.5)));

        let report = driver.run_cycle().unwrap();
        assert_eq!(driver.audio_output("out").unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
        assert!(!report.flags.output_underrun);

        output.try_send(0.5).unwrap();
        let report = driver.run_cycle().unwrap();
        assert_eq!(driver.audio_output("out").unwrap(), vec![0.5, 0.5, 0.5, 0.5]);
        assert!(report.flags.output_underrun);

        client.close().unwrap();
        assert_eq!(
            sink.entries(),
            vec![Diagnostic::OutputUnderrun { cycle: 1, held: 3 }]
        );
        let stats = client.xrun_stats();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.output_underrun_cycles, 1);
        assert_eq!(stats.held_output_samples, 3);
    }

    #[test]
    fn test_pump_feeds_output_through_mix_bus() {
        let (mut client, driver, _sink) = open_client(4);
        let output = client.add_audio_out("out", 1.0).unwrap();
        let spare = client.add_audio_out("spare", 1.0).unwrap();
        client.activate().unwrap();

        let (bus, handle) = MixBus::new();
        assert!(handle.play(SampleSequence::new(vec![0.1, 0.2, 0.3, 0.4, 0.5])).is_ok());
        let mut pump = client.play(bus, output).unwrap();

        assert!(wait_for(|| pump.produced() >= 8));
        driver.run_cycle().unwrap();
        assert_eq!(driver.audio_output("out").unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
        let report = driver.run_cycle().unwrap();
        assert_eq!(driver.audio_output("out").unwrap(), vec![0.5, SILENCE, SILENCE, SILENCE]);
        assert!(!report.flags.output_underrun);

        let (second_bus, _) = MixBus::new();
        assert!(matches!(client.play(second_bus, spare), Err(ClientError::PumpRunning)));

        let bus = pump.stop().unwrap();
        assert_eq!(bus.active_sounds(), 0);
    }

    #[test]
    fn test_close_twice_and_operations_after_close() {
        let (mut client, _driver, _sink) = open_client(64);
        let output = client.add_audio_out("out", 1.0).unwrap();

        client.close().unwrap();
        assert_eq!(client.state(), ClientState::Closed);
        assert!(output.is_disconnected());

        assert!(matches!(client.close(), Err(ClientError::ClientClosed)));
        assert!(matches!(client.add_audio_in("in"), Err(ClientError::ClientClosed)));
        assert!(matches!(client.add_audio_out("x", 1.0), Err(ClientError::ClientClosed)));
        assert!(matches!(client.add_midi_in("m"), Err(ClientError::ClientClosed)));
        assert!(matches!(client.activate(), Err(ClientError::ClientClosed)));
        assert!(matches!(
            client.connect("out", "system:playback_1"),
            Err(ClientError::ClientClosed)
        ));
        assert!(matches!(client.system_playback_ports(), Err(ClientError::ClientClosed)));
        let (bus, _handle) = MixBus::new();
        assert!(matches!(client.play(bus, output), Err(ClientError::ClientClosed)));
    }

    #[test]
    fn test_close_disconnects_active_ports() {
        let (mut client, driver, _sink) = open_client(64);
        let mut input = client.add_midi_in("midi").unwrap();
        client.activate().unwrap();
        client.close().unwrap();

        assert!(input.is_disconnected());
        assert_eq!(input.recv(&StopSignal::new()), None);
        assert!(driver.run_cycle().is_none());
    }

    #[test]
    fn test_ports_frozen_after_activation() {
        let (mut client, _driver, _sink) = open_client(64);
        client.add_audio_out("out", 1.0).unwrap();
        client.activate().unwrap();

        assert_eq!(client.state(), ClientState::Active);
        assert!(matches!(client.add_audio_in("late"), Err(ClientError::AlreadyActive)));
        assert!(matches!(client.activate(), Err(ClientError::AlreadyActive)));
    }

    #[test]
    fn test_connect_requires_activation_and_qualifies_names() {
        let (mut client, driver, _sink) = open_client(64);
        client.add_audio_out("out", 1.0).unwrap();
        client.add_audio_in("in").unwrap();
        assert!(matches!(
            client.connect("out", "system:playback_1"),
            Err(ClientError::NotActive)
        ));

        client.activate().unwrap();
        client.connect("out", "system:playback_1").unwrap();
        client.connect_system_source("in", 1).unwrap();
        assert!(matches!(
            client.connect("out", "system:playback_7"),
            Err(ClientError::Backend(_))
        ));

        assert_eq!(
            driver.connections(),
            vec![
                ("jade:out".to_string(), "system:playback_1".to_string()),
                ("system:capture_2".to_string(), "jade:in".to_string()),
            ]
        );
    }

    #[test]
    fn test_system_speaker_helpers() {
        let (mut client, driver, _sink) = open_client(64);
        client.add_audio_out("left", 1.0).unwrap();
        client.activate().unwrap();

        assert_eq!(client.n_system_speakers().unwrap(), 2);
        assert_eq!(client.n_system_sources().unwrap(), 2);
        client.connect_system_speaker("left", 0).unwrap();
        assert!(matches!(
            client.connect_system_speaker("left", 5),
            Err(ClientError::NoSuchSystemPort { index: 5, available: 2 })
        ));
        assert!(matches!(
            client.connect_system_speaker("right", 0),
            Err(ClientError::UnknownPort { class: PortClass::AudioOut, .. })
        ));
        assert_eq!(driver.connections().len(), 1);
    }

    #[test]
    fn test_renamed_client_reports_assigned_name() {
        let backend = OfflineBackend::new("jade", 48_000, 64).renamed("jade-01");
        let sink = Arc::new(MemorySink::new());
        let client = Client::open(backend, BridgeConfig::default(), sink.clone()).unwrap();

        assert_eq!(client.name(), "jade-01");
        assert_eq!(
            sink.entries(),
            vec![Diagnostic::ClientNameNotUnique {
                assigned: "jade-01".into()
            }]
        );
    }

    #[test]
    fn test_midi_input_end_to_end() {
        let (mut client, driver, _sink) = open_client(64);
        let mut input = client.add_midi_in("midi").unwrap();
        client.activate().unwrap();

        driver.push_midi_input("midi", 3, &[0x90, 60, 100]).unwrap();
        driver.push_midi_input("midi", 9, &[0x80, 60, 0]).unwrap();
        driver.run_cycle().unwrap();

        let events: Vec<MidiEvent> = input.drain().collect();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_note_on());
        assert_eq!(events[0].time(), 3);
        assert!(events[1].is_note_off());
    }

    #[test]
    fn test_input_overflow_counted() {
        let (mut client, driver, sink) = open_client(4);
        let mut input = client.add_audio_in("in").unwrap();
        client.activate().unwrap();

        driver.set_audio_input("in", &[1.0, 2.0, 3.0, 4.0]).unwrap();
        driver.run_cycle().unwrap();
        driver.set_audio_input("in", &[5.0, 6.0, 7.0, 8.0]).unwrap();
        let report = driver.run_cycle().unwrap();
        assert_eq!(report.dropped_input, 4);

        assert_eq!(input.drain().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0, 4.0]);
        client.close().unwrap();
        assert_eq!(sink.count(|d| matches!(d, Diagnostic::InputOverflow { .. })), 1);
        assert_eq!(client.xrun_stats().input_overflow_cycles, 1);
    }

    #[test]
    fn test_server_shutdown_and_xruns_observable() {
        let (mut client, driver, sink) = open_client(64);
        client.add_audio_out("out", 1.0).unwrap();
        client.activate().unwrap();

        driver.simulate_xrun();
        driver.simulate_shutdown();
        assert_eq!(client.state(), ClientState::ServerShutdown);
        assert_eq!(client.xrun_stats().server_xruns, 1);

        client.close().unwrap();
        assert_eq!(sink.count(|d| *d == Diagnostic::ServerShutdown), 1);
        assert_eq!(sink.count(|d| matches!(d, Diagnostic::ServerXrun { .. })), 1);
    }

    #[test]
    fn test_zero_diagnostics_capacity_rejected() {
        let backend = OfflineBackend::new("jade", 48_000, 64);
        let config = BridgeConfig::default().with_diagnostics_capacity(0);
        let result = Client::open(backend, config, Arc::new(MemorySink::new()));
        assert!(matches!(result, Err(ClientError::Queue(_))));
    }
}
