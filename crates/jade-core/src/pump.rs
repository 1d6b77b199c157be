//! Non-real-time tasks feeding and draining port queues
//!
//! Both tasks run on their own named thread, own a [`StopSignal`] and are
//! joined on `stop()` or drop, so a client can always shut down
//! deterministically.
//!
//! - [`SynthesisPump`]: pulls one sample at a time from a [`SampleSource`]
//!   and pushes it into an audio output queue. The queue is bounded, so the
//!   pump blocks when it runs ahead and the bridge's drain rate sets the pace.
//! - [`MidiForwarder`]: drains a MIDI input queue and hands each event to a
//!   callback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::engine::SampleSource;
use crate::error::{ClientError, ClientResult, SendError};
use crate::port::{AudioOutput, MidiInput};
use crate::signal::StopSignal;
use crate::types::MidiEvent;

/// The single task sampling an engine
///
/// The engine is moved into the pump thread and handed back by
/// [`SynthesisPump::stop`], so no other caller can sample it meanwhile.
pub struct SynthesisPump<S: SampleSource> {
    port: String,
    stop: StopSignal,
    produced: Arc<AtomicU64>,
    thread: Option<JoinHandle<S>>,
    /// Cleared when the pump is stopped (the client's one-pump flag)
    guard: Option<Arc<AtomicBool>>,
}

impl<S: SampleSource> SynthesisPump<S> {
    /// Start pumping `engine` into `output`
    pub fn spawn(engine: S, output: AudioOutput) -> ClientResult<Self> {
        let port = output.name().to_string();
        let stop = StopSignal::new();
        let produced = Arc::new(AtomicU64::new(0));

        let thread_stop = stop.clone();
        let thread_produced = produced.clone();
        let thread = std::thread::Builder::new()
            .name(format!("jade-pump-{}", port))
            .spawn(move || run_pump(engine, output, thread_stop, thread_produced))
            .map_err(|source| ClientError::Spawn { name: "pump", source })?;

        log::info!("Synthesis pump started on '{}'", port);
        Ok(Self {
            port,
            stop,
            produced,
            thread: Some(thread),
            guard: None,
        })
    }

    pub(crate) fn with_guard(mut self, guard: Arc<AtomicBool>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Output port this pump feeds
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Samples queued so far
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// False once stopped, or after the port was disconnected by close
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the pump and take the engine back
    ///
    /// Returns `None` if already stopped or if the engine panicked.
    pub fn stop(&mut self) -> Option<S> {
        self.stop.stop();
        let engine = match self.thread.take()?.join() {
            Ok(engine) => Some(engine),
            Err(_) => {
                log::error!("Synthesis pump on '{}' panicked", self.port);
                None
            }
        };
        if let Some(guard) = self.guard.take() {
            guard.store(false, Ordering::Release);
        }
        log::info!("Synthesis pump on '{}' stopped after {} samples", self.port, self.produced());
        engine
    }
}

impl<S: SampleSource> Drop for SynthesisPump<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_pump<S: SampleSource>(
    mut engine: S,
    mut output: AudioOutput,
    stop: StopSignal,
    produced: Arc<AtomicU64>,
) -> S {
    loop {
        let sample = engine.sample();
        match output.send(sample, &stop) {
            Ok(()) => {
                produced.fetch_add(1, Ordering::Relaxed);
            }
            Err(SendError::Disconnected(_)) => {
                log::debug!("Pump: port '{}' disconnected", output.name());
                break;
            }
            Err(SendError::Stopped(_)) | Err(SendError::Full(_)) => break,
        }
    }
    engine
}

/// Task handing every event of a MIDI input to a callback
pub struct MidiForwarder {
    stop: StopSignal,
    forwarded: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl MidiForwarder {
    pub fn spawn<F>(mut input: MidiInput, mut handler: F) -> ClientResult<Self>
    where
        F: FnMut(MidiEvent) + Send + 'static,
    {
        let stop = StopSignal::new();
        let forwarded = Arc::new(AtomicU64::new(0));

        let thread_stop = stop.clone();
        let thread_forwarded = forwarded.clone();
        let thread = std::thread::Builder::new()
            .name(format!("jade-midi-{}", input.name()))
            .spawn(move || {
                while let Some(event) = input.recv(&thread_stop) {
                    handler(event);
                    thread_forwarded.fetch_add(1, Ordering::Relaxed);
                }
                log::debug!("MIDI forwarder on '{}' finished", input.name());
            })
            .map_err(|source| ClientError::Spawn {
                name: "MIDI forwarder",
                source,
            })?;

        Ok(Self {
            stop,
            forwarded,
            thread: Some(thread),
        })
    }

    /// Events handed to the callback so far
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        self.stop.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("MIDI forwarder callback panicked");
            }
        }
    }
}

impl Drop for MidiForwarder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortReceiver;
    use crate::port::PortSender;
    use crate::queue::port_queue;
    use crate::types::Sample;
    use std::time::{Duration, Instant};

    /// Ramp 1.0, 2.0, 3.0, ...
    struct Ramp(Sample);

    impl SampleSource for Ramp {
        fn sample(&mut self) -> Sample {
            self.0 += 1.0;
            self.0
        }
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
    fn test_pump_fills_queue_in_order_and_blocks() {
        let (tx, mut rx) = port_queue::<Sample>(4).unwrap();
        let mut pump = SynthesisPump::spawn(Ramp(0.0), PortSender::new("out", tx)).unwrap();

        // Counted only after the push lands, so wait on the count
        assert!(wait_for(|| pump.produced() == 4));
        // Queue is full: the pump is blocked, not spinning ahead
        assert_eq!(rx.slots(), 4);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(pump.produced(), 4);
        assert!(pump.is_running());

        let first: Vec<Sample> = (0..4).filter_map(|_| rx.pop().ok()).collect();
        assert_eq!(first, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(wait_for(|| rx.slots() == 4));
        assert_eq!(rx.pop().ok(), Some(5.0));

        let engine = pump.stop().unwrap();
        assert!(engine.0 >= 8.0);
        assert!(!pump.is_running());
        assert!(pump.stop().is_none());
    }

    #[test]
    fn test_pump_exits_when_port_disconnected() {
        let (tx, rx) = port_queue::<Sample>(2).unwrap();
        let pump = SynthesisPump::spawn(Ramp(0.0), PortSender::new("out", tx)).unwrap();
        drop(rx);
        assert!(wait_for(|| !pump.is_running()));
    }

    #[test]
    fn test_stop_clears_guard() {
        let (tx, _rx) = port_queue::<Sample>(2).unwrap();
        let guard = Arc::new(AtomicBool::new(true));
        let pump = SynthesisPump::spawn(Ramp(0.0), PortSender::new("out", tx))
            .unwrap()
            .with_guard(guard.clone());
        drop(pump);
        assert!(!guard.load(Ordering::Acquire));
    }

    #[test]
    fn test_forwarder_delivers_events_in_order() {
        let (mut tx, rx) = port_queue::<MidiEvent>(8).unwrap();
        let (events_tx, events_rx) = crossbeam::channel::unbounded();
        let mut forwarder = MidiForwarder::spawn(PortReceiver::new("midi", rx), move |event| {
            let _ = events_tx.send(event.data1());
        })
        .unwrap();

        for note in [60, 64, 67] {
            tx.push(MidiEvent::note_on(0, 0, note, 100)).unwrap();
        }

        let received: Vec<u8> = (0..3)
            .filter_map(|_| events_rx.recv_timeout(Duration::from_secs(5)).ok())
            .collect();
        assert_eq!(received, vec![60, 64, 67]);
        assert_eq!(forwarder.forwarded(), 3);

        forwarder.stop();
        assert!(!forwarder.is_running());
    }

    #[test]
    fn test_forwarder_finishes_when_bridge_side_dropped() {
        let (tx, rx) = port_queue::<MidiEvent>(8).unwrap();
        let forwarder = MidiForwarder::spawn(PortReceiver::new("midi", rx), |_| {}).unwrap();
        drop(tx);
        assert!(wait_for(|| !forwarder.is_running()));
    }
}
