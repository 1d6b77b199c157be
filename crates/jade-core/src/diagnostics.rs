//! Diagnostics reporting
//!
//! The bridge runs on the audio server's real-time thread and must not do
//! I/O, so it never talks to a [`DiagnosticsSink`] directly. It pushes at most
//! one aggregated [`Diagnostic`] per direction class per cycle into a
//! pre-allocated `rtrb` queue, and a [`DiagnosticsWorker`] thread forwards
//! them to the sink:
//!
//! ```text
//! ┌──────────────────┐   push() (never blocks)   ┌─────────────────────┐
//! │  RT Bridge       │──────────────────────────►│  Diagnostics Queue  │
//! └──────────────────┘                           └──────────┬──────────┘
//!                                                           │ pop()
//! ┌──────────────────┐   report()                ┌──────────▼──────────┐
//! │  DiagnosticsSink │◄──────────────────────────│  Diagnostics Worker │
//! └──────────────────┘                           └─────────────────────┘
//! ```
//!
//! The worker also watches the server notification flags, so server xruns
//! and shutdowns reach the sink without touching the notification thread.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::ServerEvents;
use crate::error::{ClientError, ClientResult};
use crate::signal::StopSignal;
use crate::xrun::XrunCounters;

/// A reportable condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Audio input queues were full; frames were dropped this cycle
    InputOverflow { cycle: u64, dropped: usize },
    /// MIDI input queues were full; events were dropped this cycle
    MidiOverflow { cycle: u64, dropped: usize },
    /// Audio output queues ran dry; the last sample was held this cycle
    OutputUnderrun { cycle: u64, held: usize },
    /// The native MIDI output buffer refused events this cycle
    MidiOutputOverflow { cycle: u64, rejected: usize },
    /// The server reported missed deadlines
    ServerXrun { count: u64 },
    /// The server shut the client down
    ServerShutdown,
    /// The server assigned a different client name
    ClientNameNotUnique { assigned: String },
    /// System port enumeration failed
    PortEnumeration { reason: String },
    /// Diagnostics were lost because the queue was full
    DiagnosticsDropped { count: u64 },
}

impl Diagnostic {
    /// Xruns are degraded quality; everything else is an error condition
    pub fn is_xrun(&self) -> bool {
        matches!(
            self,
            Diagnostic::InputOverflow { .. }
                | Diagnostic::MidiOverflow { .. }
                | Diagnostic::OutputUnderrun { .. }
                | Diagnostic::MidiOutputOverflow { .. }
                | Diagnostic::ServerXrun { .. }
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::InputOverflow { cycle, dropped } => {
                write!(f, "input overflow (cycle {}, {} frames dropped)", cycle, dropped)
            }
            Diagnostic::MidiOverflow { cycle, dropped } => {
                write!(f, "MIDI overflow (cycle {}, {} events dropped)", cycle, dropped)
            }
            Diagnostic::OutputUnderrun { cycle, held } => {
                write!(f, "output underrun (cycle {}, {} samples held)", cycle, held)
            }
            Diagnostic::MidiOutputOverflow { cycle, rejected } => {
                write!(f, "MIDI output overflow (cycle {}, {} events rejected)", cycle, rejected)
            }
            Diagnostic::ServerXrun { count } => write!(f, "server xrun ({} reported)", count),
            Diagnostic::ServerShutdown => f.write_str("audio server shut the client down"),
            Diagnostic::ClientNameNotUnique { assigned } => {
                write!(f, "client name not unique; using `{}'", assigned)
            }
            Diagnostic::PortEnumeration { reason } => {
                write!(f, "could not enumerate system ports: {}", reason)
            }
            Diagnostic::DiagnosticsDropped { count } => {
                write!(f, "{} diagnostics dropped (queue full)", count)
            }
        }
    }
}

/// Line-oriented receiver of diagnostics
///
/// Injected into the client at construction. Called from the diagnostics
/// worker and from setup calls, never from the real-time thread.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

/// Sink that writes through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn report(&self, diagnostic: &Diagnostic) {
        if diagnostic.is_xrun() {
            log::warn!("jade: {}", diagnostic);
        } else {
            log::error!("jade: {}", diagnostic);
        }
    }
}

/// Sink that keeps every diagnostic in memory (for UIs and tests)
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything reported so far
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of reported diagnostics matching `predicate`
    pub fn count(&self, predicate: impl Fn(&Diagnostic) -> bool) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| predicate(d))
            .count()
    }
}

impl DiagnosticsSink for MemorySink {
    fn report(&self, diagnostic: &Diagnostic) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic.clone());
    }
}

/// Producer half handed to the bridge
pub type DiagnosticsProducer = rtrb::Producer<Diagnostic>;

/// Background thread forwarding queued diagnostics to the sink
pub struct DiagnosticsWorker {
    stop: StopSignal,
    thread: Option<JoinHandle<()>>,
}

impl DiagnosticsWorker {
    /// Spawn the worker draining `rx` every `poll` interval
    pub fn spawn(
        rx: rtrb::Consumer<Diagnostic>,
        sink: Arc<dyn DiagnosticsSink>,
        events: Arc<ServerEvents>,
        counters: Arc<XrunCounters>,
        poll: Duration,
    ) -> ClientResult<Self> {
        let stop = StopSignal::new();
        let worker_stop = stop.clone();

        let thread = std::thread::Builder::new()
            .name("jade-diagnostics".into())
            .spawn(move || Self::run(rx, sink, events, counters, worker_stop, poll))
            .map_err(|source| ClientError::Spawn {
                name: "diagnostics",
                source,
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    fn run(
        mut rx: rtrb::Consumer<Diagnostic>,
        sink: Arc<dyn DiagnosticsSink>,
        events: Arc<ServerEvents>,
        counters: Arc<XrunCounters>,
        stop: StopSignal,
        poll: Duration,
    ) {
        let mut watcher = ServerWatcher::default();
        log::debug!("Diagnostics worker started");

        loop {
            // Read the stop flag first so the final drain sees everything
            // pushed before stop() was called
            let stopping = stop.is_stopped();

            while let Ok(diagnostic) = rx.pop() {
                sink.report(&diagnostic);
            }
            watcher.check(&events, &counters, sink.as_ref());

            if stopping {
                break;
            }
            std::thread::sleep(poll);
        }

        log::debug!("Diagnostics worker stopped");
    }

    /// Drain what is queued, then stop and join the thread
    pub fn stop(&mut self) {
        self.stop.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Diagnostics worker panicked");
            }
        }
    }
}

impl Drop for DiagnosticsWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tracks which server notifications were already reported
#[derive(Debug, Default)]
struct ServerWatcher {
    xruns_seen: u64,
    dropped_seen: u64,
    shutdown_reported: bool,
}

impl ServerWatcher {
    fn check(&mut self, events: &ServerEvents, counters: &XrunCounters, sink: &dyn DiagnosticsSink) {
        let xruns = events.server_xruns();
        if xruns > self.xruns_seen {
            sink.report(&Diagnostic::ServerXrun {
                count: xruns - self.xruns_seen,
            });
            self.xruns_seen = xruns;
        }

        let dropped = counters.dropped_diagnostics();
        if dropped > self.dropped_seen {
            sink.report(&Diagnostic::DiagnosticsDropped {
                count: dropped - self.dropped_seen,
            });
            self.dropped_seen = dropped;
        }

        if !self.shutdown_reported && events.is_shut_down() {
            sink.report(&Diagnostic::ServerShutdown);
            self.shutdown_reported = true;
        }
    }
}
