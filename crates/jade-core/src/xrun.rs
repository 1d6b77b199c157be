//! Xrun flags and lock-free xrun accounting
//!
//! Flags are per cycle and per direction class: the bridge raises them while
//! it copies frames and they are gone once the cycle report is consumed.
//! `XrunCounters` accumulates them for readers outside the real-time thread
//! via relaxed atomics (no locks).

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-cycle degradation flags, one per direction class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XrunFlags {
    /// An audio input queue was full and frames were dropped
    pub input_overflow: bool,
    /// A MIDI input queue was full and events were dropped
    pub midi_overflow: bool,
    /// An audio output queue ran dry and the held sample was repeated
    pub output_underrun: bool,
    /// The native MIDI output buffer refused events
    pub midi_output_overflow: bool,
}

impl XrunFlags {
    pub fn any(&self) -> bool {
        self.input_overflow || self.midi_overflow || self.output_underrun || self.midi_output_overflow
    }
}

/// What happened during one process cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Cycle sequence number (starts at 0)
    pub cycle: u64,
    /// Frames in this cycle
    pub frames: usize,
    pub flags: XrunFlags,
    /// Input samples dropped on full queues (all audio-in ports)
    pub dropped_input: usize,
    /// MIDI input events dropped on full queues
    pub dropped_midi: usize,
    /// MIDI input events skipped as not carriable (SysEx, outside the window)
    pub skipped_midi: usize,
    /// Output slots filled with the held sample (all audio-out ports)
    pub held_output: usize,
    /// MIDI output events the native buffer refused
    pub rejected_midi_output: usize,
}

impl CycleReport {
    pub fn new(cycle: u64, frames: usize) -> Self {
        Self {
            cycle,
            frames,
            ..Default::default()
        }
    }
}

/// Cumulative xrun counters shared between the bridge and the client
#[derive(Debug, Default)]
pub struct XrunCounters {
    cycles: AtomicU64,
    degraded_cycles: AtomicU64,
    input_overflow_cycles: AtomicU64,
    midi_overflow_cycles: AtomicU64,
    output_underrun_cycles: AtomicU64,
    midi_output_overflow_cycles: AtomicU64,
    dropped_input_samples: AtomicU64,
    dropped_midi_events: AtomicU64,
    skipped_midi_events: AtomicU64,
    held_output_samples: AtomicU64,
    dropped_diagnostics: AtomicU64,
}

impl XrunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one cycle report into the totals (RT-safe: atomics only)
    pub fn record(&self, report: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if report.flags.any() {
            self.degraded_cycles.fetch_add(1, Ordering::Relaxed);
        }
        if report.flags.input_overflow {
            self.input_overflow_cycles.fetch_add(1, Ordering::Relaxed);
        }
        if report.flags.midi_overflow {
            self.midi_overflow_cycles.fetch_add(1, Ordering::Relaxed);
        }
        if report.flags.output_underrun {
            self.output_underrun_cycles.fetch_add(1, Ordering::Relaxed);
        }
        if report.flags.midi_output_overflow {
            self.midi_output_overflow_cycles.fetch_add(1, Ordering::Relaxed);
        }
        add(&self.dropped_input_samples, report.dropped_input);
        add(&self.dropped_midi_events, report.dropped_midi);
        add(&self.skipped_midi_events, report.skipped_midi);
        add(&self.held_output_samples, report.held_output);
    }

    /// A diagnostic could not be queued because the diagnostics queue was full
    pub fn record_dropped_diagnostic(&self) {
        self.dropped_diagnostics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_diagnostics(&self) -> u64 {
        self.dropped_diagnostics.load(Ordering::Relaxed)
    }

    /// Take a snapshot; `server_xruns` comes from the backend's notifications
    pub fn snapshot(&self, server_xruns: u64) -> XrunStats {
        XrunStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            degraded_cycles: self.degraded_cycles.load(Ordering::Relaxed),
            input_overflow_cycles: self.input_overflow_cycles.load(Ordering::Relaxed),
            midi_overflow_cycles: self.midi_overflow_cycles.load(Ordering::Relaxed),
            output_underrun_cycles: self.output_underrun_cycles.load(Ordering::Relaxed),
            midi_output_overflow_cycles: self.midi_output_overflow_cycles.load(Ordering::Relaxed),
            dropped_input_samples: self.dropped_input_samples.load(Ordering::Relaxed),
            dropped_midi_events: self.dropped_midi_events.load(Ordering::Relaxed),
            skipped_midi_events: self.skipped_midi_events.load(Ordering::Relaxed),
            held_output_samples: self.held_output_samples.load(Ordering::Relaxed),
            dropped_diagnostics: self.dropped_diagnostics.load(Ordering::Relaxed),
            server_xruns,
        }
    }
}

#[inline]
fn add(counter: &AtomicU64, amount: usize) {
    if amount > 0 {
        counter.fetch_add(amount as u64, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the xrun counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XrunStats {
    pub cycles: u64,
    /// Cycles that degraded in at least one direction class
    pub degraded_cycles: u64,
    pub input_overflow_cycles: u64,
    pub midi_overflow_cycles: u64,
    pub output_underrun_cycles: u64,
    pub midi_output_overflow_cycles: u64,
    pub dropped_input_samples: u64,
    pub dropped_midi_events: u64,
    pub skipped_midi_events: u64,
    pub held_output_samples: u64,
    pub dropped_diagnostics: u64,
    /// Missed deadlines reported by the audio server itself
    pub server_xruns: u64,
}
