//! Real-time bridge between the audio server callback and the port queues
//!
//! The bridge is moved into the backend at activation and from then on only
//! runs on the server's real-time thread, once per frame period:
//!
//! ```text
//! native in ──► audio-in lanes  ──push()──► port queues ──► consumers
//! native in ──► MIDI-in lanes   ──push()──► port queues ──► consumers
//! pump      ──► port queues     ──pop()───► audio-out lanes ──► native out
//! producers ──► port queues     ──pop()───► MIDI-out lanes  ──► native out
//! ```
//!
//! # Real-Time Safety
//!
//! - No locks, no allocation, no I/O: lanes and queues are allocated at
//!   registration, the lane vectors are never resized after activation
//! - Queue operations are `rtrb` push/pop only (wait-free)
//! - Degradation is flagged, never escalated: a full input queue drops the
//!   frame, an empty output queue repeats the last sample (sample-and-hold)
//! - At most one aggregated diagnostic per direction class per cycle, pushed
//!   to the diagnostics queue and written out by a worker thread

use std::sync::Arc;

use crate::backend::ProcessCycle;
use crate::diagnostics::{Diagnostic, DiagnosticsProducer};
use crate::types::{MidiEvent, PortId, Sample, SILENCE};
use crate::xrun::{CycleReport, XrunCounters};

/// Bridge side of an audio input port
pub(crate) struct AudioInLane {
    pub port: PortId,
    pub queue: rtrb::Producer<Sample>,
}

/// Bridge side of a MIDI input port
pub(crate) struct MidiInLane {
    pub port: PortId,
    pub queue: rtrb::Producer<MidiEvent>,
}

/// Bridge side of an audio output port
pub(crate) struct AudioOutLane {
    pub port: PortId,
    pub queue: rtrb::Consumer<Sample>,
    /// Last sample written; repeated on underrun
    pub held: Sample,
}

/// Bridge side of a MIDI output port
pub(crate) struct MidiOutLane {
    pub port: PortId,
    pub queue: rtrb::Consumer<MidiEvent>,
}

/// Every lane the registry created, in registration order
#[derive(Default)]
pub(crate) struct BridgeLanes {
    pub audio_ins: Vec<AudioInLane>,
    pub midi_ins: Vec<MidiInLane>,
    pub audio_outs: Vec<AudioOutLane>,
    pub midi_outs: Vec<MidiOutLane>,
}

/// The process callback installed into the audio server
pub struct Bridge {
    lanes: BridgeLanes,
    counters: Arc<XrunCounters>,
    diagnostics: DiagnosticsProducer,
    cycle: u64,
}

impl Bridge {
    pub(crate) fn new(
        lanes: BridgeLanes,
        counters: Arc<XrunCounters>,
        diagnostics: DiagnosticsProducer,
    ) -> Self {
        Self {
            lanes,
            counters,
            diagnostics,
            cycle: 0,
        }
    }

    /// Run one process cycle
    ///
    /// Never fails: xruns are reported in the returned [`CycleReport`], the
    /// counters and the diagnostics queue. Adapters always tell the server
    /// to continue.
    pub fn process(&mut self, cycle: &mut dyn ProcessCycle) -> CycleReport {
        let frames = cycle.frames();
        let mut report = CycleReport::new(self.cycle, frames);

        self.capture_audio(cycle, &mut report);
        self.capture_midi(cycle, &mut report);
        self.play_audio(cycle, &mut report);
        self.play_midi(cycle, &mut report);

        self.counters.record(&report);
        self.cycle = self.cycle.wrapping_add(1);
        report
    }

    /// Native audio in → port queues (drop-and-flag on overflow)
    fn capture_audio(&mut self, cycle: &dyn ProcessCycle, report: &mut CycleReport) {
        let frames = report.frames;
        for lane in &mut self.lanes.audio_ins {
            for &sample in cycle.audio_in(lane.port).iter().take(frames) {
                if lane.queue.push(sample).is_err() {
                    report.dropped_input += 1;
                }
            }
        }

        if report.dropped_input > 0 {
            report.flags.input_overflow = true;
            let diagnostic = Diagnostic::InputOverflow {
                cycle: report.cycle,
                dropped: report.dropped_input,
            };
            self.emit(diagnostic);
        }
    }

    /// Native MIDI in → port queues, in server order
    fn capture_midi(&mut self, cycle: &dyn ProcessCycle, report: &mut CycleReport) {
        let window = report.frames as u32;
        let mut dropped = 0usize;
        let mut skipped = 0usize;

        for lane in &mut self.lanes.midi_ins {
            let queue = &mut lane.queue;
            cycle.midi_in(lane.port, &mut |time: u32, bytes: &[u8]| {
                if time >= window {
                    skipped += 1;
                    return;
                }
                match MidiEvent::from_raw(time, bytes) {
                    Some(event) => {
                        if queue.push(event).is_err() {
                            dropped += 1;
                        }
                    }
                    None => skipped += 1,
                }
            });
        }

        report.dropped_midi = dropped;
        report.skipped_midi = skipped;
        if dropped > 0 {
            report.flags.midi_overflow = true;
            self.emit(Diagnostic::MidiOverflow {
                cycle: report.cycle,
                dropped,
            });
        }
    }

    /// Port queues → native audio out (sample-and-hold on underrun)
    fn play_audio(&mut self, cycle: &mut dyn ProcessCycle, report: &mut CycleReport) {
        let frames = report.frames;
        for lane in &mut self.lanes.audio_outs {
            for slot in cycle.audio_out(lane.port).iter_mut().take(frames) {
                match lane.queue.pop() {
                    Ok(sample) => {
                        lane.held = sample;
                        *slot = sample;
                    }
                    Err(_) => {
                        *slot = lane.held;
                        report.held_output += 1;
                    }
                }
            }
        }

        if report.held_output > 0 {
            report.flags.output_underrun = true;
            let diagnostic = Diagnostic::OutputUnderrun {
                cycle: report.cycle,
                held: report.held_output,
            };
            self.emit(diagnostic);
        }
    }

    /// Port queues → native MIDI out
    ///
    /// Everything queued is written this cycle. Times are clamped into the
    /// cycle window and kept non-decreasing, as servers require.
    fn play_midi(&mut self, cycle: &mut dyn ProcessCycle, report: &mut CycleReport) {
        let last_frame = report.frames.saturating_sub(1) as u32;
        let mut rejected = 0usize;

        for lane in &mut self.lanes.midi_outs {
            let queue = &mut lane.queue;
            let mut cursor = 0u32;
            let mut events = std::iter::from_fn(|| {
                let event = queue.pop().ok()?;
                let time = event.time().clamp(cursor, last_frame.max(cursor));
                cursor = time;
                Some(event.with_time(time))
            });
            rejected += cycle.midi_out(lane.port, &mut events);
        }

        report.rejected_midi_output = rejected;
        if rejected > 0 {
            report.flags.midi_output_overflow = true;
            self.emit(Diagnostic::MidiOutputOverflow {
                cycle: report.cycle,
                rejected,
            });
        }
    }

    /// Queue a diagnostic for the worker; count it if the queue is full
    fn emit(&mut self, diagnostic: Diagnostic) {
        if self.diagnostics.push(diagnostic).is_err() {
            self.counters.record_dropped_diagnostic();
        }
    }

    /// Number of cycles processed so far
    pub fn cycles(&self) -> u64 {
        self.cycle
    }
}

/// In-memory process cycle for unit tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-memory cycle buffers indexed by per-class port id
    #[derive(Default)]
    pub struct TestCycle {
        pub frames: usize,
        pub audio_in: Vec<Vec<Sample>>,
        pub audio_out: Vec<Vec<Sample>>,
        pub midi_in: Vec<Vec<(u32, Vec<u8>)>>,
        pub midi_out: Vec<Vec<MidiEvent>>,
        /// Native MIDI output capacity per port per cycle
        pub midi_out_capacity: usize,
    }

    impl TestCycle {
        pub fn new(frames: usize) -> Self {
            Self {
                frames,
                midi_out_capacity: usize::MAX,
                ..Default::default()
            }
        }
    }

    impl ProcessCycle for TestCycle {
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
}
