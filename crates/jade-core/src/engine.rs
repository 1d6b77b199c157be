//! Synthesis engine seam
//!
//! The bridge does not know how sound is made. It is fed by a
//! [`SampleSource`]: a single authoritative "pull one sample" entry point,
//! taken by `&mut self` so only one caller (the synthesis pump) can ever be
//! sampling a given engine.
//!
//! [`MixBus`] is a minimal engine that sums registered [`Sound`]s. Sounds
//! are registered from any thread through a [`MixBusHandle`] and are
//! discarded once they report their end.

use std::f32::consts::TAU;

use crossbeam::channel::{Receiver, Sender, TrySendError};

use crate::types::{Sample, SILENCE};

/// Engine side consumed by the synthesis pump
pub trait SampleSource: Send + 'static {
    /// Produce the next sample
    fn sample(&mut self) -> Sample;
}

/// A finite or infinite sound registered with a mix bus
pub trait Sound: Send {
    /// Next sample, or `None` once the sound has ended
    fn sample(&mut self) -> Option<Sample>;
}

/// Maximum number of sounds waiting to be picked up by the bus
pub const MIX_BUS_QUEUE_CAPACITY: usize = 256;

/// Summing bus over registered sounds
pub struct MixBus {
    incoming: Receiver<Box<dyn Sound>>,
    sounds: Vec<Box<dyn Sound>>,
    gain: f32,
}

/// Registration entry point of a [`MixBus`], cloneable across threads
#[derive(Clone)]
pub struct MixBusHandle {
    tx: Sender<Box<dyn Sound>>,
}

impl MixBus {
    /// Create a bus and its registration handle
    pub fn new() -> (Self, MixBusHandle) {
        let (tx, rx) = crossbeam::channel::bounded(MIX_BUS_QUEUE_CAPACITY);
        let bus = Self {
            incoming: rx,
            sounds: Vec::new(),
            gain: 1.0,
        };
        (bus, MixBusHandle { tx })
    }

    /// Set the master gain applied to the sum
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Sounds currently mixed (registered and not yet ended)
    pub fn active_sounds(&self) -> usize {
        self.sounds.len()
    }

    fn collect_new_sounds(&mut self) {
        while let Ok(sound) = self.incoming.try_recv() {
            self.sounds.push(sound);
        }
    }
}

impl SampleSource for MixBus {
    fn sample(&mut self) -> Sample {
        self.collect_new_sounds();
        if self.sounds.is_empty() {
            return SILENCE;
        }

        let mut sum = SILENCE;
        self.sounds.retain_mut(|sound| match sound.sample() {
            Some(s) => {
                sum += s;
                true
            }
            None => false,
        });
        sum * self.gain
    }
}

impl MixBusHandle {
    /// Register a sound; it starts on the bus's next sample
    ///
    /// Hands the sound back if the bus is gone or its inbox is full.
    pub fn play(&self, sound: impl Sound + 'static) -> Result<(), Box<dyn Sound>> {
        self.tx.try_send(Box::new(sound)).map_err(|e| match e {
            TrySendError::Full(sound) | TrySendError::Disconnected(sound) => sound,
        })
    }
}

/// Sine oscillator, optionally limited to a number of samples
pub struct SineTone {
    phase: f32,
    step: f32,
    amplitude: f32,
    remaining: Option<u64>,
}

impl SineTone {
    pub fn new(frequency: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / sample_rate.max(1) as f32,
            amplitude,
            remaining: None,
        }
    }

    /// Stop after `samples` samples
    pub fn with_length(mut self, samples: u64) -> Self {
        self.remaining = Some(samples);
        self
    }

    /// Frequency of a MIDI note number (A4 = 69 = 440 Hz)
    pub fn note_frequency(note: u8) -> f32 {
        440.0 * 2f32.powf((note as f32 - 69.0) / 12.0)
    }
}

impl Sound for SineTone {
    fn sample(&mut self) -> Option<Sample> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        let value = self.phase.sin() * self.amplitude;
        self.phase = (self.phase + self.step) % TAU;
        Some(value)
    }
}

/// A fixed sequence of samples, played once
pub struct SampleSequence {
    samples: std::vec::IntoIter<Sample>,
}

impl SampleSequence {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: samples.into_iter(),
        }
    }
}

impl Sound for SampleSequence {
    fn sample(&mut self) -> Option<Sample> {
        self.samples.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bus_is_silent() {
        let (mut bus, _handle) = MixBus::new();
        assert_eq!(bus.sample(), SILENCE);
    }

    #[test]
    fn test_bus_sums_and_discards_finished_sounds() {
        let (mut bus, handle) = MixBus::new();
        assert!(handle.play(SampleSequence::new(vec![0.25, 0.25])).is_ok());
        assert!(handle.play(SampleSequence::new(vec![0.5])).is_ok());

        assert_eq!(bus.sample(), 0.75);
        assert_eq!(bus.active_sounds(), 2);
        assert_eq!(bus.sample(), 0.25);
        assert_eq!(bus.active_sounds(), 1);
        assert_eq!(bus.sample(), SILENCE);
        assert_eq!(bus.active_sounds(), 0);
    }

    #[test]
    fn test_bus_gain() {
        let (bus, handle) = MixBus::new();
        let mut bus = bus.with_gain(0.5);
        assert!(handle.play(SampleSequence::new(vec![1.0])).is_ok());
        assert_eq!(bus.sample(), 0.5);
    }

    #[test]
    fn test_play_after_bus_dropped_returns_sound() {
        let (bus, handle) = MixBus::new();
        drop(bus);
        assert!(handle.play(SampleSequence::new(vec![1.0])).is_err());
    }

    #[test]
    fn test_sine_length_and_range() {
        let mut tone = SineTone::new(440.0, 0.5, 48_000).with_length(100);
        let samples: Vec<Sample> = std::iter::from_fn(|| tone.sample()).collect();
        assert_eq!(samples.len(), 100);
        assert_eq!(samples[0], 0.0);
        assert!(samples.iter().all(|s| s.abs() <= 0.5));
    }

    #[test]
    fn test_note_frequency() {
        assert!((SineTone::note_frequency(69) - 440.0).abs() < 1e-3);
        assert!((SineTone::note_frequency(81) - 880.0).abs() < 1e-2);
    }
}
