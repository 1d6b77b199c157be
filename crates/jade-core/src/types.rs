//! Common types for Jade
//!
//! Sample and MIDI event types shared by the ports, the real-time bridge
//! and the synthesis side, plus the port classification used for naming.

use std::fmt;

/// Audio sample type (32-bit float, as delivered by the audio server)
pub type Sample = f32;

/// The silent sample, also the initial held value of every output port
pub const SILENCE: Sample = 0.0;

/// Largest MIDI message the bridge carries (channel-voice messages)
pub const MAX_MIDI_EVENT_BYTES: usize = 3;

/// MIDI status nibbles
const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;

/// Index of a port within the backend's native port table
///
/// Assigned by the backend at registration; the bridge uses it to ask the
/// backend for that port's buffer during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub usize);

/// Whether data flows into or out of this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

/// Payload carried by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Audio,
    Midi,
}

/// Port class: names are unique within one class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortClass {
    AudioIn,
    AudioOut,
    MidiIn,
    MidiOut,
}

impl PortClass {
    /// All classes in registration order
    pub const ALL: [PortClass; 4] = [
        PortClass::AudioIn,
        PortClass::AudioOut,
        PortClass::MidiIn,
        PortClass::MidiOut,
    ];

    pub fn new(direction: PortDirection, kind: PortKind) -> Self {
        match (direction, kind) {
            (PortDirection::Input, PortKind::Audio) => PortClass::AudioIn,
            (PortDirection::Output, PortKind::Audio) => PortClass::AudioOut,
            (PortDirection::Input, PortKind::Midi) => PortClass::MidiIn,
            (PortDirection::Output, PortKind::Midi) => PortClass::MidiOut,
        }
    }

    pub fn direction(&self) -> PortDirection {
        match self {
            PortClass::AudioIn | PortClass::MidiIn => PortDirection::Input,
            PortClass::AudioOut | PortClass::MidiOut => PortDirection::Output,
        }
    }

    pub fn kind(&self) -> PortKind {
        match self {
            PortClass::AudioIn | PortClass::AudioOut => PortKind::Audio,
            PortClass::MidiIn | PortClass::MidiOut => PortKind::Midi,
        }
    }

    /// Get the name of this class
    pub fn name(&self) -> &'static str {
        match self {
            PortClass::AudioIn => "audio input",
            PortClass::AudioOut => "audio output",
            PortClass::MidiIn => "MIDI input",
            PortClass::MidiOut => "MIDI output",
        }
    }
}

impl fmt::Display for PortClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A channel-voice MIDI event, timestamped within its process cycle
///
/// Stored inline (no heap) so it can be copied through the real-time
/// queues. `time` is the frame offset inside the cycle that delivered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    time: u32,
    len: u8,
    bytes: [u8; MAX_MIDI_EVENT_BYTES],
}

impl MidiEvent {
    /// Build an event from raw bytes
    ///
    /// Returns `None` for empty messages and for messages longer than a
    /// channel-voice message (SysEx).
    pub fn from_raw(time: u32, data: &[u8]) -> Option<Self> {
        if data.is_empty() || data.len() > MAX_MIDI_EVENT_BYTES {
            return None;
        }
        let mut bytes = [0u8; MAX_MIDI_EVENT_BYTES];
        bytes[..data.len()].copy_from_slice(data);
        Some(Self {
            time,
            len: data.len() as u8,
            bytes,
        })
    }

    /// Note On on `channel` (0-15)
    pub fn note_on(time: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            time,
            len: 3,
            bytes: [NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
        }
    }

    /// Note Off on `channel` (0-15)
    pub fn note_off(time: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            time,
            len: 3,
            bytes: [NOTE_OFF | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
        }
    }

    /// Frame offset within the cycle that delivered this event
    #[inline]
    pub fn time(&self) -> u32 {
        self.time
    }

    /// Same message at a different frame offset
    #[inline]
    pub fn with_time(self, time: u32) -> Self {
        Self { time, ..self }
    }

    /// Raw message bytes
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    /// MIDI channel (0-15)
    #[inline]
    pub fn channel(&self) -> u8 {
        self.bytes[0] & 0x0F
    }

    #[inline]
    pub fn data1(&self) -> u8 {
        self.bytes[1]
    }

    #[inline]
    pub fn data2(&self) -> u8 {
        self.bytes[2]
    }

    /// Note On with a non-zero velocity
    pub fn is_note_on(&self) -> bool {
        self.len == 3 && self.status() & 0xF0 == NOTE_ON && self.data2() > 0
    }

    /// Note Off, or Note On with velocity 0
    pub fn is_note_off(&self) -> bool {
        if self.len != 3 {
            return false;
        }
        match self.status() & 0xF0 {
            NOTE_OFF => true,
            NOTE_ON => self.data2() == 0,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_class_roundtrip() {
        for class in PortClass::ALL {
            assert_eq!(PortClass::new(class.direction(), class.kind()), class);
        }
    }

    #[test]
    fn test_midi_event_from_raw() {
        let event = MidiEvent::from_raw(12, &[0x93, 60, 100]).unwrap();
        assert_eq!(event.time(), 12);
        assert_eq!(event.channel(), 3);
        assert_eq!(event.data1(), 60);
        assert_eq!(event.bytes(), &[0x93u8, 60, 100][..]);
        assert!(event.is_note_on());
        assert!(!event.is_note_off());
    }

    #[test]
    fn test_midi_event_rejects_sysex_and_empty() {
        assert!(MidiEvent::from_raw(0, &[]).is_none());
        assert!(MidiEvent::from_raw(0, &[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7]).is_none());
    }

    #[test]
    fn test_note_on_zero_velocity_is_note_off() {
        let event = MidiEvent::note_on(0, 0, 64, 0);
        assert!(!event.is_note_on());
        assert!(event.is_note_off());
        assert!(MidiEvent::note_off(0, 1, 64, 20).is_note_off());
    }

    #[test]
    fn test_short_messages_are_not_notes() {
        // Program change: two bytes
        let event = MidiEvent::from_raw(0, &[0xC0, 5]).unwrap();
        assert!(!event.is_note_on());
        assert!(!event.is_note_off());
        assert_eq!(event.bytes().len(), 2);
    }
}
