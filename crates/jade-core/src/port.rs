//! Client-side port handles
//!
//! Registering a port hands the caller one half of the port's queue; the
//! other half stays with the bridge. Input handles receive what the bridge
//! captured, output handles feed what the bridge plays.
//!
//! `try_*` calls never wait. `recv`/`send` wait (spin, then short sleeps)
//! and are meant for synthesis-side threads only; they give up when the
//! caller's [`StopSignal`] is raised or the client has been closed.

use crate::error::SendError;
use crate::signal::{wait_until, StopSignal};
use crate::types::{MidiEvent, Sample};

/// Audio samples captured by an audio input port
pub type AudioInput = PortReceiver<Sample>;

/// Audio samples to play on an audio output port
pub type AudioOutput = PortSender<Sample>;

/// MIDI events captured by a MIDI input port
pub type MidiInput = PortReceiver<MidiEvent>;

/// MIDI events to emit on a MIDI output port
pub type MidiOutput = PortSender<MidiEvent>;

/// Receiving end of an input port's queue
pub struct PortReceiver<T> {
    name: String,
    queue: rtrb::Consumer<T>,
}

impl<T> PortReceiver<T> {
    pub(crate) fn new(name: &str, queue: rtrb::Consumer<T>) -> Self {
        Self {
            name: name.to_string(),
            queue,
        }
    }

    /// Port name (without the client prefix)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue capacity, fixed at registration
    pub fn capacity(&self) -> usize {
        self.queue.buffer().capacity()
    }

    /// Items waiting to be received
    pub fn available(&self) -> usize {
        self.queue.slots()
    }

    /// True once the bridge side is gone (client closed)
    pub fn is_disconnected(&self) -> bool {
        self.queue.is_abandoned()
    }

    /// Take one item if available (never blocks)
    pub fn try_recv(&mut self) -> Option<T> {
        self.queue.pop().ok()
    }

    /// Wait for one item
    ///
    /// Returns `None` when `stop` is raised, or when the client is closed
    /// and everything queued has been received.
    pub fn recv(&mut self, stop: &StopSignal) -> Option<T> {
        let queue = &mut self.queue;
        let mut received = None;
        wait_until(stop, || match queue.pop() {
            Ok(item) => {
                received = Some(item);
                true
            }
            Err(_) => queue.is_abandoned(),
        });
        received
    }

    /// Take everything currently queued (never blocks)
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.queue.pop().ok())
    }
}

/// Sending end of an output port's queue
pub struct PortSender<T> {
    name: String,
    queue: rtrb::Producer<T>,
}

impl<T> PortSender<T> {
    pub(crate) fn new(name: &str, queue: rtrb::Producer<T>) -> Self {
        Self {
            name: name.to_string(),
            queue,
        }
    }

    /// Port name (without the client prefix)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue capacity, fixed at registration
    pub fn capacity(&self) -> usize {
        self.queue.buffer().capacity()
    }

    /// Free slots in the queue
    pub fn free_slots(&self) -> usize {
        self.queue.slots()
    }

    /// True once the bridge side is gone (client closed)
    pub fn is_disconnected(&self) -> bool {
        self.queue.is_abandoned()
    }

    /// Queue one item (never blocks)
    ///
    /// Returns `Err(SendError::Full(value))` if the queue is full.
    pub fn try_send(&mut self, value: T) -> Result<(), SendError<T>> {
        if self.queue.is_abandoned() {
            return Err(SendError::Disconnected(value));
        }
        self.queue.push(value).map_err(|e| match e {
            rtrb::PushError::Full(value) => SendError::Full(value),
        })
    }

    /// Wait for a free slot, then queue one item
    ///
    /// The bridge drains one frame period per cycle, so a producer that runs
    /// ahead is throttled here to the server's pace.
    pub fn send(&mut self, value: T, stop: &StopSignal) -> Result<(), SendError<T>> {
        let queue = &self.queue;
        if !wait_until(stop, || queue.slots() > 0 || queue.is_abandoned()) {
            return Err(SendError::Stopped(value));
        }
        if self.queue.is_abandoned() {
            return Err(SendError::Disconnected(value));
        }
        // Single producer: a free slot cannot disappear before this push
        self.queue.push(value).map_err(|e| match e {
            rtrb::PushError::Full(value) => SendError::Full(value),
        })
    }
}
