//! Bounded lock-free queues between the real-time bridge and the synthesis side
//!
//! Every port owns exactly one single-producer single-consumer queue built on
//! `rtrb`. The ringbuffer is allocated once at registration and never resized,
//! so both `push` and `pop` are wait-free and allocation-free:
//!
//! ```text
//! Input ports:   JACK RT thread ──push()──► [ queue ] ──pop()──► consumer thread
//! Output ports:  pump thread    ──push()──► [ queue ] ──pop()──► JACK RT thread
//! ```
//!
//! The producer and consumer halves never share a mutable cursor; each side
//! only sees its own half.

use crate::error::QueueError;

/// Largest output headroom, in frame periods, a port queue may carry
pub const MAX_BUFFER_RATIO: f32 = 64.0;

/// Create a bounded SPSC queue with the given capacity
///
/// Fails with [`QueueError::ZeroCapacity`] when `capacity` is zero.
pub fn port_queue<T>(capacity: usize) -> Result<(rtrb::Producer<T>, rtrb::Consumer<T>), QueueError> {
    if capacity == 0 {
        return Err(QueueError::ZeroCapacity);
    }
    Ok(rtrb::RingBuffer::new(capacity))
}

/// Queue capacity for an audio output port
///
/// One frame period plus `buffer_ratio` extra periods of headroom, so the
/// pump can run ahead of the bridge and absorb scheduling jitter. The ratio
/// is clamped to `0..=MAX_BUFFER_RATIO`.
pub fn output_capacity(frames: usize, buffer_ratio: f32) -> usize {
    let ratio = if buffer_ratio.is_finite() && buffer_ratio > 0.0 {
        buffer_ratio.min(MAX_BUFFER_RATIO)
    } else {
        0.0
    };
    let extra = (frames as f64 * ratio as f64).round() as usize;
    frames.saturating_add(extra).max(1)
}

/// Queue capacity for an audio input port: exactly one frame period
pub fn input_capacity(frames: usize) -> usize {
    frames.max(1)
}
