//! The control-thread <-> audio-thread message queues (§5), built on
//! `ringbuf`'s lock-free SPSC ring buffer. The audio thread never
//! blocks on either end: draining is a `try_pop` loop at the top of
//! each block, and publishing is a `try_push` that falls back to a
//! dropped-event counter on overflow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;
use ringbuf::{Consumer, Producer, RingBuffer};

use crate::event::EngineEvent;
use crate::midi::MidiMessage;

/// A command sent from the control thread to the audio thread: either
/// a MIDI message to dispatch on a channel, or an out-of-band request
/// that does not fit the MIDI model (loading a new bank, for
/// instance, which is handled at a higher level and never queued
/// here).
#[derive(Clone, Debug)]
pub enum ControlMessage {
    Midi { channel: u8, message: MidiMessage },
    SetVoiceCap(usize),
}

/// The producer half, owned by the control thread.
pub struct ControlSender {
    producer: Producer<ControlMessage>,
    dropped: Arc<AtomicU64>,
}

/// The consumer half, owned by the audio thread.
pub struct ControlReceiver {
    consumer: Consumer<ControlMessage>,
}

impl ControlSender {
    /// Attempts to enqueue `message`; on overflow it is dropped and
    /// counted rather than blocking the caller.
    pub fn send(&mut self, message: ControlMessage) {
        if self.producer.push(message).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("control queue full, message dropped");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ControlReceiver {
    /// Drains every message currently queued. Called once per audio
    /// block; never blocks and never allocates beyond the caller's
    /// buffer.
    pub fn drain(&mut self, mut handle: impl FnMut(ControlMessage)) {
        while let Some(message) = self.consumer.pop() {
            handle(message);
        }
    }
}

/// Builds the control (control -> audio) queue pair, sized from
/// [`crate::config::SynthConfig::control_queue_capacity`].
pub fn control_queue(capacity: usize) -> (ControlSender, ControlReceiver) {
    let ring = RingBuffer::<ControlMessage>::new(capacity.max(1));
    let (producer, consumer) = ring.split();
    (
        ControlSender {
            producer,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        ControlReceiver { consumer },
    )
}

/// The producer half, owned by the audio thread.
pub struct EventSender {
    producer: Producer<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

/// The consumer half, owned by the control thread.
pub struct EventReceiver {
    consumer: Consumer<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Never blocks: on a full queue the event is dropped and counted,
    /// exactly as §5 specifies for audio-thread-to-control-thread
    /// publication.
    pub fn publish(&mut self, event: EngineEvent) {
        if self.producer.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl EventReceiver {
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.consumer.pop()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Builds the event (audio -> control) queue pair, sized from
/// [`crate::config::SynthConfig::event_queue_capacity`].
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let ring = RingBuffer::<EngineEvent>::new(capacity.max(1));
    let (producer, consumer) = ring.split();
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventSender {
            producer,
            dropped: dropped.clone(),
        },
        EventReceiver { consumer, dropped },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_queue_is_fifo() {
        let (mut tx, mut rx) = control_queue(4);
        tx.send(ControlMessage::SetVoiceCap(10));
        tx.send(ControlMessage::SetVoiceCap(20));
        let mut seen = Vec::new();
        rx.drain(|m| {
            if let ControlMessage::SetVoiceCap(n) = m {
                seen.push(n);
            }
        });
        assert_eq!(seen, vec![10, 20]);
    }

    #[test]
    fn control_queue_overflow_increments_drop_counter() {
        let (mut tx, _rx) = control_queue(1);
        tx.send(ControlMessage::SetVoiceCap(1));
        tx.send(ControlMessage::SetVoiceCap(2));
        assert_eq!(tx.dropped_count(), 1);
    }

    #[test]
    fn event_queue_overflow_increments_drop_counter() {
        let (mut tx, rx) = event_queue(1);
        tx.publish(EngineEvent::StopAll);
        tx.publish(EngineEvent::StopAll);
        assert_eq!(rx.dropped_count(), 1);
    }
}
