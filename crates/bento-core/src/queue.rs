//! Bounded event queues connecting the control side and the audio thread.
//!
//! Three queue kinds, all bounded, all drop-on-overflow:
//!
//! - [`rt_event_queue`]: SPSC ring from the event dispatcher into the engine.
//! - [`rt_output_queue`]: SPSC ring from the engine back to the dispatcher.
//! - [`RtEventFifo`]: fixed-capacity FIFO owned by a single processor,
//!   filled by the engine and drained during `process_audio` on the same
//!   thread.
//!
//! Pushes never block. An overflowing push fails, the event is dropped and a
//! shared counter is incremented; the non-RT side reads the counters for
//! telemetry. Dequeue order is push order.

use std::sync::Arc;

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::event::RtEvent;
use crate::lockfree::DropCounter;

/// Default capacity of the engine input and output rings.
pub const RT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Capacity of each processor's incoming and outgoing FIFO.
pub const PROCESSOR_FIFO_CAPACITY: usize = 100;

/// Producer half of an SPSC event ring.
pub struct RtEventSender {
    producer: HeapProd<RtEvent>,
    dropped: Arc<DropCounter>,
}

impl RtEventSender {
    /// Push without blocking. Returns `false` and counts a drop when full.
    #[inline]
    pub fn push(&mut self, event: RtEvent) -> bool {
        if self.producer.try_push(event).is_err() {
            self.dropped.increment();
            return false;
        }
        true
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.get()
    }

    pub fn drop_counter(&self) -> Arc<DropCounter> {
        Arc::clone(&self.dropped)
    }
}

/// Consumer half of an SPSC event ring.
pub struct RtEventReceiver {
    consumer: HeapCons<RtEvent>,
}

impl RtEventReceiver {
    #[inline]
    pub fn pop(&mut self) -> Option<RtEvent> {
        self.consumer.try_pop()
    }
}

/// Create a bounded SPSC event ring.
pub fn rt_event_queue(capacity: usize) -> (RtEventSender, RtEventReceiver) {
    let (producer, consumer) = HeapRb::<RtEvent>::new(capacity).split();
    (
        RtEventSender {
            producer,
            dropped: Arc::new(DropCounter::new()),
        },
        RtEventReceiver { consumer },
    )
}

/// Alias constructor for the engine output direction; identical mechanics,
/// kept separate so call sites read unambiguously.
pub fn rt_output_queue(capacity: usize) -> (RtEventSender, RtEventReceiver) {
    rt_event_queue(capacity)
}

/// Fixed-capacity FIFO for per-processor event delivery.
///
/// Both ends live on the audio thread: the engine pushes while routing,
/// the owning processor pops at the start of its `process_audio`. No atomics
/// are needed, only bounded storage.
pub struct RtEventFifo {
    events: Box<[Option<RtEvent>]>,
    head: usize,
    len: usize,
}

impl RtEventFifo {
    pub fn new() -> Self {
        Self::with_capacity(PROCESSOR_FIFO_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: vec![None; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, event: RtEvent) -> bool {
        if self.len == self.events.len() {
            return false;
        }
        let tail = (self.head + self.len) % self.events.len();
        self.events[tail] = Some(event);
        self.len += 1;
        true
    }

    #[inline]
    pub fn pop(&mut self) -> Option<RtEvent> {
        if self.len == 0 {
            return None;
        }
        let event = self.events[self.head].take();
        self.head = (self.head + 1) % self.events.len();
        self.len -= 1;
        event
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        while self.pop().is_some() {}
    }
}

impl Default for RtEventFifo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{RtEvent, RtEventData};

    fn bypass_event(offset: u32) -> RtEvent {
        RtEvent::set_bypass(1, offset, true)
    }

    #[test]
    fn test_spsc_fifo_order() {
        let (mut tx, mut rx) = rt_event_queue(8);
        for offset in 0..5 {
            assert!(tx.push(bypass_event(offset)));
        }
        for offset in 0..5 {
            assert_eq!(rx.pop().unwrap().sample_offset, offset);
        }
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_spsc_overflow_drops_and_counts() {
        let (mut tx, _rx) = rt_event_queue(2);
        assert!(tx.push(bypass_event(0)));
        assert!(tx.push(bypass_event(1)));
        assert!(!tx.push(bypass_event(2)));
        assert_eq!(tx.dropped_events(), 1);
    }

    #[test]
    fn test_processor_fifo_wraps() {
        let mut fifo = RtEventFifo::with_capacity(4);
        for round in 0..3 {
            for offset in 0..4 {
                assert!(fifo.push(bypass_event(round * 4 + offset)));
            }
            assert!(!fifo.push(bypass_event(99)));
            for offset in 0..4 {
                assert_eq!(fifo.pop().unwrap().sample_offset, round * 4 + offset);
            }
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_fifo_clear() {
        let mut fifo = RtEventFifo::with_capacity(4);
        fifo.push(RtEvent::new(
            1,
            0,
            RtEventData::SetBypass { bypassed: false },
        ));
        fifo.clear();
        assert!(fifo.is_empty());
        assert!(fifo.pop().is_none());
    }
}
