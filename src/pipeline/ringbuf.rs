//! Lock-free SPSC handoff from the decode callback to the analysis loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::trace;

use crate::capture::frame::FrameBuffer;

/// Queue statistics
#[derive(Debug, Default)]
pub struct QueueStats {
    frames_written: AtomicU64,
    frames_read: AtomicU64,
    frames_dropped: AtomicU64,
    frames_drained: AtomicU64,
}

impl QueueStats {
    pub fn written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Frames released unread during shutdown.
    pub fn drained(&self) -> u64 {
        self.frames_drained.load(Ordering::Relaxed)
    }
}

/// Create a FIFO handoff of `capacity` frames.
pub fn handoff_queue(capacity: usize, stats: Arc<QueueStats>) -> (FrameEnqueuer, FrameDequeuer) {
    let (prod, cons) = HeapRb::<FrameBuffer>::new(capacity.max(1)).split();
    (
        FrameEnqueuer {
            prod,
            stats: Arc::clone(&stats),
        },
        FrameDequeuer { cons, stats },
    )
}

/// Producer half, owned by the decode callback context.
pub struct FrameEnqueuer {
    prod: HeapProd<FrameBuffer>,
    stats: Arc<QueueStats>,
}

impl FrameEnqueuer {
    /// Hand `frame` to the consumer without waiting.
    ///
    /// When the queue is full the frame is released here and `false` is
    /// returned.
    pub fn enqueue(&mut self, frame: FrameBuffer) -> bool {
        match self.prod.try_push(frame) {
            Ok(()) => {
                self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(frame) => {
                trace!(frame = frame.sequence(), "handoff queue full, dropping frame");
                drop(frame);
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("autoskip_frames_dropped").increment(1);
                false
            }
        }
    }
}

/// Consumer half, owned by the analysis loop.
pub struct FrameDequeuer {
    cons: HeapCons<FrameBuffer>,
    stats: Arc<QueueStats>,
}

impl FrameDequeuer {
    /// Oldest queued frame, or `None` immediately when empty.
    pub fn try_dequeue(&mut self) -> Option<FrameBuffer> {
        let frame = self.cons.try_pop()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    pub fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cons.occupied_len()
    }

    /// Release every queued frame unread, returning how many were dropped.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Some(frame) = self.cons.try_pop() {
            drop(frame);
            drained += 1;
        }
        self.stats
            .frames_drained
            .fetch_add(drained as u64, Ordering::Relaxed);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::allocator::{BufferLedger, FrameAllocator};
    use crate::capture::frame::FrameLayout;

    fn allocator() -> (FrameAllocator, Arc<BufferLedger>) {
        let ledger = Arc::new(BufferLedger::default());
        (
            FrameAllocator::new(FrameLayout::aligned(8, 8, 32), ledger.clone()),
            ledger,
        )
    }

    #[test]
    fn frames_come_out_in_order() {
        let (mut allocator, _) = allocator();
        let stats = Arc::new(QueueStats::default());
        let (mut tx, mut rx) = handoff_queue(8, stats.clone());

        for _ in 0..5 {
            assert!(tx.enqueue(allocator.allocate().unwrap()));
        }
        assert_eq!(rx.len(), 5);

        let order: Vec<u64> = std::iter::from_fn(|| rx.try_dequeue())
            .map(|frame| frame.sequence())
            .collect();
        assert_eq!(order, [0, 1, 2, 3, 4]);
        assert!(rx.try_dequeue().is_none());
        assert_eq!(stats.written(), 5);
        assert_eq!(stats.read(), 5);
    }

    #[test]
    fn full_queue_releases_incoming_frame() {
        let (mut allocator, ledger) = allocator();
        let stats = Arc::new(QueueStats::default());
        let (mut tx, mut rx) = handoff_queue(2, stats.clone());

        assert!(tx.enqueue(allocator.allocate().unwrap()));
        assert!(tx.enqueue(allocator.allocate().unwrap()));
        assert!(!tx.enqueue(allocator.allocate().unwrap()));

        assert_eq!(stats.dropped(), 1);
        assert_eq!(ledger.released(), 1);
        assert_eq!(rx.try_dequeue().unwrap().sequence(), 0);
    }

    #[test]
    fn drain_releases_everything_queued() {
        let (mut allocator, ledger) = allocator();
        let stats = Arc::new(QueueStats::default());
        let (mut tx, mut rx) = handoff_queue(16, stats.clone());

        for _ in 0..10 {
            tx.enqueue(allocator.allocate().unwrap());
        }
        for _ in 0..3 {
            drop(rx.try_dequeue());
        }

        assert_eq!(rx.drain(), 7);
        assert!(rx.is_empty());
        assert_eq!(stats.drained(), 7);
        assert_eq!(ledger.allocated(), ledger.released());
    }

    #[test]
    fn producer_and_consumer_on_separate_threads() {
        let (mut allocator, ledger) = allocator();
        let stats = Arc::new(QueueStats::default());
        let (mut tx, mut rx) = handoff_queue(4, stats.clone());

        let producer = std::thread::spawn(move || {
            let mut sent = Vec::new();
            for _ in 0..200 {
                let frame = allocator.allocate().unwrap();
                let sequence = frame.sequence();
                if tx.enqueue(frame) {
                    sent.push(sequence);
                }
            }
            sent
        });

        let mut received = Vec::new();
        loop {
            match rx.try_dequeue() {
                Some(frame) => received.push(frame.sequence()),
                None if producer.is_finished() && rx.is_empty() => break,
                None => std::thread::yield_now(),
            }
        }

        let sent = producer.join().unwrap();
        assert_eq!(received, sent);
        assert_eq!(ledger.allocated(), ledger.released());
    }
}
