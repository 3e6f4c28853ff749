//! OS-backed frame buffer allocation with a release ledger

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use memmap2::MmapMut;

use crate::capture::frame::{FrameBuffer, FrameLayout};

/// Source of writable memory regions for frame buffers.
pub trait RegionSource: Send + 'static {
    fn map(&mut self, len: usize) -> io::Result<MmapMut>;
}

/// Anonymous private mappings, one per frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousRegions;

impl RegionSource for AnonymousRegions {
    fn map(&mut self, len: usize) -> io::Result<MmapMut> {
        MmapMut::map_anon(len)
    }
}

/// Allocation and release counts for one session.
///
/// Every successful allocation is matched by exactly one release when the
/// frame buffer is dropped.
#[derive(Debug, Default)]
pub struct BufferLedger {
    allocated: CachePadded<AtomicU64>,
    released: CachePadded<AtomicU64>,
}

impl BufferLedger {
    pub(crate) fn record_allocation(&self) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.released.fetch_add(1, Ordering::AcqRel);
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// Buffers currently alive.
    pub fn outstanding(&self) -> u64 {
        self.allocated().saturating_sub(self.released())
    }
}

/// Creates frame buffers of a fixed layout for the decode callback.
pub struct FrameAllocator {
    layout: FrameLayout,
    source: Box<dyn RegionSource>,
    ledger: Arc<BufferLedger>,
    next_sequence: u64,
}

impl FrameAllocator {
    pub fn new(layout: FrameLayout, ledger: Arc<BufferLedger>) -> Self {
        Self::with_source(layout, ledger, Box::new(AnonymousRegions))
    }

    pub fn with_source(
        layout: FrameLayout,
        ledger: Arc<BufferLedger>,
        source: Box<dyn RegionSource>,
    ) -> Self {
        Self {
            layout,
            source,
            ledger,
            next_sequence: 0,
        }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn ledger(&self) -> &Arc<BufferLedger> {
        &self.ledger
    }

    /// Map a zeroed region of `stride * lines` bytes.
    pub fn allocate(&mut self) -> io::Result<FrameBuffer> {
        let region = self.source.map(self.layout.byte_len())?;
        if region.len() < self.layout.byte_len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "region of {} bytes is smaller than the {} byte frame",
                    region.len(),
                    self.layout.byte_len()
                ),
            ));
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.ledger.record_allocation();

        Ok(FrameBuffer::new(
            region,
            self.layout,
            sequence,
            Arc::clone(&self.ledger),
        ))
    }
}
