//! Producer adapter between the decode callbacks and the handoff queue

use std::sync::Arc;

use tracing::{error, trace, warn};

use crate::capture::allocator::FrameAllocator;
use crate::capture::frame::{FrameBuffer, FrameLayout};
use crate::error::SessionError;
use crate::pipeline::decimator::Decimator;
use crate::pipeline::ringbuf::FrameEnqueuer;
use crate::pipeline::session::SessionShared;

/// Receives decoded pictures on the engine's callback thread.
///
/// The engine calls [`lock`](Self::lock) to get a destination of
/// `stride * lines` bytes, writes the picture, then calls
/// [`display`](Self::display). Neither call blocks, allocates beyond the one
/// frame region, or panics.
pub struct FrameSink {
    allocator: FrameAllocator,
    decimator: Decimator,
    queue: FrameEnqueuer,
    pending: Option<FrameBuffer>,
    shared: Arc<SessionShared>,
    consecutive_failures: u32,
    failure_limit: u32,
}

impl FrameSink {
    pub(crate) fn new(
        allocator: FrameAllocator,
        decimator: Decimator,
        queue: FrameEnqueuer,
        shared: Arc<SessionShared>,
        failure_limit: u32,
    ) -> Self {
        Self {
            allocator,
            decimator,
            queue,
            pending: None,
            shared,
            consecutive_failures: 0,
            failure_limit: failure_limit.max(1),
        }
    }

    pub fn layout(&self) -> FrameLayout {
        self.allocator.layout()
    }

    /// Begin writing a picture.
    ///
    /// Returns `None` when the frame should be skipped: the session stopped
    /// capturing, or the region could not be mapped.
    pub fn lock(&mut self) -> Option<&mut [u8]> {
        // An unfinished write is abandoned
        self.pending = None;

        if !self.shared.is_capturing() {
            return None;
        }

        match self.allocator.allocate() {
            Ok(frame) => {
                self.consecutive_failures = 0;
                Some(self.pending.insert(frame).as_mut_slice())
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(
                    attempts = self.consecutive_failures,
                    "frame buffer allocation failed, skipping frame: {}", err
                );
                if self.consecutive_failures >= self.failure_limit {
                    error!("giving up after {} allocation failures", self.consecutive_failures);
                    self.shared.fail(SessionError::Allocation {
                        attempts: self.consecutive_failures,
                        reason: err.to_string(),
                    });
                }
                None
            }
        }
    }

    /// The picture written since the last `lock` is complete.
    pub fn display(&mut self) {
        let Some(frame) = self.pending.take() else {
            return;
        };
        self.shared.record_produced();

        if !self.decimator.admit() {
            trace!(frame = frame.sequence(), "decimated");
            self.shared.record_discarded();
            metrics::counter!("autoskip_frames_discarded").increment(1);
            return;
        }

        if !self.shared.is_capturing() {
            return;
        }

        self.queue.enqueue(frame);
    }
}

impl Drop for FrameSink {
    fn drop(&mut self) {
        if let Some(frame) = self.pending.take() {
            trace!(frame = frame.sequence(), "releasing unfinished frame");
        }
    }
}
