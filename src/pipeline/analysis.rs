//! Consumer side: dequeue, compare, detect, and clean up

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::RuntimeFlavor;
use tracing::{debug, error, info, instrument};

use crate::capture::engine::{PlaybackClock, PlaybackEngine};
use crate::capture::frame::FrameBuffer;
use crate::compare::{ImageComparer, ReferenceImage};
use crate::error::SessionError;
use crate::pipeline::detector::{MatchDetector, MatchFound};
use crate::pipeline::ringbuf::FrameDequeuer;
use crate::pipeline::session::{SessionOutcome, SessionShared, SessionState};

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A frame was compared and did not match.
    Compared,
    /// Nothing queued; wait one poll interval.
    Idle,
    Finished(SessionOutcome),
}

/// The single consumer of a session's handoff queue.
pub struct AnalysisLoop {
    queue: FrameDequeuer,
    comparer: ImageComparer,
    reference: ReferenceImage,
    detector: MatchDetector,
    clock: Arc<dyn PlaybackClock>,
    engine: Option<Box<dyn PlaybackEngine>>,
    shared: Arc<SessionShared>,
    events: flume::Sender<MatchFound>,
    poll_interval: Duration,
}

impl AnalysisLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        queue: FrameDequeuer,
        comparer: ImageComparer,
        reference: ReferenceImage,
        detector: MatchDetector,
        clock: Arc<dyn PlaybackClock>,
        engine: Box<dyn PlaybackEngine>,
        shared: Arc<SessionShared>,
        events: flume::Sender<MatchFound>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            comparer,
            reference,
            detector,
            clock,
            engine: Some(engine),
            shared,
            events,
            poll_interval,
        }
    }

    /// Drive the loop until the session reaches a terminal state.
    ///
    /// The only suspension point is the sleep while the queue is empty.
    #[instrument(skip(self), name = "analysis")]
    pub async fn run(mut self) -> SessionOutcome {
        loop {
            match self.step() {
                Step::Compared => {}
                Step::Idle => tokio::time::sleep(self.poll_interval).await,
                Step::Finished(outcome) => return outcome,
            }
        }
    }

    /// One iteration: observe cancellation, then compare at most one frame.
    pub fn step(&mut self) -> Step {
        if self.shared.cancel_requested() {
            self.shared.finish(SessionState::Cancelled);
        }
        if self.shared.state().is_terminal() {
            return Step::Finished(self.shutdown());
        }

        match self.queue.try_dequeue() {
            Some(frame) => self.analyze(frame),
            None if self.shared.engine_ended() && self.queue.is_empty() => {
                info!("media ended without a match");
                self.shared.finish(SessionState::Cancelled);
                Step::Finished(self.shutdown())
            }
            None => Step::Idle,
        }
    }

    fn analyze(&mut self, frame: FrameBuffer) -> Step {
        let started = Instant::now();
        let sequence = frame.sequence();
        let report = self.comparer.compare(frame.view(), self.reference.view());
        // Released as soon as the comparison is done
        drop(frame);

        let report = match report {
            Ok(report) => report,
            Err(err) => {
                error!("comparison failed: {}", err);
                self.shared.fail(SessionError::Comparison(err));
                return Step::Finished(self.shutdown());
            }
        };

        self.shared.record_compared();
        metrics::counter!("autoskip_frames_compared").increment(1);
        metrics::histogram!("autoskip_compare_time_us").record(started.elapsed().as_micros() as f64);
        debug!(frame = sequence, difference = report.normalized, "compared frame");

        if let Some(found) = self.detector.observe(&report, sequence, self.clock.as_ref()) {
            if self.shared.finish(SessionState::Matched) {
                info!(
                    frame = sequence,
                    timestamp_ms = found.timestamp_ms,
                    difference = found.difference,
                    "found match, shutting down grab"
                );
                // Capacity one and only ever sent once, so this cannot block
                let _ = self.events.try_send(found);
            }
            return Step::Finished(self.shutdown());
        }

        Step::Compared
    }

    /// Release queued frames, stop the decode, release anything it queued
    /// while stopping, and report the outcome.
    fn shutdown(&mut self) -> SessionOutcome {
        let mut drained = self.queue.drain();
        if let Some(mut engine) = self.engine.take() {
            stop_engine(engine.as_mut());
        }
        drained += self.queue.drain();

        let outcome = match (self.shared.state(), self.detector.found()) {
            (SessionState::Matched, Some(found)) => SessionOutcome::Matched(found),
            (SessionState::Error, _) => SessionOutcome::Failed(
                self.shared
                    .failure()
                    .cloned()
                    .unwrap_or_else(|| SessionError::DecodeEngine("unknown failure".into())),
            ),
            _ => SessionOutcome::Cancelled,
        };

        let stats = self.shared.stats();
        info!(
            state = ?self.shared.state(),
            drained,
            compared = stats.frames_compared,
            allocated = stats.buffers_allocated,
            released = stats.buffers_released,
            "grab session finished"
        );
        outcome
    }
}

/// Stopping an engine may join its decode thread. On a multi-threaded
/// runtime the worker is handed off first so other tasks keep running.
fn stop_engine(engine: &mut dyn PlaybackEngine) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| engine.stop())
        }
        _ => engine.stop(),
    }
}

impl Drop for AnalysisLoop {
    fn drop(&mut self) {
        // Aborted before reaching a terminal state
        if let Some(mut engine) = self.engine.take() {
            self.shared.finish(SessionState::Cancelled);
            engine.stop();
        }
    }
}
