//! Session lifecycle: `Idle -> Capturing -> {Matched | Cancelled | Error}`

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::capture::allocator::{AnonymousRegions, BufferLedger, FrameAllocator, RegionSource};
use crate::capture::engine::{EngineSignal, MediaSource, PlaybackClock, PlaybackEngine};
use crate::capture::frame::FrameLayout;
use crate::capture::sink::FrameSink;
use crate::compare::ReferenceImage;
use crate::error::{GrabError, SessionError};
use crate::pipeline::analysis::AnalysisLoop;
use crate::pipeline::decimator::Decimator;
use crate::pipeline::detector::{MatchDetector, MatchFound};
use crate::pipeline::ringbuf::{handoff_queue, QueueStats};
use crate::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Capturing = 1,
    Matched = 2,
    Cancelled = 3,
    Error = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Capturing,
            2 => SessionState::Matched,
            3 => SessionState::Cancelled,
            _ => SessionState::Error,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Matched | SessionState::Cancelled | SessionState::Error
        )
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Matched(MatchFound),
    /// Stopped by the caller, or the media ended without a match.
    Cancelled,
    Failed(SessionError),
}

impl SessionOutcome {
    pub fn matched(&self) -> Option<MatchFound> {
        match self {
            SessionOutcome::Matched(found) => Some(*found),
            _ => None,
        }
    }
}

/// Point-in-time counters for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_produced: u64,
    pub frames_discarded: u64,
    pub frames_enqueued: u64,
    pub frames_dropped: u64,
    pub frames_drained: u64,
    pub frames_compared: u64,
    pub buffers_allocated: u64,
    pub buffers_released: u64,
}

#[derive(Debug, Default)]
struct Counters {
    produced: AtomicU64,
    discarded: AtomicU64,
    compared: AtomicU64,
}

/// State shared by the frame sink, the engine signal, the analysis loop and
/// the caller's handle.
pub(crate) struct SessionShared {
    state: AtomicU8,
    cancel: AtomicBool,
    engine_ended: AtomicBool,
    failure: OnceCell<SessionError>,
    ledger: Arc<BufferLedger>,
    queue_stats: Arc<QueueStats>,
    counters: CachePadded<Counters>,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Idle as u8),
            cancel: AtomicBool::new(false),
            engine_ended: AtomicBool::new(false),
            failure: OnceCell::new(),
            ledger: Arc::default(),
            queue_stats: Arc::default(),
            counters: CachePadded::new(Counters::default()),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_capturing(&self) -> bool {
        self.state() == SessionState::Capturing
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Idle -> Capturing`.
    pub(crate) fn begin(&self) -> bool {
        self.transition(SessionState::Idle, SessionState::Capturing)
    }

    /// Move a live session to a terminal state. Only the first caller wins.
    pub(crate) fn finish(&self, to: SessionState) -> bool {
        debug_assert!(to.is_terminal());
        self.transition(SessionState::Capturing, to)
            || self.transition(SessionState::Idle, to)
    }

    pub(crate) fn fail(&self, error: SessionError) -> bool {
        // Recorded before the transition so the loop never sees Error without a reason
        let _ = self.failure.set(error);
        self.finish(SessionState::Error)
    }

    pub(crate) fn failure(&self) -> Option<&SessionError> {
        self.failure.get()
    }

    /// Returns true the first time cancellation is requested.
    pub(crate) fn request_cancel(&self) -> bool {
        !self.cancel.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub(crate) fn mark_engine_ended(&self) -> bool {
        !self.engine_ended.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn engine_ended(&self) -> bool {
        self.engine_ended.load(Ordering::Acquire)
    }

    pub(crate) fn ledger(&self) -> Arc<BufferLedger> {
        Arc::clone(&self.ledger)
    }

    pub(crate) fn queue_stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.queue_stats)
    }

    pub(crate) fn record_produced(&self) {
        self.counters.produced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self) {
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compared(&self) {
        self.counters.compared.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> SessionStats {
        SessionStats {
            frames_produced: self.counters.produced.load(Ordering::Relaxed),
            frames_discarded: self.counters.discarded.load(Ordering::Relaxed),
            frames_enqueued: self.queue_stats.written(),
            frames_dropped: self.queue_stats.dropped(),
            frames_drained: self.queue_stats.drained(),
            frames_compared: self.counters.compared.load(Ordering::Relaxed),
            buffers_allocated: self.ledger.allocated(),
            buffers_released: self.ledger.released(),
        }
    }
}

/// Starts grab sessions for one analysis configuration.
#[derive(Debug, Clone)]
pub struct Grabber {
    config: Config,
}

impl Grabber {
    pub fn new(config: Config) -> Result<Self, GrabError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> FrameLayout {
        self.config.frame_layout()
    }

    /// Open a muted decode of `source` and look for `reference` in it.
    ///
    /// The analysis loop is spawned onto the current Tokio runtime; without
    /// one this fails with [`GrabError::Runtime`] before the engine starts.
    /// Also fails before any frame is decoded when the reference does not
    /// have the analysis resolution.
    #[instrument(skip(self, engine, reference, clock), fields(source = %source))]
    pub fn start<E: PlaybackEngine>(
        &self,
        engine: E,
        source: &MediaSource,
        reference: ReferenceImage,
        clock: Arc<dyn PlaybackClock>,
    ) -> Result<GrabSession, GrabError> {
        self.start_with_regions(engine, source, reference, clock, Box::new(AnonymousRegions))
    }

    /// [`start`](Self::start) with frame buffers mapped from `regions`.
    pub(crate) fn start_with_regions<E: PlaybackEngine>(
        &self,
        mut engine: E,
        source: &MediaSource,
        reference: ReferenceImage,
        clock: Arc<dyn PlaybackClock>,
        regions: Box<dyn RegionSource>,
    ) -> Result<GrabSession, GrabError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let layout = self.layout();
        if reference.dimensions() != (layout.width, layout.height) {
            return Err(GrabError::DimensionMismatch {
                expected_width: layout.width,
                expected_height: layout.height,
                actual_width: reference.width(),
                actual_height: reference.height(),
            });
        }

        let pipeline = &self.config.pipeline;
        let shared = Arc::new(SessionShared::new());
        let (enqueuer, dequeuer) = handoff_queue(pipeline.queue_capacity, shared.queue_stats());
        let sink = FrameSink::new(
            FrameAllocator::with_source(layout, shared.ledger(), regions),
            Decimator::new(pipeline.decimation),
            enqueuer,
            Arc::clone(&shared),
            pipeline.max_allocation_failures,
        );

        shared.begin();
        if let Err(err) = engine.start(source, sink, EngineSignal::new(Arc::clone(&shared))) {
            warn!("analysis decode failed to start: {}", err);
            shared.fail(SessionError::DecodeEngine(err.to_string()));
            engine.stop();
            return Err(err.into());
        }

        info!(
            width = layout.width,
            height = layout.height,
            stride = layout.stride,
            decimation = pipeline.decimation,
            "grab session capturing"
        );

        let (events_tx, events_rx) = flume::bounded(1);
        let analysis = AnalysisLoop::new(
            dequeuer,
            self.config.comparer(),
            reference,
            MatchDetector::new(self.config.matching.match_threshold),
            clock,
            Box::new(engine),
            Arc::clone(&shared),
            events_tx,
            self.config.poll_interval(),
        );
        let task = runtime.spawn(analysis.run());

        Ok(GrabSession {
            shared,
            events: events_rx,
            task: Some(task),
            outcome: None,
        })
    }
}

/// Handle to a running grab session. Dropping it stops the session.
pub struct GrabSession {
    shared: Arc<SessionShared>,
    events: flume::Receiver<MatchFound>,
    task: Option<JoinHandle<SessionOutcome>>,
    outcome: Option<SessionOutcome>,
}

impl GrabSession {
    /// Ask the session to stop. Safe to call repeatedly and in any state.
    pub fn stop(&self) {
        if self.shared.request_cancel() {
            info!(state = ?self.shared.state(), "stop requested");
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }

    /// Resolves with the match, or `None` once the session ended without one.
    pub async fn match_found(&self) -> Option<MatchFound> {
        self.events.recv_async().await.ok()
    }

    /// Wait for the analysis loop to finish and release everything.
    ///
    /// Later calls return the same outcome.
    pub async fn wait(&mut self) -> Result<SessionOutcome, GrabError> {
        if let Some(task) = self.task.take() {
            self.outcome = Some(task.await?);
        }
        Ok(self.outcome.clone().unwrap_or(SessionOutcome::Cancelled))
    }
}

impl Drop for GrabSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.shared.request_cancel();
        }
    }
}

impl fmt::Debug for GrabSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrabSession")
            .field("state", &self.shared.state())
            .field("stats", &self.shared.stats())
            .finish()
    }
}
