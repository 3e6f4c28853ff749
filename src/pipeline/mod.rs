pub mod analysis;
pub mod decimator;
pub mod detector;
pub mod ringbuf;
pub mod session;

pub use analysis::{AnalysisLoop, Step};
pub use decimator::Decimator;
pub use detector::{MatchDetector, MatchFound};
pub use ringbuf::{handoff_queue, FrameDequeuer, FrameEnqueuer, QueueStats};
pub use session::{GrabSession, Grabber, SessionOutcome, SessionState, SessionStats};
