//! Playback engine seam: the decoder that feeds frames into a session

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::capture::sink::FrameSink;
use crate::error::SessionError;
use crate::pipeline::session::SessionShared;
use crate::utils::looks_like_uri;

/// Media the analysis decode opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Uri(String),
    Path(PathBuf),
}

impl MediaSource {
    /// Treat `scheme://...` as a URI and everything else as a path.
    pub fn parse(source: &str) -> Self {
        if looks_like_uri(source) {
            MediaSource::Uri(source.to_owned())
        } else {
            MediaSource::Path(PathBuf::from(source))
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::Uri(uri) => f.write_str(uri),
            MediaSource::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("media source unavailable: {0}")]
    Source(String),
    #[error("playback engine error: {0}")]
    Backend(String),
}

/// A decoder that runs a muted, parallel decode of the media and writes each
/// picture into the [`FrameSink`] through `lock`/`display`.
///
/// Callbacks run on the engine's own thread. After `stop` returns the engine
/// must not touch the sink again.
pub trait PlaybackEngine: Send + 'static {
    fn start(
        &mut self,
        source: &MediaSource,
        sink: FrameSink,
        signal: EngineSignal,
    ) -> Result<(), EngineError>;

    fn stop(&mut self);
}

/// Current position of the primary (visible) player, in milliseconds.
pub trait PlaybackClock: Send + Sync {
    fn time_ms(&self) -> i64;
}

impl<F> PlaybackClock for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn time_ms(&self) -> i64 {
        self()
    }
}

/// Lets the engine report end of stream or failure to its session.
#[derive(Clone)]
pub struct EngineSignal {
    shared: Arc<SessionShared>,
}

impl EngineSignal {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    /// The decode ran out of media. Frames already queued are still compared.
    pub fn end_of_stream(&self) {
        if self.shared.mark_engine_ended() {
            info!("analysis decode reached end of stream");
        }
    }

    /// The decode failed; the session moves to `Error`.
    pub fn failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "analysis decode failed");
        self.shared.fail(SessionError::DecodeEngine(reason));
    }

    /// False once the session no longer wants frames.
    pub fn is_active(&self) -> bool {
        self.shared.is_capturing()
    }
}

impl fmt::Debug for EngineSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSignal")
            .field("state", &self.shared.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uris_and_paths() {
        assert_eq!(
            MediaSource::parse("https://host/video.mp4"),
            MediaSource::Uri("https://host/video.mp4".into())
        );
        assert_eq!(
            MediaSource::parse("/media/episode01.mkv"),
            MediaSource::Path(PathBuf::from("/media/episode01.mkv"))
        );
        assert_eq!(
            MediaSource::parse("/media/episode01.mkv").to_string(),
            "/media/episode01.mkv"
        );
    }

    #[test]
    fn closures_are_clocks() {
        let clock = || 42_000i64;
        assert_eq!(clock.time_ms(), 42_000);
    }
}
