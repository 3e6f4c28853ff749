//! Error types shared across the grab pipeline

use thiserror::Error;

use crate::capture::engine::EngineError;

/// Errors surfaced to the caller when configuring or running a session.
#[derive(Debug, Error)]
pub enum GrabError {
    #[error(
        "reference image is {actual_width}x{actual_height}, analysis resolution is {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("invalid option `{option}`: {reason}")]
    InvalidOption { option: &'static str, reason: String },
    #[error("failed to decode reference image: {0}")]
    ReferenceDecode(#[from] image::ImageError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("session failed: {0}")]
    Session(#[from] SessionError),
    #[error("analysis task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("grab sessions need a Tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

impl GrabError {
    pub(crate) fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option,
            reason: reason.into(),
        }
    }

    /// True for errors detected before a session starts capturing.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::InvalidOption { .. } | Self::Config(_)
        )
    }
}

/// Terminal failure reason recorded on a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("frame buffer allocation failed {attempts} times in a row: {reason}")]
    Allocation { attempts: u32, reason: String },
    #[error("decode engine failed: {0}")]
    DecodeEngine(String),
    #[error("frame comparison failed: {0}")]
    Comparison(#[from] CompareError),
}

/// Comparator precondition violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompareError {
    #[error("frame is {actual_width}x{actual_height}, reference is {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("frame count does not match: expected {expected}, got {actual}")]
    FrameCountMismatch { expected: usize, actual: usize },
}
