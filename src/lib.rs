pub mod capture;
pub mod compare;
pub mod error;
pub mod pipeline;
pub mod profile;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use capture::frame::{FrameLayout, PixelFormat};
use serde::{Deserialize, Serialize};

pub use capture::{EngineSignal, FrameSink, MediaSource, PlaybackClock, PlaybackEngine};
pub use compare::{DifferenceReport, ImageComparer, ReferenceImage};
pub use error::{CompareError, GrabError, SessionError};
pub use pipeline::{GrabSession, Grabber, MatchFound, SessionOutcome, SessionState, SessionStats};
pub use profile::{MarkerKind, SkipProfile};

/// Prefix for environment overrides, e.g. `AUTOSKIP__PIPELINE__DECIMATION=3`.
pub const ENV_PREFIX: &str = "AUTOSKIP";

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub analysis: AnalysisConfig,
    pub matching: MatchingConfig,
    pub pipeline: PipelineConfig,
    #[cfg(feature = "gstreamer-pipeline")]
    pub gstreamer: GStreamerConfig,
}

/// Resolution and memory layout of the frames handed over by the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Row stride and line count are rounded up to this many bytes/lines.
    pub alignment: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    Exact,
    Tolerant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub mode: ComparisonMode,
    /// A frame matches when its normalized difference is strictly below this.
    pub match_threshold: f64,
    /// Per-pixel Manhattan distance ignored in tolerant mode.
    pub per_pixel_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Forward one frame out of every `decimation` produced.
    pub decimation: u32,
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
    /// Consecutive allocation failures tolerated before the session fails.
    pub max_allocation_failures: u32,
}

#[cfg(feature = "gstreamer-pipeline")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GStreamerConfig {
    /// Pace the analysis decode against the pipeline clock.
    pub sync: bool,
    pub max_buffers: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig {
                width: 720,
                height: 480,
                format: PixelFormat::Rgba32,
                alignment: 32,
            },
            matching: MatchingConfig {
                mode: ComparisonMode::Exact,
                match_threshold: 0.05,
                per_pixel_threshold: 0,
            },
            pipeline: PipelineConfig {
                decimation: 2,
                queue_capacity: 16,
                poll_interval_ms: 1,
                max_allocation_failures: 3,
            },
            #[cfg(feature = "gstreamer-pipeline")]
            gstreamer: GStreamerConfig {
                sync: true,
                max_buffers: 2,
            },
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `AUTOSKIP__*` environment
    /// variables, then validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self, GrabError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GrabError> {
        let analysis = &self.analysis;
        if analysis.width == 0 || analysis.height == 0 {
            return Err(GrabError::invalid(
                "analysis.width/height",
                "resolution must be non-zero",
            ));
        }
        if !analysis.alignment.is_power_of_two() {
            return Err(GrabError::invalid(
                "analysis.alignment",
                format!("{} is not a power of two", analysis.alignment),
            ));
        }

        if FrameLayout::checked_aligned(analysis.width, analysis.height, analysis.alignment).is_none() {
            return Err(GrabError::invalid(
                "analysis.width/height",
                format!(
                    "{}x{} frames aligned to {} bytes overflow the buffer size",
                    analysis.width, analysis.height, analysis.alignment
                ),
            ));
        }

        let threshold = self.matching.match_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(GrabError::invalid(
                "matching.match_threshold",
                format!("{threshold} is outside [0, 1]"),
            ));
        }
        if self.matching.mode == ComparisonMode::Exact && self.matching.per_pixel_threshold != 0 {
            return Err(GrabError::invalid(
                "matching.per_pixel_threshold",
                "exact comparison does not take a per-pixel threshold",
            ));
        }

        let pipeline = &self.pipeline;
        if pipeline.decimation == 0 {
            return Err(GrabError::invalid("pipeline.decimation", "must be at least 1"));
        }
        if pipeline.queue_capacity == 0 {
            return Err(GrabError::invalid("pipeline.queue_capacity", "must be at least 1"));
        }
        if pipeline.poll_interval_ms == 0 {
            return Err(GrabError::invalid("pipeline.poll_interval_ms", "must be at least 1"));
        }
        if pipeline.max_allocation_failures == 0 {
            return Err(GrabError::invalid(
                "pipeline.max_allocation_failures",
                "must be at least 1",
            ));
        }

        Ok(())
    }

    /// Frame layout the decoder writes into.
    pub fn frame_layout(&self) -> FrameLayout {
        FrameLayout::aligned(
            self.analysis.width,
            self.analysis.height,
            self.analysis.alignment,
        )
    }

    pub fn comparer(&self) -> ImageComparer {
        match self.matching.mode {
            ComparisonMode::Exact => ImageComparer::Exact,
            ComparisonMode::Tolerant => ImageComparer::tolerant(
                self.matching.match_threshold,
                self.matching.per_pixel_threshold,
            ),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.pipeline.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_layout_matches_analysis_resolution() {
        let layout = Config::default().frame_layout();
        assert_eq!(layout.width, 720);
        assert_eq!(layout.height, 480);
        assert_eq!(layout.stride, 2880);
        assert_eq!(layout.lines, 480);
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_invalid_thresholds() {
        let mut config = Config::default();
        config.matching.match_threshold = -0.1;
        assert!(matches!(
            config.validate(),
            Err(GrabError::InvalidOption { option: "matching.match_threshold", .. })
        ));

        config.matching.match_threshold = f64::NAN;
        assert!(config.validate().is_err());

        config.matching.match_threshold = 0.05;
        config.pipeline.decimation = 0;
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn rejects_resolution_that_overflows_the_layout() {
        let mut config = Config::default();
        config.analysis.width = 1 << 30;
        config.analysis.height = 1;
        assert!(matches!(
            config.validate(),
            Err(GrabError::InvalidOption { option: "analysis.width/height", .. })
        ));
        assert!(Grabber::new(config).unwrap_err().is_configuration());

        let mut config = Config::default();
        config.analysis.height = u32::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_odd_alignment() {
        let mut config = Config::default();
        config.analysis.alignment = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tolerant_mode_builds_tolerant_comparer() {
        let mut config = Config::default();
        config.matching.mode = ComparisonMode::Tolerant;
        config.matching.per_pixel_threshold = 12;
        assert_eq!(config.comparer(), ImageComparer::tolerant(0.05, 12));
    }

    #[test]
    fn loads_overrides_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[pipeline]\ndecimation = 3\n\n[matching]\nmode = \"tolerant\"\nper_pixel_threshold = 8"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.pipeline.decimation, 3);
        assert_eq!(config.matching.mode, ComparisonMode::Tolerant);
        assert_eq!(config.matching.per_pixel_threshold, 8);
        assert_eq!(config.analysis.width, 720);
    }

    #[test]
    fn load_rejects_invalid_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pipeline]\nqueue_capacity = 0").unwrap();

        assert!(matches!(
            Config::load(Some(file.path())),
            Err(GrabError::InvalidOption { option: "pipeline.queue_capacity", .. })
        ));
    }
}
