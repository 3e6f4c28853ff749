use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::compare::ReferenceImage;
use crate::error::GrabError;
use crate::pipeline::MatchFound;

/// Which marker of an episode a reference frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Intro,
    Outro,
}

/// Per-show skip settings: how long the intro runs after its marker frame
/// and the encoded marker frames themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipProfile {
    pub name: String,
    pub intro_min: u32,
    pub intro_sec: u32,
    /// Minutes before the end of the episode where the outro starts.
    pub outro_min: u32,
    pub intro_reference: Bytes,
    #[serde(default)]
    pub outro_reference: Option<Bytes>,
}

impl SkipProfile {
    pub fn new(name: impl Into<String>, intro_reference: Bytes) -> Self {
        Self {
            name: name.into(),
            intro_min: 0,
            intro_sec: 0,
            outro_min: 0,
            intro_reference,
            outro_reference: None,
        }
    }

    pub fn intro_length(&self) -> Duration {
        Duration::from_secs(u64::from(self.intro_min) * 60 + u64::from(self.intro_sec))
    }

    pub fn outro_offset(&self) -> Duration {
        Duration::from_secs(u64::from(self.outro_min) * 60)
    }

    /// Position in milliseconds the primary player should seek to once the
    /// intro marker has been found.
    pub fn skip_target(&self, found: &MatchFound) -> i64 {
        let length = i64::try_from(self.intro_length().as_millis()).unwrap_or(i64::MAX);
        found.timestamp_ms.saturating_add(length)
    }

    pub fn reference(&self, kind: MarkerKind) -> Option<&Bytes> {
        match kind {
            MarkerKind::Intro => Some(&self.intro_reference),
            MarkerKind::Outro => self.outro_reference.as_ref(),
        }
    }

    /// Decode a marker frame and fit it to the analysis resolution.
    pub fn reference_image(
        &self,
        kind: MarkerKind,
        width: u32,
        height: u32,
    ) -> Result<Option<ReferenceImage>, GrabError> {
        self.reference(kind)
            .map(|encoded| ReferenceImage::decode_fitted(encoded, width, height))
            .transpose()
    }
}
