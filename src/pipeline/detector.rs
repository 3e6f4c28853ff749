use crate::capture::engine::PlaybackClock;
use crate::compare::DifferenceReport;

/// Raised once per session when the reference frame is seen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchFound {
    /// Primary player position when the match was detected.
    pub timestamp_ms: i64,
    pub frame_sequence: u64,
    pub difference: f64,
}

/// Applies the match threshold to comparison reports.
#[derive(Debug, Clone)]
pub struct MatchDetector {
    threshold: f64,
    found: Option<MatchFound>,
}

impl MatchDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            found: None,
        }
    }

    /// Returns the match the first time a report falls strictly below the
    /// threshold, `None` for every other report.
    pub fn observe(
        &mut self,
        report: &DifferenceReport,
        frame_sequence: u64,
        clock: &dyn PlaybackClock,
    ) -> Option<MatchFound> {
        if self.found.is_some() || report.normalized >= self.threshold {
            return None;
        }

        let found = MatchFound {
            timestamp_ms: clock.time_ms(),
            frame_sequence,
            difference: report.normalized,
        };
        self.found = Some(found);
        Some(found)
    }

    pub fn found(&self) -> Option<MatchFound> {
        self.found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(normalized: f64) -> DifferenceReport {
        DifferenceReport {
            width: 1,
            height: 1,
            total_difference: 0,
            differing_pixels: 0,
            normalized,
        }
    }

    #[test]
    fn threshold_is_strict() {
        let clock = || 1_000i64;
        let mut detector = MatchDetector::new(0.05);
        assert!(detector.observe(&report(0.05), 0, &clock).is_none());
        assert!(detector.observe(&report(0.2), 1, &clock).is_none());

        let found = detector.observe(&report(0.049), 2, &clock).unwrap();
        assert_eq!(found.timestamp_ms, 1_000);
        assert_eq!(found.frame_sequence, 2);
    }

    #[test]
    fn fires_only_once() {
        let clock = || 7i64;
        let mut detector = MatchDetector::new(0.05);
        assert!(detector.observe(&report(0.0), 4, &clock).is_some());
        assert!(detector.observe(&report(0.0), 5, &clock).is_none());
        assert_eq!(detector.found().unwrap().frame_sequence, 4);
    }
}
