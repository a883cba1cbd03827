//! Per-frame performance timing.

use std::time::{Duration, Instant};

/// A named, timed section of a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PerfSpan {
    /// Section name, e.g. `"backend_begin_frame"`.
    pub name: &'static str,
    /// Offset of the section start from the beginning of the frame.
    pub offset: Duration,
    /// Wall-clock time spent in the section.
    pub duration: Duration,
}

/// Accumulates [`PerfSpan`]s for one frame.
///
/// The VM publishes a snapshot to the perf listeners at the start of the
/// next frame and then resets the accumulator.
#[derive(Clone, Debug)]
pub struct PerfStats {
    origin: Instant,
    spans: Vec<PerfSpan>,
}

impl Default for PerfStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfStats {
    /// Creates an empty accumulator anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            spans: Vec::new(),
        }
    }

    /// Marks the start of a section. Pass the result to [`record`](Self::record).
    pub fn start(&self) -> Instant {
        Instant::now()
    }

    /// Records a section that started at `start` and ends now.
    pub fn record(&mut self, name: &'static str, start: Instant) {
        let now = Instant::now();
        self.spans.push(PerfSpan {
            name,
            offset: start.saturating_duration_since(self.origin),
            duration: now.saturating_duration_since(start),
        });
    }

    /// Returns the recorded spans in recording order.
    pub fn spans(&self) -> &[PerfSpan] {
        &self.spans
    }

    /// Returns the summed duration of all spans with the given name.
    pub fn total(&self, name: &str) -> Duration {
        self.spans
            .iter()
            .filter(|s| s.name == name)
            .map(|s| s.duration)
            .sum()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Discards all spans and re-anchors at the current instant.
    pub fn reset(&mut self) {
        self.origin = Instant::now();
        self.spans.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_total() {
        let mut perf = PerfStats::new();
        let start = perf.start();
        perf.record("opcodes", start);
        let start = perf.start();
        perf.record("opcodes", start);
        perf.record("notifications", perf.start());

        assert_eq!(perf.spans().len(), 3);
        assert_eq!(perf.spans()[0].name, "opcodes");
        assert!(perf.total("opcodes") >= Duration::ZERO);
        assert_eq!(perf.total("missing"), Duration::ZERO);
    }

    #[test]
    fn test_reset_clears() {
        let mut perf = PerfStats::new();
        perf.record("x", perf.start());
        perf.reset();
        assert!(perf.is_empty());
    }
}
