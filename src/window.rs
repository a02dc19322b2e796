//! Segment boundary math.
//!
//! All window timestamps live in FFmpeg's global time unit (microseconds,
//! `AV_TIME_BASE` ticks per second). Packet and frame timestamps are rescaled
//! into this unit before they are compared against the window.

use ffmpeg_the_third as ffmpeg;

use ffmpeg::ffi;
use ffmpeg::Rational;

/// FFmpeg's global time base (1 / AV_TIME_BASE seconds per tick).
pub(crate) const GLOBAL_TIME_BASE: Rational = Rational(1, ffi::AV_TIME_BASE as i32);

/// Where a timestamp falls relative to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Before the window start.
    Before,
    /// Inside the half-open window.
    Inside,
    /// At or past the window end.
    After,
}

/// Half-open timestamp window `[start_ts, end_ts)` in microseconds.
///
/// An init segment uses an empty window (`start_ts == end_ts`): every frame
/// classifies as `After`, so the pipeline produces the container header and
/// nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SegmentWindow {
    pub(crate) start_ts: i64,
    pub(crate) end_ts: i64,
}

impl SegmentWindow {
    /// Build a window from a start offset and duration in seconds.
    pub(crate) fn from_seconds(start: f64, duration: f64) -> Self {
        let scale = ffi::AV_TIME_BASE as f64;
        Self {
            start_ts: (start * scale).round() as i64,
            end_ts: ((start + duration) * scale).round() as i64,
        }
    }

    /// Classify a microsecond timestamp against the window.
    pub(crate) fn classify(&self, ts: i64) -> Disposition {
        if ts < self.start_ts {
            Disposition::Before
        } else if ts < self.end_ts {
            Disposition::Inside
        } else {
            Disposition::After
        }
    }

    /// Shift both boundaries by a stream start offset (microseconds).
    ///
    /// The seek target must stay relative to the unshifted start, so the
    /// caller rebases `end_ts` before seeking and `start_ts` after.
    pub(crate) fn shift_end(&mut self, offset: i64) {
        self.end_ts += offset;
    }

    pub(crate) fn shift_start(&mut self, offset: i64) {
        self.start_ts += offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_from_seconds_rounds() {
        let w = SegmentWindow::from_seconds(10.0, 4.0);
        assert_eq!(w.start_ts, 10_000_000);
        assert_eq!(w.end_ts, 14_000_000);

        // 0.1 is not exactly representable; round() must keep us on the tick
        let w = SegmentWindow::from_seconds(0.1, 0.1);
        assert_eq!(w.start_ts, 100_000);
        assert_eq!(w.end_ts, 200_000);
    }

    #[test]
    fn test_window_is_half_open() {
        let w = SegmentWindow::from_seconds(1.0, 1.0);
        assert_eq!(w.classify(999_999), Disposition::Before);
        assert_eq!(w.classify(1_000_000), Disposition::Inside);
        assert_eq!(w.classify(1_999_999), Disposition::Inside);
        assert_eq!(w.classify(2_000_000), Disposition::After);
    }

    #[test]
    fn test_empty_window_classifies_everything_after() {
        let w = SegmentWindow::from_seconds(0.0, 0.0);
        assert_eq!(w.start_ts, w.end_ts);
        assert_eq!(w.classify(0), Disposition::After);
        assert_eq!(w.classify(1), Disposition::After);
        assert_eq!(w.classify(-1), Disposition::Before);
    }

    #[test]
    fn test_shift_rebases_boundaries() {
        let mut w = SegmentWindow::from_seconds(2.0, 2.0);
        w.shift_end(500_000);
        assert_eq!(w.end_ts, 4_500_000);
        assert_eq!(w.start_ts, 2_000_000);
        w.shift_start(500_000);
        assert_eq!(w.start_ts, 2_500_000);
    }
}
