//! # segforged
//!
//! Hardware-accelerated segment transcoding for media streaming.
//!
//! The crate cuts an exact, time-bounded segment out of a source file,
//! re-encodes its video on Intel Quick Sync (QSV) and passes audio through
//! untouched, muxing the result into either a streamable MPEG-TS container
//! or a DASH-style fragmented-MP4 fragment:
//!
//! - [`transport_stream_segment`] writes MPEG-TS incrementally to any avio
//!   target (a file path, `pipe:1`, a protocol URL).
//! - [`fmp4_segment`] / [`fmp4_segment_at`] return an fMP4 init segment or
//!   media fragment as an in-memory buffer.
//!
//! Segments are half-open windows `[start, start + duration)`: a frame at
//! exactly the end timestamp belongs to the next segment. Every keyframe the
//! encoder emits is an IDR so segment boundaries stay independently
//! decodable.
//!
//! Requires FFmpeg dev libraries at build time and an Intel GPU with Quick
//! Sync at run time.
//!
//! ## Example
//!
//! ```no_run
//! use segforged::Fragment;
//!
//! // 1.m4s covers [0s, 4s), 2.m4s covers [4s, 8s), ...
//! let init = segforged::fmp4_segment("/media/input.mp4", "h264_qsv", Fragment::Init)?;
//! let first = segforged::fmp4_segment(
//!     "/media/input.mp4",
//!     "h264_qsv",
//!     Fragment::Media { start: 0.0, duration: 4.0 },
//! )?;
//! # Ok::<(), segforged::Error>(())
//! ```

use std::path::Path;
use std::sync::Once;

use ffmpeg_the_third as ffmpeg;

mod codec;
mod error;
mod hw;
mod pipeline;
mod queue;
mod session;
mod sink;
mod window;

pub use error::{Error, Result};
pub use sink::Fragment;

use ffmpeg::Rescale;
use session::Session;
use sink::{Container, SinkTarget};
use window::{SegmentWindow, GLOBAL_TIME_BASE};

static FFMPEG_INIT: Once = Once::new();

pub(crate) fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        ffmpeg::init().expect("Failed to initialize FFmpeg");
    });
}

/// Transcode the segment `[start, start + duration)` (seconds) into an
/// MPEG-TS stream written to `target`.
///
/// `target` is any URL avio can open for writing; the streaming use case is
/// `"pipe:1"`. Video is re-encoded with the QSV variant of `encoder` (plain
/// family names like `"h264"` resolve to `"h264_qsv"`); audio passes through.
pub fn transport_stream_segment<P: AsRef<Path>>(
    input: P,
    encoder: &str,
    start: f64,
    duration: f64,
    target: &str,
) -> Result<()> {
    let session = Session::open(
        input.as_ref(),
        encoder,
        Container::MpegTs,
        SinkTarget::url(target)?,
        None,
    )?;
    pipeline::run(session, SegmentWindow::from_seconds(start, duration))?;
    Ok(())
}

/// Produce one DASH fMP4 fragment as an in-memory buffer.
///
/// [`Fragment::Init`] yields the initialization segment (`init.mp4`);
/// [`Fragment::Media`] yields one media fragment (`<n>.m4s`). Encoder
/// resolution as in [`transport_stream_segment`].
pub fn fmp4_segment<P: AsRef<Path>>(
    input: P,
    encoder: &str,
    fragment: Fragment,
) -> Result<Vec<u8>> {
    let session = Session::open(
        input.as_ref(),
        encoder,
        Container::Mp4,
        SinkTarget::Memory,
        Some(fragment.movflags()),
    )?;
    let buffer = pipeline::run(session, fragment.window())?;
    Ok(buffer.unwrap_or_default())
}

/// Produce the fMP4 fragment for a playlist index: index 0 is the init
/// segment, index `n` covers `[(n - 1) * segment_duration, n * segment_duration)`.
pub fn fmp4_segment_at<P: AsRef<Path>>(
    input: P,
    encoder: &str,
    index: usize,
    segment_duration: f64,
) -> Result<Vec<u8>> {
    let fragment = fragment_at(index, segment_duration);
    fmp4_segment(input, encoder, fragment)
}

/// Duration of the input's video stream in seconds.
///
/// Useful for sizing a segment playlist before requesting fragments.
pub fn media_duration<P: AsRef<Path>>(input: P) -> Result<f64> {
    init_ffmpeg();

    let path = input.as_ref();
    let input_ctx = ffmpeg::format::input(path).map_err(|e| Error::input_open(path, e))?;
    let stream = input_ctx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or(Error::StreamNotFound { medium: "video" })?;

    let micros = duration_micros(stream.duration(), stream.time_base(), input_ctx.duration())?;
    Ok(micros as f64 / ffmpeg::ffi::AV_TIME_BASE as f64)
}

/// Pick the stream duration, falling back to the container-level duration
/// (already in microseconds) when the stream carries none. Common for
/// MPEG-TS, where per-stream durations are often unset.
fn duration_micros(
    stream_duration: i64,
    stream_time_base: ffmpeg::Rational,
    container_duration: i64,
) -> Result<i64> {
    if stream_duration != ffmpeg::ffi::AV_NOPTS_VALUE {
        Ok(stream_duration.rescale(stream_time_base, GLOBAL_TIME_BASE))
    } else if container_duration != ffmpeg::ffi::AV_NOPTS_VALUE {
        Ok(container_duration)
    } else {
        Err(Error::stream_probe("input reports no duration"))
    }
}

fn fragment_at(index: usize, segment_duration: f64) -> Fragment {
    if index == 0 {
        Fragment::Init
    } else {
        Fragment::Media {
            start: (index - 1) as f64 * segment_duration,
            duration: segment_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_at_index_zero_is_init() {
        assert_eq!(fragment_at(0, 4.0), Fragment::Init);
    }

    #[test]
    fn test_duration_prefers_stream_over_container() {
        // 90 kHz stream clock: 360_000 ticks = 4 seconds
        let micros =
            duration_micros(360_000, ffmpeg::Rational(1, 90_000), 9_000_000).unwrap();
        assert_eq!(micros, 4_000_000);
    }

    #[test]
    fn test_duration_falls_back_to_container() {
        let nopts = ffmpeg::ffi::AV_NOPTS_VALUE;
        let micros = duration_micros(nopts, ffmpeg::Rational(1, 90_000), 9_000_000).unwrap();
        assert_eq!(micros, 9_000_000);
    }

    #[test]
    fn test_duration_missing_everywhere_is_an_error() {
        let nopts = ffmpeg::ffi::AV_NOPTS_VALUE;
        assert!(matches!(
            duration_micros(nopts, ffmpeg::Rational(1, 90_000), nopts),
            Err(Error::StreamProbe { .. })
        ));
    }

    #[test]
    fn test_fragment_at_maps_playlist_indices() {
        assert_eq!(
            fragment_at(1, 4.0),
            Fragment::Media {
                start: 0.0,
                duration: 4.0
            }
        );
        assert_eq!(
            fragment_at(3, 4.0),
            Fragment::Media {
                start: 8.0,
                duration: 4.0
            }
        );
    }
}
