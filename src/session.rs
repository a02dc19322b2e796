//! Per-call media session: demuxer, codecs, sink, and audio buffer.

use std::path::Path;

use ffmpeg_the_third as ffmpeg;

use ffmpeg::ffi;
use ffmpeg::media;
use ffmpeg::{Rational, Rescale};
use tracing::{debug, warn};

use crate::codec;
use crate::error::{Error, Result};
use crate::hw::{self, HwDevice};
use crate::queue::PacketQueue;
use crate::sink::{Container, Muxer, SinkTarget};
use crate::window::{SegmentWindow, GLOBAL_TIME_BASE};

/// Lazily bound video encoder.
///
/// A QSV encoder cannot open until it can reference the decoder's hardware
/// frames context, which only exists after the first frame decodes. The
/// states make "configured but not yet usable" explicit instead of leaving a
/// half-initialized handle around.
pub(crate) enum EncoderState {
    /// Encoder codec resolved, waiting for the first decoded frame.
    Unbound { codec: ffmpeg::Codec },
    /// Encoder opened; header written, audio buffer drained.
    Bound { encoder: ffmpeg::encoder::Video },
}

impl EncoderState {
    pub(crate) fn is_bound(&self) -> bool {
        matches!(self, EncoderState::Bound { .. })
    }
}

/// Everything one segment transcode owns.
///
/// All handles release on drop, so every exit path tears the session down
/// completely: input context, muxer (including an unfinished dynamic
/// buffer), codec contexts with their hardware references, queued packets.
pub(crate) struct Session {
    pub(crate) input: ffmpeg::format::context::Input,
    pub(crate) muxer: Muxer,
    pub(crate) decoder: ffmpeg::decoder::Video,
    pub(crate) encoder: EncoderState,
    pub(crate) audio_queue: PacketQueue,
    pub(crate) video_stream_index: usize,
    pub(crate) audio_stream_index: usize,
    pub(crate) video_time_base: Rational,
    pub(crate) audio_time_base: Rational,
    pub(crate) framerate: Rational,
    video_start_time: i64,
    _hw: HwDevice,
}

impl Session {
    /// Open the input, set up the hardware decoder, resolve the encoder, and
    /// lay out the output container.
    pub(crate) fn open(
        path: &Path,
        encoder_name: &str,
        container: Container,
        target: SinkTarget,
        movflags: Option<&'static std::ffi::CStr>,
    ) -> Result<Self> {
        crate::init_ffmpeg();

        let input = ffmpeg::format::input(path).map_err(|e| Error::input_open(path, e))?;

        let (video_stream_index, video_time_base, video_start_time, video_codec_id, framerate) = {
            let stream = input
                .streams()
                .best(media::Type::Video)
                .ok_or(Error::StreamNotFound { medium: "video" })?;
            (
                stream.index(),
                stream.time_base(),
                stream.start_time(),
                stream.parameters().id(),
                stream.avg_frame_rate(),
            )
        };

        let (audio_stream_index, audio_time_base) = {
            let stream = input
                .streams()
                .best(media::Type::Audio)
                .ok_or(Error::StreamNotFound { medium: "audio" })?;
            (stream.index(), stream.time_base())
        };

        debug!(
            video = video_stream_index,
            audio = audio_stream_index,
            codec = ?video_codec_id,
            "input streams selected"
        );

        let hw_device = HwDevice::new()?;

        let (decoder_codec, decoder_name) = codec::find_hardware_decoder(video_codec_id)?;
        let decoder = {
            let stream = input
                .stream(video_stream_index)
                .ok_or(Error::StreamNotFound { medium: "video" })?;

            let mut dec_ctx = ffmpeg::codec::context::Context::new_with_codec(decoder_codec);
            unsafe {
                let raw = dec_ctx.as_mut_ptr();
                let ret = ffi::avcodec_parameters_to_context(raw, (*stream.as_ptr()).codecpar);
                if ret < 0 {
                    return Err(Error::stream_probe(ffmpeg::Error::from(ret)));
                }
                (*raw).pkt_timebase = video_time_base.into();
                (*raw).framerate = framerate.into();
                (*raw).hw_device_ctx = hw_device.new_ref()?;
                (*raw).get_format = Some(hw::request_qsv_surface);
            }

            // Open with the codec the context was allocated for. The bare
            // `video()` helper re-finds the default decoder by id, which is
            // the software one and gets rejected by avcodec_open2.
            dec_ctx
                .decoder()
                .open_as(decoder_codec)
                .and_then(|opened| opened.video())
                .map_err(|e| Error::decoder_unavailable(decoder_name, e))?
        };

        let encoder_codec = codec::resolve_hardware_encoder(encoder_name)?;

        let mut muxer = Muxer::new(container, target, movflags)?;
        muxer.add_video_stream(encoder_codec)?;
        {
            let stream = input
                .stream(audio_stream_index)
                .ok_or(Error::StreamNotFound { medium: "audio" })?;
            muxer.add_audio_stream(unsafe { (*stream.as_ptr()).codecpar }, audio_time_base)?;
        }

        Ok(Session {
            input,
            muxer,
            decoder,
            encoder: EncoderState::Unbound {
                codec: encoder_codec,
            },
            audio_queue: PacketQueue::new(),
            video_stream_index,
            audio_stream_index,
            video_time_base,
            audio_time_base,
            framerate,
            video_start_time,
            _hw: hw_device,
        })
    }

    /// Rebase the window by the video stream's start offset and seek to the
    /// last keyframe at or before the window start.
    ///
    /// The window filter discards the decode overshoot, so a failed seek
    /// (unseekable input) only costs extra decoding.
    pub(crate) fn seek_to_window(&mut self, window: &mut SegmentWindow) -> Result<()> {
        let offset = start_offset(self.video_start_time, self.video_time_base);
        window.shift_end(offset);

        let target = window.start_ts.rescale(GLOBAL_TIME_BASE, self.video_time_base);
        let ret = unsafe {
            ffi::avformat_seek_file(
                self.input.as_mut_ptr(),
                self.video_stream_index as libc::c_int,
                i64::MIN,
                target,
                target,
                ffi::AVSEEK_FLAG_BACKWARD as libc::c_int,
            )
        };
        if ret < 0 {
            warn!(
                error = %ffmpeg::Error::from(ret),
                "keyframe seek failed, decoding from current position"
            );
        }
        unsafe {
            ffi::avcodec_flush_buffers(self.decoder.as_mut_ptr());
        }

        window.shift_start(offset);
        debug!(
            start_ts = window.start_ts,
            end_ts = window.end_ts,
            "segment window resolved"
        );
        Ok(())
    }
}

/// Stream start offset in microseconds; an unset start time counts as zero.
fn start_offset(start_time: i64, time_base: Rational) -> i64 {
    if start_time == ffi::AV_NOPTS_VALUE {
        0
    } else {
        start_time.rescale(time_base, GLOBAL_TIME_BASE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_offset_rescales_to_micros() {
        // 90 kHz MPEG-TS clock: 90_000 ticks = 1 second
        assert_eq!(start_offset(90_000, Rational(1, 90_000)), 1_000_000);
        assert_eq!(start_offset(0, Rational(1, 90_000)), 0);
    }

    #[test]
    fn test_start_offset_treats_nopts_as_zero() {
        assert_eq!(start_offset(ffi::AV_NOPTS_VALUE, Rational(1, 90_000)), 0);
    }
}
