//! The segment transcode pipeline.
//!
//! One pass over the input: video packets decode on the QSV device, frames
//! inside the window re-encode, audio packets pass through (buffered until
//! the encoder binds and the header is out). The loop ends when both streams
//! cross the window end or the input runs dry, then the codecs flush and the
//! trailer closes the container.

use ffmpeg_the_third as ffmpeg;

use ffmpeg::ffi;
use ffmpeg::{frame, Packet, Rational, Rescale};
use libc::EAGAIN;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::queue::PacketQueue;
use crate::session::{EncoderState, Session};
use crate::sink::{Muxer, OUT_AUDIO_STREAM_INDEX, OUT_VIDEO_STREAM_INDEX};
use crate::window::{Disposition, SegmentWindow, GLOBAL_TIME_BASE};

/// Routing decision for one audio packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AudioRoute {
    /// At or past the window end: the audio stream is done.
    End,
    /// Before the window start: drop.
    Skip,
    /// In window but no container header yet: hold in the queue.
    Buffer,
    /// In window, header written: mux directly.
    Write,
}

/// Decide what to do with an audio packet at `ts` (microseconds).
pub(crate) fn route_audio(ts: i64, window: &SegmentWindow, encoder_bound: bool) -> AudioRoute {
    match window.classify(ts) {
        Disposition::After => AudioRoute::End,
        Disposition::Before => AudioRoute::Skip,
        Disposition::Inside if !encoder_bound => AudioRoute::Buffer,
        Disposition::Inside => AudioRoute::Write,
    }
}

/// Routing decision for one compressed video packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VideoRoute {
    /// Keyframe at or past the window end with the header already out: the
    /// video stream is done without decoding another GOP.
    End,
    /// Everything else still has to decode. Packets before the bind must
    /// reach the decoder even past the end so the header (and an init
    /// segment) can exist at all; non-key packets past the end keep the
    /// decoder draining to its flush point.
    Decode,
}

/// Decide what to do with a video packet at `ts` (microseconds).
pub(crate) fn route_video(
    ts: i64,
    is_key: bool,
    window: &SegmentWindow,
    encoder_bound: bool,
) -> VideoRoute {
    if encoder_bound && is_key && window.classify(ts) == Disposition::After {
        VideoRoute::End
    } else {
        VideoRoute::Decode
    }
}

/// Drive one segment through the session.
///
/// Returns the accumulated output bytes for a memory sink, `None` for a URL
/// sink.
pub(crate) fn run(mut session: Session, mut window: SegmentWindow) -> Result<Option<Vec<u8>>> {
    session.seek_to_window(&mut window)?;

    let Session {
        input,
        muxer,
        decoder,
        encoder,
        audio_queue,
        video_stream_index,
        audio_stream_index,
        video_time_base,
        audio_time_base,
        framerate,
        ..
    } = &mut session;

    let mut video_ended = false;
    let mut audio_ended = false;

    for item in input.packets() {
        if video_ended && audio_ended {
            break;
        }

        let (stream, mut packet) = match item {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "stopping after demux read error");
                break;
            }
        };

        let Some(raw_ts) = packet.pts().or_else(|| packet.dts()) else {
            trace!(stream = stream.index(), "skipping packet without timestamp");
            continue;
        };
        let ts = raw_ts.rescale(stream.time_base(), GLOBAL_TIME_BASE);

        if stream.index() == *video_stream_index && !video_ended {
            log_packet("in", &packet, stream.time_base());

            if route_video(ts, packet.is_key(), &window, encoder.is_bound()) == VideoRoute::End {
                debug!(ts, "video stream reached segment end");
                video_ended = true;
                continue;
            }

            let past_end = decode_packets(
                decoder,
                encoder,
                muxer,
                audio_queue,
                *video_time_base,
                *audio_time_base,
                *framerate,
                &window,
                Some(&packet),
            )?;
            video_ended = video_ended || past_end;
        } else if stream.index() == *audio_stream_index && !audio_ended {
            match route_audio(ts, &window, encoder.is_bound()) {
                AudioRoute::End => {
                    debug!(ts, "audio stream reached segment end");
                    audio_ended = true;
                }
                AudioRoute::Skip => trace!(ts, "audio packet before segment start"),
                AudioRoute::Buffer => {
                    trace!(ts, queued = audio_queue.len(), "buffering audio packet");
                    audio_queue.push(&packet);
                }
                AudioRoute::Write => {
                    write_audio_packet(muxer, &mut packet, *audio_time_base)?;
                }
            }
        }
    }

    // Flush: drain the decoder, then the encoder. Failures here are fatal;
    // a truncated segment is worse than no segment.
    decode_packets(
        decoder,
        encoder,
        muxer,
        audio_queue,
        *video_time_base,
        *audio_time_base,
        *framerate,
        &window,
        None,
    )?;
    if let EncoderState::Bound { encoder: enc } = encoder {
        encode_write(enc, muxer, None)?;
    }

    muxer.write_trailer()?;
    muxer.finish()
}

/// Submit one packet (or a flush) to the decoder and process every frame it
/// yields. Returns true once a drained frame fell at or past the window end.
#[allow(clippy::too_many_arguments)]
fn decode_packets(
    decoder: &mut ffmpeg::decoder::Video,
    encoder: &mut EncoderState,
    muxer: &mut Muxer,
    audio_queue: &mut PacketQueue,
    video_time_base: Rational,
    audio_time_base: Rational,
    framerate: Rational,
    window: &SegmentWindow,
    packet: Option<&Packet>,
) -> Result<bool> {
    match packet {
        Some(p) => decoder.send_packet(p),
        None => decoder.send_eof(),
    }
    .map_err(|e| Error::DecodeSubmit {
        message: e.to_string(),
    })?;

    let mut past_end = false;
    let mut frame = frame::Video::empty();
    loop {
        match decoder.receive_frame(&mut frame) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno: EAGAIN }) | Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                return Err(Error::Decode {
                    message: e.to_string(),
                })
            }
        }

        // First decoded frame carries the hardware frames context the
        // encoder needs. Bind before any window decision so an empty window
        // still produces a header.
        if !encoder.is_bound() {
            bind_encoder(
                encoder,
                decoder,
                muxer,
                audio_queue,
                video_time_base,
                audio_time_base,
                framerate,
            )?;
        }

        let Some(pts) = frame.pts() else {
            trace!("dropping decoded frame without pts");
            continue;
        };
        let frame_ts = pts.rescale(video_time_base, GLOBAL_TIME_BASE);

        match window.classify(frame_ts) {
            Disposition::Before => trace!(frame_ts, "frame before segment start"),
            Disposition::After => {
                // Keep draining so decoder state stays valid; nothing past
                // the end encodes.
                trace!(frame_ts, "frame past segment end");
                past_end = true;
            }
            Disposition::Inside => {
                if let EncoderState::Bound { encoder: enc } = encoder {
                    match encode_write(enc, muxer, Some(&frame)) {
                        Ok(()) => {}
                        Err(Error::EncodeSubmit { message }) => {
                            warn!(error = %message, frame_ts, "encoder rejected frame");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    Ok(past_end)
}

/// Open the encoder against the decoder's hardware frames context, complete
/// the output video stream, write the header, and drain the audio backlog.
#[allow(clippy::too_many_arguments)]
fn bind_encoder(
    state: &mut EncoderState,
    decoder: &ffmpeg::decoder::Video,
    muxer: &mut Muxer,
    audio_queue: &mut PacketQueue,
    video_time_base: Rational,
    audio_time_base: Rational,
    framerate: Rational,
) -> Result<()> {
    let codec = match state {
        EncoderState::Unbound { codec } => *codec,
        EncoderState::Bound { .. } => return Ok(()),
    };

    debug!(codec = codec.name(), "binding encoder to decoded stream");

    let enc_ctx = ffmpeg::codec::context::Context::new_with_codec(codec);
    let mut video_enc = enc_ctx
        .encoder()
        .video()
        .map_err(|e| Error::encoder_bind(e))?;

    video_enc.set_width(decoder.width());
    video_enc.set_height(decoder.height());
    video_enc.set_format(ffmpeg::format::Pixel::QSV);
    video_enc.set_time_base(video_time_base);
    video_enc.set_frame_rate(Some(framerate));

    unsafe {
        let frames_ctx = (*decoder.as_ptr()).hw_frames_ctx;
        if frames_ctx.is_null() {
            return Err(Error::encoder_bind(
                "decoder produced no hardware frames context",
            ));
        }
        let reference = ffi::av_buffer_ref(frames_ctx);
        if reference.is_null() {
            return Err(Error::encoder_bind(
                "failed to reference decoder hardware frames context",
            ));
        }
        (*video_enc.as_mut_ptr()).hw_frames_ctx = reference;
    }

    let mut opts = ffmpeg::Dictionary::new();
    opts.set("preset", "veryslow");
    // Every keyframe an IDR so segment boundaries land on decodable frames
    opts.set("g", "60");
    opts.set("idr_interval", "0");
    opts.set("forced_idr", "1");

    let opened = video_enc
        .open_as_with(codec, opts)
        .map_err(|e| Error::EncoderOpen {
            message: e.to_string(),
        })?;

    // Stream and packet rescaling use the time base as the open call left
    // it, not the one we requested.
    let enc_time_base = unsafe { Rational::from((*opened.as_ptr()).time_base) };
    muxer.bind_video_stream(unsafe { opened.as_ptr() as *mut ffi::AVCodecContext }, enc_time_base)?;
    muxer.write_header()?;

    debug!(queued = audio_queue.len(), "draining buffered audio");
    while !audio_queue.is_empty() {
        let mut packet = audio_queue.pop()?;
        write_audio_packet(muxer, &mut packet, audio_time_base)?;
    }

    *state = EncoderState::Bound { encoder: opened };
    Ok(())
}

/// Submit one frame (or a flush) to the encoder and mux every packet it
/// yields. Packets come out in the encoder's post-open time base.
fn encode_write(
    encoder: &mut ffmpeg::encoder::Video,
    muxer: &mut Muxer,
    frame: Option<&frame::Video>,
) -> Result<()> {
    let enc_time_base = unsafe { Rational::from((*encoder.as_ptr()).time_base) };
    let submitted = match frame {
        Some(f) => encoder.send_frame(f),
        None => encoder.send_eof(),
    };
    match submitted {
        Ok(()) | Err(ffmpeg::Error::Eof) => {}
        Err(e) => {
            return Err(Error::EncodeSubmit {
                message: e.to_string(),
            })
        }
    }

    let mut packet = Packet::empty();
    loop {
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno: EAGAIN }) | Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                return Err(Error::Encode {
                    message: e.to_string(),
                })
            }
        }

        packet.set_stream(OUT_VIDEO_STREAM_INDEX);
        let out_time_base = muxer.stream_time_base(OUT_VIDEO_STREAM_INDEX);
        packet.rescale_ts(enc_time_base, out_time_base);
        log_packet("out", &packet, out_time_base);
        muxer.write_interleaved(&mut packet)?;
    }

    Ok(())
}

/// Rebase a pass-through audio packet onto the output stream and mux it.
fn write_audio_packet(
    muxer: &mut Muxer,
    packet: &mut Packet,
    audio_time_base: Rational,
) -> Result<()> {
    packet.set_stream(OUT_AUDIO_STREAM_INDEX);
    packet.set_position(-1);
    let out_time_base = muxer.stream_time_base(OUT_AUDIO_STREAM_INDEX);
    packet.rescale_ts(audio_time_base, out_time_base);
    log_packet("out", packet, out_time_base);
    muxer.write_interleaved(packet)
}

fn log_packet(tag: &str, packet: &Packet, time_base: Rational) {
    trace!(
        tag,
        stream = packet.stream(),
        pts = packet.pts().unwrap_or(ffi::AV_NOPTS_VALUE),
        dts = packet.dts().unwrap_or(ffi::AV_NOPTS_VALUE),
        duration = packet.duration(),
        time_base = ?time_base,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> SegmentWindow {
        SegmentWindow::from_seconds(10.0, 4.0)
    }

    #[test]
    fn test_audio_before_window_is_skipped() {
        assert_eq!(route_audio(9_999_999, &window(), false), AudioRoute::Skip);
        assert_eq!(route_audio(9_999_999, &window(), true), AudioRoute::Skip);
    }

    #[test]
    fn test_audio_in_window_buffers_until_bound() {
        assert_eq!(route_audio(10_000_000, &window(), false), AudioRoute::Buffer);
        assert_eq!(route_audio(12_500_000, &window(), true), AudioRoute::Write);
    }

    #[test]
    fn test_audio_at_end_marks_stream_done() {
        // end is exclusive: exactly end_ts is already out
        assert_eq!(route_audio(14_000_000, &window(), true), AudioRoute::End);
        assert_eq!(route_audio(14_000_000, &window(), false), AudioRoute::End);
        assert_eq!(route_audio(13_999_999, &window(), true), AudioRoute::Write);
    }

    #[test]
    fn test_audio_routing_for_empty_window() {
        // Init segments carry no audio at all
        let empty = SegmentWindow::from_seconds(0.0, 0.0);
        assert_eq!(route_audio(0, &empty, false), AudioRoute::End);
        assert_eq!(route_audio(5, &empty, true), AudioRoute::End);
    }

    #[test]
    fn test_video_keyframe_past_end_closes_stream_once_bound() {
        // end is exclusive: a keyframe exactly at end_ts already closes
        assert_eq!(
            route_video(14_000_000, true, &window(), true),
            VideoRoute::End
        );
        assert_eq!(
            route_video(15_000_000, true, &window(), true),
            VideoRoute::End
        );
        assert_eq!(
            route_video(13_999_999, true, &window(), true),
            VideoRoute::Decode
        );
    }

    #[test]
    fn test_video_keyframe_past_end_still_decodes_before_bind() {
        // Without the close gated on the bind, an init segment's first
        // keyframe would end the stream before a header ever got written.
        assert_eq!(
            route_video(14_000_000, true, &window(), false),
            VideoRoute::Decode
        );
        let empty = SegmentWindow::from_seconds(0.0, 0.0);
        assert_eq!(route_video(0, true, &empty, false), VideoRoute::Decode);
    }

    #[test]
    fn test_video_non_key_packets_always_decode() {
        assert_eq!(
            route_video(14_000_000, false, &window(), true),
            VideoRoute::Decode
        );
        assert_eq!(
            route_video(9_000_000, false, &window(), true),
            VideoRoute::Decode
        );
        assert_eq!(
            route_video(12_000_000, false, &window(), false),
            VideoRoute::Decode
        );
    }

    #[test]
    fn test_video_keyframes_in_window_decode() {
        assert_eq!(
            route_video(10_000_000, true, &window(), true),
            VideoRoute::Decode
        );
        assert_eq!(
            route_video(9_000_000, true, &window(), true),
            VideoRoute::Decode
        );
    }
}
