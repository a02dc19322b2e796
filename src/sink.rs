//! Output sink and muxer configuration.
//!
//! One muxer wrapper serves both output variants: MPEG-TS written straight
//! to a URL (file path, `pipe:1`, ...) and DASH-style fMP4 accumulated in an
//! FFmpeg dynamic buffer and handed back as an owned `Vec<u8>`.
//!
//! The wrapper works at the `ffmpeg::ffi` level because the safe `Output`
//! context always owns its own avio handle; dynamic buffers and deferred
//! header writes need manual control over `pb`.

use std::ffi::{CStr, CString};
use std::ptr;

use ffmpeg_the_third as ffmpeg;

use ffmpeg::ffi;
use ffmpeg::packet::Mut;
use ffmpeg::Rational;
use tracing::warn;

use crate::error::{Error, Result};
use crate::window::SegmentWindow;

/// Output stream layout is fixed: video first, audio second.
pub(crate) const OUT_VIDEO_STREAM_INDEX: usize = 0;
pub(crate) const OUT_AUDIO_STREAM_INDEX: usize = 1;

/// DASH fragment kind for the fMP4 variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fragment {
    /// Initialization segment (`init.mp4`): container header only, produced
    /// from an empty window.
    Init,
    /// Media fragment (`<n>.m4s`) covering `[start, start + duration)`
    /// seconds.
    Media { start: f64, duration: f64 },
}

impl Fragment {
    /// mp4 muxer movflags for this fragment kind.
    pub(crate) fn movflags(&self) -> &'static CStr {
        match self {
            Fragment::Init => c"dash+empty_moov+separate_moof",
            Fragment::Media { .. } => c"dash+frag_keyframe+separate_moof",
        }
    }

    /// Timestamp window this fragment covers.
    pub(crate) fn window(&self) -> SegmentWindow {
        match *self {
            Fragment::Init => SegmentWindow::from_seconds(0.0, 0.0),
            Fragment::Media { start, duration } => SegmentWindow::from_seconds(start, duration),
        }
    }
}

/// Container formats we mux into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Container {
    MpegTs,
    Mp4,
}

impl Container {
    fn format_name(&self) -> &'static CStr {
        match self {
            Container::MpegTs => c"mpegts",
            Container::Mp4 => c"mp4",
        }
    }
}

/// Where the muxed bytes go.
pub(crate) enum SinkTarget {
    /// Anything avio can open for writing: a file path, `pipe:1`, a protocol
    /// URL.
    Url(CString),
    /// FFmpeg dynamic buffer, finalized to an owned `Vec<u8>`.
    Memory,
}

impl SinkTarget {
    pub(crate) fn url(target: &str) -> Result<Self> {
        let url = CString::new(target)
            .map_err(|_| Error::output_open(target, "target contains a NUL byte"))?;
        Ok(SinkTarget::Url(url))
    }
}

/// Muxer with a fixed two-stream layout and a deferred header.
///
/// The video stream's codec parameters are unknown until the encoder binds,
/// so construction only allocates the context, opens the sink, and lays out
/// the streams; `bind_video_stream` + `write_header` complete the setup.
pub(crate) struct Muxer {
    ctx: *mut ffi::AVFormatContext,
    movflags: Option<&'static CStr>,
    memory: bool,
    io_open: bool,
    description: String,
}

impl Muxer {
    pub(crate) fn new(
        container: Container,
        target: SinkTarget,
        movflags: Option<&'static CStr>,
    ) -> Result<Self> {
        let description = match &target {
            SinkTarget::Url(url) => url.to_string_lossy().into_owned(),
            SinkTarget::Memory => "memory".to_string(),
        };

        let mut ctx = ptr::null_mut();
        let ret = unsafe {
            ffi::avformat_alloc_output_context2(
                &mut ctx,
                ptr::null(),
                container.format_name().as_ptr(),
                ptr::null(),
            )
        };
        if ret < 0 || ctx.is_null() {
            return Err(Error::output_open(&description, ffmpeg::Error::from(ret)));
        }

        let mut muxer = Muxer {
            ctx,
            movflags,
            memory: matches!(target, SinkTarget::Memory),
            io_open: false,
            description,
        };

        let ret = unsafe {
            match &target {
                SinkTarget::Url(url) => ffi::avio_open(
                    &mut (*muxer.ctx).pb,
                    url.as_ptr(),
                    ffi::AVIO_FLAG_WRITE as libc::c_int,
                ),
                SinkTarget::Memory => ffi::avio_open_dyn_buf(&mut (*muxer.ctx).pb),
            }
        };
        if ret < 0 {
            return Err(Error::output_open(
                &muxer.description,
                ffmpeg::Error::from(ret),
            ));
        }
        muxer.io_open = true;

        Ok(muxer)
    }

    /// Allocate the output video stream (index 0). Time base and codec
    /// parameters follow once the encoder opens.
    pub(crate) fn add_video_stream(&mut self, codec: ffmpeg::Codec) -> Result<()> {
        let stream = unsafe { ffi::avformat_new_stream(self.ctx, codec.as_ptr()) };
        if stream.is_null() {
            return Err(Error::output_open(
                &self.description,
                "failed to allocate output video stream",
            ));
        }
        Ok(())
    }

    /// Allocate the pass-through audio stream (index 1) from the input
    /// stream's codec parameters.
    pub(crate) fn add_audio_stream(
        &mut self,
        params: *const ffi::AVCodecParameters,
        time_base: Rational,
    ) -> Result<()> {
        unsafe {
            let stream = ffi::avformat_new_stream(self.ctx, ptr::null());
            if stream.is_null() {
                return Err(Error::output_open(
                    &self.description,
                    "failed to allocate output audio stream",
                ));
            }

            let ret = ffi::avcodec_parameters_copy((*stream).codecpar, params);
            if ret < 0 {
                return Err(Error::output_open(
                    &self.description,
                    format!(
                        "failed to copy audio stream parameters: {}",
                        ffmpeg::Error::from(ret)
                    ),
                ));
            }

            // Container change invalidates the source codec tag
            (*(*stream).codecpar).codec_tag = 0;
            (*stream).time_base = time_base.into();
        }
        Ok(())
    }

    /// Complete the video stream from the opened encoder context.
    pub(crate) fn bind_video_stream(
        &mut self,
        enc_ctx: *mut ffi::AVCodecContext,
        time_base: Rational,
    ) -> Result<()> {
        unsafe {
            let stream = self.stream_ptr(OUT_VIDEO_STREAM_INDEX);
            (*stream).time_base = time_base.into();
            let ret = ffi::avcodec_parameters_from_context((*stream).codecpar, enc_ctx);
            if ret < 0 {
                return Err(Error::encoder_bind(format!(
                    "failed to copy encoder parameters to output stream: {}",
                    ffmpeg::Error::from(ret)
                )));
            }
        }
        Ok(())
    }

    /// Write the container header, applying movflags when configured.
    pub(crate) fn write_header(&mut self) -> Result<()> {
        unsafe {
            let mut opts: *mut ffi::AVDictionary = ptr::null_mut();
            if let Some(flags) = self.movflags {
                let ret = ffi::av_dict_set(&mut opts, c"movflags".as_ptr(), flags.as_ptr(), 0);
                if ret < 0 {
                    return Err(Error::HeaderWrite {
                        message: format!("failed to set movflags: {}", ffmpeg::Error::from(ret)),
                    });
                }
            }

            let ret = ffi::avformat_write_header(self.ctx, &mut opts);
            ffi::av_dict_free(&mut opts);
            if ret < 0 {
                return Err(Error::HeaderWrite {
                    message: ffmpeg::Error::from(ret).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Live time base of an output stream (the muxer may adjust it while
    /// writing the header).
    pub(crate) fn stream_time_base(&self, index: usize) -> Rational {
        unsafe { Rational::from((*self.stream_ptr(index)).time_base) }
    }

    pub(crate) fn write_interleaved(&mut self, packet: &mut ffmpeg::Packet) -> Result<()> {
        let ret = unsafe { ffi::av_interleaved_write_frame(self.ctx, packet.as_mut_ptr()) };
        if ret < 0 {
            return Err(Error::MuxWrite {
                message: ffmpeg::Error::from(ret).to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn write_trailer(&mut self) -> Result<()> {
        let ret = unsafe { ffi::av_write_trailer(self.ctx) };
        if ret < 0 {
            return Err(Error::TrailerWrite {
                message: ffmpeg::Error::from(ret).to_string(),
            });
        }
        Ok(())
    }

    /// Close the sink. The memory variant hands back the accumulated bytes;
    /// the URL variant returns `None`.
    pub(crate) fn finish(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.io_open {
            return Ok(None);
        }
        self.io_open = false;

        unsafe {
            if self.memory {
                let mut data: *mut u8 = ptr::null_mut();
                let size = ffi::avio_close_dyn_buf((*self.ctx).pb, &mut data);
                (*self.ctx).pb = ptr::null_mut();
                if data.is_null() {
                    return Ok(Some(Vec::new()));
                }
                let bytes = std::slice::from_raw_parts(data, size as usize).to_vec();
                ffi::av_free(data.cast());
                Ok(Some(bytes))
            } else {
                let ret = ffi::avio_closep(&mut (*self.ctx).pb);
                if ret < 0 {
                    warn!(
                        target = %self.description,
                        error = %ffmpeg::Error::from(ret),
                        "failed to close output"
                    );
                }
                Ok(None)
            }
        }
    }

    fn stream_ptr(&self, index: usize) -> *mut ffi::AVStream {
        unsafe { *(*self.ctx).streams.add(index) }
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        unsafe {
            if self.io_open {
                if self.memory {
                    let mut data: *mut u8 = ptr::null_mut();
                    ffi::avio_close_dyn_buf((*self.ctx).pb, &mut data);
                    if !data.is_null() {
                        ffi::av_free(data.cast());
                    }
                } else {
                    ffi::avio_closep(&mut (*self.ctx).pb);
                }
                (*self.ctx).pb = ptr::null_mut();
            }
            ffi::avformat_free_context(self.ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_movflags() {
        assert_eq!(
            Fragment::Init.movflags().to_str().unwrap(),
            "dash+empty_moov+separate_moof"
        );
        assert_eq!(
            Fragment::Media {
                start: 4.0,
                duration: 4.0
            }
            .movflags()
            .to_str()
            .unwrap(),
            "dash+frag_keyframe+separate_moof"
        );
    }

    #[test]
    fn test_fragment_windows() {
        let init = Fragment::Init.window();
        assert_eq!(init.start_ts, init.end_ts);

        let media = Fragment::Media {
            start: 8.0,
            duration: 4.0,
        }
        .window();
        assert_eq!(media.start_ts, 8_000_000);
        assert_eq!(media.end_ts, 12_000_000);
    }

    #[test]
    fn test_container_format_names() {
        assert_eq!(Container::MpegTs.format_name().to_str().unwrap(), "mpegts");
        assert_eq!(Container::Mp4.format_name().to_str().unwrap(), "mp4");
    }

    #[test]
    fn test_sink_target_rejects_nul() {
        assert!(matches!(
            SinkTarget::url("pipe:1\0x"),
            Err(Error::OutputOpen { .. })
        ));
        assert!(SinkTarget::url("pipe:1").is_ok());
    }
}
