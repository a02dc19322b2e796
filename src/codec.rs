//! Hardware codec selection.
//!
//! Both sides of the pipeline run on Intel Quick Sync. The input video codec
//! id picks the QSV decoder; the caller's encoder identifier is resolved
//! against the FFmpeg registry and then mapped to its QSV variant, so
//! requesting plain `h264` and `h264_qsv` both land on the hardware encoder.

use ffmpeg_the_third as ffmpeg;

use ffmpeg::codec::Id;

use crate::error::{Error, Result};

/// QSV codec name for a codec family.
pub(crate) fn qsv_codec_name(id: Id) -> Result<&'static str> {
    match id {
        Id::H264 => Ok("h264_qsv"),
        Id::HEVC => Ok("hevc_qsv"),
        Id::VP8 => Ok("vp8_qsv"),
        Id::VP9 => Ok("vp9_qsv"),
        Id::AV1 => Ok("av1_qsv"),
        Id::MPEG2VIDEO => Ok("mpeg2_qsv"),
        Id::MJPEG => Ok("mjpeg_qsv"),
        other => Err(Error::unsupported_codec(format!("{other:?}"))),
    }
}

/// Find the QSV decoder for the input video codec.
pub(crate) fn find_hardware_decoder(id: Id) -> Result<(ffmpeg::Codec, &'static str)> {
    let name = qsv_codec_name(id)?;
    let codec = ffmpeg::decoder::find_by_name(name)
        .ok_or_else(|| Error::decoder_unavailable(name, "not present in this FFmpeg build"))?;
    Ok((codec, name))
}

/// Resolve the caller's encoder identifier to a QSV encoder.
pub(crate) fn resolve_hardware_encoder(identifier: &str) -> Result<ffmpeg::Codec> {
    let requested =
        ffmpeg::encoder::find_by_name(identifier).ok_or_else(|| Error::EncoderUnavailable {
            name: identifier.to_string(),
        })?;

    let name = qsv_codec_name(requested.id())?;
    ffmpeg::encoder::find_by_name(name).ok_or_else(|| Error::EncoderUnavailable {
        name: name.to_string(),
    })
}
