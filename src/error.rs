//! Error types for segforged.

use std::path::PathBuf;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while transcoding a segment.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input file could not be opened or demuxed.
    #[error("failed to open input {}: {message}", path.display())]
    InputOpen { path: PathBuf, message: String },

    /// Stream parameters could not be read into a codec context.
    #[error("failed to read stream parameters: {message}")]
    StreamProbe { message: String },

    /// The input is missing a required elementary stream.
    #[error("no {medium} stream in input")]
    StreamNotFound { medium: &'static str },

    /// The hardware acceleration device could not be created or referenced.
    #[error("hardware device error: {message}")]
    HwDevice { message: String },

    /// No usable hardware decoder for the input video codec.
    #[error("hardware decoder unavailable: {name}: {message}")]
    DecoderUnavailable { name: String, message: String },

    /// A compressed packet was rejected by the decoder.
    #[error("failed to submit packet to decoder: {message}")]
    DecodeSubmit { message: String },

    /// Decoding failed while draining frames.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// No usable hardware encoder for the requested identifier.
    #[error("hardware encoder unavailable: {name}")]
    EncoderUnavailable { name: String },

    /// The encoder could not be bound to the decoded stream.
    #[error("failed to bind encoder: {message}")]
    EncoderBind { message: String },

    /// The encoder rejected its configuration on open.
    #[error("failed to open encoder: {message}")]
    EncoderOpen { message: String },

    /// The output sink could not be created or opened.
    #[error("failed to open output {target}: {message}")]
    OutputOpen { target: String, message: String },

    /// The container header could not be written.
    #[error("failed to write container header: {message}")]
    HeaderWrite { message: String },

    /// A decoded frame was rejected by the encoder.
    #[error("failed to submit frame to encoder: {message}")]
    EncodeSubmit { message: String },

    /// Encoding failed while draining packets.
    #[error("encode error: {message}")]
    Encode { message: String },

    /// An interleaved packet write failed.
    #[error("failed to mux packet: {message}")]
    MuxWrite { message: String },

    /// The container trailer could not be written.
    #[error("failed to write container trailer: {message}")]
    TrailerWrite { message: String },

    /// The input video codec has no hardware codec mapping.
    #[error("unsupported codec: {name}")]
    UnsupportedCodec { name: String },

    /// Pop from an empty packet queue.
    #[error("packet queue is empty")]
    EmptyQueue,
}

impl Error {
    /// Create an input open error.
    pub fn input_open(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::InputOpen {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a stream probe error.
    pub fn stream_probe(message: impl ToString) -> Self {
        Self::StreamProbe {
            message: message.to_string(),
        }
    }

    /// Create a hardware device error.
    pub fn hw_device(message: impl ToString) -> Self {
        Self::HwDevice {
            message: message.to_string(),
        }
    }

    /// Create a decoder unavailable error.
    pub fn decoder_unavailable(name: impl Into<String>, message: impl ToString) -> Self {
        Self::DecoderUnavailable {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create an encoder bind error.
    pub fn encoder_bind(message: impl ToString) -> Self {
        Self::EncoderBind {
            message: message.to_string(),
        }
    }

    /// Create an output open error.
    pub fn output_open(target: impl ToString, message: impl ToString) -> Self {
        Self::OutputOpen {
            target: target.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an unsupported codec error.
    pub fn unsupported_codec(name: impl Into<String>) -> Self {
        Self::UnsupportedCodec { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::input_open("/tmp/missing.mkv", "No such file or directory");
        assert_eq!(
            err.to_string(),
            "failed to open input /tmp/missing.mkv: No such file or directory"
        );

        let err = Error::StreamNotFound { medium: "audio" };
        assert_eq!(err.to_string(), "no audio stream in input");

        let err = Error::unsupported_codec("rawvideo");
        assert_eq!(err.to_string(), "unsupported codec: rawvideo");

        assert_eq!(Error::EmptyQueue.to_string(), "packet queue is empty");
    }

    #[test]
    fn test_helper_constructors() {
        match Error::decoder_unavailable("h264_qsv", "not compiled in") {
            Error::DecoderUnavailable { name, message } => {
                assert_eq!(name, "h264_qsv");
                assert_eq!(message, "not compiled in");
            }
            other => panic!("unexpected variant: {other:?}"),
        }

        match Error::output_open("pipe:1", "permission denied") {
            Error::OutputOpen { target, .. } => assert_eq!(target, "pipe:1"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
