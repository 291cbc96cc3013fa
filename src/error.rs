//! Error types for the `loudscan` crate.
//!
//! This module defines [`LoudscanError`], the unified error type returned by
//! all fallible operations in the crate. Variants carry enough context to
//! diagnose a failed measurement without additional logging at the call site.

use std::path::PathBuf;

use ffmpeg_next::Error as FfmpegError;
use thiserror::Error;

/// The unified error type for all `loudscan` operations.
///
/// Every public function that can fail returns `Result<T, LoudscanError>`.
/// A capture timeout is *not* an error: measurement entry points report it
/// as `Ok(None)` instead, since the loudness filter may legitimately print
/// nothing (e.g. printing disabled, or no decodable audio reached it).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoudscanError {
    /// The media file could not be opened.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`crate::measure_file`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The container does not contain an audio stream.
    #[error("No audio stream found in file")]
    NoAudioStream,

    /// The requested stream index does not exist in the container.
    #[error("Stream index {stream_index} is out of range (container has {stream_count} streams)")]
    StreamIndexOutOfRange {
        /// The stream index that was requested.
        stream_index: usize,
        /// The number of streams in the container.
        stream_count: usize,
    },

    /// The requested stream exists but does not carry audio.
    #[error("Stream {stream_index} is not an audio stream (found {medium})")]
    NotAnAudioStream {
        /// The stream index that was requested.
        stream_index: usize,
        /// The medium of the stream that was found instead.
        medium: String,
    },

    /// No decoder is available for the stream's codec.
    #[error("No decoder found for codec {codec}")]
    DecoderNotFound {
        /// Codec identifier of the selected stream.
        codec: String,
    },

    /// The decoder could not be opened against the stream parameters.
    #[error("Failed to open audio decoder: {0}")]
    DecoderOpen(String),

    /// Filter graph construction, linking, or configuration failed.
    #[error("Filter graph error: {0}")]
    FilterGraph(String),

    /// Reading packets from the demuxer failed.
    #[error("Demux error: {0}")]
    Demux(String),

    /// Decoding a packet or receiving a decoded frame failed.
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// The captured statistics text could not be parsed as a loudnorm report.
    #[error("Failed to parse loudnorm statistics: {0}")]
    StatsParse(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    /// The background measurement task was cancelled or panicked.
    #[cfg(feature = "async")]
    #[error("Measurement task cancelled")]
    Cancelled,
}

impl From<FfmpegError> for LoudscanError {
    fn from(error: FfmpegError) -> Self {
        LoudscanError::Ffmpeg(error.to_string())
    }
}
