//! Lightweight audio stream probing.
//!
//! [`audio_streams`] lists the audio streams of a media file so callers
//! can choose which one to measure without touching `ffmpeg-next`
//! themselves. The file is opened, inspected, and closed again; the
//! returned [`AudioStreamInfo`] values are fully owned.
//!
//! # Example
//!
//! ```no_run
//! use loudscan::audio_streams;
//!
//! for stream in audio_streams("input.mkv")? {
//!     println!(
//!         "#{}: {} {} Hz {}",
//!         stream.stream_index, stream.codec, stream.sample_rate, stream.channel_layout
//!     );
//! }
//! # Ok::<(), loudscan::LoudscanError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use ffmpeg_next::{codec::context::Context as CodecContext, media::Type};

use crate::analysis::{describe_channel_layout, open_input};
use crate::error::LoudscanError;

/// Description of one audio stream within a container.
#[derive(Debug, Clone)]
pub struct AudioStreamInfo {
    /// Container-level stream index, as passed to
    /// [`measure_file_stream`](crate::measure_file_stream).
    pub stream_index: usize,
    /// Codec name (e.g. `aac`, `flac`), or `unknown`.
    pub codec: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
    /// Channel layout description (e.g. `stereo`, `5.1`).
    pub channel_layout: String,
    /// Stream duration, if the container records one.
    pub duration: Option<Duration>,
    /// Language tag from the stream metadata, if present.
    pub language: Option<String>,
}

/// List the audio streams of a media file.
///
/// Streams whose codec parameters cannot be read are skipped rather than
/// failing the whole listing. An empty vector means the container has no
/// usable audio.
///
/// # Errors
///
/// Returns [`LoudscanError::FileOpen`] if the file cannot be opened or
/// recognised as a media container.
pub fn audio_streams<P: AsRef<Path>>(path: P) -> Result<Vec<AudioStreamInfo>, LoudscanError> {
    let input = open_input(path.as_ref())?;
    let mut streams = Vec::new();

    for stream in input.streams() {
        if stream.parameters().medium() != Type::Audio {
            continue;
        }

        let stream_index = stream.index();
        let Ok(decoder) = CodecContext::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().audio())
        else {
            log::debug!("Skipping audio stream {stream_index}: unreadable codec parameters");
            continue;
        };

        let codec = decoder
            .codec()
            .map(|codec| codec.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let channel_layout =
            describe_channel_layout(&decoder).unwrap_or_else(|_| "unknown".to_string());

        let time_base = stream.time_base();
        let duration_ts = stream.duration();
        let duration = if duration_ts > 0 && time_base.denominator() != 0 {
            Some(Duration::from_secs_f64(
                duration_ts as f64 * time_base.numerator() as f64
                    / time_base.denominator() as f64,
            ))
        } else {
            None
        };

        let language = stream.metadata().get("language").map(str::to_owned);

        streams.push(AudioStreamInfo {
            stream_index,
            codec,
            sample_rate: decoder.rate(),
            channels: decoder.channels(),
            channel_layout,
            duration,
            language,
        });
    }

    Ok(streams)
}
