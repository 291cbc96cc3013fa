//! # loudscan
//!
//! Measure EBU R128 loudness statistics from media files via FFmpeg's
//! `loudnorm` filter, powered by the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! `loudscan` builds a private decode → `loudnorm` → sink filter pipeline
//! over one audio stream, discards the filtered audio, and captures the
//! JSON summary the filter prints when the pipeline is torn down. That
//! summary is exactly what a two-pass `loudnorm` normalization needs as
//! its `measured_*` inputs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use loudscan::{LoudnormOptions, measure_file};
//!
//! let stats = measure_file("input.mp4", &LoudnormOptions::new())?;
//! match stats {
//!     Some(stats) => println!(
//!         "I={:.2} LUFS, LRA={:.2} LU, TP={:.2} dBTP",
//!         stats.input_i, stats.input_lra, stats.input_tp
//!     ),
//!     None => eprintln!("the filter produced no statistics"),
//! }
//! # Ok::<(), loudscan::LoudscanError>(())
//! ```
//!
//! ### Pick a stream explicitly
//!
//! ```no_run
//! use loudscan::{LoudnormOptions, audio_streams, measure_file_stream};
//!
//! let streams = audio_streams("input.mkv")?;
//! let commentary = streams
//!     .iter()
//!     .find(|stream| stream.language.as_deref() == Some("eng"))
//!     .expect("no English track");
//! let stats = measure_file_stream("input.mkv", commentary.stream_index, &LoudnormOptions::new())?;
//! # Ok::<(), loudscan::LoudscanError>(())
//! ```
//!
//! ## Features
//!
//! - **Typed measurement** — [`measure_file`], [`measure_file_stream`],
//!   and [`measure_stream`] return parsed [`LoudnormStats`]
//! - **Raw capture** — [`capture_stats_text`] hands back the filter's
//!   verbatim JSON text for callers with their own parsing
//! - **Stream probing** — [`audio_streams`] lists a container's audio
//!   tracks (codec, rate, layout, language)
//! - **FFmpeg log control** — [`set_ffmpeg_log_level`] tunes FFmpeg's own
//!   stderr output
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | [`measure_file_async`] runs measurements via Tokio's blocking pool |
//!
//! ## Semantics worth knowing
//!
//! - A capture timeout is reported as `Ok(None)`, not an error: the
//!   filter legitimately prints nothing when printing is disabled or no
//!   audio reached it. Setup and stream failures are distinct
//!   [`LoudscanError`] values and never degrade into a timeout.
//! - The statistics travel through FFmpeg's process-wide logging hook, so
//!   measurements are serialized behind a process-wide lock: at most one
//!   analysis runs at a time, and concurrent callers queue.
//! - [`measure_stream`] and [`capture_stats_text`] consume the demuxer
//!   handle; the container is read to end of stream and closed on every
//!   path.
//!
//! ## Requirements
//!
//! FFmpeg development libraries (with libavfilter and the `loudnorm`
//! filter) must be installed on your system.

pub mod analysis;
mod capture;
pub mod error;
pub mod ffmpeg;
#[cfg(feature = "async")]
pub mod future;
pub mod probe;

pub use analysis::{
    DEFAULT_CAPTURE_TIMEOUT, LoudnormOptions, LoudnormStats, capture_stats_text, measure_file,
    measure_file_stream, measure_stream,
};
pub use error::LoudscanError;
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
#[cfg(feature = "async")]
pub use future::{StatsFuture, measure_file_async};
pub use probe::{AudioStreamInfo, audio_streams};
