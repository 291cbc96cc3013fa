//! Async measurement support.
//!
//! [`measure_file_async`] runs a measurement via
//! `tokio::task::spawn_blocking` — the decode/filter pipeline is CPU-bound
//! FFmpeg work that would otherwise tie up the runtime's cooperative task
//! budget. Polling the returned [`StatsFuture`] drives it to completion.
//!
//! Measurements are serialized process-wide (see [`crate::measure_stream`]),
//! so spawning several futures at once is safe but does not parallelize
//! the analyses.
//!
//! # Example
//!
//! ```no_run
//! use loudscan::{LoudnormOptions, measure_file_async};
//!
//! # async fn example() -> Result<(), loudscan::LoudscanError> {
//! let stats = measure_file_async("input.mp4", LoudnormOptions::new()).await?;
//! if let Some(stats) = stats {
//!     println!("integrated loudness: {:.2} LUFS", stats.input_i);
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::analysis::{LoudnormOptions, LoudnormStats, measure_file};
use crate::error::LoudscanError;

/// A future that resolves to measured loudness statistics.
///
/// Created via [`measure_file_async`]. The measurement runs on a blocking
/// thread; dropping the future detaches it rather than cancelling the
/// in-flight FFmpeg work.
pub struct StatsFuture {
    handle: JoinHandle<Result<Option<LoudnormStats>, LoudscanError>>,
}

impl Future for StatsFuture {
    type Output = Result<Option<LoudnormStats>, LoudscanError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(LoudscanError::Cancelled)))
    }
}

/// Measure the best audio stream of `path` on a blocking thread.
///
/// Equivalent to [`measure_file`](crate::measure_file), but usable from
/// async contexts without blocking the runtime.
pub fn measure_file_async<P: Into<PathBuf>>(path: P, options: LoudnormOptions) -> StatsFuture {
    let path = path.into();
    let handle = tokio::task::spawn_blocking(move || measure_file(path, &options));

    StatsFuture { handle }
}
