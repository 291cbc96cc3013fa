//! Loudness measurement via FFmpeg's `loudnorm` filter.
//!
//! This module drives a private `abuffer → loudnorm → abuffersink` filter
//! graph over one audio stream of a demuxed container. The filtered audio
//! itself is discarded; the only output that matters is the JSON summary
//! the filter prints through FFmpeg's logging facility when the graph is
//! torn down, which is captured and handed back to the caller (the
//! `capture` module holds the synchronization machinery).
//!
//! # Example
//!
//! ```no_run
//! use loudscan::{LoudnormOptions, measure_file};
//!
//! let options = LoudnormOptions::new().integrated_target(-16.0).true_peak(-1.5);
//! match measure_file("input.mp4", &options)? {
//!     Some(stats) => println!("integrated loudness: {:.2} LUFS", stats.input_i),
//!     None => eprintln!("no statistics were produced"),
//! }
//! # Ok::<(), loudscan::LoudscanError>(())
//! ```
//!
//! # Ownership
//!
//! [`measure_stream`] and [`capture_stats_text`] take the demuxer context
//! by value and close it on every path. Measurement reads the container to
//! end of stream, so the handle would be useless afterwards anyway; the
//! move makes that explicit in the signature.
//!
//! # Concurrency
//!
//! FFmpeg's log callback is a single process-wide function pointer, so
//! measurements are serialized behind a process-wide lock. Concurrent
//! calls from multiple threads are safe and simply queue.

use std::ffi::CStr;
use std::path::Path;
use std::time::Duration;

use ffmpeg_next::{
    Error as FfmpegError, Packet, codec::context::Context as CodecContext,
    filter::Graph as FilterGraph, format::context::Input, frame::Audio as AudioFrame,
    media::Type,
};

use crate::capture::{LogHookGuard, StatsCapture};
use crate::error::LoudscanError;

/// How long a measurement waits for the filter's summary to arrive through
/// the logging hook after the pipeline has been flushed and torn down.
///
/// The summary is normally printed synchronously while the graph is freed,
/// so this bound only matters when FFmpeg routes logging through another
/// thread or the filter prints nothing at all.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the `loudnorm` measurement filter.
///
/// Defaults mirror the filter's own: integrated target −24 LUFS, loudness
/// range 7 LU, true peak −2 dBTP. The rendered argument string always
/// requests `print_format=json`, since the JSON report is what the
/// measurement captures and parses.
///
/// # Example
///
/// ```
/// use loudscan::LoudnormOptions;
///
/// let options = LoudnormOptions::new()
///     .integrated_target(-16.0)
///     .loudness_range(11.0)
///     .true_peak(-1.5)
///     .linear(true);
/// assert_eq!(options.filter_args(), "I=-16:LRA=11:tp=-1.5:linear=true:print_format=json");
/// ```
#[derive(Debug, Clone)]
pub struct LoudnormOptions {
    /// Integrated loudness target in LUFS (`I`). Range −70.0 to −5.0.
    pub integrated_target: f64,
    /// Loudness range target in LU (`LRA`). Range 1.0 to 50.0.
    pub loudness_range: f64,
    /// Maximum true peak in dBTP (`tp`). Range −9.0 to 0.0.
    pub true_peak: f64,
    /// Offset gain in LU (`offset`), applied before the true-peak limiter.
    pub offset: Option<f64>,
    /// Request linear (single-gain) normalization (`linear`).
    pub linear: Option<bool>,
    /// Treat mono input as dual-mono (`dual_mono`).
    pub dual_mono: Option<bool>,
    /// Bound on the wait for the captured summary.
    pub capture_timeout: Duration,
}

impl Default for LoudnormOptions {
    fn default() -> Self {
        Self {
            integrated_target: -24.0,
            loudness_range: 7.0,
            true_peak: -2.0,
            offset: None,
            linear: None,
            dual_mono: None,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }
}

impl LoudnormOptions {
    /// Create measurement options with the filter's default targets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the integrated loudness target in LUFS.
    pub fn integrated_target(mut self, lufs: f64) -> Self {
        self.integrated_target = lufs;
        self
    }

    /// Set the loudness range target in LU.
    pub fn loudness_range(mut self, lu: f64) -> Self {
        self.loudness_range = lu;
        self
    }

    /// Set the maximum true peak in dBTP.
    pub fn true_peak(mut self, dbtp: f64) -> Self {
        self.true_peak = dbtp;
        self
    }

    /// Set the offset gain in LU.
    pub fn offset(mut self, lu: f64) -> Self {
        self.offset = Some(lu);
        self
    }

    /// Request linear (single-gain) normalization.
    pub fn linear(mut self, linear: bool) -> Self {
        self.linear = Some(linear);
        self
    }

    /// Treat mono input as dual-mono.
    pub fn dual_mono(mut self, dual_mono: bool) -> Self {
        self.dual_mono = Some(dual_mono);
        self
    }

    /// Bound the wait for the captured summary.
    pub fn capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    /// Render the `key=value:...` argument string passed to the filter.
    pub fn filter_args(&self) -> String {
        let mut args = format!(
            "I={}:LRA={}:tp={}",
            self.integrated_target, self.loudness_range, self.true_peak
        );
        if let Some(offset) = self.offset {
            args.push_str(&format!(":offset={offset}"));
        }
        if let Some(linear) = self.linear {
            args.push_str(&format!(":linear={linear}"));
        }
        if let Some(dual_mono) = self.dual_mono {
            args.push_str(&format!(":dual_mono={dual_mono}"));
        }
        args.push_str(":print_format=json");
        args
    }
}

/// Loudness statistics reported by the `loudnorm` filter.
///
/// Parsed from the filter's JSON summary. The filter prints every numeric
/// field as a quoted string (including `inf`/`-inf` for silent input), so
/// fields here are already decoded to `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoudnormStats {
    /// Measured integrated loudness of the input, LUFS.
    pub input_i: f64,
    /// Measured true peak of the input, dBTP.
    pub input_tp: f64,
    /// Measured loudness range of the input, LU.
    pub input_lra: f64,
    /// Measured threshold of the input, LUFS.
    pub input_thresh: f64,
    /// Integrated loudness the filter would have produced, LUFS.
    pub output_i: f64,
    /// True peak the filter would have produced, dBTP.
    pub output_tp: f64,
    /// Loudness range the filter would have produced, LU.
    pub output_lra: f64,
    /// Output threshold, LUFS.
    pub output_thresh: f64,
    /// `"dynamic"` or `"linear"`.
    pub normalization_type: String,
    /// Offset gain the filter settled on, LU.
    pub target_offset: f64,
}

impl LoudnormStats {
    /// Parse a loudnorm JSON summary as captured from the logging hook.
    pub fn from_json(text: &str) -> Result<Self, LoudscanError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())
            .map_err(|error| LoudscanError::StatsParse(format!("invalid JSON: {error}")))?;

        Ok(Self {
            input_i: numeric_field(&value, "input_i")?,
            input_tp: numeric_field(&value, "input_tp")?,
            input_lra: numeric_field(&value, "input_lra")?,
            input_thresh: numeric_field(&value, "input_thresh")?,
            output_i: numeric_field(&value, "output_i")?,
            output_tp: numeric_field(&value, "output_tp")?,
            output_lra: numeric_field(&value, "output_lra")?,
            output_thresh: numeric_field(&value, "output_thresh")?,
            normalization_type: string_field(&value, "normalization_type")?,
            target_offset: numeric_field(&value, "target_offset")?,
        })
    }
}

fn numeric_field(value: &serde_json::Value, key: &str) -> Result<f64, LoudscanError> {
    let field = value
        .get(key)
        .ok_or_else(|| LoudscanError::StatsParse(format!("missing field `{key}`")))?;

    match field {
        serde_json::Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| LoudscanError::StatsParse(format!("field `{key}` is out of range"))),
        serde_json::Value::String(text) => text.trim().parse::<f64>().map_err(|_| {
            LoudscanError::StatsParse(format!("field `{key}` is not numeric: {text:?}"))
        }),
        other => Err(LoudscanError::StatsParse(format!(
            "field `{key}` has unexpected type: {other}"
        ))),
    }
}

fn string_field(value: &serde_json::Value, key: &str) -> Result<String, LoudscanError> {
    value
        .get(key)
        .and_then(|field| field.as_str())
        .map(str::to_owned)
        .ok_or_else(|| LoudscanError::StatsParse(format!("missing field `{key}`")))
}

/// Measure loudness statistics for the best audio stream of a media file.
///
/// Opens the file, locates the best audio stream, and runs the measurement
/// pipeline over it. Returns `Ok(None)` if the filter produced no summary
/// within the configured timeout.
///
/// # Errors
///
/// Returns [`LoudscanError::FileOpen`] if the file cannot be opened,
/// [`LoudscanError::NoAudioStream`] if the container has no audio, and any
/// of the pipeline errors documented on [`measure_stream`].
pub fn measure_file<P: AsRef<Path>>(
    path: P,
    options: &LoudnormOptions,
) -> Result<Option<LoudnormStats>, LoudscanError> {
    let input = open_input(path.as_ref())?;
    let stream_index = input
        .streams()
        .best(Type::Audio)
        .map(|stream| stream.index())
        .ok_or(LoudscanError::NoAudioStream)?;

    measure_stream(input, stream_index, options)
}

/// Measure loudness statistics for a specific stream of a media file.
///
/// Like [`measure_file`], but analyzes the stream at `stream_index`
/// instead of the best audio stream.
pub fn measure_file_stream<P: AsRef<Path>>(
    path: P,
    stream_index: usize,
    options: &LoudnormOptions,
) -> Result<Option<LoudnormStats>, LoudscanError> {
    let input = open_input(path.as_ref())?;
    measure_stream(input, stream_index, options)
}

/// Measure loudness statistics for one stream of an opened container.
///
/// Consumes `input`: measurement reads the container to end of stream and
/// closes it on every path.
///
/// # Errors
///
/// Setup failures ([`LoudscanError::StreamIndexOutOfRange`],
/// [`LoudscanError::NotAnAudioStream`], [`LoudscanError::DecoderNotFound`],
/// [`LoudscanError::DecoderOpen`], [`LoudscanError::FilterGraph`]) and
/// stream failures ([`LoudscanError::Demux`], [`LoudscanError::Decode`])
/// return immediately after teardown; they never degrade into a capture
/// timeout. A summary that cannot be parsed is
/// [`LoudscanError::StatsParse`].
pub fn measure_stream(
    input: Input,
    stream_index: usize,
    options: &LoudnormOptions,
) -> Result<Option<LoudnormStats>, LoudscanError> {
    let text = capture_stats_text(
        input,
        stream_index,
        &options.filter_args(),
        options.capture_timeout,
    )?;

    match text {
        Some(text) => Ok(Some(LoudnormStats::from_json(&text)?)),
        None => Ok(None),
    }
}

/// Run the measurement pipeline and return the raw captured summary text.
///
/// `filter_args` is forwarded verbatim to the `loudnorm` filter; it is the
/// caller's responsibility to include `print_format=json` (or `summary`) —
/// with printing disabled the filter stays silent and the call returns
/// `Ok(None)` after `timeout`. The returned text starts at the opening
/// brace of the first matching log line and is capped at 2048 bytes.
///
/// This is the low-level building block underneath [`measure_stream`];
/// prefer the typed entry points unless you need the verbatim report.
pub fn capture_stats_text(
    mut input: Input,
    stream_index: usize,
    filter_args: &str,
    timeout: Duration,
) -> Result<Option<String>, LoudscanError> {
    log::debug!("Measuring loudness (stream={stream_index}, filter_args={filter_args})");

    let stream_count = input.streams().count();
    let stream = input
        .stream(stream_index)
        .ok_or(LoudscanError::StreamIndexOutOfRange {
            stream_index,
            stream_count,
        })?;

    let medium = stream.parameters().medium();
    if medium != Type::Audio {
        return Err(LoudscanError::NotAnAudioStream {
            stream_index,
            medium: format!("{medium:?}"),
        });
    }

    let time_base = stream.time_base();
    let parameters = stream.parameters();

    // Fresh cell per call, then the hook. The guard also serializes
    // measurements process-wide and restores default logging on drop,
    // including every early-error path below.
    let capture = StatsCapture::new();
    let _hook = LogHookGuard::install(&capture);

    let codec_id = parameters.id();
    ffmpeg_next::codec::decoder::find(codec_id).ok_or_else(|| {
        LoudscanError::DecoderNotFound {
            codec: format!("{codec_id:?}"),
        }
    })?;

    let mut decoder = CodecContext::from_parameters(parameters)
        .map_err(|error| LoudscanError::DecoderOpen(error.to_string()))?
        .decoder()
        .audio()
        .map_err(|error| LoudscanError::DecoderOpen(error.to_string()))?;

    let mut graph = build_graph(&decoder, time_base, filter_args)?;

    let mut packet = Packet::empty();
    let mut decoded = AudioFrame::empty();
    let mut filtered = AudioFrame::empty();

    // Drain: every packet of the selected stream goes through
    // decode → filter, and the sink is emptied as we go.
    loop {
        match packet.read(&mut input) {
            Ok(()) => {}
            Err(FfmpegError::Eof) => break,
            Err(error) => return Err(LoudscanError::Demux(error.to_string())),
        }

        if packet.stream() as usize != stream_index {
            continue;
        }

        decoder
            .send_packet(&packet)
            .map_err(|error| LoudscanError::Decode(error.to_string()))?;
        receive_and_filter(&mut decoder, &mut graph, &mut decoded, &mut filtered)?;
    }

    // Flush the decoder, then the filter source. The summary is computed
    // over everything that reached the filter before end of stream.
    decoder
        .send_eof()
        .map_err(|error| LoudscanError::Decode(error.to_string()))?;
    receive_and_filter(&mut decoder, &mut graph, &mut decoded, &mut filtered)?;

    graph
        .get("in")
        .ok_or_else(|| LoudscanError::FilterGraph("Filter 'in' not found".to_string()))?
        .source()
        .flush()
        .map_err(|error| LoudscanError::FilterGraph(format!("Failed to flush source: {error}")))?;
    drain_sink(&mut graph, &mut filtered)?;

    // loudnorm prints its report while the graph is freed, so the graph
    // must go before the wait.
    drop(graph);

    let text = capture.wait(timeout);
    if text.is_none() {
        log::warn!(
            "Timed out waiting for loudnorm statistics (stream={stream_index}, timeout={timeout:?})"
        );
    }

    Ok(text)
}

pub(crate) fn open_input(path: &Path) -> Result<Input, LoudscanError> {
    log::debug!("Opening media file: {}", path.display());

    // Initialise ffmpeg (safe to call multiple times).
    ffmpeg_next::init().map_err(|error| LoudscanError::FileOpen {
        path: path.to_path_buf(),
        reason: format!("FFmpeg initialisation failed: {error}"),
    })?;

    ffmpeg_next::format::input(&path).map_err(|error| LoudscanError::FileOpen {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })
}

/// Build the `abuffer → loudnorm → abuffersink` graph.
///
/// The buffer source is described from the stream's time base and the
/// opened decoder's sample format, rate, and channel layout; `filter_args`
/// parameterizes the loudnorm node verbatim.
fn build_graph(
    decoder: &ffmpeg_next::decoder::Audio,
    time_base: ffmpeg_next::Rational,
    filter_args: &str,
) -> Result<FilterGraph, LoudscanError> {
    let channel_layout = describe_channel_layout(decoder)?;
    let buffer_args = format!(
        "time_base={}/{}:sample_rate={}:sample_fmt={}:channel_layout={}",
        time_base.numerator(),
        time_base.denominator(),
        decoder.rate(),
        decoder.format().name(),
        channel_layout,
    );
    log::debug!("Audio buffer source: {buffer_args}");

    let mut graph = FilterGraph::new();

    graph
        .add(
            &ffmpeg_next::filter::find("abuffer").ok_or_else(|| {
                LoudscanError::FilterGraph("FFmpeg 'abuffer' filter not found".to_string())
            })?,
            "in",
            &buffer_args,
        )
        .map_err(|error| {
            LoudscanError::FilterGraph(format!("Failed to add abuffer filter: {error}"))
        })?;

    graph
        .add(
            &ffmpeg_next::filter::find("abuffersink").ok_or_else(|| {
                LoudscanError::FilterGraph("FFmpeg 'abuffersink' filter not found".to_string())
            })?,
            "out",
            "",
        )
        .map_err(|error| {
            LoudscanError::FilterGraph(format!("Failed to add abuffersink filter: {error}"))
        })?;

    let loudnorm_spec = format!("loudnorm={filter_args}");
    graph
        .output("in", 0)
        .map_err(|error| LoudscanError::FilterGraph(format!("Filter graph output error: {error}")))?
        .input("out", 0)
        .map_err(|error| LoudscanError::FilterGraph(format!("Filter graph input error: {error}")))?
        .parse(&loudnorm_spec)
        .map_err(|error| LoudscanError::FilterGraph(format!("Filter graph parse error: {error}")))?;

    graph
        .validate()
        .map_err(|error| LoudscanError::FilterGraph(format!("Filter graph validation: {error}")))?;

    Ok(graph)
}

/// Receive every frame the decoder has ready and push each through the
/// graph, discarding filtered output. `EAGAIN` and end-of-stream pause the
/// loop; anything else aborts the measurement.
fn receive_and_filter(
    decoder: &mut ffmpeg_next::decoder::Audio,
    graph: &mut FilterGraph,
    decoded: &mut AudioFrame,
    filtered: &mut AudioFrame,
) -> Result<(), LoudscanError> {
    loop {
        match decoder.receive_frame(decoded) {
            Ok(()) => {}
            Err(FfmpegError::Eof | FfmpegError::Other { errno: libc::EAGAIN }) => break,
            Err(error) => return Err(LoudscanError::Decode(error.to_string())),
        }

        graph
            .get("in")
            .ok_or_else(|| LoudscanError::FilterGraph("Filter 'in' not found".to_string()))?
            .source()
            .add(decoded)
            .map_err(|error| {
                LoudscanError::FilterGraph(format!("Failed to feed filter source: {error}"))
            })?;
        drain_sink(graph, filtered)?;
    }

    Ok(())
}

/// Pull and discard everything currently available at the sink.
fn drain_sink(graph: &mut FilterGraph, filtered: &mut AudioFrame) -> Result<(), LoudscanError> {
    loop {
        let mut sink = graph
            .get("out")
            .ok_or_else(|| LoudscanError::FilterGraph("Filter 'out' not found".to_string()))?;

        match sink.sink().frame(filtered) {
            Ok(()) => { /* measurement only; frame data is discarded */ }
            Err(FfmpegError::Eof | FfmpegError::Other { errno: libc::EAGAIN }) => break,
            Err(error) => return Err(LoudscanError::FilterGraph(error.to_string())),
        }
    }

    Ok(())
}

/// Describe the decoder's channel layout as a filter-argument string
/// (e.g. `stereo`, `5.1`).
///
/// The safe wrapper has no stable surface for the post-5.1 channel layout
/// API, so the decoder's `ch_layout` field is read directly.
pub(crate) fn describe_channel_layout(
    decoder: &ffmpeg_next::decoder::Audio,
) -> Result<String, LoudscanError> {
    unsafe {
        let mut description = [0 as libc::c_char; 64];
        let ret = ffmpeg_sys_next::av_channel_layout_describe(
            &(*decoder.as_ptr()).ch_layout,
            description.as_mut_ptr(),
            description.len(),
        );
        if ret < 0 {
            return Err(LoudscanError::FilterGraph(format!(
                "Failed to describe channel layout: {}",
                FfmpegError::from(ret)
            )));
        }

        Ok(CStr::from_ptr(description.as_ptr())
            .to_string_lossy()
            .into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::{LoudnormOptions, LoudnormStats};

    const SAMPLE_REPORT: &str = r#"{
	"input_i" : "-27.61",
	"input_tp" : "-4.47",
	"input_lra" : "18.06",
	"input_thresh" : "-39.20",
	"output_i" : "-24.58",
	"output_tp" : "-5.34",
	"output_lra" : "17.92",
	"output_thresh" : "-36.13",
	"normalization_type" : "dynamic",
	"target_offset" : "0.58"
}"#;

    #[test]
    fn default_filter_args() {
        let args = LoudnormOptions::new().filter_args();
        assert_eq!(args, "I=-24:LRA=7:tp=-2:print_format=json");
    }

    #[test]
    fn filter_args_with_all_options() {
        let args = LoudnormOptions::new()
            .integrated_target(-16.0)
            .loudness_range(11.0)
            .true_peak(-1.5)
            .offset(0.3)
            .linear(true)
            .dual_mono(true)
            .filter_args();
        assert_eq!(
            args,
            "I=-16:LRA=11:tp=-1.5:offset=0.3:linear=true:dual_mono=true:print_format=json"
        );
    }

    #[test]
    fn parses_sample_report() {
        let stats = LoudnormStats::from_json(SAMPLE_REPORT).unwrap();
        assert_eq!(stats.input_i, -27.61);
        assert_eq!(stats.input_tp, -4.47);
        assert_eq!(stats.input_lra, 18.06);
        assert_eq!(stats.input_thresh, -39.20);
        assert_eq!(stats.output_i, -24.58);
        assert_eq!(stats.normalization_type, "dynamic");
        assert_eq!(stats.target_offset, 0.58);
    }

    #[test]
    fn parses_infinite_values_from_silence() {
        // Silent input measures -inf LUFS; the filter prints it verbatim.
        let report = SAMPLE_REPORT.replace("-27.61", "-inf");
        let stats = LoudnormStats::from_json(&report).unwrap();
        assert!(stats.input_i.is_infinite() && stats.input_i < 0.0);
    }

    #[test]
    fn parse_rejects_missing_field() {
        let report = SAMPLE_REPORT.replace("\"target_offset\"", "\"other\"");
        let error = LoudnormStats::from_json(&report).unwrap_err();
        assert!(error.to_string().contains("target_offset"));
    }

    #[test]
    fn parse_rejects_non_numeric_field() {
        let report = SAMPLE_REPORT.replace("-27.61", "n/a");
        assert!(LoudnormStats::from_json(&report).is_err());
    }

    #[test]
    fn parse_accepts_surrounding_whitespace() {
        let padded = format!("\n{SAMPLE_REPORT}\n");
        assert!(LoudnormStats::from_json(&padded).is_ok());
    }
}
