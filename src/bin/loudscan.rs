use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use serde_json::json;

use loudscan::{FfmpegLogLevel, LoudnormOptions, LoudnormStats, audio_streams};

const CLI_AFTER_HELP: &str = "Examples:\n  loudscan measure input.mp4\n  loudscan measure input.mkv --stream 2 --target -16 --json\n  loudscan streams input.mkv\n  loudscan completions zsh > _loudscan";

#[derive(Debug, Parser)]
#[command(
    name = "loudscan",
    version,
    about = "Measure EBU R128 loudness statistics via FFmpeg's loudnorm filter",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Measure loudness statistics for one audio stream.
    #[command(
        about = "Measure loudness statistics",
        after_help = "Examples:\n  loudscan measure input.mp4\n  loudscan measure input.mp4 --target -16 --true-peak -1.5 --json"
    )]
    Measure {
        /// Input media path or URL.
        input: String,

        /// Container stream index to analyze (defaults to the best audio stream).
        #[arg(long)]
        stream: Option<usize>,

        /// Integrated loudness target in LUFS.
        #[arg(long, allow_hyphen_values = true)]
        target: Option<f64>,

        /// Loudness range target in LU.
        #[arg(long)]
        lra: Option<f64>,

        /// Maximum true peak in dBTP.
        #[arg(long, allow_hyphen_values = true)]
        true_peak: Option<f64>,

        /// Offset gain in LU.
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<f64>,

        /// Request linear (single-gain) normalization.
        #[arg(long)]
        linear: bool,

        /// Treat mono input as dual-mono.
        #[arg(long)]
        dual_mono: bool,

        /// Capture timeout in seconds.
        #[arg(long)]
        timeout: Option<f64>,

        /// Output statistics as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// List audio streams in a media file (alias: probe).
    #[command(
        about = "List audio streams",
        visible_alias = "probe",
        after_help = "Examples:\n  loudscan streams input.mkv\n  loudscan streams input.mkv --json"
    )]
    Streams {
        /// Input media path or URL.
        input: String,

        /// Output the stream list as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "panic" => Some(FfmpegLogLevel::Panic),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "verbose" => Some(FfmpegLogLevel::Verbose),
        "debug" => Some(FfmpegLogLevel::Debug),
        "trace" => Some(FfmpegLogLevel::Trace),
        _ => None,
    }
}

fn build_options(
    target: Option<f64>,
    lra: Option<f64>,
    true_peak: Option<f64>,
    offset: Option<f64>,
    linear: bool,
    dual_mono: bool,
    timeout: Option<f64>,
) -> Result<LoudnormOptions, Box<dyn std::error::Error>> {
    let mut options = LoudnormOptions::new();

    if let Some(target) = target {
        options = options.integrated_target(target);
    }
    if let Some(lra) = lra {
        options = options.loudness_range(lra);
    }
    if let Some(true_peak) = true_peak {
        options = options.true_peak(true_peak);
    }
    if let Some(offset) = offset {
        options = options.offset(offset);
    }
    if linear {
        options = options.linear(true);
    }
    if dual_mono {
        options = options.dual_mono(true);
    }
    if let Some(seconds) = timeout {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(format!("--timeout must be a positive number of seconds: {seconds}").into());
        }
        options = options.capture_timeout(Duration::from_secs_f64(seconds));
    }

    Ok(options)
}

fn print_stats(stats: &LoudnormStats) {
    println!("{}", "Measured input".bold());
    println!("  Integrated loudness: {:>8.2} LUFS", stats.input_i);
    println!("  Loudness range:      {:>8.2} LU", stats.input_lra);
    println!("  True peak:           {:>8.2} dBTP", stats.input_tp);
    println!("  Threshold:           {:>8.2} LUFS", stats.input_thresh);
    println!("{}", "Normalized output".bold());
    println!("  Integrated loudness: {:>8.2} LUFS", stats.output_i);
    println!("  Loudness range:      {:>8.2} LU", stats.output_lra);
    println!("  True peak:           {:>8.2} dBTP", stats.output_tp);
    println!("  Threshold:           {:>8.2} LUFS", stats.output_thresh);
    println!("Normalization: {}", stats.normalization_type);
    println!("Target offset: {:.2} LU", stats.target_offset);
}

fn stats_payload(stats: &LoudnormStats) -> serde_json::Value {
    json!({
        "input_i": stats.input_i,
        "input_tp": stats.input_tp,
        "input_lra": stats.input_lra,
        "input_thresh": stats.input_thresh,
        "output_i": stats.output_i,
        "output_tp": stats.output_tp,
        "output_lra": stats.output_lra,
        "output_thresh": stats.output_thresh,
        "normalization_type": stats.normalization_type,
        "target_offset": stats.target_offset,
    })
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(level) = &cli.global.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        loudscan::set_ffmpeg_log_level(parsed);
    }

    match cli.command {
        Commands::Measure {
            input,
            stream,
            target,
            lra,
            true_peak,
            offset,
            linear,
            dual_mono,
            timeout,
            json,
        } => {
            let options = build_options(target, lra, true_peak, offset, linear, dual_mono, timeout)?;

            let stats = match stream {
                Some(stream_index) => {
                    loudscan::measure_file_stream(&input, stream_index, &options)?
                }
                None => loudscan::measure_file(&input, &options)?,
            };

            let Some(stats) = stats else {
                return Err(
                    "no loudness statistics were produced (no decodable audio reached the filter)"
                        .into(),
                );
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&stats_payload(&stats))?);
            } else {
                println!("Loudness analysis for: {input}");
                print_stats(&stats);
            }
        }
        Commands::Streams { input, json } => {
            let streams = audio_streams(&input)?;

            if json {
                let payload: Vec<serde_json::Value> = streams
                    .iter()
                    .map(|stream| {
                        json!({
                            "index": stream.stream_index,
                            "codec": stream.codec,
                            "sample_rate": stream.sample_rate,
                            "channels": stream.channels,
                            "channel_layout": stream.channel_layout,
                            "duration_seconds": stream.duration.map(|d| d.as_secs_f64()),
                            "language": stream.language,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else if streams.is_empty() {
                println!("No audio streams found in {input}");
            } else {
                for stream in &streams {
                    let language = stream.language.as_deref().unwrap_or("und");
                    let duration = stream
                        .duration
                        .map(|d| format!("{:.2}s", d.as_secs_f64()))
                        .unwrap_or_else(|| "unknown".to_string());
                    println!(
                        "{} #{}: {} {} Hz, {} ({} ch) lang={} duration={}",
                        "stream".cyan().bold(),
                        stream.stream_index,
                        stream.codec,
                        stream.sample_rate,
                        stream.channel_layout,
                        stream.channels,
                        language,
                        duration,
                    );
                }
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "loudscan", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{build_options, parse_log_level};

    #[test]
    fn parse_log_level_aliases() {
        assert!(parse_log_level("quiet").is_some());
        assert!(parse_log_level("WARN").is_some());
        assert!(parse_log_level("warning").is_some());
        assert!(parse_log_level("trace").is_some());
        assert!(parse_log_level("loud").is_none());
    }

    #[test]
    fn build_options_renders_overrides() {
        let options =
            build_options(Some(-16.0), Some(11.0), Some(-1.5), None, true, false, None).unwrap();
        assert_eq!(
            options.filter_args(),
            "I=-16:LRA=11:tp=-1.5:linear=true:print_format=json"
        );
    }

    #[test]
    fn build_options_rejects_bad_timeout() {
        assert!(build_options(None, None, None, None, false, false, Some(0.0)).is_err());
        assert!(build_options(None, None, None, None, false, false, Some(-3.0)).is_err());
    }
}
