//! Statistics capture through FFmpeg's logging hook.
//!
//! The `loudnorm` filter has no return-value API for its final report: it
//! prints the summary through `av_log` while the filter graph is torn down.
//! This module smuggles that text out. [`StatsCapture`] is a one-shot
//! producer/consumer cell (mutex + condvar), created fresh for every
//! measurement; [`LogHookGuard`] installs a process-wide log callback that
//! delivers the first brace-bearing log line into the registered cell, and
//! restores FFmpeg's default logging on drop.
//!
//! `av_log_set_callback` is a single global function pointer with no slot
//! for caller context, so the registered cell lives in a global holder and
//! measurements are serialized behind a process-wide lock for the lifetime
//! of the hook installation. At most one measurement is in flight at a
//! time; concurrent callers queue on the lock rather than racing on the
//! hook.

use std::ffi::CStr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};

/// Upper bound on captured statistics text, in bytes.
///
/// The loudnorm JSON report is ~300 bytes; this matches the line buffer
/// used when formatting log messages.
pub(crate) const MAX_STATS_LEN: usize = 2048;

/// Serializes hook installation (and therefore whole measurements).
static HOOK_GATE: Mutex<()> = Mutex::new(());

/// The cell the log callback delivers into. `None` outside a measurement.
static ACTIVE_CAPTURE: Mutex<Option<Arc<StatsCapture>>> = Mutex::new(None);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct CaptureState {
    captured: bool,
    text: String,
}

/// One-shot handoff cell for a single measurement's statistics text.
///
/// The producer is the log callback (invoked from whatever thread FFmpeg
/// logs from); the consumer is the measuring thread waiting in
/// [`StatsCapture::wait`]. Exactly one delivery is meaningful per cell:
/// the first [`offer`](StatsCapture::offer) latches, later offers are
/// ignored.
pub(crate) struct StatsCapture {
    state: Mutex<CaptureState>,
    delivered: Condvar,
}

impl StatsCapture {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CaptureState::default()),
            delivered: Condvar::new(),
        })
    }

    /// Producer side: deliver a statistics line, truncated to
    /// [`MAX_STATS_LEN`] bytes on a character boundary. First match wins.
    pub(crate) fn offer(&self, line: &str) {
        let mut state = lock(&self.state);
        if state.captured {
            return;
        }

        let mut end = line.len().min(MAX_STATS_LEN);
        while !line.is_char_boundary(end) {
            end -= 1;
        }

        state.text = line[..end].to_owned();
        state.captured = true;
        self.delivered.notify_all();
    }

    /// Consumer side: block until a line has been delivered or `timeout`
    /// elapses. Spurious wakeups re-check the flag against a fixed
    /// deadline, so the wait never exceeds `timeout` by more than
    /// scheduling slack.
    pub(crate) fn wait(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);

        while !state.captured {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return None;
            };
            let (next, _timed_out) = self
                .delivered
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }

        Some(state.text.clone())
    }
}

/// Scoped installation of the statistics-capturing log callback.
///
/// Holds the process-wide measurement lock for its entire lifetime, so
/// constructing a second guard blocks until the first is dropped. On drop
/// the default FFmpeg log callback and the previously set log level are
/// restored, so interception never leaks into unrelated later use of the
/// libraries.
pub(crate) struct LogHookGuard {
    saved_level: Option<FfmpegLogLevel>,
    _serialized: MutexGuard<'static, ()>,
}

impl LogHookGuard {
    /// Install the capture callback and register `capture` as its target.
    ///
    /// Blocks while another measurement is in flight.
    pub(crate) fn install(capture: &Arc<StatsCapture>) -> Self {
        let serialized = HOOK_GATE.lock().unwrap_or_else(PoisonError::into_inner);
        let saved_level = get_ffmpeg_log_level();

        *lock(&ACTIVE_CAPTURE) = Some(Arc::clone(capture));
        unsafe {
            ffmpeg_sys_next::av_log_set_callback(Some(capture_log_line));
        }

        Self {
            saved_level,
            _serialized: serialized,
        }
    }
}

impl Drop for LogHookGuard {
    fn drop(&mut self) {
        unsafe {
            ffmpeg_sys_next::av_log_set_callback(Some(ffmpeg_sys_next::av_log_default_callback));
        }
        *lock(&ACTIVE_CAPTURE) = None;

        if let Some(level) = self.saved_level {
            set_ffmpeg_log_level(level);
        }
    }
}

// `va_list` is ABI-specific; these mirror the Rust standard library's
// platform matrix (std::ffi::VaListImpl) so the callback signature matches
// what `av_log_set_callback` expects on each target.

#[cfg(any(
    all(
        not(target_arch = "aarch64"),
        not(target_arch = "powerpc"),
        not(target_arch = "s390x"),
        not(target_arch = "x86_64")
    ),
    all(target_arch = "aarch64", target_vendor = "apple"),
    target_family = "wasm",
    target_os = "uefi",
    windows,
))]
type VaListType = *mut libc::c_char;

#[cfg(all(target_arch = "x86_64", not(target_os = "uefi"), not(windows)))]
type VaListType = *mut ffmpeg_sys_next::__va_list_tag;

#[cfg(all(
    target_arch = "aarch64",
    not(target_vendor = "apple"),
    not(target_os = "uefi"),
    not(windows),
))]
type VaListType = *mut libc::c_void;

#[cfg(all(target_arch = "powerpc", not(target_os = "uefi"), not(windows)))]
type VaListType = *mut ffmpeg_sys_next::__va_list_tag_powerpc;

#[cfg(target_arch = "s390x")]
type VaListType = *mut ffmpeg_sys_next::__va_list_tag_s390x;

/// Log callback installed for the duration of a measurement.
///
/// Formats the message the same way FFmpeg's default callback would, then
/// scans it for an opening brace. The tail of the first matching line is
/// delivered to the registered capture cell. Must never panic: it is
/// called across an FFI boundary from arbitrary FFmpeg threads.
unsafe extern "C" fn capture_log_line(
    ptr: *mut libc::c_void,
    level: libc::c_int,
    fmt: *const libc::c_char,
    vl: VaListType,
) {
    // loudnorm prints its report at info severity; decoder warnings and
    // verbose/debug chatter must not latch the one-shot cell.
    if level != ffmpeg_sys_next::AV_LOG_INFO {
        return;
    }

    let mut line = [0u8; MAX_STATS_LEN];
    let mut print_prefix: libc::c_int = 1;

    unsafe {
        ffmpeg_sys_next::av_log_format_line(
            ptr,
            level,
            fmt,
            vl,
            line.as_mut_ptr() as *mut libc::c_char,
            line.len() as libc::c_int,
            &mut print_prefix,
        );
    }

    let message = unsafe { CStr::from_ptr(line.as_ptr() as *const libc::c_char) };
    let Ok(message) = message.to_str() else {
        return;
    };
    let Some(brace) = message.find('{') else {
        return;
    };

    let capture = lock(&ACTIVE_CAPTURE).clone();
    if let Some(capture) = capture {
        capture.offer(&message[brace..]);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{MAX_STATS_LEN, StatsCapture};

    #[test]
    fn delivers_offered_line_to_waiter() {
        let capture = StatsCapture::new();
        let producer = {
            let capture = capture.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                capture.offer("{\"input_i\" : \"-23.01\"}");
            })
        };

        let text = capture.wait(Duration::from_secs(2));
        producer.join().unwrap();

        assert_eq!(text.as_deref(), Some("{\"input_i\" : \"-23.01\"}"));
    }

    #[test]
    fn wait_times_out_without_delivery() {
        let capture = StatsCapture::new();
        let started = Instant::now();

        let text = capture.wait(Duration::from_millis(100));

        assert!(text.is_none());
        assert!(
            started.elapsed() >= Duration::from_millis(100),
            "wait returned before the deadline: {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn first_offer_wins() {
        let capture = StatsCapture::new();
        capture.offer("{\"first\": true}");
        capture.offer("{\"second\": true}");

        let text = capture.wait(Duration::from_millis(10));
        assert_eq!(text.as_deref(), Some("{\"first\": true}"));
    }

    #[test]
    fn offer_after_wait_is_still_readable() {
        // The flush path usually delivers before the consumer starts
        // waiting; the wait must return immediately in that case.
        let capture = StatsCapture::new();
        capture.offer("{}");

        let started = Instant::now();
        let text = capture.wait(Duration::from_secs(5));

        assert_eq!(text.as_deref(), Some("{}"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn oversized_line_is_truncated() {
        let capture = StatsCapture::new();
        let line = format!("{{{}", "x".repeat(MAX_STATS_LEN * 2));
        capture.offer(&line);

        let text = capture.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(text.len(), MAX_STATS_LEN);
    }

    #[test]
    fn cells_are_independent_across_calls() {
        let first = StatsCapture::new();
        first.offer("{\"call\": 1}");
        assert_eq!(
            first.wait(Duration::from_millis(10)).as_deref(),
            Some("{\"call\": 1}")
        );

        // A fresh cell never observes the previous call's text.
        let second = StatsCapture::new();
        assert!(second.wait(Duration::from_millis(50)).is_none());
    }
}
