//! Structured logging setup and the kernel-command-line debug switch.
//!
//! Mirrors the split the teacher keeps between "read `/proc/cmdline`" and
//! "decide what it means" (see `CmdlineArgs::parse_current`/`parse_inner` in
//! `ignited`), except the only decision this crate needs from the command
//! line is a single boolean.

use std::{
    fmt as stdfmt,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    fmt,
    fmt::{
        format::{Compact, Format, Full, Writer},
        time::SystemTime,
        FmtContext, FormatEvent, FormatFields,
    },
    registry::LookupSpan,
    EnvFilter,
};

/// Whether the logger has been switched to terse (shutdown) formatting.
/// `StateMachine` flips this on entry to runlevel 0/6 (§4.8); `TerseAwareFormat`
/// reads it on every event to pick which of its two formatters to use.
static TERSE: AtomicBool = AtomicBool::new(false);

/// Event formatter that delegates to a normal timestamped format or a
/// compact, timestamp-free one depending on `is_terse()`, so the runlevel
/// 0/6 "terse mode" switch (§1a, §4.8) actually changes what gets written
/// instead of flipping a flag nothing reads.
struct TerseAwareFormat {
    verbose: Format<Full, SystemTime>,
    terse: Format<Compact, ()>,
}

impl Default for TerseAwareFormat {
    fn default() -> Self {
        TerseAwareFormat {
            verbose: Format::default().with_target(false),
            terse: Format::default().with_target(false).compact().without_time(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for TerseAwareFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, writer: Writer<'_>, event: &Event<'_>) -> stdfmt::Result {
        if is_terse() {
            self.terse.format_event(ctx, writer, event)
        } else {
            self.verbose.format_event(ctx, writer, event)
        }
    }
}

/// Kernel/boot command-line inspection.
pub mod cmdline {
    use std::{fs, path::Path};

    /// The two tokens the original recognizes for enabling debug logging.
    const DEBUG_TOKENS: [&str; 2] = ["finit_debug", "--debug"];

    /// Returns true if `path` (normally `/proc/cmdline`) contains either
    /// `finit_debug` or `--debug` as a whitespace-delimited token.
    ///
    /// Takes a path so tests can point this at a fixture file instead of the
    /// real `/proc/cmdline`.
    pub fn debug_mode_enabled(path: &Path) -> bool {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return false,
        };
        contents
            .split_whitespace()
            .any(|tok| DEBUG_TOKENS.contains(&tok))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::io::Write;

        fn fixture(contents: &str) -> tempfile::NamedTempFile {
            let mut f = tempfile::NamedTempFile::new().unwrap();
            f.write_all(contents.as_bytes()).unwrap();
            f
        }

        #[test]
        fn no_debug_token() {
            let f = fixture("root=/dev/sda1 ro quiet");
            assert!(!debug_mode_enabled(f.path()));
        }

        #[test]
        fn finit_debug_token() {
            let f = fixture("root=/dev/sda1 finit_debug ro");
            assert!(debug_mode_enabled(f.path()));
        }

        #[test]
        fn dashdash_debug_token() {
            let f = fixture("root=/dev/sda1 --debug");
            assert!(debug_mode_enabled(f.path()));
        }

        #[test]
        fn missing_file_is_not_debug() {
            assert!(!debug_mode_enabled(Path::new(
                "/nonexistent/path/for/initcore/tests"
            )));
        }
    }
}

/// Initialize the global `tracing` subscriber.
///
/// `debug` raises the default filter from `info` to `debug`; an explicit
/// `RUST_LOG` environment variable still overrides either default, same as
/// any other `tracing-subscriber`-based binary.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .event_format(TerseAwareFormat::default())
        .init();
}

/// Switch to terse, timestamp-free formatting for the remainder of the
/// process. Irreversible: once a shutdown-class runlevel (0/6) is entered
/// there is no path back to `RUNNING` other than a fresh process.
pub fn set_terse(terse: bool) {
    TERSE.store(terse, Ordering::Relaxed);
}

/// Whether terse formatting is currently active.
pub fn is_terse() -> bool {
    TERSE.load(Ordering::Relaxed)
}

/// Resolve the effective debug flag by consulting `/proc/cmdline`.
pub fn debug_mode_from_proc_cmdline() -> bool {
    cmdline::debug_mode_enabled(Path::new("/proc/cmdline"))
}
