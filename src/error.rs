//! Recoverable CFG/SM error kinds.
//!
//! Every variant here is logged and absorbed by its caller (see §7 of
//! `SPEC_FULL.md`) — none of them ever unwind past the function that
//! discovered them. Fatal, OS-level setup failures (`Poll::new`, `Waker::new`,
//! ...) are not modeled here; those use `precisej_printable_errno` directly at
//! the call site, the same as in the teacher binary this crate is descended
//! from.

use std::path::PathBuf;
use thiserror::Error;

/// A directive-level parse problem. Parsing always continues at the next
/// line; the table being populated is left unchanged for the offending line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    #[error("unknown directive {keyword:?}")]
    UnknownDirective { keyword: String },

    #[error("malformed runlevel mask {raw:?}")]
    MalformedRunlevelMask { raw: String },

    #[error("rlimit directive {raw:?}: expected \"soft|hard <resource> <value>\"")]
    MalformedRlimit { raw: String },

    #[error("rlimit directive names unknown resource {resource:?}")]
    UnknownRlimitResource { resource: String },

    #[error("rlimit value {value:?} out of range [0, 2^32]")]
    RlimitValueOutOfRange { value: String },

    #[error("runlevel directive value {raw:?} is invalid, falling back to 2")]
    InvalidRunlevelDirective { raw: String },

    #[error("condition expression exceeds {capacity} byte capacity, ignoring")]
    ConditionTooLong { capacity: usize },

    #[error("inetd support is not compiled in, ignoring directive")]
    InetdUnsupported,
}

/// `include` named an absolute path that does not exist on disk.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("include path {0:?} does not exist")]
pub struct MissingInclude(pub PathBuf);

/// `include` named a non-absolute path; the directive is ignored outright.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("include path {0:?} is not absolute, ignoring")]
pub struct RelativeInclude(pub PathBuf);

/// A fragment-directory entry that could not be used: a dangling symlink or
/// an entry that could not be `stat`-ed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StaleFragment {
    #[error("{0:?} is a dangling symlink")]
    DanglingSymlink(PathBuf),

    #[error("{0:?} could not be inspected: {1}")]
    Unreadable(PathBuf, String),
}

/// One of the three `FSWatcher` slots (fragment directory, `available/`, main
/// file) could not be armed. Non-fatal: the remaining slots are independent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unable to watch {slot}: {reason}")]
pub struct WatcherUnavailable {
    pub slot: &'static str,
    pub reason: String,
}

/// The `ChangeSet` could not record an incoming event (allocation failure on
/// the underlying set). The watcher keeps running; only that one event is
/// dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unable to record change for {0:?}, dropping event")]
pub struct AllocationFailure(pub String);

/// Applying one resource-limit kind to the OS via `setrlimit(2)` failed.
/// Other kinds are still applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unable to apply {resource} rlimit: {reason}")]
pub struct OsRlimitApplyFailure {
    pub resource: &'static str,
    pub reason: String,
}

/// Umbrella type used where a single call site can hit more than one of the
/// above (e.g. the full dynamic-pass directive dispatcher). Each arm just
/// forwards `Display`/`Error` to the wrapped variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error(transparent)]
    Parse(#[from] ParseWarning),

    #[error(transparent)]
    MissingInclude(#[from] MissingInclude),

    #[error(transparent)]
    RelativeInclude(#[from] RelativeInclude),

    #[error(transparent)]
    StaleFragment(#[from] StaleFragment),

    #[error(transparent)]
    WatcherUnavailable(#[from] WatcherUnavailable),

    #[error(transparent)]
    AllocationFailure(#[from] AllocationFailure),

    #[error(transparent)]
    OsRlimitApplyFailure(#[from] OsRlimitApplyFailure),
}
