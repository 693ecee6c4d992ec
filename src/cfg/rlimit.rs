//! Resource-limit parsing and the global/per-fragment rlimit tables (§4.3,
//! §3 `ResourceLimit`/`GlobalRlimits`).

use crate::error::{OsRlimitApplyFailure, ParseWarning};
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use std::collections::BTreeMap;

/// The closed enumeration of resource kinds this core understands. `Rttime`
/// is marked optional in the spec (it does not exist on every platform
/// `nix` targets); it is still part of the enum so the directive grammar
/// doesn't change across platforms, but applying it to the OS is a no-op
/// where the platform lacks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RlimitKind {
    As,
    Core,
    Cpu,
    Data,
    Fsize,
    Locks,
    Memlock,
    Msgqueue,
    Nice,
    Nofile,
    Nproc,
    Rss,
    Rtprio,
    Rttime,
    Sigpending,
    Stack,
}

impl RlimitKind {
    /// All kinds, in a stable order used when iterating the table to apply
    /// it to the OS (§4.5 step 5: "warn per failed kind" implies a
    /// deterministic iteration order for reproducible logs).
    pub const ALL: [RlimitKind; 16] = [
        RlimitKind::As,
        RlimitKind::Core,
        RlimitKind::Cpu,
        RlimitKind::Data,
        RlimitKind::Fsize,
        RlimitKind::Locks,
        RlimitKind::Memlock,
        RlimitKind::Msgqueue,
        RlimitKind::Nice,
        RlimitKind::Nofile,
        RlimitKind::Nproc,
        RlimitKind::Rss,
        RlimitKind::Rtprio,
        RlimitKind::Rttime,
        RlimitKind::Sigpending,
        RlimitKind::Stack,
    ];

    /// Case-sensitive name as it appears in a `rlimit` directive.
    pub fn name(&self) -> &'static str {
        match self {
            RlimitKind::As => "as",
            RlimitKind::Core => "core",
            RlimitKind::Cpu => "cpu",
            RlimitKind::Data => "data",
            RlimitKind::Fsize => "fsize",
            RlimitKind::Locks => "locks",
            RlimitKind::Memlock => "memlock",
            RlimitKind::Msgqueue => "msgqueue",
            RlimitKind::Nice => "nice",
            RlimitKind::Nofile => "nofile",
            RlimitKind::Nproc => "nproc",
            RlimitKind::Rss => "rss",
            RlimitKind::Rtprio => "rtprio",
            RlimitKind::Rttime => "rttime",
            RlimitKind::Sigpending => "sigpending",
            RlimitKind::Stack => "stack",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        RlimitKind::ALL.into_iter().find(|k| k.name() == name)
    }

    /// The `nix` resource this kind maps to, where the current platform has
    /// one. `Rttime` is Linux-only in `nix`; on platforms without it this
    /// returns `None` and the kind is tracked but never applied to the OS.
    #[cfg(target_os = "linux")]
    fn to_nix(self) -> Resource {
        match self {
            RlimitKind::As => Resource::RLIMIT_AS,
            RlimitKind::Core => Resource::RLIMIT_CORE,
            RlimitKind::Cpu => Resource::RLIMIT_CPU,
            RlimitKind::Data => Resource::RLIMIT_DATA,
            RlimitKind::Fsize => Resource::RLIMIT_FSIZE,
            RlimitKind::Locks => Resource::RLIMIT_LOCKS,
            RlimitKind::Memlock => Resource::RLIMIT_MEMLOCK,
            RlimitKind::Msgqueue => Resource::RLIMIT_MSGQUEUE,
            RlimitKind::Nice => Resource::RLIMIT_NICE,
            RlimitKind::Nofile => Resource::RLIMIT_NOFILE,
            RlimitKind::Nproc => Resource::RLIMIT_NPROC,
            RlimitKind::Rss => Resource::RLIMIT_RSS,
            RlimitKind::Rtprio => Resource::RLIMIT_RTPRIO,
            RlimitKind::Rttime => Resource::RLIMIT_RTTIME,
            RlimitKind::Sigpending => Resource::RLIMIT_SIGPENDING,
            RlimitKind::Stack => Resource::RLIMIT_STACK,
        }
    }
}

/// The upper bound the original C source encodes as `(long long)2 << 31`,
/// i.e. 2^32. Preserved literally per the open question in `SPEC_FULL.md`
/// §9 rather than "corrected" to `u32::MAX`.
pub const RLIMIT_MAX_VALUE: u64 = 1u64 << 32;

/// A resource-limit value: either a concrete byte/count value in
/// `[0, 2^32]`, or the `unlimited`/`infinity` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlimitValue {
    Value(u64),
    Unlimited,
}

impl RlimitValue {
    fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("unlimited") || token.eq_ignore_ascii_case("infinity") {
            return Some(RlimitValue::Unlimited);
        }
        let v: u64 = token.parse().ok()?;
        (v <= RLIMIT_MAX_VALUE).then_some(RlimitValue::Value(v))
    }

    #[cfg(target_os = "linux")]
    fn to_nix(self) -> u64 {
        match self {
            RlimitValue::Value(v) => v,
            RlimitValue::Unlimited => nix::libc::RLIM_INFINITY as u64,
        }
    }
}

/// `{soft, hard}` for one resource kind (§3 `ResourceLimit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceLimit {
    pub soft: Option<RlimitValue>,
    pub hard: Option<RlimitValue>,
}

/// The process-wide rlimit table, seeded from the OS at each full reload and
/// mutated by `rlimit` directives (§3 `GlobalRlimits`). A per-fragment
/// working copy is just a `.clone()` of this (it derives `Clone`).
#[derive(Debug, Clone, Default)]
pub struct GlobalRlimits {
    table: BTreeMap<RlimitKind, ResourceLimit>,
}

impl GlobalRlimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: RlimitKind) -> ResourceLimit {
        self.table.get(&kind).copied().unwrap_or_default()
    }

    /// Snapshot the OS's current limits into `self`, overwriting whatever
    /// was there (§4.5 step 2: "Snapshot OS resource limits into the
    /// globals").
    #[cfg(target_os = "linux")]
    pub fn snapshot_from_os(&mut self) {
        for kind in RlimitKind::ALL {
            if let Ok((soft, hard)) = getrlimit(kind.to_nix()) {
                self.table.insert(
                    kind,
                    ResourceLimit {
                        soft: Some(from_nix_value(soft)),
                        hard: Some(from_nix_value(hard)),
                    },
                );
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn snapshot_from_os(&mut self) {}

    /// Apply every entry of `self` to the OS via `setrlimit(2)`, collecting
    /// one `OsRlimitApplyFailure` per resource that could not be applied.
    /// Other resources are still attempted (§4.5 step 5).
    #[cfg(target_os = "linux")]
    pub fn apply_to_os(&self) -> Vec<OsRlimitApplyFailure> {
        let mut failures = Vec::new();
        for (&kind, limit) in &self.table {
            let Some(soft) = limit.soft else { continue };
            let Some(hard) = limit.hard else { continue };
            if let Err(e) = setrlimit(kind.to_nix(), soft.to_nix(), hard.to_nix()) {
                failures.push(OsRlimitApplyFailure {
                    resource: kind.name(),
                    reason: e.to_string(),
                });
            }
        }
        failures
    }

    #[cfg(not(target_os = "linux"))]
    pub fn apply_to_os(&self) -> Vec<OsRlimitApplyFailure> {
        Vec::new()
    }

    /// Parse `soft|hard <resource> <value>` and mutate `self` in place. On
    /// any failure, returns the `ParseWarning` and leaves `self` unchanged
    /// (§4.3).
    pub fn apply_directive(&mut self, argument: &str) -> Result<(), ParseWarning> {
        let mut parts = argument.split_whitespace();
        let (level, resource, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(l), Some(r), Some(v)) => (l, r, v),
            _ => {
                return Err(ParseWarning::MalformedRlimit {
                    raw: argument.to_string(),
                })
            }
        };

        if level != "soft" && level != "hard" {
            return Err(ParseWarning::MalformedRlimit {
                raw: argument.to_string(),
            });
        }

        let kind = RlimitKind::from_name(resource).ok_or_else(|| ParseWarning::UnknownRlimitResource {
            resource: resource.to_string(),
        })?;
        let parsed = RlimitValue::parse(value).ok_or_else(|| ParseWarning::RlimitValueOutOfRange {
            value: value.to_string(),
        })?;

        let entry = self.table.entry(kind).or_default();
        match level {
            "soft" => entry.soft = Some(parsed),
            "hard" => entry.hard = Some(parsed),
            _ => unreachable!("validated above"),
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn from_nix_value(raw: u64) -> RlimitValue {
    if raw == nix::libc::RLIM_INFINITY as u64 {
        RlimitValue::Unlimited
    } else {
        RlimitValue::Value(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_unlimited_sets_sentinel() {
        let mut g = GlobalRlimits::new();
        g.apply_directive("soft nofile unlimited").unwrap();
        assert_eq!(g.get(RlimitKind::Nofile).soft, Some(RlimitValue::Unlimited));
        assert_eq!(g.get(RlimitKind::Nofile).hard, None);
    }

    #[test]
    fn hard_numeric_value() {
        let mut g = GlobalRlimits::new();
        g.apply_directive("hard nofile 4096").unwrap();
        assert_eq!(
            g.get(RlimitKind::Nofile).hard,
            Some(RlimitValue::Value(4096))
        );
    }

    #[test]
    fn infinity_synonym() {
        let mut g = GlobalRlimits::new();
        g.apply_directive("soft core infinity").unwrap();
        assert_eq!(g.get(RlimitKind::Core).soft, Some(RlimitValue::Unlimited));
    }

    #[test]
    fn unknown_resource_warns_and_leaves_table_unchanged() {
        let mut g = GlobalRlimits::new();
        let err = g.apply_directive("soft frobnicate 10").unwrap_err();
        assert!(matches!(err, ParseWarning::UnknownRlimitResource { .. }));
        assert_eq!(g.get(RlimitKind::Nofile), ResourceLimit::default());
    }

    #[test]
    fn bad_level_token_warns() {
        let mut g = GlobalRlimits::new();
        let err = g.apply_directive("medium nofile 10").unwrap_err();
        assert!(matches!(err, ParseWarning::MalformedRlimit { .. }));
    }

    #[test]
    fn value_above_max_is_rejected() {
        let mut g = GlobalRlimits::new();
        let too_big = (RLIMIT_MAX_VALUE + 1).to_string();
        let err = g.apply_directive(&format!("soft nofile {too_big}")).unwrap_err();
        assert!(matches!(err, ParseWarning::RlimitValueOutOfRange { .. }));
    }

    #[test]
    fn value_exactly_at_max_is_accepted() {
        let mut g = GlobalRlimits::new();
        g.apply_directive(&format!("soft nofile {RLIMIT_MAX_VALUE}"))
            .unwrap();
        assert_eq!(
            g.get(RlimitKind::Nofile).soft,
            Some(RlimitValue::Value(RLIMIT_MAX_VALUE))
        );
    }

    #[test]
    fn too_few_tokens_is_malformed() {
        let mut g = GlobalRlimits::new();
        let err = g.apply_directive("soft nofile").unwrap_err();
        assert!(matches!(err, ParseWarning::MalformedRlimit { .. }));
    }

    #[test]
    fn clone_derives_independent_working_copy() {
        let mut g = GlobalRlimits::new();
        g.apply_directive("soft nofile 1024").unwrap();
        let mut clone = g.clone();
        clone.apply_directive("soft nofile 2048").unwrap();
        assert_eq!(g.get(RlimitKind::Nofile).soft, Some(RlimitValue::Value(1024)));
        assert_eq!(
            clone.get(RlimitKind::Nofile).soft,
            Some(RlimitValue::Value(2048))
        );
    }
}
