//! The set of fragment basenames touched since the last reload (§4.6, §8
//! invariants 2–3).

use std::{collections::HashSet, path::Path};

/// The kind of filesystem event a watcher slot observed, already reduced to
/// the handful of outcomes `ChangeSet::record` cares about. `FSWatcher`
/// translates the richer event kinds it watches for (§4.7: `create, delete,
/// modify, attrib, move`) down to this before calling `record`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    /// create, modify, attrib, or the "moved in" half of a rename.
    Upserted,
    /// delete, or the "moved out" half of a rename.
    Removed,
}

/// The set of fragment basenames whose on-disk representation has changed
/// since the last successful `conf_reload`.
///
/// A condition-tracking subsystem (out of scope here) would consult this
/// same struct through `has`/`any` if it needed to know which fragments
/// changed; no separate API is added for it (see `SPEC_FULL.md` §2a).
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    entries: HashSet<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event for `name` (a basename, not a full path).
    ///
    /// `Removed` erases the entry (if present); any other event idempotently
    /// inserts it.
    pub fn record(&mut self, name: impl Into<String>, event: ChangeEvent) {
        let name = name.into();
        match event {
            ChangeEvent::Removed => {
                self.entries.remove(&name);
            }
            ChangeEvent::Upserted => {
                self.entries.insert(name);
            }
        }
    }

    /// Whether `path`'s basename is a member. Depends only on the basename
    /// (§8 invariant 3), so a caller may pass either a bare filename or a
    /// full path.
    pub fn has(&self, path: impl AsRef<Path>) -> bool {
        match basename(path.as_ref()) {
            Some(name) => self.entries.contains(&name),
            None => false,
        }
    }

    /// Whether the set is non-empty.
    pub fn any(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Clear the set, freeing its storage (§4.6, §5 "Shared resources").
    pub fn drop_all(&mut self) {
        self.entries.clear();
        self.entries.shrink_to_fit();
    }
}

fn basename(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Helper mirroring the spec's `conf_changed(p)` free function: depends only
/// on `p`'s basename, regardless of the directory component.
pub fn conf_changed(set: &ChangeSet, path: impl AsRef<Path>) -> bool {
    set.has(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_erases_entry() {
        let mut cs = ChangeSet::new();
        cs.record("foo.conf", ChangeEvent::Upserted);
        cs.record("foo.conf", ChangeEvent::Removed);
        assert!(!cs.has("foo.conf"));
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut cs = ChangeSet::new();
        cs.record("foo.conf", ChangeEvent::Upserted);
        cs.record("foo.conf", ChangeEvent::Upserted);
        assert!(cs.any());
        assert!(cs.has("foo.conf"));
    }

    #[test]
    fn final_set_reflects_last_event_only() {
        let mut cs = ChangeSet::new();
        cs.record("a.conf", ChangeEvent::Upserted);
        cs.record("b.conf", ChangeEvent::Upserted);
        cs.record("a.conf", ChangeEvent::Removed);
        assert!(!cs.has("a.conf"));
        assert!(cs.has("b.conf"));
    }

    #[test]
    fn has_depends_only_on_basename() {
        let mut cs = ChangeSet::new();
        cs.record("foo.conf", ChangeEvent::Upserted);
        assert!(conf_changed(&cs, "/etc/initcored/config.d/foo.conf"));
        assert!(conf_changed(&cs, "foo.conf"));
    }

    #[test]
    fn drop_all_clears_everything() {
        let mut cs = ChangeSet::new();
        cs.record("foo.conf", ChangeEvent::Upserted);
        cs.drop_all();
        assert!(!cs.any());
        assert!(!cs.has("foo.conf"));
    }

    #[test]
    fn removing_absent_entry_is_a_no_op() {
        let mut cs = ChangeSet::new();
        cs.record("foo.conf", ChangeEvent::Removed);
        assert!(!cs.any());
    }
}
