//! `/etc/nologin` create/erase policy (§4.8, §8 invariant 5).

use std::{fs, io, path::Path};

pub const NOLOGIN_PATH: &str = "/etc/nologin";

/// True for the runlevels that should have `/etc/nologin` present.
pub fn requires_nologin(level: u8) -> bool {
    matches!(level, 0 | 1 | 6)
}

/// Idempotently create `path` if it does not already exist.
pub fn create(path: &Path) -> io::Result<()> {
    match fs::OpenOptions::new().write(true).create(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove `path` if present; absence is not an error.
pub fn erase(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Apply the policy for a transition from `prev` to `next`: create on entry
/// to a nologin-requiring level, erase on exit, leave untouched otherwise.
pub fn apply_transition(path: &Path, prev: u8, next: u8) {
    let was = requires_nologin(prev);
    let now = requires_nologin(next);
    if now && !was {
        if let Err(e) = create(path) {
            tracing::warn!("unable to create {:?}: {e}", path);
        }
    } else if was && !now {
        if let Err(e) = erase(path) {
            tracing::warn!("unable to remove {:?}: {e}", path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn entering_runlevel_one_creates_file() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        fs::remove_file(&path).unwrap();
        apply_transition(&path, 2, 1);
        assert!(path.exists());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn leaving_runlevel_zero_erases_file() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        apply_transition(&path, 0, 2);
        assert!(!path.exists());
    }

    #[test]
    fn transition_between_two_non_nologin_levels_is_untouched() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        apply_transition(&path, 2, 3);
        assert!(path.exists());
    }

    #[test]
    fn requires_nologin_matches_spec_levels() {
        assert!(requires_nologin(0));
        assert!(requires_nologin(1));
        assert!(requires_nologin(6));
        assert!(!requires_nologin(2));
        assert!(!requires_nologin(5));
    }
}
