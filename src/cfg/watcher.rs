//! Filesystem watching for the three config surfaces (§4.7).
//!
//! Follows the same shape as the teacher's `UdevListener`/`SysfsWalker`: a
//! dedicated background thread owns the OS-level watch and a small private
//! `mio::Poll` used only to receive a stop wakeup; normalized events are
//! forwarded to the single-threaded event loop over a channel and the
//! caller is woken through the shared `main_waker`. The `ChangeSet` itself
//! is still only ever mutated from the main thread (§5).

use crate::{
    cfg::changeset::{ChangeEvent, ChangeSet},
    common::ThreadHandle,
    error::WatcherUnavailable,
};
use mio::{Events, Poll, Token, Waker};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::{
    path::{Path, PathBuf},
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc,
    },
    thread,
};

/// Internal token the watcher thread's private `Poll` waits on before
/// exiting.
const WATCHER_THREAD_STOP_TOKEN: Token = Token(30);

/// Which of the three slots an event came from (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchSlot {
    /// The `*.conf` fragment directory. Symlinks inside it are followed.
    Fragments,
    /// The optional `available/` subdirectory. Symlinks inside it are *not*
    /// followed — symlink mutation there is itself an observable event
    /// (§4.7, §9 open question).
    Available,
    /// The single main configuration file.
    MainFile,
}

/// One normalized event ready to be folded into a `ChangeSet`.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub slot: WatchSlot,
    pub basename: String,
    pub change: ChangeEvent,
}

struct SlotTarget {
    slot: WatchSlot,
    path: PathBuf,
    is_dir: bool,
}

/// The three-slot filesystem watcher.
pub struct FSWatcher {
    thread: Option<ThreadHandle>,
    events_rx: Receiver<WatchEvent>,
    // Kept alive only to document ownership; the watcher itself lives on the
    // background thread and is dropped (unwatching everything) when that
    // thread exits.
    _marker: (),
}

impl FSWatcher {
    /// Arm whichever of the three slots exist on disk. A missing target is
    /// not an error (§4.7); a target that exists but cannot be watched
    /// (permissions, OS resource exhaustion, ...) yields one
    /// `WatcherUnavailable` per slot, returned alongside the (possibly
    /// partially armed) watcher.
    pub fn arm(
        main_waker: &Arc<Waker>,
        fragment_dir: &Path,
        available_dir: Option<&Path>,
        main_file: &Path,
    ) -> (Self, Vec<WatcherUnavailable>) {
        let (events_tx, events_rx) = channel::<WatchEvent>();
        let (setup_tx, setup_rx) =
            channel::<(Arc<Waker>, Vec<WatcherUnavailable>)>();

        let main_waker_cl = Arc::clone(main_waker);
        let fragment_dir = fragment_dir.to_path_buf();
        let available_dir = available_dir.map(|p| p.to_path_buf());
        let main_file = main_file.to_path_buf();

        let join_t = thread::spawn(move || {
            run(
                main_waker_cl,
                fragment_dir,
                available_dir,
                main_file,
                events_tx,
                setup_tx,
            )
        });

        let (stop_waker, failures) = setup_rx
            .recv()
            .expect("fswatcher thread dropped setup channel before reporting readiness");

        let thread = ThreadHandle::new("fswatcher", join_t, stop_waker);

        (
            FSWatcher {
                thread: Some(thread),
                events_rx,
                _marker: (),
            },
            failures,
        )
    }

    /// Drain every event received so far into `changeset`, in arrival order
    /// (§5: "ChangeSet mutations are applied in the order events arrive").
    pub fn drain_into(&self, changeset: &mut ChangeSet) {
        while let Ok(ev) = self.events_rx.try_recv() {
            changeset.record(ev.basename, ev.change);
        }
    }

    /// Stop the watcher thread and unwatch everything.
    pub fn stop(&mut self) {
        if let Some(t) = self.thread.take() {
            t.join_now();
        }
    }
}

impl Drop for FSWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    main_waker: Arc<Waker>,
    fragment_dir: PathBuf,
    available_dir: Option<PathBuf>,
    main_file: PathBuf,
    events_tx: Sender<WatchEvent>,
    setup_tx: Sender<(Arc<Waker>, Vec<WatcherUnavailable>)>,
) {
    let mut poll = match Poll::new() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("fswatcher: unable to create stop-poll: {e}");
            return;
        }
    };
    let stop_waker = match Waker::new(poll.registry(), WATCHER_THREAD_STOP_TOKEN) {
        Ok(w) => Arc::new(w),
        Err(e) => {
            tracing::error!("fswatcher: unable to create stop waker: {e}");
            return;
        }
    };

    let mut targets = Vec::new();
    if fragment_dir.is_dir() {
        targets.push(SlotTarget {
            slot: WatchSlot::Fragments,
            path: fragment_dir.clone(),
            is_dir: true,
        });
    }
    if let Some(ref dir) = available_dir {
        if dir.exists() {
            targets.push(SlotTarget {
                slot: WatchSlot::Available,
                path: dir.clone(),
                is_dir: true,
            });
        }
    }
    if main_file.is_file() {
        targets.push(SlotTarget {
            slot: WatchSlot::MainFile,
            path: main_file.clone(),
            is_dir: false,
        });
    }

    let mut failures = Vec::new();
    let watch_targets: Vec<SlotTarget> = targets
        .into_iter()
        .map(|t| SlotTarget {
            slot: t.slot,
            path: t.path,
            is_dir: t.is_dir,
        })
        .collect();

    let watcher_result = build_watcher(&events_tx, &main_waker, &watch_targets);
    let mut watcher = match watcher_result {
        Ok(w) => Some(w),
        Err(e) => {
            for t in &watch_targets {
                failures.push(WatcherUnavailable {
                    slot: slot_name(t.slot),
                    reason: e.to_string(),
                });
            }
            None
        }
    };

    if let Some(w) = watcher.as_mut() {
        for t in &watch_targets {
            // The fragment directory is watched recursively-off but
            // following symlinks it contains; `available/` is watched
            // without canonicalizing, so a symlink swap inside it is itself
            // observed rather than transparently resolved (§4.7, §9).
            let watch_path = if t.slot == WatchSlot::Available {
                t.path.clone()
            } else {
                std::fs::canonicalize(&t.path).unwrap_or_else(|_| t.path.clone())
            };
            if let Err(e) = w.watch(&watch_path, RecursiveMode::NonRecursive) {
                failures.push(WatcherUnavailable {
                    slot: slot_name(t.slot),
                    reason: e.to_string(),
                });
            }
        }
    }

    if setup_tx.send((Arc::clone(&stop_waker), failures)).is_err() {
        return;
    }
    drop(setup_tx);

    let mut events = Events::with_capacity(2);
    loop {
        match poll.poll(&mut events, None) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!("fswatcher: poll error: {e}");
                return;
            }
        }
        for ev in events.iter() {
            if ev.token() == WATCHER_THREAD_STOP_TOKEN {
                return;
            }
        }
    }
}

fn slot_name(slot: WatchSlot) -> &'static str {
    match slot {
        WatchSlot::Fragments => "fragment directory",
        WatchSlot::Available => "available/ directory",
        WatchSlot::MainFile => "main configuration file",
    }
}

fn build_watcher(
    events_tx: &Sender<WatchEvent>,
    main_waker: &Arc<Waker>,
    targets: &[SlotTarget],
) -> notify::Result<RecommendedWatcher> {
    let events_tx = events_tx.clone();
    let main_waker = Arc::clone(main_waker);
    let targets: Vec<SlotTarget> = targets
        .iter()
        .map(|t| SlotTarget {
            slot: t.slot,
            path: t.path.clone(),
            is_dir: t.is_dir,
        })
        .collect();

    notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let event = match res {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("fswatcher: notify backend error: {e}");
                return;
            }
        };
        for (path, change) in classify(&event) {
            let Some(target) = find_target(&targets, &path) else {
                continue;
            };
            let basename = if target.is_dir {
                match path.file_name() {
                    Some(n) => n.to_string_lossy().into_owned(),
                    None => continue,
                }
            } else {
                // A single-file slot's events never carry a meaningful
                // basename of their own; substitute the watched file's own
                // basename (§4.7, §9 "Watcher slot coupling").
                target
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            };

            if events_tx
                .send(WatchEvent {
                    slot: target.slot,
                    basename,
                    change,
                })
                .is_err()
            {
                return;
            }
            let _ = main_waker.wake();
        }
    })
}

fn find_target<'a>(targets: &'a [SlotTarget], path: &Path) -> Option<&'a SlotTarget> {
    targets.iter().find(|t| {
        if t.is_dir {
            path.parent() == Some(t.path.as_path()) || path == t.path
        } else {
            path == t.path
        }
    })
}

/// Reduce a raw `notify::Event` to `(path, ChangeEvent)` pairs, one per path
/// the event names (a rename carries both the old and new path).
fn classify(event: &notify::Event) -> Vec<(PathBuf, ChangeEvent)> {
    use notify::event::{ModifyKind, RenameMode};

    match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| (p.clone(), ChangeEvent::Upserted))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| (p.clone(), ChangeEvent::Removed))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .map(|p| (p.clone(), ChangeEvent::Removed))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .map(|p| (p.clone(), ChangeEvent::Upserted))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(from) = event.paths.first() {
                out.push((from.clone(), ChangeEvent::Removed));
            }
            if let Some(to) = event.paths.get(1) {
                out.push((to.clone(), ChangeEvent::Upserted));
            }
            out
        }
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| (p.clone(), ChangeEvent::Upserted))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};

    fn ev(kind: EventKind, paths: Vec<PathBuf>) -> notify::Event {
        notify::Event {
            kind,
            paths,
            attrs: Default::default(),
        }
    }

    #[test]
    fn create_is_upserted() {
        let e = ev(EventKind::Create(CreateKind::File), vec![PathBuf::from("a.conf")]);
        let out = classify(&e);
        assert_eq!(out, vec![(PathBuf::from("a.conf"), ChangeEvent::Upserted)]);
    }

    #[test]
    fn remove_is_removed() {
        let e = ev(EventKind::Remove(RemoveKind::File), vec![PathBuf::from("a.conf")]);
        let out = classify(&e);
        assert_eq!(out, vec![(PathBuf::from("a.conf"), ChangeEvent::Removed)]);
    }

    #[test]
    fn find_target_matches_file_slot_regardless_of_event_basename() {
        let targets = vec![SlotTarget {
            slot: WatchSlot::MainFile,
            path: PathBuf::from("/etc/initcored/initcored.conf"),
            is_dir: false,
        }];
        let found = find_target(&targets, Path::new("/etc/initcored/initcored.conf")).unwrap();
        assert_eq!(found.slot, WatchSlot::MainFile);
    }

    #[test]
    fn find_target_matches_directory_slot_by_parent() {
        let targets = vec![SlotTarget {
            slot: WatchSlot::Fragments,
            path: PathBuf::from("/etc/initcored/config.d"),
            is_dir: true,
        }];
        let found = find_target(
            &targets,
            Path::new("/etc/initcored/config.d/foo.conf"),
        )
        .unwrap();
        assert_eq!(found.slot, WatchSlot::Fragments);
    }
}
