//! initcored — configuration loader and state-machine core of a service
//! supervisor. Reads a primary configuration file plus a directory of
//! per-service fragments, reacts to on-disk changes, and drives the running
//! system between bootstrap, normal running, runlevel transitions, and live
//! reconfiguration.
#![deny(unstable_features)]

use initcore::{
    cfg::{loader::LoaderPaths, rlimit::GlobalRlimits, watcher::FSWatcher},
    collab::{ConditionStore, DeclKind, HookPoint, Plugins, ServiceKindMask, ServiceTable, Shutdown, TtyTable},
    logging,
    sm::{HaltMode, StateMachine},
};
use mio::{Events, Poll, Token, Waker};
use precisej_printable_errno::{printable_error, ExitErrorResult, PrintableErrno, PrintableResult};
use std::{path::PathBuf, process::id as getpid, sync::Arc};

const PROGRAM_NAME: &str = "initcored";

const MAIN_THREAD_WAKE_TOKEN: Token = Token(10);

/// Placeholder `ServiceTable`. Real process spawning/reaping is out of
/// scope for this core (see the crate's design notes); this adapter logs
/// what it would have done, so the driver above it is fully exercised end
/// to end even before a real service backend exists.
#[derive(Default)]
struct NullServiceTable;

impl ServiceTable for NullServiceTable {
    fn register(&mut self, kind: DeclKind, decl_text: &str, _rlimits: &GlobalRlimits, origin_file: Option<&PathBuf>) {
        tracing::debug!(?kind, %decl_text, ?origin_file, "register service");
    }
    fn mark_dynamic(&mut self) {}
    fn clean_dynamic(&mut self) {}
    fn step_all(&mut self, mask: ServiceKindMask) {
        tracing::debug!(?mask, "step_all");
    }
    fn stop_completed(&mut self) -> Option<u64> {
        None
    }
    fn runtask_clean(&mut self) {}
    fn is_daemon(&self, _svc: u64) -> bool {
        false
    }
}

#[derive(Default)]
struct NullTtyTable;

impl TtyTable for NullTtyTable {
    fn register(&mut self, decl_text: &str, _rlimits: &GlobalRlimits, origin_file: Option<&PathBuf>) {
        tracing::debug!(%decl_text, ?origin_file, "register tty");
    }
    fn mark(&mut self) {}
    fn reload(&mut self, _arg: Option<&str>) {}
    fn runlevel(&mut self, level: u8) {
        tracing::debug!(level, "persist runlevel");
    }
}

#[derive(Default)]
struct NullConditionStore;

impl ConditionStore for NullConditionStore {
    fn reload(&mut self) {}
}

#[derive(Default)]
struct NullPlugins;

impl Plugins for NullPlugins {
    fn run_hooks(&mut self, point: HookPoint) {
        tracing::debug!(?point, "run hooks");
    }
}

#[derive(Default)]
struct NullShutdown;

impl Shutdown for NullShutdown {
    fn do_shutdown(&mut self, mode: HaltMode) {
        tracing::info!(?mode, "do_shutdown");
    }
}

/// Refuse to run unless we are actually PID 1 — this core is meant to be
/// the supervisor, not a helper invoked alongside one.
fn initial_sanity_check() -> Result<(), PrintableErrno<String>> {
    if getpid() != 1 {
        return Err(printable_error(
            PROGRAM_NAME,
            "not running as PID 1, exiting...",
        ));
    }
    Ok(())
}

fn main() {
    initial_sanity_check().bail(1).unwrap_or_eprint_exit();

    let debug = logging::cmdline::debug_mode_from_proc_cmdline();
    logging::init(debug);

    if let Err(e) = run() {
        e.eprint_and_exit()
    }
}

fn run() -> Result<(), precisej_printable_errno::ExitError<String>> {
    let mut evloop = Poll::new()
        .map_err(|io| printable_error(PROGRAM_NAME, format!("error while setting up main event loop: {io}")))
        .bail(2)?;
    let mut evs = Events::with_capacity(4);

    let main_waker = Arc::new(
        Waker::new(evloop.registry(), MAIN_THREAD_WAKE_TOKEN)
            .map_err(|io| printable_error(PROGRAM_NAME, format!("error while setting up main waker: {io}")))
            .bail(2)?,
    );

    let paths = LoaderPaths::default();

    let mut sm = StateMachine::new(
        NullServiceTable,
        NullTtyTable,
        NullConditionStore,
        NullPlugins,
        NullShutdown,
        paths.clone(),
    );

    sm.step();

    let (watcher, failures) = FSWatcher::arm(
        &main_waker,
        &paths.fragment_dir,
        paths.available_dir.as_deref(),
        &paths.main_file,
    );
    for f in failures {
        tracing::warn!("{f}");
    }

    loop {
        match evloop.poll(&mut evs, None) {
            Ok(()) => {}
            Err(io) if io.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(io) => Err(io)
                .map_err(|io| printable_error(PROGRAM_NAME, format!("error while running main event loop: {io}")))
                .bail(3)?,
        }

        for ev in evs.iter() {
            if ev.token() == MAIN_THREAD_WAKE_TOKEN {
                watcher.drain_into(&mut sm.changeset);
                if sm.changeset.any() {
                    sm.ctx.set_reload();
                }
                sm.step();
            }
        }
    }
}
