//! `StateMachine`: the supervisor driver (§4.8).

use crate::{
    cfg::{changeset::ChangeSet, loader},
    collab::{ConditionStore, HookPoint, Plugins, ServiceKindMask, ServiceTable, Shutdown, TtyTable},
    sm::{
        context::{State, StateMachineContext},
        globals::{HaltMode, ProcessGlobals},
        nologin,
    },
};
use std::path::PathBuf;

/// Owns every piece of process-wide state plus the collaborator
/// implementations the driver calls out to. Generic over the five
/// collaborator traits (§6) so production code can plug in the real
/// adapters and tests can plug in in-memory doubles.
pub struct StateMachine<S, T, C, P, H>
where
    S: ServiceTable,
    T: TtyTable,
    C: ConditionStore,
    P: Plugins,
    H: Shutdown,
{
    pub ctx: StateMachineContext,
    pub globals: ProcessGlobals,
    pub services: S,
    pub ttys: T,
    pub conditions: C,
    pub plugins: P,
    pub shutdown: H,
    pub changeset: ChangeSet,
    pub paths: loader::LoaderPaths,
    nologin_path: PathBuf,
}

impl<S, T, C, P, H> StateMachine<S, T, C, P, H>
where
    S: ServiceTable,
    T: TtyTable,
    C: ConditionStore,
    P: Plugins,
    H: Shutdown,
{
    pub fn new(
        services: S,
        ttys: T,
        conditions: C,
        plugins: P,
        shutdown: H,
        paths: loader::LoaderPaths,
    ) -> Self {
        StateMachine {
            ctx: StateMachineContext::new(),
            globals: ProcessGlobals::new(),
            services,
            ttys,
            conditions,
            plugins,
            shutdown,
            changeset: ChangeSet::new(),
            paths,
            nologin_path: PathBuf::from(nologin::NOLOGIN_PATH),
        }
    }

    #[cfg(test)]
    fn with_nologin_path(mut self, path: PathBuf) -> Self {
        self.nologin_path = path;
        self
    }

    /// Advance the machine. Re-enters internally until a call produces no
    /// further state change, so cascading transitions (e.g.
    /// `BOOTSTRAP → RUNNING`, or `RUNNING → RUNLEVEL_CHANGE → RUNLEVEL_WAIT`)
    /// complete within one external call (§4.8, §9 "re-entrant step").
    pub fn step(&mut self) {
        loop {
            let before = self.ctx.state;
            self.step_once();
            if self.ctx.state == before {
                break;
            }
        }
    }

    fn step_once(&mut self) {
        match self.ctx.state {
            State::Bootstrap => self.do_bootstrap(),
            State::Running => self.do_running(),
            State::RunlevelChange => self.do_runlevel_change(),
            State::RunlevelWait => self.do_runlevel_wait(),
            State::ReloadChange => self.do_reload_change(),
            State::ReloadWait => self.do_reload_wait(),
        }
    }

    fn do_bootstrap(&mut self) {
        self.services
            .step_all(ServiceKindMask::RUN | ServiceKindMask::TASK | ServiceKindMask::SERVICE);
        self.ctx.state = State::Running;
    }

    fn do_running(&mut self) {
        if let Some(nl) = self.ctx.newlevel {
            if nl != self.globals.runlevel {
                self.ctx.state = State::RunlevelChange;
            } else {
                self.ctx.newlevel = None;
            }
        } else if self.ctx.reload_pending {
            self.ctx.reload_pending = false;
            self.ctx.state = State::ReloadChange;
        }
    }

    fn do_runlevel_change(&mut self) {
        self.globals.prevlevel = self.globals.runlevel;
        let next = self.ctx.newlevel.take().unwrap_or(self.globals.runlevel);
        self.globals.runlevel = next;

        if next == 6 {
            self.globals.halt = HaltMode::Reboot;
        }
        if matches!(next, 0 | 6) {
            self.plugins.run_hooks(HookPoint::Shutdown);
            crate::logging::set_terse(true);
        }

        tracing::info!("entering runlevel {next}");
        self.ttys.runlevel(next);
        nologin::apply_transition(&self.nologin_path, self.globals.prevlevel, next);

        if self.changeset.any() {
            loader::conf_reload(
                &self.paths,
                &mut self.globals,
                &mut self.services,
                &mut self.ttys,
                &mut self.changeset,
            );
        }
        self.services.runtask_clean();

        self.ctx.in_teardown = true;
        self.services.step_all(ServiceKindMask::ALL);
        self.ctx.state = State::RunlevelWait;
    }

    fn do_runlevel_wait(&mut self) {
        if self.services.stop_completed().is_some() {
            return;
        }

        self.plugins.run_hooks(HookPoint::RunlevelChange);
        self.ctx.in_teardown = false;
        self.services.step_all(ServiceKindMask::ALL);
        self.services.clean_dynamic();

        let level = self.globals.runlevel;
        if matches!(level, 0 | 6) {
            self.shutdown.do_shutdown(self.globals.halt);
            self.ctx.state = State::Running;
            return;
        }

        if self.globals.prevlevel > 0 {
            self.ttys.reload(None);
        }
        self.ctx.state = State::Running;
    }

    fn do_reload_change(&mut self) {
        loader::conf_reload(
            &self.paths,
            &mut self.globals,
            &mut self.services,
            &mut self.ttys,
            &mut self.changeset,
        );
        self.conditions.reload();
        self.ctx.in_teardown = true;
        self.services
            .step_all(ServiceKindMask::SERVICE | ServiceKindMask::INETD);
        self.ttys.reload(None);
        self.ctx.state = State::ReloadWait;
    }

    fn do_reload_wait(&mut self) {
        if self.services.stop_completed().is_some() {
            return;
        }

        self.ctx.in_teardown = false;
        self.services.clean_dynamic();
        self.services
            .step_all(ServiceKindMask::SERVICE | ServiceKindMask::INETD);
        self.plugins.run_hooks(HookPoint::SvcReconf);
        self.services
            .step_all(ServiceKindMask::SERVICE | ServiceKindMask::INETD);
        self.ctx.state = State::Running;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::DeclKind;
    use crate::cfg::rlimit::GlobalRlimits;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl Recorder {
        fn log(&self, s: impl Into<String>) {
            self.calls.borrow_mut().push(s.into());
        }
    }

    #[derive(Default)]
    struct FakeServices {
        rec: Recorder,
        stopping: Vec<u64>,
    }
    impl ServiceTable for FakeServices {
        fn register(&mut self, _k: DeclKind, _d: &str, _r: &GlobalRlimits, _o: Option<&PathBuf>) {}
        fn mark_dynamic(&mut self) {
            self.rec.log("mark_dynamic");
        }
        fn clean_dynamic(&mut self) {
            self.rec.log("clean_dynamic");
        }
        fn step_all(&mut self, _mask: ServiceKindMask) {
            self.rec.log("step_all");
        }
        fn stop_completed(&mut self) -> Option<u64> {
            self.stopping.pop()
        }
        fn runtask_clean(&mut self) {
            self.rec.log("runtask_clean");
        }
        fn is_daemon(&self, _svc: u64) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct FakeTtys;
    impl TtyTable for FakeTtys {
        fn register(&mut self, _d: &str, _r: &GlobalRlimits, _o: Option<&PathBuf>) {}
        fn mark(&mut self) {}
        fn reload(&mut self, _arg: Option<&str>) {}
        fn runlevel(&mut self, _level: u8) {}
    }

    #[derive(Default)]
    struct FakeConditions;
    impl ConditionStore for FakeConditions {
        fn reload(&mut self) {}
    }

    #[derive(Default)]
    struct FakePlugins;
    impl Plugins for FakePlugins {
        fn run_hooks(&mut self, _point: HookPoint) {}
    }

    #[derive(Default)]
    struct FakeShutdown {
        called: Option<HaltMode>,
    }
    impl Shutdown for FakeShutdown {
        fn do_shutdown(&mut self, mode: HaltMode) {
            self.called = Some(mode);
        }
    }

    fn build_sm(nologin_path: PathBuf) -> StateMachine<FakeServices, FakeTtys, FakeConditions, FakePlugins, FakeShutdown> {
        StateMachine::new(
            FakeServices::default(),
            FakeTtys::default(),
            FakeConditions::default(),
            FakePlugins::default(),
            FakeShutdown::default(),
            loader::LoaderPaths {
                main_file: PathBuf::from("/nonexistent/initcored.conf"),
                fragment_dir: PathBuf::from("/nonexistent/config.d"),
                available_dir: None,
            },
        )
        .with_nologin_path(nologin_path)
    }

    #[test]
    fn bootstrap_then_promote_to_runlevel_two() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::remove_file(tmp.path()).ok();
        let mut sm = build_sm(tmp.path().to_path_buf());

        sm.step();
        assert_eq!(sm.ctx.state, State::Running);

        sm.ctx.set_runlevel(2);
        sm.step();

        assert_eq!(sm.globals.runlevel, 2);
        assert_eq!(sm.globals.prevlevel, 0);
        assert!(!sm.ctx.in_teardown);
        assert_eq!(sm.ctx.state, State::Running);
    }

    #[test]
    fn runlevel_wait_is_idempotent_while_services_still_stopping() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut sm = build_sm(tmp.path().to_path_buf());
        sm.step();
        sm.ctx.set_runlevel(3);
        sm.services.stopping = vec![1];
        sm.step();
        assert_eq!(sm.ctx.state, State::RunlevelWait);
        sm.step();
        assert_eq!(sm.ctx.state, State::RunlevelWait);
        sm.services.stopping.clear();
        sm.step();
        assert_eq!(sm.ctx.state, State::Running);
    }

    #[test]
    fn shutdown_runs_hooks_and_returns_to_running() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut sm = build_sm(tmp.path().to_path_buf());
        sm.step();
        sm.ctx.set_runlevel(0);
        sm.step();
        assert_eq!(sm.ctx.state, State::Running);
        assert_eq!(sm.shutdown.called, Some(HaltMode::Halt));
    }

    #[test]
    fn entering_runlevel_six_selects_reboot_mode() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut sm = build_sm(tmp.path().to_path_buf());
        sm.step();
        sm.ctx.set_runlevel(6);
        sm.step();
        assert_eq!(sm.shutdown.called, Some(HaltMode::Reboot));
    }

    #[test]
    fn reload_during_running_goes_through_reload_states() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut sm = build_sm(tmp.path().to_path_buf());
        sm.step();
        sm.ctx.set_reload();
        sm.step();
        assert_eq!(sm.ctx.state, State::Running);
        assert!(!sm.ctx.reload_pending);
    }
}
