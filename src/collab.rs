//! Contracts for the collaborating subsystems that sit outside CFG/SM's
//! scope (§6): service table, TTY table, condition store, plugin hooks, and
//! shutdown. Each is a trait so `StateMachine` can be generic/boxed over a
//! real implementation in production and an in-memory double in tests, the
//! same way the teacher keeps `Mounter`/`ModAliases` behind small traits
//! rather than hard-wiring a single concrete type.

use crate::{cfg::rlimit::GlobalRlimits, sm::HaltMode};
use std::path::PathBuf;

/// The four kinds of declaration `ConfigLoader` can hand to a `ServiceTable`,
/// modeled as bit values on a `u8` rather than pulling in a crate for a
/// four-bit set (§2a).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceKindMask(u8);

impl ServiceKindMask {
    pub const RUN: ServiceKindMask = ServiceKindMask(1 << 0);
    pub const TASK: ServiceKindMask = ServiceKindMask(1 << 1);
    pub const SERVICE: ServiceKindMask = ServiceKindMask(1 << 2);
    pub const INETD: ServiceKindMask = ServiceKindMask(1 << 3);
    pub const ALL: ServiceKindMask =
        ServiceKindMask(Self::RUN.0 | Self::TASK.0 | Self::SERVICE.0 | Self::INETD.0);
    pub const NONE: ServiceKindMask = ServiceKindMask(0);

    pub const fn union(self, other: ServiceKindMask) -> ServiceKindMask {
        ServiceKindMask(self.0 | other.0)
    }

    pub const fn contains(self, other: ServiceKindMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ServiceKindMask {
    type Output = ServiceKindMask;
    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// A single declaration kind, as the loader encounters it on a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Run,
    Task,
    Service,
    Inetd,
}

impl DeclKind {
    pub fn mask(self) -> ServiceKindMask {
        match self {
            DeclKind::Run => ServiceKindMask::RUN,
            DeclKind::Task => ServiceKindMask::TASK,
            DeclKind::Service => ServiceKindMask::SERVICE,
            DeclKind::Inetd => ServiceKindMask::INETD,
        }
    }
}

/// Identifies a service or TTY already in the table, opaque to CFG/SM.
pub type ServiceId = u64;

/// §6 `ServiceTable` contract.
pub trait ServiceTable {
    /// Register (or refresh) a declaration parsed from `origin_file`.
    fn register(
        &mut self,
        kind: DeclKind,
        decl_text: &str,
        rlimits: &GlobalRlimits,
        origin_file: Option<&PathBuf>,
    );

    /// Mark every dynamic service as a sweep candidate, ahead of a reload.
    fn mark_dynamic(&mut self);

    /// Unregister every entry still marked (never re-declared this reload).
    fn clean_dynamic(&mut self);

    /// Apply the stop/start discipline for every service matching `mask`.
    fn step_all(&mut self, mask: ServiceKindMask);

    /// A service still in the process of stopping, if any remain.
    fn stop_completed(&mut self) -> Option<ServiceId>;

    /// Clear each service's one-shot "already ran this runlevel" flag.
    fn runtask_clean(&mut self);

    fn is_daemon(&self, svc: ServiceId) -> bool;
}

/// §6 `TTYTable` contract.
pub trait TtyTable {
    fn register(&mut self, decl_text: &str, rlimits: &GlobalRlimits, origin_file: Option<&PathBuf>);
    fn mark(&mut self);
    fn reload(&mut self, arg: Option<&str>);
    fn runlevel(&mut self, level: u8);
}

/// §6 `ConditionStore` contract.
pub trait ConditionStore {
    fn reload(&mut self);
}

/// The three hook points plugins may run at (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    Shutdown,
    RunlevelChange,
    SvcReconf,
}

/// §6 `Plugins` contract.
pub trait Plugins {
    fn run_hooks(&mut self, point: HookPoint);
}

/// §6 `Shutdown` contract.
pub trait Shutdown {
    /// Terminal for states 0/6; never returns in a real implementation, but
    /// is given a plain `fn` signature so a test double can record the call
    /// and return normally.
    fn do_shutdown(&mut self, mode: HaltMode);
}
