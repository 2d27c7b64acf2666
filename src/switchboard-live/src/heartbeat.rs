//! Stall detection for runs the gateway stopped reporting on.

use std::time::Duration;

use tracing::{debug, warn};

use crate::event::{RunId, SessionKey};
use crate::run::RunStore;
use crate::scheduler::{Scheduler, TimerHandle, Wakeup};

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between stall checks.
    pub interval: Duration,
    /// Age after which an unfinished run counts as abandoned.
    pub stall_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(60),
        }
    }
}

/// A run the monitor gave up on. Its state has already been cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stall {
    pub session: SessionKey,
    pub run_id: RunId,
    pub age: Duration,
}

/// Periodic check of the active session's run age.
///
/// Implemented as a one-shot timer re-armed after every tick, so stopping
/// cancels exactly one outstanding handle.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    pending: Option<TimerHandle>,
    /// Arming was refused; `retry_stalled` tries again.
    stalled: bool,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            pending: None,
            stalled: false,
        }
    }

    pub fn config(&self) -> HeartbeatConfig {
        self.config
    }

    pub fn is_running(&self) -> bool {
        self.pending.is_some()
    }

    /// Arm the next tick unless one is already outstanding.
    pub fn start(&mut self, sched: &mut dyn Scheduler) {
        if self.pending.is_some() {
            return;
        }
        match sched.set_timeout(self.config.interval, Wakeup::Heartbeat) {
            Ok(handle) => {
                self.pending = Some(handle);
                self.stalled = false;
            }
            Err(err) => {
                warn!(error = %err, "Could not arm heartbeat");
                self.stalled = true;
            }
        }
    }

    /// Whether the last arm attempt was refused and not yet retried.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Re-arm after a refused attempt. Returns true if a tick is now pending.
    pub fn retry_stalled(&mut self, sched: &mut dyn Scheduler) -> bool {
        if self.stalled {
            self.start(sched);
        }
        self.pending.is_some()
    }

    pub fn stop(&mut self, sched: &mut dyn Scheduler) {
        self.stalled = false;
        if let Some(handle) = self.pending.take() {
            sched.cancel_timeout(handle);
        }
    }

    /// Handle a heartbeat firing for the active `session`.
    ///
    /// Stale handles are ignored. Otherwise the run is checked, cleared if it
    /// outlived the stall timeout, and the next tick is armed.
    pub fn on_tick(
        &mut self,
        runs: &mut RunStore,
        sched: &mut dyn Scheduler,
        session: &SessionKey,
        handle: TimerHandle,
    ) -> Option<Stall> {
        if self.pending != Some(handle) {
            return None;
        }
        self.pending = None;
        let stall = self.check(runs, sched, session);
        self.start(sched);
        stall
    }

    fn check(
        &self,
        runs: &mut RunStore,
        sched: &dyn Scheduler,
        session: &SessionKey,
    ) -> Option<Stall> {
        let run = runs.get(session)?;
        let run_id = run.run_id.clone()?;
        let age = run.age(sched.now())?;
        if age <= self.config.stall_timeout {
            return None;
        }
        runs.clear(session);
        debug!(%session, run = %run_id, ?age, "Run stalled, recovering");
        Some(Stall {
            session: session.clone(),
            run_id,
            age,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Fired, ManualScheduler};

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(60),
        }
    }

    fn run_ticks(
        monitor: &mut HeartbeatMonitor,
        runs: &mut RunStore,
        sched: &mut ManualScheduler,
        session: &SessionKey,
        span: Duration,
    ) -> Vec<Stall> {
        let until = sched.now() + span;
        let mut stalls = Vec::new();
        while let Some(fired) = sched.pop_due(until) {
            if let Fired::Timer { handle, .. } = fired {
                stalls.extend(monitor.on_tick(runs, sched, session, handle));
            }
        }
        sched.advance_to(until);
        stalls
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut sched = ManualScheduler::new();
        let mut monitor = HeartbeatMonitor::new(config());
        monitor.start(&mut sched);
        monitor.start(&mut sched);
        assert!(monitor.is_running());
        assert_eq!(sched.pending_timers(), 1);

        monitor.stop(&mut sched);
        assert!(!monitor.is_running());
        assert_eq!(sched.pending_timers(), 0);
    }

    #[test]
    fn test_stall_recovered_exactly_once() {
        let mut sched = ManualScheduler::new();
        let mut runs = RunStore::new();
        let session = SessionKey::from("main");
        runs.entry(&session).begin(RunId::from("r1"), sched.now());

        let mut monitor = HeartbeatMonitor::new(config());
        monitor.start(&mut sched);

        let stalls = run_ticks(
            &mut monitor,
            &mut runs,
            &mut sched,
            &session,
            Duration::from_secs(120),
        );
        assert_eq!(stalls.len(), 1);
        assert_eq!(stalls[0].run_id, RunId::from("r1"));
        assert_eq!(stalls[0].age, Duration::from_secs(70));
        assert!(runs.get(&session).unwrap().is_cleared());
        assert!(monitor.is_running());
    }

    #[test]
    fn test_young_run_untouched() {
        let mut sched = ManualScheduler::new();
        let mut runs = RunStore::new();
        let session = SessionKey::from("main");
        runs.entry(&session).begin(RunId::from("r1"), sched.now());

        let mut monitor = HeartbeatMonitor::new(config());
        monitor.start(&mut sched);
        let stalls = run_ticks(
            &mut monitor,
            &mut runs,
            &mut sched,
            &session,
            Duration::from_secs(60),
        );
        assert!(stalls.is_empty());
        assert!(runs.get(&session).unwrap().is_active());
    }

    #[test]
    fn test_other_session_not_checked() {
        let mut sched = ManualScheduler::new();
        let mut runs = RunStore::new();
        let background = SessionKey::from("background");
        runs.entry(&background).begin(RunId::from("r1"), sched.now());

        let mut monitor = HeartbeatMonitor::new(config());
        monitor.start(&mut sched);
        let stalls = run_ticks(
            &mut monitor,
            &mut runs,
            &mut sched,
            &SessionKey::from("main"),
            Duration::from_secs(120),
        );
        assert!(stalls.is_empty());
        assert!(runs.get(&background).unwrap().is_active());
    }

    #[test]
    fn test_stale_tick_ignored() {
        let mut sched = ManualScheduler::new();
        let mut runs = RunStore::new();
        let session = SessionKey::from("main");
        let start = sched.now();
        runs.entry(&session).begin(RunId::from("r1"), start);

        let mut monitor = HeartbeatMonitor::new(config());
        monitor.start(&mut sched);
        let Some(Fired::Timer { handle, .. }) = sched.pop_due(start + Duration::from_secs(10))
        else {
            panic!("heartbeat did not fire");
        };
        monitor.stop(&mut sched);
        sched.advance(Duration::from_secs(100));

        assert_eq!(monitor.on_tick(&mut runs, &mut sched, &session, handle), None);
        assert!(runs.get(&session).unwrap().is_active());
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_refused_arm_leaves_monitor_stopped() {
        let mut sched = ManualScheduler::new();
        sched.set_refuse(true);
        let mut monitor = HeartbeatMonitor::new(config());
        monitor.start(&mut sched);
        assert!(!monitor.is_running());
        assert!(monitor.is_stalled());

        monitor.stop(&mut sched);
        assert!(!monitor.is_stalled());
    }

    #[test]
    fn test_refused_rearm_retried() {
        let mut sched = ManualScheduler::new();
        let mut runs = RunStore::new();
        let session = SessionKey::from("main");
        let start = sched.now();
        runs.entry(&session).begin(RunId::from("r1"), start);

        let mut monitor = HeartbeatMonitor::new(config());
        monitor.start(&mut sched);
        let Some(Fired::Timer { handle, .. }) = sched.pop_due(start + Duration::from_secs(10))
        else {
            panic!("heartbeat did not fire");
        };

        sched.set_refuse(true);
        assert_eq!(monitor.on_tick(&mut runs, &mut sched, &session, handle), None);
        assert!(!monitor.is_running());
        assert!(monitor.is_stalled());
        assert!(!monitor.retry_stalled(&mut sched));

        sched.set_refuse(false);
        assert!(monitor.retry_stalled(&mut sched));
        assert!(!monitor.is_stalled());

        let stalls = run_ticks(
            &mut monitor,
            &mut runs,
            &mut sched,
            &session,
            Duration::from_secs(120),
        );
        assert_eq!(stalls.len(), 1);
        assert!(runs.get(&session).unwrap().is_cleared());
    }
}
