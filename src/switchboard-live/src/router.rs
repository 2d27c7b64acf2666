//! Classification of inbound chat events.

use tracing::debug;

use crate::event::{ChatEvent, ChatEventState, SessionKey};
use crate::run::RunStore;
use crate::scheduler::Scheduler;
use crate::throttle::{Commit, ThrottleScheduler};

/// Error text surfaced when an error event carries no message.
pub const DEFAULT_ERROR_MESSAGE: &str = "chat error";

/// What routing an event did, for the caller to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Nothing changed.
    Ignored,
    /// New text was handed to the throttle.
    DeltaApplied,
    /// The active run finished. Reload history; run state is retained
    /// until that reload completes.
    Final,
    /// Some other run of this session finished. Reload history but leave
    /// the active run alone.
    FinalOther,
    /// The run was aborted and its state cleared.
    Aborted,
    /// The run failed; state cleared and the message surfaced.
    Error(String),
}

impl RouteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::DeltaApplied => "delta-applied",
            Self::Final => "final",
            Self::FinalOther => "final-other",
            Self::Aborted => "aborted",
            Self::Error(_) => "error",
        }
    }

    /// Whether the caller should reload authoritative history.
    pub fn needs_reload(&self) -> bool {
        matches!(self, Self::Final | Self::FinalOther)
    }
}

/// Result of routing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub outcome: RouteOutcome,
    /// Commit made while routing, if any (leading-edge delta or flush).
    pub commit: Option<Commit>,
    /// Whether the run state was cleared.
    pub cleared: bool,
}

impl Routed {
    fn ignored() -> Self {
        Self::from(RouteOutcome::Ignored)
    }
}

impl From<RouteOutcome> for Routed {
    fn from(outcome: RouteOutcome) -> Self {
        Self {
            outcome,
            commit: None,
            cleared: false,
        }
    }
}

/// Validates events against the session under evaluation and applies them
/// to the run store through the throttle.
///
/// Stateless: everything it reads and writes is passed in.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventRouter;

impl EventRouter {
    pub fn new() -> Self {
        Self
    }

    /// Route `payload` for `session`.
    pub fn route(
        &self,
        runs: &mut RunStore,
        throttle: &mut ThrottleScheduler,
        sched: &mut dyn Scheduler,
        session: &SessionKey,
        payload: Option<&ChatEvent>,
    ) -> Routed {
        let Some(event) = payload else {
            return Routed::ignored();
        };
        if &event.session_key != session {
            debug!(%session, foreign = %event.session_key, "Ignoring event for other session");
            return Routed::ignored();
        }

        let active = runs.get(session).and_then(|run| run.run_id.clone());
        if let (Some(incoming), Some(active)) = (&event.run_id, &active) {
            if incoming != active {
                return if event.state == ChatEventState::Final {
                    debug!(%session, run = %incoming, active = %active, "Foreign run finished");
                    Routed::from(RouteOutcome::FinalOther)
                } else {
                    Routed::ignored()
                };
            }
        }

        match event.state {
            ChatEventState::Delta => Self::apply_delta(runs, throttle, sched, session, event),
            ChatEventState::Final => {
                let commit = throttle.flush(runs, sched, session);
                let run = runs.entry(session);
                if !run.is_cleared() {
                    run.awaiting_reload = true;
                }
                debug!(%session, "Run finished");
                Routed {
                    outcome: RouteOutcome::Final,
                    commit,
                    cleared: false,
                }
            }
            ChatEventState::Aborted => {
                let commit = throttle.flush(runs, sched, session);
                let cleared = runs.clear(session);
                debug!(%session, "Run aborted");
                Routed {
                    outcome: RouteOutcome::Aborted,
                    commit,
                    cleared,
                }
            }
            ChatEventState::Error => {
                let commit = throttle.flush(runs, sched, session);
                let cleared = runs.clear(session);
                let message = event
                    .error_message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());
                debug!(%session, error = %message, "Run failed");
                Routed {
                    outcome: RouteOutcome::Error(message),
                    commit,
                    cleared,
                }
            }
        }
    }

    fn apply_delta(
        runs: &mut RunStore,
        throttle: &mut ThrottleScheduler,
        sched: &mut dyn Scheduler,
        session: &SessionKey,
        event: &ChatEvent,
    ) -> Routed {
        let Some(text) = event.text() else {
            return Routed::ignored();
        };

        // Compare against the newest text seen: buffered if any, else committed.
        let current_len = match throttle.pending_text(session) {
            Some(pending) => pending.chars().count(),
            None => runs.get(session).map_or(0, |run| run.committed_len()),
        };
        let next_len = text.chars().count();
        if current_len > 0 && next_len < current_len {
            debug!(%session, current_len, next_len, "Dropping shorter delta");
            return Routed::ignored();
        }

        let commit = throttle.ingest(runs, sched, session, text, event.segments.clone());
        Routed {
            outcome: RouteOutcome::DeltaApplied,
            commit,
            cleared: false,
        }
    }
}
