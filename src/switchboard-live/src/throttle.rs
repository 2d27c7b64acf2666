//! Per-session commit throttling.
//!
//! Network chunks can arrive far faster than is useful to render. The
//! throttle buffers the newest text per session and commits it into the
//! [`RunStore`] at most once per interval: the first write after a quiet
//! period commits immediately (leading edge), later writes inside the window
//! overwrite the pending value and are committed by a single deferred timer
//! (trailing edge). Worst-case latency before text becomes visible is one
//! interval.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::event::SessionKey;
use crate::run::RunStore;
use crate::scheduler::{Scheduler, TimerHandle, Wakeup};

/// Write-side buffer of one session. Never read by the view.
#[derive(Debug, Default)]
pub struct ThrottleContext {
    pending_text: Option<String>,
    pending_segments: Option<Vec<String>>,
    pending_flush: Option<TimerHandle>,
    last_commit: Option<Instant>,
}

impl ThrottleContext {
    pub fn pending_text(&self) -> Option<&str> {
        self.pending_text.as_deref()
    }

    pub fn pending_flush(&self) -> Option<TimerHandle> {
        self.pending_flush
    }

    pub fn last_commit(&self) -> Option<Instant> {
        self.last_commit
    }
}

/// A commit the throttle wrote into the run store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub session: SessionKey,
    pub text: String,
    pub segments: Option<Vec<String>>,
}

/// Registry of throttle contexts keyed by session.
///
/// Owned by the pipeline; nothing else touches the contexts.
#[derive(Debug)]
pub struct ThrottleScheduler {
    interval: Duration,
    contexts: HashMap<SessionKey, ThrottleContext>,
}

impl ThrottleScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            contexts: HashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn context(&self, session: &SessionKey) -> Option<&ThrottleContext> {
        self.contexts.get(session)
    }

    /// Buffered text not yet committed.
    pub fn pending_text(&self, session: &SessionKey) -> Option<&str> {
        self.contexts.get(session)?.pending_text()
    }

    /// Buffer `text` for `session`, committing now or scheduling a flush.
    pub fn ingest(
        &mut self,
        runs: &mut RunStore,
        sched: &mut dyn Scheduler,
        session: &SessionKey,
        text: String,
        segments: Option<Vec<String>>,
    ) -> Option<Commit> {
        let now = sched.now();
        let interval = self.interval;
        let ctx = self.contexts.entry(session.clone()).or_default();
        ctx.pending_text = Some(text);
        ctx.pending_segments = segments;

        let elapsed = ctx.last_commit.map(|last| now.saturating_duration_since(last));
        let remaining = match elapsed {
            Some(elapsed) if elapsed < interval => interval - elapsed,
            _ => return Self::commit(ctx, runs, session, now),
        };

        if ctx.pending_flush.is_some() {
            trace!(%session, "Coalesced into pending flush");
            return None;
        }

        match sched.set_timeout(remaining, Wakeup::ThrottleFlush(session.clone())) {
            Ok(handle) => {
                trace!(%session, %handle, ?remaining, "Flush scheduled");
                ctx.pending_flush = Some(handle);
                None
            }
            Err(err) => {
                warn!(%session, error = %err, "Could not schedule flush, committing now");
                Self::commit(ctx, runs, session, now)
            }
        }
    }

    /// Cancel any scheduled flush and commit pending state now.
    pub fn flush(
        &mut self,
        runs: &mut RunStore,
        sched: &mut dyn Scheduler,
        session: &SessionKey,
    ) -> Option<Commit> {
        let ctx = self.contexts.get_mut(session)?;
        if let Some(handle) = ctx.pending_flush.take() {
            sched.cancel_timeout(handle);
        }
        Self::commit(ctx, runs, session, sched.now())
    }

    /// Cancel any scheduled flush and drop the session's context unseen.
    pub fn clear(&mut self, sched: &mut dyn Scheduler, session: &SessionKey) {
        if let Some(ctx) = self.contexts.remove(session) {
            if let Some(handle) = ctx.pending_flush {
                sched.cancel_timeout(handle);
            }
            if ctx.pending_text.is_some() {
                debug!(%session, "Discarded pending text");
            }
        }
    }

    /// [`ThrottleScheduler::clear`] for every session.
    pub fn clear_all(&mut self, sched: &mut dyn Scheduler) {
        let sessions: Vec<SessionKey> = self.contexts.keys().cloned().collect();
        for session in sessions {
            self.clear(sched, &session);
        }
    }

    /// Handle the deferred flush timer of `session`.
    ///
    /// A firing whose handle is not the outstanding one belongs to a
    /// flush that was cancelled or superseded and is ignored.
    pub fn on_flush_timer(
        &mut self,
        runs: &mut RunStore,
        now: Instant,
        session: &SessionKey,
        handle: TimerHandle,
    ) -> Option<Commit> {
        let ctx = self.contexts.get_mut(session)?;
        if ctx.pending_flush != Some(handle) {
            trace!(%session, %handle, "Ignoring stale flush timer");
            return None;
        }
        ctx.pending_flush = None;
        Self::commit(ctx, runs, session, now)
    }

    fn commit(
        ctx: &mut ThrottleContext,
        runs: &mut RunStore,
        session: &SessionKey,
        now: Instant,
    ) -> Option<Commit> {
        let text = ctx.pending_text.take()?;
        let segments = ctx.pending_segments.take();
        ctx.last_commit = Some(now);
        runs.entry(session).commit(text.clone(), segments.clone());
        trace!(%session, chars = text.chars().count(), "Committed");
        Some(Commit {
            session: session.clone(),
            text,
            segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Fired, ManualScheduler};
    use pretty_assertions::assert_eq;

    const INTERVAL: Duration = Duration::from_millis(50);

    fn setup() -> (ThrottleScheduler, RunStore, ManualScheduler, SessionKey) {
        (
            ThrottleScheduler::new(INTERVAL),
            RunStore::new(),
            ManualScheduler::new(),
            SessionKey::from("main"),
        )
    }

    /// Fire every timer due within `by`, returning the commits they made.
    fn run_timers(
        throttle: &mut ThrottleScheduler,
        runs: &mut RunStore,
        sched: &mut ManualScheduler,
        by: Duration,
    ) -> Vec<Commit> {
        let until = sched.now() + by;
        let mut commits = Vec::new();
        while let Some(fired) = sched.pop_due(until) {
            if let Fired::Timer {
                handle,
                wakeup: Wakeup::ThrottleFlush(session),
            } = fired
            {
                let now = sched.now();
                commits.extend(throttle.on_flush_timer(runs, now, &session, handle));
            }
        }
        sched.advance_to(until);
        commits
    }

    fn committed(runs: &RunStore, key: &SessionKey) -> Option<String> {
        runs.get(key)?.committed_text.clone()
    }

    #[test]
    fn test_first_ingest_commits_immediately() {
        let (mut throttle, mut runs, mut sched, key) = setup();
        let commit = throttle.ingest(&mut runs, &mut sched, &key, "a".to_string(), None);
        assert_eq!(commit.map(|c| c.text), Some("a".to_string()));
        assert_eq!(committed(&runs, &key), Some("a".to_string()));
        assert_eq!(sched.pending_timers(), 0);
    }

    #[test]
    fn test_burst_within_window_commits_once_with_last_value() {
        let (mut throttle, mut runs, mut sched, key) = setup();
        throttle.ingest(&mut runs, &mut sched, &key, "x".to_string(), None);
        sched.advance(Duration::from_millis(5));

        let mut immediate = 0;
        for text in ["a", "aa", "aaa", "aaaa", "aaaaa"] {
            if throttle
                .ingest(&mut runs, &mut sched, &key, text.to_string(), None)
                .is_some()
            {
                immediate += 1;
            }
            sched.advance(Duration::from_millis(2));
        }
        assert_eq!(immediate, 0);
        assert_eq!(sched.pending_timers(), 1);
        assert_eq!(committed(&runs, &key), Some("x".to_string()));

        let commits = run_timers(&mut throttle, &mut runs, &mut sched, INTERVAL);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].text, "aaaaa");
        assert_eq!(committed(&runs, &key), Some("aaaaa".to_string()));
    }

    #[test]
    fn test_trailing_flush_fires_at_window_end() {
        let (mut throttle, mut runs, mut sched, key) = setup();
        let start = sched.now();
        throttle.ingest(&mut runs, &mut sched, &key, "a".to_string(), None);
        sched.advance(Duration::from_millis(20));
        throttle.ingest(&mut runs, &mut sched, &key, "ab".to_string(), None);

        assert_eq!(sched.next_deadline(), Some(start + INTERVAL));
    }

    #[test]
    fn test_ingest_after_window_commits_immediately() {
        let (mut throttle, mut runs, mut sched, key) = setup();
        throttle.ingest(&mut runs, &mut sched, &key, "a".to_string(), None);
        sched.advance(INTERVAL);
        let commit = throttle.ingest(&mut runs, &mut sched, &key, "ab".to_string(), None);
        assert!(commit.is_some());
        assert_eq!(sched.pending_timers(), 0);
    }

    #[test]
    fn test_flush_commits_pending_without_delay() {
        let (mut throttle, mut runs, mut sched, key) = setup();
        throttle.ingest(&mut runs, &mut sched, &key, "a".to_string(), None);
        sched.advance(Duration::from_millis(1));
        throttle.ingest(&mut runs, &mut sched, &key, "abc".to_string(), None);
        assert_eq!(committed(&runs, &key), Some("a".to_string()));

        let commit = throttle.flush(&mut runs, &mut sched, &key);
        assert_eq!(commit.map(|c| c.text), Some("abc".to_string()));
        assert_eq!(committed(&runs, &key), Some("abc".to_string()));
        assert_eq!(sched.pending_timers(), 0);
        assert!(throttle.context(&key).unwrap().pending_flush().is_none());
    }

    #[test]
    fn test_flush_without_pending_is_noop() {
        let (mut throttle, mut runs, mut sched, key) = setup();
        assert!(throttle.flush(&mut runs, &mut sched, &key).is_none());
        throttle.ingest(&mut runs, &mut sched, &key, "a".to_string(), None);
        assert!(throttle.flush(&mut runs, &mut sched, &key).is_none());
    }

    #[test]
    fn test_clear_discards_pending_and_cancels_timer() {
        let (mut throttle, mut runs, mut sched, key) = setup();
        throttle.ingest(&mut runs, &mut sched, &key, "a".to_string(), None);
        sched.advance(Duration::from_millis(1));
        throttle.ingest(&mut runs, &mut sched, &key, "ab".to_string(), None);

        throttle.clear(&mut sched, &key);
        assert_eq!(sched.pending_timers(), 0);
        assert!(throttle.context(&key).is_none());

        let commits = run_timers(&mut throttle, &mut runs, &mut sched, INTERVAL * 2);
        assert!(commits.is_empty());
        assert_eq!(committed(&runs, &key), Some("a".to_string()));
    }

    #[test]
    fn test_stale_timer_ignored() {
        let (mut throttle, mut runs, mut sched, key) = setup();
        throttle.ingest(&mut runs, &mut sched, &key, "a".to_string(), None);
        sched.advance(Duration::from_millis(1));
        throttle.ingest(&mut runs, &mut sched, &key, "ab".to_string(), None);
        let stale = throttle.context(&key).unwrap().pending_flush().unwrap();
        throttle.flush(&mut runs, &mut sched, &key);

        sched.advance(Duration::from_millis(1));
        throttle.ingest(&mut runs, &mut sched, &key, "abc".to_string(), None);
        let now = sched.now();
        assert!(throttle.on_flush_timer(&mut runs, now, &key, stale).is_none());
        assert_eq!(throttle.pending_text(&key), Some("abc"));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let (mut throttle, mut runs, mut sched, main) = setup();
        let other = SessionKey::from("other");
        throttle.ingest(&mut runs, &mut sched, &main, "m".to_string(), None);
        throttle.ingest(&mut runs, &mut sched, &other, "o".to_string(), None);
        assert_eq!(committed(&runs, &main), Some("m".to_string()));
        assert_eq!(committed(&runs, &other), Some("o".to_string()));

        throttle.clear_all(&mut sched);
        assert!(throttle.context(&main).is_none());
        assert!(throttle.context(&other).is_none());
    }

    #[test]
    fn test_schedule_failure_commits_immediately() {
        let (mut throttle, mut runs, mut sched, key) = setup();
        throttle.ingest(&mut runs, &mut sched, &key, "a".to_string(), None);
        sched.set_refuse(true);
        let commit = throttle.ingest(&mut runs, &mut sched, &key, "ab".to_string(), None);
        assert_eq!(commit.map(|c| c.text), Some("ab".to_string()));
    }

    #[test]
    fn test_segments_travel_with_commit() {
        let (mut throttle, mut runs, mut sched, key) = setup();
        let segments = vec!["one".to_string(), "two".to_string()];
        throttle.ingest(&mut runs, &mut sched, &key, "onetwo".to_string(), Some(segments.clone()));
        assert_eq!(runs.get(&key).unwrap().segments, Some(segments));
    }
}
