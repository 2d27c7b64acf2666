//! Per-session run state, the single source of truth read by the view.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::event::{RunId, SessionKey};

/// State of the chat run a session is currently streaming.
///
/// Only the event router (terminal transitions) and the throttle
/// scheduler's commit step (delta text) write to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub run_id: Option<RunId>,
    pub committed_text: Option<String>,
    pub segments: Option<Vec<String>>,
    pub started_at: Option<Instant>,
    /// The run's own `final` arrived and a history reload is outstanding.
    pub awaiting_reload: bool,
}

impl RunState {
    /// Start tracking a freshly sent run.
    pub fn begin(&mut self, run_id: RunId, now: Instant) {
        *self = Self {
            run_id: Some(run_id),
            committed_text: None,
            segments: None,
            started_at: Some(now),
            awaiting_reload: false,
        };
    }

    /// Apply a throttled commit.
    pub fn commit(&mut self, text: String, segments: Option<Vec<String>>) {
        self.committed_text = Some(text);
        if segments.is_some() {
            self.segments = segments;
        }
    }

    /// Reset every field.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether a run is in flight.
    pub fn is_active(&self) -> bool {
        self.run_id.is_some()
    }

    pub fn is_cleared(&self) -> bool {
        *self == Self::default()
    }

    /// Committed text length in characters.
    pub fn committed_len(&self) -> usize {
        self.committed_text
            .as_deref()
            .map_or(0, |text| text.chars().count())
    }

    /// How long the run has been going, if it has a start time.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.started_at.map(|started| now.saturating_duration_since(started))
    }
}

/// Run state of every session known to the process.
#[derive(Debug, Default)]
pub struct RunStore {
    runs: HashMap<SessionKey, RunState>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session: &SessionKey) -> Option<&RunState> {
        self.runs.get(session)
    }

    pub fn entry(&mut self, session: &SessionKey) -> &mut RunState {
        self.runs.entry(session.clone()).or_default()
    }

    /// Clear a session's run, returning whether anything was set.
    pub fn clear(&mut self, session: &SessionKey) -> bool {
        match self.runs.get_mut(session) {
            Some(run) if !run.is_cleared() => {
                run.clear();
                true
            }
            _ => false,
        }
    }

    /// Forget a session entirely.
    pub fn remove(&mut self, session: &SessionKey) -> Option<RunState> {
        self.runs.remove(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_resets_previous_run() {
        let mut run = RunState::default();
        run.commit("old".to_string(), Some(vec!["old".to_string()]));
        run.awaiting_reload = true;

        let now = Instant::now();
        run.begin(RunId::from("r1"), now);
        assert_eq!(run.run_id, Some(RunId::from("r1")));
        assert_eq!(run.committed_text, None);
        assert_eq!(run.segments, None);
        assert_eq!(run.started_at, Some(now));
        assert!(!run.awaiting_reload);
    }

    #[test]
    fn test_commit_keeps_segments_when_absent() {
        let mut run = RunState::default();
        run.commit("ab".to_string(), Some(vec!["a".to_string(), "b".to_string()]));
        run.commit("abc".to_string(), None);
        assert_eq!(run.committed_text.as_deref(), Some("abc"));
        assert_eq!(run.segments.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_committed_len_counts_chars() {
        let mut run = RunState::default();
        assert_eq!(run.committed_len(), 0);
        run.commit("日本語".to_string(), None);
        assert_eq!(run.committed_len(), 3);
    }

    #[test]
    fn test_store_clear_reports_change() {
        let mut store = RunStore::new();
        let key = SessionKey::from("main");
        assert!(!store.clear(&key));

        store.entry(&key).begin(RunId::from("r1"), Instant::now());
        assert!(store.clear(&key));
        assert!(store.get(&key).unwrap().is_cleared());
        assert!(!store.clear(&key));
    }
}
