//! Replay of recorded gateway chat streams.
//!
//! A replay file is JSON Lines. Each line is either a gateway chat event or
//! a user message that starts a run:
//!
//! ```text
//! {"atMs": 0, "send": "What changed?", "runId": "run-1"}
//! {"atMs": 40, "event": {"runId": "run-1", "sessionKey": "main", "state": "delta", "message": "Two"}}
//! {"atMs": 900, "event": {"runId": "run-1", "sessionKey": "main", "state": "final"}}
//! ```
//!
//! History reloads are simulated: a reload requested by a run's `final` is
//! answered once the stream has finished revealing, and the revealed text
//! of every stream node is captured into the report at that moment.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, info, warn};

use switchboard_live::{
    ChatEvent, ChatPipeline, Fired, GatewayCall, LiveConfig, ManualScheduler, RecordingGateway,
    ReloadReason, RunId, Scheduler, SessionKey, TokioScheduler, ViewPatch,
};

/// Upper bound on virtual time spent settling after the last step.
const SETTLE_LIMIT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayLine {
    at_ms: u64,
    #[serde(default)]
    event: Option<ChatEvent>,
    #[serde(default)]
    send: Option<String>,
    #[serde(default)]
    run_id: Option<RunId>,
}

/// What a replay step does.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayAction {
    /// Deliver a gateway chat event.
    Event(ChatEvent),
    /// Send a user message, optionally under the recorded run id.
    Send {
        message: String,
        run_id: Option<RunId>,
    },
}

/// One timed step of a replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayStep {
    pub at_ms: u64,
    pub action: ReplayAction,
}

/// Parse replay steps from JSON Lines. Blank lines are skipped; steps are
/// returned in time order, ties kept in file order.
pub fn parse_steps(input: &str) -> Result<Vec<ReplayStep>> {
    let mut steps = Vec::new();
    for (index, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let number = index + 1;
        let raw: ReplayLine =
            serde_json::from_str(line).with_context(|| format!("Invalid replay line {number}"))?;
        let action = match (raw.event, raw.send) {
            (Some(event), None) => ReplayAction::Event(event),
            (None, Some(message)) => ReplayAction::Send {
                message,
                run_id: raw.run_id,
            },
            _ => bail!("Replay line {number} must have exactly one of \"event\" or \"send\""),
        };
        steps.push(ReplayStep {
            at_ms: raw.at_ms,
            action,
        });
    }
    steps.sort_by_key(|step| step.at_ms);
    Ok(steps)
}

/// Read and parse a replay file.
pub fn load_steps(path: &Path) -> Result<Vec<ReplayStep>> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay file {}", path.display()))?;
    parse_steps(&input)
}

/// A run whose history reload completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedRun {
    pub at_ms: u64,
    pub run_id: Option<RunId>,
    /// Revealed text of each stream node, in segment order.
    pub segments: Vec<String>,
}

/// Outcome of a replay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub finished: Vec<FinishedRun>,
    pub errors: Vec<String>,
    pub stalls: usize,
    pub foreign_finals: usize,
    pub patches: usize,
    /// Error slot content when the replay ended.
    pub error_slot: Option<String>,
}

impl ReplayReport {
    /// Human-readable summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for run in &self.finished {
            let run_id = run.run_id.as_ref().map_or("-", RunId::as_str);
            out.push_str(&format!("[{:>7}ms] run {run_id}\n", run.at_ms));
            for segment in &run.segments {
                for line in segment.lines() {
                    out.push_str(&format!("    {line}\n"));
                }
            }
        }
        for error in &self.errors {
            out.push_str(&format!("error: {error}\n"));
        }
        out.push_str(&format!(
            "runs: {}  stalls: {}  foreign finals: {}  patches: {}\n",
            self.finished.len(),
            self.stalls,
            self.foreign_finals,
            self.patches
        ));
        if let Some(error) = &self.error_slot {
            out.push_str(&format!("error slot: {error}\n"));
        }
        out
    }
}

/// Pipeline plus the simulated history collaborator.
struct ReplayDriver<S: Scheduler> {
    pipeline: ChatPipeline<S, RecordingGateway>,
    start: Instant,
    pending_reloads: Vec<SessionKey>,
    report: ReplayReport,
}

impl<S: Scheduler> ReplayDriver<S> {
    fn new(config: LiveConfig, scheduler: S, session: SessionKey) -> Self {
        let start = scheduler.now();
        let mut pipeline = ChatPipeline::new(config, scheduler, RecordingGateway::new(), session);
        pipeline.set_connected(true);
        Self {
            pipeline,
            start,
            pending_reloads: Vec::new(),
            report: ReplayReport::default(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        let elapsed = self.pipeline.scheduler().now().saturating_duration_since(self.start);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    fn apply(&mut self, action: ReplayAction) {
        match action {
            ReplayAction::Event(event) => {
                let outcome = self.pipeline.handle_event(Some(&event));
                debug!(state = event.state.as_str(), outcome = outcome.as_str(), "Replayed event");
            }
            ReplayAction::Send { message, run_id } => {
                let result = match run_id {
                    Some(run_id) => self.pipeline.send_message_with_id(&message, run_id),
                    None => self.pipeline.send_message(&message),
                };
                match result {
                    Ok(run_id) => info!(run = %run_id, "Replayed send"),
                    Err(err) => warn!(error = %err, "Replayed send failed"),
                }
            }
        }
        self.collect();
    }

    fn dispatch(&mut self, fired: Fired) {
        self.pipeline.dispatch(fired);
        self.collect();
    }

    /// Drain patches and gateway calls, then answer reloads that are due.
    fn collect(&mut self) {
        for patch in self.pipeline.drain_patches() {
            self.report.patches += 1;
            if let ViewPatch::ErrorRaised { message } = patch {
                self.report.errors.push(message);
            }
        }
        for call in self.pipeline.gateway_mut().take_calls() {
            if let GatewayCall::Reload { session, reason } = call {
                match reason {
                    ReloadReason::Final => self.pending_reloads.push(session),
                    ReloadReason::ForeignRunFinal => self.report.foreign_finals += 1,
                    ReloadReason::Stalled => self.report.stalls += 1,
                }
            }
        }
        if !self.pending_reloads.is_empty() && !self.pipeline.is_revealing() {
            self.answer_reloads();
        }
    }

    fn answer_reloads(&mut self) {
        for session in std::mem::take(&mut self.pending_reloads) {
            let segments = self
                .pipeline
                .stream_nodes()
                .into_iter()
                .filter_map(|node| self.pipeline.visible_text(node).map(str::to_string))
                .collect();
            let run_id = self.pipeline.run().and_then(|run| run.run_id.clone());
            if self.pipeline.history_reloaded(&session) {
                self.report.finished.push(FinishedRun {
                    at_ms: self.elapsed_ms(),
                    run_id,
                    segments,
                });
            }
        }
        self.report.patches += self.pipeline.drain_patches().len();
    }

    fn is_settled(&self) -> bool {
        self.pending_reloads.is_empty() && !self.pipeline.is_revealing()
    }

    fn finish(mut self) -> ReplayReport {
        if !self.pending_reloads.is_empty() {
            self.answer_reloads();
        }
        self.report.error_slot = self.pipeline.error().map(str::to_string);
        self.report
    }
}

impl ReplayDriver<ManualScheduler> {
    /// Run timers and frames in virtual time up to `target`.
    fn pump_until(&mut self, target: Instant) {
        let frame = self.pipeline.config().frame_interval();
        loop {
            let now = self.pipeline.scheduler().now();
            let step = if self.pipeline.scheduler().pending_frames() > 0 {
                (now + frame).min(target)
            } else {
                target
            };
            while let Some(fired) = self.pipeline.scheduler_mut().pop_due(step) {
                self.dispatch(fired);
            }
            self.pipeline.scheduler_mut().advance_to(step);
            for fired in self.pipeline.scheduler_mut().take_frames() {
                self.dispatch(fired);
            }
            if step >= target {
                break;
            }
        }
    }

    /// Keep pumping frame by frame until nothing is revealing.
    fn settle(&mut self) {
        let frame = self.pipeline.config().frame_interval();
        let limit = self.pipeline.scheduler().now() + SETTLE_LIMIT;
        while !self.is_settled() {
            let now = self.pipeline.scheduler().now();
            if now >= limit {
                warn!("Replay did not settle");
                break;
            }
            self.pump_until(now + frame);
        }
    }
}

/// Replay `steps` in virtual time.
pub fn replay_virtual(
    config: LiveConfig,
    session: SessionKey,
    steps: Vec<ReplayStep>,
) -> ReplayReport {
    let mut driver = ReplayDriver::new(config, ManualScheduler::new(), session);
    let start = driver.start;
    for step in steps {
        driver.pump_until(start + Duration::from_millis(step.at_ms));
        driver.apply(step.action);
    }
    driver.settle();
    driver.finish()
}

/// Replay `steps` in real time on the current tokio runtime.
pub async fn replay_realtime(
    config: LiveConfig,
    session: SessionKey,
    steps: Vec<ReplayStep>,
) -> ReplayReport {
    let frame_interval = config.frame_interval();
    let (scheduler, mut fired_rx) = TokioScheduler::new();
    let mut driver = ReplayDriver::new(config, scheduler, session);
    let start = tokio::time::Instant::from_std(driver.start);
    let mut frames = tokio::time::interval(frame_interval);
    frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut steps = steps.into_iter().peekable();

    loop {
        let next_at = steps
            .peek()
            .map(|step| start + Duration::from_millis(step.at_ms));
        if next_at.is_none() && driver.is_settled() {
            break;
        }

        tokio::select! {
            Some(fired) = fired_rx.recv() => driver.dispatch(fired),
            _ = frames.tick() => {
                for fired in driver.pipeline.scheduler_mut().take_frames() {
                    driver.dispatch(fired);
                }
            }
            _ = sleep_until(next_at) => {
                if let Some(step) = steps.next() {
                    driver.apply(step.action);
                }
            }
        }
    }
    driver.finish()
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TRANSCRIPT: &str = r#"
{"atMs": 0, "send": "What changed?", "runId": "run-1"}
{"atMs": 20, "event": {"runId": "run-1", "sessionKey": "main", "state": "delta", "message": "Two"}}
{"atMs": 30, "event": {"runId": "run-1", "sessionKey": "main", "state": "delta", "message": "Two deploys"}}
{"atMs": 40, "event": {"runId": "run-1", "sessionKey": "main", "state": "delta", "message": "Two deploys went out."}}
{"atMs": 45, "event": {"runId": "other", "sessionKey": "main", "state": "final"}}
{"atMs": 50, "event": {"runId": "run-1", "sessionKey": "main", "state": "final"}}
"#;

    fn config() -> LiveConfig {
        LiveConfig {
            reveal_rate: 4,
            ..LiveConfig::default()
        }
    }

    #[test]
    fn test_parse_steps() {
        let steps = parse_steps(TRANSCRIPT).unwrap();
        assert_eq!(steps.len(), 6);
        assert_eq!(
            steps[0].action,
            ReplayAction::Send {
                message: "What changed?".to_string(),
                run_id: Some(RunId::from("run-1")),
            }
        );
        assert!(matches!(steps[5].action, ReplayAction::Event(ref event) if event.state.as_str() == "final"));
    }

    #[test]
    fn test_parse_orders_by_time() {
        let input = r#"{"atMs": 50, "send": "later"}
{"atMs": 10, "send": "earlier"}"#;
        let steps = parse_steps(input).unwrap();
        assert_eq!(steps[0].at_ms, 10);
        assert_eq!(steps[1].at_ms, 50);
    }

    #[test]
    fn test_parse_rejects_ambiguous_line() {
        let err = parse_steps(r#"{"atMs": 0}"#).unwrap_err();
        assert!(err.to_string().contains("exactly one"));

        let err = parse_steps("not json").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_load_steps_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");
        std::fs::write(&path, TRANSCRIPT).unwrap();
        assert_eq!(load_steps(&path).unwrap().len(), 6);
    }

    #[test]
    fn test_virtual_replay_reveals_full_answer() {
        let steps = parse_steps(TRANSCRIPT).unwrap();
        let report = replay_virtual(config(), SessionKey::from("main"), steps);

        assert_eq!(report.finished.len(), 1);
        let run = &report.finished[0];
        assert_eq!(run.run_id, Some(RunId::from("run-1")));
        assert_eq!(run.segments, vec!["Two deploys went out.".to_string()]);
        assert!(run.at_ms >= 50);
        assert_eq!(report.foreign_finals, 1);
        assert_eq!(report.stalls, 0);
        assert!(report.errors.is_empty());
        assert!(report.render().contains("run run-1"));
    }

    #[test]
    fn test_virtual_replay_reports_errors() {
        let input = r#"{"atMs": 0, "send": "hi", "runId": "r"}
{"atMs": 10, "event": {"runId": "r", "sessionKey": "main", "state": "error", "errorMessage": "rate limited"}}"#;
        let report = replay_virtual(config(), SessionKey::from("main"), parse_steps(input).unwrap());
        assert_eq!(report.errors, vec!["rate limited".to_string()]);
        assert_eq!(report.error_slot.as_deref(), Some("rate limited"));
        assert!(report.finished.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_replay_matches_virtual() {
        let steps = parse_steps(TRANSCRIPT).unwrap();
        let report = replay_realtime(config(), SessionKey::from("main"), steps).await;
        assert_eq!(report.finished.len(), 1);
        assert_eq!(
            report.finished[0].segments,
            vec!["Two deploys went out.".to_string()]
        );
    }
}
