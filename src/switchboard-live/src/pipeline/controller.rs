use tracing::{debug, trace, warn};

use super::patch::ViewPatch;
use crate::config::LiveConfig;
use crate::error::{LiveError, Result};
use crate::event::{ChatEvent, RunId, SessionKey};
use crate::gateway::{GatewayClient, ReloadReason, SendRequest};
use crate::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::reveal::{
    MarkdownFormatter, NodeId, RenderedText, RevealAnimator, RevealConfig, RichFormatter,
};
use crate::router::{EventRouter, RouteOutcome};
use crate::run::{RunState, RunStore};
use crate::scheduler::{Fired, Scheduler, Wakeup};
use crate::segments::SegmentLayout;
use crate::throttle::{Commit, ThrottleScheduler};
use crate::view::{StreamView, ViewSync};

/// Live chat pipeline of one UI process.
///
/// Owns the run store, the throttle registry, the heartbeat, and the reveal
/// nodes of the active session. Every mutation happens inside a call on
/// `&mut self`; the host feeds it gateway events and fired wakeups and
/// drains [`ViewPatch`]es afterwards.
#[derive(Debug)]
pub struct ChatPipeline<S: Scheduler, G: GatewayClient> {
    config: LiveConfig,
    scheduler: S,
    gateway: G,
    session: SessionKey,
    router: EventRouter,
    runs: RunStore,
    throttle: ThrottleScheduler,
    heartbeat: HeartbeatMonitor,
    animator: RevealAnimator,
    view: StreamView,
    error: Option<String>,
    connected: bool,
    foreground: bool,
    patches: Vec<ViewPatch>,
}

impl<S: Scheduler, G: GatewayClient> ChatPipeline<S, G> {
    /// Create a pipeline rendering with [`MarkdownFormatter`].
    ///
    /// The pipeline starts foregrounded and disconnected; the heartbeat arms
    /// once the host reports the connection with [`Self::set_connected`].
    pub fn new(config: LiveConfig, scheduler: S, gateway: G, session: SessionKey) -> Self {
        Self::with_formatter(
            config,
            scheduler,
            gateway,
            session,
            Box::new(MarkdownFormatter::new()),
        )
    }

    pub fn with_formatter(
        config: LiveConfig,
        scheduler: S,
        gateway: G,
        session: SessionKey,
        formatter: Box<dyn RichFormatter>,
    ) -> Self {
        let heartbeat = HeartbeatMonitor::new(HeartbeatConfig {
            interval: config.heartbeat_interval(),
            stall_timeout: config.stall_timeout(),
        });
        Self {
            throttle: ThrottleScheduler::new(config.throttle_interval()),
            animator: RevealAnimator::new(RevealConfig::from(&config), formatter),
            heartbeat,
            config,
            scheduler,
            gateway,
            session,
            router: EventRouter::new(),
            runs: RunStore::new(),
            view: StreamView::new(),
            error: None,
            connected: false,
            foreground: true,
            patches: Vec::new(),
        }
    }

    // ------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// Session under evaluation.
    pub fn session(&self) -> &SessionKey {
        &self.session
    }

    /// Run state of the active session.
    pub fn run(&self) -> Option<&RunState> {
        self.runs.get(&self.session)
    }

    /// Content of the user-visible error slot.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.is_running()
    }

    /// Stream nodes of the active session in segment order.
    pub fn stream_nodes(&self) -> Vec<NodeId> {
        self.view.nodes()
    }

    pub fn rendered(&self, node: NodeId) -> Option<&RenderedText> {
        self.animator.rendered(node)
    }

    /// Revealed plain text of a node.
    pub fn visible_text(&self, node: NodeId) -> Option<&str> {
        self.animator.state(node).map(|state| state.visible_text())
    }

    /// Whether any stream node still has text left to reveal.
    pub fn is_revealing(&self) -> bool {
        self.view.is_revealing(&self.animator)
    }

    pub fn throttle(&self) -> &ThrottleScheduler {
        &self.throttle
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    /// Patches produced since the last drain, oldest first.
    pub fn drain_patches(&mut self) -> Vec<ViewPatch> {
        std::mem::take(&mut self.patches)
    }

    // ------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------

    /// Send a user message, starting a new run.
    ///
    /// The run id is generated here and doubles as the idempotency key. If
    /// the gateway refuses the request the new run is cleared and the error
    /// slot set before the error is returned.
    pub fn send_message(&mut self, text: &str) -> Result<RunId> {
        self.send_message_with_id(text, RunId::generate())
    }

    /// [`Self::send_message`] with a caller-chosen run id.
    pub fn send_message_with_id(&mut self, text: &str, run_id: RunId) -> Result<RunId> {
        let message = text.trim();
        if message.is_empty() {
            return Err(LiveError::EmptyMessage);
        }
        if !self.connected {
            return Err(LiveError::NotConnected);
        }

        let session = self.session.clone();
        self.reset_stream(&session);
        let now = self.scheduler.now();
        self.runs.entry(&session).begin(run_id.clone(), now);
        self.error = None;
        debug!(%session, run = %run_id, "Run started");

        let request = SendRequest {
            session_key: session.clone(),
            message: message.to_string(),
            run_id: run_id.clone(),
        };
        if let Err(err) = self.gateway.send_message(&request) {
            warn!(%session, run = %run_id, error = %err, "Send failed");
            self.clear_run(&session);
            self.raise_error(err.to_string());
            return Err(err);
        }

        self.arm_heartbeat();
        Ok(run_id)
    }

    /// Abort the active run.
    ///
    /// Local state is cleared immediately; the gateway's own `aborted`
    /// event for the run then finds nothing to do.
    pub fn abort(&mut self) -> Result<()> {
        let session = self.session.clone();
        let run_id = self.run().and_then(|run| run.run_id.clone());
        self.clear_run(&session);
        debug!(%session, run = ?run_id.as_ref().map(RunId::as_str), "Abort requested");
        self.gateway.abort_run(&session, run_id.as_ref())
    }

    /// Switch the session under evaluation.
    ///
    /// The old session's run, throttle context, and stream nodes are
    /// dropped synchronously so no late callback writes into them.
    pub fn switch_session(&mut self, session: SessionKey) {
        if session == self.session {
            return;
        }
        let old = std::mem::replace(&mut self.session, session);
        self.clear_run(&old);
        self.error = None;
        debug!(from = %old, to = %self.session, "Session switched");
    }

    /// Report the gateway connection state.
    ///
    /// Disconnecting drops every throttle context, pauses reveal frames,
    /// and stops the heartbeat.
    pub fn set_connected(&mut self, connected: bool) {
        if connected == self.connected {
            return;
        }
        self.connected = connected;
        if connected {
            self.view
                .set_connected(&mut self.animator, &mut self.scheduler, self.foreground);
            self.arm_heartbeat();
        } else {
            self.throttle.clear_all(&mut self.scheduler);
            self.view
                .set_connected(&mut self.animator, &mut self.scheduler, false);
            self.heartbeat.stop(&mut self.scheduler);
        }
        debug!(connected, "Connection state changed");
    }

    /// Report whether the dashboard is visible.
    ///
    /// In the background neither reveal frames nor heartbeat ticks run.
    pub fn set_foreground(&mut self, foreground: bool) {
        if foreground == self.foreground {
            return;
        }
        self.foreground = foreground;
        self.view.set_connected(
            &mut self.animator,
            &mut self.scheduler,
            foreground && self.connected,
        );
        if foreground {
            self.arm_heartbeat();
        } else {
            self.heartbeat.stop(&mut self.scheduler);
        }
    }

    // ------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------

    /// Route a gateway chat event for the active session.
    pub fn handle_event(&mut self, payload: Option<&ChatEvent>) -> RouteOutcome {
        let session = self.session.clone();
        let routed = self.router.route(
            &mut self.runs,
            &mut self.throttle,
            &mut self.scheduler,
            &session,
            payload,
        );
        if routed.outcome != RouteOutcome::Ignored {
            debug!(%session, outcome = routed.outcome.as_str(), "Event routed");
        }

        let clears = matches!(
            routed.outcome,
            RouteOutcome::Aborted | RouteOutcome::Error(_)
        );
        if let Some(commit) = routed.commit {
            self.apply_commit(commit, !clears);
        }

        match &routed.outcome {
            RouteOutcome::Ignored | RouteOutcome::DeltaApplied => {}
            RouteOutcome::Final => self.request_reload(&session, ReloadReason::Final),
            RouteOutcome::FinalOther => {
                self.request_reload(&session, ReloadReason::ForeignRunFinal);
            }
            RouteOutcome::Aborted => self.reset_stream(&session),
            RouteOutcome::Error(message) => {
                self.reset_stream(&session);
                self.raise_error(message.clone());
            }
        }
        if routed.cleared {
            self.patches.push(ViewPatch::Cleared {
                session: session.clone(),
            });
        }

        self.retry_stalled();
        routed.outcome
    }

    /// Report that a history reload for `session` completed.
    ///
    /// Clears the run whose `final` requested it. Returns whether anything
    /// was cleared.
    pub fn history_reloaded(&mut self, session: &SessionKey) -> bool {
        if session != &self.session {
            return false;
        }
        let awaiting = self.run().is_some_and(|run| run.awaiting_reload);
        if awaiting {
            debug!(%session, "History reloaded, run finished");
            self.clear_run(session);
        }
        awaiting
    }

    /// Handle a fired timer or frame.
    pub fn dispatch(&mut self, fired: Fired) {
        match fired {
            Fired::Timer {
                handle,
                wakeup: Wakeup::ThrottleFlush(session),
            } => {
                let now = self.scheduler.now();
                if let Some(commit) =
                    self.throttle
                        .on_flush_timer(&mut self.runs, now, &session, handle)
                {
                    self.apply_commit(commit, true);
                }
            }
            Fired::Timer {
                handle,
                wakeup: Wakeup::Heartbeat,
            } => {
                let session = self.session.clone();
                if let Some(stall) = self.heartbeat.on_tick(
                    &mut self.runs,
                    &mut self.scheduler,
                    &session,
                    handle,
                ) {
                    debug!(%session, run = %stall.run_id, age = ?stall.age, "Recovering stalled run");
                    self.reset_stream(&session);
                    self.patches.push(ViewPatch::Cleared {
                        session: session.clone(),
                    });
                    self.request_reload(&session, ReloadReason::Stalled);
                }
            }
            Fired::Frame {
                handle,
                wakeup: Wakeup::RevealFrame(node),
            } => {
                if let Some(rendered) = self.animator.on_frame(&mut self.scheduler, node, handle) {
                    self.patches.push(ViewPatch::NodeRendered { node, rendered });
                }
            }
            other => trace!(wakeup = ?other.wakeup(), "Ignoring mismatched wakeup"),
        }
        self.retry_stalled();
    }

    // ------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------

    fn apply_commit(&mut self, commit: Commit, sync_view: bool) {
        let active = commit.session == self.session;
        self.patches.push(ViewPatch::Committed {
            session: commit.session,
            text: commit.text,
        });
        if active && sync_view {
            self.sync_view();
        }
    }

    fn sync_view(&mut self) {
        let layout = match self.runs.get(&self.session) {
            Some(run) => {
                SegmentLayout::from_run(run.committed_text.as_deref(), run.segments.as_deref())
            }
            None => SegmentLayout::default(),
        };
        let changes = self
            .view
            .sync(&mut self.animator, &mut self.scheduler, &layout);
        self.push_view_changes(changes);
    }

    fn push_view_changes(&mut self, changes: ViewSync) {
        self.patches.extend(
            changes
                .removed
                .into_iter()
                .map(|node| ViewPatch::NodeRemoved { node }),
        );
        self.patches.extend(
            changes
                .rendered
                .into_iter()
                .map(|(node, rendered)| ViewPatch::NodeRendered { node, rendered }),
        );
    }

    /// Drop the throttle context and stream nodes of `session`.
    fn reset_stream(&mut self, session: &SessionKey) {
        self.throttle.clear(&mut self.scheduler, session);
        if !self.view.is_empty() {
            let removed = self.view.clear(&mut self.animator, &mut self.scheduler);
            self.push_view_changes(ViewSync {
                rendered: Vec::new(),
                removed,
            });
        }
    }

    /// Reset the stream and clear the run of `session`.
    fn clear_run(&mut self, session: &SessionKey) {
        self.reset_stream(session);
        if self.runs.clear(session) {
            self.patches.push(ViewPatch::Cleared {
                session: session.clone(),
            });
        }
    }

    fn raise_error(&mut self, message: String) {
        self.error = Some(message.clone());
        self.patches.push(ViewPatch::ErrorRaised { message });
    }

    fn request_reload(&mut self, session: &SessionKey, reason: ReloadReason) {
        if let Err(err) = self.gateway.reload_history(session, reason) {
            warn!(%session, reason = reason.as_str(), error = %err, "History reload failed");
            return;
        }
        self.patches.push(ViewPatch::ReloadRequested {
            session: session.clone(),
            reason,
        });
    }

    fn arm_heartbeat(&mut self) {
        if self.connected && self.foreground {
            self.heartbeat.start(&mut self.scheduler);
        }
    }

    /// Retry frames and heartbeat ticks the scheduler refused earlier.
    fn retry_stalled(&mut self) {
        self.animator.retry_stalled(&mut self.scheduler);
        if self.connected && self.foreground && self.heartbeat.is_stalled() {
            self.heartbeat.retry_stalled(&mut self.scheduler);
        }
    }
}
