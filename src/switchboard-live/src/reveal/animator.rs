use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use super::render::{RichFormatter, plain_markup};
use super::{NodeId, RenderMode, RenderedText, char_len, char_prefix, common_prefix_len};
use crate::config::LiveConfig;
use crate::scheduler::{FrameHandle, Scheduler, Wakeup};

/// Pacing of the reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealConfig {
    /// Characters revealed per frame.
    pub base_rate: usize,
    /// Backlog above which a frame reveals `base_rate * catch_up_multiplier`.
    pub catch_up_threshold: usize,
    pub catch_up_multiplier: usize,
    /// Minimum spacing of rich renders while a node is still revealing.
    pub rich_render_interval: Duration,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self::from(&LiveConfig::default())
    }
}

impl From<&LiveConfig> for RevealConfig {
    fn from(config: &LiveConfig) -> Self {
        Self {
            base_rate: config.reveal_rate,
            catch_up_threshold: config.catch_up_threshold,
            catch_up_multiplier: config.catch_up_multiplier,
            rich_render_interval: config.rich_render_interval(),
        }
    }
}

impl RevealConfig {
    /// Characters to reveal in one frame given the current backlog.
    pub fn step(&self, backlog: usize) -> usize {
        if backlog > self.catch_up_threshold {
            self.base_rate.saturating_mul(self.catch_up_multiplier)
        } else {
            self.base_rate
        }
    }
}

/// Reveal progress of one node.
#[derive(Debug, Clone)]
pub struct RevealState {
    target_text: String,
    target_len: usize,
    revealed_count: usize,
    last_rich_render: Option<Instant>,
    pending_frame: Option<FrameHandle>,
    connected: bool,
    /// A frame request was refused and must be retried.
    frame_stalled: bool,
    rendered: RenderedText,
}

impl RevealState {
    fn new() -> Self {
        Self {
            target_text: String::new(),
            target_len: 0,
            revealed_count: 0,
            last_rich_render: None,
            pending_frame: None,
            connected: true,
            frame_stalled: false,
            rendered: RenderedText {
                markup: String::new(),
                mode: RenderMode::Plain,
                revealed: 0,
            },
        }
    }

    pub fn target_text(&self) -> &str {
        &self.target_text
    }

    pub fn target_len(&self) -> usize {
        self.target_len
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed_count
    }

    /// The revealed part of the target.
    pub fn visible_text(&self) -> &str {
        char_prefix(&self.target_text, self.revealed_count)
    }

    pub fn pending_frame(&self) -> Option<FrameHandle> {
        self.pending_frame
    }

    pub fn last_rich_render(&self) -> Option<Instant> {
        self.last_rich_render
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_complete(&self) -> bool {
        self.revealed_count >= self.target_len
    }

    pub fn rendered(&self) -> &RenderedText {
        &self.rendered
    }

    /// Replace the target, keeping as much reveal progress as still applies.
    fn retarget(&mut self, target: &str) {
        let new_len = char_len(target);
        let kept = if target.starts_with(self.target_text.as_str()) {
            self.revealed_count
        } else if self.target_text.starts_with(target) {
            self.revealed_count.min(new_len)
        } else {
            self.revealed_count
                .min(common_prefix_len(&self.target_text, target))
        };
        self.target_text = target.to_string();
        self.target_len = new_len;
        self.revealed_count = kept.min(new_len);
    }

    fn render(&mut self, config: &RevealConfig, formatter: &dyn RichFormatter, now: Instant) {
        let rich_due = self.is_complete()
            || self
                .last_rich_render
                .is_none_or(|last| now.saturating_duration_since(last) >= config.rich_render_interval);
        let visible = char_prefix(&self.target_text, self.revealed_count);
        self.rendered = if rich_due {
            self.last_rich_render = Some(now);
            RenderedText {
                markup: formatter.format(visible),
                mode: RenderMode::Rich,
                revealed: self.revealed_count,
            }
        } else {
            RenderedText {
                markup: plain_markup(visible),
                mode: RenderMode::Plain,
                revealed: self.revealed_count,
            }
        };
    }

    fn cancel_frame(&mut self, sched: &mut dyn Scheduler) {
        if let Some(handle) = self.pending_frame.take() {
            sched.cancel_frame(handle);
        }
        self.frame_stalled = false;
    }

    /// Request the next frame if there is anything left to reveal.
    fn schedule_frame(&mut self, sched: &mut dyn Scheduler, node: NodeId) {
        if self.pending_frame.is_some() || !self.connected || self.is_complete() {
            self.frame_stalled = false;
            return;
        }
        match sched.request_frame(Wakeup::RevealFrame(node)) {
            Ok(handle) => {
                self.pending_frame = Some(handle);
                self.frame_stalled = false;
            }
            Err(err) => {
                if !self.frame_stalled {
                    warn!(%node, error = %err, "Could not request reveal frame");
                }
                self.frame_stalled = true;
            }
        }
    }
}

/// Reveal state of every rendered streaming node.
#[derive(Debug)]
pub struct RevealAnimator {
    config: RevealConfig,
    formatter: Box<dyn RichFormatter>,
    nodes: BTreeMap<NodeId, RevealState>,
}

impl RevealAnimator {
    pub fn new(config: RevealConfig, formatter: Box<dyn RichFormatter>) -> Self {
        Self {
            config,
            formatter,
            nodes: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> RevealConfig {
        self.config
    }

    pub fn state(&self, node: NodeId) -> Option<&RevealState> {
        self.nodes.get(&node)
    }

    pub fn rendered(&self, node: NodeId) -> Option<&RenderedText> {
        self.nodes.get(&node).map(RevealState::rendered)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Bind `target` to `node` and re-render it.
    ///
    /// Returns the new output, or `None` when the target did not change.
    pub fn bind(
        &mut self,
        sched: &mut dyn Scheduler,
        node: NodeId,
        target: &str,
    ) -> Option<RenderedText> {
        let now = sched.now();
        let state = self.nodes.entry(node).or_insert_with(RevealState::new);
        if state.target_text == target && state.target_len > 0 {
            return None;
        }
        state.retarget(target);
        state.render(&self.config, self.formatter.as_ref(), now);
        trace!(%node, revealed = state.revealed_count, target = state.target_len, "Bound");
        state.schedule_frame(sched, node);
        Some(state.rendered.clone())
    }

    /// Bind fully revealed content with no animation.
    pub fn bind_static(
        &mut self,
        sched: &mut dyn Scheduler,
        node: NodeId,
        text: &str,
    ) -> Option<RenderedText> {
        let now = sched.now();
        let state = self.nodes.entry(node).or_insert_with(RevealState::new);
        if state.target_text == text && state.is_complete() && state.rendered.mode == RenderMode::Rich
        {
            return None;
        }
        state.cancel_frame(sched);
        state.target_text = text.to_string();
        state.target_len = char_len(text);
        state.revealed_count = state.target_len;
        state.render(&self.config, self.formatter.as_ref(), now);
        Some(state.rendered.clone())
    }

    /// Advance `node` by one frame.
    ///
    /// Frames whose handle is not the node's outstanding request are stale
    /// and ignored.
    pub fn on_frame(
        &mut self,
        sched: &mut dyn Scheduler,
        node: NodeId,
        handle: FrameHandle,
    ) -> Option<RenderedText> {
        let state = self.nodes.get_mut(&node)?;
        if state.pending_frame != Some(handle) {
            trace!(%node, %handle, "Ignoring stale frame");
            return None;
        }
        state.pending_frame = None;

        let backlog = state.target_len.saturating_sub(state.revealed_count);
        let step = self.config.step(backlog);
        state.revealed_count = (state.revealed_count + step).min(state.target_len);
        state.render(&self.config, self.formatter.as_ref(), sched.now());
        trace!(
            %node,
            revealed = state.revealed_count,
            target = state.target_len,
            step,
            "Frame"
        );
        state.schedule_frame(sched, node);
        Some(state.rendered.clone())
    }

    /// Resume scheduling for a node that was disconnected.
    pub fn connect(&mut self, sched: &mut dyn Scheduler, node: NodeId) {
        if let Some(state) = self.nodes.get_mut(&node) {
            state.connected = true;
            state.schedule_frame(sched, node);
        }
    }

    /// Stop scheduling frames for `node`, keeping its progress.
    pub fn disconnect(&mut self, sched: &mut dyn Scheduler, node: NodeId) {
        if let Some(state) = self.nodes.get_mut(&node) {
            state.connected = false;
            state.cancel_frame(sched);
        }
    }

    /// Destroy the state of `node`, cancelling its frame.
    pub fn remove(&mut self, sched: &mut dyn Scheduler, node: NodeId) -> bool {
        match self.nodes.remove(&node) {
            Some(mut state) => {
                state.cancel_frame(sched);
                true
            }
            None => false,
        }
    }

    /// Retry frame requests that were previously refused.
    pub fn retry_stalled(&mut self, sched: &mut dyn Scheduler) {
        for (node, state) in &mut self.nodes {
            if state.frame_stalled {
                state.schedule_frame(sched, *node);
            }
        }
    }

    pub fn has_stalled_frames(&self) -> bool {
        self.nodes.values().any(|state| state.frame_stalled)
    }
}
