//! Reveal nodes backing the active session's streaming message.

use tracing::trace;

use crate::reveal::{NodeId, RenderedText, RevealAnimator};
use crate::scheduler::Scheduler;
use crate::segments::SegmentLayout;

#[derive(Debug, Clone, Copy)]
struct SegmentNode {
    id: NodeId,
    finalized: bool,
}

/// Changes to the node set made by one sync.
#[derive(Debug, Default)]
pub struct ViewSync {
    pub rendered: Vec<(NodeId, RenderedText)>,
    pub removed: Vec<NodeId>,
}

/// Maps segment index `i` of the active run to a stable reveal node.
///
/// Finalized segments are bound statically; the active one is animated. A
/// node whose segment moves from active to finalized is re-bound
/// statically so its remaining text appears at once.
#[derive(Debug)]
pub struct StreamView {
    nodes: Vec<SegmentNode>,
    next_id: u64,
    connected: bool,
}

impl Default for StreamView {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamView {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            next_id: 0,
            connected: true,
        }
    }

    /// Node ids in segment order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|node| node.id).collect()
    }

    pub fn node_for(&self, index: usize) -> Option<NodeId> {
        self.nodes.get(index).map(|node| node.id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bring the node set in line with `layout`.
    pub fn sync(
        &mut self,
        animator: &mut RevealAnimator,
        sched: &mut dyn Scheduler,
        layout: &SegmentLayout,
    ) -> ViewSync {
        let mut changes = ViewSync::default();

        let keep = layout.len().min(self.nodes.len());
        for node in self.nodes.drain(keep..) {
            animator.remove(sched, node.id);
            changes.removed.push(node.id);
        }
        while self.nodes.len() < layout.len() {
            self.next_id += 1;
            let id = NodeId::new(self.next_id);
            trace!(node = %id, index = self.nodes.len(), "Stream node created");
            self.nodes.push(SegmentNode {
                id,
                finalized: false,
            });
        }

        for (node, text) in self.nodes.iter_mut().zip(&layout.finalized) {
            node.finalized = true;
            if let Some(rendered) = animator.bind_static(sched, node.id, text) {
                changes.rendered.push((node.id, rendered));
            }
        }

        if let (Some(text), Some(node)) = (&layout.active, self.nodes.get_mut(layout.active_index())) {
            node.finalized = false;
            if let Some(rendered) = animator.bind(sched, node.id, text) {
                changes.rendered.push((node.id, rendered));
            }
            if !self.connected {
                animator.disconnect(sched, node.id);
            }
        }

        changes
    }

    /// Remove every node.
    pub fn clear(&mut self, animator: &mut RevealAnimator, sched: &mut dyn Scheduler) -> Vec<NodeId> {
        self.nodes
            .drain(..)
            .map(|node| {
                animator.remove(sched, node.id);
                node.id
            })
            .collect()
    }

    /// Pause or resume frame scheduling for every node.
    pub fn set_connected(
        &mut self,
        animator: &mut RevealAnimator,
        sched: &mut dyn Scheduler,
        connected: bool,
    ) {
        self.connected = connected;
        for node in &self.nodes {
            if connected {
                animator.connect(sched, node.id);
            } else {
                animator.disconnect(sched, node.id);
            }
        }
    }

    /// Whether any node still has text left to reveal.
    pub fn is_revealing(&self, animator: &RevealAnimator) -> bool {
        self.nodes.iter().any(|node| {
            animator
                .state(node.id)
                .is_some_and(|state| !state.is_complete())
        })
    }
}
