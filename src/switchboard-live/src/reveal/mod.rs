//! Progressive reveal of streamed text.
//!
//! Committed text arrives in coarse jumps; the animator drip-feeds it to each
//! rendered node a few characters per frame so output reads smoothly no
//! matter how bursty the stream is. When a node falls far behind, the step
//! grows so the display catches up instead of lagging indefinitely.
//!
//! All lengths and cursors count `char`s.

mod animator;
mod render;


use std::fmt;

pub use self::animator::{RevealAnimator, RevealConfig, RevealState};
pub use self::render::{MarkdownFormatter, RichFormatter, plain_markup};

/// Identifier of a rendered text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// How a node's markup was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Escaped text with `<br>` line breaks.
    Plain,
    /// Output of the [`RichFormatter`].
    Rich,
}

/// Current output of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedText {
    pub markup: String,
    pub mode: RenderMode,
    /// Characters of the target included in `markup`.
    pub revealed: usize,
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// The first `count` characters of `text`.
pub(crate) fn char_prefix(text: &str, count: usize) -> &str {
    let end = text
        .char_indices()
        .nth(count)
        .map_or(text.len(), |(index, _)| index);
    &text[..end]
}

/// Number of leading characters `a` and `b` share.
pub(crate) fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}
