use crate::event::SessionKey;
use crate::gateway::ReloadReason;
use crate::reveal::{NodeId, RenderedText};

/// A change the view has to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewPatch {
    /// New committed text for a session's run.
    Committed { session: SessionKey, text: String },
    /// The session's run state was cleared.
    Cleared { session: SessionKey },
    /// Message for the user-visible error slot.
    ErrorRaised { message: String },
    /// History of the session is being reloaded.
    ReloadRequested {
        session: SessionKey,
        reason: ReloadReason,
    },
    /// A stream node's markup changed.
    NodeRendered { node: NodeId, rendered: RenderedText },
    /// A stream node went away.
    NodeRemoved { node: NodeId },
}

impl ViewPatch {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Committed { .. } => "committed",
            Self::Cleared { .. } => "cleared",
            Self::ErrorRaised { .. } => "error-raised",
            Self::ReloadRequested { .. } => "reload-requested",
            Self::NodeRendered { .. } => "node-rendered",
            Self::NodeRemoved { .. } => "node-removed",
        }
    }
}
