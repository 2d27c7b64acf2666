//! Injected timer and animation-frame primitives.
//!
//! Components never call a clock or spawn a timer on their own. They ask a
//! [`Scheduler`] for a deferred timer or the next animation frame and get a
//! handle back. When the primitive fires, the host hands the resulting
//! [`Fired`] value to the pipeline, which routes it to the owning component.
//! Wakeups are plain data, so a late firing for a cancelled or replaced
//! handle is recognised by comparing handles and dropped.
//!
//! Two implementations ship with the crate:
//!
//! - [`ManualScheduler`]: fake clock with explicit time advancement, for
//!   tests and virtual-time replays
//! - [`TokioScheduler`]: real timers on a tokio runtime, frames paced by the
//!   host's frame interval

mod manual;
mod runtime;

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::event::SessionKey;
use crate::reveal::NodeId;

pub use manual::ManualScheduler;
pub use runtime::TokioScheduler;

/// Handle of a deferred timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub(crate) u64);

/// Handle of a requested animation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameHandle(pub(crate) u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

impl fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// What a timer or frame wakes up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wakeup {
    /// Deferred trailing-edge commit of a session's throttle context.
    ThrottleFlush(SessionKey),
    /// Next reveal step of a rendered node.
    RevealFrame(NodeId),
    /// Periodic stall check.
    Heartbeat,
}

/// A timer or frame that came due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fired {
    Timer { handle: TimerHandle, wakeup: Wakeup },
    Frame { handle: FrameHandle, wakeup: Wakeup },
}

impl Fired {
    pub fn wakeup(&self) -> &Wakeup {
        match self {
            Self::Timer { wakeup, .. } | Self::Frame { wakeup, .. } => wakeup,
        }
    }
}

/// Failure of the underlying timer or frame primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// No async runtime is available to run the timer.
    #[error("no timer runtime available")]
    NoRuntime,

    /// The receiving side of the scheduler has gone away.
    #[error("scheduler closed")]
    Closed,

    /// The primitive declined the request.
    #[error("scheduler refused request: {0}")]
    Refused(String),
}

/// Timer and animation-frame capability.
///
/// Implementations must never invoke component code themselves; firing only
/// produces [`Fired`] values for the host to dispatch.
pub trait Scheduler {
    /// Current time on this scheduler's clock.
    fn now(&self) -> Instant;

    /// Fire `wakeup` once after `delay`.
    fn set_timeout(&mut self, delay: Duration, wakeup: Wakeup) -> Result<TimerHandle, ScheduleError>;

    /// Cancel a timer. Unknown or already fired handles are ignored.
    fn cancel_timeout(&mut self, handle: TimerHandle);

    /// Fire `wakeup` on the next animation frame.
    fn request_frame(&mut self, wakeup: Wakeup) -> Result<FrameHandle, ScheduleError>;

    /// Cancel a frame request. Unknown or already fired handles are ignored.
    fn cancel_frame(&mut self, handle: FrameHandle);
}
