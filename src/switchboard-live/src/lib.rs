//! Switchboard Live - streamed chat output for the gateway dashboard.
//!
//! The gateway pushes partial-response events for every chat run: bursty,
//! cumulative, and occasionally out of order or from a run the user is not
//! looking at. This crate turns that stream into steady view updates:
//!
//! - **Routing**: events are validated against the active session and run
//!   ([`EventRouter`])
//! - **Throttling**: accepted text is committed at most once per interval
//!   per session ([`ThrottleScheduler`])
//! - **Stall recovery**: runs that stop reporting are abandoned and history
//!   reloaded ([`HeartbeatMonitor`])
//! - **Progressive reveal**: committed text is drip-fed to each rendered
//!   node at an adaptive pace ([`RevealAnimator`])
//!
//! [`ChatPipeline`] owns all of it. Timers and animation frames come from an
//! injected [`Scheduler`], so the same pipeline runs on tokio
//! ([`TokioScheduler`]) or in virtual time ([`ManualScheduler`]).
//!
//! # Usage
//!
//! ```rust,ignore
//! use switchboard_live::{ChatEvent, ChatPipeline, LiveConfig, ManualScheduler, RecordingGateway};
//!
//! let mut pipeline = ChatPipeline::new(
//!     LiveConfig::from_env()?,
//!     ManualScheduler::new(),
//!     RecordingGateway::new(),
//!     "main".into(),
//! );
//! pipeline.set_connected(true);
//!
//! let run_id = pipeline.send_message("What changed in the last deploy?")?;
//! pipeline.handle_event(Some(&ChatEvent::delta("main", Some(run_id.as_str()), "Two")));
//!
//! for patch in pipeline.drain_patches() {
//!     println!("{}", patch.kind());
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod heartbeat;
pub mod pipeline;
pub mod reveal;
pub mod router;
pub mod run;
pub mod scheduler;
pub mod segments;
pub mod throttle;
pub mod view;

// Re-export main types at crate root
pub use config::LiveConfig;
pub use error::{LiveError, Result};
pub use event::{ChatEvent, ChatEventState, RunId, SessionKey, extract_text};
pub use gateway::{GatewayCall, GatewayClient, RecordingGateway, ReloadReason, SendRequest};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, Stall};
pub use pipeline::{ChatPipeline, ViewPatch};
pub use reveal::{
    MarkdownFormatter, NodeId, RenderMode, RenderedText, RevealAnimator, RevealConfig,
    RevealState, RichFormatter,
};
pub use router::{EventRouter, RouteOutcome};
pub use run::{RunState, RunStore};
pub use scheduler::{
    Fired, FrameHandle, ManualScheduler, ScheduleError, Scheduler, TimerHandle, TokioScheduler,
    Wakeup,
};
pub use segments::SegmentLayout;
pub use throttle::{Commit, ThrottleScheduler};
pub use view::StreamView;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
