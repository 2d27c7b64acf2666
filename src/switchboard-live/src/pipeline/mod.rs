//! The live chat pipeline.
//!
//! Wires the event router, throttle, heartbeat, and reveal animator into a
//! single owner driven by three inputs:
//!
//! - gateway chat events, through [`ChatPipeline::handle_event`]
//! - fired timers and frames, through [`ChatPipeline::dispatch`]
//! - user and host actions (send, abort, session switch, connection and
//!   visibility changes)
//!
//! The view never reads component state directly; it applies the
//! [`ViewPatch`] list returned by [`ChatPipeline::drain_patches`] and looks up
//! node output with [`ChatPipeline::rendered`].
//!
//! # Example
//!
//! ```rust,ignore
//! use switchboard_live::{ChatPipeline, LiveConfig, ManualScheduler, RecordingGateway};
//!
//! let mut pipeline = ChatPipeline::new(
//!     LiveConfig::default(),
//!     ManualScheduler::new(),
//!     RecordingGateway::new(),
//!     "main".into(),
//! );
//! pipeline.set_connected(true);
//! let run_id = pipeline.send_message("hello")?;
//! pipeline.handle_event(Some(&ChatEvent::delta("main", Some(run_id.as_str()), "Hi")));
//! for patch in pipeline.drain_patches() {
//!     apply(patch);
//! }
//! ```

mod controller;
mod patch;


pub use controller::ChatPipeline;
pub use patch::ViewPatch;
