//! Real-time scheduler backed by tokio timers.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::trace;

use super::{FrameHandle, Fired, ScheduleError, Scheduler, TimerHandle, Wakeup};

/// Scheduler running timers as tokio tasks.
///
/// Each timeout is a spawned task that sleeps and then sends its [`Fired`]
/// value over an unbounded channel; cancelling aborts the task. Frame
/// requests are queued and released by [`TokioScheduler::take_frames`],
/// which the host calls on every tick of its frame interval.
///
/// # Example
/// ```ignore
/// let (sched, mut fired_rx) = TokioScheduler::new();
/// let mut pipeline = ChatPipeline::new(config, sched, gateway, "main".into());
/// let mut frames = tokio::time::interval(config.frame_interval());
/// loop {
///     tokio::select! {
///         Some(fired) = fired_rx.recv() => pipeline.dispatch(fired),
///         _ = frames.tick() => {
///             for fired in pipeline.scheduler_mut().take_frames() {
///                 pipeline.dispatch(fired);
///             }
///         }
///     }
/// }
/// ```
#[derive(Debug)]
pub struct TokioScheduler {
    fired_tx: mpsc::UnboundedSender<Fired>,
    timers: HashMap<TimerHandle, AbortHandle>,
    frames: Vec<(FrameHandle, Wakeup)>,
    next_id: u64,
}

impl TokioScheduler {
    /// Create the scheduler and the receiver fired timers arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Fired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            fired_tx,
            timers: HashMap::new(),
            frames: Vec::new(),
            next_id: 0,
        };
        (scheduler, fired_rx)
    }

    /// Release all queued frame requests.
    pub fn take_frames(&mut self) -> Vec<Fired> {
        std::mem::take(&mut self.frames)
            .into_iter()
            .map(|(handle, wakeup)| Fired::Frame { handle, wakeup })
            .collect()
    }

    pub fn has_pending_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn active_timers(&self) -> usize {
        self.timers.values().filter(|task| !task.is_finished()).count()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn set_timeout(&mut self, delay: Duration, wakeup: Wakeup) -> Result<TimerHandle, ScheduleError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ScheduleError::NoRuntime)?;
        if self.fired_tx.is_closed() {
            return Err(ScheduleError::Closed);
        }

        // Finished timers are dropped lazily instead of on every firing.
        self.timers.retain(|_, task| !task.is_finished());

        let handle = TimerHandle(self.next_id());
        let fired_tx = self.fired_tx.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired_tx.send(Fired::Timer { handle, wakeup });
        });
        self.timers.insert(handle, task.abort_handle());
        trace!(%handle, ?delay, "Timer scheduled");
        Ok(handle)
    }

    fn cancel_timeout(&mut self, handle: TimerHandle) {
        if let Some(task) = self.timers.remove(&handle) {
            task.abort();
            trace!(%handle, "Timer cancelled");
        }
    }

    fn request_frame(&mut self, wakeup: Wakeup) -> Result<FrameHandle, ScheduleError> {
        if self.fired_tx.is_closed() {
            return Err(ScheduleError::Closed);
        }
        let handle = FrameHandle(self.next_id());
        self.frames.push((handle, wakeup));
        Ok(handle)
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        self.frames.retain(|(queued, _)| *queued != handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_after_delay() {
        let (mut sched, mut fired_rx) = TokioScheduler::new();
        let start = sched.now();
        let handle = sched
            .set_timeout(Duration::from_millis(50), Wakeup::Heartbeat)
            .unwrap();

        let fired = fired_rx.recv().await.unwrap();
        assert_eq!(
            fired,
            Fired::Timer {
                handle,
                wakeup: Wakeup::Heartbeat
            }
        );
        assert!(sched.now() >= start + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timeout_never_fires() {
        let (mut sched, mut fired_rx) = TokioScheduler::new();
        let cancelled = sched
            .set_timeout(Duration::from_millis(10), Wakeup::Heartbeat)
            .unwrap();
        let kept = sched
            .set_timeout(Duration::from_millis(20), Wakeup::ThrottleFlush("main".into()))
            .unwrap();
        sched.cancel_timeout(cancelled);

        let fired = fired_rx.recv().await.unwrap();
        assert!(matches!(fired, Fired::Timer { handle, .. } if handle == kept));
    }

    #[test]
    fn test_timeout_without_runtime_fails() {
        let (mut sched, _fired_rx) = TokioScheduler::new();
        let result = sched.set_timeout(Duration::from_millis(1), Wakeup::Heartbeat);
        assert_eq!(result, Err(ScheduleError::NoRuntime));
    }

    #[test]
    fn test_frames_fail_when_receiver_dropped() {
        let (mut sched, fired_rx) = TokioScheduler::new();
        drop(fired_rx);
        assert_eq!(
            sched.request_frame(Wakeup::Heartbeat),
            Err(ScheduleError::Closed)
        );
    }

    #[test]
    fn test_frames_queue_until_taken() {
        let (mut sched, _fired_rx) = TokioScheduler::new();
        let first = sched.request_frame(Wakeup::Heartbeat).unwrap();
        let second = sched.request_frame(Wakeup::Heartbeat).unwrap();
        sched.cancel_frame(first);
        assert!(sched.has_pending_frames());

        let frames = sched.take_frames();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Fired::Frame { handle, .. } if handle == second));
        assert!(!sched.has_pending_frames());
    }
}
