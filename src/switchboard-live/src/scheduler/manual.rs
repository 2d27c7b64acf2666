//! Fake-clock scheduler for deterministic tests and virtual-time replays.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::{FrameHandle, Fired, ScheduleError, Scheduler, TimerHandle, Wakeup};

/// Scheduler whose clock only moves when told to.
///
/// Timers are kept ordered by deadline (ties broken by creation order) and
/// handed out one at a time by [`ManualScheduler::pop_due`], which moves the
/// clock to the timer's deadline first. Frame requests queue until
/// [`ManualScheduler::take_frames`] is called.
///
/// # Example
/// ```ignore
/// let mut sched = ManualScheduler::new();
/// let until = sched.now() + Duration::from_millis(100);
/// while let Some(fired) = sched.pop_due(until) {
///     pipeline.dispatch(fired);
/// }
/// sched.advance_to(until);
/// ```
#[derive(Debug)]
pub struct ManualScheduler {
    now: Instant,
    next_id: u64,
    timers: BTreeMap<(Instant, u64), Wakeup>,
    deadlines: HashMap<u64, Instant>,
    frames: Vec<(FrameHandle, Wakeup)>,
    refuse: bool,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            now,
            next_id: 0,
            timers: BTreeMap::new(),
            deadlines: HashMap::new(),
            frames: Vec::new(),
            refuse: false,
        }
    }

    /// Make every following schedule request fail until reset.
    pub fn set_refuse(&mut self, refuse: bool) {
        self.refuse = refuse;
    }

    /// Move the clock forward by `by` without firing anything.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Move the clock to `time` if it lies in the future.
    pub fn advance_to(&mut self, time: Instant) {
        if time > self.now {
            self.now = time;
        }
    }

    /// Earliest outstanding timer deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timer due at or before `until`.
    ///
    /// The clock is moved to the timer's deadline so code running in
    /// response observes the time it was meant to fire at.
    pub fn pop_due(&mut self, until: Instant) -> Option<Fired> {
        let (&(deadline, id), _) = self.timers.iter().next()?;
        if deadline > until {
            return None;
        }
        let wakeup = self.timers.remove(&(deadline, id))?;
        self.deadlines.remove(&id);
        self.advance_to(deadline);
        Some(Fired::Timer {
            handle: TimerHandle(id),
            wakeup,
        })
    }

    /// Drain the frame queue. Frames requested while handling these land in
    /// the next batch.
    pub fn take_frames(&mut self) -> Vec<Fired> {
        std::mem::take(&mut self.frames)
            .into_iter()
            .map(|(handle, wakeup)| Fired::Frame { handle, wakeup })
            .collect()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    fn allocate(&mut self) -> Result<u64, ScheduleError> {
        if self.refuse {
            return Err(ScheduleError::Refused("manual scheduler set to refuse".to_string()));
        }
        self.next_id += 1;
        Ok(self.next_id)
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.now
    }

    fn set_timeout(&mut self, delay: Duration, wakeup: Wakeup) -> Result<TimerHandle, ScheduleError> {
        let id = self.allocate()?;
        let deadline = self.now + delay;
        self.timers.insert((deadline, id), wakeup);
        self.deadlines.insert(id, deadline);
        Ok(TimerHandle(id))
    }

    fn cancel_timeout(&mut self, handle: TimerHandle) {
        if let Some(deadline) = self.deadlines.remove(&handle.0) {
            self.timers.remove(&(deadline, handle.0));
        }
    }

    fn request_frame(&mut self, wakeup: Wakeup) -> Result<FrameHandle, ScheduleError> {
        let handle = FrameHandle(self.allocate()?);
        self.frames.push((handle, wakeup));
        Ok(handle)
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        self.frames.retain(|(queued, _)| *queued != handle);
    }
}
