//! Software timers
//!
//! A software timer calls a function once or periodically. Timers are polled
//! by the idle task, and the callback runs with CPU Lock released, so it may
//! use any non-blocking kernel operation, including the timer operations on
//! the timer being fired.
//!
//! Unlike [time events](crate::Kernel::publish_period), which publish a topic,
//! a timer keeps its period in milliseconds and may run for up to 30 days.
use arrayvec::ArrayVec;
use core::fmt;

use crate::{
    cfg::{MAX_TIMERS, MS_NUM_30DAY},
    error::{QueueOverflowError, TimerStartError},
    klock,
    registry::ObjectId,
    state::Object,
    Kernel, Port,
};

/// The pool index of a software timer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TimerId(usize);

impl fmt::Debug for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TimerId({})", self.0)
    }
}

/// The function called when a timer expires.
pub type TimerCallback<P> = fn(&mut Kernel<P>);

/// Timer control block
pub(crate) struct TimerCb<P: Port> {
    name: &'static str,
    object: ObjectId,
    period: u32,
    oneshot: bool,
    running: bool,
    /// The raw deadline. Meaningless while paused.
    deadline: u32,
    /// The time left when the timer was paused.
    remaining: u32,
    callback: TimerCallback<P>,
}

pub(crate) struct TimerList<P: Port> {
    timers: [Option<TimerCb<P>>; MAX_TIMERS],
    /// The poll order. The newest timer comes first.
    order: ArrayVec<TimerId, MAX_TIMERS>,
    /// The earliest deadline of the running timers, or `u32::MAX`.
    timeout_min: u32,
}

impl<P: Port> TimerList<P> {
    pub(crate) fn new() -> Self {
        Self {
            timers: core::array::from_fn(|_| None),
            order: ArrayVec::new(),
            timeout_min: u32::MAX,
        }
    }

    fn get(&self, id: TimerId) -> Option<&TimerCb<P>> {
        self.timers[id.0].as_ref()
    }

    fn tcb_mut(&mut self, id: TimerId) -> &mut TimerCb<P> {
        match &mut self.timers[id.0] {
            Some(cb) => cb,
            None => panic!("{id:?} is not live"),
        }
    }

    fn update_min(&mut self) {
        self.timeout_min = self
            .timers
            .iter()
            .flatten()
            .filter(|cb| cb.running)
            .map(|cb| cb.deadline)
            .min()
            .unwrap_or(u32::MAX);
    }

    pub(crate) fn rebase(&mut self, elapsed: u32) {
        for cb in self.timers.iter_mut().flatten().filter(|cb| cb.running) {
            cb.deadline = cb.deadline.saturating_sub(elapsed);
        }
        self.update_min();
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

/// Find the timer `name`. Panics if there's none.
fn find_timer<P: Port>(k: &Kernel<P>, name: &str) -> TimerId {
    let Some(id) = k.objects.lookup(name) else {
        panic!("timer `{name}` does not exist");
    };
    match k.objects.get(id) {
        Some(Object::Timer(t)) => *t,
        _ => panic!("`{name}` is not a timer"),
    }
}

/// Fire every running timer whose deadline has passed.
pub(crate) fn poll<P: Port>(k: &mut Kernel<P>) {
    let due: ArrayVec<TimerId, MAX_TIMERS> = {
        let lock = klock::lock_cpu(k);
        let time = lock.time;
        if time < lock.timers.timeout_min {
            return;
        }
        let timers = &lock.timers;
        let due = timers
            .order
            .iter()
            .copied()
            .filter(|&t| timers.get(t).map_or(false, |cb| cb.running && cb.deadline <= time))
            .collect();
        due
    };

    for t in due {
        // An earlier callback may have changed this timer
        let (name, callback, deadline) = {
            let lock = klock::lock_cpu(k);
            let time = lock.time;
            let Some(cb) = lock.timers.get(t).filter(|cb| cb.running && cb.deadline <= time)
            else {
                continue;
            };
            (cb.name, cb.callback, cb.deadline)
        };

        log::trace!("timer `{name}` fired at {}", k.time);
        callback(k);

        let mut lock = klock::lock_cpu(k);
        if let Some(cb) = lock.timers.timers[t.0].as_mut() {
            // Leave it alone if the callback re-armed it
            if cb.name == name && cb.running && cb.deadline == deadline {
                if cb.oneshot {
                    cb.running = false;
                } else {
                    cb.deadline += cb.period;
                }
            }
        }
    }

    klock::lock_cpu(k).timers.update_min();
}

impl<P: Port> Kernel<P> {
    /// Start a software timer that calls `callback` after `period_ms`
    /// milliseconds, and then every `period_ms` milliseconds unless
    /// `oneshot` is set.
    ///
    /// # Panics
    ///
    /// Panics if `period_ms` is zero or exceeds 30 days, or if `name` is
    /// already registered.
    pub fn timer_start(
        &mut self,
        name: &'static str,
        period_ms: u32,
        oneshot: bool,
        callback: TimerCallback<P>,
    ) -> Result<(), TimerStartError> {
        assert_ne!(period_ms, 0, "a timer period must be non-zero");
        assert!(
            period_ms <= MS_NUM_30DAY,
            "a timer period can't exceed 30 days"
        );
        let mut lock = klock::lock_cpu(self);
        assert!(
            !lock.objects.exists(name),
            "the name `{name}` is already registered"
        );

        let slot = lock
            .timers
            .timers
            .iter()
            .position(Option::is_none)
            .ok_or(QueueOverflowError::QueueOverflow)?;
        let id = TimerId(slot);
        let object = lock.objects.insert(name, Object::Timer(id))?;

        let deadline = lock.time + period_ms;
        let timers = &mut lock.timers;
        timers.timers[slot] = Some(TimerCb {
            name,
            object,
            period: period_ms,
            oneshot,
            running: true,
            deadline,
            remaining: 0,
            callback,
        });
        timers.order.insert(0, id);
        timers.timeout_min = timers.timeout_min.min(deadline);
        log::debug!("timer `{name}` started ({id:?}, period = {period_ms} ms)");
        Ok(())
    }

    /// Delete the timer `name`.
    pub fn timer_delete(&mut self, name: &str) {
        let mut lock = klock::lock_cpu(self);
        let id = find_timer(&lock, name);
        let k = &mut *lock;
        if let Some(cb) = k.timers.timers[id.0].take() {
            k.objects.remove(cb.object);
        }
        k.timers.order.retain(|t| *t != id);
        k.timers.update_min();
        log::debug!("timer `{name}` deleted");
    }

    /// Stop the timer `name`, remembering the time left until its deadline.
    pub fn timer_pause(&mut self, name: &str) {
        let mut lock = klock::lock_cpu(self);
        let id = find_timer(&lock, name);
        let time = lock.time;
        let cb = lock.timers.tcb_mut(id);
        if !cb.running {
            return;
        }
        cb.running = false;
        cb.remaining = cb.deadline.saturating_sub(time);
        lock.timers.update_min();
    }

    /// Restart the paused timer `name` with the time it had left.
    pub fn timer_continue(&mut self, name: &str) {
        let mut lock = klock::lock_cpu(self);
        let id = find_timer(&lock, name);
        let time = lock.time;
        let cb = lock.timers.tcb_mut(id);
        if cb.running {
            return;
        }
        cb.running = true;
        cb.deadline = time + cb.remaining;
        lock.timers.update_min();
    }

    /// Restart the timer `name` with a full period from now.
    pub fn timer_reset(&mut self, name: &str) {
        let mut lock = klock::lock_cpu(self);
        let id = find_timer(&lock, name);
        let time = lock.time;
        let cb = lock.timers.tcb_mut(id);
        cb.running = true;
        cb.deadline = time + cb.period;
        lock.timers.update_min();
    }

    /// Get a flag indicating whether the timer `name` is running.
    pub fn timer_running(&self, name: &str) -> bool {
        let id = find_timer(self, name);
        self.timers.get(id).map_or(false, |cb| cb.running)
    }

    /// Get the number of software timers.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }
}
