//! Time events: delayed and periodic publishes
//!
//! A time event's period is stored in one of four units chosen by the
//! magnitude of the period, which keeps the period in 16 bits for delays of
//! up to 15 days.
use arrayvec::ArrayVec;

use crate::{
    cfg::{MAX_TIME_EVENTS, MS_NUM_15DAY},
    error::{QueueOverflowError, TimeEventError},
    event::{self, EventKind, Target},
    klock, Kernel, Port,
};

/// The largest period of each unit.
const THRESHOLDS: [u32; 4] = [60_000, 6_000_000, 57_600_000, MS_NUM_15DAY];

/// The units: millisecond, 100 milliseconds, second and minute.
const UNITS: [u32; 4] = [1, 100, 1_000, 60_000];

/// Choose the unit of a period of `ms` milliseconds. Returns the unit index
/// and the period in that unit, rounded to the nearest integer.
fn quantize(ms: u32) -> (u8, u16) {
    let Some(unit) = THRESHOLDS.iter().position(|&max| ms <= max) else {
        panic!("a time event period can't exceed 15 days");
    };
    let period = if unit == 0 {
        ms
    } else {
        (ms + UNITS[unit] / 2) / UNITS[unit]
    };
    (unit as u8, period as u16)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeEvent {
    pub(crate) topic: &'static str,
    pub(crate) oneshot: bool,
    pub(crate) unit: u8,
    pub(crate) period: u16,
    /// The absolute raw deadline.
    pub(crate) deadline: u32,
}

impl TimeEvent {
    fn period_ms(&self) -> u32 {
        self.period as u32 * UNITS[self.unit as usize]
    }
}

#[derive(Debug)]
pub(crate) struct TimeEventPool {
    pub(crate) slots: ArrayVec<TimeEvent, MAX_TIME_EVENTS>,
    /// The earliest deadline, or `u32::MAX` if the pool is empty.
    timeout_min: u32,
}

impl TimeEventPool {
    pub(crate) fn new() -> Self {
        Self {
            slots: ArrayVec::new(),
            timeout_min: u32::MAX,
        }
    }

    fn arm(
        &mut self,
        topic: &'static str,
        ms: u32,
        oneshot: bool,
        time: u32,
    ) -> Result<(), QueueOverflowError> {
        assert_ne!(ms, 0, "a time event period must be non-zero");
        assert!(
            self.slots.iter().all(|te| te.topic != topic),
            "time event `{topic}` is already armed"
        );
        let (unit, period) = quantize(ms);
        let deadline = time + ms;
        self.slots
            .try_push(TimeEvent {
                topic,
                oneshot,
                unit,
                period,
                deadline,
            })
            .map_err(|_| QueueOverflowError::QueueOverflow)?;
        self.timeout_min = self.timeout_min.min(deadline);
        log::debug!("time event `{topic}` armed (unit = {unit}, period = {period})");
        Ok(())
    }

    fn cancel(&mut self, topic: &str) {
        if let Some(i) = self.slots.iter().position(|te| te.topic == topic) {
            self.slots.swap_remove(i);
            self.update_min();
        }
    }

    fn update_min(&mut self) {
        self.timeout_min = self
            .slots
            .iter()
            .map(|te| te.deadline)
            .min()
            .unwrap_or(u32::MAX);
    }

    pub(crate) fn rebase(&mut self, elapsed: u32) {
        for te in self.slots.iter_mut() {
            te.deadline = te.deadline.saturating_sub(elapsed);
        }
        if self.timeout_min != u32::MAX {
            self.timeout_min = self.timeout_min.saturating_sub(elapsed);
        }
    }
}

/// Publish every time event whose deadline has passed. Oneshot time events
/// are removed, periodic ones advance by their period.
pub(crate) fn fire_due<P: Port>(k: &mut Kernel<P>) {
    let mut lock = klock::lock_cpu(k);
    let time = lock.time;
    if time < lock.time_events.timeout_min {
        return;
    }

    let mut i = 0;
    while i < lock.time_events.slots.len() {
        let te = lock.time_events.slots[i];
        if te.deadline > time {
            i += 1;
            continue;
        }

        log::debug!("time event `{}` fired at {time}", te.topic);
        if let Err(e) = event::give(&mut lock, Target::Subscribers, te.topic) {
            log::warn!("time event `{}` was not delivered: {e:?}", te.topic);
        }

        if te.oneshot {
            // The last slot moves into `i`
            lock.time_events.slots.swap_remove(i);
        } else {
            lock.time_events.slots[i].deadline += te.period_ms();
            i += 1;
        }
    }
    lock.time_events.update_min();
}

impl<P: Port> Kernel<P> {
    /// Publish `topic` once, `ms` milliseconds from now.
    ///
    /// # Panics
    ///
    /// Panics if `ms` is zero or exceeds 15 days, or if `topic` already has a
    /// time event.
    pub fn publish_delay(&mut self, topic: &'static str, ms: u32) -> Result<(), TimeEventError> {
        self.arm_time_event(None, topic, ms, true)
    }

    /// Publish `topic` every `ms` milliseconds.
    pub fn publish_period(&mut self, topic: &'static str, ms: u32) -> Result<(), TimeEventError> {
        self.arm_time_event(None, topic, ms, false)
    }

    /// Subscribe the task `task` to `topic` and publish `topic` once, `ms`
    /// milliseconds from now.
    pub fn send_delay(
        &mut self,
        task: &str,
        topic: &'static str,
        ms: u32,
    ) -> Result<(), TimeEventError> {
        self.arm_time_event(Some(task), topic, ms, true)
    }

    /// Subscribe the task `task` to `topic` and publish `topic` every `ms`
    /// milliseconds.
    pub fn send_period(
        &mut self,
        task: &str,
        topic: &'static str,
        ms: u32,
    ) -> Result<(), TimeEventError> {
        self.arm_time_event(Some(task), topic, ms, false)
    }

    fn arm_time_event(
        &mut self,
        task: Option<&str>,
        topic: &'static str,
        ms: u32,
        oneshot: bool,
    ) -> Result<(), TimeEventError> {
        let task = task.map(|name| self.task_by_name(name));
        let mut lock = klock::lock_cpu(self);

        if let Some(task) = task {
            let e_id = event::event_or_create(&mut lock.objects, topic)?;
            let e = event::event_cb_mut(&mut lock.objects, e_id);
            assert_eq!(
                e.attr.kind(),
                EventKind::Topic,
                "`{topic}` must be a topic-type event"
            );
            e.subscribers.set(task.get());
        }

        let time = lock.time;
        lock.time_events.arm(topic, ms, oneshot, time)?;
        Ok(())
    }

    /// Cancel the time event of `topic`. Does nothing if there's none.
    pub fn time_cancel(&mut self, topic: &str) {
        klock::lock_cpu(self).time_events.cancel(topic);
    }

    /// Get the number of armed time events.
    pub fn time_event_count(&self) -> usize {
        self.time_events.slots.len()
    }
}
