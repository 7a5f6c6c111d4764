//! Events
//!
//! An event is a named object that tasks deliver to each other. Delivery
//! (*giving*) is either a send to one task or a publish to the event's
//! subscribers. Every delivery is recorded in the [event queue](queue) with
//! the set of tasks that have yet to consume it.
use arrayvec::ArrayVec;

use crate::{
    cfg::{MAX_TASKS, MS_NUM_30DAY, TIME_FOREVER},
    error::{
        BlockedError, CreateEventError, GiveError, NoIdError, QueueOverflowError,
        SubscribeError, WaitEventError, WaitSpecificEventError,
    },
    klock::{self, CpuLockGuard},
    registry::ObjectId,
    state::{Object, Objects},
    stream::Stream,
    task::{self, TaskId, TaskSt, WaitFor},
    utils::OwnerBitmap,
    Kernel, Port,
};

pub(crate) mod queue;
use self::queue::RecordId;

bitflags::bitflags! {
    /// The attribute byte of an event.
    ///
    /// The low two bits select the [`EventKind`].
    pub struct EventAttr: u8 {
        const VALUE = 0x01;
        const STREAM = 0x02;
        const UNBLOCKED = 0x20;
        /// A db write on the key publishes the key.
        const LINK_EVENT = 0x40;
        const GLOBAL = 0x80;
    }
}

impl EventAttr {
    pub fn kind(self) -> EventKind {
        if self.contains(Self::STREAM) {
            EventKind::Stream
        } else if self.contains(Self::VALUE) {
            EventKind::Value
        } else {
            EventKind::Topic
        }
    }
}

/// How deliveries of an event are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Every delivery is queued separately.
    Topic,
    /// Deliveries coalesce into one pending instance carrying a fixed-size
    /// value.
    Value,
    /// Deliveries coalesce into one pending instance carrying a byte stream.
    Stream,
}

/// A received event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub topic: &'static str,
    /// The registry slot of the event. `None` for the events synthesized by
    /// the state machine dispatcher.
    pub id: Option<ObjectId>,
    /// The value size or the number of buffered stream bytes. Zero for a
    /// topic-type event.
    pub size: usize,
}

impl Event {
    pub(crate) const fn reserved(topic: &'static str) -> Self {
        Self {
            topic,
            id: None,
            size: 0,
        }
    }

    /// Get a flag indicating whether the event's topic is `topic`.
    #[inline]
    pub fn is(&self, topic: &str) -> bool {
        self.topic == topic
    }
}

/// Event control block
#[derive(Debug)]
pub(crate) struct EventCb {
    pub(crate) attr: EventAttr,
    /// The task currently giving the event, or reading or writing its db
    /// key.
    pub(crate) producer: Option<TaskId>,
    /// The tasks waiting for `producer` to finish.
    pub(crate) waiters: OwnerBitmap,
    pub(crate) subscribers: OwnerBitmap,
    /// The pending record of a value-type or stream-type event.
    pub(crate) item: Option<RecordId>,
    pub(crate) data: EventData,
}

#[derive(Debug)]
pub(crate) enum EventData {
    None,
    Value { ptr: usize, size: usize },
    Stream(Stream),
}

impl EventCb {
    pub(crate) fn new() -> Self {
        Self {
            attr: EventAttr::empty(),
            producer: None,
            waiters: OwnerBitmap::EMPTY,
            subscribers: OwnerBitmap::EMPTY,
            item: None,
            data: EventData::None,
        }
    }
}

pub(crate) fn event_cb(objects: &Objects, id: ObjectId) -> &EventCb {
    match objects.get(id) {
        Some(Object::Event(e)) => e,
        _ => panic!("{id:?} is not an event"),
    }
}

pub(crate) fn event_cb_mut(objects: &mut Objects, id: ObjectId) -> &mut EventCb {
    match objects.get_mut(id) {
        Some(Object::Event(e)) => e,
        _ => panic!("{id:?} is not an event"),
    }
}

/// Find the event `topic`. Panics if the name belongs to another kind of
/// object.
pub(crate) fn find_event(objects: &Objects, topic: &str) -> Option<ObjectId> {
    let id = objects.lookup(topic)?;
    match objects.get(id) {
        Some(Object::Event(_)) => Some(id),
        _ => panic!("`{topic}` is not an event"),
    }
}

/// Find the event `topic`. Panics if it doesn't exist.
pub(crate) fn expect_event(objects: &Objects, topic: &str) -> ObjectId {
    match find_event(objects, topic) {
        Some(id) => id,
        None => panic!("event `{topic}` does not exist"),
    }
}

/// Find the event `topic`, creating a topic-type event if it doesn't exist.
pub(crate) fn event_or_create(
    objects: &mut Objects,
    topic: &'static str,
) -> Result<ObjectId, NoIdError> {
    match find_event(objects, topic) {
        Some(id) => Ok(id),
        None => objects.insert(topic, Object::Event(EventCb::new())),
    }
}

/// Who an event is given to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target {
    Task(TaskId),
    Subscribers,
}

/// Get a flag indicating whether the caller takes part in the producer lock
/// protocol. Interrupts and the idle task never wait for the lock.
fn uses_producer_lock<P: Port>(k: &Kernel<P>) -> bool {
    k.running && !k.ctx.is_interrupt() && k.current != Some(TaskId::IDLE)
}

/// Claim the producer lock of `e_id` for the current task, or park the task
/// if another task holds it.
pub(crate) fn admit<P: Port>(
    lock: &mut CpuLockGuard<'_, P>,
    e_id: ObjectId,
) -> Result<(), BlockedError> {
    if !uses_producer_lock(&**lock) {
        return Ok(());
    }
    let current = lock.current_task();
    let k = &mut **lock;
    let e = event_cb_mut(&mut k.objects, e_id);
    let producer = e.producer;
    match producer {
        Some(producer) if producer != current => {
            e.waiters.set(current.get());
            log::trace!("{current:?} waits for {producer:?} to release {e_id:?}");
            task::block_current(
                lock,
                TaskSt::WaitMutex,
                WaitFor::Producer(e_id),
                TIME_FOREVER,
            );
            Err(BlockedError::Blocked)
        }
        _ => {
            e.producer = Some(current);
            let tcb = k.tasks.tcb_mut(current);
            if tcb.wait == Some(WaitFor::Producer(e_id)) {
                tcb.wait = None;
            }
            Ok(())
        }
    }
}

/// Release the producer lock of `e_id` and make the highest-priority waiter
/// ready. The caller is responsible for scheduling.
pub(crate) fn release<P: Port>(lock: &mut CpuLockGuard<'_, P>, e_id: ObjectId) {
    if !uses_producer_lock(&**lock) {
        return;
    }
    let k = &mut **lock;
    let e = event_cb_mut(&mut k.objects, e_id);
    e.producer = None;
    task::wake_highest(&mut k.tasks, &mut e.waiters);
}

/// Deliver the event `topic`.
pub(crate) fn give<P: Port>(
    lock: &mut CpuLockGuard<'_, P>,
    target: Target,
    topic: &'static str,
) -> Result<(), GiveError> {
    if let Target::Task(t) = target {
        if lock.tasks.tcb(t).st == TaskSt::DelayNoEvent {
            log::trace!("{t:?} ignores events; `{topic}` dropped");
            return Ok(());
        }
    }
    if !lock.running {
        return Ok(());
    }

    let e_id = event_or_create(&mut lock.objects, topic)?;
    admit(lock, e_id)?;
    let result = deliver(lock, target, e_id);
    release(lock, e_id);
    task::schedule(lock);
    result.map_err(Into::into)
}

fn deliver<P: Port>(
    lock: &mut CpuLockGuard<'_, P>,
    target: Target,
    e_id: ObjectId,
) -> Result<(), QueueOverflowError> {
    let now = lock.now();
    let k = &mut **lock;

    let owners = match target {
        Target::Task(t) => {
            let tcb = k.tasks.tcb(t);
            if tcb.st == TaskSt::WaitSpecificEvent
                && tcb.wait != Some(WaitFor::SpecificEvent(e_id))
            {
                return Ok(());
            }
            OwnerBitmap::single(t.get())
        }
        Target::Subscribers => {
            // Suspended tasks receive nothing
            let mut owners = event_cb(&k.objects, e_id).subscribers;
            for t in k.tasks.by_priority() {
                if k.tasks.tcb(t).st == TaskSt::Suspended {
                    owners.clear(t.get());
                }
            }
            if owners.is_empty() {
                return Ok(());
            }
            owners
        }
    };

    let e = event_cb_mut(&mut k.objects, e_id);
    match (e.attr.kind(), e.item) {
        (EventKind::Topic, _) => {
            k.queue.push(e_id, owners, now)?;
        }
        (_, Some(item)) => k.queue.merge(item, owners, now),
        (_, None) => e.item = Some(k.queue.push(e_id, owners, now)?),
    }
    log::trace!("{e_id:?} delivered to {owners:?}");

    let current = k.current;
    let woken: ArrayVec<TaskId, MAX_TASKS> = k
        .tasks
        .by_priority()
        .filter(|&t| {
            let tcb = k.tasks.tcb(t);
            owners.get(t.get())
                && Some(t) != current
                && match tcb.st {
                    TaskSt::WaitEvent => true,
                    TaskSt::WaitSpecificEvent => {
                        tcb.wait == Some(WaitFor::SpecificEvent(e_id))
                    }
                    _ => false,
                }
        })
        .collect();
    for t in woken {
        k.tasks.make_ready(t);
    }
    Ok(())
}

/// Prepare the current task for a wait and compute its deadline. A repeated
/// wait keeps the deadline of the original call.
fn begin_wait<P: Port>(
    lock: &mut CpuLockGuard<'_, P>,
    timeout_ms: u32,
    wait: WaitFor,
) -> (TaskId, u32) {
    assert!(
        timeout_ms <= MS_NUM_30DAY || timeout_ms == TIME_FOREVER,
        "a wait timeout can't exceed 30 days"
    );
    let current = lock.current_task();
    assert_ne!(current, TaskId::IDLE, "the idle task can't wait for events");

    let time = lock.time;
    let tcb = lock.tasks.tcb_mut(current);
    let deadline = if tcb.wait == Some(wait) {
        tcb.timeout
    } else if timeout_ms == TIME_FOREVER {
        TIME_FOREVER
    } else {
        time + timeout_ms
    };
    tcb.wait = None;
    tcb.timeout = TIME_FOREVER;
    (current, deadline)
}

fn expired(time: u32, timeout_ms: u32, deadline: u32) -> bool {
    timeout_ms == 0 || (deadline != TIME_FOREVER && time >= deadline)
}

/// Consume the oldest pending event of `current`, restricted to `want` if
/// given.
///
/// While looking for `want`, the topic-type records addressed to `current`
/// that don't match are dropped for `current` only.
fn take_event<P: Port>(
    lock: &mut CpuLockGuard<'_, P>,
    current: TaskId,
    want: Option<ObjectId>,
) -> Option<Event> {
    let k = &mut **lock;
    let t = current.get();
    if !k.queue.global().get(t) {
        return None;
    }

    let mut cursor = k.queue.first();
    while let Some(r) = cursor {
        let rec = k.queue.record(r);
        cursor = rec.next;
        if !rec.owners.get(t) {
            continue;
        }
        let e_id = rec.event;
        let e = event_cb(&k.objects, e_id);
        let kind = e.attr.kind();

        if want.map_or(true, |want| want == e_id) {
            let size = match (kind, &e.data) {
                (EventKind::Value, EventData::Value { size, .. }) => *size,
                (EventKind::Stream, EventData::Stream(s)) => s.size(),
                _ => 0,
            };
            let Some(topic) = k.objects.key(e_id) else {
                unreachable!()
            };
            if k.queue.take_owner(r, t) && kind != EventKind::Topic {
                event_cb_mut(&mut k.objects, e_id).item = None;
            }
            return Some(Event {
                topic,
                id: Some(e_id),
                size,
            });
        }

        if kind == EventKind::Topic {
            log::trace!("{e_id:?} dropped for {current:?}");
            k.queue.take_owner(r, t);
        }
    }
    None
}

impl<P: Port> Kernel<P> {
    /// Send the event `topic` to the task `task`.
    ///
    /// The event is dropped if the task is in
    /// [`DelayNoEvent`](TaskSt::DelayNoEvent), or if it waits for a different
    /// topic in [`WaitSpecificEvent`](TaskSt::WaitSpecificEvent).
    pub fn send(&mut self, task: &str, topic: &'static str) -> Result<(), GiveError> {
        let id = self.task_by_name(task);
        self.send_id(id, topic)
    }

    /// Send the event `topic` to the task identified by `task`.
    pub fn send_id(&mut self, task: TaskId, topic: &'static str) -> Result<(), GiveError> {
        let mut lock = klock::lock_cpu(self);
        assert!(lock.task_exists(task), "{task:?} does not exist");
        give(&mut lock, Target::Task(task), topic)
    }

    /// Publish the event `topic` to its subscribers. Suspended subscribers
    /// don't receive it.
    pub fn publish(&mut self, topic: &'static str) -> Result<(), GiveError> {
        give(&mut klock::lock_cpu(self), Target::Subscribers, topic)
    }

    /// Wait for any event for at most `timeout_ms` milliseconds.
    ///
    /// `0` polls, and [`TIME_FOREVER`] never times out. If no event is
    /// pending, the current task is parked and `Blocked` is returned; the
    /// task should repeat the call once it is dispatched again.
    pub fn wait_event(&mut self, timeout_ms: u32) -> Result<Event, WaitEventError> {
        let mut lock = klock::lock_cpu(self);
        let (current, deadline) = begin_wait(&mut lock, timeout_ms, WaitFor::Event);

        if let Some(e) = take_event(&mut lock, current, None) {
            return Ok(e);
        }
        if expired(lock.time, timeout_ms, deadline) {
            return Err(WaitEventError::Timeout);
        }
        task::block_current(&mut lock, TaskSt::WaitEvent, WaitFor::Event, deadline);
        Err(WaitEventError::Blocked)
    }

    /// Wait for the event `topic`. See [`wait_event`](Self::wait_event).
    ///
    /// Other topic-type events pending for the current task are discarded
    /// for this task on the way. Other consumers keep them.
    pub fn wait_specific_event(
        &mut self,
        topic: &'static str,
        timeout_ms: u32,
    ) -> Result<Event, WaitSpecificEventError> {
        let mut lock = klock::lock_cpu(self);
        let e_id = event_or_create(&mut lock.objects, topic)?;
        let wait = WaitFor::SpecificEvent(e_id);
        let (current, deadline) = begin_wait(&mut lock, timeout_ms, wait);

        if let Some(e) = take_event(&mut lock, current, Some(e_id)) {
            return Ok(e);
        }
        if expired(lock.time, timeout_ms, deadline) {
            return Err(WaitSpecificEventError::Timeout);
        }
        task::block_current(&mut lock, TaskSt::WaitSpecificEvent, wait, deadline);
        Err(WaitSpecificEventError::Blocked)
    }

    /// Subscribe the current task to `topic`.
    pub fn subscribe(&mut self, topic: &'static str) -> Result<(), SubscribeError> {
        let mut lock = klock::lock_cpu(self);
        let current = lock.current_task();
        subscribe_id(&mut lock, current, topic)
    }

    /// Subscribe the task `task` to `topic`.
    pub fn subscribe_task(
        &mut self,
        task: &str,
        topic: &'static str,
    ) -> Result<(), SubscribeError> {
        let id = self.task_by_name(task);
        subscribe_id(&mut klock::lock_cpu(self), id, topic)
    }

    /// Unsubscribe the current task from `topic`.
    ///
    /// # Panics
    ///
    /// Panics if `topic` doesn't exist or is a stream-type event.
    pub fn unsubscribe(&mut self, topic: &str) {
        let mut lock = klock::lock_cpu(self);
        let current = lock.current_task();
        let e_id = expect_event(&lock.objects, topic);
        let e = event_cb_mut(&mut lock.objects, e_id);
        assert_ne!(
            e.attr.kind(),
            EventKind::Stream,
            "stream event `{topic}` can't be unsubscribed"
        );
        e.subscribers.clear(current.get());
    }

    /// Set the global attribute of `topic`, creating the event if needed.
    pub fn event_attribute_global(
        &mut self,
        topic: &'static str,
    ) -> Result<(), CreateEventError> {
        self.set_event_attr(topic, EventAttr::GLOBAL)
    }

    /// Set the unblocked attribute of `topic`, creating the event if needed.
    pub fn event_attribute_unblocked(
        &mut self,
        topic: &'static str,
    ) -> Result<(), CreateEventError> {
        self.set_event_attr(topic, EventAttr::UNBLOCKED)
    }

    fn set_event_attr(
        &mut self,
        topic: &'static str,
        attr: EventAttr,
    ) -> Result<(), CreateEventError> {
        let mut lock = klock::lock_cpu(self);
        let e_id = event_or_create(&mut lock.objects, topic)?;
        event_cb_mut(&mut lock.objects, e_id).attr |= attr;
        Ok(())
    }

    /// Get the attribute byte of the event `topic`. Panics if it doesn't
    /// exist.
    pub fn event_attribute(&self, topic: &str) -> EventAttr {
        event_cb(&self.objects, expect_event(&self.objects, topic)).attr
    }
}

pub(crate) fn subscribe_id<P: Port>(
    lock: &mut CpuLockGuard<'_, P>,
    task: TaskId,
    topic: &'static str,
) -> Result<(), SubscribeError> {
    let e_id = event_or_create(&mut lock.objects, topic)?;
    let e = event_cb_mut(&mut lock.objects, e_id);
    if e.attr.kind() == EventKind::Stream {
        assert!(
            e.subscribers.is_empty() || e.subscribers.get(task.get()),
            "stream event `{topic}` accepts only one subscriber"
        );
    }
    e.subscribers.set(task.get());
    Ok(())
}
