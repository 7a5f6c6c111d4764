//! Tasks
use core::{fmt, ops};

use crate::{
    cfg::{MAX_PRIORITY, MAX_TASKS, MS_NUM_30DAY, TIME_FOREVER},
    error::{NoIdError, TaskStartError},
    klock::{self, CpuLockGuard},
    registry::ObjectId,
    state::Object,
    Kernel, Port,
};

#[doc(hidden)]
pub mod readyqueue;
use self::readyqueue::ReadyQueue;

/// The dense numeric id of a task. Ids are handed out in start order and
/// never reused. The idle task has id 0.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(usize);

impl TaskId {
    /// The idle task.
    pub const IDLE: Self = Self(0);

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

/// Task state machine
///
/// <center>
///
#[doc = svgbobdoc::transform!(
/// ```svgbob
///            .---------.   resume    .-----------.
///            |  Ready  |<------------| Suspended |
///            '---------'             '-----------'
///       dispatch | ^  ^  ^                 ^
///                | |  |  | deadline,       | suspend
///                v |  |  | event, release  |
///            .---------.  |  .----------------------.
///            | Running |--+->| Delay, DelayNoEvent, |
///            '---------'     | WaitEvent,           |
///                 delay,     | WaitSpecificEvent,   |
///                 wait,      | WaitMutex            |
///                 block      '----------------------'
/// ```
)]
///
/// </center>
///
/// There is no terminal state. A deleted task is removed from the kernel
/// altogether.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSt {
    Ready,
    Running,
    Suspended,
    /// Sleeping until a deadline.
    Delay,
    /// Sleeping until a deadline. Events sent to the task are dropped.
    DelayNoEvent,
    /// Waiting for any event.
    WaitEvent,
    /// Waiting for one topic.
    WaitSpecificEvent,
    /// Waiting for a mutex or for an event slot's producer lock.
    WaitMutex,
}

impl TaskSt {
    /// Get a flag indicating whether the task is `Ready` or `Running`.
    #[inline]
    pub fn is_runnable(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

/// What drives a task's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// A plain task body.
    Task,
    /// An event-handler loop ([`Reactor`](crate::Reactor)).
    Reactor,
    /// A hierarchical state machine ([`Sm`](crate::Sm)).
    Sm,
}

/// The operation a task is blocked in. Kept until the task repeats the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitFor {
    Event,
    SpecificEvent(ObjectId),
    Mutex(ObjectId),
    /// The producer lock of an event slot.
    Producer(ObjectId),
}

/// Task control block
#[derive(Debug)]
pub(crate) struct TaskCb {
    pub(crate) name: &'static str,
    pub(crate) object: ObjectId,
    pub(crate) priority: usize,
    pub(crate) st: TaskSt,
    /// The absolute raw deadline of a delay or a wait, or `TIME_FOREVER`.
    pub(crate) timeout: u32,
    pub(crate) timeslice_count: u32,
    /// The ticks charged to the task in the current CPU usage window.
    pub(crate) usage_count: u32,
    /// The share of the last complete window, in percent.
    pub(crate) cpu_usage: u8,
    pub(crate) wait: Option<WaitFor>,
    pub(crate) kind: TaskKind,
    /// Ring links. A task that's alone in its ring links to itself.
    pub(crate) next: TaskId,
    pub(crate) prev: TaskId,
}

impl TaskCb {
    pub(crate) fn new(
        name: &'static str,
        object: ObjectId,
        priority: usize,
        kind: TaskKind,
    ) -> Self {
        Self {
            name,
            object,
            priority,
            st: TaskSt::Ready,
            timeout: TIME_FOREVER,
            timeslice_count: 0,
            usage_count: 0,
            cpu_usage: 0,
            wait: None,
            kind,
            next: TaskId::IDLE,
            prev: TaskId::IDLE,
        }
    }
}

/// All task control blocks plus the ready queue.
pub(crate) struct TaskTable {
    tcbs: [Option<TaskCb>; MAX_TASKS],
    next_id: usize,
    pub(crate) ready: ReadyQueue,
}

impl TaskTable {
    pub(crate) fn new() -> Self {
        Self {
            tcbs: core::array::from_fn(|_| None),
            next_id: 0,
            ready: ReadyQueue::new(),
        }
    }

    /// Reserve the next task id.
    pub(crate) fn alloc_id(&mut self) -> Result<TaskId, NoIdError> {
        if self.next_id >= MAX_TASKS {
            return Err(NoIdError::NoId);
        }
        self.next_id += 1;
        Ok(TaskId(self.next_id - 1))
    }

    /// Store `tcb` under `id` and link it into its ring.
    pub(crate) fn insert(&mut self, id: TaskId, tcb: TaskCb) {
        self.tcbs[id.0] = Some(tcb);
        self.ring_insert(id);
    }

    /// Unlink and drop the task `id`.
    pub(crate) fn remove(&mut self, id: TaskId) -> TaskCb {
        self.ring_remove(id);
        match self.tcbs[id.0].take() {
            Some(tcb) => tcb,
            None => unreachable!(),
        }
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<&TaskCb> {
        self.tcbs.get(id.0)?.as_ref()
    }

    /// Get the TCB of `id`. Panics if the task doesn't exist.
    pub(crate) fn tcb(&self, id: TaskId) -> &TaskCb {
        match self.get(id) {
            Some(tcb) => tcb,
            None => panic!("{id:?} does not exist"),
        }
    }

    pub(crate) fn tcb_mut(&mut self, id: TaskId) -> &mut TaskCb {
        match self.tcbs.get_mut(id.0).and_then(Option::as_mut) {
            Some(tcb) => tcb,
            None => panic!("{id:?} does not exist"),
        }
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskCb> {
        self.tcbs.get_mut(id.0)?.as_mut()
    }

    /// Iterate over the ids of all live tasks, the idle task included.
    pub(crate) fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        (0..self.next_id)
            .filter(|&i| self.tcbs[i].is_some())
            .map(TaskId)
    }

    /// Move every finite deadline `elapsed` milliseconds earlier.
    pub(crate) fn rebase(&mut self, elapsed: u32) {
        for tcb in self.tcbs.iter_mut().flatten() {
            if tcb.timeout != TIME_FOREVER {
                tcb.timeout = tcb.timeout.saturating_sub(elapsed);
            }
        }
    }
}

impl<P: Port> Kernel<P> {
    /// Start a task at `priority`. Only allowed before [`run`](Self::run).
    ///
    /// # Panics
    ///
    /// Panics if the kernel is running, if `priority` is not in
    /// `1..MAX_PRIORITY`, or if `name` is already registered.
    pub fn task_start(
        &mut self,
        name: &'static str,
        priority: usize,
    ) -> Result<TaskId, TaskStartError> {
        self.start_task(name, priority, TaskKind::Task)
    }

    pub(crate) fn start_task(
        &mut self,
        name: &'static str,
        priority: usize,
        kind: TaskKind,
    ) -> Result<TaskId, TaskStartError> {
        assert!(
            (1..MAX_PRIORITY).contains(&priority),
            "priority {priority} of task `{name}` is out of range"
        );
        let lock = klock::lock_cpu(self);
        assert!(!lock.running, "task `{name}` can't be started once the kernel runs");
        spawn(lock, name, priority, kind).map_err(Into::into)
    }

    /// Get the id of the task `name`. Panics if there's no such task.
    pub fn get_task_id(&self, name: &str) -> TaskId {
        self.task_by_name(name)
    }

    pub(crate) fn task_by_name(&self, name: &str) -> TaskId {
        match self.objects.lookup(name).and_then(|id| self.objects.get(id)) {
            Some(Object::Task(t)) => *t,
            Some(_) => panic!("`{name}` is not a task"),
            None => panic!("task `{name}` does not exist"),
        }
    }

    pub fn task_state(&self, id: TaskId) -> TaskSt {
        self.tasks.tcb(id).st
    }

    pub fn task_priority(&self, id: TaskId) -> usize {
        self.tasks.tcb(id).priority
    }

    pub fn task_kind(&self, id: TaskId) -> TaskKind {
        self.tasks.tcb(id).kind
    }

    pub fn task_name(&self, id: TaskId) -> &'static str {
        self.tasks.tcb(id).name
    }

    /// Get the share of the processor time, in percent, that the task `id`
    /// used during the last complete CPU usage window (see
    /// [`KernelCfg::cpu_usage_window`](crate::KernelCfg::cpu_usage_window)).
    /// Returns `0` until the first window is complete.
    pub fn task_cpu_usage(&self, id: TaskId) -> u8 {
        self.tasks.tcb(id).cpu_usage
    }

    /// Get a flag indicating whether the task `id` exists.
    pub fn task_exists(&self, id: TaskId) -> bool {
        self.tasks.get(id).is_some()
    }

    /// Put the current task to sleep for `time_ms` milliseconds.
    ///
    /// # Panics
    ///
    /// Panics if `time_ms` exceeds 30 days, if called by the idle task, or if
    /// the current task is not `Running`.
    pub fn delay(&mut self, time_ms: u32) {
        delay_current(klock::lock_cpu(self), time_ms, TaskSt::Delay);
    }

    /// Like [`delay`](Self::delay), but events sent to the task while it
    /// sleeps are dropped.
    pub fn delay_no_event(&mut self, time_ms: u32) {
        delay_current(klock::lock_cpu(self), time_ms, TaskSt::DelayNoEvent);
    }

    /// Suspend the task `name`. A suspended task receives no published event.
    pub fn suspend(&mut self, name: &str) {
        let id = self.task_by_name(name);
        assert_ne!(id, TaskId::IDLE, "the idle task can't be suspended");

        let mut lock = klock::lock_cpu(self);
        let tcb = lock.tasks.tcb_mut(id);
        tcb.st = TaskSt::Suspended;
        let p = tcb.priority;
        lock.tasks.rotate(p);
        log::debug!("{id:?} (`{name}`) suspended");
        schedule(&mut lock);
    }

    /// Resume the suspended task `name`. Does nothing if the task is not
    /// suspended.
    pub fn resume(&mut self, name: &str) {
        let id = self.task_by_name(name);
        let mut lock = klock::lock_cpu(self);
        let st = lock.tasks.tcb(id).st;
        if st != TaskSt::Suspended {
            log::warn!("{id:?} (`{name}`) is {st:?}, not suspended; resume ignored");
            return;
        }
        lock.tasks.make_ready(id);
        log::debug!("{id:?} (`{name}`) resumed");
        schedule(&mut lock);
    }

    /// Let the next ready task of the same priority run.
    pub fn yield_now(&mut self) {
        let mut lock = klock::lock_cpu(self);
        let current = lock.current_task();
        lock.tasks.rotate_past(current);
        schedule(&mut lock);
    }

    /// Delete the task `name`.
    ///
    /// The task is unlinked from its ring, unregistered, and its bit is
    /// cleared from every owner bitmap in the kernel. Its id is not reused.
    pub fn delete(&mut self, name: &str) {
        let id = self.task_by_name(name);
        assert_ne!(id, TaskId::IDLE, "the idle task can't be deleted");
        let mut lock = klock::lock_cpu(self);
        delete_task(&mut lock, id);
        schedule(&mut lock);
    }

    /// Delete the current task.
    pub fn exit(&mut self) {
        let mut lock = klock::lock_cpu(self);
        let id = lock.current_task();
        assert_ne!(id, TaskId::IDLE, "the idle task can't exit");
        delete_task(&mut lock, id);
        schedule(&mut lock);
    }
}

impl<P: Port> Kernel<P> {
    /// Mark the start of a run of the current task's body and get an RAII
    /// guard that marks its end.
    ///
    /// While the guard is alive, the current task stays current: a call that
    /// readies a higher-priority task or parks the current one only records
    /// the need for a context switch, and the switch happens when the guard
    /// is dropped. This keeps every call the body makes charged to the task
    /// that is actually executing it.
    ///
    /// # Panics
    ///
    /// Panics if another `TaskBody` is alive.
    pub fn task_body(&mut self) -> TaskBody<'_, P> {
        assert!(!self.in_body, "a task body is already running");
        self.in_body = true;
        TaskBody { kernel: self }
    }
}

/// RAII guard for the run of a task body. See [`Kernel::task_body`].
///
/// [`Kernel`] can be borrowed from this type.
pub struct TaskBody<'a, P: Port> {
    kernel: &'a mut Kernel<P>,
}

impl<P: Port> Drop for TaskBody<'_, P> {
    fn drop(&mut self) {
        let mut lock = klock::lock_cpu(self.kernel);
        lock.in_body = false;
        if lock.sched_pending && !lock.ctx.is_interrupt() {
            lock.sched_pending = false;
            schedule(&mut lock);
        }
    }
}

impl<P: Port> ops::Deref for TaskBody<'_, P> {
    type Target = Kernel<P>;
    fn deref(&self) -> &Self::Target {
        self.kernel
    }
}

impl<P: Port> ops::DerefMut for TaskBody<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.kernel
    }
}

/// Register and link a new task.
pub(crate) fn spawn<P: Port>(
    mut lock: CpuLockGuard<'_, P>,
    name: &'static str,
    priority: usize,
    kind: TaskKind,
) -> Result<TaskId, NoIdError> {
    assert!(
        !lock.objects.exists(name),
        "the name `{name}` is already registered"
    );
    let id = lock.tasks.alloc_id()?;
    let object = lock.objects.insert(name, Object::Task(id))?;
    lock.tasks.insert(id, TaskCb::new(name, object, priority, kind));
    log::debug!("{id:?} (`{name}`) started at priority {priority}");
    Ok(id)
}

fn delay_current<P: Port>(mut lock: CpuLockGuard<'_, P>, time_ms: u32, st: TaskSt) {
    assert!(time_ms <= MS_NUM_30DAY, "a delay can't exceed 30 days");
    let id = lock.current_task();
    assert_ne!(id, TaskId::IDLE, "the idle task can't be delayed");

    let time = lock.time;
    let tcb = lock.tasks.tcb_mut(id);
    assert_eq!(tcb.st, TaskSt::Running, "only the running task can be delayed");
    tcb.timeout = time + time_ms;
    tcb.st = st;
    tcb.wait = None;
    let p = tcb.priority;
    lock.tasks.rotate(p);
    schedule(&mut lock);
}

/// Park the current task in `st` until it's made ready again.
pub(crate) fn block_current<P: Port>(
    lock: &mut CpuLockGuard<'_, P>,
    st: TaskSt,
    wait: WaitFor,
    timeout: u32,
) {
    debug_assert!(!lock.ctx.is_interrupt(), "interrupts can't block");
    let id = lock.current_task();
    let tcb = lock.tasks.tcb_mut(id);
    tcb.st = st;
    tcb.wait = Some(wait);
    tcb.timeout = timeout;
    let p = tcb.priority;
    lock.tasks.rotate(p);
    schedule(lock);
}

/// Find the highest-priority task whose bit is set in `waiters`, clear the
/// bit, and make the task ready.
pub(crate) fn wake_highest(
    tasks: &mut TaskTable,
    waiters: &mut crate::utils::OwnerBitmap,
) -> Option<TaskId> {
    if waiters.is_empty() {
        return None;
    }
    let id = tasks.by_priority().find(|t| waiters.get(t.0))?;
    waiters.clear(id.0);
    tasks.make_ready(id);
    Some(id)
}

fn delete_task<P: Port>(lock: &mut CpuLockGuard<'_, P>, id: TaskId) {
    let tcb = lock.tasks.remove(id);
    lock.objects.remove(tcb.object);
    crate::state::purge_task_bits(lock, id);
    log::debug!("{id:?} (`{}`) deleted", tcb.name);
}

/// Promote every delayed or waiting task whose deadline has passed. Returns
/// `true` if any task was promoted.
pub(crate) fn expire_timeouts<P: Port>(lock: &mut CpuLockGuard<'_, P>) -> bool {
    let time = lock.time;
    let expired: arrayvec::ArrayVec<TaskId, MAX_TASKS> = lock
        .tasks
        .by_priority()
        .filter(|&t| {
            let tcb = lock.tasks.tcb(t);
            matches!(
                tcb.st,
                TaskSt::Delay
                    | TaskSt::DelayNoEvent
                    | TaskSt::WaitEvent
                    | TaskSt::WaitSpecificEvent
            ) && tcb.timeout != TIME_FOREVER
                && time >= tcb.timeout
        })
        .collect();

    for &t in expired.iter() {
        lock.tasks.make_ready(t);
    }
    !expired.is_empty()
}

/// Charge one tick to the current task, and update every task's usage once
/// the window is full.
pub(crate) fn sample_cpu_usage<P: Port>(lock: &mut CpuLockGuard<'_, P>) {
    let Some(current) = lock.current else {
        return;
    };
    let window = lock.cfg.get_cpu_usage_window();
    let k = &mut **lock;
    k.usage_samples += 1;
    if let Some(tcb) = k.tasks.get_mut(current) {
        tcb.usage_count += 1;
    }
    if k.usage_samples < window {
        return;
    }

    let total = u64::from(k.usage_samples);
    k.usage_samples = 0;
    for tcb in k.tasks.tcbs.iter_mut().flatten() {
        tcb.cpu_usage = (u64::from(tcb.usage_count) * 100 / total) as u8;
        tcb.usage_count = 0;
    }
}

/// Advance the current task's time slice by one tick and rotate its ring
/// when the slice is used up.
pub(crate) fn tick_timeslice<P: Port>(lock: &mut CpuLockGuard<'_, P>) -> bool {
    let Some(current) = lock.current else {
        return false;
    };
    if current == TaskId::IDLE {
        return false;
    }
    let limit = lock.cfg.get_timeslice();
    let tcb = lock.tasks.tcb_mut(current);
    if tcb.st != TaskSt::Running {
        return false;
    }
    tcb.timeslice_count += 1;
    if tcb.timeslice_count < limit {
        return false;
    }
    tcb.timeslice_count = 0;
    lock.tasks.rotate_past(current)
}

/// Switch to the task chosen by the ready queue, if it differs from the
/// current one.
///
/// Does nothing while the scheduler is locked or the kernel is not running.
/// In an interrupt context, the decision is deferred until the outermost
/// interrupt returns. While a task body is running, it's deferred until the
/// body returns.
pub(crate) fn schedule<P: Port>(lock: &mut CpuLockGuard<'_, P>) {
    if !lock.running || lock.sched_locked {
        return;
    }
    if lock.ctx.is_interrupt() {
        lock.sched_pending = true;
        log::trace!("scheduling deferred until the interrupt returns");
        return;
    }
    if lock.in_body {
        lock.sched_pending = true;
        log::trace!("scheduling deferred until the task body returns");
        return;
    }

    let next = lock.tasks.select_next();
    let prev = lock.current;
    if prev == Some(next) {
        return;
    }

    if let Some(prev) = prev {
        if let Some(tcb) = lock.tasks.get(prev) {
            let (st, p) = (tcb.st, tcb.priority);
            if st == TaskSt::Running {
                // Hand the ring over to the next ready task of the same
                // priority once a higher priority is done
                if prev != TaskId::IDLE && lock.tasks.ready.heads[p] == Some(prev) {
                    lock.tasks.rotate_past(prev);
                }
                lock.tasks.tcb_mut(prev).st = TaskSt::Ready;
            }
        }
    }

    let tcb = lock.tasks.tcb_mut(next);
    tcb.st = TaskSt::Running;
    tcb.timeslice_count = 0;
    lock.current = Some(next);

    log::trace!("context switch {prev:?} -> {next:?}");
    lock.port.context_switch(prev, next);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{utils::mock::MockPort, KernelCfg};

    fn kernel() -> Kernel<MockPort> {
        let _ = env_logger::builder().is_test(true).try_init();
        Kernel::new(MockPort::default(), KernelCfg::new())
    }

    #[test]
    fn first_dispatch_picks_highest_priority() {
        let mut k = kernel();
        let low = k.task_start("low", 1).unwrap();
        let high = k.task_start("high", 6).unwrap();
        assert_eq!((low.get(), high.get()), (1, 2));
        k.run();
        assert_eq!(k.current(), Some(high));
        assert_eq!(k.port.switches, [(None, high)]);
        assert_eq!(k.task_state(low), TaskSt::Ready);
        k.tasks.assert_ready_queue_consistent();
    }

    #[test]
    fn delay_and_expiry() {
        let mut k = kernel();
        let a = k.task_start("a", 3).unwrap();
        let b = k.task_start("b", 2).unwrap();
        k.run();
        assert_eq!(k.current(), Some(a));

        k.delay(10);
        assert_eq!(k.task_state(a), TaskSt::Delay);
        assert_eq!(k.current(), Some(b));
        k.tasks.assert_ready_queue_consistent();

        k.delay_no_event(20);
        assert_eq!(k.current(), Some(TaskId::IDLE));

        for _ in 0..10 {
            k.tick();
        }
        k.idle_pass();
        assert_eq!(k.current(), Some(a));
        assert_eq!(k.task_state(b), TaskSt::DelayNoEvent);
        k.tasks.assert_ready_queue_consistent();
    }

    #[test]
    #[should_panic(expected = "idle task can't be delayed")]
    fn idle_cannot_delay() {
        let mut k = kernel();
        k.run();
        k.delay(1);
    }

    #[test]
    #[should_panic(expected = "can't exceed 30 days")]
    fn delay_limit() {
        let mut k = kernel();
        k.task_start("a", 1).unwrap();
        k.run();
        k.delay(MS_NUM_30DAY + 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn priority_range() {
        kernel().task_start("a", MAX_PRIORITY).unwrap();
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_name() {
        let mut k = kernel();
        k.task_start("a", 1).unwrap();
        k.task_start("a", 2).unwrap();
    }

    #[test]
    fn task_ids_run_out() {
        let mut k = kernel();
        const NAMES: [&str; MAX_TASKS] = [
            "t00", "t01", "t02", "t03", "t04", "t05", "t06", "t07", "t08", "t09", "t10",
            "t11", "t12", "t13", "t14", "t15", "t16", "t17", "t18", "t19", "t20", "t21",
            "t22", "t23", "t24", "t25", "t26", "t27", "t28", "t29", "t30", "t31",
        ];
        // The idle task holds id 0
        for name in &NAMES[..MAX_TASKS - 1] {
            k.task_start(name, 1).unwrap();
        }
        assert_eq!(k.task_start(NAMES[MAX_TASKS - 1], 1), Err(TaskStartError::NoId));
    }

    #[test]
    fn suspend_resume() {
        let mut k = kernel();
        let a = k.task_start("a", 4).unwrap();
        let b = k.task_start("b", 1).unwrap();
        k.run();
        k.suspend("a");
        assert_eq!(k.current(), Some(b));
        assert_eq!(k.task_state(a), TaskSt::Suspended);

        // Not suspended: ignored
        k.resume("b");
        assert_eq!(k.task_state(b), TaskSt::Running);

        k.resume("a");
        assert_eq!(k.current(), Some(a));
        assert_eq!(k.task_state(b), TaskSt::Ready);
        k.tasks.assert_ready_queue_consistent();
    }

    #[test]
    fn yield_round_robin() {
        let mut k = kernel();
        let a = k.task_start("a", 2).unwrap();
        let b = k.task_start("b", 2).unwrap();
        let c = k.task_start("c", 2).unwrap();
        k.run();
        // The most recently started task heads the ring
        assert_eq!(k.current(), Some(c));

        let mut order = vec![];
        for _ in 0..6 {
            k.yield_now();
            order.push(k.current().unwrap());
            k.tasks.assert_ready_queue_consistent();
        }
        assert_eq!(order, [b, a, c, b, a, c]);
    }

    #[test]
    fn timeslice_rotates_in_preemptive_mode() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut k = Kernel::new(
            MockPort::default(),
            KernelCfg::new().preemptive(true).timeslice(3),
        );
        let a = k.task_start("a", 2).unwrap();
        let b = k.task_start("b", 2).unwrap();
        k.run();
        assert_eq!(k.current(), Some(b));
        k.tick();
        k.tick();
        assert_eq!(k.current(), Some(b));
        k.tick();
        assert_eq!(k.current(), Some(a));
        k.tasks.assert_ready_queue_consistent();
    }

    #[test]
    fn delete_unlinks_the_named_task() {
        let mut k = kernel();
        let a = k.task_start("a", 3).unwrap();
        let b = k.task_start("b", 3).unwrap();
        k.run();
        assert_eq!(k.current(), Some(b));

        k.delete("a");
        assert!(!k.task_exists(a));
        assert!(!k.objects.exists("a"));
        assert_eq!(k.current(), Some(b));

        k.exit();
        assert!(!k.task_exists(b));
        assert_eq!(k.current(), Some(TaskId::IDLE));
        k.tasks.assert_ready_queue_consistent();
    }

    #[test]
    fn body_keeps_the_processor_until_it_returns() {
        let mut k = kernel();
        let low = k.task_start("low", 1).unwrap();
        let high = k.task_start("high", 2).unwrap();
        k.run();
        assert!(k.wait_event(TIME_FOREVER).is_err());
        assert_eq!(k.current(), Some(low));

        {
            let mut body = k.task_body();
            body.send_id(high, "X").unwrap();
            assert_eq!(body.current(), Some(low));
            assert_eq!(body.task_state(high), TaskSt::Ready);

            body.delay(50);
            assert_eq!(body.task_state(low), TaskSt::Delay);
            assert_eq!(body.task_state(high), TaskSt::Ready);
            assert_eq!(body.current(), Some(low));
        }
        assert_eq!(k.current(), Some(high));
        assert_eq!(k.task_state(high), TaskSt::Running);
        assert_eq!(k.task_state(low), TaskSt::Delay);
        assert_eq!(k.port.switches.last(), Some(&(Some(low), high)));
        assert!(!k.sched_pending);
        k.tasks.assert_ready_queue_consistent();
    }

    #[test]
    #[should_panic(expected = "already running")]
    fn nested_task_body() {
        let mut k = kernel();
        k.task_start("a", 1).unwrap();
        k.run();
        let mut body = k.task_body();
        let _ = body.task_body();
    }

    #[test]
    #[should_panic(expected = "does not exist")]
    fn unknown_task() {
        kernel().suspend("nobody");
    }
}
