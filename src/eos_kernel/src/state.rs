//! The kernel context
use crate::{
    cfg::{DB_HEAP_SIZE, MAX_OBJECTS, MS_NUM_15DAY},
    event::{queue::EventQueue, EventCb},
    heap::Heap,
    interrupt::ExecContext,
    klock::{self, CpuLockGuard},
    mutex::MutexCb,
    registry::{HashFn, Registry},
    task::{self, TaskId, TaskKind, TaskTable},
    time_event::TimeEventPool,
    timer::{TimerId, TimerList},
    KernelCfg, Port,
};

pub(crate) type Objects = Registry<Object, MAX_OBJECTS>;

/// A registered kernel object.
#[derive(Debug)]
pub(crate) enum Object {
    Task(TaskId),
    Event(EventCb),
    Timer(TimerId),
    Mutex(MutexCb),
}

/// The state of one kernel instance.
///
/// Every kernel operation is a method of this type and acts on behalf of the
/// task that is currently running ([`current`](Self::current)).
pub struct Kernel<P: Port> {
    pub(crate) port: P,
    pub(crate) cfg: KernelCfg,
    pub(crate) objects: Objects,
    pub(crate) tasks: TaskTable,
    pub(crate) queue: EventQueue,
    pub(crate) timers: TimerList<P>,
    pub(crate) time_events: TimeEventPool,
    /// The backing memory of the db values and streams.
    pub(crate) db: Heap<DB_HEAP_SIZE>,
    /// The raw millisecond clock. Rebased to zero every 15 days.
    pub(crate) time: u32,
    /// The total amount of time removed from `time` by rebases.
    pub(crate) time_offset: u64,
    /// The number of ticks sampled in the current CPU usage window.
    pub(crate) usage_samples: u32,
    pub(crate) current: Option<TaskId>,
    pub(crate) running: bool,
    pub(crate) sched_locked: bool,
    /// A scheduling pass was requested in an interrupt context or while a
    /// task body was running.
    pub(crate) sched_pending: bool,
    /// A [`TaskBody`](crate::task::TaskBody) guard is alive.
    pub(crate) in_body: bool,
    pub(crate) ctx: ExecContext,
}

impl<P: Port> Kernel<P> {
    /// Construct a kernel. The idle task is created with id 0 and
    /// priority 0.
    pub fn new(port: P, cfg: KernelCfg) -> Self {
        let mut this = Self {
            port,
            cfg,
            objects: Registry::new(),
            tasks: TaskTable::new(),
            queue: EventQueue::new(),
            timers: TimerList::new(),
            time_events: TimeEventPool::new(),
            db: Heap::new(),
            time: 0,
            time_offset: 0,
            usage_samples: 0,
            current: None,
            running: false,
            sched_locked: false,
            sched_pending: false,
            in_body: false,
            ctx: ExecContext::Task,
        };

        let idle = task::spawn(klock::lock_cpu(&mut this), "task_idle", 0, TaskKind::Task);
        debug_assert_eq!(idle, Ok(TaskId::IDLE));
        this
    }

    /// Start scheduling. Dispatches the highest-priority task.
    pub fn run(&mut self) {
        let mut lock = klock::lock_cpu(self);
        assert!(!lock.running, "the kernel is already running");
        lock.running = true;
        log::debug!("kernel started");
        task::schedule(&mut lock);
    }

    /// Get a flag indicating whether [`run`](Self::run) has been called.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn cfg(&self) -> &KernelCfg {
        &self.cfg
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Get the running task, or `None` before the first dispatch.
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// Get the running task. Panics if no task has been dispatched yet.
    pub(crate) fn current_task(&self) -> TaskId {
        match self.current {
            Some(id) => id,
            None => panic!("no task is running"),
        }
    }

    /// Get the raw millisecond clock, which restarts from zero every 15 days.
    pub fn time(&self) -> u32 {
        self.time
    }

    /// Get the monotonic millisecond clock.
    pub fn now(&self) -> u64 {
        self.time_offset + self.time as u64
    }

    /// Overwrite the raw millisecond clock.
    ///
    /// Armed deadlines are raw instants and stay where they are, so moving
    /// the clock forward makes them expire early. A value of 15 days or more
    /// is rebased by the next idle pass.
    pub fn set_time(&mut self, time_ms: u32) {
        let mut lock = klock::lock_cpu(self);
        log::debug!("clock set from {} ms to {time_ms} ms", lock.time);
        lock.time = time_ms;
    }

    /// Replace the hash function of the object registry.
    ///
    /// # Panics
    ///
    /// Panics if any object other than the idle task has been registered.
    pub fn set_hash(&mut self, hasher: HashFn) {
        let mut lock = klock::lock_cpu(self);
        assert!(
            lock.objects.len() == 1,
            "the hash function can't be changed once objects are registered"
        );

        // Register the idle task again under the new hash function
        let k = &mut *lock;
        let idle = k.tasks.tcb_mut(TaskId::IDLE);
        k.objects.remove(idle.object);
        k.objects.set_hasher(hasher);
        idle.object = match k.objects.insert(idle.name, Object::Task(TaskId::IDLE)) {
            Ok(object) => object,
            // The table is empty
            Err(_) => unreachable!(),
        };
    }

    /// Advance the clock by one tick.
    ///
    /// The tick is charged to the running task for
    /// [`task_cpu_usage`](Self::task_cpu_usage). A preemptive kernel also charges the running task's time slice and
    /// promotes expired delays here.
    pub fn tick(&mut self) {
        let mut lock = klock::lock_cpu(self);
        lock.time += lock.cfg.get_tick_ms();
        task::sample_cpu_usage(&mut lock);

        if !lock.cfg.is_preemptive() {
            return;
        }
        let rotated = task::tick_timeslice(&mut lock);
        let expired = task::expire_timeouts(&mut lock);
        if rotated || expired {
            task::schedule(&mut lock);
        }
    }

    /// Run one pass of the idle task's body.
    ///
    /// This promotes expired delays (cooperative kernels only), fires due
    /// software timers and time events, rebases the clock when it reaches 15
    /// days, and finally calls [`Port::idle_hook`].
    ///
    /// The idle task stays current until the pass is complete. The task
    /// woken by the pass, if any, is dispatched at its end.
    pub fn idle_pass(&mut self) {
        let mut body = self.task_body();
        {
            let mut lock = klock::lock_cpu(&mut *body);
            if !lock.cfg.is_preemptive() && task::expire_timeouts(&mut lock) {
                task::schedule(&mut lock);
            }
        }

        crate::timer::poll(&mut *body);
        crate::time_event::fire_due(&mut *body);

        {
            let mut lock = klock::lock_cpu(&mut *body);
            if lock.time >= MS_NUM_15DAY {
                rebase(&mut lock);
            }
        }

        body.port.idle_hook();
    }

    /// Lock the scheduler. The running task keeps the processor until
    /// [`sched_unlock`](Self::sched_unlock).
    pub fn sched_lock(&mut self) {
        klock::lock_cpu(self).sched_locked = true;
    }

    pub fn sched_unlock(&mut self) {
        let mut lock = klock::lock_cpu(self);
        lock.sched_locked = false;
        task::schedule(&mut lock);
    }

    pub fn is_sched_locked(&self) -> bool {
        self.sched_locked
    }
}

/// Shift the clock origin to the current instant.
fn rebase<P: Port>(lock: &mut CpuLockGuard<'_, P>) {
    let elapsed = lock.time;
    let k = &mut **lock;
    k.timers.rebase(elapsed);
    k.time_events.rebase(elapsed);
    k.tasks.rebase(elapsed);
    k.time_offset += elapsed as u64;
    k.time = 0;
    log::debug!("clock rebased by {elapsed} ms (offset = {} ms)", k.time_offset);
}

/// Remove every reference to the task `id` from the event and mutex objects
/// and from the event queue.
pub(crate) fn purge_task_bits<P: Port>(lock: &mut CpuLockGuard<'_, P>, id: TaskId) {
    let k = &mut **lock;
    let t = id.get();

    for (_, object) in k.objects.iter_mut() {
        match object {
            Object::Event(e) => {
                e.subscribers.clear(t);
                e.waiters.clear(t);
                if e.producer == Some(id) {
                    e.producer = None;
                    task::wake_highest(&mut k.tasks, &mut e.waiters);
                }
            }
            Object::Mutex(m) => {
                m.waiters.clear(t);
                if m.owner == Some(id) {
                    m.owner = task::wake_highest(&mut k.tasks, &mut m.waiters);
                }
            }
            Object::Task(_) | Object::Timer(_) => {}
        }
    }

    let objects = &mut k.objects;
    k.queue.clear_owner(t, |event| {
        if let Some(Object::Event(e)) = objects.get_mut(event) {
            e.item = None;
        }
    });
}
