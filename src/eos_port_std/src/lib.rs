//! Simulation environment for running the kernel on a hosted environment
//!
//! [`StdPort`] implements [`Port`] on top of plain process memory, and
//! [`Executor`] plays the part of the processor: it owns the kernel and one
//! body per task, and repeatedly runs the body of the task the kernel has
//! dispatched. Time is simulated. The clock advances by one tick whenever
//! the idle task gets to run, and after every [`BUSY_STEPS_PER_TICK`] steps
//! of task bodies.
//!
//! # Examples
//!
//! ```
//! use eos_kernel::{actor::EVENT_ENTER, Event, Kernel, KernelCfg};
//! use eos_port_std::{Executor, StdPort};
//! use std::{cell::Cell, rc::Rc};
//!
//! let greeted = Rc::new(Cell::new(0));
//! let mut ex = Executor::new(KernelCfg::new());
//! ex.spawn_reactor("greeter", 1, {
//!     let greeted = Rc::clone(&greeted);
//!     move |k: &mut Kernel<StdPort>, e: &Event| {
//!         if e.is(EVENT_ENTER) {
//!             k.publish_delay("Hello", 10).unwrap();
//!         } else if e.is("Hello") {
//!             greeted.set(greeted.get() + 1);
//!         }
//!     }
//! })
//! .unwrap();
//!
//! ex.run_for(100);
//! assert_eq!(greeted.get(), 1);
//! ```
use eos_kernel::{
    Actor, Event, Kernel, KernelCfg, Port, Reactor, Sm, StateMachine, TaskId, TaskKind,
    TaskStartError,
};

/// The number of consecutive task-body steps after which the clock is
/// advanced by one tick.
pub const BUSY_STEPS_PER_TICK: u32 = 64;

/// The port state of a hosted kernel.
#[derive(Debug, Default)]
pub struct StdPort {
    cpu_lock: bool,
    cpu_lock_count: u64,
    switch_count: u64,
    last_switch: Option<(Option<TaskId>, TaskId)>,
    idle_count: u64,
}

impl StdPort {
    pub fn is_cpu_lock_active(&self) -> bool {
        self.cpu_lock
    }

    /// Get the number of times CPU Lock was entered.
    pub fn cpu_lock_count(&self) -> u64 {
        self.cpu_lock_count
    }

    /// Get the number of context switches so far.
    pub fn switch_count(&self) -> u64 {
        self.switch_count
    }

    /// Get the most recent context switch as `(from, to)`.
    pub fn last_switch(&self) -> Option<(Option<TaskId>, TaskId)> {
        self.last_switch
    }

    /// Get the number of completed idle passes.
    pub fn idle_count(&self) -> u64 {
        self.idle_count
    }
}

impl Port for StdPort {
    fn enter_cpu_lock(&mut self) {
        log::trace!("enter_cpu_lock");
        assert!(!self.cpu_lock, "CPU Lock is already active");
        self.cpu_lock = true;
        self.cpu_lock_count += 1;
    }

    fn leave_cpu_lock(&mut self) {
        log::trace!("leave_cpu_lock");
        assert!(self.cpu_lock, "CPU Lock is not active");
        self.cpu_lock = false;
    }

    fn context_switch(&mut self, from: Option<TaskId>, to: TaskId) {
        log::trace!("context_switch({from:?} -> {to:?})");
        self.switch_count += 1;
        self.last_switch = Some((from, to));
    }

    fn idle_hook(&mut self) {
        self.idle_count += 1;
    }
}

/// Runs a hosted kernel.
pub struct Executor {
    kernel: Box<Kernel<StdPort>>,
    /// The task bodies, indexed by task id. The slot of the running task is
    /// vacant while its body is executing.
    bodies: Vec<Option<Box<dyn Actor<StdPort>>>>,
    busy_steps: u32,
}

impl Executor {
    pub fn new(cfg: KernelCfg) -> Self {
        Self {
            kernel: Box::new(Kernel::new(StdPort::default(), cfg)),
            bodies: Vec::new(),
            busy_steps: 0,
        }
    }

    pub fn kernel(&self) -> &Kernel<StdPort> {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel<StdPort> {
        &mut self.kernel
    }

    /// Start a task whose body is `body`.
    pub fn spawn(
        &mut self,
        name: &'static str,
        priority: usize,
        body: impl Actor<StdPort> + 'static,
    ) -> Result<TaskId, TaskStartError> {
        let id = self.kernel.task_start(name, priority)?;
        self.install(id, Box::new(body));
        Ok(id)
    }

    /// Start a task driven by a [`Reactor`] calling `handler`.
    pub fn spawn_reactor<H>(
        &mut self,
        name: &'static str,
        priority: usize,
        handler: H,
    ) -> Result<TaskId, TaskStartError>
    where
        H: FnMut(&mut Kernel<StdPort>, &Event) + 'static,
    {
        let id = self.kernel.actor_start(name, priority, TaskKind::Reactor)?;
        self.install(id, Box::new(Reactor::new(handler)));
        Ok(id)
    }

    /// Start a task driven by the state machine `machine`.
    pub fn spawn_sm<M>(
        &mut self,
        name: &'static str,
        priority: usize,
        machine: M,
    ) -> Result<TaskId, TaskStartError>
    where
        M: StateMachine<StdPort> + 'static,
    {
        let id = self.kernel.actor_start(name, priority, TaskKind::Sm)?;
        self.install(id, Box::new(Sm::new(machine)));
        Ok(id)
    }

    fn install(&mut self, id: TaskId, body: Box<dyn Actor<StdPort>>) {
        let i = id.get();
        if self.bodies.len() <= i {
            self.bodies.resize_with(i + 1, || None);
        }
        self.bodies[i] = Some(body);
    }

    /// Start the kernel.
    pub fn start(&mut self) {
        self.kernel.run();
    }

    /// Run one step: a pass of the idle task, or one call to the body of the
    /// running task.
    ///
    /// # Panics
    ///
    /// Panics if the kernel isn't running or if the running task was started
    /// through [`kernel_mut`](Self::kernel_mut) and has no body.
    pub fn step(&mut self) {
        let Some(current) = self.kernel.current() else {
            panic!("the kernel isn't running");
        };

        if current == TaskId::IDLE {
            self.busy_steps = 0;
            self.kernel.idle_pass();
            // Let the time pass only if nothing woke up
            if self.kernel.current() == Some(TaskId::IDLE) {
                self.kernel.tick();
            }
            return;
        }

        let body = self.bodies.get_mut(current.get()).and_then(Option::take);
        let Some(mut body) = body else {
            panic!("task `{}` has no body", self.kernel.task_name(current));
        };
        // A switch requested by the body happens once it returns
        body.step(&mut self.kernel.task_body());
        if self.kernel.task_exists(current) {
            self.bodies[current.get()] = Some(body);
        } else {
            log::debug!("dropping the body of the deleted task {current:?}");
        }

        self.busy_steps += 1;
        if self.busy_steps >= BUSY_STEPS_PER_TICK {
            self.busy_steps = 0;
            self.kernel.tick();
        }
    }

    /// Run until the monotonic clock has advanced by `ms` milliseconds.
    /// Starts the kernel first if needed.
    pub fn run_for(&mut self, ms: u64) {
        if !self.kernel.is_running() {
            self.start();
        }
        let end = self.kernel.now() + ms;
        while self.kernel.now() < end {
            self.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn idle_only_advances_the_clock() {
        init_logger();
        let mut ex = Executor::new(KernelCfg::new().tick_ms(10));
        ex.run_for(1_000);
        let k = ex.kernel();
        assert_eq!(k.now(), 1_000);
        assert_eq!(k.port().idle_count(), 100);
        assert_eq!(k.port().last_switch(), Some((None, TaskId::IDLE)));
        assert!(!k.port().is_cpu_lock_active());
    }

    #[test]
    fn busy_task_still_sees_time_pass() {
        init_logger();
        let mut ex = Executor::new(KernelCfg::new());
        let t = ex.spawn("spin", 1, |_: &mut Kernel<StdPort>| {}).unwrap();
        ex.start();
        for _ in 0..BUSY_STEPS_PER_TICK * 3 {
            ex.step();
        }
        assert_eq!(ex.kernel().current(), Some(t));
        assert_eq!(ex.kernel().now(), 3);
    }

    #[test]
    fn deleted_body_is_dropped() {
        init_logger();
        let mut ex = Executor::new(KernelCfg::new());
        let t = ex
            .spawn("once", 1, |k: &mut Kernel<StdPort>| k.exit())
            .unwrap();
        ex.run_for(1);
        assert!(!ex.kernel().task_exists(t));
        assert!(ex.bodies[t.get()].is_none());
        assert_eq!(ex.kernel().current(), Some(TaskId::IDLE));
    }

    #[test]
    #[should_panic(expected = "task `bare` has no body")]
    fn task_without_body() {
        let mut ex = Executor::new(KernelCfg::new());
        ex.kernel_mut().task_start("bare", 1).unwrap();
        ex.run_for(1);
    }
}
