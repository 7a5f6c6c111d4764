//! Static capacities and run-time kernel configuration
//!
//! The capacities are compile-time constants so that every kernel table has a
//! fixed size. [`KernelCfg`] selects the run-time behaviour.

/// The number of priority levels. Priority 0 is reserved for the idle task.
pub const MAX_PRIORITY: usize = 8;

/// The maximum number of tasks, including the idle task.
pub const MAX_TASKS: usize = 32;

/// The capacity of the object registry.
pub const MAX_OBJECTS: usize = 256;

/// The maximum number of probe rounds of a registry operation.
pub const MAX_HASH_SEEK_TIMES: usize = 16;

/// The capacity of the software timer pool.
pub const MAX_TIMERS: usize = 32;

/// The capacity of the time event pool.
pub const MAX_TIME_EVENTS: usize = 70;

/// The number of in-flight event data records.
pub const MAX_EVENT_RECORDS: usize = 128;

/// The size of the heap backing the key/value store.
pub const DB_HEAP_SIZE: usize = 4096;

/// The maximum nesting depth of a hierarchical state machine.
pub const MAX_HSM_NEST_DEPTH: usize = 4;

/// A timeout that never expires.
pub const TIME_FOREVER: u32 = u32::MAX;

/// Fifteen days in milliseconds. The raw clock is rebased when it reaches
/// this value.
pub const MS_NUM_15DAY: u32 = 1_296_000_000;

/// Thirty days in milliseconds. The longest finite timeout.
pub const MS_NUM_30DAY: u32 = 2_592_000_000;

/// The default number of ticks in one CPU usage window.
pub const CPU_USAGE_WINDOW: u32 = 10_000;

/// Run-time kernel configuration.
///
/// # Examples
///
/// ```
/// use eos_kernel::KernelCfg;
/// const CFG: KernelCfg = KernelCfg::new().tick_ms(10).preemptive(true);
/// assert_eq!(CFG.get_tick_ms(), 10);
/// assert_eq!(CFG.get_timeslice(), 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelCfg {
    tick_ms: u32,
    timeslice: u32,
    preemptive: bool,
    cpu_usage_window: u32,
}

impl KernelCfg {
    pub const fn new() -> Self {
        Self {
            tick_ms: 1,
            timeslice: 20,
            preemptive: false,
            cpu_usage_window: CPU_USAGE_WINDOW,
        }
    }

    /// Specify the number of milliseconds each call to [`Kernel::tick`]
    /// advances the clock by.
    ///
    /// [`Kernel::tick`]: crate::Kernel::tick
    pub const fn tick_ms(self, tick_ms: u32) -> Self {
        assert!(tick_ms != 0, "`tick_ms` must be non-zero");
        Self { tick_ms, ..self }
    }

    /// Specify the length of a time slice in ticks. Only used by preemptive
    /// kernels.
    pub const fn timeslice(self, timeslice: u32) -> Self {
        assert!(timeslice != 0, "`timeslice` must be non-zero");
        Self { timeslice, ..self }
    }

    /// Select the preemptive mode, in which the tick drives time slicing and
    /// delay expiry.
    pub const fn preemptive(self, preemptive: bool) -> Self {
        Self { preemptive, ..self }
    }

    /// Specify the number of ticks over which [`Kernel::task_cpu_usage`] is
    /// measured.
    ///
    /// [`Kernel::task_cpu_usage`]: crate::Kernel::task_cpu_usage
    pub const fn cpu_usage_window(self, cpu_usage_window: u32) -> Self {
        assert!(cpu_usage_window != 0, "`cpu_usage_window` must be non-zero");
        Self {
            cpu_usage_window,
            ..self
        }
    }

    pub const fn get_tick_ms(&self) -> u32 {
        self.tick_ms
    }

    pub const fn get_timeslice(&self) -> u32 {
        self.timeslice
    }

    pub const fn is_preemptive(&self) -> bool {
        self.preemptive
    }

    pub const fn get_cpu_usage_window(&self) -> u32 {
        self.cpu_usage_window
    }
}

impl Default for KernelCfg {
    fn default() -> Self {
        Self::new()
    }
}
