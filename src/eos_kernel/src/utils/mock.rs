//! A `Port` for unit tests
use crate::{Port, TaskId};

#[derive(Debug, Default)]
pub(crate) struct MockPort {
    pub(crate) cpu_lock_depth: usize,
    /// The number of times CPU Lock was entered.
    pub(crate) cpu_lock_count: usize,
    pub(crate) switches: Vec<(Option<TaskId>, TaskId)>,
    pub(crate) idle_hook_count: usize,
    /// Written by the timer callbacks of the tests.
    pub(crate) fired: Vec<u32>,
}

impl Port for MockPort {
    fn enter_cpu_lock(&mut self) {
        assert_eq!(self.cpu_lock_depth, 0, "CPU Lock is already active");
        self.cpu_lock_depth += 1;
        self.cpu_lock_count += 1;
    }

    fn leave_cpu_lock(&mut self) {
        assert_eq!(self.cpu_lock_depth, 1, "CPU Lock is not active");
        self.cpu_lock_depth -= 1;
    }

    fn context_switch(&mut self, from: Option<TaskId>, to: TaskId) {
        assert_eq!(self.cpu_lock_depth, 1);
        self.switches.push((from, to));
    }

    fn idle_hook(&mut self) {
        self.idle_hook_count += 1;
    }
}
