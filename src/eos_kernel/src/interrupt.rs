//! Interrupt context
//!
//! An interrupt handler reaches the kernel through an [`Isr`] guard, which
//! only offers operations that never block. Scheduling decisions made while
//! any `Isr` is alive are deferred until the outermost one is dropped.
use crate::{
    error::{DbReadError, DbWriteError, GiveError, TimeEventError, TimerStartError},
    klock, task,
    timer::TimerCallback,
    Kernel, Port, TaskId,
};

/// The context the kernel is being called from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecContext {
    Task,
    /// An interrupt handler with the given nesting depth (`1` for the
    /// outermost handler).
    Interrupt(u8),
}

impl ExecContext {
    #[inline]
    pub fn is_interrupt(self) -> bool {
        matches!(self, Self::Interrupt(_))
    }
}

/// Returns `true` if the nesting was counted. Interrupts taken before the
/// kernel starts running are not.
fn enter<P: Port>(k: &mut Kernel<P>) -> bool {
    let mut lock = klock::lock_cpu(k);
    if !lock.running {
        return false;
    }
    lock.ctx = match lock.ctx {
        ExecContext::Task => ExecContext::Interrupt(1),
        ExecContext::Interrupt(n) => match n.checked_add(1) {
            Some(n) => ExecContext::Interrupt(n),
            None => panic!("interrupts are nested too deeply"),
        },
    };
    true
}

/// RAII guard for an interrupt context. Dropping it leaves the context, and
/// leaving the outermost one runs the scheduling pass requested meanwhile.
pub struct Isr<'a, P: Port> {
    kernel: &'a mut Kernel<P>,
    counted: bool,
}

impl<P: Port> Kernel<P> {
    /// Enter an interrupt context.
    pub fn interrupt_enter(&mut self) -> Isr<'_, P> {
        let counted = enter(self);
        Isr {
            kernel: self,
            counted,
        }
    }

    pub fn exec_context(&self) -> ExecContext {
        self.ctx
    }
}

impl<P: Port> Drop for Isr<'_, P> {
    fn drop(&mut self) {
        if !self.counted {
            return;
        }
        let mut lock = klock::lock_cpu(self.kernel);
        lock.ctx = match lock.ctx {
            ExecContext::Interrupt(n) if n > 1 => ExecContext::Interrupt(n - 1),
            _ => ExecContext::Task,
        };
        if lock.ctx == ExecContext::Task && lock.sched_pending {
            lock.sched_pending = false;
            task::schedule(&mut lock);
        }
    }
}

impl<'a, P: Port> Isr<'a, P> {
    /// Get read access to the kernel.
    pub fn kernel(&self) -> &Kernel<P> {
        self.kernel
    }

    /// Enter a nested interrupt context.
    pub fn nest(&mut self) -> Isr<'_, P> {
        let counted = enter(self.kernel);
        Isr {
            kernel: &mut *self.kernel,
            counted,
        }
    }

    /// See [`Kernel::tick`].
    pub fn tick(&mut self) {
        self.kernel.tick();
    }

    pub fn publish(&mut self, topic: &'static str) -> Result<(), GiveError> {
        self.kernel.publish(topic)
    }

    pub fn send(&mut self, task: &str, topic: &'static str) -> Result<(), GiveError> {
        self.kernel.send(task, topic)
    }

    pub fn send_id(&mut self, task: TaskId, topic: &'static str) -> Result<(), GiveError> {
        self.kernel.send_id(task, topic)
    }

    pub fn publish_delay(&mut self, topic: &'static str, ms: u32) -> Result<(), TimeEventError> {
        self.kernel.publish_delay(topic, ms)
    }

    pub fn publish_period(&mut self, topic: &'static str, ms: u32) -> Result<(), TimeEventError> {
        self.kernel.publish_period(topic, ms)
    }

    pub fn time_cancel(&mut self, topic: &str) {
        self.kernel.time_cancel(topic);
    }

    pub fn timer_start(
        &mut self,
        name: &'static str,
        period_ms: u32,
        oneshot: bool,
        callback: TimerCallback<P>,
    ) -> Result<(), TimerStartError> {
        self.kernel.timer_start(name, period_ms, oneshot, callback)
    }

    pub fn timer_delete(&mut self, name: &str) {
        self.kernel.timer_delete(name);
    }

    pub fn timer_pause(&mut self, name: &str) {
        self.kernel.timer_pause(name);
    }

    pub fn timer_continue(&mut self, name: &str) {
        self.kernel.timer_continue(name);
    }

    pub fn timer_reset(&mut self, name: &str) {
        self.kernel.timer_reset(name);
    }

    pub fn db_block_read(&mut self, key: &str, buf: &mut [u8]) -> Result<(), DbReadError> {
        self.kernel.db_block_read(key, buf)
    }

    pub fn db_block_write(&mut self, key: &str, data: &[u8]) -> Result<(), DbWriteError> {
        self.kernel.db_block_write(key, data)
    }

    pub fn db_stream_read(&mut self, key: &str, buf: &mut [u8]) -> Result<usize, DbReadError> {
        self.kernel.db_stream_read(key, buf)
    }

    pub fn db_stream_write(&mut self, key: &str, data: &[u8]) -> Result<(), DbWriteError> {
        self.kernel.db_stream_write(key, data)
    }
}
