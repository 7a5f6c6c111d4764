//! An event-driven real-time kernel for single-core embedded targets.
//!
//! The kernel schedules cooperating tasks ("actors") by priority, delivers
//! named events between them (send, publish, subscribe), and provides
//! mutexes, callback-based software timers, quantized time events and a small
//! key/value store. Every object is addressed by name through one fixed-size
//! hashed [registry](registry).
//!
//! All kernel state lives in one explicitly constructed [`Kernel`] value.
//! Operations act on behalf of the task that is currently running; a board
//! support package implements [`Port`] and drives the kernel by calling
//! [`Kernel::tick`] from its tick source and running each task's body.
//!
//! # Blocking
//!
//! Kernel operations never suspend the calling thread of execution. When a
//! task must wait, the kernel parks it, picks the next task to run, and
//! returns [`ResultCode::Blocked`] (as the operation's `Blocked` error). The
//! body of the parked task is expected to return to its executor and repeat
//! the same call once it is dispatched again.
//!
//! An executor runs each body under a [`TaskBody`] guard. Context switches
//! requested while the guard is alive take effect when the body returns.
//!
//! # Contract violations
//!
//! Misuse (an unknown object name, a priority out of range, delaying the idle
//! task, ...) panics. Resource exhaustion and timeouts are reported through
//! `Result`.
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)

pub mod actor;
pub mod cfg;
mod db;
pub mod error;
pub mod event;
pub mod heap;
mod interrupt;
mod klock;
mod mutex;
pub mod registry;
mod state;
pub mod stream;
pub mod task;
mod time_event;
pub mod timer;
pub mod utils;

pub use self::{
    actor::{Actor, Reactor, Ret, Sm, StateMachine},
    cfg::KernelCfg,
    error::*,
    event::{Event, EventAttr, EventKind},
    interrupt::{ExecContext, Isr},
    registry::ObjectId,
    state::Kernel,
    task::{TaskBody, TaskId, TaskKind, TaskSt},
};

/// Implemented by a port. The kernel calls these to control the hardware (or
/// the simulation of it).
pub trait Port {
    /// Enter a CPU Lock state (disable interrupts). The kernel never nests
    /// CPU Lock states.
    fn enter_cpu_lock(&mut self);

    /// Leave the CPU Lock state.
    fn leave_cpu_lock(&mut self);

    /// Transfer the control from the task `from` (`None` on the first
    /// dispatch) to the task `to`.
    ///
    /// The kernel has already updated the task states when this is called.
    fn context_switch(&mut self, from: Option<TaskId>, to: TaskId);

    /// Called at the end of each pass of the idle task.
    fn idle_hook(&mut self) {}
}
