//! Actors: event-driven task bodies
//!
//! Kernel operations never block the caller's thread of execution, so a task
//! body is a *step* function that the port's executor calls every time the
//! task is dispatched (see the crate-level documentation on blocking). This
//! module provides two ready-made bodies:
//!
//!  - [`Reactor`] feeds every received event to a handler function.
//!  - [`Sm`] dispatches every received event to a hierarchical state machine
//!    ([`StateMachine`]).
use core::{fmt, marker::PhantomData};

use crate::{event::Event, Kernel, Port, TaskId, TaskKind, TaskStartError};

mod hsm;

/// The reserved topic used to query a state's super-state.
pub const EVENT_NULL: &str = "Event_Null";
/// The reserved topic delivered when a state is entered.
pub const EVENT_ENTER: &str = "Event_Enter";
/// The reserved topic delivered when a state is exited.
pub const EVENT_EXIT: &str = "Event_Exit";
/// The reserved topic delivered to a state right after it becomes the target
/// of a transition. Returning [`Ret::Tran`] drills into a sub-state.
pub const EVENT_INIT: &str = "Event_Init";

/// How long an actor waits for an event in one step.
const ACTOR_WAIT_MS: u32 = 10_000;

/// A task body.
pub trait Actor<P: Port> {
    /// Run the body until it blocks or finishes a unit of work. Called each
    /// time the task is dispatched.
    fn step(&mut self, k: &mut Kernel<P>);
}

impl<P: Port, F: FnMut(&mut Kernel<P>)> Actor<P> for F {
    #[inline]
    fn step(&mut self, k: &mut Kernel<P>) {
        self(k)
    }
}

/// A task body that calls `handler` with [`EVENT_ENTER`] first and then with
/// every event the task receives.
pub struct Reactor<H> {
    handler: H,
    entered: bool,
}

impl<H> Reactor<H> {
    pub const fn new(handler: H) -> Self {
        Self {
            handler,
            entered: false,
        }
    }
}

impl<P: Port, H: FnMut(&mut Kernel<P>, &Event)> Actor<P> for Reactor<H> {
    fn step(&mut self, k: &mut Kernel<P>) {
        if !self.entered {
            self.entered = true;
            (self.handler)(k, &Event::reserved(EVENT_ENTER));
            return;
        }
        // `Blocked` and `Timeout` both mean "try again on the next step"
        if let Ok(e) = k.wait_event(ACTOR_WAIT_MS) {
            (self.handler)(k, &e);
        }
    }
}

/// The outcome of a state handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ret<S> {
    /// The event was consumed.
    Handled,
    /// The event is passed to the given super-state.
    Super(S),
    /// Take a transition to the given state.
    Tran(S),
    /// The state has no super-state and ignores the event.
    Null,
}

/// A hierarchical state machine.
///
/// Every state handler must answer [`EVENT_NULL`] with its super-state
/// (`Ret::Super`), or with `Ret::Null` for a top-level state. An event a
/// state doesn't handle should likewise be passed to the super-state.
pub trait StateMachine<P: Port> {
    type State: Copy + Eq + fmt::Debug;

    /// The initial transition. Returns the first target state.
    fn init(&mut self, k: &mut Kernel<P>) -> Self::State;

    /// Handle the event `e` in `state`.
    fn handle(&mut self, k: &mut Kernel<P>, state: Self::State, e: &Event) -> Ret<Self::State>;
}

/// A task body that runs a [`StateMachine`].
pub struct Sm<P: Port, M: StateMachine<P>> {
    machine: M,
    state: Option<M::State>,
    _port: PhantomData<fn(&mut Kernel<P>)>,
}

impl<P: Port, M: StateMachine<P>> Sm<P, M> {
    pub const fn new(machine: M) -> Self {
        Self {
            machine,
            state: None,
            _port: PhantomData,
        }
    }

    /// Get the current leaf state, or `None` before the first step.
    pub fn state(&self) -> Option<M::State> {
        self.state
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }
}

impl<P: Port, M: StateMachine<P>> Actor<P> for Sm<P, M> {
    fn step(&mut self, k: &mut Kernel<P>) {
        match self.state {
            None => self.state = Some(hsm::init(&mut self.machine, k)),
            Some(state) => {
                if let Ok(e) = k.wait_event(ACTOR_WAIT_MS) {
                    self.state = Some(hsm::dispatch(&mut self.machine, k, state, &e));
                }
            }
        }
    }
}

impl<P: Port> Kernel<P> {
    /// Start a task and record what kind of body drives it. See
    /// [`task_start`](Self::task_start).
    pub fn actor_start(
        &mut self,
        name: &'static str,
        priority: usize,
        kind: TaskKind,
    ) -> Result<TaskId, TaskStartError> {
        self.start_task(name, priority, kind)
    }
}
