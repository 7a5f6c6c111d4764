//! Hierarchical state machine dispatcher
//!
//! Transitions follow the usual UML-style rules: a transition exits the
//! states from the current leaf up to the least common ancestor (LCA) of the
//! source and the target, enters the states from below the LCA down to the
//! target, and then follows the target's initial transitions. A source that
//! contains the target is not exited, and a target that contains the source
//! is not re-entered. A self-transition exits and re-enters the state.
use arrayvec::ArrayVec;

use super::{Ret, StateMachine, EVENT_ENTER, EVENT_EXIT, EVENT_INIT, EVENT_NULL};
use crate::{cfg::MAX_HSM_NEST_DEPTH, event::Event, Kernel, Port};

type Path<S> = ArrayVec<S, MAX_HSM_NEST_DEPTH>;

fn trig<P: Port, M: StateMachine<P>>(
    m: &mut M,
    k: &mut Kernel<P>,
    state: M::State,
    topic: &'static str,
) -> Ret<M::State> {
    m.handle(k, state, &Event::reserved(topic))
}

fn enter<P: Port, M: StateMachine<P>>(m: &mut M, k: &mut Kernel<P>, state: M::State) {
    log::trace!("enter {state:?}");
    trig(m, k, state, EVENT_ENTER);
}

fn exit<P: Port, M: StateMachine<P>>(m: &mut M, k: &mut Kernel<P>, state: M::State) {
    log::trace!("exit {state:?}");
    trig(m, k, state, EVENT_EXIT);
}

/// Get `state` followed by all of its super-states, innermost first.
fn path_to_root<P: Port, M: StateMachine<P>>(
    m: &mut M,
    k: &mut Kernel<P>,
    state: M::State,
) -> Path<M::State> {
    let mut path = Path::new();
    let mut cursor = Some(state);
    while let Some(s) = cursor {
        if path.try_push(s).is_err() {
            panic!("the nesting of {state:?} exceeds {MAX_HSM_NEST_DEPTH} levels");
        }
        cursor = match trig(m, k, s, EVENT_NULL) {
            Ret::Super(parent) => Some(parent),
            _ => None,
        };
    }
    path
}

/// Enter the states between `outer` (exclusive) and `target` (inclusive),
/// outermost first. `None` stands for the implicit root.
fn enter_down<P: Port, M: StateMachine<P>>(
    m: &mut M,
    k: &mut Kernel<P>,
    outer: Option<M::State>,
    target: M::State,
) {
    let path = path_to_root(m, k, target);
    let n = match outer {
        Some(outer) => match path.iter().position(|&s| s == outer) {
            Some(n) => n,
            None => panic!("{target:?} is not inside {outer:?}"),
        },
        None => path.len(),
    };
    for &s in path[..n].iter().rev() {
        enter(m, k, s);
    }
}

/// Follow the initial transitions starting at `state`. Returns the resulting
/// leaf state.
fn drill<P: Port, M: StateMachine<P>>(
    m: &mut M,
    k: &mut Kernel<P>,
    mut state: M::State,
) -> M::State {
    while let Ret::Tran(sub) = trig(m, k, state, EVENT_INIT) {
        enter_down(m, k, Some(state), sub);
        state = sub;
    }
    state
}

/// Take the machine's initial transition. Returns the initial leaf state.
pub(super) fn init<P: Port, M: StateMachine<P>>(m: &mut M, k: &mut Kernel<P>) -> M::State {
    let target = m.init(k);
    enter_down(m, k, None, target);
    drill(m, k, target)
}

/// Dispatch `e` in the leaf state `current`. Returns the new leaf state.
pub(super) fn dispatch<P: Port, M: StateMachine<P>>(
    m: &mut M,
    k: &mut Kernel<P>,
    current: M::State,
    e: &Event,
) -> M::State {
    let mut source = current;
    let target = loop {
        match m.handle(k, source, e) {
            Ret::Super(parent) => source = parent,
            Ret::Tran(target) => break target,
            Ret::Handled | Ret::Null => return current,
        }
    };
    log::trace!("transition {source:?} -> {target:?} on `{}`", e.topic);

    // Exit the substates of the source first
    let current_path = path_to_root(m, k, current);
    for &s in current_path.iter().take_while(|&&s| s != source) {
        exit(m, k, s);
    }

    if source == target {
        exit(m, k, source);
        enter(m, k, target);
    } else {
        let source_path = path_to_root(m, k, source);
        let target_path = path_to_root(m, k, target);
        let lca = source_path
            .iter()
            .copied()
            .find(|s| target_path.contains(s));
        for &s in source_path.iter().take_while(|&&s| Some(s) != lca) {
            exit(m, k, s);
        }
        enter_down(m, k, lca, target);
    }

    drill(m, k, target)
}
