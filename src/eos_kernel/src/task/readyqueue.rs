//! The ready queue: one bit per priority plus one round-robin ring of tasks
//! per priority.
//!
//! Invariant: bit *p* is set iff ring *p* contains a `Ready` or `Running`
//! task, and then the head of ring *p* is such a task.
use super::{TaskId, TaskTable};
use crate::{
    cfg::MAX_PRIORITY,
    utils::{OneLevelPrioBitmap, PrioBitmap},
};

pub(crate) type ReadyBitmap = OneLevelPrioBitmap<u32, MAX_PRIORITY>;

#[derive(Debug)]
pub(crate) struct ReadyQueue {
    pub(crate) bitmap: ReadyBitmap,
    /// The head of each ring.
    pub(crate) heads: [Option<TaskId>; MAX_PRIORITY],
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self {
            bitmap: ReadyBitmap::new(),
            heads: [None; MAX_PRIORITY],
        }
    }
}

impl TaskTable {
    /// Link `id` into the ring of its priority, as the new head.
    pub(crate) fn ring_insert(&mut self, id: TaskId) {
        let p = self.tcb(id).priority;
        let (next, prev) = match self.ready.heads[p] {
            None => (id, id),
            Some(head) => {
                let tail = self.tcb(head).prev;
                self.tcb_mut(tail).next = id;
                self.tcb_mut(head).prev = id;
                (head, tail)
            }
        };
        let tcb = self.tcb_mut(id);
        tcb.next = next;
        tcb.prev = prev;
        self.ready.heads[p] = Some(id);
        self.rotate(p);
    }

    /// Unlink `id` from its ring.
    pub(crate) fn ring_remove(&mut self, id: TaskId) {
        let tcb = self.tcb(id);
        let (p, next, prev) = (tcb.priority, tcb.next, tcb.prev);
        if next == id {
            self.ready.heads[p] = None;
            self.ready.bitmap.clear(p);
            return;
        }

        self.tcb_mut(prev).next = next;
        self.tcb_mut(next).prev = prev;
        if self.ready.heads[p] == Some(id) {
            self.ready.heads[p] = Some(next);
        }
        self.rotate(p);
    }

    /// Iterate over ring `p`, starting from its head.
    pub(crate) fn ring(&self, p: usize) -> impl Iterator<Item = TaskId> + '_ {
        let head = self.ready.heads[p];
        let mut cursor = head;
        core::iter::from_fn(move || {
            let t = cursor?;
            let next = self.tcb(t).next;
            cursor = if Some(next) == head { None } else { Some(next) };
            Some(t)
        })
    }

    /// Iterate over every task except the idle task, from the highest
    /// priority down, each ring in order.
    pub(crate) fn by_priority(&self) -> impl Iterator<Item = TaskId> + '_ {
        (1..MAX_PRIORITY).rev().flat_map(move |p| self.ring(p))
    }

    /// Move the head of ring `p` to its first runnable member (the head
    /// itself included), updating bit `p`.
    pub(crate) fn rotate(&mut self, p: usize) {
        self.ready.bitmap.clear(p);
        let found = self.ring(p).find(|&t| self.tcb(t).st.is_runnable());
        if let Some(t) = found {
            self.ready.heads[p] = Some(t);
            self.ready.bitmap.set(p);
        }
    }

    /// Move the head of the ring containing `id` to the first `Ready` task
    /// after `id`. Returns `false` if there's no such task.
    pub(crate) fn rotate_past(&mut self, id: TaskId) -> bool {
        let p = self.tcb(id).priority;
        let mut t = self.tcb(id).next;
        while t != id {
            if self.tcb(t).st == super::TaskSt::Ready {
                self.ready.heads[p] = Some(t);
                return true;
            }
            t = self.tcb(t).next;
        }
        false
    }

    /// Put `id` in the `Ready` state.
    pub(crate) fn make_ready(&mut self, id: TaskId) {
        let p = self.tcb(id).priority;
        self.tcb_mut(id).st = super::TaskSt::Ready;
        self.ready.bitmap.set(p);

        let head_runnable = self.ready.heads[p]
            .map_or(false, |head| self.tcb(head).st.is_runnable());
        if !head_runnable {
            self.ready.heads[p] = Some(id);
        }
    }

    /// Choose the task to run next: the head of the highest non-empty
    /// priority.
    ///
    /// Panics if the ready queue is inconsistent.
    pub(crate) fn select_next(&self) -> TaskId {
        let Some(p) = self.ready.bitmap.find_highest() else {
            return TaskId::IDLE;
        };
        let head = self.ready.heads[p]
            .unwrap_or_else(|| panic!("priority {p} is marked ready but its ring is empty"));
        let st = self.tcb(head).st;
        assert!(
            st.is_runnable(),
            "the head of ring {p} ({head:?}) is {st:?}; the ready queue is corrupted"
        );
        head
    }

    /// Panic unless the ready bitmap agrees with the rings.
    #[cfg(test)]
    pub(crate) fn assert_ready_queue_consistent(&self) {
        for p in 0..MAX_PRIORITY {
            let any_runnable = self.ring(p).any(|t| self.tcb(t).st.is_runnable());
            assert_eq!(self.ready.bitmap.get(p), any_runnable, "priority {p}");
            if any_runnable {
                let head = self.ready.heads[p].unwrap();
                assert!(self.tcb(head).st.is_runnable(), "head of {p}");
            }
            for t in self.ring(p) {
                let tcb = self.tcb(t);
                assert_eq!(tcb.priority, p);
                assert_eq!(self.tcb(tcb.next).prev, t);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{TaskCb, TaskKind, TaskSt};
    use super::*;
    use crate::registry::ObjectId;
    use quickcheck_macros::quickcheck;

    fn table(priorities: &[usize]) -> TaskTable {
        let mut table = TaskTable::new();
        for &priority in priorities {
            let id = table.alloc_id().unwrap();
            table.insert(id, TaskCb::new("t", ObjectId::dummy(), priority, TaskKind::Task));
        }
        table
    }

    #[test]
    fn insert_becomes_head() {
        let table = table(&[0, 3, 3, 3]);
        assert_eq!(
            table.ring(3).collect::<Vec<_>>(),
            [TaskId(3), TaskId(2), TaskId(1)]
        );
        assert_eq!(table.select_next(), TaskId(3));
        table.assert_ready_queue_consistent();
    }

    #[test]
    fn rotate_skips_blocked_tasks() {
        let mut table = table(&[0, 2, 2]);
        let head = table.select_next();
        table.tcb_mut(head).st = TaskSt::Delay;
        table.rotate(2);
        let next = table.select_next();
        assert_ne!(next, head);

        table.tcb_mut(next).st = TaskSt::WaitEvent;
        table.rotate(2);
        assert_eq!(table.select_next(), TaskId::IDLE);
        assert!(!table.ready.bitmap.get(2));

        table.make_ready(head);
        assert_eq!(table.select_next(), head);
        table.assert_ready_queue_consistent();
    }

    #[test]
    fn remove_only_member_empties_ring() {
        let mut table = table(&[0, 5]);
        table.ring_remove(TaskId(1));
        assert_eq!(table.ready.heads[5], None);
        assert_eq!(table.select_next(), TaskId::IDLE);
    }

    #[test]
    #[should_panic(expected = "corrupted")]
    fn corrupt_head_is_fatal() {
        let mut table = table(&[0, 1]);
        table.tcb_mut(TaskId(1)).st = TaskSt::Suspended;
        table.select_next();
    }

    /// Random state changes followed by the kernel's bookkeeping calls
    /// never break the ready-bitmap invariant.
    #[quickcheck]
    fn bitmap_tracks_rings(priorities: Vec<u8>, bytecode: Vec<u8>) {
        let priorities: Vec<usize> = std::iter::once(0)
            .chain(priorities.iter().take(20).map(|&p| 1 + p as usize % (MAX_PRIORITY - 1)))
            .collect();
        let mut table = table(&priorities);
        let mut removed = vec![false; priorities.len()];
        table.assert_ready_queue_consistent();

        for instr in bytecode.chunks_exact(2) {
            let i = 1 + instr[1] as usize % priorities.len().max(2).saturating_sub(1);
            if i >= priorities.len() || removed[i] {
                continue;
            }
            let id = TaskId(i);
            match instr[0] % 4 {
                0 => {
                    table.tcb_mut(id).st = TaskSt::Delay;
                    table.rotate(priorities[i]);
                }
                1 => table.make_ready(id),
                2 => {
                    if table.tcb(id).st.is_runnable() {
                        table.rotate_past(id);
                    }
                }
                _ => {
                    table.remove(id);
                    removed[i] = true;
                }
            }
            log::trace!("    {:?}", table.ready);
            table.assert_ready_queue_consistent();
            let next = table.select_next();
            assert!(table.tcb(next).st.is_runnable());
        }
    }
}
