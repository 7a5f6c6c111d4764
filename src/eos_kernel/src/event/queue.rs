//! The event data queue
//!
//! Each record is one pending instance of an event together with the set of
//! tasks that have yet to consume it. Records live in a fixed arena and are
//! linked into a FIFO by index.
use crate::{
    cfg::MAX_EVENT_RECORDS, error::QueueOverflowError, registry::ObjectId,
    utils::OwnerBitmap,
};

/// The arena index of an event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordId(usize);

#[derive(Debug)]
pub(crate) struct Record {
    pub(crate) event: ObjectId,
    pub(crate) owners: OwnerBitmap,
    /// The monotonic time of the latest delivery.
    pub(crate) time: u64,
    prev: Option<RecordId>,
    pub(crate) next: Option<RecordId>,
}

pub(crate) struct EventQueue {
    records: [Option<Record>; MAX_EVENT_RECORDS],
    head: Option<RecordId>,
    tail: Option<RecordId>,
    /// The union of the owner sets of all records.
    global: OwnerBitmap,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            records: core::array::from_fn(|_| None),
            head: None,
            tail: None,
            global: OwnerBitmap::EMPTY,
        }
    }

    #[inline]
    pub(crate) fn global(&self) -> &OwnerBitmap {
        &self.global
    }

    #[inline]
    pub(crate) fn first(&self) -> Option<RecordId> {
        self.head
    }

    pub(crate) fn record(&self, id: RecordId) -> &Record {
        match &self.records[id.0] {
            Some(rec) => rec,
            None => panic!("{id:?} is not live"),
        }
    }

    fn record_mut(&mut self, id: RecordId) -> &mut Record {
        match &mut self.records[id.0] {
            Some(rec) => rec,
            None => panic!("{id:?} is not live"),
        }
    }

    /// Iterate over the live records in FIFO order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (RecordId, &Record)> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let id = cursor?;
            let rec = self.record(id);
            cursor = rec.next;
            Some((id, rec))
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.records.iter().flatten().count()
    }

    /// Append a record.
    pub(crate) fn push(
        &mut self,
        event: ObjectId,
        owners: OwnerBitmap,
        time: u64,
    ) -> Result<RecordId, QueueOverflowError> {
        let i = self
            .records
            .iter()
            .position(Option::is_none)
            .ok_or(QueueOverflowError::QueueOverflow)?;
        let id = RecordId(i);

        self.records[i] = Some(Record {
            event,
            owners,
            time,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.record_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.global |= owners;
        Ok(id)
    }

    /// Deliver another instance into an existing record.
    pub(crate) fn merge(&mut self, id: RecordId, owners: OwnerBitmap, time: u64) {
        let rec = self.record_mut(id);
        rec.owners |= owners;
        rec.time = time;
        self.global |= owners;
    }

    /// Unlink and free a record.
    pub(crate) fn remove(&mut self, id: RecordId) -> Record {
        let Some(rec) = self.records[id.0].take() else {
            panic!("{id:?} is not live");
        };
        match rec.prev {
            Some(prev) => self.record_mut(prev).next = rec.next,
            None => self.head = rec.next,
        }
        match rec.next {
            Some(next) => self.record_mut(next).prev = rec.prev,
            None => self.tail = rec.prev,
        }
        self.recompute_global();
        rec
    }

    /// Clear the bit of task `t` in the record `id`, freeing the record once
    /// no owner remains. Returns `true` if the record was freed.
    pub(crate) fn take_owner(&mut self, id: RecordId, t: usize) -> bool {
        let rec = self.record_mut(id);
        rec.owners.clear(t);
        if rec.owners.is_empty() {
            self.remove(id);
            true
        } else {
            self.recompute_global();
            false
        }
    }

    /// Clear the bit of task `t` in every record. `on_free` is called with the
    /// event of each record that is freed as a result.
    pub(crate) fn clear_owner(&mut self, t: usize, mut on_free: impl FnMut(ObjectId)) {
        if !self.global.get(t) {
            return;
        }
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let rec = self.record(id);
            cursor = rec.next;
            if rec.owners.get(t) {
                let event = rec.event;
                if self.take_owner(id, t) {
                    on_free(event);
                }
            }
        }
    }

    fn recompute_global(&mut self) {
        self.global = self
            .records
            .iter()
            .flatten()
            .fold(OwnerBitmap::EMPTY, |acc, rec| acc | rec.owners);
    }

    /// Panic unless the global owner set and the links are consistent.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let union = self
            .iter()
            .fold(OwnerBitmap::EMPTY, |acc, (_, rec)| acc | rec.owners);
        assert_eq!(self.global, union);
        assert_eq!(self.iter().count(), self.len());
        for (id, rec) in self.iter() {
            assert!(rec.owners.is_any(), "{id:?} has no owner");
            if let Some(next) = rec.next {
                assert_eq!(self.record(next).prev, Some(id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::MAX_TASKS;
    use quickcheck_macros::quickcheck;

    const EVENT: ObjectId = ObjectId::dummy();

    #[test]
    fn fifo_order_and_removal() {
        let mut q = EventQueue::new();
        let a = q.push(EVENT, OwnerBitmap::single(1), 0).unwrap();
        let b = q.push(EVENT, OwnerBitmap::single(2), 1).unwrap();
        let c = q.push(EVENT, OwnerBitmap::single(3), 2).unwrap();
        assert_eq!(q.iter().map(|(id, _)| id).collect::<Vec<_>>(), [a, b, c]);

        assert!(q.take_owner(b, 2));
        assert_eq!(q.iter().map(|(id, _)| id).collect::<Vec<_>>(), [a, c]);
        assert!(!q.global().get(2));
        q.assert_consistent();

        q.merge(a, OwnerBitmap::single(5), 10);
        assert_eq!(q.record(a).time, 10);
        assert!(!q.take_owner(a, 1));
        assert!(q.global().get(5));
        q.assert_consistent();
    }

    #[test]
    fn overflow() {
        let mut q = EventQueue::new();
        for _ in 0..MAX_EVENT_RECORDS {
            q.push(EVENT, OwnerBitmap::single(1), 0).unwrap();
        }
        assert_eq!(
            q.push(EVENT, OwnerBitmap::single(1), 0),
            Err(QueueOverflowError::QueueOverflow)
        );
        let first = q.first().unwrap();
        q.remove(first);
        assert!(q.push(EVENT, OwnerBitmap::single(1), 0).is_ok());
        q.assert_consistent();
    }

    /// The global owner set is the union of the record owner sets after any
    /// sequence of deliveries and consumptions.
    #[quickcheck]
    fn global_is_union(bytecode: Vec<u8>) {
        let mut q = EventQueue::new();
        let mut freed = 0;
        for instr in bytecode.chunks_exact(2) {
            let t = instr[1] as usize % MAX_TASKS;
            match instr[0] % 4 {
                0 | 1 => {
                    let _ = q.push(EVENT, OwnerBitmap::single(t), 0);
                }
                2 => {
                    let found = q.iter().find(|(_, rec)| rec.owners.get(t)).map(|(id, _)| id);
                    if let Some(id) = found {
                        q.take_owner(id, t);
                    }
                }
                _ => q.clear_owner(t, |_| freed += 1),
            }
            q.assert_consistent();
        }
        log::trace!("{freed} records freed by `clear_owner`");
    }
}
