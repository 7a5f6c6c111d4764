//! The key/value store
//!
//! A db key is an event whose attribute selects a value or a stream type.
//! [`Kernel::db_register`] attaches a buffer from the kernel's db heap to
//! the key. Reads and writes hold the key's producer lock while they copy the
//! data, and a write on a key with [`EventAttr::LINK_EVENT`] publishes the
//! key afterwards.
use crate::{
    cfg::DB_HEAP_SIZE,
    error::{BlockedError, DbReadError, DbRegisterError, DbWriteError, GiveError},
    event::{self, EventAttr, EventData, EventKind, Target},
    heap::Heap,
    klock::{self, CpuLockGuard},
    registry::ObjectId,
    stream::Stream,
    task,
    utils::OwnerBitmap,
    Kernel, Port,
};

fn value_region(key: &str, data: &EventData) -> (usize, usize) {
    match *data {
        EventData::Value { ptr, size } => (ptr, size),
        _ => panic!("db key `{key}` has no value buffer"),
    }
}

fn stream_of<'a>(key: &str, data: &'a mut EventData) -> &'a mut Stream {
    match data {
        EventData::Stream(s) => s,
        _ => panic!("db key `{key}` has no stream buffer"),
    }
}

/// Run `op` on the buffer of `key` while holding the key's producer lock.
fn access<P: Port, R>(
    lock: &mut CpuLockGuard<'_, P>,
    key: &str,
    kind: EventKind,
    op: impl FnOnce(&mut Heap<DB_HEAP_SIZE>, &mut EventData) -> R,
) -> Result<(ObjectId, R), BlockedError> {
    let e_id = event::expect_event(&lock.objects, key);
    let actual = event::event_cb(&lock.objects, e_id).attr.kind();
    assert_eq!(actual, kind, "db key `{key}` is not of {kind:?} type");

    event::admit(lock, e_id)?;
    let k = &mut **lock;
    let e = event::event_cb_mut(&mut k.objects, e_id);
    let r = op(&mut k.db, &mut e.data);
    event::release(lock, e_id);
    Ok((e_id, r))
}

/// Publish the key if it's linked to its event, and schedule.
fn finish_write<P: Port>(lock: &mut CpuLockGuard<'_, P>, e_id: ObjectId) -> Result<(), GiveError> {
    let attr = event::event_cb(&lock.objects, e_id).attr;
    let key = lock.objects.key(e_id);
    match key {
        Some(key) if attr.contains(EventAttr::LINK_EVENT) => {
            event::give(lock, Target::Subscribers, key)
        }
        _ => {
            task::schedule(lock);
            Ok(())
        }
    }
}

impl<P: Port> Kernel<P> {
    /// Register `key` as a db key and give it a zero-filled buffer of `size`
    /// bytes according to `attr`'s type.
    ///
    /// Registering a stream key clears its subscribers. Registering a key
    /// again replaces its buffer.
    ///
    /// # Panics
    ///
    /// Panics if `attr` selects both the value and the stream type, or if
    /// the key is already of a different non-topic type.
    pub fn db_register(
        &mut self,
        key: &'static str,
        size: usize,
        attr: EventAttr,
    ) -> Result<(), DbRegisterError> {
        assert!(
            !attr.contains(EventAttr::VALUE | EventAttr::STREAM),
            "a db key can't be both a value and a stream"
        );
        let mut lock = klock::lock_cpu(self);
        let e_id = event::event_or_create(&mut lock.objects, key)?;
        let k = &mut *lock;
        let e = event::event_cb_mut(&mut k.objects, e_id);

        let (old, new) = (e.attr.kind(), attr.kind());
        assert!(
            old == EventKind::Topic || old == new,
            "db key `{key}` can't change from {old:?} to {new:?}"
        );

        // The old buffer stays attached until the new one is secured
        let data = if new == EventKind::Topic {
            EventData::None
        } else {
            let Some(ptr) = k.db.alloc(size) else {
                log::debug!("db key `{key}`: no room for {size} bytes");
                return Err(DbRegisterError::NoMemory);
            };
            k.db.slice_mut(ptr, size).fill(0);
            if new == EventKind::Stream {
                e.subscribers = OwnerBitmap::EMPTY;
                EventData::Stream(Stream::new(ptr, size))
            } else {
                EventData::Value { ptr, size }
            }
        };

        match core::mem::replace(&mut e.data, data) {
            EventData::None => {}
            EventData::Value { ptr, .. } => k.db.free(ptr),
            EventData::Stream(s) => k.db.free(s.base()),
        }
        e.attr = attr;
        log::debug!("db key `{key}` registered ({attr:?}, {size} bytes)");
        Ok(())
    }

    /// Get the attribute of the db key `key`.
    pub fn db_get_attribute(&self, key: &str) -> EventAttr {
        self.event_attribute(key)
    }

    /// Replace the attribute of the db key `key`.
    pub fn db_set_attribute(&mut self, key: &str, attr: EventAttr) {
        assert!(
            !attr.contains(EventAttr::VALUE | EventAttr::STREAM),
            "a db key can't be both a value and a stream"
        );
        let mut lock = klock::lock_cpu(self);
        let e_id = event::expect_event(&lock.objects, key);
        event::event_cb_mut(&mut lock.objects, e_id).attr = attr;
    }

    /// Copy the value of `key` into `buf`, whose length must equal the
    /// registered size.
    pub fn db_block_read(&mut self, key: &str, buf: &mut [u8]) -> Result<(), DbReadError> {
        let mut lock = klock::lock_cpu(self);
        access(&mut lock, key, EventKind::Value, |db, data| {
            let (ptr, size) = value_region(key, data);
            assert_eq!(buf.len(), size, "db key `{key}` holds {size} bytes");
            buf.copy_from_slice(db.slice(ptr, size));
        })?;
        task::schedule(&mut lock);
        Ok(())
    }

    /// Overwrite the value of `key` with `data`, whose length must equal the
    /// registered size.
    pub fn db_block_write(&mut self, key: &str, data: &[u8]) -> Result<(), DbWriteError> {
        let mut lock = klock::lock_cpu(self);
        let (e_id, ()) = access(&mut lock, key, EventKind::Value, |db, value| {
            let (ptr, size) = value_region(key, value);
            assert_eq!(data.len(), size, "db key `{key}` holds {size} bytes");
            db.slice_mut(ptr, size).copy_from_slice(data);
        })?;
        Ok(finish_write(&mut lock, e_id)?)
    }

    /// Move up to `buf.len()` bytes out of the stream `key`. Returns the
    /// number of bytes moved.
    pub fn db_stream_read(&mut self, key: &str, buf: &mut [u8]) -> Result<usize, DbReadError> {
        let mut lock = klock::lock_cpu(self);
        let (_, n) = access(&mut lock, key, EventKind::Stream, |db, data| {
            let s = stream_of(key, data);
            let (base, capacity) = (s.base(), s.capacity());
            s.pull_pop(db.slice(base, capacity), buf)
        })?;
        task::schedule(&mut lock);
        Ok(n)
    }

    /// Append all of `data` to the stream `key`. Nothing is written if the
    /// stream lacks room.
    pub fn db_stream_write(&mut self, key: &str, data: &[u8]) -> Result<(), DbWriteError> {
        let mut lock = klock::lock_cpu(self);
        let (e_id, pushed) = access(&mut lock, key, EventKind::Stream, |db, stream| {
            let s = stream_of(key, stream);
            let (base, capacity) = (s.base(), s.capacity());
            s.push(db.slice_mut(base, capacity), data)
        })?;
        if let Err(e) = pushed {
            log::trace!("db key `{key}`: {} bytes rejected ({e:?})", data.len());
            task::schedule(&mut lock);
            return Err(DbWriteError::QueueOverflow);
        }
        Ok(finish_write(&mut lock, e_id)?)
    }
}
