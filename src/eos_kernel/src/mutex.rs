//! Mutexes
use crate::{
    cfg::TIME_FOREVER,
    error::{MutexReleaseError, MutexTakeError},
    klock,
    registry::ObjectId,
    state::{Object, Objects},
    task::{self, TaskId, TaskSt, WaitFor},
    utils::OwnerBitmap,
    Kernel, Port,
};

/// Mutex control block
#[derive(Debug)]
pub(crate) struct MutexCb {
    pub(crate) owner: Option<TaskId>,
    pub(crate) waiters: OwnerBitmap,
}

fn mutex_cb_mut(objects: &mut Objects, id: ObjectId) -> &mut MutexCb {
    match objects.get_mut(id) {
        Some(Object::Mutex(m)) => m,
        _ => panic!("{id:?} is not a mutex"),
    }
}

fn find_mutex(objects: &Objects, name: &str) -> Option<ObjectId> {
    let id = objects.lookup(name)?;
    match objects.get(id) {
        Some(Object::Mutex(_)) => Some(id),
        _ => panic!("`{name}` is not a mutex"),
    }
}

impl<P: Port> Kernel<P> {
    /// Take the mutex `name`, creating it on first use.
    ///
    /// If another task owns the mutex, the current task is parked and
    /// `Blocked` is returned. [`mutex_release`](Self::mutex_release) hands the
    /// mutex over to the highest-priority waiter, which completes the hand-off
    /// by repeating the call.
    pub fn mutex_take(&mut self, name: &'static str) -> Result<(), MutexTakeError> {
        let mut lock = klock::lock_cpu(self);
        if !lock.running {
            return Ok(());
        }
        let current = lock.current_task();

        let id = match find_mutex(&lock.objects, name) {
            Some(id) => id,
            None => lock.objects.insert(
                name,
                Object::Mutex(MutexCb {
                    owner: None,
                    waiters: OwnerBitmap::EMPTY,
                }),
            )?,
        };

        let k = &mut *lock;
        let m = mutex_cb_mut(&mut k.objects, id);
        let owner = m.owner;
        match owner {
            None => {
                m.owner = Some(current);
                Ok(())
            }
            Some(owner) if owner == current => {
                let tcb = k.tasks.tcb_mut(current);
                if tcb.wait == Some(WaitFor::Mutex(id)) {
                    tcb.wait = None;
                    Ok(())
                } else {
                    Err(MutexTakeError::WouldDeadlock)
                }
            }
            Some(owner) => {
                m.waiters.set(current.get());
                log::trace!("{current:?} waits for mutex `{name}` owned by {owner:?}");
                task::block_current(
                    &mut lock,
                    TaskSt::WaitMutex,
                    WaitFor::Mutex(id),
                    TIME_FOREVER,
                );
                Err(MutexTakeError::Blocked)
            }
        }
    }

    /// Release the mutex `name`. Panics if it doesn't exist.
    pub fn mutex_release(&mut self, name: &str) -> Result<(), MutexReleaseError> {
        let mut lock = klock::lock_cpu(self);
        if !lock.running {
            return Ok(());
        }
        let current = lock.current_task();
        let Some(id) = find_mutex(&lock.objects, name) else {
            panic!("mutex `{name}` does not exist");
        };

        let k = &mut *lock;
        let m = mutex_cb_mut(&mut k.objects, id);
        if m.owner != Some(current) {
            return Err(MutexReleaseError::NotOwner);
        }
        m.owner = task::wake_highest(&mut k.tasks, &mut m.waiters);
        if let Some(next) = m.owner {
            log::trace!("mutex `{name}` handed over to {next:?}");
        }
        task::schedule(&mut lock);
        Ok(())
    }
}
