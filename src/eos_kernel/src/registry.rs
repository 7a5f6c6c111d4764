//! The object registry: a fixed-capacity open-addressing hash table mapping
//! names to kernel objects.
//!
//! Every task, event, timer and mutex is registered here under a unique
//! `&'static str` key. A slot never changes its kind while it's occupied.
use core::fmt;
use num_integer::Roots;

use crate::{cfg::MAX_HASH_SEEK_TIMES, error::NoIdError};

/// The index of an occupied registry slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(usize);

impl ObjectId {
    /// Get the raw slot index.
    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) const fn dummy() -> Self {
        Self(usize::MAX)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

/// A string hash function.
pub type HashFn = fn(&str) -> u32;

/// The default hash function ("times 33").
///
/// ```
/// assert_eq!(eos_kernel::registry::time33(""), 5381);
/// assert_eq!(eos_kernel::registry::time33("a"), 5381 * 33 + 97);
/// ```
pub fn time33(s: &str) -> u32 {
    let hash = s.bytes().fold(5381u32, |hash, b| {
        hash.wrapping_add(hash << 5).wrapping_add(b as u32)
    });
    hash & i32::MAX as u32
}

/// Find the largest prime number not greater than `n`.
fn largest_prime(n: usize) -> usize {
    (2..=n)
        .rev()
        .find(|&i| (2..=i.sqrt()).all(|j| i % j != 0))
        .unwrap_or(1)
}

struct Slot<V> {
    key: &'static str,
    value: V,
}

/// A hash table with `N` slots.
///
/// A key is probed at `h`, `h - 1`, `h + 1`, `h - 2`, `h + 2`, ... (modulo
/// `N`), where `h` is the hash modulo the largest prime `<= N`. A search gives
/// up after a bounded number of rounds, so a crowded table may reject a key
/// even though it still has free slots.
pub struct Registry<V, const N: usize> {
    slots: [Option<Slot<V>>; N],
    len: usize,
    prime: usize,
    seek_max: usize,
    hasher: HashFn,
}

impl<V, const N: usize> Registry<V, N> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            len: 0,
            prime: largest_prime(N),
            seek_max: MAX_HASH_SEEK_TIMES.min(N / 2),
            hasher: time33,
        }
    }

    /// Replace the hash function. Only allowed while the table is empty.
    pub fn set_hasher(&mut self, hasher: HashFn) {
        assert_eq!(self.len, 0, "the hash function can't be changed once keys are inserted");
        self.hasher = hasher;
    }

    /// Enumerate the slot indices to probe for `key`, in order.
    fn probe(&self, key: &str) -> impl Iterator<Item = usize> {
        let init = ((self.hasher)(key) as usize % self.prime) as isize;
        let n = N as isize;
        (0..=self.seek_max as isize).flat_map(move |i| {
            [-1, 1]
                .into_iter()
                .map(move |j| (init + i * j).rem_euclid(n) as usize)
        })
    }

    /// Find the slot holding `key`.
    pub fn lookup(&self, key: &str) -> Option<ObjectId> {
        if N == 0 {
            return None;
        }
        self.probe(key)
            .find(|&i| matches!(&self.slots[i], Some(slot) if slot.key == key))
            .map(ObjectId)
    }

    #[inline]
    pub fn exists(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Insert `value` under `key` and return its slot.
    ///
    /// If `key` is already present, the existing slot is returned and `value`
    /// is discarded.
    pub fn insert(&mut self, key: &'static str, value: V) -> Result<ObjectId, NoIdError> {
        if let Some(id) = self.lookup(key) {
            return Ok(id);
        }
        if N == 0 {
            return Err(NoIdError::NoId);
        }

        let i = self
            .probe(key)
            .find(|&i| self.slots[i].is_none())
            .ok_or(NoIdError::NoId)?;
        self.slots[i] = Some(Slot { key, value });
        self.len += 1;
        Ok(ObjectId(i))
    }

    /// Remove the object in slot `id` and return it.
    pub fn remove(&mut self, id: ObjectId) -> Option<V> {
        let slot = self.slots.get_mut(id.0)?.take()?;
        self.len -= 1;
        Some(slot.value)
    }

    pub fn get(&self, id: ObjectId) -> Option<&V> {
        self.slots.get(id.0)?.as_ref().map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut V> {
        self.slots.get_mut(id.0)?.as_mut().map(|slot| &mut slot.value)
    }

    /// Get the key of the object in slot `id`.
    pub fn key(&self, id: ObjectId) -> Option<&'static str> {
        self.slots.get(id.0)?.as_ref().map(|slot| slot.key)
    }

    /// Get the number of registered objects.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over all registered objects.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ObjectId, &mut V)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|slot| (ObjectId(i), &mut slot.value)))
    }
}

impl<V, const N: usize> Default for Registry<V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug, const N: usize> fmt::Debug for Registry<V, N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map()
            .entries(
                self.slots
                    .iter()
                    .flatten()
                    .map(|slot| (slot.key, &slot.value)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::{BTreeMap, BTreeSet};

    #[test]
    fn prime() {
        assert_eq!(largest_prime(256), 251);
        assert_eq!(largest_prime(37), 37);
        assert_eq!(largest_prime(10), 7);
        assert_eq!(largest_prime(2), 2);
        assert_eq!(largest_prime(1), 1);
    }

    #[test]
    fn insert_is_idempotent() {
        let mut reg = Registry::<u32, 31>::new();
        let a = reg.insert("sm_led", 1).unwrap();
        let b = reg.insert("sm_led", 2).unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.get(a), Some(&1));
        assert_eq!(reg.len(), 1);
        assert!(reg.exists("sm_led"));
        assert!(!reg.exists("sm_led2"));
    }

    #[test]
    fn collisions_probe_both_ways() {
        let mut reg = Registry::<u32, 16>::new();
        reg.set_hasher(|_| 5);
        let ids: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|&k| reg.insert(k, 0).unwrap().get())
            .collect();
        // `init` is probed twice in the first round
        assert_eq!(ids, [5, 4, 6, 3]);
        assert_eq!(reg.lookup("c").map(ObjectId::get), Some(6));

        // Removing a key in the middle of a probe chain keeps the rest
        // reachable
        reg.remove(ObjectId(4));
        assert_eq!(reg.lookup("d").map(ObjectId::get), Some(3));
        assert_eq!(reg.insert("e", 0).map(ObjectId::get), Ok(4));
    }

    #[test]
    fn bounded_probe_rejects() {
        let mut reg = Registry::<u32, 8>::new();
        reg.set_hasher(|_| 0);
        // `seek_max` = 4, so the probe covers 0, 7, 1, 6, 2, 5, 3, 4
        let keys = ["0", "1", "2", "3", "4", "5", "6", "7"];
        for k in keys {
            reg.insert(k, 0).unwrap();
        }
        assert_eq!(reg.insert("8", 0), Err(NoIdError::NoId));
        for k in keys {
            assert!(reg.exists(k), "{k}");
        }
    }

    #[quickcheck]
    fn round_trip(keys: Vec<u16>, removals: Vec<u8>) {
        let mut reg = Registry::<u16, 37>::new();
        let mut reference = BTreeMap::new();

        let keys: BTreeSet<u16> = keys.into_iter().collect();
        for &k in keys.iter() {
            let key: &'static str = Box::leak(format!("topic{k}").into_boxed_str());
            match reg.insert(key, k) {
                Ok(id) => {
                    reference.insert(key, id);
                }
                Err(NoIdError::NoId) => {
                    // Exhaustion is only reported for a key that's absent
                    assert!(!reg.exists(key));
                    assert!(reference.len() > 0);
                }
            }
        }

        assert_eq!(reg.len(), reference.len());
        for (&key, &id) in reference.iter() {
            assert_eq!(reg.lookup(key), Some(id));
            assert_eq!(reg.key(id), Some(key));
        }

        let keys: Vec<_> = reference.keys().cloned().collect();
        for r in removals {
            if keys.is_empty() {
                break;
            }
            let key = keys[r as usize % keys.len()];
            if let Some(id) = reference.remove(key) {
                assert!(reg.remove(id).is_some());
                assert!(!reg.exists(key));
            }
        }
        for (&key, &id) in reference.iter() {
            assert_eq!(reg.lookup(key), Some(id));
        }
        assert_eq!(reg.lookup("missing"), None);
    }
}
