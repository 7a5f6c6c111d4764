//! Provides `OneLevelPrioBitmap`, a single-word bit array that finds the
//! highest set bit in constant time.
use core::fmt;
use num_traits::PrimInt;

/// Trait for [`OneLevelPrioBitmap`].
///
/// All methods panic when the given bit position is out of range.
pub trait PrioBitmap: Clone + Copy + fmt::Debug + 'static {
    /// Get the bit at the specified position.
    fn get(&self, i: usize) -> bool;

    /// Clear the bit at the specified position.
    fn clear(&mut self, i: usize);

    /// Set the bit at the specified position.
    fn set(&mut self, i: usize);

    /// Get the position of the highest set bit.
    fn find_highest(&self) -> Option<usize>;
}

/// Stores `LEN` (≤ `T::BITS`) entries. A higher position means a higher
/// priority.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OneLevelPrioBitmap<T, const LEN: usize> {
    bits: T,
}

impl<T: PrimInt, const LEN: usize> OneLevelPrioBitmap<T, LEN> {
    pub fn new() -> Self {
        assert!(LEN <= Self::word_bits());
        Self { bits: T::zero() }
    }

    #[inline]
    fn word_bits() -> usize {
        T::zero().count_zeros() as usize
    }

    #[inline]
    fn bit(&self, i: usize) -> bool {
        !(self.bits & (T::one() << i)).is_zero()
    }
}

impl<T: PrimInt, const LEN: usize> fmt::Debug for OneLevelPrioBitmap<T, LEN> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries((0..LEN).filter(|&i| self.bit(i)))
            .finish()
    }
}

impl<T: PrimInt + fmt::Debug + 'static, const LEN: usize> PrioBitmap
    for OneLevelPrioBitmap<T, LEN>
{
    fn get(&self, i: usize) -> bool {
        assert!(i < LEN);
        self.bit(i)
    }

    fn clear(&mut self, i: usize) {
        assert!(i < LEN);
        self.bits = self.bits & !(T::one() << i);
    }

    fn set(&mut self, i: usize) {
        assert!(i < LEN);
        self.bits = self.bits | (T::one() << i);
    }

    fn find_highest(&self) -> Option<usize> {
        if self.bits.is_zero() {
            None
        } else {
            Some(Self::word_bits() - 1 - self.bits.leading_zeros() as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cfg::MAX_PRIORITY, task::readyqueue::ReadyBitmap};
    use quickcheck_macros::quickcheck;
    use std::collections::BTreeSet;

    #[test]
    fn highest_priority_wins() {
        let mut bitmap = ReadyBitmap::new();
        assert_eq!(bitmap.find_highest(), None);
        bitmap.set(0);
        bitmap.set(5);
        bitmap.set(2);
        assert_eq!(bitmap.find_highest(), Some(5));
        bitmap.clear(5);
        assert_eq!(bitmap.find_highest(), Some(2));
        assert_eq!(format!("{bitmap:?}"), "[0, 2]");
    }

    /// Each pair is (set?, priority), applied to the ready bitmap and to a
    /// `BTreeSet`.
    #[quickcheck]
    fn matches_set_model(ops: Vec<(bool, u8)>) {
        let mut bitmap = ReadyBitmap::new();
        let mut model = BTreeSet::new();

        for (set, p) in ops {
            let p = p as usize % MAX_PRIORITY;
            if set {
                bitmap.set(p);
                model.insert(p);
            } else {
                bitmap.clear(p);
                model.remove(&p);
            }
            assert_eq!(bitmap.find_highest(), model.iter().next_back().copied());
        }

        for p in 0..MAX_PRIORITY {
            assert_eq!(bitmap.get(p), model.contains(&p), "priority {p}");
        }
    }

    #[test]
    #[should_panic]
    fn out_of_range() {
        ReadyBitmap::new().set(MAX_PRIORITY);
    }
}
