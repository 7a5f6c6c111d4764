//! Provides `OwnerBitmap`, the set of task ids with a pending interest in a
//! kernel object.
use core::{fmt, ops};

use crate::cfg::MAX_TASKS;

const WORD_BITS: usize = u32::BITS as usize;
const NUM_WORDS: usize = (MAX_TASKS + WORD_BITS - 1) / WORD_BITS;

/// A fixed-capacity bit set indexed by task id.
///
/// Bit *t* is set iff task *t* is a pending consumer of (or a waiter for) the
/// object that owns the bitmap.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct OwnerBitmap {
    words: [u32; NUM_WORDS],
}

impl OwnerBitmap {
    pub const EMPTY: Self = Self {
        words: [0; NUM_WORDS],
    };

    /// Construct a bitmap containing only `t_id`.
    pub fn single(t_id: usize) -> Self {
        let mut this = Self::EMPTY;
        this.set(t_id);
        this
    }

    #[inline]
    pub fn get(&self, t_id: usize) -> bool {
        assert!(t_id < MAX_TASKS);
        self.words[t_id / WORD_BITS] & (1 << (t_id % WORD_BITS)) != 0
    }

    #[inline]
    pub fn set(&mut self, t_id: usize) {
        assert!(t_id < MAX_TASKS);
        self.words[t_id / WORD_BITS] |= 1 << (t_id % WORD_BITS);
    }

    #[inline]
    pub fn clear(&mut self, t_id: usize) {
        assert!(t_id < MAX_TASKS);
        self.words[t_id / WORD_BITS] &= !(1 << (t_id % WORD_BITS));
    }

    /// Get a flag indicating whether every bit is cleared.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Get a flag indicating whether at least one bit is set.
    #[inline]
    pub fn is_any(&self) -> bool {
        !self.is_empty()
    }

    /// Iterate over the set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_TASKS).filter(move |&i| self.get(i))
    }
}

impl ops::BitOrAssign for OwnerBitmap {
    fn bitor_assign(&mut self, rhs: Self) {
        for (x, y) in self.words.iter_mut().zip(rhs.words.iter()) {
            *x |= *y;
        }
    }
}

impl ops::BitOr for OwnerBitmap {
    type Output = Self;

    fn bitor(mut self, rhs: Self) -> Self {
        self |= rhs;
        self
    }
}

impl ops::SubAssign for OwnerBitmap {
    /// Clear every bit set in `rhs`.
    fn sub_assign(&mut self, rhs: Self) {
        for (x, y) in self.words.iter_mut().zip(rhs.words.iter()) {
            *x &= !*y;
        }
    }
}

impl fmt::Debug for OwnerBitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
