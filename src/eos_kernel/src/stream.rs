//! A byte ring buffer whose storage lives in a heap region.
//!
//! [`Stream`] only keeps the cursors. Every operation takes the backing
//! region (exactly `capacity` bytes) as a parameter, so the storage can stay
//! inside the kernel's db heap.

/// Why [`Stream::push`] rejected the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// There is no free byte at all.
    Full,
    /// The free space is smaller than the data.
    NotEnough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stream {
    base: usize,
    capacity: usize,
    head: usize,
    tail: usize,
    empty: bool,
}

impl Stream {
    /// Construct an empty stream over the region at heap offset `base`.
    pub const fn new(base: usize, capacity: usize) -> Self {
        Self {
            base,
            capacity,
            head: 0,
            tail: 0,
            empty: true,
        }
    }

    /// Get the heap offset of the backing region.
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        !self.empty && self.head == self.tail
    }

    /// Get the number of buffered bytes.
    pub fn size(&self) -> usize {
        if self.empty {
            0
        } else if self.head > self.tail {
            self.head - self.tail
        } else {
            self.head + self.capacity - self.tail
        }
    }

    /// Get the number of free bytes.
    pub fn empty_size(&self) -> usize {
        self.capacity - self.size()
    }

    /// Append all of `data`.
    pub fn push(&mut self, mem: &mut [u8], data: &[u8]) -> Result<(), PushError> {
        debug_assert_eq!(mem.len(), self.capacity);
        if self.is_full() {
            return Err(PushError::Full);
        }
        if self.empty_size() < data.len() {
            return Err(PushError::NotEnough);
        }
        for &b in data {
            mem[self.head] = b;
            self.head = (self.head + 1) % self.capacity;
        }
        if !data.is_empty() {
            self.empty = false;
        }
        Ok(())
    }

    /// Move up to `out.len()` bytes into `out` and return how many were
    /// moved. Draining the stream rewinds both cursors.
    pub fn pull_pop(&mut self, mem: &[u8], out: &mut [u8]) -> usize {
        debug_assert_eq!(mem.len(), self.capacity);
        let n = self.size().min(out.len());
        for slot in out[..n].iter_mut() {
            *slot = mem[self.tail];
            self.tail = (self.tail + 1) % self.capacity;
        }
        if n > 0 && self.tail == self.head {
            self.head = 0;
            self.tail = 0;
            self.empty = true;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_around() {
        let mut mem = [0u8; 8];
        let mut s = Stream::new(0, 8);
        s.push(&mut mem, b"abcdef").unwrap();
        let mut out = [0u8; 4];
        assert_eq!(s.pull_pop(&mem, &mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(s.size(), 2);

        s.push(&mut mem, b"ghijkl").unwrap();
        assert!(s.is_full());
        assert_eq!(s.push(&mut mem, b"x"), Err(PushError::Full));

        let mut out = [0u8; 16];
        assert_eq!(s.pull_pop(&mem, &mut out), 8);
        assert_eq!(&out[..8], b"efghijkl");
        assert_eq!(s.size(), 0);
        assert_eq!(s.empty_size(), 8);
    }

    #[test]
    fn not_enough() {
        let mut mem = [0u8; 4];
        let mut s = Stream::new(0, 4);
        s.push(&mut mem, b"ab").unwrap();
        assert_eq!(s.push(&mut mem, b"xyz"), Err(PushError::NotEnough));
        assert_eq!(s.size(), 2);
    }

    #[test]
    fn drain_rewinds() {
        let mut mem = [0u8; 4];
        let mut s = Stream::new(0, 4);
        s.push(&mut mem, b"abc").unwrap();
        let mut out = [0u8; 3];
        assert_eq!(s.pull_pop(&mem, &mut out), 3);
        assert_eq!(s, Stream::new(0, 4));
        assert_eq!(s.pull_pop(&mem, &mut out), 0);
    }
}
