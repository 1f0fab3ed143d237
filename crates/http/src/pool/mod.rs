//! Per-connection memory pool.
//!
//! A [`MemoryPool`] is one contiguous arena handing out [`PoolSlice`]s either from
//! the front or from the end. Slices are plain `(offset, len)` handles, so they never
//! borrow the pool and stay valid until they are deallocated or the pool is reset.
//!
//! The most recent front allocation is the only one that can grow or shrink in
//! place. The connection keeps its read buffer (and later its write buffer) in that
//! slot, while parsed strings either live inside consumed read-buffer bytes or are
//! allocated from the end.

use std::ops::Range;

mod large;
pub(crate) use large::{LargeBudget, LargeBuffer};

/// Alignment of every allocation.
pub const ALIGNMENT: usize = size_of::<usize>();

#[inline]
const fn align_up(n: usize) -> Option<usize> {
    match n.checked_add(ALIGNMENT - 1) {
        Some(v) => Some(v & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// A handle to a byte range of a [`MemoryPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PoolSlice {
    offset: usize,
    len: usize,
}

impl PoolSlice {
    pub const EMPTY: PoolSlice = PoolSlice { offset: 0, len: 0 };

    #[inline]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    #[inline]
    pub const fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    /// Sub-slice with bounds relative to this slice.
    #[inline]
    pub fn slice(&self, range: Range<usize>) -> PoolSlice {
        debug_assert!(range.start <= range.end && range.end <= self.len);
        PoolSlice { offset: self.offset + range.start, len: range.end - range.start }
    }

    /// Drops the first `n` bytes.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.offset += n;
        self.len -= n;
    }

    /// `true` when both slices share at least one byte.
    pub fn overlaps(&self, other: &PoolSlice) -> bool {
        !self.is_empty() && !other.is_empty() && self.offset < other.end() && other.offset < self.end()
    }
}

/// Bump arena with in-place resizing of its most recent front allocation.
#[derive(Debug)]
pub struct MemoryPool {
    memory: Box<[u8]>,
    /// First free byte of the front region, always aligned.
    pos: usize,
    /// First byte of the end region, always aligned.
    end: usize,
}

impl MemoryPool {
    pub fn new(size: usize) -> Self {
        let size = size & !(ALIGNMENT - 1);
        Self { memory: vec![0; size].into_boxed_slice(), pos: 0, end: size }
    }

    /// Total arena size.
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Bytes still available between the front and the end region.
    pub fn get_free(&self) -> usize {
        self.end - self.pos
    }

    /// Allocates `size` bytes from the front, or from the end when `from_end` is set.
    ///
    /// An empty allocation reserves nothing: it never overlaps another slice, and the
    /// previous front allocation stays the one resizable in place.
    pub fn allocate(&mut self, size: usize, from_end: bool) -> Option<PoolSlice> {
        let asize = align_up(size)?;
        if asize > self.get_free() {
            return None;
        }
        if from_end {
            self.end -= asize;
            Some(PoolSlice { offset: self.end, len: size })
        } else {
            let offset = self.pos;
            self.pos += asize;
            Some(PoolSlice { offset, len: size })
        }
    }

    /// Allocates `size` bytes from the end.
    ///
    /// On failure returns how many more free bytes the allocation would need.
    pub fn try_allocate(&mut self, size: usize) -> Result<PoolSlice, usize> {
        let Some(asize) = align_up(size) else {
            return Err(usize::MAX);
        };
        let free = self.get_free();
        if asize > free {
            return Err(asize - free);
        }
        self.end -= asize;
        Ok(PoolSlice { offset: self.end, len: size })
    }

    /// `true` when `slice` is the most recent front allocation.
    pub fn is_resizable_in_place(&self, slice: &PoolSlice) -> bool {
        slice.offset <= self.pos && align_up(slice.end()) == Some(self.pos)
    }

    /// Resizes `old` to `new_size`.
    ///
    /// The most recent front allocation grows or shrinks in place. Any other slice can
    /// shrink in place. An end allocation that needs to grow moves to the front.
    pub fn reallocate(&mut self, old: PoolSlice, new_size: usize) -> Option<PoolSlice> {
        if self.is_resizable_in_place(&old) {
            let new_end = align_up(old.offset.checked_add(new_size)?)?;
            if new_end > self.end {
                return None;
            }
            if new_size < old.len {
                self.memory[old.offset + new_size..old.end()].fill(0);
            }
            self.pos = new_end;
            return Some(PoolSlice { offset: old.offset, len: new_size });
        }
        if new_size <= old.len {
            self.memory[old.offset + new_size..old.end()].fill(0);
            return Some(PoolSlice { offset: old.offset, len: new_size });
        }
        if old.is_empty() {
            return self.allocate(new_size, false);
        }
        if old.offset >= self.end {
            let moved = self.allocate(new_size, false)?;
            self.memory.copy_within(old.range(), moved.offset);
            self.deallocate(old);
            return Some(moved);
        }
        None
    }

    /// Returns `slice` to the pool.
    ///
    /// Only the most recent allocation of either region is reclaimed immediately,
    /// anything else stays used until the next [`reset`](Self::reset).
    pub fn deallocate(&mut self, slice: PoolSlice) {
        if self.is_resizable_in_place(&slice) {
            self.memory[slice.range()].fill(0);
            self.pos = slice.offset;
        } else if slice.offset == self.end && slice.offset < self.memory.len() {
            if let Some(asize) = align_up(slice.len) {
                self.memory[slice.range()].fill(0);
                self.end = (self.end + asize).min(self.memory.len());
            }
        }
    }

    /// Wipes the pool, keeping the first `preserve_len` bytes of `preserve`.
    ///
    /// The preserved bytes move to the start of the arena and become the head of a new
    /// front allocation of `new_front_size` bytes, which is returned.
    pub fn reset(&mut self, preserve: PoolSlice, preserve_len: usize, new_front_size: usize) -> PoolSlice {
        let preserve_len = preserve_len.min(preserve.len);
        let new_front_size = new_front_size.max(preserve_len).min(self.memory.len());
        if preserve_len > 0 && preserve.offset != 0 {
            self.memory.copy_within(preserve.offset..preserve.offset + preserve_len, 0);
        }
        self.memory[preserve_len..].fill(0);
        self.end = self.memory.len();
        self.pos = align_up(new_front_size).map_or(self.end, |p| p.min(self.end));
        PoolSlice { offset: 0, len: new_front_size }
    }

    #[inline]
    pub fn bytes(&self, slice: PoolSlice) -> &[u8] {
        &self.memory[slice.range()]
    }

    #[inline]
    pub fn bytes_mut(&mut self, slice: PoolSlice) -> &mut [u8] {
        &mut self.memory[slice.range()]
    }

    pub(crate) fn copy_within(&mut self, src: Range<usize>, dest: usize) {
        self.memory.copy_within(src, dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_and_end_allocations() {
        let mut pool = MemoryPool::new(1024);
        let a = pool.allocate(10, false).unwrap();
        let b = pool.allocate(100, true).unwrap();
        assert_eq!(a.offset(), 0);
        assert!(b.end() <= 1024);
        assert!(!a.overlaps(&b));
        assert_eq!(pool.get_free(), 1024 - align_up(10).unwrap() - align_up(100).unwrap());
        assert_eq!(b.offset() % ALIGNMENT, 0);
        assert!(pool.allocate(2048, false).is_none());
    }

    #[test]
    fn try_allocate_reports_missing_bytes() {
        let mut pool = MemoryPool::new(256);
        let _front = pool.allocate(200, false).unwrap();
        let free = pool.get_free();
        assert_eq!(pool.try_allocate(free + 16), Err(16));
        let slice = pool.try_allocate(free).unwrap();
        assert_eq!(slice.len(), free);
        assert_eq!(pool.get_free(), 0);
    }

    #[test]
    fn only_last_front_allocation_resizes_in_place() {
        let mut pool = MemoryPool::new(1024);
        let a = pool.allocate(64, false).unwrap();
        assert!(pool.is_resizable_in_place(&a));

        let b = pool.allocate(64, false).unwrap();
        assert!(!pool.is_resizable_in_place(&a));
        assert!(pool.is_resizable_in_place(&b));

        let grown = pool.reallocate(b, 512).unwrap();
        assert_eq!(grown.offset(), b.offset());
        assert_eq!(grown.len(), 512);

        // growing a buried front allocation is refused
        assert!(pool.reallocate(a, 128).is_none());
        // shrinking it is not
        let shrunk = pool.reallocate(a, 32).unwrap();
        assert_eq!(shrunk.offset(), a.offset());
    }

    #[test]
    fn empty_front_allocation_keeps_the_resizable_slot() {
        let mut pool = MemoryPool::new(1024);
        let buf = pool.allocate(40, false).unwrap();
        let free = pool.get_free();
        let empty = pool.allocate(0, false).unwrap();
        assert!(empty.is_empty());
        assert_eq!(pool.get_free(), free);
        assert!(pool.is_resizable_in_place(&buf));

        let grown = pool.reallocate(buf, 200).unwrap();
        assert_eq!(grown.offset(), buf.offset());
        assert!(!grown.overlaps(&empty));
    }

    #[test]
    fn grow_keeps_content_and_shrink_releases_space() {
        let mut pool = MemoryPool::new(1024);
        let buf = pool.allocate(16, false).unwrap();
        pool.bytes_mut(buf).copy_from_slice(b"0123456789abcdef");
        let buf = pool.reallocate(buf, 600).unwrap();
        assert_eq!(&pool.bytes(buf)[..16], b"0123456789abcdef");

        let free_before = pool.get_free();
        let buf = pool.reallocate(buf, 8).unwrap();
        assert_eq!(pool.get_free(), free_before + 600 - 8);
        assert_eq!(pool.bytes(buf), b"01234567");
    }

    #[test]
    fn end_allocation_moves_to_front_on_growth() {
        let mut pool = MemoryPool::new(1024);
        let _front = pool.allocate(64, false).unwrap();
        let tail = pool.allocate(8, true).unwrap();
        pool.bytes_mut(tail).copy_from_slice(b"abcdefgh");
        let moved = pool.reallocate(tail, 32).unwrap();
        assert!(moved.offset() < 512);
        assert_eq!(&pool.bytes(moved)[..8], b"abcdefgh");
        assert!(pool.is_resizable_in_place(&moved));
    }

    #[test]
    fn deallocate_most_recent_only() {
        let mut pool = MemoryPool::new(1024);
        let a = pool.allocate(100, false).unwrap();
        let b = pool.allocate(100, false).unwrap();
        let free = pool.get_free();

        pool.deallocate(a);
        assert_eq!(pool.get_free(), free);

        pool.deallocate(b);
        assert_eq!(pool.get_free(), free + align_up(100).unwrap());

        let e = pool.allocate(24, true).unwrap();
        let free = pool.get_free();
        pool.deallocate(e);
        assert_eq!(pool.get_free(), free + 24);
    }

    #[test]
    fn reset_preserves_prefix() {
        let mut pool = MemoryPool::new(1024);
        let _a = pool.allocate(100, false).unwrap();
        let read = pool.allocate(300, false).unwrap();
        pool.bytes_mut(read)[..5].copy_from_slice(b"GET /");
        let _e = pool.allocate(64, true).unwrap();

        let fresh = pool.reset(read, 5, 512);
        assert_eq!(fresh.offset(), 0);
        assert_eq!(fresh.len(), 512);
        assert_eq!(&pool.bytes(fresh)[..5], b"GET /");
        assert!(pool.bytes(fresh)[5..].iter().all(|b| *b == 0));
        assert_eq!(pool.get_free(), 512);
        assert!(pool.is_resizable_in_place(&fresh));
    }

    #[test]
    fn slices_never_overlap() {
        let mut pool = MemoryPool::new(4096);
        let mut slices = vec![];
        for (i, size) in [13usize, 1, 200, 7, 64, 999].into_iter().enumerate() {
            slices.push(pool.allocate(size, i % 2 == 1).unwrap());
        }
        for (i, a) in slices.iter().enumerate() {
            assert!(a.end() <= pool.size());
            for b in &slices[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }
    }
}
