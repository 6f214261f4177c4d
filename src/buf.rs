//! Byte queue backing per-connection ingress and egress.
//!
//! Appends go at the tail; consumption advances a head offset so draining the
//! front of a large pipeline does not shuffle the remainder on every frame.
//! The dead prefix is compacted once it dominates the allocation.

/// Dead-prefix size below which consume never compacts.
const COMPACT_MIN: usize = 4096;

/// Append-at-tail / consume-from-head byte sequence.
#[derive(Default)]
pub struct Buf {
    data: Vec<u8>,
    start: usize,
}

impl Buf {
    pub fn new() -> Self {
        Buf { data: Vec::new(), start: 0 }
    }

    /// Number of live bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The live region. Invalidated by any mutation.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..]
    }

    /// Append `bytes` at the tail.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Remove the first `n` live bytes.
    ///
    /// Panics if `n` exceeds the live length.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consume past end of buffer");
        self.start += n;
        if self.start == self.data.len() {
            self.data.clear();
            self.start = 0;
        } else if self.start >= COMPACT_MIN && self.start * 2 >= self.data.len() {
            self.data.drain(..self.start);
            self.start = 0;
        }
    }

    /// Drop all live bytes.
    pub fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }

    /// Append a 4-byte placeholder and return its position for a later
    /// [`patch_u32`](Self::patch_u32).
    ///
    /// The returned mark is a live-region offset; it stays valid until the
    /// next `consume` or `clear`.
    pub fn reserve_u32(&mut self) -> usize {
        let mark = self.len();
        self.data.extend_from_slice(&[0u8; 4]);
        mark
    }

    /// Overwrite the 4 bytes at live-region offset `mark` with `value`,
    /// little-endian.
    pub fn patch_u32(&mut self, mark: usize, value: u32) {
        let at = self.start + mark;
        self.data[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Cut the live region back to `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        assert!(len <= self.len(), "truncate past end of buffer");
        self.data.truncate(self.start + len);
    }
}
