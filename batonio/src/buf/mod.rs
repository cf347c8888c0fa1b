//! Growable byte-buffer queue.
//!
//! [`BufQueue`] is a chain of immutable [`Bytes`] chunks followed by a
//! writable tail. Reads land directly in the tail through
//! [`preallocate`](BufQueue::preallocate) /
//! [`postallocate`](BufQueue::postallocate); writes hand the chunks to
//! the kernel without copying.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::fmt;

/// A queue of bytes that grows at its tail.
///
/// Space handed out by `preallocate` stays invisible until committed
/// with `postallocate`; any other mutation discards it.
#[derive(Default)]
pub struct BufQueue {
    chunks: VecDeque<Bytes>,
    /// Total length of `chunks`.
    chunks_len: usize,
    tail: BytesMut,
    /// Trailing bytes of `tail` that were preallocated but not committed.
    uncommitted: usize,
}

impl BufQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed bytes.
    pub fn len(&self) -> usize {
        self.chunks_len + self.committed_tail().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn committed_tail(&self) -> &[u8] {
        &self.tail[..self.tail.len() - self.uncommitted]
    }

    fn discard_uncommitted(&mut self) {
        let committed = self.tail.len() - self.uncommitted;
        self.tail.truncate(committed);
        self.uncommitted = 0;
    }

    /// Moves the committed tail into the chunk list.
    fn seal_tail(&mut self) {
        self.discard_uncommitted();

        if !self.tail.is_empty() {
            let sealed = self.tail.split().freeze();
            self.chunks_len += sealed.len();
            self.chunks.push_back(sealed);
        }
    }

    /// Copies `data` to the end of the queue.
    pub fn append(&mut self, data: &[u8]) {
        self.discard_uncommitted();
        self.tail.extend_from_slice(data);
    }

    /// Appends `data` without copying it.
    pub fn append_bytes(&mut self, data: Bytes) {
        self.seal_tail();

        if !data.is_empty() {
            self.chunks_len += data.len();
            self.chunks.push_back(data);
        }
    }

    /// Returns a writable region of at least `min` bytes (and at least
    /// one) at the end of the queue.
    ///
    /// When the tail lacks room, a new buffer of `max(min, hint)` bytes is
    /// started. The region is zero-filled and only becomes part of the
    /// queue once committed with [`postallocate`](Self::postallocate).
    pub fn preallocate(&mut self, min: usize, hint: usize) -> &mut [u8] {
        let min = min.max(1);
        self.discard_uncommitted();

        if self.tail.capacity() - self.tail.len() < min {
            self.seal_tail();
            self.tail.reserve(min.max(hint));
        }

        let start = self.tail.len();
        let room = self.tail.capacity() - start;

        self.tail.resize(start + room, 0);
        self.uncommitted = room;

        &mut self.tail[start..]
    }

    /// Commits the first `n` bytes of the last preallocated region.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the preallocated region.
    pub fn postallocate(&mut self, n: usize) {
        assert!(
            n <= self.uncommitted,
            "postallocate({n}) exceeds the preallocated {} bytes",
            self.uncommitted
        );

        self.uncommitted -= n;
        self.discard_uncommitted();
    }

    /// Iterates over the committed bytes, chunk by chunk.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        let tail = Some(self.committed_tail()).filter(|t| !t.is_empty());
        self.chunks.iter().map(|c| &c[..]).chain(tail)
    }

    /// Returns the committed chunks as shared buffers, without consuming
    /// them.
    pub fn to_chunks(&mut self) -> Vec<Bytes> {
        self.seal_tail();
        self.chunks.iter().cloned().collect()
    }

    /// Copies the committed bytes into one contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.len());
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }

        out.freeze()
    }

    /// Removes and returns the first `n` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n > self.len()`.
    pub fn split_to(&mut self, n: usize) -> Bytes {
        assert!(n <= self.len(), "split_to({n}) out of bounds: {}", self.len());
        self.seal_tail();
        self.chunks_len -= n;

        if let Some(front) = self.chunks.front_mut()
            && front.len() >= n
        {
            let out = front.split_to(n);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            return out;
        }

        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;

        while remaining > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };

            let take = remaining.min(front.len());
            out.extend_from_slice(&front.split_to(take));
            remaining -= take;

            if front.is_empty() {
                self.chunks.pop_front();
            }
        }

        out.freeze()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.chunks_len = 0;
        self.tail.clear();
        self.uncommitted = 0;
    }
}

impl fmt::Debug for BufQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufQueue")
            .field("len", &self.len())
            .field("chunks", &self.chunks().count())
            .finish()
    }
}

impl From<&[u8]> for BufQueue {
    fn from(data: &[u8]) -> Self {
        let mut queue = Self::new();
        queue.append(data);
        queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_preallocate_is_invisible_until_committed() {
        let mut queue = BufQueue::new();

        let region = queue.preallocate(4, 16);
        assert!(region.len() >= 16);
        region[..3].copy_from_slice(b"abc");
        assert_eq!(queue.len(), 0);

        queue.postallocate(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(&queue.to_bytes()[..], b"abc");
    }

    #[test]
    fn test_preallocate_never_returns_empty_region() {
        let mut queue = BufQueue::new();
        assert!(!queue.preallocate(0, 0).is_empty());
    }

    #[test]
    fn test_preallocate_reuses_tail_room() {
        let mut queue = BufQueue::new();

        queue.preallocate(1, 64)[..2].copy_from_slice(b"hi");
        queue.postallocate(2);

        let region = queue.preallocate(8, 64);
        assert!(region.len() >= 8);
        region[0] = b'!';
        queue.postallocate(1);

        assert_eq!(queue.chunks().count(), 1);
        assert_eq!(&queue.to_bytes()[..], b"hi!");
    }

    #[test]
    fn test_append_discards_uncommitted_space() {
        let mut queue = BufQueue::new();

        queue.preallocate(8, 8).fill(b'x');
        queue.append(b"ok");

        assert_eq!(&queue.to_bytes()[..], b"ok");
    }

    #[test]
    fn test_split_to_across_chunks() {
        let mut queue = BufQueue::new();
        queue.append_bytes(Bytes::from_static(b"ab"));
        queue.append(b"cde");
        queue.append_bytes(Bytes::from_static(b"f"));

        assert_eq!(&queue.split_to(3)[..], b"abc");
        assert_eq!(queue.len(), 3);
        assert_eq!(&queue.split_to(3)[..], b"def");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_to_chunks_keeps_contents() {
        let mut queue = BufQueue::from(&b"head"[..]);
        queue.append_bytes(Bytes::from_static(b"tail"));

        let chunks = queue.to_chunks();
        assert_eq!(chunks, vec![Bytes::from_static(b"head"), Bytes::from_static(b"tail")]);
        assert_eq!(queue.len(), 8);
    }

    #[test]
    #[should_panic(expected = "exceeds the preallocated")]
    fn test_postallocate_beyond_region_panics() {
        let mut queue = BufQueue::new();
        let room = queue.preallocate(1, 1).len();
        queue.postallocate(room + 1);
    }

    proptest! {
        #[test]
        fn prop_queue_matches_flat_model(
            ops in proptest::collection::vec((0u8..3, proptest::collection::vec(any::<u8>(), 0..40)), 0..24)
        ) {
            let mut queue = BufQueue::new();
            let mut model: Vec<u8> = Vec::new();

            for (op, data) in ops {
                match op {
                    0 => {
                        queue.append(&data);
                        model.extend_from_slice(&data);
                    }
                    1 => {
                        queue.append_bytes(Bytes::from(data.clone()));
                        model.extend_from_slice(&data);
                    }
                    _ => {
                        let region = queue.preallocate(data.len(), 32);
                        region[..data.len()].copy_from_slice(&data);
                        queue.postallocate(data.len());
                        model.extend_from_slice(&data);
                    }
                }

                prop_assert_eq!(queue.len(), model.len());
            }

            prop_assert_eq!(&queue.to_bytes()[..], &model[..]);

            let half = model.len() / 2;
            prop_assert_eq!(&queue.split_to(half)[..], &model[..half]);
            prop_assert_eq!(&queue.to_bytes()[..], &model[half..]);
        }
    }
}
