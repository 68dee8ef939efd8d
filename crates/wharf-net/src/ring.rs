/// Fixed-capacity byte ring for inbound data. One slot is intentionally
/// left unused at the full boundary: if the write offset were allowed to
/// land on the read offset, a full ring would be indistinguishable from an
/// empty one and the whole buffer would be discarded.
pub(crate) struct RingBuffer {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
}

impl RingBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { buf: vec![0; capacity].into_boxed_slice(), read: 0, write: 0 }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Readable bytes: `(write − read) mod capacity`.
    pub(crate) fn len(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            (self.buf.len() - self.read) + self.write
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() == self.buf.len() - 1
    }

    pub(crate) fn read_offset(&self) -> usize {
        self.read
    }

    pub(crate) fn write_offset(&self) -> usize {
        self.write
    }

    /// Contiguous region a `recv` may fill: from the write offset to the
    /// end of the ring, or to just before the read offset. Empty when the
    /// ring is full.
    pub(crate) fn writable_chunk(&mut self) -> &mut [u8] {
        let max = if self.write >= self.read {
            let mut max = self.buf.len() - self.write;
            if self.read == 0 {
                max -= 1;
            }
            max
        } else {
            self.read - self.write - 1
        };
        let start = self.write;
        &mut self.buf[start..start + max]
    }

    /// Advance the write offset after `n` bytes landed in the chunk
    /// returned by `writable_chunk`.
    pub(crate) fn commit(&mut self, n: usize) {
        self.write += n;
        if self.write == self.buf.len() {
            self.write = 0;
        }
    }

    /// Contiguous readable region starting at the read offset.
    pub(crate) fn readable_chunk(&self) -> &[u8] {
        if self.write >= self.read {
            &self.buf[self.read..self.write]
        } else {
            &self.buf[self.read..]
        }
    }

    /// Drop `n` consumed bytes from the front of the current chunk.
    pub(crate) fn consume(&mut self, n: usize) {
        self.read += n;
        if self.read == self.buf.len() {
            self.read = 0;
        }
    }
}

/// Fixed-capacity outbound staging buffer. Linear rather than wrapping: a
/// partial drain slides the unsent residual back to the front.
pub(crate) struct FlushBuffer {
    buf: Box<[u8]>,
    len: usize,
}

impl FlushBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { buf: vec![0; capacity].into_boxed_slice(), len: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Copy as much of `src` as fits, returning the number of bytes taken.
    pub(crate) fn push(&mut self, src: &[u8]) -> usize {
        let take = src.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + take].copy_from_slice(&src[..take]);
        self.len += take;
        take
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Drop `n` sent bytes from the front, keeping the residual in order.
    pub(crate) fn consume(&mut self, n: usize) {
        self.buf.copy_within(n..self.len, 0);
        self.len -= n;
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(ring: &mut RingBuffer, data: &[u8]) -> usize {
        let chunk = ring.writable_chunk();
        let n = chunk.len().min(data.len());
        chunk[..n].copy_from_slice(&data[..n]);
        ring.commit(n);
        n
    }

    fn drain(ring: &mut RingBuffer, out: &mut Vec<u8>) {
        loop {
            let chunk = ring.readable_chunk();
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(chunk);
            let n = chunk.len();
            ring.consume(n);
        }
    }

    #[test]
    fn len_matches_modular_offset_math() {
        let mut ring = RingBuffer::new(16);
        assert_eq!(fill(&mut ring, &[1; 10]), 10);
        assert_eq!(ring.len(), 10);
        ring.consume(6);
        assert_eq!(ring.len(), 4);
        // wrap the write offset
        assert_eq!(fill(&mut ring, &[2; 6]), 6);
        assert_eq!(fill(&mut ring, &[3; 5]), 5);
        assert_eq!(ring.len(), 15);
        assert_eq!(
            ring.len(),
            (ring.write_offset() + ring.capacity() - ring.read_offset()) % ring.capacity()
        );
    }

    #[test]
    fn one_slot_stays_unused_at_the_full_boundary() {
        let mut ring = RingBuffer::new(8);
        assert_eq!(fill(&mut ring, &[9; 8]), 7);
        assert!(ring.is_full());
        assert!(ring.writable_chunk().is_empty());
        assert_ne!(ring.write_offset(), ring.read_offset());
    }

    #[test]
    fn bytes_come_back_in_order_across_wraps() {
        let mut ring = RingBuffer::new(8);
        let mut out = Vec::new();
        let data: Vec<u8> = (0..64).collect();
        let mut sent = 0;
        while sent < data.len() {
            sent += fill(&mut ring, &data[sent..]);
            drain(&mut ring, &mut out);
        }
        assert_eq!(out, data);
    }

    #[test]
    fn drained_readable_bytes_equal_reported_len() {
        let mut ring = RingBuffer::new(32);
        fill(&mut ring, &[5; 20]);
        ring.consume(15);
        fill(&mut ring, &[6; 20]);
        let expected = ring.len();
        let mut out = Vec::new();
        drain(&mut ring, &mut out);
        assert_eq!(out.len(), expected);
    }

    #[test]
    fn flush_buffer_slides_residual_to_front() {
        let mut out = FlushBuffer::new(8);
        assert_eq!(out.push(b"abcdef"), 6);
        out.consume(4);
        assert_eq!(out.as_slice(), b"ef");
        assert_eq!(out.push(b"ghijklm"), 6);
        assert!(out.is_full());
        assert_eq!(out.as_slice(), b"efghijkl");
        out.clear();
        assert!(out.is_empty());
    }
}
