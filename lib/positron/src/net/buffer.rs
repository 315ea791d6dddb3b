/// Head offsets below this are left in place; larger ones trigger compaction
/// so the backing storage stays bounded.
const COMPACT_THRESHOLD: usize = 16 * 1024;

/// The buffer refused more data; the capacity limit would be exceeded.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BufferOverrun;

/// Bounded FIFO byte queue backing channel IO. Data is appended at the tail
/// and consumed from the head; consumed space is reclaimed lazily.
pub struct Buffer {
    data: Vec<u8>,
    head: usize,
    limit: usize,
}

impl Buffer {
    #[inline]
    pub fn with_limit(limit: usize) -> Buffer {
        Buffer {
            data: Vec::new(),
            head: 0,
            limit,
        }
    }

    /// The number of unconsumed bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.data.len()
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Capacity left before the limit is hit.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.limit - self.len()
    }

    /// Unconsumed data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Appends bytes at the tail, refusing to grow past the limit.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), BufferOverrun> {
        if bytes.len() > self.free_capacity() {
            return Err(BufferOverrun);
        }

        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Discards `count` bytes from the head.
    pub fn consume(&mut self, count: usize) {
        assert!(count <= self.len(), "Consumed past the end of the buffer");

        self.head += count;
        if self.head == self.data.len() {
            self.data.clear();
            self.head = 0;
        } else if self.head >= COMPACT_THRESHOLD {
            self.data.drain(..self.head);
            self.head = 0;
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_consume_roundtrip() {
        let mut buffer = Buffer::with_limit(64);

        buffer.extend(&[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4]);

        buffer.consume(2);
        assert_eq!(buffer.as_slice(), &[3, 4]);

        buffer.extend(&[5]).unwrap();
        assert_eq!(buffer.as_slice(), &[3, 4, 5]);

        buffer.consume(3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_limit_enforced() {
        let mut buffer = Buffer::with_limit(4);

        buffer.extend(&[1, 2, 3]).unwrap();
        assert_eq!(buffer.extend(&[4, 5]), Err(BufferOverrun));

        // Consuming frees capacity again.
        buffer.consume(2);
        buffer.extend(&[4, 5]).unwrap();
        assert_eq!(buffer.as_slice(), &[3, 4, 5]);
    }

    #[test]
    fn test_compaction_keeps_data() {
        let mut buffer = Buffer::with_limit(COMPACT_THRESHOLD * 2);
        let chunk = vec![7u8; COMPACT_THRESHOLD];

        buffer.extend(&chunk).unwrap();
        buffer.extend(&[1, 2, 3]).unwrap();
        buffer.consume(COMPACT_THRESHOLD);

        assert_eq!(buffer.as_slice(), &[1, 2, 3]);
        assert_eq!(buffer.free_capacity(), COMPACT_THRESHOLD * 2 - 3);
    }

    #[test]
    #[should_panic(expected = "Consumed past the end")]
    fn test_overconsume_panics() {
        let mut buffer = Buffer::with_limit(8);
        buffer.extend(&[1]).unwrap();
        buffer.consume(2);
    }
}
