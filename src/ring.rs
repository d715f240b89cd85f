//! Bounded raw-output ring.
//!
//! Keeps the last N bytes a child wrote, untouched by the emulator. When a
//! TUI crashes before rendering anything useful, the tail of this buffer is
//! what the client reads to diagnose it.

use std::collections::VecDeque;

/// Default ring capacity. 64 KiB comfortably holds the final screens of a
/// crashing TUI plus its panic output.
pub const DEFAULT_RING_CAPACITY: usize = 64 * 1024;

/// Fixed-capacity byte log; the oldest bytes are discarded once full.
#[derive(Debug)]
pub struct RawRing {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl RawRing {
    /// Create an empty ring holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(DEFAULT_RING_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Append bytes, evicting the oldest past the capacity bound.
    pub fn extend(&mut self, bytes: &[u8]) {
        // Oversized writes only keep their tail.
        let bytes = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };
        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(bytes);
    }

    /// Number of bytes currently held.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the ring holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The last `n` newline-separated lines, lossily decoded.
    pub fn tail_lines(&self, n: usize) -> String {
        let bytes: Vec<u8> = self.buf.iter().copied().collect();
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

impl Default for RawRing {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_bytes_up_to_capacity() {
        let mut ring = RawRing::new(8);
        ring.extend(b"abc");
        assert_eq!(ring.len(), 3);
        ring.extend(b"defgh");
        assert_eq!(ring.len(), 8);
        assert_eq!(ring.tail_lines(1), "abcdefgh");
    }

    #[test]
    fn evicts_oldest_bytes() {
        let mut ring = RawRing::new(8);
        ring.extend(b"abcdefgh");
        ring.extend(b"XY");
        assert_eq!(ring.len(), 8);
        assert_eq!(ring.tail_lines(1), "cdefghXY");
    }

    #[test]
    fn oversized_write_keeps_tail() {
        let mut ring = RawRing::new(4);
        ring.extend(b"0123456789");
        assert_eq!(ring.tail_lines(1), "6789");
    }

    #[test]
    fn tail_lines_returns_last_n() {
        let mut ring = RawRing::new(1024);
        ring.extend(b"one\ntwo\nthree\nfour\n");
        assert_eq!(ring.tail_lines(2), "three\nfour");
        assert_eq!(ring.tail_lines(99), "one\ntwo\nthree\nfour");
        assert_eq!(ring.tail_lines(0), "");
    }

    #[test]
    fn empty_ring_yields_empty_tail() {
        let ring = RawRing::default();
        assert!(ring.is_empty());
        assert_eq!(ring.tail_lines(5), "");
    }
}
