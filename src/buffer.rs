//! Per-connection scatter-read buffer.
//!
//! A contiguous, growable byte region with two cursors, `read_pos <= write_pos
//! <= capacity`. Readable bytes are `write_pos - read_pos`; writable bytes are
//! `capacity - write_pos`; prependable bytes are `read_pos`.
//!
//! [`Buffer::read_fd`] is the operation this whole module exists for: it
//! issues a single vectored read into the buffer's writable tail *and* a
//! fixed-size stack overflow region, so that one edge-triggered readiness
//! event can drain an unbounded kernel receive queue without looping.

use std::io::{IoSlice, IoSliceMut, Read, Write};

/// Overflow region size for [`Buffer::read_fd`]. Large enough to absorb a full
/// default TCP receive window in one call.
const OVERFLOW_CAPACITY: usize = 64 * 1024;

/// A growable, contiguous byte buffer supporting scatter reads and draining
/// writes.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Buffer {
    /// Creates a buffer with at least `capacity` bytes preallocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Bytes available to read.
    #[inline]
    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes available to write without growing.
    #[inline]
    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Bytes that could be reclaimed by sliding the readable region to the
    /// front of the buffer.
    #[inline]
    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    /// Returns the unread portion of the buffer.
    #[inline]
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Advances the read cursor by `len` bytes. `len` must not exceed
    /// [`Buffer::readable_bytes`].
    pub fn retrieve(&mut self, len: usize) {
        debug_assert!(len <= self.readable_bytes());
        self.read_pos += len;
        self.normalize();
    }

    /// Advances the read cursor up to (but not including) `end`, which must
    /// point within the current readable window.
    pub fn retrieve_until(&mut self, end: *const u8) {
        let start = self.peek().as_ptr();
        // SAFETY: caller guarantees `end` falls within `start..start+readable`.
        let len = unsafe { end.offset_from(start) };
        debug_assert!(len >= 0);
        self.retrieve(len as usize);
    }

    /// Drops all readable bytes, resetting both cursors to zero.
    pub fn retrieve_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Drains all readable bytes into an owned `Vec`, then clears the buffer.
    pub fn retrieve_all_to_vec(&mut self) -> Vec<u8> {
        let out = self.peek().to_vec();
        self.retrieve_all();
        out
    }

    /// Appends `bytes` at the write cursor, growing the buffer if needed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let start = self.write_pos;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
    }

    /// Ensures at least `len` writable bytes are available, sliding or
    /// growing as necessary. Growing never shrinks the buffer.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() >= len {
            // Enough total space once we reclaim the already-read prefix.
            let readable = self.readable_bytes();
            self.data.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        } else {
            let new_len = self.write_pos + len + 1;
            self.data.resize(new_len, 0);
        }
    }

    fn normalize(&mut self) {
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Scatter-reads from `source` into the buffer's writable tail and a
    /// fixed-size stack overflow region in a single syscall, then folds any
    /// overflow back into the buffer (growing it). Returns the number of
    /// bytes read, or `0` on clean EOF.
    ///
    /// A single call can drain a kernel receive queue far larger than the
    /// buffer's current capacity, which is what makes this safe to use from
    /// an edge-triggered reactor: one readiness notification, one call, no
    /// partial drains to account for.
    pub fn read_fd<R: Read>(&mut self, source: &mut R) -> std::io::Result<usize> {
        let mut overflow = [0u8; OVERFLOW_CAPACITY];
        let writable = self.writable_bytes();

        let n = {
            let mut slices = [
                IoSliceMut::new(&mut self.data[self.write_pos..]),
                IoSliceMut::new(&mut overflow),
            ];
            source.read_vectored(&mut slices)?
        };

        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.data.len();
            self.append(&overflow[..n - writable]);
        }

        Ok(n)
    }

    /// Writes the readable region to `sink` in a single call, advancing the
    /// read cursor by however much the kernel accepted. Never loops: the
    /// caller re-arms for writability and retries on the next event.
    pub fn write_fd<W: Write>(&mut self, sink: &mut W) -> std::io::Result<usize> {
        let n = sink.write(self.peek())?;
        self.retrieve(n);
        Ok(n)
    }

    /// Writes the readable region of this buffer followed by `extra` in a
    /// single vectored write (used to send headers and a memory-mapped body
    /// without ever copying the body into the buffer).
    pub fn write_fd_with<W: Write>(&mut self, sink: &mut W, extra: &[u8]) -> std::io::Result<usize> {
        let readable = self.readable_bytes();
        let slices = [IoSlice::new(self.peek()), IoSlice::new(extra)];
        let n = sink.write_vectored(&slices)?;

        if n <= readable {
            self.retrieve(n);
        } else {
            self.retrieve(readable);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn append_and_retrieve_roundtrip() {
        let mut buf = Buffer::with_capacity(4);
        buf.append(b"hello");
        assert_eq!(buf.readable_bytes(), 5);
        assert_eq!(buf.peek(), b"hello");
        buf.retrieve(5);
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn empty_buffer_normalizes_cursors() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"abc");
        buf.retrieve(3);
        // after draining to empty, cursors reset so future appends don't grow needlessly
        buf.append(b"xyz");
        assert_eq!(buf.peek(), b"xyz");
    }

    #[test]
    fn make_space_slides_before_growing() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(b"abcd");
        buf.retrieve(4);
        buf.append(b"01234567");
        assert_eq!(buf.peek(), b"01234567");
    }

    #[test]
    fn buffer_integrity_after_interleaved_ops() {
        let mut buf = Buffer::with_capacity(4);
        let mut all_in = Vec::new();
        let mut all_out = Vec::new();
        for i in 0..50u8 {
            let chunk = vec![i; (i as usize % 7) + 1];
            buf.append(&chunk);
            all_in.extend_from_slice(&chunk);
            assert!(buf.readable_bytes() <= all_in.len());
            if i % 3 == 0 {
                let n = buf.readable_bytes().min(5);
                all_out.extend_from_slice(&buf.peek()[..n]);
                buf.retrieve(n);
            }
        }
        all_out.extend_from_slice(buf.peek());
        assert_eq!(all_in, all_out);
    }

    #[test]
    fn read_fd_drains_more_than_initial_capacity_in_one_call() {
        let payload = vec![0xABu8; 200_000];
        let mut cursor = Cursor::new(payload.clone());
        let mut buf = Buffer::with_capacity(1024);

        let n = buf.read_fd(&mut cursor).expect("read_fd failed");
        assert_eq!(n, 200_000);
        assert_eq!(buf.readable_bytes(), 200_000);
        assert_eq!(buf.peek(), payload.as_slice());
    }

    #[test]
    fn read_fd_reports_clean_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let mut buf = Buffer::with_capacity(16);
        let n = buf.read_fd(&mut cursor).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn write_fd_advances_read_cursor_by_kernel_return() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"hello world");
        let mut sink = Vec::new();
        let n = buf.write_fd(&mut sink).unwrap();
        assert_eq!(n, 11);
        assert_eq!(sink, b"hello world");
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn write_fd_with_sends_buffer_then_extra_without_copying_extra_in() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"HEAD");
        let mut sink = Vec::new();
        let n = buf.write_fd_with(&mut sink, b"BODY").unwrap();
        assert_eq!(n, 8);
        assert_eq!(sink, b"HEADBODY");
    }
}
