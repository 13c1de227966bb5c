use std::fmt;

/// An owned byte buffer with a read cursor and a write cursor.
///
/// `Buffer` is the unit of data transfer between flow nodes. Passing a
/// buffer into an interface operation transfers it to the provider for the
/// duration of the operation; completion hands the same allocation back.
/// The readable window is `bytes()`; providers of receive interfaces append
/// into the spare capacity, providers of stream send interfaces consume from
/// the front.
///
/// The capacity is fixed at construction. Nodes size their buffers from the
/// MTUs of the interfaces they connect at construction time, so steady-state
/// operation does not allocate.
///
/// # Examples
///
/// ```
/// use flowio::Buffer;
///
/// let mut buf = Buffer::with_capacity(16);
/// buf.append(b"hello");
/// assert_eq!(buf.bytes(), b"hello");
/// buf.advance(2);
/// assert_eq!(buf.bytes(), b"llo");
/// buf.clear();
/// assert!(buf.is_empty());
/// assert_eq!(buf.capacity(), 16);
/// ```
pub struct Buffer {
    data: Box<[u8]>,
    begin: usize,
    end: usize,
}

impl Buffer {
    /// Creates an empty buffer with the given capacity.
    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            data: vec![0; capacity].into_boxed_slice(),
            begin: 0,
            end: 0,
        }
    }

    /// Creates a buffer holding a copy of `data`, with capacity equal to its
    /// length.
    pub fn from_slice(data: &[u8]) -> Buffer {
        let mut buf = Buffer::with_capacity(data.len());
        buf.append(data);
        buf
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Length of the readable window.
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Number of bytes that can still be appended.
    pub fn spare_len(&self) -> usize {
        self.data.len() - self.end
    }

    /// The readable window.
    pub fn bytes(&self) -> &[u8] {
        &self.data[self.begin..self.end]
    }

    /// Mutable access to the readable window.
    pub fn filled_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.begin..self.end]
    }

    /// The writable spare capacity after the readable window.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    /// Marks `n` bytes of the spare capacity as filled, extending the
    /// readable window. The bytes must have been written through
    /// [`spare_mut`] first.
    ///
    /// [`spare_mut`]: Buffer::spare_mut
    pub fn add_len(&mut self, n: usize) {
        assert!(n <= self.spare_len(), "add_len past capacity");
        self.end += n;
    }

    /// Consumes `n` bytes from the front of the readable window.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.len(), "advance past readable window");
        self.begin += n;
    }

    /// Copies `src` into the spare capacity and extends the readable window.
    pub fn append(&mut self, src: &[u8]) {
        assert!(src.len() <= self.spare_len(), "append past capacity");
        self.data[self.end..self.end + src.len()].copy_from_slice(src);
        self.end += src.len();
    }

    /// Empties the buffer, resetting both cursors to the start.
    pub fn clear(&mut self) {
        self.begin = 0;
        self.end = 0;
    }

    /// Moves the readable window to the start of the allocation, making all
    /// unused capacity available as spare again.
    pub fn compact(&mut self) {
        if self.begin == 0 {
            return;
        }
        self.data.copy_within(self.begin..self.end, 0);
        self.end -= self.begin;
        self.begin = 0;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Buffer;

    #[test]
    fn cursors() {
        let mut buf = Buffer::with_capacity(8);
        assert_eq!(buf.spare_len(), 8);
        buf.append(b"abcd");
        assert_eq!(buf.bytes(), b"abcd");
        assert_eq!(buf.spare_len(), 4);
        buf.advance(3);
        assert_eq!(buf.bytes(), b"d");
        buf.compact();
        assert_eq!(buf.bytes(), b"d");
        assert_eq!(buf.spare_len(), 7);
        buf.spare_mut()[0] = b'e';
        buf.add_len(1);
        assert_eq!(buf.bytes(), b"de");
    }

    #[test]
    #[should_panic(expected = "append past capacity")]
    fn append_overflow() {
        let mut buf = Buffer::with_capacity(2);
        buf.append(b"abc");
    }

    #[test]
    fn from_slice() {
        let buf = Buffer::from_slice(b"xy");
        assert_eq!(buf.bytes(), b"xy");
        assert_eq!(buf.capacity(), 2);
        assert_eq!(buf.spare_len(), 0);
    }
}
