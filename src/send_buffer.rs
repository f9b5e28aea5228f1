use core::cmp;

/// Private copy of an outgoing message, handed out one byte at a time.
pub struct SendBuffer<const BUFSIZE: usize> {
    buf: [u8; BUFSIZE],
    pos: usize,
    end: usize,
}

impl<const BUFSIZE: usize> SendBuffer<BUFSIZE> {
    pub const fn new() -> Self {
        Self {
            buf: [0; BUFSIZE],
            pos: 0,
            end: 0,
        }
    }

    /// Copies as much of `buf` as fits and returns what did not.
    ///
    /// Anything still unsent is discarded.
    pub fn write<'a>(&mut self, buf: &'a [u8]) -> &'a [u8] {
        let take_idx = cmp::min(buf.len(), BUFSIZE);
        self.buf[..take_idx].copy_from_slice(&buf[..take_idx]);

        self.pos = 0;
        self.end = take_idx;

        &buf[take_idx..]
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.end = 0;
    }

    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.pos
    }
}

impl<const BUFSIZE: usize> Iterator for SendBuffer<BUFSIZE> {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_empty() {
            None
        } else {
            self.pos += 1;
            Some(self.buf[self.pos - 1])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlong_input_is_cut() {
        let mut sb: SendBuffer<4> = SendBuffer::new();

        let rest = sb.write(b"abcdef");

        assert_eq!(rest, b"ef");
        assert_eq!(sb.remaining(), 4);
    }

    #[test]
    fn bytes_come_out_in_order() {
        let mut sb: SendBuffer<8> = SendBuffer::new();
        sb.write(b"hey");

        assert_eq!(sb.next(), Some(b'h'));
        assert_eq!(sb.remaining(), 2);
        assert_eq!(sb.next(), Some(b'e'));
        assert_eq!(sb.next(), Some(b'y'));
        assert_eq!(sb.next(), None);
        assert!(sb.is_empty());
    }
}
