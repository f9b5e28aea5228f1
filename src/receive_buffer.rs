/// Accumulates the payload of one inbound frame.
pub struct ReceiveBuffer<const BUFSIZE: usize> {
    buf: [u8; BUFSIZE],
    size: usize,
    terminated: bool,
}

impl<const BUFSIZE: usize> ReceiveBuffer<BUFSIZE> {
    pub const fn new() -> Self {
        Self {
            buf: [0; BUFSIZE],
            size: 0,
            terminated: false,
        }
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<(), ()> {
        if self.size == BUFSIZE {
            Err(())
        } else {
            self.buf[self.size] = byte;
            self.size += 1;
            Ok(())
        }
    }

    /// Appends the zero terminator. It needs a free slot like any other byte.
    pub fn terminate(&mut self) -> Result<(), ()> {
        self.write_byte(0)?;
        self.terminated = true;
        Ok(())
    }

    /// Payload without the terminator.
    pub fn message(&self) -> &[u8] {
        let len = if self.terminated {
            self.size - 1
        } else {
            self.size
        };

        &self.buf[..len]
    }

    /// Payload followed by the terminator, if any.
    pub fn as_terminated(&self) -> &[u8] {
        &self.buf[..self.size]
    }

    /// Copies the payload out. On a short `buf` nothing is copied and the payload length is
    /// returned as the error.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, usize> {
        let message = self.message();

        if buf.len() < message.len() {
            Err(message.len())
        } else {
            buf[..message.len()].copy_from_slice(message);
            Ok(message.len())
        }
    }

    pub fn reset(&mut self) {
        self.size = 0;
        self.terminated = false;
    }
}
