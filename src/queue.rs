//! Outbound packet queue in front of the link transmitter.
//!
//! Packets are stored back to back in a ring as `[len][payload]`, so one packet costs its
//! payload plus one byte.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;

use crate::{Error, Reason};

/// Largest payload a one-byte length prefix can describe.
pub const MAX_PACKET_LEN: usize = u8::MAX as usize;

/// Something packets can be handed to.
pub trait Transmit {
    /// Ready to take a new message right now.
    fn is_tx_idle(&self) -> bool;

    fn send(&self, bytes: &[u8]) -> Result<(), Error>;
}

/// Outcome of [`OutboundQueue::pop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop<const N: usize> {
    /// The transmitter is still sending; nothing was dequeued.
    Busy,
    Empty,
    /// A packet of this many bytes was handed to the transmitter.
    Sent(usize),
    /// Test mode: the packet was dequeued and returned instead of sent.
    Captured(Vec<u8, N>),
}

struct Ring<const N: usize> {
    buf: [u8; N],
    read: usize,
    write: usize,
    free: usize,
    count: usize,
}

impl<const N: usize> Ring<N> {
    const fn new() -> Self {
        Self {
            buf: [0; N],
            read: 0,
            write: 0,
            free: N,
            count: 0,
        }
    }

    fn put(&mut self, byte: u8) {
        self.buf[self.write] = byte;
        self.write = (self.write + 1) % N;
    }

    /// Copies the oldest packet without consuming it.
    fn peek(&self) -> Vec<u8, N> {
        let len = usize::from(self.buf[self.read]);
        let mut packet = Vec::new();

        for i in 1..=len {
            // len < N, so this never overflows.
            let _ = packet.push(self.buf[(self.read + i) % N]);
        }

        packet
    }

    fn consume(&mut self, len: usize) {
        self.read = (self.read + len + 1) % N;
        self.free += len + 1;
        self.count -= 1;
    }
}

pub struct OutboundQueue<const N: usize> {
    ring: Mutex<RefCell<Ring<N>>>,
}

impl<const N: usize> OutboundQueue<N> {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(RefCell::new(Ring::new())),
        }
    }

    /// Empties the queue.
    pub fn reset(&self) {
        critical_section::with(|cs| *self.ring.borrow_ref_mut(cs) = Ring::new());
    }

    /// Appends a packet. Nothing is written when the packet is rejected.
    pub fn push(&self, bytes: &[u8]) -> Result<(), Error> {
        let len = bytes.len();

        if len == 0 {
            return Err(Reason::EmptyPacket.into());
        }

        if len > MAX_PACKET_LEN || len + 1 > N {
            return Err(Reason::PacketTooLong(len).into());
        }

        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);

            if len + 1 > ring.free {
                return Err(Reason::QueueFull {
                    needed: len + 1,
                    free: ring.free,
                }
                .into());
            }

            ring.put(len as u8);
            for &byte in bytes {
                ring.put(byte);
            }
            ring.free -= len + 1;
            ring.count += 1;

            Ok(())
        })
    }

    /// Dequeues the oldest packet and hands it to `link`, or returns it when `test_mode` is set.
    pub fn pop<T: Transmit>(&self, link: &T, test_mode: bool) -> Result<Pop<N>, Error> {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);

            if !link.is_tx_idle() {
                return Ok(Pop::Busy);
            }

            if ring.count == 0 {
                return Ok(Pop::Empty);
            }

            let packet = ring.peek();
            let len = packet.len();

            if test_mode {
                ring.consume(len);
                return Ok(Pop::Captured(packet));
            }

            link.send(&packet)?;
            ring.consume(len);
            Ok(Pop::Sent(len))
        })
    }

    /// Queues `bytes` and sends right away if the link is idle.
    pub fn write<T: Transmit>(&self, link: &T, bytes: &[u8]) -> Result<Pop<N>, Error> {
        self.push(bytes)?;
        self.pop(link, false)
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes still available, length prefixes included.
    pub fn free(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).free)
    }
}

impl<const N: usize> Default for OutboundQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
