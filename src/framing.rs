//! Transmit and receive state machines of the marker-framed link.
//!
//! Both sides are independent: the transmitter streams a private copy of one message, the
//! receiver collects the bytes between a start and a stop marker.

use crate::{
    receive_buffer::ReceiveBuffer, send_buffer::SendBuffer, Error, ProtocolError, Reason,
    RxState, TxState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxSignal {
    /// Holding register can take another byte.
    BufferEmpty,
    /// Shift register drained.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxAction {
    Write(u8),
    /// Write the final byte and wait for transmission complete instead of buffer empty.
    WriteLast(u8),
    Finished,
}

pub struct LinkTx<const TXBUFSIZE: usize> {
    state: TxState,
    buffer: SendBuffer<TXBUFSIZE>,
}

impl<const TXBUFSIZE: usize> LinkTx<TXBUFSIZE> {
    pub const fn new() -> Self {
        Self {
            state: TxState::Idle,
            buffer: SendBuffer::new(),
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != TxState::Idle
    }

    /// Takes a copy of `bytes`; the caller's buffer is free once this returns.
    pub fn start(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.is_busy() {
            return Err(Reason::LinkBusy.into());
        }

        if bytes.is_empty() {
            return Err(Reason::EmptyMessage.into());
        }

        if bytes.len() > TXBUFSIZE {
            return Err(Reason::MessageTooLong {
                len: bytes.len(),
                capacity: TXBUFSIZE,
            }
            .into());
        }

        self.buffer.write(bytes);
        self.state = TxState::Transmitting;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    pub fn on_signal(&mut self, signal: TxSignal) -> Result<TxAction, Error> {
        let unexpected = ProtocolError::UnexpectedTxSignal {
            state: self.state,
            signal,
        };

        match (self.state, signal) {
            (TxState::Transmitting, TxSignal::BufferEmpty) => {
                let byte = self.buffer.next().ok_or(unexpected)?;

                if self.buffer.is_empty() {
                    self.state = TxState::DrainComplete;
                    Ok(TxAction::WriteLast(byte))
                } else {
                    Ok(TxAction::Write(byte))
                }
            }
            (TxState::DrainComplete, TxSignal::Complete) => {
                self.buffer.reset();
                self.state = TxState::Idle;
                Ok(TxAction::Finished)
            }
            _ => Err(unexpected.into()),
        }
    }
}

impl<const TXBUFSIZE: usize> Default for LinkTx<TXBUFSIZE> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxSignal {
    StartMarker,
    Byte(u8),
    StopMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxAction {
    /// Start listening to data bytes and the stop marker.
    OpenFrame,
    Continue,
    /// Message complete: stop listening and block the receiver until the next start marker.
    CloseFrame,
}

pub struct LinkRx<const RXBUFSIZE: usize> {
    state: RxState,
    buffer: ReceiveBuffer<RXBUFSIZE>,
}

impl<const RXBUFSIZE: usize> LinkRx<RXBUFSIZE> {
    pub const fn new() -> Self {
        Self {
            state: RxState::Idle,
            buffer: ReceiveBuffer::new(),
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Inside a frame.
    pub fn is_busy(&self) -> bool {
        matches!(self.state, RxState::FrameOpened | RxState::Receiving)
    }

    pub fn on_signal(&mut self, signal: RxSignal) -> Result<RxAction, Error> {
        let unexpected = ProtocolError::UnexpectedRxSignal {
            state: self.state,
            signal,
        };

        match (self.state, signal) {
            (RxState::Idle, RxSignal::StartMarker) => {
                self.buffer.reset();
                self.state = RxState::FrameOpened;
                Ok(RxAction::OpenFrame)
            }
            (RxState::FrameOpened | RxState::Receiving, RxSignal::StartMarker) => {
                Err(ProtocolError::NestedStartMarker.into())
            }
            // The start marker itself.
            (RxState::FrameOpened, RxSignal::Byte(_)) => {
                self.state = RxState::Receiving;
                Ok(RxAction::Continue)
            }
            (RxState::Receiving, RxSignal::Byte(byte)) => {
                self.buffer
                    .write_byte(byte)
                    .map_err(|_| Reason::ReceiveBufferFull)?;
                Ok(RxAction::Continue)
            }
            (RxState::FrameOpened | RxState::Receiving, RxSignal::StopMarker) => {
                self.buffer
                    .terminate()
                    .map_err(|_| Reason::ReceiveBufferFull)?;
                self.state = RxState::FrameClosed;
                Ok(RxAction::CloseFrame)
            }
            _ => Err(unexpected.into()),
        }
    }

    /// Leaves [`RxState::FrameClosed`] once the close actions have been applied.
    pub fn rearm(&mut self) {
        if self.state == RxState::FrameClosed {
            self.state = RxState::Idle;
        }
    }

    /// Last complete message, terminator excluded.
    pub fn message(&self) -> &[u8] {
        self.buffer.message()
    }

    pub fn as_terminated(&self) -> &[u8] {
        self.buffer.as_terminated()
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize, usize> {
        self.buffer.read(buf)
    }
}

impl<const RXBUFSIZE: usize> Default for LinkRx<RXBUFSIZE> {
    fn default() -> Self {
        Self::new()
    }
}
