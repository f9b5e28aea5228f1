use heapless::Vec;

use crate::config::BusConfig;
use crate::{BusState, Error, ProtocolError, Reason};

/// Largest payload a single read transaction can return.
pub const MAX_READ_LEN: usize = 4;

/// Interrupt-sourced events that advance a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusSignal {
    /// Address or command byte acknowledged.
    Ack,
    /// Address or command byte not acknowledged.
    Nack,
    ByteReady(u8),
    /// Stop condition observed on the bus.
    Stop,
}

/// What the driver must do to the peripheral after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusAction {
    StartWrite { address: u8 },
    SendCommand(u8),
    StartRead { address: u8, len: u8 },
    /// The device is still busy: repeat the read addressing.
    RetryRead { address: u8, len: u8 },
    Wait,
    Ack,
    NackAndStop,
    /// The stop condition completed the transaction.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusRequest {
    pub address: u8,
    /// Sent right after the write addressing, e.g. a "measure, no hold" command.
    pub command: u8,
    pub len: usize,
}

/// Bytes returned by a completed transaction, most significant first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    bytes: Vec<u8, MAX_READ_LEN>,
}

impl Reading {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The payload as a big-endian integer.
    pub fn value(&self) -> u32 {
        self.bytes
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte))
    }
}

/// Write-command-then-read transaction engine.
///
/// The engine never touches hardware; every transition returns the [`BusAction`] the caller
/// has to perform.
pub struct BusEngine {
    state: BusState,
    active: bool,
    address: u8,
    command: u8,
    len: u8,
    remaining: usize,
    data: Vec<u8, MAX_READ_LEN>,
    retries: u32,
    max_retries: Option<u32>,
    reading: Option<Reading>,
}

impl BusEngine {
    pub const fn new(config: BusConfig) -> Self {
        Self {
            state: BusState::Init,
            active: false,
            address: 0,
            command: 0,
            len: 0,
            remaining: 0,
            data: Vec::new(),
            retries: 0,
            max_retries: config.max_address_retries,
            reading: None,
        }
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    /// A transaction has been started and its stop condition not yet observed.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start(&mut self, request: BusRequest) -> Result<BusAction, Error> {
        if self.active {
            return Err(Reason::BusBusy.into());
        }

        if request.len == 0 || request.len > MAX_READ_LEN {
            return Err(Reason::InvalidReadLength(request.len).into());
        }

        self.state = BusState::Init;
        self.active = true;
        self.address = request.address;
        self.command = request.command;
        self.len = request.len as u8;
        self.remaining = request.len;
        self.data.clear();
        self.retries = 0;
        self.reading = None;

        Ok(BusAction::StartWrite {
            address: request.address,
        })
    }

    pub fn on_signal(&mut self, signal: BusSignal) -> Result<BusAction, Error> {
        let unexpected = ProtocolError::UnexpectedBusSignal {
            state: self.state,
            signal,
        };

        if !self.active {
            return Err(unexpected.into());
        }

        match (self.state, signal) {
            (BusState::Init, BusSignal::Ack) => {
                self.state = BusState::CommandSent;
                Ok(BusAction::SendCommand(self.command))
            }
            (BusState::CommandSent, BusSignal::Ack) => {
                self.state = BusState::ReadAddressSent;
                Ok(BusAction::StartRead {
                    address: self.address,
                    len: self.len,
                })
            }
            (BusState::ReadAddressSent, BusSignal::Ack) => {
                self.state = BusState::ReceivingData;
                Ok(BusAction::Wait)
            }
            (BusState::ReadAddressSent, BusSignal::Nack) => {
                self.retries += 1;

                if let Some(max) = self.max_retries {
                    if self.retries > max {
                        return Err(Reason::DeviceNotResponding {
                            attempts: self.retries,
                        }
                        .into());
                    }
                }

                Ok(BusAction::RetryRead {
                    address: self.address,
                    len: self.len,
                })
            }
            (BusState::ReceivingData, BusSignal::ByteReady(byte)) => {
                self.data
                    .push(byte)
                    .map_err(|_| Reason::ReceiveBufferFull)?;
                self.remaining -= 1;

                if self.remaining > 0 {
                    Ok(BusAction::Ack)
                } else {
                    self.state = BusState::Complete;
                    Ok(BusAction::NackAndStop)
                }
            }
            (BusState::Complete, BusSignal::Stop) => {
                self.state = BusState::Init;
                self.active = false;
                self.reading = Some(Reading {
                    bytes: core::mem::take(&mut self.data),
                });
                Ok(BusAction::Finished)
            }
            _ => Err(unexpected.into()),
        }
    }

    /// Hands out the result of the last completed transaction, once.
    pub fn take_reading(&mut self) -> Option<Reading> {
        self.reading.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SI7021: BusRequest = BusRequest {
        address: 0x40,
        command: 0xF3,
        len: 2,
    };

    fn engine() -> BusEngine {
        BusEngine::new(BusConfig::default())
    }

    fn run_to_receiving(engine: &mut BusEngine) {
        engine.start(SI7021).unwrap();
        engine.on_signal(BusSignal::Ack).unwrap();
        engine.on_signal(BusSignal::Ack).unwrap();
        engine.on_signal(BusSignal::Ack).unwrap();
    }

    #[test]
    fn full_transaction_with_one_busy_nack() {
        let mut engine = engine();

        assert_eq!(
            engine.start(SI7021),
            Ok(BusAction::StartWrite { address: 0x40 })
        );
        assert_eq!(
            engine.on_signal(BusSignal::Ack),
            Ok(BusAction::SendCommand(0xF3))
        );
        assert_eq!(
            engine.on_signal(BusSignal::Ack),
            Ok(BusAction::StartRead {
                address: 0x40,
                len: 2
            })
        );
        assert_eq!(
            engine.on_signal(BusSignal::Nack),
            Ok(BusAction::RetryRead {
                address: 0x40,
                len: 2
            })
        );
        assert_eq!(engine.state(), BusState::ReadAddressSent);
        assert_eq!(engine.on_signal(BusSignal::Ack), Ok(BusAction::Wait));
        assert_eq!(
            engine.on_signal(BusSignal::ByteReady(0x66)),
            Ok(BusAction::Ack)
        );
        assert_eq!(
            engine.on_signal(BusSignal::ByteReady(0x4C)),
            Ok(BusAction::NackAndStop)
        );
        assert_eq!(engine.state(), BusState::Complete);
        assert_eq!(engine.on_signal(BusSignal::Stop), Ok(BusAction::Finished));

        assert_eq!(engine.state(), BusState::Init);
        assert!(!engine.is_active());

        let reading = engine.take_reading().unwrap();
        assert_eq!(reading.as_bytes(), &[0x66, 0x4C]);
        assert_eq!(reading.value(), 0x664C);
        assert!(engine.take_reading().is_none());
    }

    #[test]
    fn starting_while_active_is_rejected() {
        let mut engine = engine();
        engine.start(SI7021).unwrap();

        assert_eq!(
            engine.start(SI7021).unwrap_err().reason,
            Reason::BusBusy
        );
        assert_eq!(engine.state(), BusState::Init);
    }

    #[test]
    fn read_length_is_bounded() {
        let mut engine = engine();

        for len in [0, MAX_READ_LEN + 1] {
            let request = BusRequest { len, ..SI7021 };
            assert_eq!(
                engine.start(request).unwrap_err().reason,
                Reason::InvalidReadLength(len)
            );
        }
        assert!(!engine.is_active());
    }

    #[test]
    fn impossible_transitions_are_protocol_errors() {
        let table: [(usize, BusSignal); 10] = [
            (0, BusSignal::Nack),
            (0, BusSignal::ByteReady(0)),
            (0, BusSignal::Stop),
            (1, BusSignal::Nack),
            (1, BusSignal::Stop),
            (2, BusSignal::ByteReady(0)),
            (2, BusSignal::Stop),
            (3, BusSignal::Ack),
            (3, BusSignal::Nack),
            (3, BusSignal::Stop),
        ];

        for (acks, signal) in table {
            let mut engine = engine();
            engine.start(SI7021).unwrap();
            for _ in 0..acks {
                engine.on_signal(BusSignal::Ack).unwrap();
            }
            let state = engine.state();

            assert_eq!(
                engine.on_signal(signal).unwrap_err().reason,
                Reason::Protocol(ProtocolError::UnexpectedBusSignal { state, signal })
            );
        }
    }

    #[test]
    fn complete_only_accepts_stop() {
        for signal in [BusSignal::Ack, BusSignal::Nack, BusSignal::ByteReady(1)] {
            let mut engine = engine();
            run_to_receiving(&mut engine);
            engine.on_signal(BusSignal::ByteReady(1)).unwrap();
            engine.on_signal(BusSignal::ByteReady(2)).unwrap();

            assert!(engine.on_signal(signal).is_err());
        }
    }

    #[test]
    fn signals_without_a_transaction_are_rejected() {
        let mut engine = engine();

        assert_eq!(
            engine.on_signal(BusSignal::Ack).unwrap_err().reason,
            Reason::Protocol(ProtocolError::UnexpectedBusSignal {
                state: BusState::Init,
                signal: BusSignal::Ack,
            })
        );
    }

    #[test]
    fn unbounded_retries_by_default() {
        let mut engine = engine();
        engine.start(SI7021).unwrap();
        engine.on_signal(BusSignal::Ack).unwrap();
        engine.on_signal(BusSignal::Ack).unwrap();

        for _ in 0..1_000 {
            assert!(matches!(
                engine.on_signal(BusSignal::Nack),
                Ok(BusAction::RetryRead { .. })
            ));
        }
    }

    #[test]
    fn bounded_retries_give_up() {
        let mut engine = BusEngine::new(BusConfig {
            max_address_retries: Some(2),
            ..BusConfig::default()
        });
        engine.start(SI7021).unwrap();
        engine.on_signal(BusSignal::Ack).unwrap();
        engine.on_signal(BusSignal::Ack).unwrap();

        assert!(engine.on_signal(BusSignal::Nack).is_ok());
        assert!(engine.on_signal(BusSignal::Nack).is_ok());
        assert_eq!(
            engine.on_signal(BusSignal::Nack).unwrap_err().reason,
            Reason::DeviceNotResponding { attempts: 3 }
        );
    }

    #[test]
    fn single_byte_read_stops_after_the_first_byte() {
        let mut engine = engine();
        engine.start(BusRequest { len: 1, ..SI7021 }).unwrap();
        engine.on_signal(BusSignal::Ack).unwrap();
        engine.on_signal(BusSignal::Ack).unwrap();
        engine.on_signal(BusSignal::Ack).unwrap();

        assert_eq!(
            engine.on_signal(BusSignal::ByteReady(0x7F)),
            Ok(BusAction::NackAndStop)
        );
        engine.on_signal(BusSignal::Stop).unwrap();
        assert_eq!(engine.take_reading().unwrap().value(), 0x7F);
    }
}
