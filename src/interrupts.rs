use core::ops::BitOr;

use super::{
    bus_master::BusMaster, framing::RxSignal, framing::TxSignal, link::LinkDriver, BusSignal,
    Error,
};

/// Register-level operations of a two-wire bus master.
pub trait BusPeripheral {
    /// No transfer in progress and the bus is free.
    fn is_idle(&self) -> bool;

    /// Generates a start condition followed by the write address.
    fn start_write(&mut self, address: u8);

    fn write_byte(&mut self, byte: u8);

    /// Generates a (repeated) start condition followed by the read address.
    fn start_read(&mut self, address: u8, len: u8);

    fn read_byte(&mut self) -> u8;

    fn ack(&mut self);

    fn nack_and_stop(&mut self);

    /// Returns the enabled interrupt flags that fired and acknowledges them.
    fn take_flags(&mut self) -> BusFlags;
}

/// Which transmit interrupt source is listened to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxInterrupt {
    Off,
    /// Holding register empty. Enabling it discards a stale transmission-complete flag.
    BufferEmpty,
    /// Shift register empty: the last byte has physically left.
    Complete,
}

/// Register-level operations of a marker-framed serial port.
///
/// The peripheral detects the two marker bytes itself. A start marker is reported both as
/// [`LinkFlags::START_MARKER`] and as the received byte; a stop marker is reported only as
/// [`LinkFlags::STOP_MARKER`].
pub trait LinkPeripheral {
    fn configure_markers(&mut self, start: u8, stop: u8);

    /// Nothing left in the holding or shift register.
    fn is_tx_idle(&self) -> bool;

    fn write_byte(&mut self, byte: u8);

    fn read_byte(&mut self) -> u8;

    fn set_tx_interrupt(&mut self, source: TxInterrupt);

    /// Enables the start-marker interrupt.
    fn listen_start(&mut self, enable: bool);

    /// Enables the byte-available and stop-marker interrupts.
    fn listen_frame(&mut self, enable: bool);

    /// Discards incoming bytes until the next start marker.
    fn block_rx(&mut self);

    /// Returns the enabled interrupt flags that fired and acknowledges them.
    fn take_flags(&mut self) -> LinkFlags;
}

macro_rules! flag_set {
    ($name:ident { $($flag:ident = $bit:expr),* $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub struct $name(u8);

        impl $name {
            pub const NONE: Self = Self(0);
            $(pub const $flag: Self = Self(1 << $bit);)*

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

flag_set!(BusFlags {
    ACK = 0,
    NACK = 1,
    RX_DATA = 2,
    STOP = 3,
});

flag_set!(LinkFlags {
    TX_EMPTY = 0,
    TX_COMPLETE = 1,
    START_MARKER = 2,
    RX_DATA = 3,
    STOP_MARKER = 4,
});

/// Bus interrupt body. Flags are serviced in the order ACK, NACK, RX data, STOP.
pub fn handle_bus_interrupt<P: BusPeripheral>(bus: &BusMaster<'_, P>) -> Result<(), Error> {
    let flags = bus.peripheral(|p| p.take_flags());

    if flags.contains(BusFlags::ACK) {
        bus.on_signal(BusSignal::Ack)?;
    }

    if flags.contains(BusFlags::NACK) {
        bus.on_signal(BusSignal::Nack)?;
    }

    if flags.contains(BusFlags::RX_DATA) {
        let byte = bus.peripheral(|p| p.read_byte());
        bus.on_signal(BusSignal::ByteReady(byte))?;
    }

    if flags.contains(BusFlags::STOP) {
        bus.on_signal(BusSignal::Stop)?;
    }

    Ok(())
}

/// Link interrupt body. Flags are serviced in the order TX empty, TX complete, start marker,
/// RX data, stop marker.
pub fn handle_link_interrupt<P: LinkPeripheral, const TXBUFSIZE: usize, const RXBUFSIZE: usize>(
    link: &LinkDriver<'_, P, TXBUFSIZE, RXBUFSIZE>,
) -> Result<(), Error> {
    let flags = link.peripheral(|p| p.take_flags());

    if flags.contains(LinkFlags::TX_EMPTY) {
        link.on_tx_signal(TxSignal::BufferEmpty)?;
    }

    if flags.contains(LinkFlags::TX_COMPLETE) {
        link.on_tx_signal(TxSignal::Complete)?;
    }

    if flags.contains(LinkFlags::START_MARKER) {
        link.on_rx_signal(RxSignal::StartMarker)?;
    }

    if flags.contains(LinkFlags::RX_DATA) {
        let byte = link.peripheral(|p| p.read_byte());
        link.on_rx_signal(RxSignal::Byte(byte))?;
    }

    if flags.contains(LinkFlags::STOP_MARKER) {
        link.on_rx_signal(RxSignal::StopMarker)?;
    }

    Ok(())
}
