//! Interrupt-driven core for a battery-powered sensor node.
//!
//! The node reads a two-wire (I2C) temperature sensor and talks to a BLE module over a
//! marker-framed low-energy UART. All protocol progress happens in interrupt context; the
//! foreground only drains the [`Scheduler`] and otherwise sleeps as deep as the
//! [`SleepArbiter`] allows.
//!
//! Every state machine is hardware independent: interrupt handlers decode peripheral flags
//! into signals (see [`handle_bus_interrupt`] and [`handle_link_interrupt`]) and the drivers
//! apply the resulting actions through the [`BusPeripheral`] and [`LinkPeripheral`] traits.
//!
//! # Feature flags
//!
//! * `defmt` - derive `defmt::Format` for public types and emit log frames.
//! * `dump` - keep state histories readable through `dump_state()`.
//! * `stm32` - register bindings for STM32L0 peripherals.
#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod app;
mod bus;
mod bus_master;
pub mod config;
mod framing;
mod interrupts;
mod link;
mod queue;
mod receive_buffer;
pub mod scheduler;
mod send_buffer;
pub mod si7021;
pub mod sleep;
mod state_holder;
#[cfg(feature = "stm32")]
pub mod stm32;
pub mod timer;

pub use bus::{BusAction, BusEngine, BusRequest, BusSignal, Reading, MAX_READ_LEN};
pub use bus_master::{BusMaster, BUS_POWER_FLOOR};
pub use framing::{LinkRx, LinkTx, RxAction, RxSignal, TxAction, TxSignal};
pub use interrupts::{
    handle_bus_interrupt, handle_link_interrupt, BusFlags, BusPeripheral, LinkFlags,
    LinkPeripheral, TxInterrupt,
};
#[cfg(feature = "dump")]
pub use link::LinkDump;
pub use link::{LinkDriver, LINK_POWER_FLOOR};
pub use queue::{OutboundQueue, Pop, Transmit, MAX_PACKET_LEN};
pub use scheduler::{EventSet, Scheduler};
pub use sleep::{PowerMode, SleepArbiter, SleepControl};
pub use state_holder::StateDump;
pub use timer::{PeriodicTimer, TimerPeripheral, TIMER_POWER_FLOOR};

/// Progress of the single outstanding bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::NoUninit)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BusState {
    Init,
    CommandSent,
    ReadAddressSent,
    ReceivingData,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::NoUninit)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TxState {
    Idle,
    Transmitting,
    /// Last byte written, waiting for the shift register to empty.
    DrainComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::NoUninit)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RxState {
    Idle,
    FrameOpened,
    Receiving,
    /// Message terminated, receiver not yet re-armed.
    FrameClosed,
}

/// A state/signal combination the transition tables declare impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    UnexpectedBusSignal { state: BusState, signal: BusSignal },
    UnexpectedTxSignal { state: TxState, signal: TxSignal },
    UnexpectedRxSignal { state: RxState, signal: RxSignal },
    NestedStartMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reason {
    Protocol(ProtocolError),
    BusBusy,
    InvalidReadLength(usize),
    DeviceNotResponding { attempts: u32 },
    LinkBusy,
    EmptyMessage,
    MessageTooLong { len: usize, capacity: usize },
    ReceiveBufferFull,
    BlockUnderflow(PowerMode),
    EmptyPacket,
    PacketTooLong(usize),
    QueueFull { needed: usize, free: usize },
    /// A handler was run for an event that was not pending.
    EventNotPending(EventSet),
}

/// Contract violation. The firmware policy is to halt on any of these, see [`fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Error {
    pub reason: Reason,
}

impl From<Reason> for Error {
    fn from(reason: Reason) -> Self {
        Self { reason }
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Self {
            reason: Reason::Protocol(err),
        }
    }
}

/// Logs the violation and halts.
pub fn fatal(err: Error) -> ! {
    error!("Fatal: {}", err);
    panic!("contract violation: {:?}", err.reason)
}
