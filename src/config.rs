//! Static configuration of the node.

use crate::scheduler::EventSet;

/// Bytes a single link message may carry in either direction.
pub const LINK_BUFFER_SIZE: usize = 80;

/// Capacity of the outbound packet queue, length prefixes included.
pub const QUEUE_CAPACITY: usize = 64;

pub const START_MARKER: u8 = b'#';
pub const STOP_MARKER: u8 = b'?';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    /// Consecutive "not ready" NACKs tolerated during read addressing. `None` retries forever.
    pub max_address_retries: Option<u32>,
    pub done_event: EventSet,
}

impl BusConfig {
    pub const STANDARD: Self = Self {
        max_address_retries: None,
        done_event: EventSet::SENSOR_READ,
    };
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::STANDARD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkConfig {
    pub baudrate: u32,
    pub start_marker: u8,
    pub stop_marker: u8,
    pub tx_done_event: EventSet,
    pub rx_done_event: EventSet,
}

impl LinkConfig {
    /// HM-18 BLE module defaults: 9600 8N1.
    pub const HM18: Self = Self {
        baudrate: 9600,
        start_marker: START_MARKER,
        stop_marker: STOP_MARKER,
        tx_done_event: EventSet::LINK_TX_DONE,
        rx_done_event: EventSet::LINK_RX_DONE,
    };
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::HM18
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorConfig {
    pub address: u8,
    pub command: u8,
    pub len: usize,
}

impl SensorConfig {
    /// Temperature measurement, no hold master mode.
    pub const SI7021_TEMPERATURE: Self = Self {
        address: 0x40,
        command: 0xF3,
        len: 2,
    };
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self::SI7021_TEMPERATURE
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AppConfig {
    /// Lines written to the link once after boot.
    pub greeting: &'static [&'static str],
    /// The indicator is lit for readings at or above this, in degrees Fahrenheit.
    pub alert_fahrenheit: f32,
}

impl AppConfig {
    pub const DEFAULT: Self = Self {
        greeting: &["\nHello World!", "\nLow power sensor node"],
        alert_fahrenheit: 80.0,
    };
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
