//! Si7021 temperature sensor on top of [`BusMaster`].

use crate::{
    bus::BusRequest, bus_master::BusMaster, config::SensorConfig, interrupts::BusPeripheral,
    Error,
};

/// A raw temperature code as returned by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Temperature {
    pub raw: u16,
}

impl Temperature {
    pub fn celsius(self) -> f32 {
        f32::from(self.raw) / 372.957 - 46.85
    }

    pub fn fahrenheit(self) -> f32 {
        1.8 * self.celsius() + 32.0
    }
}

pub struct Si7021<'d, 'a, P: BusPeripheral> {
    bus: &'d BusMaster<'a, P>,
    config: SensorConfig,
}

impl<'d, 'a, P: BusPeripheral> Si7021<'d, 'a, P> {
    pub fn new(bus: &'d BusMaster<'a, P>, config: SensorConfig) -> Self {
        Self { bus, config }
    }

    /// Starts a measurement. Completion is signalled through the bus done event.
    pub fn read(&self) -> Result<(), Error> {
        self.bus.start(BusRequest {
            address: self.config.address,
            command: self.config.command,
            len: self.config.len,
        })
    }

    /// The result of the last completed measurement, once.
    pub fn measurement(&self) -> Option<Temperature> {
        let reading = self.bus.take_reading()?;

        Some(Temperature {
            raw: reading.value() as u16,
        })
    }
}
