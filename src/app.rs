//! Foreground dispatch of the sensor node.
//!
//! Interrupts only post events; everything else happens here, one handler per event, in
//! [`EventSet::SERVICE_ORDER`].

use core::fmt::Write as _;

use heapless::String;

use crate::{
    config::{AppConfig, LINK_BUFFER_SIZE, QUEUE_CAPACITY},
    interrupts::{BusPeripheral, LinkPeripheral},
    link::LinkDriver,
    queue::OutboundQueue,
    scheduler::{EventSet, Scheduler},
    si7021::{Si7021, Temperature},
    sleep::{PowerMode, SleepArbiter, SleepControl},
    timer::{PeriodicTimer, TimerPeripheral},
    Error, Reason,
};

const LINE_CAPACITY: usize = 32;

/// Unit temperatures are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Unit {
    #[default]
    Fahrenheit,
    Celsius,
}

impl Unit {
    /// Parses a unit command received over the link.
    pub fn from_command(message: &[u8]) -> Option<Self> {
        match message {
            b"F" => Some(Self::Fahrenheit),
            b"C" => Some(Self::Celsius),
            _ => None,
        }
    }

    fn symbol(self) -> char {
        match self {
            Self::Fahrenheit => 'F',
            Self::Celsius => 'C',
        }
    }

    fn convert(self, temperature: Temperature) -> f32 {
        match self {
            Self::Fahrenheit => temperature.fahrenheit(),
            Self::Celsius => temperature.celsius(),
        }
    }
}

/// What one [`App::poll`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Poll {
    Serviced(EventSet),
    /// Nothing was pending. Carries the mode slept in, `None` if the core had to stay awake.
    Slept(Option<PowerMode>),
}

/// Output driven from each measurement, on at or above [`AppConfig::alert_fahrenheit`].
pub trait Indicator {
    fn set(&mut self, on: bool);
}

pub type NodeLink<'a, L> = LinkDriver<'a, L, LINK_BUFFER_SIZE, LINK_BUFFER_SIZE>;
pub type NodeQueue = OutboundQueue<QUEUE_CAPACITY>;

pub struct App<'d, 'a, B, L, T, I>
where
    B: BusPeripheral,
    L: LinkPeripheral,
    T: TimerPeripheral,
    I: Indicator,
{
    scheduler: &'a Scheduler,
    sleep: &'a SleepArbiter,
    sensor: Si7021<'d, 'a, B>,
    link: &'d NodeLink<'a, L>,
    queue: &'d NodeQueue,
    timer: &'d PeriodicTimer<'a, T>,
    indicator: I,
    config: AppConfig,
    unit: Unit,
    last: Option<Temperature>,
}

impl<'d, 'a, B, L, T, I> App<'d, 'a, B, L, T, I>
where
    B: BusPeripheral,
    L: LinkPeripheral,
    T: TimerPeripheral,
    I: Indicator,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: &'a Scheduler,
        sleep: &'a SleepArbiter,
        sensor: Si7021<'d, 'a, B>,
        link: &'d NodeLink<'a, L>,
        queue: &'d NodeQueue,
        timer: &'d PeriodicTimer<'a, T>,
        indicator: I,
        config: AppConfig,
    ) -> Self {
        Self {
            scheduler,
            sleep,
            sensor,
            link,
            queue,
            timer,
            indicator,
            config,
            unit: Unit::default(),
            last: None,
        }
    }

    /// Opens the link and schedules the boot event.
    pub fn open(&self) {
        self.link.open();
        self.scheduler.add(EventSet::BOOT);
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn last_temperature(&self) -> Option<Temperature> {
        self.last
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    /// Services the most urgent pending event, or sleeps if there is none.
    ///
    /// The emptiness check and the sleep entry share one critical section, so an event posted
    /// in between wakes the core instead of being missed.
    pub fn poll<C: SleepControl>(&mut self, control: &mut C) -> Result<Poll, Error> {
        let slept = critical_section::with(|_| {
            if self.scheduler.peek().is_empty() {
                Some(self.sleep.enter_sleep(control))
            } else {
                None
            }
        });

        if let Some(mode) = slept {
            return Ok(Poll::Slept(mode));
        }

        let pending = self.scheduler.peek();

        for event in EventSet::SERVICE_ORDER {
            if pending.contains(event) {
                self.service(event)?;
                return Ok(Poll::Serviced(event));
            }
        }

        // Bits outside the service order have no handler.
        warn!("Unhandled events: {=u32:#x}", pending.bits());
        self.scheduler.remove(pending);
        Ok(Poll::Serviced(pending))
    }

    /// Runs the handler of `event` and clears its bit. The event has to be pending.
    pub fn service(&mut self, event: EventSet) -> Result<(), Error> {
        if !self.scheduler.take(event) {
            return Err(Reason::EventNotPending(event).into());
        }

        match event {
            EventSet::TIMER_UNDERFLOW => self.sensor.read(),
            EventSet::SENSOR_READ => self.on_sensor_read(),
            EventSet::LINK_RX_DONE => self.on_link_rx_done(),
            EventSet::BOOT => self.on_boot(),
            EventSet::LINK_TX_DONE => self.queue.pop(self.link, false).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn on_sensor_read(&mut self) -> Result<(), Error> {
        let Some(temperature) = self.sensor.measurement() else {
            warn!("Read event without a measurement");
            return Ok(());
        };
        self.last = Some(temperature);
        self.indicator
            .set(temperature.fahrenheit() >= self.config.alert_fahrenheit);

        let mut line: String<LINE_CAPACITY> = String::new();
        write!(
            line,
            "\nTemp = {:4.1} {}",
            self.unit.convert(temperature),
            self.unit.symbol()
        )
        .map_err(|_| Reason::PacketTooLong(LINE_CAPACITY))?;

        self.queue.write(self.link, line.as_bytes())?;
        Ok(())
    }

    fn on_link_rx_done(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; LINK_BUFFER_SIZE];
        let len = self
            .link
            .message(&mut buf)
            .map_err(|len| Reason::MessageTooLong {
                len,
                capacity: LINK_BUFFER_SIZE,
            })?;

        match Unit::from_command(&buf[..len]) {
            Some(unit) => {
                info!("Unit set to {}", unit);
                self.unit = unit;
            }
            None => warn!("Unknown command: {=[u8]}", &buf[..len]),
        }

        Ok(())
    }

    fn on_boot(&mut self) -> Result<(), Error> {
        self.timer.start(true)?;

        for line in self.config.greeting {
            self.queue.write(self.link, line.as_bytes())?;
        }

        Ok(())
    }
}
