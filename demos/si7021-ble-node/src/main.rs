#![no_main]
#![no_std]

use cortex_m::peripheral::NVIC;

use defmt_rtt as _;
use embassy_stm32::{
    gpio::{Level, Output, Speed},
    i2c, interrupt, pac, usart,
};
use panic_probe as _;
use stm32_lowpower_node::{
    app::{App, NodeLink, NodeQueue},
    config::{AppConfig, BusConfig, LinkConfig, SensorConfig},
    fatal, handle_bus_interrupt, handle_link_interrupt,
    si7021::Si7021,
    stm32::{CortexSleep, I2c1, Lptim1, Lpuart1},
    BusMaster, LinkDriver, OutboundQueue, PeriodicTimer, Scheduler, SleepArbiter,
};

/// LPTIM1 ticks between two measurements.
const MEASUREMENT_PERIOD: u16 = 0xFFFF;

static SCHEDULER: Scheduler = Scheduler::new();
static SLEEP: SleepArbiter = SleepArbiter::new();

static BUS: BusMaster<'static, I2c1> =
    BusMaster::new(I2c1::new(), BusConfig::STANDARD, &SCHEDULER, &SLEEP);
static LINK: NodeLink<'static, Lpuart1> =
    LinkDriver::new(Lpuart1::new(), LinkConfig::HM18, &SCHEDULER, &SLEEP);
static QUEUE: NodeQueue = OutboundQueue::new();
static TIMER: PeriodicTimer<'static, Lptim1> =
    PeriodicTimer::new(Lptim1::new(MEASUREMENT_PERIOD), &SCHEDULER, &SLEEP);

#[interrupt]
#[allow(non_snake_case)]
fn I2C1() {
    if let Err(err) = handle_bus_interrupt(&BUS) {
        defmt::error!("Bus: {}", BUS.dump_state());
        fatal(err);
    }
}

#[interrupt]
#[allow(non_snake_case)]
fn LPUART1() {
    if let Err(err) = handle_link_interrupt(&LINK) {
        defmt::error!("Link: {}", LINK.dump_state());
        fatal(err);
    }
}

#[interrupt]
#[allow(non_snake_case)]
fn LPTIM1() {
    TIMER.on_interrupt();
}

#[cortex_m_rt::entry]
fn main() -> ! {
    defmt::info!("Start!");

    let p = embassy_stm32::init(Default::default());
    let cp = cortex_m::Peripherals::take().expect("Core peripherals already taken");

    // Pin muxing, kernel clocks and bit timing come from the blocking drivers; after that the
    // registers belong to the interrupt-driven bindings.
    let bus = i2c::I2c::new_blocking(p.I2C1, p.PA9, p.PA10, Default::default());
    core::mem::forget(bus);

    let mut uart_config = usart::Config::default();
    uart_config.baudrate = LinkConfig::HM18.baudrate;
    let uart = usart::Uart::new_blocking(p.LPUART1, p.PA3, p.PA2, uart_config)
        .expect("Invalid LPUART configuration");
    core::mem::forget(uart);

    // LD3 on the Nucleo-L031K6.
    let led = Output::new(p.PB3, Level::Low, Speed::Low);

    pac::RCC.apb1enr().modify(|w| w.set_lptim1en(true));
    BUS.peripheral(|bus| bus.init());

    unsafe {
        NVIC::unmask(interrupt::I2C1);
        NVIC::unmask(interrupt::LPUART1);
        NVIC::unmask(interrupt::LPTIM1);
    }

    let mut app = App::new(
        &SCHEDULER,
        &SLEEP,
        Si7021::new(&BUS, SensorConfig::SI7021_TEMPERATURE),
        &LINK,
        &QUEUE,
        &TIMER,
        led,
        AppConfig::DEFAULT,
    );
    let mut control = CortexSleep::new(cp.SCB);

    app.open();

    loop {
        match app.poll(&mut control) {
            Ok(poll) => defmt::trace!("{}", poll),
            Err(err) => fatal(err),
        }
    }
}
