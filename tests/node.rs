use heapless::Vec;

use stm32_lowpower_node::{
    app::{App, Indicator, NodeLink, NodeQueue, Poll, Unit},
    config::{AppConfig, BusConfig, LinkConfig, SensorConfig},
    handle_bus_interrupt, handle_link_interrupt,
    si7021::Si7021,
    BusFlags, BusMaster, BusPeripheral, EventSet, LinkDriver, LinkFlags, LinkPeripheral,
    OutboundQueue, PeriodicTimer, PowerMode, Scheduler, SleepArbiter, SleepControl,
    Reason, TimerPeripheral, TxInterrupt, TxState,
};

#[derive(Default)]
struct FakeBus {
    flags: BusFlags,
    data: u8,
}

impl BusPeripheral for FakeBus {
    fn is_idle(&self) -> bool {
        true
    }

    fn start_write(&mut self, _address: u8) {}

    fn write_byte(&mut self, _byte: u8) {}

    fn start_read(&mut self, _address: u8, _len: u8) {}

    fn read_byte(&mut self) -> u8 {
        self.data
    }

    fn ack(&mut self) {}

    fn nack_and_stop(&mut self) {}

    fn take_flags(&mut self) -> BusFlags {
        core::mem::take(&mut self.flags)
    }
}

#[derive(Default)]
struct FakeUart {
    wire: Vec<u8, 256>,
    tx_source: Option<TxInterrupt>,
    flags: LinkFlags,
    rx: u8,
}

impl LinkPeripheral for FakeUart {
    fn configure_markers(&mut self, _start: u8, _stop: u8) {}

    fn is_tx_idle(&self) -> bool {
        true
    }

    fn write_byte(&mut self, byte: u8) {
        self.wire.push(byte).unwrap();
    }

    fn read_byte(&mut self) -> u8 {
        self.rx
    }

    fn set_tx_interrupt(&mut self, source: TxInterrupt) {
        self.tx_source = Some(source);
    }

    fn listen_start(&mut self, _enable: bool) {}

    fn listen_frame(&mut self, _enable: bool) {}

    fn block_rx(&mut self) {}

    fn take_flags(&mut self) -> LinkFlags {
        core::mem::take(&mut self.flags)
    }
}

#[derive(Default)]
struct FakeTimer {
    running: bool,
    underflow: bool,
}

impl TimerPeripheral for FakeTimer {
    fn is_running(&self) -> bool {
        self.running
    }

    fn set_enabled(&mut self, enable: bool) {
        self.running = enable;
    }

    fn take_underflow(&mut self) -> bool {
        core::mem::take(&mut self.underflow)
    }
}

#[derive(Default)]
struct FakeLed {
    on: bool,
}

impl Indicator for FakeLed {
    fn set(&mut self, on: bool) {
        self.on = on;
    }
}

#[derive(Default)]
struct Recorder {
    entered: Vec<PowerMode, 16>,
}

impl SleepControl for Recorder {
    fn enter(&mut self, mode: PowerMode) {
        self.entered.push(mode).unwrap();
    }
}

fn bus_irq(bus: &BusMaster<'_, FakeBus>, flags: BusFlags, data: u8) {
    bus.peripheral(|p| {
        p.flags = flags;
        p.data = data;
    });
    handle_bus_interrupt(bus).unwrap();
}

fn link_irq(link: &NodeLink<'_, FakeUart>, flags: LinkFlags, rx: u8) {
    link.peripheral(|p| {
        p.flags = flags;
        p.rx = rx;
    });
    handle_link_interrupt(link).unwrap();
}

/// Runs transmit interrupts until the current send completes.
fn drain_tx(link: &NodeLink<'_, FakeUart>) {
    while link.tx_state() != TxState::Idle {
        let flags = match link.peripheral(|p| p.tx_source) {
            Some(TxInterrupt::Complete) => LinkFlags::TX_COMPLETE,
            _ => LinkFlags::TX_EMPTY,
        };
        link_irq(link, flags, 0);
    }
}

fn receive(link: &NodeLink<'_, FakeUart>, payload: &[u8]) {
    link_irq(link, LinkFlags::START_MARKER | LinkFlags::RX_DATA, b'#');
    for &byte in payload {
        link_irq(link, LinkFlags::RX_DATA, byte);
    }
    link_irq(link, LinkFlags::STOP_MARKER, 0);
}

fn wire(link: &NodeLink<'_, FakeUart>) -> Vec<u8, 256> {
    link.peripheral(|p| p.wire.clone())
}

#[test]
fn sensor_node_end_to_end() {
    let scheduler = Scheduler::new();
    let sleep = SleepArbiter::new();
    let bus = BusMaster::new(FakeBus::default(), BusConfig::default(), &scheduler, &sleep);
    let link: NodeLink<'_, FakeUart> =
        LinkDriver::new(FakeUart::default(), LinkConfig::default(), &scheduler, &sleep);
    let queue: NodeQueue = OutboundQueue::new();
    let timer = PeriodicTimer::new(FakeTimer::default(), &scheduler, &sleep);
    let sensor = Si7021::new(&bus, SensorConfig::default());
    let mut app = App::new(
        &scheduler,
        &sleep,
        sensor,
        &link,
        &queue,
        &timer,
        FakeLed::default(),
        AppConfig::default(),
    );
    let mut control = Recorder::default();

    app.open();
    assert_eq!(sleep.count(PowerMode::Em3), 1);

    // Boot: timer armed, first greeting line on the wire, second one queued.
    assert_eq!(
        app.poll(&mut control).unwrap(),
        Poll::Serviced(EventSet::BOOT)
    );
    assert!(timer.is_running());
    assert_eq!(sleep.count(PowerMode::Em4), 1);
    assert_eq!(queue.len(), 1);

    drain_tx(&link);
    assert_eq!(
        app.poll(&mut control).unwrap(),
        Poll::Serviced(EventSet::LINK_TX_DONE)
    );
    assert!(queue.is_empty());

    drain_tx(&link);
    assert_eq!(
        app.poll(&mut control).unwrap(),
        Poll::Serviced(EventSet::LINK_TX_DONE)
    );
    assert_eq!(
        wire(&link).as_slice(),
        b"\nHello World!\nLow power sensor node"
    );

    // Idle: link receiver and timer hold Em3 and Em4, so the core stops in Em2.
    assert_eq!(
        app.poll(&mut control).unwrap(),
        Poll::Slept(Some(PowerMode::Em2))
    );
    assert_eq!(control.entered.as_slice(), &[PowerMode::Em2]);

    // Timer fires, a measurement is started and keeps the core above Em2.
    timer.peripheral(|p| p.underflow = true);
    timer.on_interrupt();
    assert_eq!(
        app.poll(&mut control).unwrap(),
        Poll::Serviced(EventSet::TIMER_UNDERFLOW)
    );
    assert!(bus.is_busy());
    assert_eq!(sleep.sleep_target(), Some(PowerMode::Em1));

    bus_irq(&bus, BusFlags::ACK, 0);
    bus_irq(&bus, BusFlags::ACK, 0);
    bus_irq(&bus, BusFlags::NACK, 0);
    bus_irq(&bus, BusFlags::ACK, 0);
    bus_irq(&bus, BusFlags::RX_DATA, 0x66);
    bus_irq(&bus, BusFlags::RX_DATA, 0x4C);
    bus_irq(&bus, BusFlags::STOP, 0);
    assert_eq!(sleep.count(PowerMode::Em2), 0);

    assert_eq!(
        app.poll(&mut control).unwrap(),
        Poll::Serviced(EventSet::SENSOR_READ)
    );
    assert_eq!(app.last_temperature().map(|t| t.raw), Some(0x664C));
    assert!(!app.indicator().on);
    drain_tx(&link);
    app.poll(&mut control).unwrap();
    assert!(wire(&link).ends_with(b"\nTemp = 74.1 F"));

    // Switch to Celsius over the link, then measure again.
    receive(&link, b"C");
    assert_eq!(
        app.poll(&mut control).unwrap(),
        Poll::Serviced(EventSet::LINK_RX_DONE)
    );
    assert_eq!(app.unit(), Unit::Celsius);

    timer.peripheral(|p| p.underflow = true);
    timer.on_interrupt();
    app.poll(&mut control).unwrap();
    for (flags, data) in [
        (BusFlags::ACK, 0),
        (BusFlags::ACK, 0),
        (BusFlags::ACK, 0),
        (BusFlags::RX_DATA, 0x66),
        (BusFlags::RX_DATA | BusFlags::STOP, 0x4C),
    ] {
        bus_irq(&bus, flags, data);
    }
    app.poll(&mut control).unwrap();
    drain_tx(&link);
    app.poll(&mut control).unwrap();
    assert!(wire(&link).ends_with(b"\nTemp = 23.4 C"));
    assert!(!app.indicator().on);

    // 86 F lights the indicator whatever unit is reported.
    timer.peripheral(|p| p.underflow = true);
    timer.on_interrupt();
    app.poll(&mut control).unwrap();
    for (flags, data) in [
        (BusFlags::ACK, 0),
        (BusFlags::ACK, 0),
        (BusFlags::ACK, 0),
        (BusFlags::RX_DATA, 0x70),
        (BusFlags::RX_DATA | BusFlags::STOP, 0x00),
    ] {
        bus_irq(&bus, flags, data);
    }
    app.poll(&mut control).unwrap();
    assert!(app.indicator().on);
    drain_tx(&link);
    app.poll(&mut control).unwrap();
    assert!(wire(&link).ends_with(b"\nTemp = 30.0 C"));

    // Everything released except the receiver and the timer.
    assert_eq!(sleep.count(PowerMode::Em2), 0);
    assert_eq!(sleep.count(PowerMode::Em3), 1);
    assert_eq!(sleep.count(PowerMode::Em4), 1);
    assert!(scheduler.peek().is_empty());
}

#[test]
fn dispatch_follows_the_priority_order() {
    let scheduler = Scheduler::new();
    let sleep = SleepArbiter::new();
    let bus = BusMaster::new(FakeBus::default(), BusConfig::default(), &scheduler, &sleep);
    let link: NodeLink<'_, FakeUart> =
        LinkDriver::new(FakeUart::default(), LinkConfig::default(), &scheduler, &sleep);
    let queue: NodeQueue = OutboundQueue::new();
    let timer = PeriodicTimer::new(FakeTimer::default(), &scheduler, &sleep);
    let mut app = App::new(
        &scheduler,
        &sleep,
        Si7021::new(&bus, SensorConfig::default()),
        &link,
        &queue,
        &timer,
        FakeLed::default(),
        AppConfig {
            greeting: &[],
            ..AppConfig::default()
        },
    );
    let mut control = Recorder::default();

    scheduler.add(EventSet::LINK_TX_DONE | EventSet::BOOT | EventSet::TIMER_UNDERFLOW);

    let mut order: Vec<EventSet, 4> = Vec::new();
    while let Poll::Serviced(event) = app.poll(&mut control).unwrap() {
        order.push(event).unwrap();
    }

    assert_eq!(
        order.as_slice(),
        &[
            EventSet::TIMER_UNDERFLOW,
            EventSet::BOOT,
            EventSet::LINK_TX_DONE
        ]
    );
}

#[test]
fn handler_requires_its_event_to_be_pending() {
    let scheduler = Scheduler::new();
    let sleep = SleepArbiter::new();
    let bus = BusMaster::new(FakeBus::default(), BusConfig::default(), &scheduler, &sleep);
    let link: NodeLink<'_, FakeUart> =
        LinkDriver::new(FakeUart::default(), LinkConfig::default(), &scheduler, &sleep);
    let queue: NodeQueue = OutboundQueue::new();
    let timer = PeriodicTimer::new(FakeTimer::default(), &scheduler, &sleep);
    let mut app = App::new(
        &scheduler,
        &sleep,
        Si7021::new(&bus, SensorConfig::default()),
        &link,
        &queue,
        &timer,
        FakeLed::default(),
        AppConfig::default(),
    );

    assert_eq!(
        app.service(EventSet::TIMER_UNDERFLOW).unwrap_err().reason,
        Reason::EventNotPending(EventSet::TIMER_UNDERFLOW)
    );
    assert!(!bus.is_busy());

    scheduler.add(EventSet::TIMER_UNDERFLOW);
    app.service(EventSet::TIMER_UNDERFLOW).unwrap();
    assert!(bus.is_busy());
    assert!(scheduler.peek().is_empty());
}
