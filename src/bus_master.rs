use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};

#[cfg(feature = "dump")]
use crate::state_holder::StateDump;
use crate::{
    bus::{BusAction, BusEngine, BusRequest, BusSignal, Reading},
    config::BusConfig,
    interrupts::BusPeripheral,
    scheduler::{EventSet, Scheduler},
    sleep::{PowerMode, SleepArbiter},
    state_holder::{StateHolder, STATES_HISTORY_SIZE},
    BusState, Error, Reason,
};

/// The bus peripheral stops being clocked below this mode.
pub const BUS_POWER_FLOOR: PowerMode = PowerMode::Em2;

struct Inner<P> {
    engine: BusEngine,
    peripheral: P,
}

/// Interrupt-driven owner of the bus peripheral.
///
/// Holds a [`BUS_POWER_FLOOR`] block for the lifetime of every transaction and posts the
/// configured completion event once the stop condition has been seen.
pub struct BusMaster<'a, P: BusPeripheral> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner<P>>>,
    state_holder: StateHolder<BusState, STATES_HISTORY_SIZE>,
    busy: AtomicBool,
    scheduler: &'a Scheduler,
    sleep: &'a SleepArbiter,
    done_event: EventSet,
}

impl<'a, P: BusPeripheral> BusMaster<'a, P> {
    pub const fn new(
        peripheral: P,
        config: BusConfig,
        scheduler: &'a Scheduler,
        sleep: &'a SleepArbiter,
    ) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                engine: BusEngine::new(config),
                peripheral,
            })),
            state_holder: StateHolder::new(BusState::Init),
            busy: AtomicBool::new(false),
            scheduler,
            sleep,
            done_event: config.done_event,
        }
    }

    pub fn start(&self, request: BusRequest) -> Result<(), Error> {
        self.inner.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let inner = &mut *guard;

            if inner.engine.is_active() || !inner.peripheral.is_idle() {
                return Err(Error::from(Reason::BusBusy));
            }

            let action = inner.engine.start(request)?;
            self.sleep.block(BUS_POWER_FLOOR);
            self.busy.store(true, Ordering::SeqCst);
            self.state_holder.set_state(inner.engine.state());
            apply(&mut inner.peripheral, action);
            Ok(())
        })?;

        debug!(
            "Bus read started: addr={=u8:#x} cmd={=u8:#x}",
            request.address,
            request.command
        );
        Ok(())
    }

    pub fn on_signal(&self, signal: BusSignal) -> Result<(), Error> {
        let finished = self.inner.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let inner = &mut *guard;

            let action = inner.engine.on_signal(signal)?;
            self.state_holder.set_state(inner.engine.state());
            apply(&mut inner.peripheral, action);

            Ok::<_, Error>(action == BusAction::Finished)
        })?;

        if finished {
            self.busy.store(false, Ordering::SeqCst);
            self.scheduler.add(self.done_event);
            self.sleep.unblock(BUS_POWER_FLOOR)?;
        }

        Ok(())
    }

    /// A transaction is in flight. Never blocks.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> BusState {
        self.state_holder.get_state()
    }

    pub fn take_reading(&self) -> Option<Reading> {
        self.inner.lock(|cell| cell.borrow_mut().engine.take_reading())
    }

    /// Runs `f` with exclusive access to the peripheral.
    pub fn peripheral<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut().peripheral))
    }

    #[cfg(feature = "dump")]
    pub fn dump_state(&self) -> StateDump<BusState> {
        self.state_holder.dump(BusState::Init)
    }
}

fn apply<P: BusPeripheral>(peripheral: &mut P, action: BusAction) {
    match action {
        BusAction::StartWrite { address } => peripheral.start_write(address),
        BusAction::SendCommand(command) => peripheral.write_byte(command),
        BusAction::StartRead { address, len } | BusAction::RetryRead { address, len } => {
            peripheral.start_read(address, len)
        }
        BusAction::Ack => peripheral.ack(),
        BusAction::NackAndStop => peripheral.nack_and_stop(),
        BusAction::Wait | BusAction::Finished => {}
    }
}

#[cfg(test)]
mod tests {
    use heapless::Vec;

    use super::*;
    use crate::interrupts::{handle_bus_interrupt, BusFlags};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        StartWrite(u8),
        Write(u8),
        StartRead(u8, u8),
        Ack,
        NackAndStop,
    }

    #[derive(Default)]
    struct FakeBus {
        idle: bool,
        ops: Vec<Op, 16>,
        flags: BusFlags,
        data: u8,
    }

    impl BusPeripheral for FakeBus {
        fn is_idle(&self) -> bool {
            self.idle
        }

        fn start_write(&mut self, address: u8) {
            self.ops.push(Op::StartWrite(address)).unwrap();
        }

        fn write_byte(&mut self, byte: u8) {
            self.ops.push(Op::Write(byte)).unwrap();
        }

        fn start_read(&mut self, address: u8, len: u8) {
            self.ops.push(Op::StartRead(address, len)).unwrap();
        }

        fn read_byte(&mut self) -> u8 {
            self.data
        }

        fn ack(&mut self) {
            self.ops.push(Op::Ack).unwrap();
        }

        fn nack_and_stop(&mut self) {
            self.ops.push(Op::NackAndStop).unwrap();
        }

        fn take_flags(&mut self) -> BusFlags {
            core::mem::take(&mut self.flags)
        }
    }

    const REQUEST: BusRequest = BusRequest {
        address: 0x40,
        command: 0xF3,
        len: 2,
    };

    fn raise(bus: &BusMaster<'_, FakeBus>, flags: BusFlags, data: u8) {
        bus.peripheral(|p| {
            p.flags = flags;
            p.data = data;
        });
        handle_bus_interrupt(bus).unwrap();
    }

    #[test]
    fn transaction_holds_the_power_block_until_stop() {
        let scheduler = Scheduler::new();
        let sleep = SleepArbiter::new();
        let fake = FakeBus {
            idle: true,
            ..Default::default()
        };
        let bus = BusMaster::new(fake, BusConfig::default(), &scheduler, &sleep);

        bus.start(REQUEST).unwrap();
        assert!(bus.is_busy());
        assert_eq!(sleep.deepest_permitted(), PowerMode::Em2);

        raise(&bus, BusFlags::ACK, 0);
        raise(&bus, BusFlags::ACK, 0);
        raise(&bus, BusFlags::NACK, 0);
        raise(&bus, BusFlags::ACK, 0);
        raise(&bus, BusFlags::RX_DATA, 0x66);
        raise(&bus, BusFlags::RX_DATA, 0x4C);
        assert_eq!(bus.state(), BusState::Complete);
        assert!(scheduler.peek().is_empty());

        raise(&bus, BusFlags::STOP, 0);

        assert!(!bus.is_busy());
        assert_eq!(bus.state(), BusState::Init);
        assert_eq!(sleep.count(PowerMode::Em2), 0);
        assert_eq!(scheduler.peek(), EventSet::SENSOR_READ);
        assert_eq!(bus.take_reading().unwrap().value(), 0x664C);

        bus.peripheral(|p| {
            assert_eq!(
                p.ops.as_slice(),
                &[
                    Op::StartWrite(0x40),
                    Op::Write(0xF3),
                    Op::StartRead(0x40, 2),
                    Op::StartRead(0x40, 2),
                    Op::Ack,
                    Op::NackAndStop,
                ]
            )
        });
    }

    #[test]
    fn busy_peripheral_rejects_start() {
        let scheduler = Scheduler::new();
        let sleep = SleepArbiter::new();
        let bus = BusMaster::new(FakeBus::default(), BusConfig::default(), &scheduler, &sleep);

        assert_eq!(bus.start(REQUEST).unwrap_err().reason, Reason::BusBusy);
        assert_eq!(sleep.count(PowerMode::Em2), 0);
    }

    #[test]
    fn second_start_is_rejected_without_a_second_block() {
        let scheduler = Scheduler::new();
        let sleep = SleepArbiter::new();
        let fake = FakeBus {
            idle: true,
            ..Default::default()
        };
        let bus = BusMaster::new(fake, BusConfig::default(), &scheduler, &sleep);

        bus.start(REQUEST).unwrap();

        assert_eq!(bus.start(REQUEST).unwrap_err().reason, Reason::BusBusy);
        assert_eq!(sleep.count(PowerMode::Em2), 1);
    }

    #[test]
    fn flags_in_one_interrupt_are_serviced_in_order() {
        let scheduler = Scheduler::new();
        let sleep = SleepArbiter::new();
        let fake = FakeBus {
            idle: true,
            ..Default::default()
        };
        let bus = BusMaster::new(fake, BusConfig::default(), &scheduler, &sleep);
        bus.start(BusRequest { len: 1, ..REQUEST }).unwrap();
        raise(&bus, BusFlags::ACK, 0);
        raise(&bus, BusFlags::ACK, 0);

        // Address ACK, the only byte, and the stop condition all pending at once.
        raise(&bus, BusFlags::ACK | BusFlags::RX_DATA | BusFlags::STOP, 0x21);

        assert_eq!(bus.take_reading().unwrap().as_bytes(), &[0x21]);
        assert!(scheduler.is_pending(EventSet::SENSOR_READ));
    }
}
