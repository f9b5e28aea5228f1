//! Power bookkeeping of the periodic wake-up timer.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};

use crate::{
    scheduler::{EventSet, Scheduler},
    sleep::{PowerMode, SleepArbiter},
    Error,
};

/// The low-energy timer keeps counting in every mode shallower than this one.
pub const TIMER_POWER_FLOOR: PowerMode = PowerMode::Em4;

pub trait TimerPeripheral {
    fn is_running(&self) -> bool;

    fn set_enabled(&mut self, enable: bool);

    /// Reports and acknowledges a pending underflow.
    fn take_underflow(&mut self) -> bool;
}

pub struct PeriodicTimer<'a, P: TimerPeripheral> {
    peripheral: Mutex<CriticalSectionRawMutex, RefCell<P>>,
    scheduler: &'a Scheduler,
    sleep: &'a SleepArbiter,
}

impl<'a, P: TimerPeripheral> PeriodicTimer<'a, P> {
    pub const fn new(peripheral: P, scheduler: &'a Scheduler, sleep: &'a SleepArbiter) -> Self {
        Self {
            peripheral: Mutex::new(RefCell::new(peripheral)),
            scheduler,
            sleep,
        }
    }

    /// Starts or stops the timer. Asking for the current state does nothing.
    pub fn start(&self, enable: bool) -> Result<(), Error> {
        self.peripheral.lock(|cell| {
            let mut p = cell.borrow_mut();

            match (enable, p.is_running()) {
                (true, false) => {
                    self.sleep.block(TIMER_POWER_FLOOR);
                    p.set_enabled(true);
                }
                (false, true) => {
                    p.set_enabled(false);
                    self.sleep.unblock(TIMER_POWER_FLOOR)?;
                }
                _ => {}
            }

            Ok::<_, Error>(())
        })
    }

    pub fn is_running(&self) -> bool {
        self.peripheral.lock(|cell| cell.borrow().is_running())
    }

    /// Interrupt body: posts the underflow event.
    pub fn on_interrupt(&self) {
        if self.peripheral.lock(|cell| cell.borrow_mut().take_underflow()) {
            self.scheduler.add(EventSet::TIMER_UNDERFLOW);
        }
    }

    /// Runs `f` with exclusive access to the peripheral.
    pub fn peripheral<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        self.peripheral.lock(|cell| f(&mut *cell.borrow_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn redundant_starts_do_not_stack_blocks() {
        let scheduler = Scheduler::new();
        let sleep = SleepArbiter::new();
        let timer = PeriodicTimer::new(FakeTimer::default(), &scheduler, &sleep);

        timer.start(true).unwrap();
        timer.start(true).unwrap();
        assert!(timer.is_running());
        assert_eq!(sleep.count(PowerMode::Em4), 1);

        timer.start(false).unwrap();
        timer.start(false).unwrap();
        assert!(!timer.is_running());
        assert_eq!(sleep.count(PowerMode::Em4), 0);
    }

    #[test]
    fn underflow_posts_the_event() {
        let scheduler = Scheduler::new();
        let sleep = SleepArbiter::new();
        let timer = PeriodicTimer::new(FakeTimer::default(), &scheduler, &sleep);

        timer.on_interrupt();
        assert!(scheduler.peek().is_empty());

        timer.peripheral(|p| p.underflow = true);
        timer.on_interrupt();
        assert_eq!(scheduler.peek(), EventSet::TIMER_UNDERFLOW);
    }
}
