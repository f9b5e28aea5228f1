//! Power-mode arbitration.
//!
//! Every asynchronous operation that needs its peripheral clocked blocks the power level at
//! which that clock stops, and unblocks it when the operation's terminal event fires. The
//! dispatch loop sleeps no deeper than the shallowest blocked level allows.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::{Error, Reason};

/// Processor power levels, shallowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PowerMode {
    /// Running.
    Em0,
    /// Sleep: core halted, high-frequency peripherals clocked.
    Em1,
    /// Deep sleep: only low-frequency peripherals and the bus interface clocked.
    Em2,
    /// Stop: only asynchronous and ultra-low-frequency peripherals alive.
    Em3,
    /// Shutdown, left through reset only.
    Em4,
}

impl PowerMode {
    pub const COUNT: usize = 5;

    pub const ALL: [Self; Self::COUNT] = [Self::Em0, Self::Em1, Self::Em2, Self::Em3, Self::Em4];

    pub const DEEPEST: Self = Self::Em4;

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn shallower(self) -> Option<Self> {
        match self {
            Self::Em0 => None,
            Self::Em1 => Some(Self::Em0),
            Self::Em2 => Some(Self::Em1),
            Self::Em3 => Some(Self::Em2),
            Self::Em4 => Some(Self::Em3),
        }
    }
}

/// Puts the processor into a power mode until the next interrupt.
pub trait SleepControl {
    fn enter(&mut self, mode: PowerMode);
}

pub struct SleepArbiter {
    blocks: Mutex<RefCell<[u32; PowerMode::COUNT]>>,
}

impl SleepArbiter {
    pub const fn new() -> Self {
        Self {
            blocks: Mutex::new(RefCell::new([0; PowerMode::COUNT])),
        }
    }

    /// Clears every block.
    pub fn open(&self) {
        critical_section::with(|cs| *self.blocks.borrow_ref_mut(cs) = [0; PowerMode::COUNT]);
    }

    /// Forbids `mode` and every deeper mode until the matching [`unblock`](Self::unblock).
    pub fn block(&self, mode: PowerMode) {
        critical_section::with(|cs| {
            self.blocks.borrow_ref_mut(cs)[mode.index()] += 1;
        });
        trace!("Blocked {}", mode);
    }

    pub fn unblock(&self, mode: PowerMode) -> Result<(), Error> {
        critical_section::with(|cs| {
            let mut blocks = self.blocks.borrow_ref_mut(cs);
            let count = &mut blocks[mode.index()];

            if *count == 0 {
                return Err(Error::from(Reason::BlockUnderflow(mode)));
            }

            *count -= 1;
            Ok(())
        })?;

        trace!("Unblocked {}", mode);
        Ok(())
    }

    pub fn count(&self, mode: PowerMode) -> u32 {
        critical_section::with(|cs| self.blocks.borrow_ref(cs)[mode.index()])
    }

    /// The shallowest blocked mode, or [`PowerMode::DEEPEST`] when nothing is blocked.
    pub fn deepest_permitted(&self) -> PowerMode {
        critical_section::with(|cs| {
            let blocks = self.blocks.borrow_ref(cs);

            PowerMode::ALL
                .into_iter()
                .find(|mode| blocks[mode.index()] > 0)
                .unwrap_or(PowerMode::DEEPEST)
        })
    }

    /// The mode the processor may actually enter while idle.
    ///
    /// A block on a mode forbids that mode, so the processor stops one level shallower.
    /// `None` means the core has to keep running. Shutdown is never entered from here.
    pub fn sleep_target(&self) -> Option<PowerMode> {
        match self.deepest_permitted() {
            PowerMode::Em0 | PowerMode::Em1 => None,
            PowerMode::Em2 => Some(PowerMode::Em1),
            PowerMode::Em3 => Some(PowerMode::Em2),
            PowerMode::Em4 => Some(PowerMode::Em3),
        }
    }

    /// Sleeps as deep as currently permitted and returns the mode entered.
    pub fn enter_sleep<C: SleepControl>(&self, control: &mut C) -> Option<PowerMode> {
        let target = self.sleep_target();

        if let Some(mode) = target {
            control.enter(mode);
        }

        target
    }
}

impl Default for SleepArbiter {
    fn default() -> Self {
        Self::new()
    }
}
