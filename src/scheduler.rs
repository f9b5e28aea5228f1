//! Pending-event set shared between interrupt handlers and the dispatch loop.
//!
//! Events coalesce: posting the same event twice before it is serviced results in a single
//! service cycle.

use core::cell::Cell;
use core::ops::{BitOr, BitOrAssign};

use critical_section::Mutex;

/// A set of deferred work items, one bit per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventSet(u32);

impl EventSet {
    pub const EMPTY: Self = Self(0);

    pub const TIMER_UNDERFLOW: Self = Self(1 << 0);
    pub const SENSOR_READ: Self = Self(1 << 3);
    pub const LINK_TX_DONE: Self = Self(1 << 4);
    pub const LINK_RX_DONE: Self = Self(1 << 5);
    pub const BOOT: Self = Self(1 << 6);

    /// Order in which the dispatch loop services pending events.
    pub const SERVICE_ORDER: [Self; 5] = [
        Self::TIMER_UNDERFLOW,
        Self::SENSOR_READ,
        Self::LINK_RX_DONE,
        Self::BOOT,
        Self::LINK_TX_DONE,
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for EventSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for EventSet {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

pub struct Scheduler {
    pending: Mutex<Cell<EventSet>>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(EventSet::EMPTY)),
        }
    }

    /// Drops every pending event.
    pub fn open(&self) {
        critical_section::with(|cs| self.pending.borrow(cs).set(EventSet::EMPTY));
    }

    pub fn add(&self, event: EventSet) {
        critical_section::with(|cs| {
            let pending = self.pending.borrow(cs);
            pending.set(pending.get().union(event));
        });
        trace!("Scheduled: {}", event);
    }

    /// Removing an event that is not pending is a no-op.
    pub fn remove(&self, event: EventSet) {
        critical_section::with(|cs| {
            let pending = self.pending.borrow(cs);
            pending.set(pending.get().difference(event));
        });
    }

    /// Removes `event` and reports whether any of it was pending.
    pub fn take(&self, event: EventSet) -> bool {
        critical_section::with(|cs| {
            let pending = self.pending.borrow(cs);
            let was = pending.get();
            pending.set(was.difference(event));
            was.intersects(event)
        })
    }

    pub fn peek(&self) -> EventSet {
        critical_section::with(|cs| self.pending.borrow(cs).get())
    }

    pub fn is_pending(&self, event: EventSet) -> bool {
        self.peek().intersects(event)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
