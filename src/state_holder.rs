use core::cell::{Ref, RefCell};

use atomic::{Atomic, Ordering};
use bytemuck::NoUninit;
use critical_section::{CriticalSection, Mutex};
use heapless::Deque;

pub const STATES_HISTORY_SIZE: usize = 5;

/// Snapshot of a state machine: the last transitions, oldest first, and the current state.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StateDump<S> {
    pub state_history: [S; STATES_HISTORY_SIZE],
    pub current_state: S,
}

pub struct StateHolder<S: NoUninit, const HISTORY_SIZE: usize> {
    history: Mutex<RefCell<Deque<S, HISTORY_SIZE>>>,
    state: Atomic<S>,
}

impl<S: NoUninit + PartialEq, const HISTORY_SIZE: usize> StateHolder<S, HISTORY_SIZE> {
    pub const fn new(initial: S) -> Self {
        Self {
            history: Mutex::new(RefCell::new(Deque::new())),
            state: Atomic::new(initial),
        }
    }

    pub fn set_state(&self, state: S) {
        if self.get_state() == state {
            return;
        }

        self.add_state_in_history(state);
        self.state.store(state, Ordering::SeqCst);
    }

    pub fn get_state(&self) -> S {
        self.state.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn get_history<'cs>(
        &'cs self,
        cs: CriticalSection<'cs>,
    ) -> Ref<'cs, Deque<S, HISTORY_SIZE>> {
        self.history.borrow_ref(cs)
    }

    fn add_state_in_history(&self, state: S) {
        critical_section::with(|cs| {
            let mut h = self.history.borrow_ref_mut(cs);
            if h.is_full() {
                h.pop_front();
            }
            // Room was made above.
            let _ = h.push_back(state);
        });
    }
}

impl<S: NoUninit + PartialEq> StateHolder<S, STATES_HISTORY_SIZE> {
    /// History is padded at the front with `fill` when fewer transitions were recorded.
    #[cfg(feature = "dump")]
    pub fn dump(&self, fill: S) -> StateDump<S> {
        let mut states = [fill; STATES_HISTORY_SIZE];

        critical_section::with(|cs| {
            let d = self.get_history(cs);
            let n = d.len();
            let (a, b) = d.as_slices();
            let s = STATES_HISTORY_SIZE - n;

            states[s..s + a.len()].copy_from_slice(a);
            states[s + a.len()..].copy_from_slice(b);
        });

        StateDump {
            state_history: states,
            current_state: self.get_state(),
        }
    }
}
