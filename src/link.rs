use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};

#[cfg(feature = "dump")]
use crate::state_holder::StateDump;
use crate::{
    config::LinkConfig,
    framing::{LinkRx, LinkTx, RxAction, RxSignal, TxAction, TxSignal},
    interrupts::{LinkPeripheral, TxInterrupt},
    queue::Transmit,
    scheduler::Scheduler,
    sleep::{PowerMode, SleepArbiter},
    state_holder::{StateHolder, STATES_HISTORY_SIZE},
    Error, RxState, TxState,
};

/// The serial link stops being clocked below this mode.
pub const LINK_POWER_FLOOR: PowerMode = PowerMode::Em3;

#[cfg(feature = "dump")]
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkDump {
    pub tx: StateDump<TxState>,
    pub rx: StateDump<RxState>,
}

struct Inner<P, const TXBUFSIZE: usize, const RXBUFSIZE: usize> {
    tx: LinkTx<TXBUFSIZE>,
    rx: LinkRx<RXBUFSIZE>,
    open: bool,
    peripheral: P,
}

/// Full-duplex driver for a marker-framed serial port.
///
/// Transmit and receive progress independently. Each send holds a [`LINK_POWER_FLOOR`]
/// block until transmission complete, and an open link holds one more for the receiver.
pub struct LinkDriver<'a, P: LinkPeripheral, const TXBUFSIZE: usize, const RXBUFSIZE: usize> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner<P, TXBUFSIZE, RXBUFSIZE>>>,
    tx_state: StateHolder<TxState, STATES_HISTORY_SIZE>,
    rx_state: StateHolder<RxState, STATES_HISTORY_SIZE>,
    scheduler: &'a Scheduler,
    sleep: &'a SleepArbiter,
    config: LinkConfig,
}

impl<'a, P: LinkPeripheral, const TXBUFSIZE: usize, const RXBUFSIZE: usize>
    LinkDriver<'a, P, TXBUFSIZE, RXBUFSIZE>
{
    pub const fn new(
        peripheral: P,
        config: LinkConfig,
        scheduler: &'a Scheduler,
        sleep: &'a SleepArbiter,
    ) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                tx: LinkTx::new(),
                rx: LinkRx::new(),
                open: false,
                peripheral,
            })),
            tx_state: StateHolder::new(TxState::Idle),
            rx_state: StateHolder::new(RxState::Idle),
            scheduler,
            sleep,
            config,
        }
    }

    /// Starts listening for start markers. Opening twice has no further effect.
    pub fn open(&self) {
        let opened = self.inner.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let inner = &mut *guard;

            if inner.open {
                return false;
            }

            self.sleep.block(LINK_POWER_FLOOR);
            inner.open = true;

            let p = &mut inner.peripheral;
            p.configure_markers(self.config.start_marker, self.config.stop_marker);
            p.set_tx_interrupt(TxInterrupt::Off);
            p.block_rx();
            p.listen_start(true);
            true
        });

        if opened {
            info!("Link open at {=u32} baud", self.config.baudrate);
        }
    }

    /// Stops listening and releases the receiver's power block.
    pub fn close(&self) -> Result<(), Error> {
        let closed = self.inner.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let inner = &mut *guard;

            if !inner.open {
                return false;
            }

            inner.open = false;
            inner.peripheral.listen_start(false);
            inner.peripheral.listen_frame(false);
            true
        });

        if closed {
            self.sleep.unblock(LINK_POWER_FLOOR)?;
        }

        Ok(())
    }

    pub fn send(&self, bytes: &[u8]) -> Result<(), Error> {
        self.inner.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let inner = &mut *guard;

            inner.tx.start(bytes)?;
            self.sleep.block(LINK_POWER_FLOOR);
            self.tx_state.set_state(inner.tx.state());
            inner.peripheral.set_tx_interrupt(TxInterrupt::BufferEmpty);
            Ok::<_, Error>(())
        })?;

        trace!("Link send: {=usize} bytes", bytes.len());
        Ok(())
    }

    /// A send has not completed yet. Never blocks.
    pub fn tx_busy(&self) -> bool {
        self.tx_state.get_state() != TxState::Idle
    }

    /// A frame is being received. Never blocks.
    pub fn rx_busy(&self) -> bool {
        matches!(
            self.rx_state.get_state(),
            RxState::FrameOpened | RxState::Receiving
        )
    }

    pub fn tx_state(&self) -> TxState {
        self.tx_state.get_state()
    }

    pub fn rx_state(&self) -> RxState {
        self.rx_state.get_state()
    }

    pub fn on_tx_signal(&self, signal: TxSignal) -> Result<(), Error> {
        let finished = self.inner.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let inner = &mut *guard;

            let action = inner.tx.on_signal(signal)?;
            self.tx_state.set_state(inner.tx.state());

            match action {
                TxAction::Write(byte) => inner.peripheral.write_byte(byte),
                TxAction::WriteLast(byte) => {
                    inner.peripheral.write_byte(byte);
                    inner.peripheral.set_tx_interrupt(TxInterrupt::Complete);
                }
                TxAction::Finished => inner.peripheral.set_tx_interrupt(TxInterrupt::Off),
            }

            Ok::<_, Error>(action == TxAction::Finished)
        })?;

        if finished {
            self.scheduler.add(self.config.tx_done_event);
            self.sleep.unblock(LINK_POWER_FLOOR)?;
        }

        Ok(())
    }

    pub fn on_rx_signal(&self, signal: RxSignal) -> Result<(), Error> {
        let closed = self.inner.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let inner = &mut *guard;

            let action = inner.rx.on_signal(signal)?;
            self.rx_state.set_state(inner.rx.state());

            match action {
                RxAction::OpenFrame => inner.peripheral.listen_frame(true),
                RxAction::Continue => {}
                RxAction::CloseFrame => {
                    inner.peripheral.listen_frame(false);
                    inner.peripheral.block_rx();
                    inner.rx.rearm();
                    self.rx_state.set_state(inner.rx.state());
                }
            }

            Ok::<_, Error>(action == RxAction::CloseFrame)
        })?;

        if closed {
            self.scheduler.add(self.config.rx_done_event);
        }

        Ok(())
    }

    /// Copies the last received message, terminator excluded.
    ///
    /// On a short `buf` nothing is copied and the message length is returned as the error.
    pub fn message(&self, buf: &mut [u8]) -> Result<usize, usize> {
        self.inner.lock(|cell| cell.borrow().rx.read(buf))
    }

    /// Runs `f` with exclusive access to the peripheral.
    pub fn peripheral<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut().peripheral))
    }

    #[cfg(feature = "dump")]
    pub fn dump_state(&self) -> LinkDump {
        LinkDump {
            tx: self.tx_state.dump(TxState::Idle),
            rx: self.rx_state.dump(RxState::Idle),
        }
    }
}

impl<P: LinkPeripheral, const TXBUFSIZE: usize, const RXBUFSIZE: usize> Transmit
    for LinkDriver<'_, P, TXBUFSIZE, RXBUFSIZE>
{
    fn is_tx_idle(&self) -> bool {
        !self.tx_busy() && self.peripheral(|p| p.is_tx_idle())
    }

    fn send(&self, bytes: &[u8]) -> Result<(), Error> {
        LinkDriver::send(self, bytes)
    }
}
