//! Register bindings for STM32L0: I2C1 as bus master, LPUART1 as the framed link, LPTIM1
//! as the periodic timer.
//!
//! Pins, kernel clocks and peripheral timing are expected to be configured by the caller;
//! these types only drive the registers the state machines need.

use core::ptr;

use cortex_m::peripheral::SCB;
use embassy_stm32::{
    gpio::Output,
    pac::{
        self,
        i2c::vals::{Autoend, Dir},
    },
};

use crate::{
    app::Indicator,
    interrupts::{BusFlags, BusPeripheral, LinkFlags, LinkPeripheral, TxInterrupt},
    sleep::{PowerMode, SleepControl},
    timer::TimerPeripheral,
};

/// I2C1 in master mode.
///
/// The v2 controller has no separate address-ACK event: TXIS and TC stand in for the write
/// phase, and the first RXNE of a read implies the read address was acknowledged. Byte
/// acknowledgement and the final NACK+STOP come from NBYTES and AUTOEND.
pub struct I2c1 {
    first_byte: bool,
    swallow_stop: bool,
}

impl I2c1 {
    pub const fn new() -> Self {
        Self {
            first_byte: false,
            swallow_stop: false,
        }
    }

    /// Enables the controller and every interrupt source used by [`BusPeripheral`].
    pub fn init(&mut self) {
        pac::I2C1.cr1().modify(|w| {
            w.set_txie(true);
            w.set_rxie(true);
            w.set_tcie(true);
            w.set_nackie(true);
            w.set_stopie(true);
            w.set_pe(true);
        });
    }
}

impl Default for I2c1 {
    fn default() -> Self {
        Self::new()
    }
}

impl BusPeripheral for I2c1 {
    fn is_idle(&self) -> bool {
        !pac::I2C1.isr().read().busy()
    }

    fn start_write(&mut self, address: u8) {
        pac::I2C1.cr2().write(|w| {
            w.set_sadd(u16::from(address) << 1);
            w.set_dir(Dir::WRITE);
            w.set_nbytes(1);
            w.set_autoend(Autoend::SOFTWARE);
            w.set_start(true);
        });
    }

    fn write_byte(&mut self, byte: u8) {
        pac::I2C1.txdr().write(|w| w.set_txdata(byte));
    }

    fn start_read(&mut self, address: u8, len: u8) {
        self.first_byte = true;
        pac::I2C1.cr2().write(|w| {
            w.set_sadd(u16::from(address) << 1);
            w.set_dir(Dir::READ);
            w.set_nbytes(len);
            w.set_autoend(Autoend::AUTOMATIC);
            w.set_start(true);
        });
    }

    fn read_byte(&mut self) -> u8 {
        pac::I2C1.rxdr().read().rxdata()
    }

    fn ack(&mut self) {}

    fn nack_and_stop(&mut self) {}

    fn take_flags(&mut self) -> BusFlags {
        let regs = pac::I2C1;
        let isr = regs.isr().read();
        let mut flags = BusFlags::NONE;

        if isr.txis() || isr.tc() {
            flags = flags | BusFlags::ACK;
        }

        if isr.nackf() {
            regs.icr().write(|w| w.set_nackcf(true));
            // AUTOEND follows a NACK with a STOP the transaction does not own.
            self.swallow_stop = true;
            flags = flags | BusFlags::NACK;
        }

        if isr.rxne() {
            if self.first_byte {
                self.first_byte = false;
                flags = flags | BusFlags::ACK;
            }
            flags = flags | BusFlags::RX_DATA;
        }

        if isr.stopf() {
            regs.icr().write(|w| w.set_stopcf(true));
            if self.swallow_stop {
                self.swallow_stop = false;
            } else {
                flags = flags | BusFlags::STOP;
            }
        }

        flags
    }
}

/// LPUART1 with start/stop marker detection done in software.
///
/// The receive interrupt stays enabled for the lifetime of the port; bytes outside the
/// enabled listening windows are read and dropped.
pub struct Lpuart1 {
    start: u8,
    stop: u8,
    blocked: bool,
    listen_start: bool,
    listen_frame: bool,
    tx_source: TxInterrupt,
    rx_byte: u8,
}

impl Lpuart1 {
    pub const fn new() -> Self {
        Self {
            start: 0,
            stop: 0,
            blocked: true,
            listen_start: false,
            listen_frame: false,
            tx_source: TxInterrupt::Off,
            rx_byte: 0,
        }
    }
}

impl Default for Lpuart1 {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkPeripheral for Lpuart1 {
    fn configure_markers(&mut self, start: u8, stop: u8) {
        self.start = start;
        self.stop = stop;
        pac::LPUART1.cr1().modify(|w| w.set_rxneie(true));
    }

    fn is_tx_idle(&self) -> bool {
        pac::LPUART1.isr().read().tc()
    }

    fn write_byte(&mut self, byte: u8) {
        // SAFETY: TDR is a plain data register, byte writes load the low 8 bits.
        unsafe { ptr::write_volatile(pac::LPUART1.tdr().as_ptr() as *mut u8, byte) }
    }

    fn read_byte(&mut self) -> u8 {
        self.rx_byte
    }

    fn set_tx_interrupt(&mut self, source: TxInterrupt) {
        let regs = pac::LPUART1;

        if source == TxInterrupt::BufferEmpty {
            regs.icr().write(|w| w.set_tccf(true));
        }

        regs.cr1().modify(|w| {
            w.set_txeie(source == TxInterrupt::BufferEmpty);
            w.set_tcie(source == TxInterrupt::Complete);
        });
        self.tx_source = source;
    }

    fn listen_start(&mut self, enable: bool) {
        self.listen_start = enable;
    }

    fn listen_frame(&mut self, enable: bool) {
        self.listen_frame = enable;
    }

    fn block_rx(&mut self) {
        self.blocked = true;
    }

    fn take_flags(&mut self) -> LinkFlags {
        let regs = pac::LPUART1;
        let isr = regs.isr().read();
        let mut flags = LinkFlags::NONE;

        match self.tx_source {
            TxInterrupt::BufferEmpty if isr.txe() => flags = flags | LinkFlags::TX_EMPTY,
            TxInterrupt::Complete if isr.tc() => {
                regs.icr().write(|w| w.set_tccf(true));
                flags = flags | LinkFlags::TX_COMPLETE;
            }
            _ => {}
        }

        if isr.rxne() {
            // SAFETY: reading RDR clears RXNE; the byte is kept for `read_byte`.
            let byte = unsafe { ptr::read_volatile(regs.rdr().as_ptr() as *const u8) };
            self.rx_byte = byte;

            if byte == self.start {
                if self.listen_start {
                    self.blocked = false;
                    flags = flags | LinkFlags::START_MARKER | LinkFlags::RX_DATA;
                }
            } else if !self.blocked && self.listen_frame {
                if byte == self.stop {
                    flags = flags | LinkFlags::STOP_MARKER;
                } else {
                    flags = flags | LinkFlags::RX_DATA;
                }
            }
        }

        flags
    }
}

/// LPTIM1 counting up to a fixed auto-reload value.
pub struct Lptim1 {
    period: u16,
}

impl Lptim1 {
    pub const fn new(period: u16) -> Self {
        Self { period }
    }
}

impl TimerPeripheral for Lptim1 {
    fn is_running(&self) -> bool {
        pac::LPTIM1.cr().read().enable()
    }

    fn set_enabled(&mut self, enable: bool) {
        let regs = pac::LPTIM1;

        if enable {
            // IER only accepts writes while disabled, ARR only while enabled.
            regs.ier().write(|w| w.set_arrmie(true));
            regs.cr().write(|w| w.set_enable(true));
            regs.arr().write(|w| w.set_arr(self.period));
            regs.cr().write(|w| {
                w.set_enable(true);
                w.set_cntstrt(true);
            });
        } else {
            regs.cr().write(|w| w.set_enable(false));
        }
    }

    fn take_underflow(&mut self) -> bool {
        let regs = pac::LPTIM1;
        let hit = regs.isr().read().arrm();

        if hit {
            regs.icr().write(|w| w.set_arrmcf(true));
        }

        hit
    }
}

/// A push-pull pin, lit when high.
impl Indicator for Output<'_> {
    fn set(&mut self, on: bool) {
        if on {
            self.set_high();
        } else {
            self.set_low();
        }
    }
}

/// Sleep entry through `WFI`. `Em2` and `Em3` both map to Stop mode.
pub struct CortexSleep {
    scb: SCB,
}

impl CortexSleep {
    pub fn new(scb: SCB) -> Self {
        Self { scb }
    }
}

impl SleepControl for CortexSleep {
    fn enter(&mut self, mode: PowerMode) {
        match mode {
            PowerMode::Em0 => {}
            PowerMode::Em1 => {
                self.scb.clear_sleepdeep();
                cortex_m::asm::wfi();
            }
            _ => {
                self.scb.set_sleepdeep();
                cortex_m::asm::wfi();
                self.scb.clear_sleepdeep();
            }
        }
    }
}
