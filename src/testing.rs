//! Host-side doubles for the hardware the core runs on.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::v2::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_storage::{ReadStorage, Storage};

use crate::board::{Board, WakeSource};
use crate::config::TICK_MS;
use crate::jq8400::SerialLink;

/// RAM-backed EEPROM.
pub struct MemStorage<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> MemStorage<N> {
    pub fn erased(fill: u8) -> Self {
        Self { bytes: [fill; N] }
    }

    pub fn poke(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

impl<const N: usize> ReadStorage for MemStorage<N> {
    type Error = Infallible;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        bytes.copy_from_slice(&self.bytes[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Storage for MemStorage<N> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.poke(offset as usize, bytes);
        Ok(())
    }
}

/// Virtual milliseconds shared between delays and the board.
#[derive(Clone, Default)]
pub struct Clock(Rc<Cell<u64>>);

impl Clock {
    pub fn now(&self) -> u64 {
        self.0.get()
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

/// Delay that only moves the virtual clock.
#[derive(Clone)]
pub struct MockDelay {
    clock: Clock,
}

impl MockDelay {
    pub fn new(clock: &Clock) -> Self {
        Self {
            clock: clock.clone(),
        }
    }
}

impl DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.clock.advance(u64::from(ns.div_ceil(1_000_000)));
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.clock.advance(u64::from(ms));
    }
}

/// Serial port recording everything written and replaying a canned response.
///
/// Starts released, like the board UART; the driver brings it up.
#[derive(Clone, Default)]
pub struct MockSerial {
    written: Rc<RefCell<Vec<u8>>>,
    response: Rc<RefCell<VecDeque<u8>>>,
    enabled: Rc<Cell<bool>>,
    shutdowns: Rc<Cell<u32>>,
    fail_writes: Rc<Cell<bool>>,
}

/// Link used while released, or a write failure injected by a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSerialError {
    Released,
    Injected,
}

impl embedded_io_async::Error for MockSerialError {
    fn kind(&self) -> embedded_io_async::ErrorKind {
        match self {
            Self::Released => embedded_io_async::ErrorKind::NotConnected,
            Self::Injected => embedded_io_async::ErrorKind::Other,
        }
    }
}

impl MockSerial {
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn shutdowns(&self) -> u32 {
        self.shutdowns.get()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.borrow().clone()
    }

    pub fn clear(&self) {
        self.written.borrow_mut().clear();
    }

    pub fn respond(&self, bytes: &[u8]) {
        self.response.borrow_mut().extend(bytes.iter().copied());
    }

    /// True if `frame` appears anywhere in the written bytes.
    pub fn sent(&self, frame: &[u8]) -> bool {
        self.written.borrow().windows(frame.len()).any(|w| w == frame)
    }

    pub fn count_sent(&self, frame: &[u8]) -> usize {
        self.written
            .borrow()
            .windows(frame.len())
            .filter(|w| *w == frame)
            .count()
    }
}

impl embedded_io_async::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl SerialLink for MockSerial {
    fn shutdown(&mut self) {
        if self.enabled.replace(false) {
            self.shutdowns.set(self.shutdowns.get() + 1);
        }
    }

    fn resume(&mut self) {
        self.enabled.set(true);
    }
}

impl embedded_io_async::Write for MockSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if !self.enabled.get() {
            return Err(MockSerialError::Released);
        }
        if self.fail_writes.get() {
            return Err(MockSerialError::Injected);
        }
        self.written.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
}

impl embedded_io_async::Read for MockSerial {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if !self.enabled.get() {
            return Err(MockSerialError::Released);
        }
        let available = {
            let mut response = self.response.borrow_mut();
            let mut n = 0;
            while n < buf.len() {
                match response.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            n
        };
        if available == 0 {
            core::future::pending::<()>().await;
        }
        Ok(available)
    }
}

/// Output pin whose level can be inspected after it has been moved.
#[derive(Clone, Default)]
pub struct MockPin {
    high: Rc<Cell<bool>>,
    rising_edges: Rc<Cell<u32>>,
}

impl MockPin {
    pub fn is_high(&self) -> bool {
        self.high.get()
    }

    pub fn rising_edges(&self) -> u32 {
        self.rising_edges.get()
    }
}

impl OutputPin for MockPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if !self.high.get() {
            self.rising_edges.set(self.rising_edges.get() + 1);
        }
        self.high.set(true);
        Ok(())
    }
}

/// Scripted board: the button is held until a given virtual time, the BUSY
/// line stays high for a set number of tick waits.
pub struct MockBoard {
    pub clock: Clock,
    pub button_held_until: u64,
    pub busy_ticks: u32,
    pub supply_raw: u16,
    pub sleeps: Vec<WakeSource>,
}

/// Raw bandgap count giving roughly 4.0 V with the default calibration.
pub const HEALTHY_SUPPLY_RAW: u16 = 1_253;

impl MockBoard {
    pub fn new(clock: &Clock) -> Self {
        Self {
            clock: clock.clone(),
            button_held_until: 0,
            busy_ticks: 0,
            supply_raw: HEALTHY_SUPPLY_RAW,
            sleeps: Vec::new(),
        }
    }

    pub fn hold_button(&mut self, ms: u64) {
        self.button_held_until = self.clock.now() + ms;
    }

    pub fn count_sleeps(&self, source: WakeSource) -> usize {
        self.sleeps.iter().filter(|s| **s == source).count()
    }
}

impl Board for MockBoard {
    async fn sleep(&mut self, armed: WakeSource) -> WakeSource {
        self.sleeps.push(armed);
        self.clock.advance(u64::from(TICK_MS));
        if armed == WakeSource::Tick && self.busy_ticks > 0 {
            self.busy_ticks -= 1;
        }
        armed
    }

    fn button_pressed(&mut self) -> bool {
        self.clock.now() < self.button_held_until
    }

    async fn busy_level(&mut self) -> u16 {
        if self.busy_ticks > 0 { 4_000 } else { 0 }
    }

    async fn supply_raw(&mut self) -> u16 {
        self.supply_raw
    }
}
