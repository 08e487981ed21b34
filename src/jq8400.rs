//! JQ8400 serial MP3 module driver.
//!
//! The module is driven at 9600 baud with short frames:
//!
//! ```text
//! 0xAA  opcode  length  data...  checksum
//! ```
//!
//! The checksum is the sum of every preceding byte truncated to eight bits,
//! which gives each command a fixed base (0xAE for stop/reset, 190 for
//! volume, 179 for play) plus its data bytes. Apart from the file count
//! query nothing is ever read back; each frame is followed by a settle delay
//! instead.
//!
//! # Hardware
//!
//! - **POWER**: high-side switch feeding the module, active high
//! - **TX/RX**: UART to the module, released while the module is off
//! - **BUSY**: analog input, high while a file is playing

use embassy_futures::select::{Either, select};
use embedded_hal::digital::v2::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};

use crate::board::{Board, WakeSource};
use crate::power::ModulePower;

/// First byte of every frame in both directions.
pub const START: u8 = 0xAA;

/// Command opcodes used by the toy.
pub mod opcode {
    /// Stop playback, module returns to idle
    pub const STOP: u8 = 0x04;
    /// Play file by number (two data bytes, big endian)
    pub const PLAY_FILE: u8 = 0x07;
    /// Query total number of files
    pub const COUNT_FILES: u8 = 0x0C;
    /// Set volume 0-30
    pub const SET_VOLUME: u8 = 0x13;
    /// Set equalizer
    pub const SET_EQ: u8 = 0x1A;
}

/// Length of the file count reply.
pub const RESPONSE_LEN: usize = 6;

/// Time for the module to boot after power is applied.
const POWER_ON_SETTLE_MS: u32 = 1_000;
/// Pause after each configuration frame.
const FRAME_SETTLE_MS: u32 = 200;
/// Time for BUSY to rise after a play frame.
const PLAY_START_MS: u32 = 300;
/// Pause after BUSY drops before the next command.
const DRAIN_MS: u32 = 100;
/// Time for the module to answer the file count query.
const COUNT_SETTLE_MS: u32 = 100;
/// Longest gap tolerated between reply bytes.
const RESPONSE_TIMEOUT_MS: u32 = 50;

/// Sum of all bytes, truncated to one byte.
pub const fn checksum(bytes: &[u8]) -> u8 {
    let mut sum = 0u8;
    let mut i = 0;
    while i < bytes.len() {
        sum = sum.wrapping_add(bytes[i]);
        i += 1;
    }
    sum
}

/// Fills the last byte of `frame` with the checksum of the others.
const fn seal<const N: usize>(mut frame: [u8; N]) -> [u8; N] {
    let mut sum = 0u8;
    let mut i = 0;
    while i < N - 1 {
        sum = sum.wrapping_add(frame[i]);
        i += 1;
    }
    frame[N - 1] = sum;
    frame
}

/// Stops anything playing and puts the module in a known state.
pub const RESET_FRAME: [u8; 4] = seal([START, opcode::STOP, 0x00, 0]);

/// Normal equalizer.
pub const EQ_NORMAL_FRAME: [u8; 5] = [0xAA, 0x1A, 0x01, 0x00, 0xC5];

/// Asks for the total number of files.
pub const COUNT_FILES_FRAME: [u8; 4] = seal([START, opcode::COUNT_FILES, 0x00, 0]);

/// Sets the volume (0-30).
pub const fn volume_frame(volume: u8) -> [u8; 5] {
    seal([START, opcode::SET_VOLUME, 0x01, volume, 0])
}

/// Plays a file by its number.
pub const fn play_frame(file: u16) -> [u8; 6] {
    let [high, low] = file.to_be_bytes();
    seal([START, opcode::PLAY_FILE, 0x02, high, low, 0])
}

/// Extracts the file count from a query reply.
///
/// The reply is `AA 0C 02 HI LO SUM`. Anything that does not look exactly
/// like that, or reports zero files, is rejected.
pub fn decode_file_count(response: &[u8; RESPONSE_LEN]) -> Option<u16> {
    let [start, op, len, high, low, sum] = *response;
    if start != START || op != opcode::COUNT_FILES || len != 0x02 {
        return None;
    }
    if sum != checksum(&response[..RESPONSE_LEN - 1]) {
        return None;
    }
    match u16::from_be_bytes([high, low]) {
        0 => None,
        count => Some(count),
    }
}

/// UART to the module that can be released while the module is off.
///
/// A driven TX line would feed the unpowered module through its RX pin, so
/// the link is shut down together with the supply.
pub trait SerialLink: Read + Write {
    /// Releases the UART; TX and RX stop driving.
    fn shutdown(&mut self);
    /// Brings the UART back up. A no-op if it is already running.
    fn resume(&mut self);
}

/// What `play` does while the module reports busy.
///
/// Implemented for every [`Board`] as "read the BUSY line" and "sleep for
/// one tick", so playback never spins at full power.
pub trait BusySignal {
    async fn level(&mut self) -> u16;
    async fn wait_tick(&mut self);
}

impl<B: Board> BusySignal for B {
    async fn level(&mut self) -> u16 {
        self.busy_level().await
    }

    async fn wait_tick(&mut self) {
        self.sleep(WakeSource::Tick).await;
    }
}

/// Driver for one JQ8400 module.
///
/// Tracks whether the module is powered; any command issued while it is off
/// first runs the full power-up sequence again.
pub struct Jq8400<S, P, D> {
    /// UART link to the module
    serial: S,
    /// Module supply switch
    power: P,
    delay: D,
    /// Volume sent during initialization
    volume: u8,
    /// BUSY level counted as "still playing"
    busy_threshold: u16,
    powered: bool,
}

impl<S, P, D> Jq8400<S, P, D>
where
    S: SerialLink,
    P: OutputPin,
    D: DelayNs,
{
    pub fn new(serial: S, power: P, delay: D, volume: u8, busy_threshold: u16) -> Self {
        Self {
            serial,
            power,
            delay,
            volume,
            busy_threshold,
            powered: false,
        }
    }

    /// Module is powered and configured.
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), S::Error> {
        self.serial.write_all(frame).await?;
        self.serial.flush().await
    }

    /// Powers the module up and configures it.
    ///
    /// Sequence: power on, wait for boot, bring the link up, then reset,
    /// equalizer and volume frames, each followed by a settle delay. The
    /// module only counts as powered once the last frame went out, so a
    /// failed setup is retried by the next command.
    pub async fn initialize(&mut self) -> Result<(), S::Error> {
        self.power.set_high().ok();
        self.delay.delay_ms(POWER_ON_SETTLE_MS).await;
        self.serial.resume();

        #[cfg(feature = "debug-mode")]
        defmt::debug!("JQ8400 powered, volume {}", self.volume);

        self.send(&RESET_FRAME).await?;
        self.delay.delay_ms(FRAME_SETTLE_MS).await;
        self.send(&EQ_NORMAL_FRAME).await?;
        self.delay.delay_ms(FRAME_SETTLE_MS).await;
        self.send(&volume_frame(self.volume)).await?;
        self.delay.delay_ms(FRAME_SETTLE_MS).await;

        self.powered = true;
        Ok(())
    }

    /// Releases the link, then cuts module power.
    pub fn power_down(&mut self) {
        self.serial.shutdown();
        self.power.set_low().ok();
        self.powered = false;
    }

    /// Plays `file` and returns once the module has finished.
    ///
    /// While BUSY is high the caller's tick wait is used, so the MCU sleeps
    /// between polls. There is no timeout: the module always drops BUSY at
    /// the end of a file.
    pub async fn play(&mut self, file: u16, busy: &mut impl BusySignal) -> Result<(), S::Error> {
        if !self.powered {
            self.initialize().await?;
        }

        #[cfg(feature = "debug-mode")]
        defmt::info!("Playing file {}", file);

        self.send(&play_frame(file)).await?;
        self.delay.delay_ms(PLAY_START_MS).await;

        while busy.level().await >= self.busy_threshold {
            busy.wait_tick().await;
        }

        self.delay.delay_ms(DRAIN_MS).await;
        Ok(())
    }

    /// Asks the module how many files it holds.
    ///
    /// Returns `Ok(None)` if the reply is missing, short or malformed.
    pub async fn count_files(&mut self) -> Result<Option<u16>, S::Error> {
        if !self.powered {
            self.initialize().await?;
        }

        self.send(&COUNT_FILES_FRAME).await?;
        self.delay.delay_ms(COUNT_SETTLE_MS).await;

        let mut response = [0u8; RESPONSE_LEN];
        let mut received = 0;
        while received < RESPONSE_LEN {
            let read = select(
                self.serial.read(&mut response[received..]),
                self.delay.delay_ms(RESPONSE_TIMEOUT_MS),
            )
            .await;
            match read {
                Either::First(Ok(0)) | Either::Second(()) => break,
                Either::First(Ok(n)) => received += n,
                Either::First(Err(e)) => return Err(e),
            }
        }

        if received < RESPONSE_LEN {
            #[cfg(feature = "debug-mode")]
            defmt::warn!("File count reply short: {} bytes", received);
            return Ok(None);
        }

        Ok(decode_file_count(&response))
    }
}

impl<S, P, D> ModulePower for Jq8400<S, P, D>
where
    S: SerialLink,
    P: OutputPin,
    D: DelayNs,
{
    fn is_powered(&self) -> bool {
        self.powered
    }

    fn power_down(&mut self) {
        Jq8400::power_down(self);
    }
}
