//! Hardware abstraction and peripheral initialization.
//!
//! This module defines the pin mappings and peripheral initialization
//! for the Cheapolino board.
//!
//! # Pin Assignments
//!
//! ## User Input
//! - **PA0**: BUTTON_N - Active-low push button, internal pull-up (EXTI0)
//!
//! ## Playback Module (JQ8400)
//! - **PB1**: MP3_POWER - High-side switch for the module supply
//! - **PA2**: USART2_TX - Serial to module RX (9600 baud)
//! - **PA3**: USART2_RX - Serial from module TX
//!
//! USART2 only runs while the module is powered. Dropping the driver
//! disables the peripheral and disconnects PA2/PA3, so nothing drives the
//! unpowered module's RX pin.
//! - **PA1**: MP3_BUSY - Module BUSY output (ADC_IN1)
//!
//! ## Supply Monitoring
//! - **VREFINT**: Internal bandgap, converted against VDD
//!
//! ## Low Power & RTC
//! - **PC14**: OSC32_IN - 32.768 kHz crystal input
//! - **PC15**: OSC32_OUT - 32.768 kHz crystal output
//!
//! ## Debug (SWD)
//! - **PA13**: SWDIO
//! - **PA14**: SWCLK

use cheapolino::board::{Board, WakeSource};
use cheapolino::config::{Config, TICK_MS};
use cheapolino::jq8400::{Jq8400, SerialLink};
use embassy_stm32::adc::{self, Adc, AdcChannel, AnyAdcChannel, VrefInt};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::flash::{self, Blocking, Flash};
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::peripherals::{ADC1, PA2, PA3, USART2};
use embassy_stm32::usart::{self, BufferedUart};
use embassy_stm32::{Peri, bind_interrupts};
use embassy_time::{Delay, Timer};
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use grounded::uninit::GroundedArrayCell;

bind_interrupts!(struct Irqs {
    ADC1_COMP => adc::InterruptHandler<ADC1>;
    USART2 => usart::BufferedInterruptHandler<USART2>;
});

/// JQ8400 serial speed.
const MP3_BAUD: u32 = 9600;

/// Size of the STM32L031 data EEPROM.
const EEPROM_CAPACITY: usize = 1024;

const UART_BUF_LEN: usize = 16;

/// UART ring buffers, reused every time the link comes back up.
static TX_BUF: GroundedArrayCell<u8, UART_BUF_LEN> = GroundedArrayCell::const_init();
static RX_BUF: GroundedArrayCell<u8, UART_BUF_LEN> = GroundedArrayCell::const_init();

pub type Player = Jq8400<ModuleUart, Output<'static>, Delay>;

/// Peripherals the module UART is built from.
struct UartResources {
    usart: Peri<'static, USART2>,
    tx: Peri<'static, PA2>,
    rx: Peri<'static, PA3>,
}

impl UartResources {
    /// Reclaims the UART peripherals after the driver has been dropped.
    fn recover() -> Self {
        // SAFETY: only called from `ModuleUart::resume` while no UART driver
        // exists; the previous one was dropped in `shutdown` and nothing
        // else in the firmware uses USART2, PA2 or PA3.
        unsafe {
            Self {
                usart: USART2::steal(),
                tx: PA2::steal(),
                rx: PA3::steal(),
            }
        }
    }
}

/// Errors on the module link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Link is shut down or failed to come up
    Released,
    Uart(usart::Error),
}

impl embedded_io_async::Error for LinkError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Released => ErrorKind::NotConnected,
            Self::Uart(e) => e.kind(),
        }
    }
}

/// USART2 link to the JQ8400, torn down while the module is off.
pub struct ModuleUart {
    /// Unused peripherals from bring-up, consumed by the first resume
    resources: Option<UartResources>,
    uart: Option<BufferedUart<'static>>,
}

impl ModuleUart {
    fn uart(&mut self) -> Result<&mut BufferedUart<'static>, LinkError> {
        self.uart.as_mut().ok_or(LinkError::Released)
    }
}

impl ErrorType for ModuleUart {
    type Error = LinkError;
}

impl Read for ModuleUart {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.uart()?.read(buf).await.map_err(LinkError::Uart)
    }
}

impl Write for ModuleUart {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.uart()?.write(buf).await.map_err(LinkError::Uart)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.uart()?.flush().await.map_err(LinkError::Uart)
    }
}

impl SerialLink for ModuleUart {
    fn shutdown(&mut self) {
        if self.uart.take().is_some() {
            #[cfg(feature = "debug-mode")]
            defmt::debug!("USART2 released");
        }
    }

    fn resume(&mut self) {
        if self.uart.is_some() {
            return;
        }

        let resources = self.resources.take().unwrap_or_else(UartResources::recover);

        let mut config = usart::Config::default();
        config.baudrate = MP3_BAUD;

        // SAFETY: the buffers are only borrowed by the UART driver, and at
        // most one driver exists at a time (checked above).
        let (tx_buf, rx_buf) = unsafe {
            (
                &mut *(TX_BUF.as_mut_ptr() as *mut [u8; UART_BUF_LEN]),
                &mut *(RX_BUF.as_mut_ptr() as *mut [u8; UART_BUF_LEN]),
            )
        };

        match BufferedUart::new(
            resources.usart,
            resources.rx,
            resources.tx,
            tx_buf,
            rx_buf,
            Irqs,
            config,
        ) {
            Ok(uart) => self.uart = Some(uart),
            Err(_e) => {
                #[cfg(feature = "debug-mode")]
                defmt::warn!("USART2 bring-up failed: {}", _e);
            }
        }
    }
}

/// Wake sources and analog inputs of the Cheapolino board.
pub struct ToyBoard {
    /// Push button, doubles as the deep-sleep wake interrupt
    button: ExtiInput<'static>,
    adc: Adc<'static, ADC1>,
    /// Module BUSY line
    busy: AnyAdcChannel<ADC1>,
    /// Internal reference for supply measurement
    vref: VrefInt,
}

impl Board for ToyBoard {
    async fn sleep(&mut self, armed: WakeSource) -> WakeSource {
        match armed {
            WakeSource::Tick => {
                Timer::after_millis(u64::from(TICK_MS)).await;
                WakeSource::Tick
            }
            WakeSource::Button => {
                self.button.wait_for_falling_edge().await;
                WakeSource::Button
            }
        }
    }

    fn button_pressed(&mut self) -> bool {
        self.button.is_low()
    }

    async fn busy_level(&mut self) -> u16 {
        self.adc.read(&mut self.busy).await
    }

    async fn supply_raw(&mut self) -> u16 {
        self.adc.read(&mut self.vref).await
    }
}

/// STM32L0 data EEPROM exposed as durable byte storage.
pub struct Eeprom {
    flash: Flash<'static, Blocking>,
}

impl embedded_storage::ReadStorage for Eeprom {
    type Error = flash::Error;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.flash.eeprom_read_slice(offset, bytes)
    }

    fn capacity(&self) -> usize {
        EEPROM_CAPACITY
    }
}

impl embedded_storage::Storage for Eeprom {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.flash.eeprom_write_slice(offset, bytes)
    }
}

/// Top-level peripheral container for the Cheapolino board.
///
/// Owns all hardware controllers and provides initialization
/// from STM32 peripheral singleton.
pub struct Peripherals {
    /// Button, ADC and tick timer
    pub board: ToyBoard,
    /// Playback module driver (powered off, link released until boot
    /// initializes it)
    pub player: Player,
    /// Seed record storage
    pub eeprom: Eeprom,
}

impl Peripherals {
    /// Initializes all peripherals from STM32 peripheral singleton.
    ///
    /// # Initial GPIO States
    ///
    /// - PB1 (MP3_POWER): Low (module off)
    /// - PA2/PA3 (USART2): Untouched until the player first powers up
    /// - PA0 (BUTTON_N): Input, pull-up
    ///
    /// # Arguments
    ///
    /// * `p` - STM32 peripheral singleton from embassy_stm32::init()
    /// * `config` - Volume and BUSY threshold for the player
    ///
    /// # Returns
    ///
    /// Initialized Peripherals struct ready for use
    pub fn new(p: embassy_stm32::Peripherals, config: &Config) -> Self {
        let uart = ModuleUart {
            resources: Some(UartResources {
                usart: p.USART2,
                tx: p.PA2,
                rx: p.PA3,
            }),
            uart: None,
        };

        let adc = Adc::new(p.ADC1, Irqs);
        let vref = adc.enable_vref();

        Self {
            board: ToyBoard {
                button: ExtiInput::new(p.PA0, p.EXTI0, Pull::Up),
                adc,
                busy: p.PA1.degrade_adc(),
                vref,
            },
            player: Jq8400::new(
                uart,
                Output::new(p.PB1, Level::Low, Speed::Low),
                Delay,
                config.volume,
                config.busy_threshold,
            ),
            eeprom: Eeprom {
                flash: Flash::new_blocking(p.FLASH),
            },
        }
    }
}
