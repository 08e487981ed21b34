//! Firmware for the Cheapolino battery-powered talking toy.
//!
//! # Overview
//!
//! The toy speaks through a JQ8400 serial MP3 module:
//! - A random phrase on every button press
//! - Now and then a random phrase on its own
//! - "Going to sleep" on a 3 second press
//! - Music-box mode (tracks in order) when the card is not a Cheapolino card
//!
//! # Hardware
//!
//! - **MCU**: STM32L031G6U6 (Cortex-M0+, ultra-low-power, 1 KiB data EEPROM)
//! - **Playback**: JQ8400 MP3 module on USART2, supply switched by PB1
//! - **Input**: one push button to ground
//! - **RTC**: 32.768 kHz crystal for timekeeping in STOP mode
//!
//! # Low Power Operation
//!
//! - MSI oscillator at 2.097 MHz (enough for 9600 baud)
//! - RTC timer wakes the MCU every 128 ms while awake
//! - After a minute idle the module is switched off
//! - After twenty minutes idle only the button interrupt wakes the MCU
//!
//! # Module Organization
//!
//! - [`hardware`] - Pin mappings and peripheral initialization
//! - `cheapolino` library - power scheduler, playback driver, event logic

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod hardware;

#[cfg(target_os = "none")]
use {defmt_rtt as _, panic_probe as _};

/// Creates a low-power clock configuration for STM32L031.
///
/// # Clock Settings
///
/// - **MSI**: 2.097 MHz (lowest range that still clocks USART2 at 9600 baud)
/// - **System clock**: MSI (no PLL)
/// - **LSE**: 32.768 kHz external crystal for RTC
/// - Everything else (prescalers, voltage scale) at reset defaults
///
/// # Returns
///
/// Configured RCC settings for embassy-stm32 initialization
#[cfg(target_os = "none")]
fn create_low_power_config() -> embassy_stm32::rcc::Config {
    use embassy_stm32::rcc::{
        Config, LsConfig, LseConfig, LseDrive, LseMode, MSIRange, RtcClockSource, Sysclk,
    };
    use embassy_stm32::time::Hertz;

    let mut rcc = Config::default();
    rcc.msi = Some(MSIRange::RANGE2M);
    rcc.hsi = false;
    rcc.sys = Sysclk::MSI;
    rcc.ls = LsConfig {
        rtc: RtcClockSource::LSE,
        lsi: false,
        lse: Some(LseConfig {
            frequency: Hertz(32_768),
            mode: LseMode::Oscillator(LseDrive::Low),
        }),
    };
    rcc
}

/// Main entry point for the talking toy firmware.
///
/// # Initialization Sequence
///
/// 1. Configure clocks for low power operation
/// 2. Initialize STM32 peripherals
/// 3. Boot the application (module setup, mode detection, seeding)
/// 4. Enter the tick loop
#[cfg(target_os = "none")]
#[embassy_executor::main]
async fn main(_spawner: embassy_executor::Spawner) {
    use cheapolino::app::App;
    use cheapolino::config::Config;
    use embassy_time::Delay;
    use hardware::Peripherals;

    let mut config = embassy_stm32::Config::default();
    config.rcc = create_low_power_config();

    let p = embassy_stm32::init(config);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Cheapolino firmware starting...");

    // Wait 3 seconds after boot to allow debugger connection
    // before the first deep sleep. Negligible battery impact.
    #[cfg(feature = "debug-mode")]
    embassy_time::Timer::after_secs(3).await;

    let toy_config = Config::DEFAULT;
    let Peripherals {
        mut board,
        player,
        eeprom,
    } = Peripherals::new(p, &toy_config);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Booting application...");

    let app = App::boot(toy_config, player, Delay, &mut board, eeprom).await;

    #[cfg(feature = "debug-mode")]
    defmt::info!("Entering tick loop");

    app.run(&mut board).await
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("cheapolino is firmware; build it with --target thumbv6m-none-eabi");
}
