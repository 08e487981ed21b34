//! Build-time configuration.
//!
//! Everything the toy can be tuned with lives in [`Config`]. The firmware
//! uses [`Config::DEFAULT`]; the `const` checks at the bottom reject a broken
//! configuration before it ever reaches a board.
//!
//! # Phrase Layout
//!
//! Files on the module are numbered from 1:
//!
//! ```text
//! 1 .. button_event_max-1          button phrases
//! button_event_max                 "going to sleep"
//! button_event_max+1 .. time_event_max-1   timed phrases
//! time_event_max                   startup beep / low battery warning
//! ```
//!
//! A talking-toy card therefore holds exactly `time_event_max` files; any
//! other count selects the music box.

/// Length of one main-loop tick in milliseconds.
pub const TICK_MS: u32 = 128;

/// Number of ticks in one minute (rounded down).
pub const TICKS_PER_MINUTE: u32 = 60_000 / TICK_MS;

/// Highest volume the JQ8400 accepts.
pub const MAX_VOLUME: u8 = 30;

/// Supply voltage thresholds and ADC calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryConfig {
    /// Below this a warning beep is played (millivolts)
    pub warning_mv: u16,
    /// Below this all speech is suppressed (millivolts)
    pub low_mv: u16,
    /// Bandgap reference voltage (millivolts)
    pub bandgap_mv: u32,
    /// ADC full-scale count
    pub adc_full_scale: u32,
}

/// Toy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Average minutes between timed phrases
    pub speech_interval_minutes: u32,
    /// Playback volume, 0-30
    pub volume: u8,
    /// Play the startup beep after boot
    pub startup_beep: bool,
    /// Sample the supply voltage and warn / go silent when low
    pub battery_monitor: bool,
    /// Ask the module for its file count to pick the operating mode
    pub count_files: bool,
    /// Idle minutes before the module is powered down
    pub light_sleep_minutes: u32,
    /// Idle minutes before only the button can wake the toy
    pub deep_sleep_minutes: u32,
    /// Upper (exclusive) bound of the button phrases, also the sleep phrase
    pub button_event_max: u16,
    /// Upper (exclusive) bound of the timed phrases, also the beep file
    pub time_event_max: u16,
    /// Hold time that turns a press into "go to sleep now"
    pub long_press_ms: u32,
    /// BUSY line ADC count at or above which the module is playing
    pub busy_threshold: u16,
    pub battery: BatteryConfig,
}

impl Config {
    /// Settings of the shipped toy.
    pub const DEFAULT: Self = Self {
        speech_interval_minutes: 4,
        volume: 25,
        startup_beep: true,
        battery_monitor: true,
        count_files: true,
        light_sleep_minutes: 1,
        deep_sleep_minutes: 20,
        button_event_max: 25,
        time_event_max: 50,
        long_press_ms: 3_000,
        busy_threshold: 1_200,
        battery: BatteryConfig {
            warning_mv: 3_500,
            low_mv: 3_200,
            // VREFINT on STM32L0, 12-bit conversion
            bandgap_mv: 1_224,
            adc_full_scale: 4_096,
        },
    };

    /// Idle ticks before light sleep.
    pub const fn light_sleep_ticks(&self) -> u32 {
        self.light_sleep_minutes * TICKS_PER_MINUTE
    }

    /// Idle ticks before deep sleep.
    pub const fn deep_sleep_ticks(&self) -> u32 {
        self.deep_sleep_minutes * TICKS_PER_MINUTE
    }

    /// Timed speech fires with probability 1 in this many ticks.
    pub const fn speech_odds(&self) -> u32 {
        self.speech_interval_minutes * TICKS_PER_MINUTE
    }

    /// "Going to sleep" announcement, right after the button phrases.
    pub const fn sleep_phrase(&self) -> u16 {
        self.button_event_max
    }

    /// Startup beep, also used as the low-battery warning.
    pub const fn startup_beep_file(&self) -> u16 {
        self.time_event_max
    }

    /// File count identifying a talking-toy card.
    pub const fn sentinel_file_count(&self) -> u16 {
        self.time_event_max
    }

    /// True if the phrase layout and thresholds are consistent.
    pub const fn is_valid(&self) -> bool {
        self.volume <= MAX_VOLUME
            && self.button_event_max > 1
            && self.time_event_max > self.button_event_max + 1
            && self.speech_interval_minutes > 0
            && self.light_sleep_minutes > 0
            && self.light_sleep_minutes <= self.deep_sleep_minutes
            && self.battery.low_mv <= self.battery.warning_mv
            && self.long_press_ms > 0
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const _: () = assert!(Config::DEFAULT.is_valid(), "invalid default configuration");
