//! Supply voltage monitor.
//!
//! VDD is not measured directly: the ADC converts the internal bandgap
//! reference against VDD, so a lower supply gives a higher count.
//!
//! ```text
//! vdd_mv = full_scale * bandgap_mv / raw
//! ```
//!
//! One sample is taken per minute of ticks. Below the warning threshold the
//! startup beep doubles as a low-battery warning. Below the low threshold
//! speech is silenced entirely until a later sample reads above it again.

use crate::board::Board;
use crate::config::{BatteryConfig, Config, TICKS_PER_MINUTE};

/// Converts a raw bandgap reading to millivolts.
pub fn supply_millivolts(raw: u16, calibration: &BatteryConfig) -> u16 {
    if raw == 0 {
        return u16::MAX;
    }
    let mv = calibration.adc_full_scale * calibration.bandgap_mv / u32::from(raw);
    mv.min(u32::from(u16::MAX)) as u16
}

/// Classification of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
pub enum BatteryLevel {
    Good,
    /// Play the warning beep
    Warning,
    /// Silence all speech
    Low,
}

/// Last sample.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatteryState {
    pub raw: u16,
    pub millivolts: u16,
    pub low: bool,
}

/// Samples the supply once a minute and tracks the low-battery flag.
pub struct BatteryMonitor {
    calibration: BatteryConfig,
    /// Ticks between samples
    period: u32,
    /// Ticks until the next sample
    countdown: u32,
    state: BatteryState,
}

impl BatteryMonitor {
    pub fn new(config: &Config) -> Self {
        Self {
            calibration: config.battery,
            period: TICKS_PER_MINUTE,
            countdown: TICKS_PER_MINUTE,
            state: BatteryState::default(),
        }
    }

    /// Supply was below the low threshold at the last sample.
    pub fn is_low(&self) -> bool {
        self.state.low
    }

    pub fn state(&self) -> BatteryState {
        self.state
    }

    /// Takes a sample on the next call to [`poll`](Self::poll).
    pub fn sample_next_tick(&mut self) {
        self.countdown = 0;
    }

    /// Counts down one tick and samples when due.
    ///
    /// Returns the classification of the sample, or `None` if no sample
    /// was taken this tick.
    pub async fn poll(&mut self, board: &mut impl Board) -> Option<BatteryLevel> {
        if self.countdown > 0 {
            self.countdown -= 1;
            return None;
        }
        self.countdown = self.period;

        let raw = board.supply_raw().await;
        let millivolts = supply_millivolts(raw, &self.calibration);
        let level = if millivolts < self.calibration.low_mv {
            BatteryLevel::Low
        } else if millivolts < self.calibration.warning_mv {
            BatteryLevel::Warning
        } else {
            BatteryLevel::Good
        };

        self.state = BatteryState {
            raw,
            millivolts,
            low: level == BatteryLevel::Low,
        };

        #[cfg(feature = "debug-mode")]
        defmt::info!("Battery {} mV ({})", millivolts, level);

        Some(level)
    }
}
