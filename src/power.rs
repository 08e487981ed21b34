//! Power management for the talking toy.
//!
//! The MCU wakes every tick (128 ms) from the periodic timer. Ticks without
//! any activity are counted by the sleep timer:
//!
//! ```text
//! Active ──(light threshold)──> LightSleep ──(deep threshold or low battery)──> DeepSleep
//!    ^                              |                                              |
//!    └──────(activity)──────────────┘                     (button pin interrupt)───┘
//! ```
//!
//! # Light Sleep
//!
//! The playback module is switched off; ticks keep running so timed speech
//! and battery checks still happen. The module is powered up again lazily by
//! the next play request.
//!
//! # Deep Sleep
//!
//! The tick timer is disarmed and only the pin-change interrupt on the
//! button line is armed. Waking up this way leaves a one-shot "wake to
//! speak" flag for the event selector.

use crate::board::{Board, WakeSource};
use crate::config::Config;

/// Anything that can be switched off when the toy goes to light sleep.
pub trait ModulePower {
    fn is_powered(&self) -> bool;
    fn power_down(&mut self);
}

/// Current power level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
pub enum PowerState {
    /// Module powered, tick timer running
    #[default]
    Active,
    /// Module powered down, tick timer running
    LightSleep,
    /// Module powered down, only the button wakes the MCU
    DeepSleep,
}

/// Sleep timer and sleep flags, owned by the main loop.
pub struct PowerScheduler {
    /// Ticks since the last activity
    sleep_timer: u32,
    /// Ticks before light sleep
    light_threshold: u32,
    /// Ticks before deep sleep
    deep_threshold: u32,
    /// Module has been powered down
    light_sleep: bool,
    /// Next wait arms only the button
    deep_sleep: bool,
    /// Set on deep-sleep wake, consumed by the event selector
    wake_to_speak: bool,
}

impl PowerScheduler {
    pub fn new(config: &Config) -> Self {
        Self {
            sleep_timer: 0,
            light_threshold: config.light_sleep_ticks(),
            deep_threshold: config.deep_sleep_ticks(),
            light_sleep: false,
            deep_sleep: false,
            wake_to_speak: false,
        }
    }

    /// Current power level, derived from the sleep flags.
    pub fn state(&self) -> PowerState {
        if self.deep_sleep {
            PowerState::DeepSleep
        } else if self.light_sleep {
            PowerState::LightSleep
        } else {
            PowerState::Active
        }
    }

    pub fn sleep_timer(&self) -> u32 {
        self.sleep_timer
    }

    pub fn deep_threshold(&self) -> u32 {
        self.deep_threshold
    }

    pub fn wake_to_speak(&self) -> bool {
        self.wake_to_speak
    }

    pub fn clear_wake_to_speak(&mut self) {
        self.wake_to_speak = false;
    }

    /// Records user-visible activity (a phrase, a track, a button press).
    ///
    /// Restarts the idle count and leaves light sleep; the module itself is
    /// powered up again by the next play request.
    pub fn note_activity(&mut self) {
        self.sleep_timer = 0;
        self.light_sleep = false;
    }

    /// Makes the next evaluation go straight to deep sleep.
    pub fn request_deep_sleep(&mut self) {
        self.sleep_timer = self.deep_threshold;
    }

    /// Applies the sleep thresholds to the current idle count.
    ///
    /// Deep sleep is only ever entered together with (or after) light sleep,
    /// so the module is always off by the time the tick timer is stopped. A
    /// module woken up for a warning beep while asleep is switched off again.
    ///
    /// # Arguments
    ///
    /// * `battery_low` - Supply below the low threshold; deep sleep as soon
    ///   as light sleep is reached
    /// * `module` - Powered down while the idle count is past light sleep
    pub fn evaluate(&mut self, battery_low: bool, module: &mut impl ModulePower) {
        if self.sleep_timer < self.light_threshold {
            return;
        }

        if module.is_powered() {
            module.power_down();
        }

        if !self.light_sleep {
            self.light_sleep = true;

            #[cfg(feature = "debug-mode")]
            defmt::info!("Light sleep after {} idle ticks", self.sleep_timer);
        }

        if self.sleep_timer >= self.deep_threshold || battery_low {
            #[cfg(feature = "debug-mode")]
            {
                if !self.deep_sleep {
                    defmt::info!("Deep sleep (battery low: {})", battery_low);
                }
            }

            self.deep_sleep = true;
        }
    }

    /// Suspends until the next tick, or until the button in deep sleep.
    ///
    /// # Arguments
    ///
    /// * `board` - Provides the low-power wait
    /// * `idle` - No activity happened this tick; counts towards sleep
    ///
    /// # Returns
    ///
    /// The source that woke the processor
    pub async fn wait(&mut self, board: &mut impl Board, idle: bool) -> WakeSource {
        if self.deep_sleep {
            let woke = board.sleep(WakeSource::Button).await;
            self.deep_sleep = false;
            self.wake_to_speak = true;

            #[cfg(feature = "debug-mode")]
            defmt::info!("Woke from deep sleep");

            return woke;
        }

        let woke = board.sleep(WakeSource::Tick).await;
        if idle {
            self.sleep_timer = self.sleep_timer.saturating_add(1);
        }
        woke
    }
}
