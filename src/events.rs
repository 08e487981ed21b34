//! Decides what the toy says each tick.
//!
//! Two behaviours share the same firmware image and are picked once at boot
//! from the number of files on the module:
//!
//! - **Talking toy**: a press speaks a random button phrase, a long press
//!   sends the toy to sleep, and every tick there is a small chance of a
//!   random timed phrase.
//! - **Music box**: every press plays the next track, wrapping after the
//!   last one.

use embedded_hal_async::delay::DelayNs;
use rand::{Rng, RngCore};

use crate::board::Board;
use crate::config::Config;

/// Button poll interval while measuring a press.
const PRESS_POLL_MS: u32 = 10;

/// Pause after the button is released from a long press.
const RELEASE_SETTLE_MS: u32 = 500;

/// Behaviour selected at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
pub enum OperatingMode {
    TalkingToy,
    MusicBox,
}

impl OperatingMode {
    /// Picks the mode from the module's file count.
    ///
    /// An unknown count (feature disabled, no or garbled reply) keeps the
    /// talking toy, which is what the sentinel count selects as well.
    pub fn detect(file_count: Option<u16>, sentinel: u16) -> Self {
        match file_count {
            Some(count) if count != sentinel => Self::MusicBox,
            _ => Self::TalkingToy,
        }
    }
}

/// Outcome of a button event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Play this file
    Play(u16),
    /// Long press in talking-toy mode
    GoToSleep,
}

enum Behavior {
    TalkingToy,
    MusicBox { next_track: u16, track_count: u16 },
}

/// Picks what to play for a button press or a timed roll.
///
/// The operating mode is fixed at construction; music-box mode also keeps
/// the next track number.
pub struct EventSelector {
    behavior: Behavior,
    button_event_max: u16,
    time_event_max: u16,
    speech_odds: u32,
    long_press_ms: u32,
}

impl EventSelector {
    /// Builds the selector for the mode detected from `file_count`.
    pub fn new(file_count: Option<u16>, config: &Config) -> Self {
        let behavior = match (
            OperatingMode::detect(file_count, config.sentinel_file_count()),
            file_count,
        ) {
            (OperatingMode::MusicBox, Some(count)) => Behavior::MusicBox {
                next_track: 1,
                track_count: count,
            },
            _ => Behavior::TalkingToy,
        };

        Self {
            behavior,
            button_event_max: config.button_event_max,
            time_event_max: config.time_event_max,
            speech_odds: config.speech_odds(),
            long_press_ms: config.long_press_ms,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        match self.behavior {
            Behavior::TalkingToy => OperatingMode::TalkingToy,
            Behavior::MusicBox { .. } => OperatingMode::MusicBox,
        }
    }

    /// Track the next music-box press will play.
    pub fn next_track(&self) -> Option<u16> {
        match self.behavior {
            Behavior::TalkingToy => None,
            Behavior::MusicBox { next_track, .. } => Some(next_track),
        }
    }

    /// Handles a button press (or a deep-sleep wake).
    ///
    /// In talking-toy mode the press is measured first; the button may
    /// already be released, which counts as a short press.
    pub async fn button_event(
        &mut self,
        board: &mut impl Board,
        delay: &mut impl DelayNs,
        rng: &mut impl RngCore,
    ) -> Action {
        match &mut self.behavior {
            Behavior::TalkingToy => {
                if held_for(board, delay, self.long_press_ms).await {
                    Action::GoToSleep
                } else {
                    Action::Play(rng.gen_range(1..self.button_event_max))
                }
            }
            Behavior::MusicBox {
                next_track,
                track_count,
            } => {
                let track = *next_track;
                *next_track = if track >= *track_count { 1 } else { track + 1 };
                Action::Play(track)
            }
        }
    }

    /// Rolls the dice for a timed phrase. Talking toy only.
    pub fn timed_event(&self, rng: &mut impl RngCore) -> Option<u16> {
        match self.behavior {
            Behavior::TalkingToy if rng.gen_range(0..self.speech_odds) == 0 => {
                Some(rng.gen_range(self.button_event_max + 1..self.time_event_max))
            }
            _ => None,
        }
    }
}

/// True if the button stays down for at least `limit_ms`.
async fn held_for(board: &mut impl Board, delay: &mut impl DelayNs, limit_ms: u32) -> bool {
    let mut held_ms = 0;
    while board.button_pressed() {
        if held_ms >= limit_ms {
            return true;
        }
        delay.delay_ms(PRESS_POLL_MS).await;
        held_ms += PRESS_POLL_MS;
    }
    false
}

/// Blocks until the button is let go, then lets it settle.
pub async fn wait_for_release(board: &mut impl Board, delay: &mut impl DelayNs) {
    while board.button_pressed() {
        delay.delay_ms(PRESS_POLL_MS).await;
    }
    delay.delay_ms(RELEASE_SETTLE_MS).await;
}
