//! Boot sequence and main tick loop.
//!
//! # Boot
//!
//! 1. Power up and configure the playback module
//! 2. Ask it for its file count and pick the operating mode
//! 3. Advance the EEPROM boot counter and seed the random generator
//! 4. Play the startup beep (talking toy only)
//!
//! # Tick
//!
//! 1. Button / wake-to-speak event, then the timed speech roll
//! 2. Battery sample when due
//! 3. Sleep thresholds
//! 4. Low-power wait until the next tick (or the button in deep sleep)
//!
//! All state lives in [`App`] and is only ever touched from this loop.

use embedded_hal::digital::v2::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_storage::Storage;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::battery::{BatteryLevel, BatteryMonitor};
use crate::board::{Board, WakeSource};
use crate::config::Config;
use crate::events::{self, Action, EventSelector, OperatingMode};
use crate::jq8400::{Jq8400, SerialLink};
use crate::power::{PowerScheduler, PowerState};
use crate::seed_store::SeedStore;

/// Application state owned by the main loop.
///
/// Everything the firmware remembers between ticks lives here: the player,
/// the sleep scheduler, the event selector, the battery monitor and the
/// random generator.
pub struct App<S, P, D> {
    config: Config,
    player: Jq8400<S, P, D>,
    /// Delay for button measurement, separate from the player's
    delay: D,
    scheduler: PowerScheduler,
    selector: EventSelector,
    /// `None` when the battery monitor is configured out
    battery: Option<BatteryMonitor>,
    rng: SmallRng,
}

impl<S, P, D> App<S, P, D>
where
    S: SerialLink,
    P: OutputPin,
    D: DelayNs,
{
    /// Runs the boot sequence and returns the ready-to-tick application.
    ///
    /// # Arguments
    ///
    /// * `config` - Build-time configuration
    /// * `player` - Playback module driver, not yet initialized
    /// * `delay` - Delay used outside the player
    /// * `board` - Wake sources and analog inputs
    /// * `storage` - EEPROM holding the seed record
    pub async fn boot(
        config: Config,
        mut player: Jq8400<S, P, D>,
        delay: D,
        board: &mut impl Board,
        storage: impl Storage,
    ) -> Self {
        if player.initialize().await.is_err() {
            #[cfg(feature = "debug-mode")]
            defmt::warn!("JQ8400 initialization failed");
        }

        let file_count = if config.count_files {
            player.count_files().await.ok().flatten()
        } else {
            None
        };
        let selector = EventSelector::new(file_count, &config);

        #[cfg(feature = "debug-mode")]
        defmt::info!("File count {}, mode {}", file_count, selector.mode());

        let seed = match SeedStore::new(storage).read_and_advance_seed() {
            Ok(seed) => seed,
            Err(_) => {
                #[cfg(feature = "debug-mode")]
                defmt::warn!("Seed store unavailable, using seed 0");
                0
            }
        };

        #[cfg(feature = "debug-mode")]
        defmt::info!("Random seed {}", seed);

        let mut app = Self {
            config,
            player,
            delay,
            scheduler: PowerScheduler::new(&config),
            selector,
            battery: config.battery_monitor.then(|| BatteryMonitor::new(&config)),
            rng: SmallRng::seed_from_u64(u64::from(seed)),
        };

        if config.startup_beep && app.selector.mode() == OperatingMode::TalkingToy {
            app.speak(config.startup_beep_file(), board).await;
        }

        app
    }

    pub fn mode(&self) -> OperatingMode {
        self.selector.mode()
    }

    pub fn power_state(&self) -> PowerState {
        self.scheduler.state()
    }

    pub fn sleep_timer(&self) -> u32 {
        self.scheduler.sleep_timer()
    }

    pub fn battery_low(&self) -> bool {
        self.battery.as_ref().is_some_and(BatteryMonitor::is_low)
    }

    async fn speak(&mut self, file: u16, board: &mut impl Board) {
        if self.player.play(file, board).await.is_err() {
            #[cfg(feature = "debug-mode")]
            defmt::warn!("Playing file {} failed", file);
        }
    }

    /// Runs one tick and returns what ended its low-power wait.
    pub async fn tick(&mut self, board: &mut impl Board) -> WakeSource {
        let mut active = false;
        let mut going_to_sleep = false;

        if !self.battery_low() {
            if board.button_pressed() || self.scheduler.wake_to_speak() {
                self.scheduler.clear_wake_to_speak();
                let action = self
                    .selector
                    .button_event(board, &mut self.delay, &mut self.rng)
                    .await;
                match action {
                    Action::Play(file) => {
                        self.speak(file, board).await;
                        active = true;
                    }
                    Action::GoToSleep => {
                        #[cfg(feature = "debug-mode")]
                        defmt::info!("Long press, going to sleep");

                        self.scheduler.request_deep_sleep();
                        self.speak(self.config.sleep_phrase(), board).await;
                        events::wait_for_release(board, &mut self.delay).await;
                        going_to_sleep = true;
                    }
                }
            }

            if !going_to_sleep {
                if let Some(file) = self.selector.timed_event(&mut self.rng) {
                    self.speak(file, board).await;
                    active = true;
                }
            }
        }

        if active {
            self.scheduler.note_activity();
        }

        let level = match self.battery.as_mut() {
            Some(monitor) => monitor.poll(board).await,
            None => None,
        };
        if level == Some(BatteryLevel::Warning) {
            self.speak(self.config.startup_beep_file(), board).await;
        }

        let battery_low = self.battery_low();
        self.scheduler.evaluate(battery_low, &mut self.player);

        let woke = self.scheduler.wait(board, !active).await;
        if woke == WakeSource::Button {
            if let Some(monitor) = self.battery.as_mut() {
                monitor.sample_next_tick();
            }
        }
        woke
    }

    /// Ticks forever.
    pub async fn run(mut self, board: &mut impl Board) -> ! {
        loop {
            self.tick(board).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TICKS_PER_MINUTE;
    use crate::jq8400::{self, checksum, opcode};
    use crate::testing::{
        Clock, HEALTHY_SUPPLY_RAW, MemStorage, MockBoard, MockDelay, MockPin, MockSerial,
    };
    use embassy_futures::block_on;

    type TestApp = App<MockSerial, MockPin, MockDelay>;

    struct Rig {
        clock: Clock,
        board: MockBoard,
        serial: MockSerial,
        power: MockPin,
    }

    impl Rig {
        fn new() -> Self {
            let clock = Clock::default();
            Self {
                board: MockBoard::new(&clock),
                clock,
                serial: MockSerial::default(),
                power: MockPin::default(),
            }
        }

        fn reply_file_count(&self, count: u16) {
            let [high, low] = count.to_be_bytes();
            let mut reply = [jq8400::START, opcode::COUNT_FILES, 0x02, high, low, 0];
            reply[5] = checksum(&reply[..5]);
            self.serial.respond(&reply);
        }

        fn boot(&mut self, config: Config) -> TestApp {
            let player = Jq8400::new(
                self.serial.clone(),
                self.power.clone(),
                MockDelay::new(&self.clock),
                config.volume,
                config.busy_threshold,
            );
            block_on(App::boot(
                config,
                player,
                MockDelay::new(&self.clock),
                &mut self.board,
                MemStorage::<64>::erased(0xFF),
            ))
        }

        fn plays(&self) -> Vec<u16> {
            self.serial
                .written()
                .windows(6)
                .filter(|w| w[..3] == [jq8400::START, opcode::PLAY_FILE, 0x02])
                .map(|w| u16::from_be_bytes([w[3], w[4]]))
                .collect()
        }
    }

    /// Timed speech made practically impossible so idle runs stay idle.
    fn quiet_config() -> Config {
        Config {
            speech_interval_minutes: 100_000,
            ..Config::DEFAULT
        }
    }

    #[test]
    fn sentinel_count_boots_talking_toy_with_beep() {
        let config = quiet_config();
        let mut rig = Rig::new();
        rig.reply_file_count(config.sentinel_file_count());

        let app = rig.boot(config);

        assert_eq!(app.mode(), OperatingMode::TalkingToy);
        assert_eq!(rig.plays(), vec![config.startup_beep_file()]);
        assert_eq!(app.power_state(), PowerState::Active);
        assert!(rig.power.is_high());
    }

    #[test]
    fn other_count_boots_music_box_without_beep() {
        let mut rig = Rig::new();
        rig.reply_file_count(3);

        let mut app = rig.boot(quiet_config());
        assert_eq!(app.mode(), OperatingMode::MusicBox);
        assert!(rig.plays().is_empty());

        for _ in 0..4 {
            rig.board.hold_button(50);
            block_on(app.tick(&mut rig.board));
        }
        assert_eq!(rig.plays(), vec![1, 2, 3, 1]);
        assert_eq!(app.sleep_timer(), 0);
    }

    #[test]
    fn disabled_file_count_stays_talking_toy() {
        let mut rig = Rig::new();
        rig.reply_file_count(3);

        let app = rig.boot(Config {
            count_files: false,
            ..quiet_config()
        });
        assert_eq!(app.mode(), OperatingMode::TalkingToy);
    }

    #[test]
    fn press_speaks_and_resets_sleep_timer() {
        let config = quiet_config();
        let mut rig = Rig::new();
        let mut app = rig.boot(config);
        rig.serial.clear();

        for _ in 0..10 {
            block_on(app.tick(&mut rig.board));
        }
        assert_eq!(app.sleep_timer(), 10);

        rig.board.hold_button(100);
        block_on(app.tick(&mut rig.board));

        let plays = rig.plays();
        assert_eq!(plays.len(), 1);
        assert!((1..config.button_event_max).contains(&plays[0]));
        assert_eq!(app.sleep_timer(), 0);
    }

    #[test]
    fn timed_phrase_resets_sleep_timer() {
        let config = Config {
            speech_interval_minutes: 1,
            ..Config::DEFAULT
        };
        let mut rig = Rig::new();
        let mut app = rig.boot(config);

        let mut spoke = None;
        for _ in 0..3_000 {
            rig.serial.clear();
            let idle_before = app.sleep_timer();
            block_on(app.tick(&mut rig.board));
            if let Some(&file) = rig.plays().first() {
                if idle_before > 0 {
                    spoke = Some(file);
                    break;
                }
            }
        }

        let file = spoke.expect("no timed phrase in 3000 ticks");
        assert!(file > config.button_event_max && file < config.time_event_max);
        assert_eq!(app.sleep_timer(), 0);
        assert_eq!(app.power_state(), PowerState::Active);
    }

    #[test]
    fn idle_toy_powers_module_down_then_sleeps_deep() {
        let config = Config {
            deep_sleep_minutes: 2,
            ..quiet_config()
        };
        let mut rig = Rig::new();
        let mut app = rig.boot(config);

        for _ in 0..config.light_sleep_ticks() {
            assert_eq!(block_on(app.tick(&mut rig.board)), WakeSource::Tick);
        }
        block_on(app.tick(&mut rig.board));
        assert_eq!(app.power_state(), PowerState::LightSleep);
        assert!(!rig.power.is_high());
        assert!(!rig.serial.is_enabled());

        let woke = (0..2 * TICKS_PER_MINUTE)
            .map(|_| block_on(app.tick(&mut rig.board)))
            .find(|woke| *woke == WakeSource::Button);
        assert_eq!(woke, Some(WakeSource::Button));

        // The wake speaks straight away without a new press.
        rig.serial.clear();
        block_on(app.tick(&mut rig.board));
        assert_eq!(rig.plays().len(), 1);
        assert_eq!(app.sleep_timer(), 0);
        assert_eq!(app.power_state(), PowerState::Active);
    }

    #[test]
    fn long_press_announces_sleep_and_sleeps_deep() {
        let config = quiet_config();
        let mut rig = Rig::new();
        let mut app = rig.boot(config);
        rig.serial.clear();

        rig.board.hold_button(u64::from(config.long_press_ms) + 1_000);
        let woke = block_on(app.tick(&mut rig.board));

        assert_eq!(rig.plays(), vec![config.sleep_phrase()]);
        assert!(!rig.board.button_pressed());
        assert_eq!(app.sleep_timer(), config.deep_sleep_ticks());
        assert_eq!(woke, WakeSource::Button);
        assert_eq!(rig.board.sleeps.last(), Some(&WakeSource::Button));
        assert!(!rig.power.is_high());
    }

    #[test]
    fn low_battery_silences_presses_until_recovery() {
        let config = quiet_config();
        let mut rig = Rig::new();
        let mut app = rig.boot(config);

        rig.board.supply_raw = 1_671; // 3.0 V
        let mut ticks = 0;
        while !app.battery_low() {
            block_on(app.tick(&mut rig.board));
            ticks += 1;
            assert!(ticks <= 2 * TICKS_PER_MINUTE);
        }
        // Low battery forces deep sleep as soon as light sleep is reached.
        assert_eq!(rig.board.sleeps.last(), Some(&WakeSource::Button));

        rig.serial.clear();
        for _ in 0..3 {
            rig.board.hold_button(200);
            block_on(app.tick(&mut rig.board));
        }
        assert!(rig.serial.written().is_empty());
        assert!(app.battery_low());

        rig.board.supply_raw = HEALTHY_SUPPLY_RAW;
        block_on(app.tick(&mut rig.board));
        assert!(!app.battery_low());

        rig.board.hold_button(200);
        block_on(app.tick(&mut rig.board));
        assert_eq!(rig.plays().len(), 1);
    }

    #[test]
    fn warning_level_beeps_and_switches_module_off_again() {
        let config = quiet_config();
        let mut rig = Rig::new();
        let mut app = rig.boot(config);

        for _ in 0..=TICKS_PER_MINUTE {
            block_on(app.tick(&mut rig.board));
        }
        assert_eq!(app.power_state(), PowerState::LightSleep);
        assert!(!rig.power.is_high());
        rig.serial.clear();

        rig.board.supply_raw = 1_474; // 3.4 V
        for _ in 0..=TICKS_PER_MINUTE {
            block_on(app.tick(&mut rig.board));
        }

        assert_eq!(rig.plays(), vec![config.startup_beep_file()]);
        assert!(!app.battery_low());
        assert_eq!(rig.power.rising_edges(), 2);
        assert!(!rig.power.is_high());
        assert_eq!(app.power_state(), PowerState::LightSleep);
    }

    #[test]
    fn boot_without_battery_monitor_never_goes_low() {
        let mut rig = Rig::new();
        let mut app = rig.boot(Config {
            battery_monitor: false,
            ..quiet_config()
        });
        rig.board.supply_raw = 1_671;

        for _ in 0..=TICKS_PER_MINUTE {
            block_on(app.tick(&mut rig.board));
        }
        assert!(!app.battery_low());
    }
}
