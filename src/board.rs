//! Platform capabilities needed by the core.
//!
//! The interrupt handlers on the target have no body; they only wake the
//! processor. What the core needs to know is which of the two sources fired,
//! and that is what [`Board::sleep`] returns.

/// Interrupt source used to leave a low-power wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "debug-mode", derive(defmt::Format))]
pub enum WakeSource {
    /// Periodic tick timer (one tick is 128 ms)
    Tick,
    /// Pin-change interrupt on the button line
    Button,
}

/// Hardware the tick loop talks to besides the playback module.
pub trait Board {
    /// Suspends the processor until the armed source fires.
    ///
    /// Only `armed` is enabled for the duration of the wait; the returned
    /// value is the source that actually woke the processor.
    async fn sleep(&mut self, armed: WakeSource) -> WakeSource;

    /// True while the (active-low) button is held down.
    fn button_pressed(&mut self) -> bool;

    /// Raw ADC reading of the playback module BUSY line.
    async fn busy_level(&mut self) -> u16;

    /// Raw ADC reading of the internal bandgap reference against VDD.
    async fn supply_raw(&mut self) -> u16;
}
