//! Wear-levelled boot counter used to seed the random generator.
//!
//! # Layout
//!
//! ```text
//! word 0        address of the current seed record (u16, little endian)
//! word @addr    seed value (u16, little endian)
//! ```
//!
//! Each boot bumps the seed by one. Once a record has been written more than
//! [`SEED_ROLLOVER`] times the record moves one word further, so no single
//! EEPROM cell sees more than roughly a thousand writes. The record address
//! wraps back to [`BASE_ADDRESS`] at the end of the store.

use embedded_storage::Storage;

/// First address a seed record may live at (word 0 is the pointer).
pub const BASE_ADDRESS: u16 = 2;

/// Width of one record, also the stride between records.
pub const RECORD_STRIDE: u16 = 2;

/// A stored seed above this moves the record to the next address.
pub const SEED_ROLLOVER: u16 = 900;

const POINTER_ADDRESS: u32 = 0;

/// Seed counter on top of any byte-addressable durable store.
pub struct SeedStore<S> {
    storage: S,
}

impl<S: Storage> SeedStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Highest address a record may start at.
    fn last_address(&self) -> u16 {
        let capacity = self.storage.capacity().min(usize::from(u16::MAX));
        capacity.saturating_sub(3) as u16
    }

    fn is_valid_address(&self, address: u16) -> bool {
        (BASE_ADDRESS..=self.last_address()).contains(&address)
    }

    fn read_word(&mut self, address: u32) -> Result<u16, S::Error> {
        let mut bytes = [0u8; 2];
        self.storage.read(address, &mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn write_word(&mut self, address: u32, value: u16) -> Result<(), S::Error> {
        self.storage.write(address, &value.to_le_bytes())
    }

    /// Current record address, reinitializing the store if it is invalid.
    pub fn record_address(&mut self) -> Result<u16, S::Error> {
        let address = self.read_word(POINTER_ADDRESS)?;
        if self.is_valid_address(address) {
            return Ok(address);
        }

        #[cfg(feature = "debug-mode")]
        defmt::info!("Seed record pointer {} invalid, reinitializing", address);

        self.write_word(u32::from(BASE_ADDRESS), 0)?;
        self.write_word(POINTER_ADDRESS, BASE_ADDRESS)?;
        Ok(BASE_ADDRESS)
    }

    /// Advances the boot counter and returns the new seed.
    ///
    /// The returned value is never zero. Storage is left pointing at the
    /// record that holds the returned seed.
    pub fn read_and_advance_seed(&mut self) -> Result<u16, S::Error> {
        let mut address = self.record_address()?;
        let mut seed = self.read_word(u32::from(address))?;

        if seed > SEED_ROLLOVER {
            address += RECORD_STRIDE;
            if address > self.last_address() {
                address = BASE_ADDRESS;
            }
            seed = 0;

            #[cfg(feature = "debug-mode")]
            defmt::info!("Seed record moved to {}", address);
        }

        seed += 1;
        self.write_word(u32::from(address), seed)?;
        self.write_word(POINTER_ADDRESS, address)?;
        Ok(seed)
    }

    pub fn release(self) -> S {
        self.storage
    }
}
