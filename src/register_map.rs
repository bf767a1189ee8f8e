//! Storage behind the reply bytes.
//!
//! Registers are keyed by [`Register`], so a typed write can never land out of
//! range. Raw-address access is still offered for callers that hold an
//! unchecked wire address; writes to unmapped addresses are silently ignored.

use crate::protocol::Register;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterMap {
    words: [u16; Register::COUNT],
}

impl RegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, register: Register) -> u16 {
        self.words[register.index()]
    }

    pub fn store(&mut self, register: Register, word: u16) {
        self.words[register.index()] = word;
    }

    /// Returns `None` for addresses outside the map.
    pub fn load_raw(&self, address: u16) -> Option<u16> {
        Register::try_from(address).ok().map(|register| self.load(register))
    }

    /// Stores `word` if `address` is mapped, otherwise does nothing.
    /// Returns whether the word was stored.
    pub fn store_raw(&mut self, address: u16, word: u16) -> bool {
        match Register::try_from(address) {
            Ok(register) => {
                self.store(register, word);
                true
            }
            Err(_) => false,
        }
    }
}
