//! Machine configuration.

use format_elf::SymbolTable;

/// Configuration for creating a [`crate::Machine`].
pub struct MachineConfig {
    /// Raw guest image, copied verbatim to the reset vector.
    pub img: Vec<u8>,
    /// Function symbols for the call tracer, if an ELF companion was found.
    pub symbols: Option<SymbolTable>,
    /// Keep guest serial output off the host console (tests).
    pub silent_serial: bool,
}

impl MachineConfig {
    #[must_use]
    pub fn new(img: Vec<u8>) -> Self {
        Self {
            img,
            symbols: None,
            silent_serial: false,
        }
    }

    #[must_use]
    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = Some(symbols);
        self
    }

    /// A silent machine whose image is the given instruction words.
    #[must_use]
    pub fn for_tests(words: &[u32]) -> Self {
        let mut img = Vec::with_capacity(words.len() * 4);
        for w in words {
            img.extend_from_slice(&w.to_le_bytes());
        }
        Self {
            img,
            symbols: None,
            silent_serial: true,
        }
    }
}
