//! Shared parse state: the erase polarity and the injected codec registry.
//!
//! The polarity is discovered from the first firmware volume's attributes
//! and must stay fixed for the rest of the parse or assembly; a second
//! volume that disagrees is a fatal error.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use crate::codec::CodecRegistry;
use crate::err::FirmwareError;

/// Context threaded by reference through parsing and assembly.
pub struct ParseContext<'a> {
    erase_polarity: u8,
    polarity_set: bool,
    codecs: &'a CodecRegistry,
}

impl<'a> ParseContext<'a> {
    /// A fresh context with no polarity established yet.
    pub fn new(codecs: &'a CodecRegistry) -> Self {
        Self { erase_polarity: 0xFF, polarity_set: false, codecs }
    }

    /// Establish the erase polarity. The first caller wins; later callers
    /// must agree.
    pub fn set_erase_polarity(&mut self, polarity: u8) -> Result<(), FirmwareError> {
        if polarity != 0x00 && polarity != 0xFF {
            return Err(FirmwareError::InvalidField {
                context: "erase polarity",
                detail: format!("must be 0x00 or 0xFF, got {polarity:#04x}"),
            });
        }
        if self.polarity_set && self.erase_polarity != polarity {
            return Err(FirmwareError::ErasePolarityConflict {
                current: self.erase_polarity,
                requested: polarity,
            });
        }
        self.erase_polarity = polarity;
        self.polarity_set = true;
        Ok(())
    }

    /// The fill byte for padding and free space. Defaults to `0xFF` until a
    /// volume establishes it.
    pub fn erase_polarity(&self) -> u8 {
        self.erase_polarity
    }

    /// The injected GUID-to-codec table.
    pub fn codecs(&self) -> &CodecRegistry {
        self.codecs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_caller_wins() {
        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        ctx.set_erase_polarity(0x00).unwrap();
        ctx.set_erase_polarity(0x00).unwrap();
        assert_eq!(ctx.erase_polarity(), 0x00);
    }

    #[test]
    fn conflicting_polarity_is_fatal() {
        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        ctx.set_erase_polarity(0xFF).unwrap();
        assert!(matches!(
            ctx.set_erase_polarity(0x00),
            Err(FirmwareError::ErasePolarityConflict { current: 0xFF, requested: 0x00 })
        ));
    }

    #[test]
    fn rejects_nonsense_polarity() {
        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        assert!(ctx.set_erase_polarity(0x42).is_err());
    }
}
