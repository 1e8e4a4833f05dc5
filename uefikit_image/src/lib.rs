//! Parsing, traversal, and reassembly of Intel SPI flash images carrying
//! UEFI firmware.
//!
//! The entry point for byte input is [`parse_image`], which produces a
//! [`tree::Firmware`] node tree mirroring the on-media layout: flash
//! descriptor, typed regions, firmware volumes, FFS files, and sections.
//! The tree can be walked with any [`tree::Visitor`], serialized to a JSON
//! manifest ([`manifest`]), extracted to a blob store, reloaded, and
//! reassembled byte-for-byte ([`visitors::Assemble`]).
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

pub mod bios;
pub mod codec;
pub mod ctx;
pub mod descriptor;
pub mod err;
pub mod file;
pub mod flash;
pub mod manifest;
pub mod mefpt;
pub mod nvar;
pub mod region;
pub mod section;
pub mod tree;
pub mod visitors;
pub mod volume;

pub use ctx::ParseContext;
pub use err::FirmwareError;
pub use tree::{Firmware, Visitor};

use bios::BiosRegion;
use flash::FlashImage;

/// Parse a byte image into a firmware tree.
///
/// A buffer that carries the Intel flash descriptor signature is decoded as
/// a full [`FlashImage`]; otherwise, if a firmware volume signature can be
/// located, the buffer is treated as a bare BIOS region blob.
pub fn parse_image(data: &[u8], ctx: &mut ParseContext) -> Result<Firmware, FirmwareError> {
    if descriptor::find_signature(data).is_ok() {
        return Ok(Firmware::FlashImage(FlashImage::parse(data, ctx)?));
    }
    if bios::find_firmware_volume_offset(data).is_some() {
        return Ok(Firmware::BiosRegion(BiosRegion::parse(data, None, ctx)?));
    }
    Err(FirmwareError::BadSignature { context: "image" })
}
