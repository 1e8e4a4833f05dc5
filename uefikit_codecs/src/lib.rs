//! Codec implementations for the four well-known GUID-defined section
//! wrappers: Brotli, LZMA, LZMA with the x86 branch filter, and zlib.
//!
//! The GUID-to-codec bindings live in [`well_known_registry`]; the core
//! parser only ever sees the injected [`CodecRegistry`].
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::process::Command;

use uefikit_image::codec::CodecRegistry;
use uefikit_pi::Guid;

mod brotli;
mod lzma;
mod lzmax86;
mod zlib;

pub use brotli::SystemBrotli;
pub use lzma::{Lzma, SystemLzma};
pub use lzmax86::LzmaX86;
pub use zlib::Zlib;

/// Brotli-compressed GUID-defined section.
pub const BROTLI_GUID: Guid =
    Guid::from_fields(0x3D532050, 0x5CDA, 0x4FD0, 0x87, 0x9E, &[0x0F, 0x7F, 0x63, 0x0D, 0x5A, 0xFB]);

/// LZMA-compressed GUID-defined section.
pub const LZMA_GUID: Guid =
    Guid::from_fields(0xEE4E5898, 0x3914, 0x4259, 0x9D, 0x6E, &[0xDC, 0x7B, 0xD7, 0x94, 0x03, 0xCF]);

/// LZMA with the x86 branch-call-jump filter applied before compression.
pub const LZMAX86_GUID: Guid =
    Guid::from_fields(0xD42AE6BD, 0x1352, 0x4BFB, 0x90, 0x9A, &[0xCA, 0x72, 0xA6, 0xEA, 0xE8, 0x89]);

/// zlib-compressed GUID-defined section.
pub const ZLIB_GUID: Guid =
    Guid::from_fields(0xCE3233F5, 0x2CD6, 0x4D87, 0x91, 0x52, &[0x4A, 0x23, 0x8B, 0xB6, 0xD1, 0xC4]);

fn command_available(program: &str) -> bool {
    Command::new(program).arg("--version").output().is_ok()
}

/// Build the registry binding the four well-known GUIDs.
///
/// LZMA encoding prefers the system `xz` command when one is reachable (it
/// is faster and produces the parameter set EDK II expects); decoding is
/// always in-process, and the two backends are byte-compatible. Brotli
/// encoding always shells out; brotli decoding is in-process.
pub fn well_known_registry(xz_path: &str, brotli_path: &str) -> CodecRegistry {
    let mut registry = CodecRegistry::new();
    if command_available(xz_path) {
        registry.register(LZMA_GUID, Box::new(SystemLzma::new(xz_path)));
        registry.register(LZMAX86_GUID, Box::new(LzmaX86::new(Box::new(SystemLzma::new(xz_path)))));
    } else {
        registry.register(LZMA_GUID, Box::new(Lzma));
        registry.register(LZMAX86_GUID, Box::new(LzmaX86::new(Box::new(Lzma))));
    }
    registry.register(BROTLI_GUID, Box::new(SystemBrotli::new(brotli_path)));
    registry.register(ZLIB_GUID, Box::new(Zlib));
    registry
}
