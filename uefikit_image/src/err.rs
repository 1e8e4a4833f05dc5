//! Error definitions for parsing and assembly.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use thiserror::Error;
use uefikit_pi::guid::GuidParseError;
use uefikit_pi::Guid;

use crate::codec::CodecError;

/// Errors surfaced by the parsers, the visitors, and the assembler.
///
/// Non-fatal conditions (unknown compression GUID, a missing ME partition
/// table, a region outside the flash bounds) are reported through the `log`
/// facade instead and parsing continues with the node retained opaquely.
#[derive(Debug, Error)]
pub enum FirmwareError {
    /// Input shorter than a structural minimum.
    #[error("{context}: truncated input, need {need:#x} bytes, have {have:#x}")]
    Truncated { context: &'static str, need: usize, have: usize },

    /// Expected tag not found at its expected offset.
    #[error("{context}: signature not found")]
    BadSignature { context: &'static str },

    /// A computed offset or length escapes its container.
    #[error("{context}: {detail}")]
    OutOfBounds { context: &'static str, detail: String },

    /// A reserved or impossible field value.
    #[error("{context}: {detail}")]
    InvalidField { context: &'static str, detail: String },

    /// A second erase polarity differs from the one already established.
    #[error("erase polarity conflict: already {current:#04x}, requested {requested:#04x}")]
    ErasePolarityConflict { current: u8, requested: u8 },

    /// GUID-defined section with an unknown codec while processing is
    /// required. Usually downgraded to a warning with an opaque body.
    #[error("no codec registered for GUID-defined section {0}")]
    UnsupportedGuidCompression(Guid),

    /// Assembled content exceeds a non-resizable parent.
    #[error("assembled content ({need:#x} bytes) exceeds container ({have:#x} bytes)")]
    AssembleOverflow { need: u64, have: u64 },

    /// Wrapper over a codec's own failure.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Guid(#[from] GuidParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Visitor-level failures (no match found, ambiguous match, bad
    /// pattern).
    #[error("{0}")]
    Other(String),
}
