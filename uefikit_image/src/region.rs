//! Typed flash regions and the constructor dispatch over the IFD region
//! table.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bios::BiosRegion;
use crate::ctx::ParseContext;
use crate::err::FirmwareError;
use crate::mefpt::MeRegion;
use crate::tree::Firmware;

/// The region table expresses bases and limits in 4 KiB blocks.
pub const REGION_BLOCK_SIZE: u64 = 0x1000;

/// Region slot indices in the IFD region section, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashRegionType {
    Bios,
    Me,
    Gbe,
    Pd,
    DevExp1,
    Bios2,
    Microcode,
    Ec,
    DevExp2,
    Ie,
    Tgbe1,
    Tgbe2,
    Reserved1,
    Reserved2,
    Ptt,
    Unknown,
}

impl FlashRegionType {
    /// Map a region-section slot index to its type.
    pub fn from_index(index: usize) -> Self {
        use FlashRegionType::*;
        match index {
            0 => Bios,
            1 => Me,
            2 => Gbe,
            3 => Pd,
            4 => DevExp1,
            5 => Bios2,
            6 => Microcode,
            7 => Ec,
            8 => DevExp2,
            9 => Ie,
            10 => Tgbe1,
            11 => Tgbe2,
            12 => Reserved1,
            13 => Reserved2,
            14 => Ptt,
            _ => Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        use FlashRegionType::*;
        match self {
            Bios => "BIOS",
            Me => "ME",
            Gbe => "GbE",
            Pd => "PD",
            DevExp1 => "DevExp1",
            Bios2 => "BIOS2",
            Microcode => "Microcode",
            Ec => "EC",
            DevExp2 => "DevExp2",
            Ie => "IE",
            Tgbe1 => "10GbE1",
            Tgbe2 => "10GbE2",
            Reserved1 => "Reserved1",
            Reserved2 => "Reserved2",
            Ptt => "PTT",
            Unknown => "Unknown",
        }
    }
}

impl fmt::Display for FlashRegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One base/limit pair from the region section, in 4 KiB block units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlashRegion {
    pub base: u16,
    pub limit: u16,
}

impl FlashRegion {
    /// A region is in use iff its limit is non-zero, not below the base,
    /// and neither field is the all-ones fill. (Some vendor images report
    /// unused regions as 0xFFFF/0xFFFF rather than a zero limit.)
    pub fn valid(&self) -> bool {
        self.limit > 0 && self.limit >= self.base && self.limit != 0xFFFF && self.base != 0xFFFF
    }

    /// First byte of the region in the flash image.
    pub fn base_offset(&self) -> u32 {
        self.base as u32 * REGION_BLOCK_SIZE as u32
    }

    /// One past the last byte of the region in the flash image.
    pub fn end_offset(&self) -> u32 {
        (self.limit as u32 + 1) * REGION_BLOCK_SIZE as u32
    }
}

impl fmt::Display for FlashRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x}]", self.base, self.limit)
    }
}

/// A region the parser has no interior structure for; the bytes are kept
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawRegion {
    #[serde(skip)]
    pub(crate) buf: Vec<u8>,
    #[serde(default)]
    pub extract_path: String,
    pub f_region: FlashRegion,
    pub region_type: FlashRegionType,
}

impl RawRegion {
    pub fn parse(buf: &[u8], f_region: FlashRegion, region_type: FlashRegionType) -> Self {
        RawRegion { buf: buf.to_vec(), extract_path: String::new(), f_region, region_type }
    }
}

/// Constructor dispatch: BIOS and ME regions get specialized decoders,
/// everything else is retained raw.
pub fn new_region(
    buf: &[u8],
    f_region: FlashRegion,
    region_type: FlashRegionType,
    ctx: &mut ParseContext,
) -> Result<Firmware, FirmwareError> {
    match region_type {
        FlashRegionType::Bios => Ok(Firmware::BiosRegion(BiosRegion::parse(buf, Some(f_region), ctx)?)),
        FlashRegionType::Me => Ok(Firmware::MeRegion(MeRegion::parse(buf, Some(f_region)))),
        _ => Ok(Firmware::RawRegion(RawRegion::parse(buf, f_region, region_type))),
    }
}
