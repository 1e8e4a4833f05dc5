//! BIOS region decoding: locating firmware volumes by signature scan and
//! retaining the padding between them.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use serde::{Deserialize, Serialize};

use crate::ctx::ParseContext;
use crate::err::FirmwareError;
use crate::region::{FlashRegion, FlashRegionType};
use crate::tree::Firmware;
use crate::volume::FirmwareVolume;

use uefikit_pi::fw_fs::fv;

/// Scan for a firmware volume signature at 8-byte alignment, starting at
/// offset 32 (a volume's signature sits 40 bytes in, past the zero vector,
/// filesystem GUID, and length). Returns the offset of the volume start.
pub fn find_firmware_volume_offset(data: &[u8]) -> Option<usize> {
    if data.len() < fv::SIGNATURE_OFFSET + 4 {
        return None;
    }
    let signature = fv::SIGNATURE.to_le_bytes();
    let mut offset = 32;
    while offset + 4 <= data.len() {
        if data[offset..offset + 4] == signature && offset >= fv::SIGNATURE_OFFSET {
            return Some(offset - fv::SIGNATURE_OFFSET);
        }
        offset += 8;
    }
    None
}

/// Bytes between firmware volumes. These should be erased flash but
/// sometimes carry data, so they are preserved verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BiosPadding {
    #[serde(skip)]
    pub(crate) buf: Vec<u8>,
    pub offset: u64,
    #[serde(default)]
    pub extract_path: String,
}

impl BiosPadding {
    pub fn new(buf: &[u8], offset: u64) -> Self {
        BiosPadding { buf: buf.to_vec(), offset, extract_path: String::new() }
    }
}

/// The BIOS region node: an ordered list of firmware volumes and the
/// padding between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BiosRegion {
    #[serde(skip)]
    pub(crate) buf: Vec<u8>,
    #[serde(default)]
    pub elements: Vec<Firmware>,
    #[serde(default)]
    pub extract_path: String,
    pub length: u64,
    pub f_region: Option<FlashRegion>,
    pub region_type: FlashRegionType,
}

impl BiosRegion {
    /// Decode a BIOS region by scanning for firmware volumes. Top-level
    /// volumes are not resizable; their length is pinned by the region
    /// layout.
    pub fn parse(
        buf: &[u8],
        f_region: Option<FlashRegion>,
        ctx: &mut ParseContext,
    ) -> Result<Self, FirmwareError> {
        let mut region = BiosRegion {
            buf: buf.to_vec(),
            elements: Vec::new(),
            extract_path: String::new(),
            length: buf.len() as u64,
            f_region,
            region_type: FlashRegionType::Bios,
        };

        let mut rest = buf;
        let mut abs_offset = 0u64;
        loop {
            let Some(offset) = find_firmware_volume_offset(rest) else {
                // No more volumes. Keep whatever trails as padding.
                if !rest.is_empty() {
                    region.elements.push(Firmware::BiosPadding(BiosPadding::new(rest, abs_offset)));
                }
                break;
            };
            if offset > 0 {
                region
                    .elements
                    .push(Firmware::BiosPadding(BiosPadding::new(&rest[..offset], abs_offset)));
            }
            abs_offset += offset as u64;
            let volume = FirmwareVolume::parse(&rest[offset..], abs_offset, false, ctx)?;
            if volume.length == 0 {
                return Err(FirmwareError::InvalidField {
                    context: "BIOS region",
                    detail: format!("firmware volume at {abs_offset:#x} has zero length"),
                });
            }
            abs_offset += volume.length;
            rest = &rest[offset + volume.length as usize..];
            region.elements.push(Firmware::FirmwareVolume(volume));
        }
        Ok(region)
    }

    /// The first firmware volume in the region, if any.
    pub fn first_fv(&self) -> Option<&FirmwareVolume> {
        self.elements.iter().find_map(|element| match element {
            Firmware::FirmwareVolume(volume) => Some(volume),
            _ => None,
        })
    }
}
