//! Intel Flash Descriptor (IFD) decoding: signature search, descriptor
//! map, region section, and master section.
//!
//! The descriptor is the 4 KiB block at the start of a descriptor-mode SPI
//! image. PCH platforms reserve the first 16 bytes and place the signature
//! at offset 16; older ICH platforms place it at offset 0. The descriptor
//! map follows the signature either way.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use serde::{Deserialize, Serialize};

use crate::err::FirmwareError;
use crate::region::FlashRegion;

/// The byte sequence a descriptor-mode flash image carries.
pub const FLASH_SIGNATURE: [u8; 4] = [0x5A, 0xA5, 0xF0, 0x0F];

/// Size of the descriptor region.
pub const FLASH_DESCRIPTOR_LENGTH: usize = 0x1000;

/// Size of the descriptor map (FLMAP0..FLMAP3).
pub const DESCRIPTOR_MAP_SIZE: usize = 16;

/// Size of the region section: 15 base/limit pairs behind one reserved
/// word pair.
pub const REGION_SECTION_SIZE: usize = 64;

/// Number of region slots in the region section.
pub const REGION_COUNT: usize = 15;

/// Size of the master section: read/write permissions for BIOS, ME, GbE.
pub const MASTER_SECTION_SIZE: usize = 12;

/// Search for the flash signature. Returns the offset immediately after it
/// (20 for PCH images, 4 for older ICH images), which is where the
/// descriptor map starts.
pub fn find_signature(buf: &[u8]) -> Result<usize, FirmwareError> {
    if buf.len() < 20 {
        return Err(FirmwareError::Truncated { context: "flash descriptor", need: 20, have: buf.len() });
    }
    if buf[16..20] == FLASH_SIGNATURE {
        return Ok(20);
    }
    if buf[..4] == FLASH_SIGNATURE {
        return Ok(4);
    }
    Err(FirmwareError::BadSignature { context: "flash descriptor" })
}

/// The FLMAP words: base indices (in units of 16 bytes) and entry counts
/// for the sections laid out in the descriptor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescriptorMap {
    // FLMAP0
    pub component_base: u8,
    pub number_of_flash_chips: u8,
    pub region_base: u8,
    pub number_of_regions: u8,
    // FLMAP1
    pub master_base: u8,
    pub number_of_masters: u8,
    pub pch_straps_base: u8,
    pub number_of_pch_straps: u8,
    // FLMAP2
    pub proc_straps_base: u8,
    pub number_of_proc_straps: u8,
    pub icc_table_base: u8,
    pub number_of_icc_table_entries: u8,
    // FLMAP3
    pub dmi_table_base: u8,
    pub number_of_dmi_table_entries: u8,
    pub reserved0: u8,
    pub reserved1: u8,
}

impl DescriptorMap {
    pub fn parse(buf: &[u8]) -> Result<Self, FirmwareError> {
        if buf.len() < DESCRIPTOR_MAP_SIZE {
            return Err(FirmwareError::Truncated {
                context: "descriptor map",
                need: DESCRIPTOR_MAP_SIZE,
                have: buf.len(),
            });
        }
        Ok(DescriptorMap {
            component_base: buf[0],
            number_of_flash_chips: buf[1],
            region_base: buf[2],
            number_of_regions: buf[3],
            master_base: buf[4],
            number_of_masters: buf[5],
            pch_straps_base: buf[6],
            number_of_pch_straps: buf[7],
            proc_straps_base: buf[8],
            number_of_proc_straps: buf[9],
            icc_table_base: buf[10],
            number_of_icc_table_entries: buf[11],
            dmi_table_base: buf[12],
            number_of_dmi_table_entries: buf[13],
            reserved0: buf[14],
            reserved1: buf[15],
        })
    }
}

/// The 15 region base/limit pairs, one per [`crate::region::FlashRegionType`]
/// index.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegionSection {
    pub flash_block_erase_size: u16,
    pub flash_regions: [FlashRegion; REGION_COUNT],
}

impl RegionSection {
    pub fn parse(buf: &[u8]) -> Result<Self, FirmwareError> {
        if buf.len() < REGION_SECTION_SIZE {
            return Err(FirmwareError::Truncated {
                context: "flash region section",
                need: REGION_SECTION_SIZE,
                have: buf.len(),
            });
        }
        let flash_block_erase_size = u16::from_le_bytes([buf[2], buf[3]]);
        let mut flash_regions = [FlashRegion::default(); REGION_COUNT];
        for (i, region) in flash_regions.iter_mut().enumerate() {
            let off = 4 + i * 4;
            region.base = u16::from_le_bytes([buf[off], buf[off + 1]]);
            region.limit = u16::from_le_bytes([buf[off + 2], buf[off + 3]]);
        }
        Ok(RegionSection { flash_block_erase_size, flash_regions })
    }
}

/// Read/write permissions one flash master holds over the others.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegionPermissions {
    pub id: u16,
    pub read: u8,
    pub write: u8,
}

/// Master section: the permission records for the BIOS, ME, and GbE
/// masters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MasterSection {
    pub bios: RegionPermissions,
    pub me: RegionPermissions,
    pub gbe: RegionPermissions,
}

impl MasterSection {
    pub fn parse(buf: &[u8]) -> Result<Self, FirmwareError> {
        if buf.len() < MASTER_SECTION_SIZE {
            return Err(FirmwareError::Truncated {
                context: "flash master section",
                need: MASTER_SECTION_SIZE,
                have: buf.len(),
            });
        }
        let read_one = |off: usize| RegionPermissions {
            id: u16::from_le_bytes([buf[off], buf[off + 1]]),
            read: buf[off + 2],
            write: buf[off + 3],
        };
        Ok(MasterSection { bios: read_one(0), me: read_one(4), gbe: read_one(8) })
    }
}

/// The parsed flash descriptor node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlashDescriptor {
    #[serde(skip)]
    pub(crate) buf: Vec<u8>,
    pub descriptor_map_start: u32,
    pub region_start: u32,
    pub master_start: u32,
    pub descriptor_map: Option<DescriptorMap>,
    pub region: Option<RegionSection>,
    pub master: Option<MasterSection>,
    #[serde(default)]
    pub extract_path: String,
}

impl FlashDescriptor {
    /// Decode the first 4096 bytes of a descriptor-mode image.
    pub fn parse(buf: &[u8]) -> Result<Self, FirmwareError> {
        if buf.len() != FLASH_DESCRIPTOR_LENGTH {
            return Err(FirmwareError::InvalidField {
                context: "flash descriptor",
                detail: format!("length is {:#x}, not {FLASH_DESCRIPTOR_LENGTH:#x}", buf.len()),
            });
        }

        let descriptor_map_start = find_signature(buf)?;
        let descriptor_map = DescriptorMap::parse(&buf[descriptor_map_start..])?;

        let region_start = descriptor_map.region_base as usize * 0x10;
        let region_end = region_start + REGION_SECTION_SIZE;
        if region_start >= buf.len() || region_end > buf.len() {
            return Err(FirmwareError::OutOfBounds {
                context: "flash descriptor",
                detail: format!(
                    "region section range [{region_start:#x}:{region_end:#x}] escapes descriptor of {:#x} bytes",
                    buf.len()
                ),
            });
        }
        let region = RegionSection::parse(&buf[region_start..region_end])?;

        let master_start = descriptor_map.master_base as usize * 0x10;
        let master_end = master_start + MASTER_SECTION_SIZE;
        if master_end > buf.len() {
            return Err(FirmwareError::OutOfBounds {
                context: "flash descriptor",
                detail: format!("master section at {master_start:#x} escapes descriptor"),
            });
        }
        let master = MasterSection::parse(&buf[master_start..master_end])?;

        Ok(FlashDescriptor {
            buf: buf.to_vec(),
            descriptor_map_start: descriptor_map_start as u32,
            region_start: region_start as u32,
            master_start: master_start as u32,
            descriptor_map: Some(descriptor_map),
            region: Some(region),
            master: Some(master),
            extract_path: String::new(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A descriptor with the PCH signature, region section at 0x40, and
    /// master section at 0x80. Region slots are filled by the caller.
    pub(crate) fn build_descriptor(regions: &[(usize, u16, u16)]) -> Vec<u8> {
        let mut buf = vec![0u8; FLASH_DESCRIPTOR_LENGTH];
        buf[16..20].copy_from_slice(&FLASH_SIGNATURE);
        // FLMAP0: region base 0x40 / 16 = 4, counts left zero
        buf[20 + 2] = 0x04;
        // FLMAP1: master base 0x80 / 16 = 8
        buf[24] = 0x08;
        // unused region slots read as invalid
        for slot in buf[0x40..0x40 + REGION_SECTION_SIZE].iter_mut() {
            *slot = 0xFF;
        }
        buf[0x40..0x44].copy_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        for &(index, base, limit) in regions {
            let off = 0x44 + index * 4;
            buf[off..off + 2].copy_from_slice(&base.to_le_bytes());
            buf[off + 2..off + 4].copy_from_slice(&limit.to_le_bytes());
        }
        buf
    }

    #[test]
    fn pch_signature_at_offset_16() {
        let mut buf = vec![0u8; FLASH_DESCRIPTOR_LENGTH];
        buf[16..20].copy_from_slice(&FLASH_SIGNATURE);
        assert_eq!(find_signature(&buf).unwrap(), 20);
    }

    #[test]
    fn ich_signature_at_offset_0() {
        let mut buf = vec![0u8; FLASH_DESCRIPTOR_LENGTH];
        buf[..4].copy_from_slice(&FLASH_SIGNATURE);
        assert_eq!(find_signature(&buf).unwrap(), 4);
    }

    #[test]
    fn missing_signature() {
        assert!(matches!(
            find_signature(&[0u8; 64]),
            Err(FirmwareError::BadSignature { .. })
        ));
        assert!(matches!(
            find_signature(&[0u8; 8]),
            Err(FirmwareError::Truncated { .. })
        ));
    }

    #[test]
    fn parses_regions_and_master() {
        // BIOS at blocks [1, 2], ME at blocks [3, 3]
        let buf = build_descriptor(&[(0, 1, 2), (1, 3, 3)]);
        let fd = FlashDescriptor::parse(&buf).unwrap();
        assert_eq!(fd.descriptor_map_start, 20);
        assert_eq!(fd.region_start, 0x40);
        assert_eq!(fd.master_start, 0x80);
        let region = fd.region.unwrap();
        let bios = region.flash_regions[0];
        assert!(bios.valid());
        assert_eq!(bios.base_offset(), 0x1000);
        assert_eq!(bios.end_offset(), 0x3000);
        let me = region.flash_regions[1];
        assert!(me.valid());
        // slots never written stay invalid
        assert!(!region.flash_regions[5].valid());
    }

    #[test]
    fn region_section_may_end_at_the_descriptor_boundary() {
        let mut buf = vec![0u8; FLASH_DESCRIPTOR_LENGTH];
        buf[16..20].copy_from_slice(&FLASH_SIGNATURE);
        buf[22] = 0xFC; // region section at [0xFC0, 0x1000)
        buf[24] = 0x08;
        let fd = FlashDescriptor::parse(&buf).unwrap();
        assert_eq!(fd.region_start, 0xFC0);
    }

    #[test]
    fn region_section_out_of_bounds() {
        let mut buf = vec![0u8; FLASH_DESCRIPTOR_LENGTH];
        buf[16..20].copy_from_slice(&FLASH_SIGNATURE);
        buf[22] = 0xFF; // region base 0xFF0 leaves no room for 64 bytes
        assert!(matches!(
            FlashDescriptor::parse(&buf),
            Err(FirmwareError::OutOfBounds { .. })
        ));
    }
}
