//! Firmware Volume (FV) header definitions.
//!
//! Based on the EFI_FIRMWARE_VOLUME_HEADER family in the PI specification,
//! Volume 3, section 3.2.1.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use serde::{Deserialize, Serialize};

use crate::guid::Guid;

/// `"_FVH"` as a little-endian u32.
pub const SIGNATURE: u32 = u32::from_le_bytes(*b"_FVH");

/// Size of the fixed portion of the volume header, without the block map.
pub const FIXED_HEADER_SIZE: usize = 56;

/// Smallest possible volume: fixed header plus the terminating zero block.
pub const MIN_SIZE: usize = FIXED_HEADER_SIZE + 8;

/// Size of the extended header fields (name GUID + size).
pub const EXT_HEADER_MIN_SIZE: usize = 20;

/// Byte offset of the `"_FVH"` signature within the fixed header.
pub const SIGNATURE_OFFSET: usize = 40;

// EFI_FIRMWARE_VOLUME_HEADER without the trailing flexible block map.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub zero_vector: [u8; 16],
    pub file_system_guid: Guid,
    pub fv_length: u64,
    pub signature: u32,
    pub attributes: u32,
    pub header_length: u16,
    pub checksum: u16,
    pub ext_header_offset: u16,
    pub reserved: u8,
    pub revision: u8,
}

// EFI_FIRMWARE_VOLUME_EXT_HEADER
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ExtHeader {
    pub fv_name: Guid,
    pub ext_header_size: u32,
}

/// One entry of the block map that follows the fixed header. The map is
/// terminated by an all-zero entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockMapEntry {
    pub count: u32,
    pub size: u32,
}

/// EFI_FVB_ATTRIBUTES_2 bits the parsers care about.
pub mod attributes {
    /// Erased flash reads back as ones when this bit is set.
    pub const ERASE_POLARITY: u32 = 0x0000_0800;
}

/// Well-known filesystem GUIDs found in `FileSystemGUID`, and the name tags
/// used for display and JSON.
pub mod guid {
    use crate::guid::Guid;

    pub const FFS1: Guid =
        Guid::from_fields(0x7a9354d9, 0x0468, 0x444a, 0x81, 0xce, &[0x0b, 0xf6, 0x17, 0xd8, 0x90, 0xdf]);
    pub const FFS2: Guid =
        Guid::from_fields(0x8c8ce578, 0x8a3d, 0x4f1c, 0x99, 0x35, &[0x89, 0x61, 0x85, 0xc3, 0x2d, 0xd3]);
    pub const FFS3: Guid =
        Guid::from_fields(0x5473c07a, 0x3dcb, 0x4dca, 0xbd, 0x6f, &[0x1e, 0x96, 0x89, 0xe7, 0x34, 0x9a]);
    pub const EVSA: Guid =
        Guid::from_fields(0xfff12b8d, 0x7696, 0x4c8b, 0xa9, 0x85, &[0x27, 0x47, 0x07, 0x5b, 0x4f, 0x50]);
    pub const NVAR: Guid =
        Guid::from_fields(0xcef5b9a3, 0x476d, 0x497f, 0x9f, 0xdc, &[0xe9, 0x81, 0x43, 0xe0, 0x42, 0x2c]);
    pub const EVSA2: Guid =
        Guid::from_fields(0x00504624, 0x8a59, 0x4eeb, 0xbd, 0x0f, &[0x6b, 0x36, 0xe9, 0x61, 0x28, 0xe0]);
    pub const APPLE_BOOT: Guid =
        Guid::from_fields(0x04adeead, 0x61ff, 0x4d31, 0xb6, 0xba, &[0x64, 0xf8, 0xbf, 0x90, 0x1f, 0x5a]);
    pub const PFH1: Guid =
        Guid::from_fields(0x16b45da2, 0x7d70, 0x4aea, 0xa5, 0x8d, &[0x76, 0x0e, 0x9e, 0xcb, 0x84, 0x1d]);
    pub const PFH2: Guid =
        Guid::from_fields(0xe360bdba, 0xc3ce, 0x46be, 0x8f, 0x37, &[0xb2, 0x31, 0xe5, 0xcb, 0x9f, 0x35]);

    /// Display tag for a recognized filesystem GUID.
    pub fn name(guid: &Guid) -> Option<&'static str> {
        Some(match *guid {
            FFS1 => "FFS1",
            FFS2 => "FFS2",
            FFS3 => "FFS3",
            EVSA => "NVRAM_EVSA",
            NVAR => "NVRAM_NVAR",
            EVSA2 => "NVRAM_EVSA2",
            APPLE_BOOT => "APPLE_BOOT",
            PFH1 => "PFH1",
            PFH2 => "PFH2",
            _ => return None,
        })
    }

    /// Only FFS2 and FFS3 volumes are parsed beyond their header.
    pub fn supported(guid: &Guid) -> bool {
        *guid == FFS2 || *guid == FFS3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem;

    #[test]
    fn header_layout() {
        assert_eq!(mem::size_of::<Header>(), FIXED_HEADER_SIZE);
        assert_eq!(mem::size_of::<ExtHeader>(), EXT_HEADER_MIN_SIZE);
        assert_eq!(mem::size_of::<BlockMapEntry>(), 8);
    }

    #[test]
    fn filesystem_guid_names() {
        assert_eq!(guid::name(&guid::FFS2), Some("FFS2"));
        assert_eq!(guid::name(&Guid::ZERO), None);
        assert!(guid::supported(&guid::FFS3));
        assert!(!guid::supported(&guid::FFS1));
    }
}
