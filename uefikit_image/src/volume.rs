//! Firmware Volume parsing and serialization: fixed header, block map,
//! optional extended header, and the contained FFS file stream.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use core::mem;
use core::ptr;

use log::warn;
use serde::{Deserialize, Serialize};

use uefikit_pi::base::{align8, checksum16};
use uefikit_pi::fw_fs::ffs;
use uefikit_pi::fw_fs::fv::{self, BlockMapEntry};
use uefikit_pi::Guid;

use crate::ctx::ParseContext;
use crate::err::FirmwareError;
use crate::file::FfsFile;
use crate::tree::Firmware;

/// A firmware volume node.
///
/// Volumes whose filesystem GUID is FFS2 or FFS3 are parsed into files;
/// anything else is retained as an opaque header-plus-body blob. There is
/// no transition between the two after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FirmwareVolume {
    #[serde(skip)]
    pub(crate) buf: Vec<u8>,
    #[serde(rename = "FileSystemGUID")]
    pub file_system_guid: Guid,
    pub length: u64,
    pub attributes: u32,
    pub header_len: u16,
    pub checksum: u16,
    pub ext_header_offset: u16,
    pub revision: u8,
    pub blocks: Vec<BlockMapEntry>,
    #[serde(rename = "FVName")]
    pub fv_name: Guid,
    pub ext_header_size: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Firmware>,
    pub data_offset: u64,
    #[serde(skip)]
    pub fv_type: String,
    #[serde(rename = "FVOffset")]
    pub fv_offset: u64,
    #[serde(default)]
    pub extract_path: String,
    pub resizable: bool,
    #[serde(skip)]
    pub free_space: u64,
}

impl FirmwareVolume {
    /// An empty, resizable FFS3 volume for programmatic construction. The
    /// header is synthesized on assembly.
    pub fn new(file_system_guid: Guid, attributes: u32) -> Self {
        FirmwareVolume {
            buf: Vec::new(),
            file_system_guid,
            length: 0,
            attributes,
            header_len: 0,
            checksum: 0,
            ext_header_offset: 0,
            revision: 2,
            blocks: Vec::new(),
            fv_name: Guid::ZERO,
            ext_header_size: 0,
            files: Vec::new(),
            data_offset: 0,
            fv_type: fv::guid::name(&file_system_guid).unwrap_or_default().to_string(),
            fv_offset: 0,
            extract_path: String::new(),
            resizable: true,
            free_space: 0,
        }
    }

    /// The erase polarity byte this volume's attributes select.
    pub fn erase_polarity(&self) -> u8 {
        if self.attributes & fv::attributes::ERASE_POLARITY != 0 {
            0xFF
        } else {
            0x00
        }
    }

    /// Parse a firmware volume from the start of `data`. `fv_offset` is the
    /// byte offset from the start of the enclosing BIOS region, kept for
    /// extraction naming and reassembly placement.
    pub fn parse(
        data: &[u8],
        fv_offset: u64,
        resizable: bool,
        ctx: &mut ParseContext,
    ) -> Result<Self, FirmwareError> {
        if data.len() < fv::MIN_SIZE {
            return Err(FirmwareError::Truncated {
                context: "firmware volume",
                need: fv::MIN_SIZE,
                have: data.len(),
            });
        }

        // Safety: data is at least MIN_SIZE, which covers the fixed header.
        let header = unsafe { ptr::read_unaligned(data.as_ptr() as *const fv::Header) };
        if header.signature != fv::SIGNATURE {
            return Err(FirmwareError::BadSignature { context: "firmware volume" });
        }

        // Block map: 8-byte entries after the fixed header, zero-terminated.
        let mut blocks = Vec::new();
        let mut map_offset = fv::FIXED_HEADER_SIZE;
        loop {
            if map_offset + 8 > data.len() {
                return Err(FirmwareError::Truncated {
                    context: "firmware volume block map",
                    need: map_offset + 8,
                    have: data.len(),
                });
            }
            let entry = BlockMapEntry {
                count: u32::from_le_bytes(data[map_offset..map_offset + 4].try_into().unwrap()),
                size: u32::from_le_bytes(data[map_offset + 4..map_offset + 8].try_into().unwrap()),
            };
            map_offset += 8;
            if entry.count == 0 && entry.size == 0 {
                break;
            }
            blocks.push(entry);
        }

        let mut volume = FirmwareVolume {
            buf: Vec::new(),
            file_system_guid: header.file_system_guid,
            length: header.fv_length,
            attributes: header.attributes,
            header_len: header.header_length,
            checksum: header.checksum,
            ext_header_offset: header.ext_header_offset,
            revision: header.revision,
            blocks,
            fv_name: Guid::ZERO,
            ext_header_size: 0,
            files: Vec::new(),
            data_offset: 0,
            fv_type: fv::guid::name(&header.file_system_guid).unwrap_or_default().to_string(),
            fv_offset,
            extract_path: String::new(),
            resizable,
            free_space: 0,
        };

        ctx.set_erase_polarity(volume.erase_polarity())?;

        if volume.length > data.len() as u64 {
            return Err(FirmwareError::OutOfBounds {
                context: "firmware volume",
                detail: format!(
                    "declared length {:#x} exceeds backing slice of {:#x} bytes",
                    volume.length,
                    data.len()
                ),
            });
        }

        // Extended header, and the resulting start of file data.
        let mut data_offset = volume.header_len as u64;
        let ext_offset = volume.ext_header_offset as u64;
        if ext_offset != 0
            && volume.length >= fv::EXT_HEADER_MIN_SIZE as u64
            && ext_offset < volume.length - fv::EXT_HEADER_MIN_SIZE as u64
        {
            // Safety: ext_offset + 20 is within length, which is within data.
            let ext = unsafe {
                ptr::read_unaligned(data[ext_offset as usize..].as_ptr() as *const fv::ExtHeader)
            };
            volume.fv_name = ext.fv_name;
            volume.ext_header_size = ext.ext_header_size;
            data_offset = ext_offset + ext.ext_header_size as u64;
        }
        // An extended header never legitimately ends inside the fixed
        // header; clamp upward before aligning.
        volume.data_offset = align8(data_offset.max(volume.header_len as u64));
        if volume.data_offset > volume.length {
            return Err(FirmwareError::InvalidField {
                context: "firmware volume",
                detail: format!(
                    "data offset {:#x} is past the volume length {:#x}",
                    volume.data_offset, volume.length
                ),
            });
        }

        volume.buf = data[..volume.length as usize].to_vec();

        if !fv::guid::supported(&volume.file_system_guid) {
            warn!(
                "unsupported filesystem {} ({}), volume kept header-only",
                volume.file_system_guid,
                if volume.fv_type.is_empty() { "unknown" } else { &volume.fv_type }
            );
            return Ok(volume);
        }

        // File stream: 8-byte aligned reads until the free-space sentinel
        // or the end of the volume.
        let stream_end = volume.length.saturating_sub(ffs::file::HEADER_MIN_LENGTH as u64);
        let mut offset = volume.data_offset;
        loop {
            offset = align8(offset);
            if offset >= stream_end {
                break;
            }
            let file = match FfsFile::parse(&volume.buf[offset as usize..], ctx)? {
                Some(file) => file,
                None => {
                    // Free space runs to the end of the volume.
                    volume.free_space = volume.length - offset;
                    break;
                }
            };
            let file_len = file.header.extended_size;
            if file_len == 0 {
                return Err(FirmwareError::InvalidField {
                    context: "firmware volume",
                    detail: format!("file at offset {offset:#x} has zero length"),
                });
            }
            volume.files.push(Firmware::File(file));
            offset += file_len;
        }

        Ok(volume)
    }

    /// Append a file image at `aligned_offset`, padding the gap from the
    /// current end with the erase byte.
    pub fn insert_file(
        &mut self,
        aligned_offset: u64,
        data: &[u8],
        erase_byte: u8,
    ) -> Result<(), FirmwareError> {
        let current = self.buf.len() as u64;
        if current > aligned_offset {
            return Err(FirmwareError::InvalidField {
                context: "firmware volume",
                detail: format!(
                    "aligned offset {aligned_offset:#x} is inside the volume, already {current:#x} bytes"
                ),
            });
        }
        if data.is_empty() {
            return Err(FirmwareError::InvalidField {
                context: "firmware volume",
                detail: "refusing to insert an empty file".to_string(),
            });
        }
        self.buf.resize(aligned_offset as usize, erase_byte);
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Synthesize header bytes (fixed header, block map, optional extended
    /// header) from the node's fields, updating the derived fields
    /// (`header_len`, `ext_header_offset`, `data_offset`, `checksum`).
    ///
    /// Used when assembling a programmatically built volume; reassembly of
    /// a parsed volume reuses its retained header bytes instead.
    pub(crate) fn build_header_bytes(&mut self, erase_byte: u8) -> Vec<u8> {
        if self.blocks.is_empty() {
            let size = 0x1000u32;
            self.blocks.push(BlockMapEntry { count: (self.length / size as u64) as u32, size });
        }
        let header_len = fv::FIXED_HEADER_SIZE + 8 * (self.blocks.len() + 1);
        self.header_len = header_len as u16;
        self.ext_header_offset = if self.ext_header_size != 0 { header_len as u16 } else { 0 };

        let data_offset = if self.ext_header_size != 0 {
            header_len as u64 + self.ext_header_size as u64
        } else {
            header_len as u64
        };
        self.data_offset = align8(data_offset);

        let mut bytes = Vec::with_capacity(self.data_offset as usize);
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend_from_slice(self.file_system_guid.as_bytes());
        bytes.extend_from_slice(&self.length.to_le_bytes());
        bytes.extend_from_slice(&fv::SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&self.attributes.to_le_bytes());
        bytes.extend_from_slice(&self.header_len.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes()); // checksum, patched below
        bytes.extend_from_slice(&self.ext_header_offset.to_le_bytes());
        bytes.push(0);
        bytes.push(self.revision);
        for block in &self.blocks {
            bytes.extend_from_slice(&block.count.to_le_bytes());
            bytes.extend_from_slice(&block.size.to_le_bytes());
        }
        bytes.extend_from_slice(&[0u8; 8]); // terminating zero block
        debug_assert_eq!(bytes.len(), header_len);

        if self.ext_header_size != 0 {
            bytes.extend_from_slice(self.fv_name.as_bytes());
            bytes.extend_from_slice(&self.ext_header_size.to_le_bytes());
            // vendor data area, if the declared size exceeds the fields
            bytes.resize(header_len + self.ext_header_size as usize, 0);
        }
        bytes.resize(self.data_offset as usize, erase_byte);

        let sum = checksum16(&bytes[..header_len]);
        self.checksum = 0u16.wrapping_sub(sum);
        bytes[50..52].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Patch the length, first block count, and checksum inside the header
    /// bytes at the front of `buf` after the volume has grown.
    pub(crate) fn patch_resized_header(&mut self, new_length: u64) {
        self.length = new_length;
        self.buf[32..40].copy_from_slice(&new_length.to_le_bytes());
        if let Some(first) = self.blocks.first_mut() {
            if first.size != 0 {
                first.count = (new_length / first.size as u64) as u32;
                let off = fv::FIXED_HEADER_SIZE;
                self.buf[off..off + 4].copy_from_slice(&first.count.to_le_bytes());
            }
        }
        let header_len = self.header_len as usize;
        self.buf[50..52].copy_from_slice(&[0, 0]);
        let sum = checksum16(&self.buf[..header_len]);
        self.checksum = 0u16.wrapping_sub(sum);
        self.buf[50..52].copy_from_slice(&self.checksum.to_le_bytes());
    }
}

// Compile-time reminder that the raw header layout matches the parser's
// expectations.
const _: () = assert!(mem::size_of::<fv::Header>() == fv::FIXED_HEADER_SIZE);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecRegistry;

    fn empty_volume_bytes(attributes: u32) -> Vec<u8> {
        let mut volume = FirmwareVolume::new(fv::guid::FFS2, attributes);
        volume.length = 0x1000;
        volume.blocks.push(BlockMapEntry { count: 1, size: 0x1000 });
        let erase = volume.erase_polarity();
        let mut bytes = volume.build_header_bytes(erase);
        bytes.resize(0x1000, erase);
        bytes
    }

    #[test]
    fn synthesized_header_reparses() {
        let bytes = empty_volume_bytes(fv::attributes::ERASE_POLARITY);
        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        let volume = FirmwareVolume::parse(&bytes, 0, false, &mut ctx).unwrap();
        assert_eq!(volume.length, 0x1000);
        assert_eq!(volume.header_len as usize, fv::FIXED_HEADER_SIZE + 16);
        assert_eq!(volume.blocks, vec![BlockMapEntry { count: 1, size: 0x1000 }]);
        assert_eq!(volume.data_offset % 8, 0);
        assert_eq!(ctx.erase_polarity(), 0xFF);
        // the whole header sums to zero
        assert_eq!(checksum16(&bytes[..volume.header_len as usize]), 0);
        // an empty FFS2 volume is all free space past the header
        assert_eq!(volume.free_space, volume.length - volume.data_offset);
    }

    #[test]
    fn polarity_conflict_across_volumes() {
        let ones = empty_volume_bytes(fv::attributes::ERASE_POLARITY);
        let zeros = empty_volume_bytes(0);
        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        FirmwareVolume::parse(&ones, 0, false, &mut ctx).unwrap();
        assert!(matches!(
            FirmwareVolume::parse(&zeros, 0, false, &mut ctx),
            Err(FirmwareError::ErasePolarityConflict { .. })
        ));
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut bytes = empty_volume_bytes(0);
        bytes[40] ^= 0xFF;
        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        assert!(matches!(
            FirmwareVolume::parse(&bytes, 0, false, &mut ctx),
            Err(FirmwareError::BadSignature { .. })
        ));
    }

    #[test]
    fn declared_length_beyond_slice_is_rejected() {
        let mut bytes = empty_volume_bytes(0);
        bytes[32..40].copy_from_slice(&0x10_0000u64.to_le_bytes());
        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        assert!(matches!(
            FirmwareVolume::parse(&bytes, 0, false, &mut ctx),
            Err(FirmwareError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn unsupported_filesystem_stays_header_only() {
        let mut volume = FirmwareVolume::new(fv::guid::EVSA, 0);
        volume.length = 0x1000;
        volume.blocks.push(BlockMapEntry { count: 1, size: 0x1000 });
        let mut bytes = volume.build_header_bytes(0x00);
        bytes.resize(0x1000, 0x00);
        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        let parsed = FirmwareVolume::parse(&bytes, 0, false, &mut ctx).unwrap();
        assert!(parsed.files.is_empty());
        assert_eq!(parsed.fv_type, "NVRAM_EVSA");
    }

    #[test]
    fn insert_file_rules() {
        let mut volume = FirmwareVolume::new(fv::guid::FFS3, 0);
        volume.buf = vec![0u8; 0x40];
        assert!(volume.insert_file(0x38, &[1, 2, 3], 0xFF).is_err());
        assert!(volume.insert_file(0x48, &[], 0xFF).is_err());
        volume.insert_file(0x48, &[1, 2, 3], 0xFF).unwrap();
        assert_eq!(&volume.buf[0x40..0x48], &[0xFF; 8]);
        assert_eq!(&volume.buf[0x48..], &[1, 2, 3]);
    }
}
