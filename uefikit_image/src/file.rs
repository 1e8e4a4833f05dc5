//! FFS file parsing and serialization: standard and large headers, the
//! two 8-bit integrity checks, type-gated section parsing, and pad-file
//! construction.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use core::ptr;

use serde::{Deserialize, Serialize};

use uefikit_pi::base::{align4, checksum8, read3, write3};
use uefikit_pi::fw_fs::ffs::{attributes, file};
use uefikit_pi::fw_fs::fv;
use uefikit_pi::Guid;

use crate::ctx::ParseContext;
use crate::err::FirmwareError;
use crate::nvar::NVarStore;
use crate::section::Section;
use crate::tree::Firmware;

/// File types whose bodies are parsed into sections. Types not listed here
/// are treated as opaque blobs. PEIM is deliberately absent: re-compressing
/// an unpacked PEI module tends to grow past its slot.
pub fn parses_sections(file_type: u8) -> bool {
    use file::r#type as ft;
    matches!(
        file_type,
        ft::FREEFORM
            | ft::SECURITY_CORE
            | ft::PEI_CORE
            | ft::DXE_CORE
            | ft::DRIVER
            | ft::COMBINED_PEIM_DRIVER
            | ft::APPLICATION
            | ft::MM
            | ft::FIRMWARE_VOLUME_IMAGE
            | ft::COMBINED_MM_DXE
            | ft::MM_CORE
            | ft::MM_STANDALONE
            | ft::MM_CORE_STANDALONE
    )
}

/// Display name of a file type, in the EDK II spelling.
pub fn type_name(file_type: u8) -> String {
    use file::r#type as ft;
    let name = match file_type {
        ft::RAW => "EFI_FV_FILETYPE_RAW",
        ft::FREEFORM => "EFI_FV_FILETYPE_FREEFORM",
        ft::SECURITY_CORE => "EFI_FV_FILETYPE_SECURITY_CORE",
        ft::PEI_CORE => "EFI_FV_FILETYPE_PEI_CORE",
        ft::DXE_CORE => "EFI_FV_FILETYPE_DXE_CORE",
        ft::PEIM => "EFI_FV_FILETYPE_PEIM",
        ft::DRIVER => "EFI_FV_FILETYPE_DRIVER",
        ft::COMBINED_PEIM_DRIVER => "EFI_FV_FILETYPE_COMBINED_PEIM_DRIVER",
        ft::APPLICATION => "EFI_FV_FILETYPE_APPLICATION",
        ft::MM => "EFI_FV_FILETYPE_MM",
        ft::FIRMWARE_VOLUME_IMAGE => "EFI_FV_FILETYPE_FIRMWARE_VOLUME_IMAGE",
        ft::COMBINED_MM_DXE => "EFI_FV_FILETYPE_COMBINED_MM_DXE",
        ft::MM_CORE => "EFI_FV_FILETYPE_MM_CORE",
        ft::MM_STANDALONE => "EFI_FV_FILETYPE_MM_STANDALONE",
        ft::MM_CORE_STANDALONE => "EFI_FV_FILETYPE_MM_CORE_STANDALONE",
        ft::FFS_PAD => "EFI_FV_FILETYPE_FFS_PAD",
        other => return format!("UNKNOWN_FILETYPE_{other:#x}"),
    };
    name.to_string()
}

/// The two 8-bit checksums of the file header and body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityCheck {
    pub header: u8,
    pub file: u8,
}

mod size3 {
    use serde::{Deserialize, Deserializer, Serializer};
    use uefikit_pi::base::{read3, write3};

    pub fn serialize<S: Serializer>(size: &[u8; 3], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(read3(*size))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 3], D::Error> {
        Ok(write3(u32::deserialize(deserializer)? as u64))
    }
}

/// The decoded file header. The 24-bit size is mirrored into
/// `extended_size` so there is a single place to check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileHeader {
    #[serde(rename = "GUID")]
    pub guid: Guid,
    #[serde(skip)]
    pub checksum: IntegrityCheck,
    #[serde(rename = "Type")]
    pub file_type: u8,
    pub attributes: u8,
    #[serde(with = "size3")]
    pub size: [u8; 3],
    pub state: u8,
    #[serde(skip)]
    pub extended_size: u64,
}

/// An FFS file node. A file contains either sections or an NVAR store,
/// never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FfsFile {
    #[serde(skip)]
    pub(crate) buf: Vec<u8>,
    pub header: FileHeader,
    #[serde(rename = "Type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<Firmware>,
    #[serde(rename = "NVarStore", default, skip_serializing_if = "Option::is_none")]
    pub nvar_store: Option<Box<Firmware>>,
    #[serde(default)]
    pub extract_path: String,
    pub data_offset: u64,
}

impl FfsFile {
    /// An empty file builder for programmatic construction.
    pub fn new(guid: Guid, file_type: u8) -> Self {
        FfsFile {
            buf: Vec::new(),
            header: FileHeader {
                guid,
                checksum: IntegrityCheck::default(),
                file_type,
                attributes: 0,
                size: [0; 3],
                state: 0,
                extended_size: 0,
            },
            type_name: type_name(file_type),
            sections: Vec::new(),
            nvar_store: None,
            extract_path: String::new(),
            data_offset: file::HEADER_MIN_LENGTH as u64,
        }
    }

    /// Parse a file from the start of `buf`. Returns `Ok(None)` when the
    /// slot is the free-space sentinel (size and extended size all ones),
    /// which terminates the enclosing volume's file stream.
    pub fn parse(buf: &[u8], ctx: &mut ParseContext) -> Result<Option<FfsFile>, FirmwareError> {
        if buf.len() < file::HEADER_MIN_LENGTH {
            return Err(FirmwareError::Truncated {
                context: "file header",
                need: file::HEADER_MIN_LENGTH,
                have: buf.len(),
            });
        }

        // Safety: buf covers the standard header.
        let raw = unsafe { ptr::read_unaligned(buf.as_ptr() as *const file::Header) };
        let mut header = FileHeader {
            guid: raw.name,
            checksum: IntegrityCheck { header: raw.integrity_check_header, file: raw.integrity_check_file },
            file_type: raw.file_type,
            attributes: raw.attributes,
            size: raw.size,
            state: raw.state,
            extended_size: 0,
        };

        let data_offset;
        if header.size == [0xFF, 0xFF, 0xFF] {
            if buf.len() < file::HEADER_EXT_MIN_LENGTH {
                return Err(FirmwareError::Truncated {
                    context: "file extended header",
                    need: file::HEADER_EXT_MIN_LENGTH,
                    have: buf.len(),
                });
            }
            // Safety: buf covers the extended header.
            let raw2 = unsafe { ptr::read_unaligned(buf.as_ptr() as *const file::Header2) };
            if raw2.extended_size == u64::MAX {
                // Start of free space. Not a pad file; those carry valid
                // headers.
                return Ok(None);
            }
            header.extended_size = raw2.extended_size;
            data_offset = file::HEADER_EXT_MIN_LENGTH as u64;
        } else {
            header.extended_size = read3(header.size) as u64;
            data_offset = file::HEADER_MIN_LENGTH as u64;
        }

        if header.extended_size > buf.len() as u64 {
            return Err(FirmwareError::OutOfBounds {
                context: "file",
                detail: format!(
                    "file {} declares {:#x} bytes but only {:#x} remain",
                    header.guid,
                    header.extended_size,
                    buf.len()
                ),
            });
        }
        if header.extended_size < data_offset {
            return Err(FirmwareError::InvalidField {
                context: "file",
                detail: format!(
                    "file {} declares {:#x} bytes, less than its {:#x}-byte header",
                    header.guid, header.extended_size, data_offset
                ),
            });
        }

        let mut parsed = FfsFile {
            buf: buf[..header.extended_size as usize].to_vec(),
            type_name: type_name(header.file_type),
            header,
            sections: Vec::new(),
            nvar_store: None,
            extract_path: String::new(),
            data_offset,
        };

        // NVAR variable stores travel in a raw file with a well-known GUID.
        // Only the outer framing is decoded here.
        if parsed.header.file_type == file::r#type::RAW && parsed.header.guid == fv::guid::NVAR {
            let store = NVarStore::parse(&parsed.buf[data_offset as usize..]);
            parsed.nvar_store = Some(Box::new(Firmware::NVarStore(store)));
            return Ok(Some(parsed));
        }

        if !parses_sections(parsed.header.file_type) {
            return Ok(Some(parsed));
        }

        let mut offset = data_offset;
        let mut index = 0usize;
        while offset < parsed.header.extended_size {
            let section = Section::parse(&parsed.buf[offset as usize..], index, ctx)?;
            let section_len = section.header.extended_size as u64;
            if section_len == 0 {
                return Err(FirmwareError::InvalidField {
                    context: "file",
                    detail: format!("zero-length section in file {}", parsed.header.guid),
                });
            }
            parsed.sections.push(Firmware::Section(section));
            // Sections are placed on 4-byte boundaries inside the file.
            offset = align4(offset + section_len);
            index += 1;
        }

        Ok(Some(parsed))
    }

    /// Header length implied by the large-file attribute.
    pub fn header_len(&self) -> u64 {
        if attributes::is_large(self.header.attributes) {
            file::HEADER_EXT_MIN_LENGTH as u64
        } else {
            file::HEADER_MIN_LENGTH as u64
        }
    }

    /// Byte alignment this file's placement must honor.
    pub fn alignment(&self) -> u64 {
        attributes::alignment(self.header.attributes)
    }

    /// Record the file size, switching to the large header when it cannot
    /// be expressed in 24 bits. With `resize` set, the size is additionally
    /// inflated by the header-size delta so the payload keeps its room.
    pub fn set_size(&mut self, size: u64, resize: bool) {
        self.header.extended_size = size;
        self.header.attributes &= !attributes::LARGE_FILE;
        if size > 0xFF_FFFF {
            if resize {
                self.header.extended_size +=
                    (file::HEADER_EXT_MIN_LENGTH - file::HEADER_MIN_LENGTH) as u64;
            }
            self.header.attributes |= attributes::LARGE_FILE;
        }
        // Oversized values clamp to the all-ones sentinel here.
        self.header.size = write3(self.header.extended_size);
    }

    /// Checksum of the header with the body checksum and state treated as
    /// zero. Zero for a well-formed file.
    pub fn checksum_header(&self) -> u8 {
        let header_len = self.header_len() as usize;
        let sum = checksum8(&self.buf[..header_len.min(self.buf.len())]);
        sum.wrapping_sub(self.header.checksum.file).wrapping_sub(self.header.state)
    }

    /// Build the on-media image of this file from `body`: header with both
    /// integrity checks computed, state encoded against the erase polarity,
    /// body appended.
    pub fn checksum_and_assemble(&mut self, body: &[u8], erase_polarity: u8) -> Result<(), FirmwareError> {
        let large = attributes::is_large(self.header.attributes);
        let header_len = self.header_len() as usize;
        self.data_offset = header_len as u64;

        let mut header = Vec::with_capacity(header_len);
        header.extend_from_slice(self.header.guid.as_bytes());
        header.push(0); // IntegrityCheck.Header, patched below
        header.push(0); // IntegrityCheck.File, excluded from the header sum
        header.push(self.header.file_type);
        header.push(self.header.attributes);
        header.extend_from_slice(&self.header.size);
        header.push(0); // State, excluded from the header sum
        if large {
            header.extend_from_slice(&self.header.extended_size.to_le_bytes());
        }
        debug_assert_eq!(header.len(), header_len);

        // Two's complement of the sum over the zeroed header.
        self.header.checksum.header = 0u8.wrapping_sub(checksum8(&header));
        self.header.checksum.file = if attributes::has_checksum(self.header.attributes) {
            0u8.wrapping_sub(checksum8(body))
        } else {
            file::EMPTY_BODY_CHECKSUM
        };
        self.header.state = file::state::VALID ^ erase_polarity;

        header[16] = self.header.checksum.header;
        header[17] = self.header.checksum.file;
        header[23] = self.header.state;

        self.buf = header;
        self.buf.extend_from_slice(body);
        Ok(())
    }

    /// Create a pad file of exactly `size` bytes so the next file lands on
    /// its required alignment. The GUID is the all-ones or all-zeros value
    /// selected by the erase polarity.
    pub fn create_pad(size: u64, erase_polarity: u8) -> Result<FfsFile, FirmwareError> {
        if size < file::HEADER_MIN_LENGTH as u64 {
            return Err(FirmwareError::InvalidField {
                context: "pad file",
                detail: format!(
                    "pad of {size:#x} bytes cannot hold the {:#x}-byte header",
                    file::HEADER_MIN_LENGTH
                ),
            });
        }
        let guid = match erase_polarity {
            0xFF => Guid::FULL,
            0x00 => Guid::ZERO,
            other => {
                return Err(FirmwareError::InvalidField {
                    context: "pad file",
                    detail: format!("erase polarity {other:#04x} is neither 0x00 nor 0xFF"),
                })
            }
        };
        let mut pad = FfsFile::new(guid, file::r#type::FFS_PAD);
        pad.set_size(size, false);
        let body = vec![erase_polarity; (size - pad.header_len()) as usize];
        pad.checksum_and_assemble(&body, erase_polarity)?;
        Ok(pad)
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }
}
