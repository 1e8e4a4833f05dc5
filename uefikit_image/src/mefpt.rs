//! Management Engine region decoding: the `$FPT` partition table's outer
//! framing and the free-space computation derived from it.
//!
//! Partition contents are not decoded; the region bytes are retained
//! verbatim so the image stays reassemblable.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use log::error;
use serde::{Deserialize, Serialize};

use crate::err::FirmwareError;
use crate::region::{FlashRegion, FlashRegionType};
use crate::tree::Firmware;

/// `$FPT`
pub const FPT_SIGNATURE: [u8; 4] = [0x24, 0x46, 0x50, 0x54];

/// Bytes between the signature and the partition entries (count word plus
/// header fields this parser skips over).
pub const PARTITION_DESCRIPTOR_MIN_LENGTH: usize = 28;

/// Size of one partition table entry.
pub const PARTITION_ENTRY_LENGTH: usize = 32;

/// Search the ME region for the `$FPT` signature. The signature may sit at
/// the region start, in the second 16 bytes, or further in. Returns the
/// offset immediately after it.
pub fn find_fpt_signature(buf: &[u8]) -> Option<usize> {
    buf.windows(FPT_SIGNATURE.len())
        .position(|window| window == FPT_SIGNATURE)
        .map(|pos| pos + FPT_SIGNATURE.len())
}

/// One `$FPT` entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MePartitionEntry {
    pub name: [u8; 4],
    pub owner: [u8; 4],
    pub offset: u32,
    pub length: u32,
    pub reserved: [u32; 3],
    pub flags: u32,
}

impl MePartitionEntry {
    pub fn parse(buf: &[u8]) -> Self {
        let word = |off: usize| u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        MePartitionEntry {
            name: [buf[0], buf[1], buf[2], buf[3]],
            owner: [buf[4], buf[5], buf[6], buf[7]],
            offset: word(8),
            length: word(12),
            reserved: [word(16), word(20), word(24)],
            flags: word(28),
        }
    }

    /// Entries whose offset is zero or all-ones do not occupy flash.
    pub fn offset_is_valid(&self) -> bool {
        self.offset != 0 && self.offset != 0xFFFF_FFFF
    }

    /// The partition name with trailing NULs removed.
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).trim_end_matches('\0').to_string()
    }

    /// Partition content class from the low flag bits.
    pub fn type_name(&self) -> String {
        match self.flags & 0x7F {
            0 => "Code".to_string(),
            1 => "Data".to_string(),
            2 => "NVRAM".to_string(),
            3 => "Generic".to_string(),
            4 => "EFFS".to_string(),
            5 => "ROM".to_string(),
            other => format!("Unknown ({other})"),
        }
    }
}

/// The ME Flash Partition Table node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeFpt {
    #[serde(skip)]
    pub(crate) buf: Vec<u8>,
    pub partition_count: u32,
    pub partition_map_start: usize,
    pub entries: Vec<MePartitionEntry>,
    #[serde(default)]
    pub extract_path: String,
}

impl MeFpt {
    pub fn parse(buf: &[u8]) -> Result<Self, FirmwareError> {
        let after_sig = find_fpt_signature(buf)
            .ok_or(FirmwareError::BadSignature { context: "ME flash partition table" })?;
        if buf.len() < after_sig + PARTITION_DESCRIPTOR_MIN_LENGTH {
            return Err(FirmwareError::Truncated {
                context: "ME flash partition table",
                need: after_sig + PARTITION_DESCRIPTOR_MIN_LENGTH,
                have: buf.len(),
            });
        }
        let partition_count =
            u32::from_le_bytes([buf[after_sig], buf[after_sig + 1], buf[after_sig + 2], buf[after_sig + 3]]);
        let partition_map_start = after_sig + PARTITION_DESCRIPTOR_MIN_LENGTH;
        let table_end = partition_map_start + PARTITION_ENTRY_LENGTH * partition_count as usize;
        if buf.len() < table_end {
            return Err(FirmwareError::Truncated {
                context: "ME flash partition table entries",
                need: table_end,
                have: buf.len(),
            });
        }

        let entries = (0..partition_count as usize)
            .map(|i| {
                let off = partition_map_start + i * PARTITION_ENTRY_LENGTH;
                MePartitionEntry::parse(&buf[off..off + PARTITION_ENTRY_LENGTH])
            })
            .collect();

        Ok(MeFpt {
            buf: buf[..table_end].to_vec(),
            partition_count,
            partition_map_start,
            entries,
            extract_path: String::new(),
        })
    }
}

/// The ME region node: raw bytes plus the optional partition table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeRegion {
    #[serde(skip)]
    pub(crate) buf: Vec<u8>,
    pub fpt: Option<Box<Firmware>>,
    #[serde(default)]
    pub extract_path: String,
    pub f_region: Option<FlashRegion>,
    pub region_type: FlashRegionType,
    pub free_space_offset: u64,
}

impl MeRegion {
    /// Decode an ME region. A missing partition table is not fatal: the
    /// region is kept raw and the condition is reported as a diagnostic.
    pub fn parse(buf: &[u8], f_region: Option<FlashRegion>) -> Self {
        let mut region = MeRegion {
            buf: buf.to_vec(),
            fpt: None,
            extract_path: String::new(),
            f_region,
            region_type: FlashRegionType::Me,
            free_space_offset: 0,
        };
        match MeFpt::parse(buf) {
            Ok(fpt) => {
                region.free_space_offset = fpt
                    .entries
                    .iter()
                    .filter(|e| e.offset_is_valid())
                    .map(|e| e.offset as u64 + e.length as u64)
                    .max()
                    .unwrap_or(0);
                region.fpt = Some(Box::new(Firmware::MeFpt(fpt)));
            }
            Err(err) => error!("error parsing ME flash partition table: {err}"),
        }
        region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_me_region(entries: &[(&[u8; 4], u32, u32)]) -> Vec<u8> {
        let mut buf = vec![0u8; 0x1000];
        // signature in the second 16 bytes
        buf[16..20].copy_from_slice(&FPT_SIGNATURE);
        buf[20..24].copy_from_slice(&(entries.len() as u32).to_le_bytes());
        let mut off = 20 + PARTITION_DESCRIPTOR_MIN_LENGTH;
        for &(name, offset, length) in entries {
            buf[off..off + 4].copy_from_slice(name);
            buf[off + 8..off + 12].copy_from_slice(&offset.to_le_bytes());
            buf[off + 12..off + 16].copy_from_slice(&length.to_le_bytes());
            off += PARTITION_ENTRY_LENGTH;
        }
        buf
    }

    #[test]
    fn parses_entries_and_free_space() {
        let buf = build_me_region(&[
            (b"FTPR", 0x400, 0x200),
            (b"MFS\0", 0x800, 0x300),
            (b"PSVN", 0xFFFF_FFFF, 0x100),
        ]);
        let region = MeRegion::parse(&buf, None);
        let Some(fpt) = region.fpt.as_deref() else { panic!("FPT missing") };
        let Firmware::MeFpt(fpt) = fpt else { panic!("wrong node kind") };
        assert_eq!(fpt.partition_count, 3);
        assert_eq!(fpt.entries[0].name_str(), "FTPR");
        assert_eq!(fpt.entries[1].name_str(), "MFS");
        assert!(!fpt.entries[2].offset_is_valid());
        // max of Offset + Length over valid entries
        assert_eq!(region.free_space_offset, 0xB00);
    }

    #[test]
    fn missing_table_is_not_fatal() {
        let region = MeRegion::parse(&[0u8; 0x100], None);
        assert!(region.fpt.is_none());
        assert_eq!(region.free_space_offset, 0);
        assert_eq!(region.buf.len(), 0x100);
    }

    #[test]
    fn truncated_entry_table_fails() {
        let mut buf = build_me_region(&[(b"FTPR", 0x400, 0x200)]);
        buf[20..24].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            MeFpt::parse(&buf),
            Err(FirmwareError::Truncated { .. })
        ));
    }
}
