//! The top-level flash image node: descriptor decoding, region
//! construction, and gap filling.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use log::warn;
use serde::{Deserialize, Serialize};

use crate::ctx::ParseContext;
use crate::descriptor::{self, FlashDescriptor, FLASH_DESCRIPTOR_LENGTH};
use crate::err::FirmwareError;
use crate::region::{self, FlashRegion, FlashRegionType, RawRegion, REGION_BLOCK_SIZE};
use crate::tree::Firmware;

/// An Intel flash image in descriptor mode.
///
/// After parsing, `regions` covers `[FlashDescriptorLength, FlashSize)`
/// contiguously, sorted by base, with synthetic raw regions filling any
/// gaps the descriptor leaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlashImage {
    #[serde(skip)]
    pub(crate) buf: Vec<u8>,
    #[serde(rename = "IFD")]
    pub ifd: Box<Firmware>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<Firmware>,
    #[serde(default)]
    pub extract_path: String,
    pub flash_size: u64,
}

impl FlashImage {
    /// Whether the image uses the newer PCH layout, with the signature at
    /// offset 16 instead of 0.
    pub fn is_pch(&self) -> bool {
        self.buf.len() >= 20 && self.buf[16..20] == descriptor::FLASH_SIGNATURE
    }

    /// Parse a descriptor-mode flash image.
    pub fn parse(buf: &[u8], ctx: &mut ParseContext) -> Result<Self, FirmwareError> {
        if buf.len() < FLASH_DESCRIPTOR_LENGTH {
            return Err(FirmwareError::Truncated {
                context: "flash image",
                need: FLASH_DESCRIPTOR_LENGTH,
                have: buf.len(),
            });
        }
        let flash_size = buf.len() as u64;
        let ifd = FlashDescriptor::parse(&buf[..FLASH_DESCRIPTOR_LENGTH])?;

        let Some(region_section) = ifd.region else {
            return Err(FirmwareError::InvalidField {
                context: "flash image",
                detail: "descriptor carries no region section".to_string(),
            });
        };
        let flash_regions = region_section.flash_regions;
        if !flash_regions[0].valid() {
            return Err(FirmwareError::InvalidField {
                context: "flash image",
                detail: format!("no BIOS region: invalid region parameters {}", flash_regions[0]),
            });
        }

        // Newer descriptors report zero here and use all 15 slots; older
        // ones report a count and may carry stale "valid" slots past it.
        let region_count = ifd
            .descriptor_map
            .as_ref()
            .map(|map| map.number_of_regions as usize)
            .unwrap_or(0);

        let mut image = FlashImage {
            buf: buf.to_vec(),
            ifd: Box::new(Firmware::FlashDescriptor(ifd)),
            regions: Vec::new(),
            extract_path: String::new(),
            flash_size,
        };

        for (index, flash_region) in flash_regions.iter().enumerate() {
            if region_count != 0 && index >= region_count {
                break;
            }
            if !flash_region.valid() {
                continue;
            }
            let region_type = FlashRegionType::from_index(index);
            if flash_region.base_offset() as u64 >= flash_size {
                warn!(
                    "region {region_type} ({index}, {flash_region}) out of bounds: base offset {:#x}, flash size {flash_size:#x}, skipping",
                    flash_region.base_offset()
                );
                continue;
            }
            if flash_region.end_offset() as u64 > flash_size {
                warn!(
                    "region {region_type} ({index}, {flash_region}) out of bounds: end offset {:#x}, flash size {flash_size:#x}, skipping",
                    flash_region.end_offset()
                );
                continue;
            }
            let slice = &buf[flash_region.base_offset() as usize..flash_region.end_offset() as usize];
            image
                .regions
                .push(region::new_region(slice, *flash_region, region_type, ctx)?);
        }

        image.regions.sort_by_key(|r| r.flash_region().map(|fr| fr.base).unwrap_or(0));
        image.fill_region_gaps()?;
        Ok(image)
    }

    /// Insert synthetic raw regions so the region list covers the whole
    /// image after the descriptor. Overlapping regions are fatal.
    fn fill_region_gaps(&mut self) -> Result<(), FirmwareError> {
        let mut offset = FLASH_DESCRIPTOR_LENGTH as u64;
        let regions = std::mem::take(&mut self.regions);
        let mut filled = Vec::with_capacity(regions.len());
        for region in regions {
            let Some(flash_region) = region.flash_region().copied() else {
                filled.push(region);
                continue;
            };
            let next_base = flash_region.base_offset() as u64;
            if next_base < offset {
                return Err(FirmwareError::OutOfBounds {
                    context: "flash image",
                    detail: format!(
                        "region {} at {next_base:#x} overlaps the previous region ending at {offset:#x}",
                        region.region_type().unwrap_or(FlashRegionType::Unknown)
                    ),
                });
            }
            if next_base > offset {
                filled.push(self.gap_region(offset, next_base));
            }
            offset = flash_region.end_offset() as u64;
            filled.push(region);
        }
        if offset != self.flash_size {
            let gap = self.gap_region(offset, self.flash_size);
            filled.push(gap);
        }
        self.regions = filled;
        Ok(())
    }

    fn gap_region(&self, start: u64, end: u64) -> Firmware {
        let flash_region = FlashRegion {
            base: (start / REGION_BLOCK_SIZE) as u16,
            limit: (end / REGION_BLOCK_SIZE) as u16 - 1,
        };
        Firmware::RawRegion(RawRegion::parse(
            &self.buf[start as usize..end as usize],
            flash_region,
            FlashRegionType::Unknown,
        ))
    }
}
