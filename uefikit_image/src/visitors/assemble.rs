//! Rebuild every node's byte buffer bottom-up: sections, then files, then
//! volumes, then regions, then the flash image.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use uefikit_pi::base::{align8, align_up};
use uefikit_pi::fw_fs::ffs::file as raw_file;
use uefikit_pi::fw_fs::ffs::section::header::PROCESSING_REQUIRED;
use uefikit_pi::fw_fs::ffs::section::raw_type;
use uefikit_pi::fw_fs::fv;

use crate::bios::BiosRegion;
use crate::ctx::ParseContext;
use crate::err::FirmwareError;
use crate::file::FfsFile;
use crate::flash::FlashImage;
use crate::section::{encode_depex, utf8_to_ucs2, Section, TypeSpecificHeader};
use crate::tree::{Firmware, Visitor};
use crate::volume::FirmwareVolume;

/// Post-order reassembly of the tree into byte buffers.
///
/// On a tree reloaded from a manifest the erase polarity is re-derived
/// from the first firmware volume's attributes before the walk; every
/// further volume must agree.
pub struct Assemble<'a, 'b> {
    ctx: &'b mut ParseContext<'a>,
}

impl<'a, 'b> Assemble<'a, 'b> {
    pub fn new(ctx: &'b mut ParseContext<'a>) -> Self {
        Assemble { ctx }
    }

    fn assemble_section(&mut self, section: &mut Section) -> Result<(), FirmwareError> {
        if !section.encapsulated.is_empty() {
            // Concatenate the already-assembled children at 4-byte
            // boundaries, then re-encode if this is a compression wrapper.
            let mut body = Vec::new();
            for (index, child) in section.encapsulated.iter().enumerate() {
                if index > 0 {
                    while body.len() % 4 != 0 {
                        body.push(0);
                    }
                }
                body.extend_from_slice(child.buf());
            }
            if let Some(TypeSpecificHeader::GuidDefined(guid_defined)) = &section.type_specific {
                if guid_defined.attributes & PROCESSING_REQUIRED != 0
                    && guid_defined.compression != "UNKNOWN"
                {
                    let codec = self
                        .ctx
                        .codecs()
                        .lookup(&guid_defined.guid)
                        .ok_or(FirmwareError::UnsupportedGuidCompression(guid_defined.guid))?;
                    body = codec.encode(&body)?;
                }
            }
            section.buf = body;
            return section.gen_sec_header();
        }

        match section.header.section_type {
            raw_type::USER_INTERFACE => {
                section.buf = utf8_to_ucs2(&section.name);
                section.gen_sec_header()
            }
            raw_type::VERSION => {
                let mut body = section.build_number.to_le_bytes().to_vec();
                body.extend(utf8_to_ucs2(&section.version));
                section.buf = body;
                section.gen_sec_header()
            }
            raw_type::DXE_DEPEX | raw_type::PEI_DEPEX | raw_type::MM_DEPEX => {
                section.buf = encode_depex(&section.dep_ex)?;
                section.gen_sec_header()
            }
            // Leaf sections keep their image verbatim.
            _ => Ok(()),
        }
    }

    fn assemble_file(&mut self, file: &mut FfsFile) -> Result<(), FirmwareError> {
        let polarity = self.ctx.erase_polarity();
        let body = if let Some(store) = &file.nvar_store {
            store.buf().to_vec()
        } else if file.sections.is_empty() {
            // Opaque file; the loaded image is already complete.
            return Ok(());
        } else {
            let mut data = Vec::new();
            for (index, section) in file.sections.iter().enumerate() {
                if index > 0 {
                    while data.len() % 4 != 0 {
                        data.push(polarity);
                    }
                }
                data.extend_from_slice(section.buf());
            }
            data
        };
        file.set_size(raw_file::HEADER_MIN_LENGTH as u64 + body.len() as u64, true);
        file.checksum_and_assemble(&body, polarity)
    }

    fn assemble_volume(&mut self, volume: &mut FirmwareVolume) -> Result<(), FirmwareError> {
        self.ctx.set_erase_polarity(volume.erase_polarity())?;
        let polarity = self.ctx.erase_polarity();
        if volume.files.is_empty() {
            // Header-only volumes travel as one opaque blob.
            return Ok(());
        }

        let data_offset = volume.data_offset as usize;
        if volume.buf.len() >= data_offset && data_offset >= fv::FIXED_HEADER_SIZE {
            // Reuse the retained header bytes; this keeps vendor extended
            // header data and multi-entry block maps intact.
            volume.buf.truncate(data_offset);
        } else {
            let header = volume.build_header_bytes(polarity);
            volume.buf = header;
        }

        let files = std::mem::take(&mut volume.files);
        let inserted = (|| -> Result<(), FirmwareError> {
            for child in &files {
                let Firmware::File(file) = child else { continue };
                let mut target = align8(volume.buf.len() as u64);
                let alignment = file.alignment();
                if alignment > 1 && target % alignment != 0 {
                    let mut aligned = align_up(target, alignment);
                    if aligned - target < raw_file::HEADER_MIN_LENGTH as u64 {
                        // Too narrow for a pad header; move one unit out.
                        aligned += alignment;
                    }
                    let pad = FfsFile::create_pad(aligned - target, polarity)?;
                    volume.insert_file(target, pad.buf(), polarity)?;
                    target = aligned;
                }
                volume.insert_file(target, file.buf(), polarity)?;
            }
            Ok(())
        })();
        volume.files = files;
        inserted?;

        let content_len = volume.buf.len() as u64;
        if content_len > volume.length {
            if !volume.resizable {
                return Err(FirmwareError::AssembleOverflow {
                    need: content_len,
                    have: volume.length,
                });
            }
            let block = volume
                .blocks
                .first()
                .filter(|b| b.size != 0)
                .map(|b| b.size as u64)
                .unwrap_or(0x1000);
            let new_length = align_up(content_len, block);
            volume.buf.resize(new_length as usize, polarity);
            volume.patch_resized_header(new_length);
            volume.free_space = new_length - content_len;
        } else {
            volume.free_space = volume.length - content_len;
            volume.buf.resize(volume.length as usize, polarity);
        }
        Ok(())
    }

    fn assemble_bios(&mut self, region: &mut BiosRegion) -> Result<(), FirmwareError> {
        if region.elements.is_empty() {
            return Ok(());
        }
        let polarity = self.ctx.erase_polarity();
        let length = region.length as usize;
        let mut buf = vec![polarity; length];
        for element in &region.elements {
            let (offset, bytes) = match element {
                Firmware::FirmwareVolume(volume) => (volume.fv_offset as usize, &volume.buf[..]),
                Firmware::BiosPadding(padding) => (padding.offset as usize, &padding.buf[..]),
                _ => continue,
            };
            let end = offset + bytes.len();
            if end > length {
                return Err(FirmwareError::AssembleOverflow {
                    need: end as u64,
                    have: length as u64,
                });
            }
            buf[offset..end].copy_from_slice(bytes);
        }
        region.buf = buf;
        Ok(())
    }

    fn assemble_flash(&mut self, image: &mut FlashImage) -> Result<(), FirmwareError> {
        let size = image.flash_size as usize;
        let mut buf = vec![0u8; size];

        let ifd = image.ifd.buf();
        if ifd.len() > size {
            return Err(FirmwareError::AssembleOverflow { need: ifd.len() as u64, have: size as u64 });
        }
        buf[..ifd.len()].copy_from_slice(ifd);

        for region in &image.regions {
            let Some(flash_region) = region.flash_region() else { continue };
            let start = flash_region.base_offset() as usize;
            let bytes = region.buf();
            let end = start + bytes.len();
            if end > size {
                return Err(FirmwareError::AssembleOverflow {
                    need: end as u64,
                    have: size as u64,
                });
            }
            buf[start..end].copy_from_slice(bytes);
        }
        image.buf = buf;
        Ok(())
    }
}

/// The first firmware volume in tree order carries the polarity for a
/// reloaded tree.
fn first_volume_attributes(node: &Firmware) -> Option<u32> {
    match node {
        Firmware::FirmwareVolume(volume) => Some(volume.attributes),
        Firmware::FlashImage(image) => image.regions.iter().find_map(first_volume_attributes),
        Firmware::BiosRegion(region) => region.elements.iter().find_map(first_volume_attributes),
        Firmware::File(file) => file.sections.iter().find_map(first_volume_attributes),
        Firmware::Section(section) => section.encapsulated.iter().find_map(first_volume_attributes),
        _ => None,
    }
}

impl Visitor for Assemble<'_, '_> {
    fn run(&mut self, root: &mut Firmware) -> Result<(), FirmwareError> {
        if let Some(attributes) = first_volume_attributes(root) {
            let polarity =
                if attributes & fv::attributes::ERASE_POLARITY != 0 { 0xFF } else { 0x00 };
            self.ctx.set_erase_polarity(polarity)?;
        }
        root.apply(self)
    }

    fn visit(&mut self, node: &mut Firmware) -> Result<(), FirmwareError> {
        // Children first; every parent is rebuilt from finished children.
        node.apply_children(self)?;
        match node {
            Firmware::Section(section) => self.assemble_section(section),
            Firmware::File(file) => self.assemble_file(file),
            Firmware::FirmwareVolume(volume) => self.assemble_volume(volume),
            Firmware::BiosRegion(region) => self.assemble_bios(region),
            Firmware::FlashImage(image) => self.assemble_flash(image),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecRegistry;
    use crate::flash::tests::build_flash_image;
    use crate::manifest::DirStore;
    use crate::parse_image;
    use crate::visitors::{Extract, ParseDir};
    use uefikit_pi::base::checksum16;
    use uefikit_pi::Guid;

    fn driver_with_raw_section(payload: &[u8]) -> FfsFile {
        let guid: Guid = "378D7B65-8DA9-4773-B6E4-A47826A833E1".parse().unwrap();
        let mut file = FfsFile::new(guid, raw_file::r#type::DRIVER);
        let mut section = Section::new(raw_type::RAW, payload.to_vec());
        section.gen_sec_header().unwrap();
        file.sections.push(Firmware::Section(section));
        file
    }

    #[test]
    fn volume_round_trip_preserves_section_bodies() {
        let payload: Vec<u8> = (0u8..0x25).collect();
        let mut volume = FirmwareVolume::new(fv::guid::FFS2, fv::attributes::ERASE_POLARITY);
        volume.files.push(Firmware::File(driver_with_raw_section(&payload)));
        let mut root = Firmware::FirmwareVolume(volume);

        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        Assemble::new(&mut ctx).run(&mut root).unwrap();
        let bytes = root.buf().to_vec();

        let mut ctx = ParseContext::new(&registry);
        let reparsed = FirmwareVolume::parse(&bytes, 0, false, &mut ctx).unwrap();
        assert_eq!(checksum16(&bytes[..reparsed.header_len as usize]), 0);
        assert_eq!(reparsed.files.len(), 1);
        let Firmware::File(file) = &reparsed.files[0] else { panic!("expected a file") };
        assert_eq!(file.checksum_header(), 0);
        let Firmware::Section(section) = &file.sections[0] else { panic!("expected a section") };
        assert_eq!(&section.buf()[4..], &payload[..]);
    }

    #[test]
    fn alignment_attribute_inserts_a_pad_file() {
        let mut volume = FirmwareVolume::new(fv::guid::FFS3, fv::attributes::ERASE_POLARITY);
        volume.files.push(Firmware::File(driver_with_raw_section(&[0x5A; 64])));
        let mut aligned_file = driver_with_raw_section(&[0xC3; 64]);
        aligned_file.header.guid = "AAF53CB5-0C67-4E80-9A6C-2F7FF1E21A28".parse().unwrap();
        aligned_file.header.attributes |= 0x30; // 32 KiB placement
        let aligned_guid = aligned_file.header.guid;
        volume.files.push(Firmware::File(aligned_file));
        let mut root = Firmware::FirmwareVolume(volume);

        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        Assemble::new(&mut ctx).run(&mut root).unwrap();
        let bytes = root.buf().to_vec();

        // the aligned file's header starts on the 32 KiB boundary
        let guid_pos = bytes
            .windows(16)
            .position(|w| w == aligned_guid.as_bytes())
            .expect("aligned file not found");
        assert_eq!(guid_pos % 0x8000, 0);

        // a pad file with the all-ones GUID fills the gap
        let mut ctx = ParseContext::new(&registry);
        let reparsed = FirmwareVolume::parse(&bytes, 0, false, &mut ctx).unwrap();
        let kinds: Vec<(u8, Guid)> = reparsed
            .files
            .iter()
            .filter_map(|f| match f {
                Firmware::File(file) => Some((file.header.file_type, file.header.guid)),
                _ => None,
            })
            .collect();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[1].0, raw_file::r#type::FFS_PAD);
        assert_eq!(kinds[1].1, Guid::FULL);
    }

    #[test]
    fn flash_image_round_trips_byte_for_byte() {
        let original = build_flash_image();
        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        let mut root = parse_image(&original, &mut ctx).unwrap();
        Assemble::new(&mut ctx).run(&mut root).unwrap();
        assert_eq!(root.buf(), &original[..]);
    }

    #[test]
    fn extract_reload_assemble_round_trips() {
        // build a volume with real content, take its bytes as ground truth
        let mut volume = FirmwareVolume::new(fv::guid::FFS3, fv::attributes::ERASE_POLARITY);
        volume.files.push(Firmware::File(driver_with_raw_section(b"section payload")));
        let mut root = Firmware::FirmwareVolume(volume);
        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        Assemble::new(&mut ctx).run(&mut root).unwrap();
        let original = root.buf().to_vec();

        let mut ctx = ParseContext::new(&registry);
        let mut parsed = parse_image(&original, &mut ctx).unwrap();

        let base = std::env::temp_dir().join(format!("uefikit-extract-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);
        Extract::new(&base, false, true).run(&mut parsed).unwrap();

        let mut reload = ParseDir::new(Box::new(DirStore::new(&base)));
        let mut reloaded = reload.parse().unwrap();
        let mut ctx = ParseContext::new(&registry);
        Assemble::new(&mut ctx).run(&mut reloaded).unwrap();

        assert_eq!(reloaded.buf(), &original[..]);
        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn overflowing_a_fixed_volume_fails() {
        let mut volume = FirmwareVolume::new(fv::guid::FFS3, fv::attributes::ERASE_POLARITY);
        volume.resizable = false;
        volume.length = 0x80; // too small for header plus file
        volume.blocks.push(fv::BlockMapEntry { count: 1, size: 0x80 });
        volume.files.push(Firmware::File(driver_with_raw_section(&[0xA5; 64])));
        let mut root = Firmware::FirmwareVolume(volume);

        let registry = CodecRegistry::new();
        let mut ctx = ParseContext::new(&registry);
        assert!(matches!(
            Assemble::new(&mut ctx).run(&mut root),
            Err(FirmwareError::AssembleOverflow { .. })
        ));
    }
}
