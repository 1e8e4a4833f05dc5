//! FFS section parsing and serialization: the common and extended
//! headers, GUID-defined encapsulation with codec dispatch, and the
//! UI/Version/DepEx/FV-image specializations.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use core::ptr;

use log::{error, warn};
use serde::{Deserialize, Serialize};

use uefikit_pi::base::{align4, read3, write3};
use uefikit_pi::fw_fs::ffs::section::{self as raw, header::PROCESSING_REQUIRED};
use uefikit_pi::Guid;

use crate::ctx::ParseContext;
use crate::err::FirmwareError;
use crate::tree::Firmware;
use crate::volume::FirmwareVolume;

/// Decode a NUL-terminated UCS-2 LE string.
pub(crate) fn ucs2_to_utf8(bytes: &[u8]) -> String {
    let units: Vec<u16> =
        bytes.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]])).collect();
    String::from_utf16_lossy(&units).trim_end_matches('\0').to_string()
}

/// Encode a string as NUL-terminated UCS-2 LE.
pub(crate) fn utf8_to_ucs2(text: &str) -> Vec<u8> {
    text.encode_utf16().chain(std::iter::once(0)).flat_map(u16::to_le_bytes).collect()
}

/// Name of a dependency-expression opcode byte.
pub fn depex_op_name(op: u8) -> Option<&'static str> {
    Some(match op {
        0x00 => "BEFORE",
        0x01 => "AFTER",
        0x02 => "PUSH",
        0x03 => "AND",
        0x04 => "OR",
        0x05 => "NOT",
        0x06 => "TRUE",
        0x07 => "FALSE",
        0x08 => "END",
        0x09 => "SOR",
        _ => return None,
    })
}

/// Opcode byte for a dependency-expression name.
pub fn depex_op_code(name: &str) -> Option<u8> {
    (0x00..=0x09).find(|&op| depex_op_name(op) == Some(name))
}

/// One operation of a dependency expression. `BEFORE`, `AFTER`, and `PUSH`
/// carry a GUID operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DepExOp {
    pub op_code: String,
    #[serde(rename = "GUID", default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Guid>,
}

/// Decode a dependency expression opcode stream. The stream must end with
/// `END`; anything else is a fatal parse error.
pub fn parse_depex(bytes: &[u8]) -> Result<Vec<DepExOp>, FirmwareError> {
    let mut ops = Vec::new();
    let mut offset = 0usize;
    loop {
        let Some(&code) = bytes.get(offset) else {
            return Err(FirmwareError::InvalidField {
                context: "dependency expression",
                detail: "no END opcode before the section ended".to_string(),
            });
        };
        offset += 1;
        let Some(name) = depex_op_name(code) else {
            return Err(FirmwareError::InvalidField {
                context: "dependency expression",
                detail: format!("unknown opcode {code:#04x}"),
            });
        };
        let mut op = DepExOp { op_code: name.to_string(), guid: None };
        if matches!(name, "BEFORE" | "AFTER" | "PUSH") {
            let Some(guid_bytes) = bytes.get(offset..offset + 16) else {
                return Err(FirmwareError::InvalidField {
                    context: "dependency expression",
                    detail: format!("{name} opcode truncated before its GUID"),
                });
            };
            op.guid = Some(Guid::from_bytes(guid_bytes.try_into().unwrap()));
            offset += 16;
        }
        let done = name == "END";
        ops.push(op);
        if done {
            return Ok(ops);
        }
    }
}

/// Re-encode a dependency expression for assembly.
pub fn encode_depex(ops: &[DepExOp]) -> Result<Vec<u8>, FirmwareError> {
    let mut out = Vec::new();
    for op in ops {
        let code = depex_op_code(&op.op_code).ok_or_else(|| FirmwareError::InvalidField {
            context: "dependency expression",
            detail: format!("unknown opcode name {:?}", op.op_code),
        })?;
        out.push(code);
        if matches!(op.op_code.as_str(), "BEFORE" | "AFTER" | "PUSH") {
            let guid = op.guid.ok_or_else(|| FirmwareError::InvalidField {
                context: "dependency expression",
                detail: format!("{} opcode is missing its GUID", op.op_code),
            })?;
            out.extend_from_slice(guid.as_bytes());
        }
    }
    Ok(out)
}

/// The GUID-defined type-specific header, with the codec tag recorded for
/// the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GuidDefinedHeader {
    #[serde(rename = "GUID")]
    pub guid: Guid,
    pub data_offset: u16,
    pub attributes: u16,
    pub compression: String,
}

/// Polymorphic type-specific header, tagged so the manifest can rebuild
/// the right variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Header")]
pub enum TypeSpecificHeader {
    GuidDefined(GuidDefinedHeader),
}

/// The common (and, where present, extended) section header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SectionHeader {
    #[serde(skip)]
    pub size: [u8; 3],
    #[serde(rename = "Type")]
    pub section_type: u8,
    #[serde(skip)]
    pub extended_size: u32,
}

fn u16_is_zero(value: &u16) -> bool {
    *value == 0
}

/// A section node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Section {
    #[serde(skip)]
    pub(crate) buf: Vec<u8>,
    pub header: SectionHeader,
    #[serde(rename = "Type")]
    pub type_name: String,
    #[serde(default)]
    pub extract_path: String,
    #[serde(skip)]
    pub file_order: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_specific: Option<TypeSpecificHeader>,
    // EFI_SECTION_USER_INTERFACE
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    // EFI_SECTION_VERSION
    #[serde(default, skip_serializing_if = "u16_is_zero")]
    pub build_number: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    // The DepEx section family
    #[serde(rename = "DepEx", default, skip_serializing_if = "Vec::is_empty")]
    pub dep_ex: Vec<DepExOp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encapsulated: Vec<Firmware>,
}

impl Section {
    /// A section builder holding only payload bytes; `gen_sec_header`
    /// completes it into an on-media image.
    pub fn new(section_type: u8, body: Vec<u8>) -> Self {
        Section {
            buf: body,
            header: SectionHeader { size: [0; 3], section_type, extended_size: 0 },
            type_name: raw::type_name(section_type).to_string(),
            extract_path: String::new(),
            file_order: 0,
            type_specific: None,
            name: String::new(),
            build_number: 0,
            version: String::new(),
            dep_ex: Vec::new(),
            encapsulated: Vec::new(),
        }
    }

    /// Parse a section from the start of `buf`. `file_order` is the index
    /// of the section within its parent, used for extraction naming.
    pub fn parse(buf: &[u8], file_order: usize, ctx: &mut ParseContext) -> Result<Section, FirmwareError> {
        if buf.len() < raw::MIN_LENGTH {
            return Err(FirmwareError::Truncated {
                context: "section header",
                need: raw::MIN_LENGTH,
                have: buf.len(),
            });
        }
        let size = [buf[0], buf[1], buf[2]];
        let section_type = buf[3];

        let mut header_size = raw::MIN_LENGTH;
        let extended_size;
        if raw::recognized(section_type) {
            if size == [0xFF, 0xFF, 0xFF] {
                if buf.len() < raw::EXT_MIN_LENGTH {
                    return Err(FirmwareError::Truncated {
                        context: "section extended header",
                        need: raw::EXT_MIN_LENGTH,
                        have: buf.len(),
                    });
                }
                let ext = u32::from_le_bytes(buf[4..8].try_into().unwrap());
                if ext == 0xFFFF_FFFF {
                    return Err(FirmwareError::InvalidField {
                        context: "section",
                        detail: "size and extended size are all ones; free space cannot appear inside a file"
                            .to_string(),
                    });
                }
                extended_size = ext;
                header_size = raw::EXT_MIN_LENGTH;
            } else {
                extended_size = read3(size);
            }
        } else {
            // Unknown types sometimes carry garbage sizes; clamp to the
            // buffer and keep the body opaque.
            extended_size = read3(size).min(buf.len() as u32);
        }

        if extended_size as usize > buf.len() {
            return Err(FirmwareError::InvalidField {
                context: "section",
                detail: format!(
                    "section declares {extended_size:#x} bytes but only {:#x} remain",
                    buf.len()
                ),
            });
        }

        let mut section = Section {
            buf: buf[..extended_size as usize].to_vec(),
            header: SectionHeader { size, section_type, extended_size },
            type_name: raw::type_name(section_type).to_string(),
            extract_path: String::new(),
            file_order,
            type_specific: None,
            name: String::new(),
            build_number: 0,
            version: String::new(),
            dep_ex: Vec::new(),
            encapsulated: Vec::new(),
        };

        match section_type {
            raw::raw_type::GUID_DEFINED => section.parse_guid_defined(header_size, ctx)?,
            raw::raw_type::USER_INTERFACE => {
                section.check_body(header_size)?;
                section.name = ucs2_to_utf8(&section.buf[header_size..]);
            }
            raw::raw_type::VERSION => {
                section.check_body(header_size + 2)?;
                section.build_number =
                    u16::from_le_bytes([section.buf[header_size], section.buf[header_size + 1]]);
                section.version = ucs2_to_utf8(&section.buf[header_size + 2..]);
            }
            raw::raw_type::FIRMWARE_VOLUME_IMAGE => {
                section.check_body(header_size)?;
                // Nested volumes may grow on reassembly.
                let volume = FirmwareVolume::parse(&section.buf[header_size..], 0, true, ctx)?;
                section.encapsulated.push(Firmware::FirmwareVolume(volume));
            }
            raw::raw_type::DXE_DEPEX | raw::raw_type::PEI_DEPEX | raw::raw_type::MM_DEPEX => {
                section.check_body(header_size)?;
                section.dep_ex = parse_depex(&section.buf[header_size..])?;
            }
            _ => {}
        }

        Ok(section)
    }

    fn check_body(&self, header_size: usize) -> Result<(), FirmwareError> {
        if self.buf.len() <= header_size {
            return Err(FirmwareError::InvalidField {
                context: "section",
                detail: format!(
                    "{} header of {header_size:#x} bytes leaves no body in {:#x} bytes",
                    self.type_name,
                    self.buf.len()
                ),
            });
        }
        Ok(())
    }

    fn parse_guid_defined(&mut self, header_size: usize, ctx: &mut ParseContext) -> Result<(), FirmwareError> {
        let guid_header_len = core::mem::size_of::<raw::header::GuidDefined>();
        if self.buf.len() < header_size + guid_header_len {
            return Err(FirmwareError::Truncated {
                context: "GUID-defined section header",
                need: header_size + guid_header_len,
                have: self.buf.len(),
            });
        }
        // Safety: bounds checked above.
        let guid_defined = unsafe {
            ptr::read_unaligned(self.buf[header_size..].as_ptr() as *const raw::header::GuidDefined)
        };
        let data_offset = guid_defined.data_offset as usize;
        if data_offset > self.buf.len() || data_offset < header_size + guid_header_len {
            return Err(FirmwareError::OutOfBounds {
                context: "GUID-defined section",
                detail: format!(
                    "data offset {data_offset:#x} escapes section of {:#x} bytes",
                    self.buf.len()
                ),
            });
        }

        let mut type_specific = GuidDefinedHeader {
            guid: guid_defined.section_definition_guid,
            data_offset: guid_defined.data_offset,
            attributes: guid_defined.attributes,
            compression: String::new(),
        };

        let mut encap_buf = Vec::new();
        if guid_defined.attributes & PROCESSING_REQUIRED != 0 {
            match ctx.codecs().lookup(&type_specific.guid) {
                Some(codec) => {
                    type_specific.compression = codec.name().to_string();
                    match codec.decode(&self.buf[data_offset..]) {
                        Ok(decoded) => encap_buf = decoded,
                        Err(err) => {
                            // Keep the section with an opaque body.
                            error!(
                                "failed to decode GUID-defined section {}: {err}",
                                type_specific.guid
                            );
                            type_specific.compression = "UNKNOWN".to_string();
                        }
                    }
                }
                None => {
                    warn!("{}", FirmwareError::UnsupportedGuidCompression(type_specific.guid));
                    type_specific.compression = "UNKNOWN".to_string();
                }
            }
        }
        self.type_specific = Some(TypeSpecificHeader::GuidDefined(type_specific));

        let mut offset = 0usize;
        let mut index = 0usize;
        while offset < encap_buf.len() {
            let sub = Section::parse(&encap_buf[offset..], index, ctx)?;
            let sub_len = sub.header.extended_size as usize;
            if sub_len == 0 {
                return Err(FirmwareError::InvalidField {
                    context: "GUID-defined section",
                    detail: format!("zero-length encapsulated section at offset {offset:#x}"),
                });
            }
            offset = align4((offset + sub_len) as u64) as usize;
            self.encapsulated.push(Firmware::Section(sub));
            index += 1;
        }
        Ok(())
    }

    /// Build the full on-media image from a payload-only `buf`: compute the
    /// extended size, switch to the extended header past 16 MiB, fix up the
    /// GUID-defined data offset, and prepend the type-specific and common
    /// headers.
    pub fn gen_sec_header(&mut self) -> Result<(), FirmwareError> {
        let type_specific_len = match &self.type_specific {
            Some(TypeSpecificHeader::GuidDefined(_)) => {
                core::mem::size_of::<raw::header::GuidDefined>() as u32
            }
            None => 0,
        };
        let mut header_len = raw::MIN_LENGTH as u32 + type_specific_len;
        let mut extended_size = self.buf.len() as u32 + header_len;
        if extended_size >= 0xFF_FFFF {
            header_len += 4;
            extended_size += 4;
        }

        if let Some(TypeSpecificHeader::GuidDefined(guid_defined)) = &mut self.type_specific {
            guid_defined.data_offset = header_len as u16;
            let mut with_header = Vec::with_capacity(20 + self.buf.len());
            with_header.extend_from_slice(guid_defined.guid.as_bytes());
            with_header.extend_from_slice(&guid_defined.data_offset.to_le_bytes());
            with_header.extend_from_slice(&guid_defined.attributes.to_le_bytes());
            with_header.append(&mut self.buf);
            self.buf = with_header;
        }

        self.header.size = write3(extended_size as u64);
        self.header.extended_size = extended_size;

        let mut image = Vec::with_capacity(8 + self.buf.len());
        image.extend_from_slice(&self.header.size);
        image.push(self.header.section_type);
        if extended_size >= 0xFF_FFFF {
            image.extend_from_slice(&extended_size.to_le_bytes());
        }
        image.append(&mut self.buf);
        self.buf = image;
        Ok(())
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, CodecError, CodecRegistry};

    fn plain_ctx(registry: &CodecRegistry) -> ParseContext<'_> {
        ParseContext::new(registry)
    }

    fn raw_section_bytes(payload: &[u8]) -> Vec<u8> {
        let mut section = Section::new(raw::raw_type::RAW, payload.to_vec());
        section.gen_sec_header().unwrap();
        section.buf
    }

    #[test]
    fn depex_stream_decodes_and_requires_end() {
        let guid: Guid = "01234567-89AB-CDEF-0123-456789ABCDEF".parse().unwrap();
        let mut bytes = vec![0x02u8];
        bytes.extend_from_slice(guid.as_bytes());
        bytes.extend_from_slice(&[0x06, 0x08]);
        let ops = parse_depex(&bytes).unwrap();
        assert_eq!(
            ops,
            vec![
                DepExOp { op_code: "PUSH".to_string(), guid: Some(guid) },
                DepExOp { op_code: "TRUE".to_string(), guid: None },
                DepExOp { op_code: "END".to_string(), guid: None },
            ]
        );
        assert_eq!(encode_depex(&ops).unwrap(), bytes);

        // the same stream without the trailing END is fatal
        bytes.pop();
        assert!(matches!(
            parse_depex(&bytes),
            Err(FirmwareError::InvalidField { .. })
        ));
    }

    #[test]
    fn depex_section_parses() {
        let guid: Guid = "01234567-89AB-CDEF-0123-456789ABCDEF".parse().unwrap();
        let mut body = vec![0x02u8];
        body.extend_from_slice(guid.as_bytes());
        body.extend_from_slice(&[0x06, 0x08]);
        let mut section = Section::new(raw::raw_type::DXE_DEPEX, body);
        section.gen_sec_header().unwrap();

        let registry = CodecRegistry::new();
        let mut ctx = plain_ctx(&registry);
        let parsed = Section::parse(&section.buf, 0, &mut ctx).unwrap();
        assert_eq!(parsed.dep_ex.len(), 3);
        assert_eq!(parsed.dep_ex[0].guid, Some(guid));
    }

    #[test]
    fn ui_and_version_round_trip() {
        let mut ui = Section::new(raw::raw_type::USER_INTERFACE, utf8_to_ucs2("Shell"));
        ui.gen_sec_header().unwrap();
        let registry = CodecRegistry::new();
        let mut ctx = plain_ctx(&registry);
        let parsed = Section::parse(&ui.buf, 0, &mut ctx).unwrap();
        assert_eq!(parsed.name, "Shell");

        let mut body = 7u16.to_le_bytes().to_vec();
        body.extend(utf8_to_ucs2("1.0"));
        let mut version = Section::new(raw::raw_type::VERSION, body);
        version.gen_sec_header().unwrap();
        let parsed = Section::parse(&version.buf, 0, &mut ctx).unwrap();
        assert_eq!(parsed.build_number, 7);
        assert_eq!(parsed.version, "1.0");
    }

    #[test]
    fn unknown_type_sizes_clamp_but_recognized_types_error() {
        // unknown type declaring more than the buffer holds
        let mut bytes = vec![0u8; 16];
        bytes[0..3].copy_from_slice(&write3(0x100));
        bytes[3] = 0x42;
        let registry = CodecRegistry::new();
        let mut ctx = plain_ctx(&registry);
        let parsed = Section::parse(&bytes, 0, &mut ctx).unwrap();
        assert_eq!(parsed.header.extended_size, 16);

        // a recognized type with the same mismatch is an error
        bytes[3] = raw::raw_type::RAW;
        assert!(matches!(
            Section::parse(&bytes, 0, &mut ctx),
            Err(FirmwareError::InvalidField { .. })
        ));
    }

    #[test]
    fn all_ones_extended_size_is_rejected() {
        let mut bytes = vec![0xFFu8; 16];
        bytes[3] = raw::raw_type::RAW;
        let registry = CodecRegistry::new();
        let mut ctx = plain_ctx(&registry);
        assert!(matches!(
            Section::parse(&bytes, 0, &mut ctx),
            Err(FirmwareError::InvalidField { .. })
        ));
    }

    struct Passthrough;
    impl Codec for Passthrough {
        fn name(&self) -> &'static str {
            "PASSTHROUGH"
        }
        fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
            Ok(encoded.to_vec())
        }
        fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CodecError> {
            Ok(decoded.to_vec())
        }
    }

    fn guided_section_bytes(guid: Guid, payload: &[u8]) -> Vec<u8> {
        let mut section = Section::new(raw::raw_type::GUID_DEFINED, payload.to_vec());
        section.type_specific = Some(TypeSpecificHeader::GuidDefined(GuidDefinedHeader {
            guid,
            data_offset: 0,
            attributes: PROCESSING_REQUIRED,
            compression: String::new(),
        }));
        section.gen_sec_header().unwrap();
        section.buf
    }

    #[test]
    fn guided_section_decodes_through_the_registry() {
        let guid: Guid = "AE717C2F-1A42-4F2B-8861-78B79CA07E07".parse().unwrap();
        let mut registry = CodecRegistry::new();
        registry.register(guid, Box::new(Passthrough));

        let inner = raw_section_bytes(b"payload bytes");
        let bytes = guided_section_bytes(guid, &inner);

        let mut ctx = plain_ctx(&registry);
        let parsed = Section::parse(&bytes, 0, &mut ctx).unwrap();
        let Some(TypeSpecificHeader::GuidDefined(ts)) = &parsed.type_specific else {
            panic!("missing type-specific header");
        };
        assert_eq!(ts.compression, "PASSTHROUGH");
        assert_eq!(ts.data_offset, 24);
        assert_eq!(parsed.encapsulated.len(), 1);
        let Firmware::Section(sub) = &parsed.encapsulated[0] else {
            panic!("expected a section child");
        };
        assert_eq!(&sub.buf[4..], b"payload bytes");
    }

    #[test]
    fn unknown_guid_keeps_the_body_opaque() {
        let guid: Guid = "AE717C2F-1A42-4F2B-8861-78B79CA07E07".parse().unwrap();
        let registry = CodecRegistry::new();
        let bytes = guided_section_bytes(guid, b"opaque payload");
        let mut ctx = plain_ctx(&registry);
        let parsed = Section::parse(&bytes, 0, &mut ctx).unwrap();
        let Some(TypeSpecificHeader::GuidDefined(ts)) = &parsed.type_specific else {
            panic!("missing type-specific header");
        };
        assert_eq!(ts.compression, "UNKNOWN");
        assert!(parsed.encapsulated.is_empty());
    }

    #[test]
    fn gen_sec_header_round_trips_a_raw_section() {
        let bytes = raw_section_bytes(&[0x11; 37]);
        assert_eq!(read3([bytes[0], bytes[1], bytes[2]]), 41);
        let registry = CodecRegistry::new();
        let mut ctx = plain_ctx(&registry);
        let parsed = Section::parse(&bytes, 3, &mut ctx).unwrap();
        assert_eq!(parsed.header.extended_size, 41);
        assert_eq!(parsed.file_order, 3);
        assert_eq!(&parsed.buf[4..], &[0x11; 37]);
    }
}
