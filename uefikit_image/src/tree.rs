//! The uniform firmware node tree and the visitor abstraction over it.
//!
//! Every node kind owns a raw byte buffer and exposes the same small
//! capability set: get/set the buffer, accept a visitor, and walk direct
//! children in declaration order. The enum is adjacently tagged for JSON,
//! so heterogeneous child lists round-trip as `{"Kind": ..., "Value": ...}`
//! objects and unknown tags decode to [`Firmware::Unknown`].
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use serde::{Deserialize, Serialize};

use crate::bios::{BiosPadding, BiosRegion};
use crate::descriptor::FlashDescriptor;
use crate::err::FirmwareError;
use crate::file::FfsFile;
use crate::flash::FlashImage;
use crate::mefpt::{MeFpt, MeRegion};
use crate::nvar::NVarStore;
use crate::region::{FlashRegion, FlashRegionType, RawRegion};
use crate::section::Section;
use crate::volume::FirmwareVolume;

/// A node of the firmware tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Kind", content = "Value")]
pub enum Firmware {
    FlashImage(FlashImage),
    FlashDescriptor(FlashDescriptor),
    BiosRegion(BiosRegion),
    BiosPadding(BiosPadding),
    MeRegion(MeRegion),
    MeFpt(MeFpt),
    RawRegion(RawRegion),
    FirmwareVolume(FirmwareVolume),
    File(FfsFile),
    Section(Section),
    NVarStore(NVarStore),
    /// Produced when a manifest carries a kind tag this build does not
    /// know. Such nodes are inert: no buffer, no children.
    #[serde(other)]
    Unknown,
}

impl Firmware {
    /// The node's raw byte buffer.
    pub fn buf(&self) -> &[u8] {
        match self {
            Firmware::FlashImage(n) => &n.buf,
            Firmware::FlashDescriptor(n) => &n.buf,
            Firmware::BiosRegion(n) => &n.buf,
            Firmware::BiosPadding(n) => &n.buf,
            Firmware::MeRegion(n) => &n.buf,
            Firmware::MeFpt(n) => &n.buf,
            Firmware::RawRegion(n) => &n.buf,
            Firmware::FirmwareVolume(n) => &n.buf,
            Firmware::File(n) => &n.buf,
            Firmware::Section(n) => &n.buf,
            Firmware::NVarStore(n) => &n.buf,
            Firmware::Unknown => &[],
        }
    }

    /// Replace the node's raw byte buffer.
    pub fn set_buf(&mut self, buf: Vec<u8>) {
        match self {
            Firmware::FlashImage(n) => n.buf = buf,
            Firmware::FlashDescriptor(n) => n.buf = buf,
            Firmware::BiosRegion(n) => n.buf = buf,
            Firmware::BiosPadding(n) => n.buf = buf,
            Firmware::MeRegion(n) => n.buf = buf,
            Firmware::MeFpt(n) => n.buf = buf,
            Firmware::RawRegion(n) => n.buf = buf,
            Firmware::FirmwareVolume(n) => n.buf = buf,
            Firmware::File(n) => n.buf = buf,
            Firmware::Section(n) => n.buf = buf,
            Firmware::NVarStore(n) => n.buf = buf,
            Firmware::Unknown => {}
        }
    }

    /// Call the visitor on this node.
    pub fn apply(&mut self, visitor: &mut dyn Visitor) -> Result<(), FirmwareError> {
        visitor.visit(self)
    }

    /// Call the visitor on each direct child, in declaration order.
    pub fn apply_children(&mut self, visitor: &mut dyn Visitor) -> Result<(), FirmwareError> {
        match self {
            Firmware::FlashImage(image) => {
                image.ifd.apply(visitor)?;
                for region in &mut image.regions {
                    region.apply(visitor)?;
                }
            }
            Firmware::BiosRegion(region) => {
                for element in &mut region.elements {
                    element.apply(visitor)?;
                }
            }
            Firmware::MeRegion(region) => {
                if let Some(fpt) = &mut region.fpt {
                    fpt.apply(visitor)?;
                }
            }
            Firmware::FirmwareVolume(volume) => {
                for file in &mut volume.files {
                    file.apply(visitor)?;
                }
            }
            Firmware::File(file) => {
                if let Some(store) = &mut file.nvar_store {
                    store.apply(visitor)?;
                } else {
                    for section in &mut file.sections {
                        section.apply(visitor)?;
                    }
                }
            }
            Firmware::Section(section) => {
                for child in &mut section.encapsulated {
                    child.apply(visitor)?;
                }
            }
            Firmware::FlashDescriptor(_)
            | Firmware::BiosPadding(_)
            | Firmware::MeFpt(_)
            | Firmware::RawRegion(_)
            | Firmware::NVarStore(_)
            | Firmware::Unknown => {}
        }
        Ok(())
    }

    /// The node's blob path relative to the extraction root; empty when
    /// the node has no extracted blob.
    pub fn extract_path(&self) -> &str {
        match self {
            Firmware::FlashImage(n) => &n.extract_path,
            Firmware::FlashDescriptor(n) => &n.extract_path,
            Firmware::BiosRegion(n) => &n.extract_path,
            Firmware::BiosPadding(n) => &n.extract_path,
            Firmware::MeRegion(n) => &n.extract_path,
            Firmware::MeFpt(n) => &n.extract_path,
            Firmware::RawRegion(n) => &n.extract_path,
            Firmware::FirmwareVolume(n) => &n.extract_path,
            Firmware::File(n) => &n.extract_path,
            Firmware::Section(n) => &n.extract_path,
            Firmware::NVarStore(n) => &n.extract_path,
            Firmware::Unknown => "",
        }
    }

    /// The IFD placement of a region node, if this is one.
    pub fn flash_region(&self) -> Option<&FlashRegion> {
        match self {
            Firmware::BiosRegion(region) => region.f_region.as_ref(),
            Firmware::MeRegion(region) => region.f_region.as_ref(),
            Firmware::RawRegion(region) => Some(&region.f_region),
            _ => None,
        }
    }

    /// The IFD slot type of a region node, if this is one.
    pub fn region_type(&self) -> Option<FlashRegionType> {
        match self {
            Firmware::BiosRegion(region) => Some(region.region_type),
            Firmware::MeRegion(region) => Some(region.region_type),
            Firmware::RawRegion(region) => Some(region.region_type),
            _ => None,
        }
    }
}

/// A traversal over the firmware tree.
///
/// `visit` is the per-node callback; traversal is pre-order unless the
/// visitor calls [`Firmware::apply_children`] before its own work. `run`
/// wraps the walk with any setup and teardown the visitor needs. Visitors
/// carry their own mutable state; ones that track per-descent state clone
/// themselves before recursing so siblings start from identical state.
pub trait Visitor {
    /// Entry point: set up, walk from `root`, tear down.
    fn run(&mut self, root: &mut Firmware) -> Result<(), FirmwareError>
    where
        Self: Sized,
    {
        root.apply(self)
    }

    /// Per-node callback.
    fn visit(&mut self, node: &mut Firmware) -> Result<(), FirmwareError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RawRegion;

    struct Collect {
        kinds: Vec<&'static str>,
    }

    impl Visitor for Collect {
        fn visit(&mut self, node: &mut Firmware) -> Result<(), FirmwareError> {
            self.kinds.push(match node {
                Firmware::FirmwareVolume(_) => "fv",
                Firmware::File(_) => "file",
                Firmware::Section(_) => "section",
                Firmware::RawRegion(_) => "raw",
                _ => "other",
            });
            node.apply_children(self)
        }
    }

    #[test]
    fn traversal_is_preorder_and_in_declaration_order() {
        let mut volume = FirmwareVolume::new(uefikit_pi::fw_fs::fv::guid::FFS3, 0);
        let file = FfsFile::new(uefikit_pi::Guid::ZERO, 0x07);
        volume.files.push(Firmware::File(file));
        let mut root = Firmware::FirmwareVolume(volume);

        let mut collect = Collect { kinds: Vec::new() };
        collect.run(&mut root).unwrap();
        assert_eq!(collect.kinds, vec!["fv", "file"]);
    }

    #[test]
    fn unknown_kind_tags_survive_decoding() {
        let json = r#"{"Kind": "FancyNewNode", "Value": {"anything": 1}}"#;
        let node: Firmware = serde_json::from_str(json).unwrap();
        assert!(matches!(node, Firmware::Unknown));
        assert!(node.buf().is_empty());
    }

    #[test]
    fn typed_children_round_trip_through_json() {
        let region = RawRegion::parse(
            &[1, 2, 3],
            FlashRegion { base: 1, limit: 1 },
            FlashRegionType::Gbe,
        );
        let node = Firmware::RawRegion(region);
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains(r#""Kind":"RawRegion""#));
        let back: Firmware = serde_json::from_str(&json).unwrap();
        assert_eq!(back.region_type(), Some(FlashRegionType::Gbe));
        // buffers are runtime-only and come back empty
        assert!(back.buf().is_empty());
    }
}
