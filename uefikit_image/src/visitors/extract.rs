//! Extract every node's bytes into a directory-backed blob store and
//! write the manifest alongside them.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::cell::Cell;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::rc::Rc;

use crate::err::FirmwareError;
use crate::manifest::{self, BlobStore, DirStore};
use crate::tree::{Firmware, Visitor};

/// Extract the tree under a base directory.
///
/// Layout: firmware volumes get directories named by their hex offset,
/// files `<GUID>/<ordinal>`, sections their in-file index; the fixed nodes
/// use `ifd`, `bios`, `me`, the region type name, or `biospad_<offset>`.
/// Each node records the relative path of its blob; `summary.json` at the
/// root ties it together.
///
/// The visitor clones itself before descending so sibling subtrees see the
/// same directory prefix; the file ordinal counter is shared across the
/// clones.
#[derive(Clone)]
pub struct Extract {
    store: DirStore,
    dir: PathBuf,
    index: Rc<Cell<u64>>,
    pub force: bool,
    pub remove: bool,
}

impl Extract {
    pub fn new(base: impl Into<PathBuf>, force: bool, remove: bool) -> Self {
        Extract {
            store: DirStore::new(base),
            dir: PathBuf::new(),
            index: Rc::new(Cell::new(0)),
            force,
            remove,
        }
    }

    fn extract_binary(&mut self, buf: &[u8], filename: &str) -> Result<String, FirmwareError> {
        let rel = self.dir.join(filename).to_string_lossy().into_owned();
        self.store.write(&rel, buf)?;
        Ok(rel)
    }
}

impl Visitor for Extract {
    fn run(&mut self, root: &mut Firmware) -> Result<(), FirmwareError> {
        if self.remove {
            if let Err(err) = fs::remove_dir_all(&self.store.base) {
                if err.kind() != ErrorKind::NotFound {
                    return Err(err.into());
                }
            }
        }
        if !self.force {
            match fs::read_dir(&self.store.base) {
                Ok(mut entries) => {
                    if entries.next().is_some() {
                        return Err(FirmwareError::Other(
                            "existing directory not empty, use --force to overwrite".to_string(),
                        ));
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        fs::create_dir_all(&self.store.base)?;

        self.index.set(0);
        root.apply(self)?;

        let json = manifest::marshal(root)?;
        self.store.write(manifest::SUMMARY_NAME, json.as_bytes())?;
        Ok(())
    }

    fn visit(&mut self, node: &mut Firmware) -> Result<(), FirmwareError> {
        // Clone before descending; a sibling must not see this node's
        // directory.
        let mut descend = self.clone();

        match node {
            Firmware::FirmwareVolume(volume) => {
                descend.dir = self.dir.join(format!("{:#x}", volume.fv_offset));
                if volume.files.is_empty() {
                    volume.extract_path = descend.extract_binary(&volume.buf, "fv.bin")?;
                } else {
                    let header_end = (volume.data_offset as usize).min(volume.buf.len());
                    let header = volume.buf[..header_end].to_vec();
                    volume.extract_path = descend.extract_binary(&header, "fvh.bin")?;
                }
            }
            Firmware::File(file) => {
                let ordinal = self.index.get();
                self.index.set(ordinal + 1);
                descend.dir =
                    self.dir.join(file.header.guid.to_string()).join(ordinal.to_string());
                if file.sections.is_empty() && file.nvar_store.is_none() {
                    let name = format!("{}.ffs", file.header.guid);
                    file.extract_path = descend.extract_binary(&file.buf, &name)?;
                }
            }
            Firmware::Section(section) => {
                descend.dir = self.dir.join(section.file_order.to_string());
                if section.encapsulated.is_empty() {
                    let name = format!("{}.sec", section.file_order);
                    section.extract_path = descend.extract_binary(&section.buf, &name)?;
                }
            }
            Firmware::NVarStore(store) => {
                let path = descend.extract_binary(&store.buf, "nvarstore.bin")?;
                store.extract_path = path;
            }
            Firmware::FlashDescriptor(ifd) => {
                descend.dir = self.dir.join("ifd");
                ifd.extract_path = descend.extract_binary(&ifd.buf, "flashdescriptor.bin")?;
            }
            Firmware::BiosRegion(region) => {
                descend.dir = self.dir.join("bios");
                if region.elements.is_empty() {
                    region.extract_path = descend.extract_binary(&region.buf, "biosregion.bin")?;
                }
            }
            Firmware::MeRegion(region) => {
                descend.dir = self.dir.join("me");
                region.extract_path = descend.extract_binary(&region.buf, "meregion.bin")?;
            }
            Firmware::RawRegion(region) => {
                descend.dir = self.dir.join(region.region_type.name());
                let name = format!("{:#x}.bin", region.f_region.base_offset());
                region.extract_path = descend.extract_binary(&region.buf, &name)?;
            }
            Firmware::BiosPadding(padding) => {
                descend.dir = self.dir.join(format!("biospad_{:#x}", padding.offset));
                padding.extract_path = descend.extract_binary(&padding.buf, "pad.bin")?;
            }
            Firmware::FlashImage(_) | Firmware::MeFpt(_) | Firmware::Unknown => {}
        }

        node.apply_children(&mut descend)
    }
}
