//! Manifest encoding and the blob store the tree's raw bytes live in.
//!
//! The manifest is the JSON form of the whole tree; node buffers are
//! runtime-only and instead referenced by each node's `ExtractPath`,
//! relative to the store root. Reloading parses the JSON into an empty
//! tree and binds the blobs back with the `ParseDir` visitor.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::err::FirmwareError;
use crate::tree::Firmware;

/// Name of the manifest file at the store root.
pub const SUMMARY_NAME: &str = "summary.json";

/// Encode the tree as an indented JSON manifest.
pub fn marshal(root: &Firmware) -> Result<String, FirmwareError> {
    Ok(serde_json::to_string_pretty(root)?)
}

/// Decode a JSON manifest into a tree with empty buffers.
pub fn unmarshal(data: &[u8]) -> Result<Firmware, FirmwareError> {
    Ok(serde_json::from_slice(data)?)
}

/// A byte-blob store keyed by path relative to its root.
pub trait BlobStore {
    fn read(&self, rel: &str) -> io::Result<Vec<u8>>;
    fn write(&mut self, rel: &str, data: &[u8]) -> io::Result<()>;
}

/// The filesystem-backed store used by the extract/reload commands.
#[derive(Debug, Clone)]
pub struct DirStore {
    pub base: PathBuf,
}

impl DirStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        DirStore { base: base.into() }
    }
}

impl BlobStore for DirStore {
    fn read(&self, rel: &str) -> io::Result<Vec<u8>> {
        fs::read(self.base.join(rel))
    }

    fn write(&mut self, rel: &str, data: &[u8]) -> io::Result<()> {
        let path = self.base.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FfsFile;
    use crate::volume::FirmwareVolume;
    use uefikit_pi::fw_fs::fv;
    use uefikit_pi::Guid;

    #[test]
    fn tree_round_trips_through_json() {
        let mut volume = FirmwareVolume::new(fv::guid::FFS3, fv::attributes::ERASE_POLARITY);
        volume.length = 0x1000;
        let mut file = FfsFile::new(Guid::FULL, 0x07);
        file.extract_path = "fv/file/0.ffs".to_string();
        volume.files.push(Firmware::File(file));
        let root = Firmware::FirmwareVolume(volume);

        let json = marshal(&root).unwrap();
        let reloaded = unmarshal(json.as_bytes()).unwrap();
        let Firmware::FirmwareVolume(volume) = reloaded else {
            panic!("wrong root kind");
        };
        assert_eq!(volume.length, 0x1000);
        assert_eq!(volume.files.len(), 1);
        let Firmware::File(file) = &volume.files[0] else {
            panic!("wrong child kind");
        };
        assert_eq!(file.extract_path, "fv/file/0.ffs");
        assert_eq!(file.header.guid, Guid::FULL);
        assert!(file.buf.is_empty());
    }
}
