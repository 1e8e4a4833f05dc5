//! Rebuild a firmware tree from an extracted directory: decode the
//! manifest, then bind every node's blob back into its buffer.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use crate::err::FirmwareError;
use crate::manifest::{self, BlobStore};
use crate::tree::{Firmware, Visitor};

/// Reload a tree from a blob store written by [`crate::visitors::Extract`].
///
/// The reloaded tree has raw blobs bound but composite buffers (files with
/// sections, volumes with files) still empty; run
/// [`crate::visitors::Assemble`] to rebuild those bottom-up.
pub struct ParseDir {
    pub store: Box<dyn BlobStore>,
}

impl ParseDir {
    pub fn new(store: Box<dyn BlobStore>) -> Self {
        ParseDir { store }
    }

    /// Read `summary.json`, decode the tree, and bind the blobs.
    pub fn parse(&mut self) -> Result<Firmware, FirmwareError> {
        let json = self.store.read(manifest::SUMMARY_NAME)?;
        let mut root = manifest::unmarshal(&json)?;
        root.apply(self)?;
        Ok(root)
    }
}

impl Visitor for ParseDir {
    fn visit(&mut self, node: &mut Firmware) -> Result<(), FirmwareError> {
        let path = node.extract_path().to_string();
        if !path.is_empty() {
            let buf = self.store.read(&path)?;
            node.set_buf(buf);
        }
        node.apply_children(self)
    }
}
