//! Outer framing of the NVAR variable store carried in a raw FFS file.
//!
//! The store body is an opaque blob at this layer; entry decoding belongs
//! to an external collaborator. Keeping the bytes verbatim is what makes
//! the enclosing file reassemble exactly.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use serde::{Deserialize, Serialize};

/// An NVAR variable store node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NVarStore {
    #[serde(skip)]
    pub(crate) buf: Vec<u8>,
    pub length: u64,
    #[serde(default)]
    pub extract_path: String,
}

impl NVarStore {
    pub fn parse(buf: &[u8]) -> Self {
        NVarStore { buf: buf.to_vec(), length: buf.len() as u64, extract_path: String::new() }
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }
}
