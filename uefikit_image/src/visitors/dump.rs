//! Write the byte image of a single matched node to a writer.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::io::Write;
use std::rc::Rc;

use crate::err::FirmwareError;
use crate::tree::{Firmware, Visitor};
use crate::visitors::find::{Find, FindPredicate};

/// Dump the buffer of the one node matching the predicate. Zero matches
/// and multiple matches are both errors.
///
/// On a tree reloaded from a manifest the buffers are only populated after
/// assembly, so run [`crate::visitors::Assemble`] first.
pub struct Dump<W: Write> {
    pub predicate: FindPredicate,
    pub writer: W,
}

impl<W: Write> Visitor for Dump<W> {
    fn visit(&mut self, node: &mut Firmware) -> Result<(), FirmwareError> {
        let mut find = Find::new(Rc::clone(&self.predicate));
        find.run(node)?;
        match find.matches.len() {
            0 => Err(FirmwareError::Other("no matches found".to_string())),
            1 => {
                self.writer.write_all(find.matches[0].buf())?;
                Ok(())
            }
            many => Err(FirmwareError::Other(format!(
                "multiple matches found, only one allowed, got {many}"
            ))),
        }
    }
}
