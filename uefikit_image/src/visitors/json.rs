//! Print a node (usually the root) as indented JSON.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::io::Write;

use crate::err::FirmwareError;
use crate::tree::{Firmware, Visitor};

/// Serialize the visited node, children included, to the writer. Does not
/// descend on its own; applying it to the root prints the whole tree once.
pub struct JsonPrint<W: Write> {
    pub writer: W,
}

impl<W: Write> Visitor for JsonPrint<W> {
    fn visit(&mut self, node: &mut Firmware) -> Result<(), FirmwareError> {
        serde_json::to_writer_pretty(&mut self.writer, node)?;
        writeln!(self.writer)?;
        Ok(())
    }
}
