//! The visitor library: find, dump, extract, JSON printing, directory
//! reload, and reassembly.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

mod assemble;
mod dump;
mod extract;
mod find;
mod json;
mod parsedir;

pub use assemble::Assemble;
pub use dump::Dump;
pub use extract::Extract;
pub use find::{
    file_predicate, file_type_predicate, find_dxe_fv, find_exactly_one, Find, FindPredicate,
};
pub use json::JsonPrint;
pub use parsedir::ParseDir;
