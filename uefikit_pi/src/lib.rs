//! Raw structure definitions for UEFI Platform Initialization firmware
//! storage, plus the byte-level utilities shared by the parsers.
//!
//! This crate deliberately contains no parsing logic beyond field access;
//! the layouts here mirror the PI specification and are consumed by
//! `uefikit_image`.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

pub mod base;
pub mod fw_fs;
pub mod guid;

pub use guid::Guid;
