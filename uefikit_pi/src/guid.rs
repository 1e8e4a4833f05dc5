//! The 16-byte identifier used throughout UEFI firmware storage.
//!
//! Storage order is the EFI mixed-endian layout: the first three fields
//! (4, 2, 2 bytes) are little-endian on media, the remaining ten bytes are
//! stored as written. The canonical text form shows the first three fields
//! in natural order, which is exactly the `uuid` crate's `*_le` conversion.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Canonical example used in parse error messages.
pub const EXAMPLE: &str = "01234567-89AB-CDEF-0123-456789ABCDEF";

/// Error returned when a GUID string is not 32 hex digits (hyphens aside).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed GUID {input:?}, expected the form {EXAMPLE}")]
pub struct GuidParseError {
    input: String,
}

/// A GUID in on-media byte order.
#[repr(transparent)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid([u8; 16]);

impl Guid {
    /// The all-zeros GUID, used for pad files under erase polarity 0x00.
    pub const ZERO: Guid = Guid([0u8; 16]);

    /// The all-ones GUID, used for pad files under erase polarity 0xFF.
    pub const FULL: Guid = Guid([0xFFu8; 16]);

    /// Construct from bytes already in on-media order.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Guid(bytes)
    }

    /// Construct from the conventional field notation. The first three
    /// fields are converted to little-endian storage order.
    pub const fn from_fields(
        time_low: u32,
        time_mid: u16,
        time_hi_and_version: u16,
        clk_seq_hi_res: u8,
        clk_seq_low: u8,
        node: &[u8; 6],
    ) -> Self {
        let a = time_low.to_le_bytes();
        let b = time_mid.to_le_bytes();
        let c = time_hi_and_version.to_le_bytes();
        Guid([
            a[0],
            a[1],
            a[2],
            a[3],
            b[0],
            b[1],
            c[0],
            c[1],
            clk_seq_hi_res,
            clk_seq_low,
            node[0],
            node[1],
            node[2],
            node[3],
            node[4],
            node[5],
        ])
    }

    /// The on-media byte representation.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uuid = Uuid::from_bytes_le(self.0);
        let mut buffer = Uuid::encode_buffer();
        f.write_str(uuid.hyphenated().encode_upper(&mut buffer))
    }
}

impl FromStr for Guid {
    type Err = GuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped: String = s.chars().filter(|&c| c != '-').collect();
        if stripped.len() != 32 || !stripped.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(GuidParseError { input: s.to_string() });
        }
        let uuid = Uuid::try_parse(&stripped).map_err(|_| GuidParseError { input: s.to_string() })?;
        Ok(Guid(uuid.to_bytes_le()))
    }
}

// JSON form is `{"GUID": "<canonical>"}` so the manifest stays editable by
// hand.
impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Guid", 1)?;
        state.serialize_field("GUID", &self.to_string())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Repr {
            #[serde(rename = "GUID")]
            guid: String,
        }
        let repr = Repr::deserialize(deserializer)?;
        repr.guid.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_format_round_trip() {
        let text = "01234567-89AB-CDEF-0123-456789ABCDEF";
        let guid: Guid = text.parse().unwrap();
        assert_eq!(
            guid.as_bytes(),
            &[
                0x67, 0x45, 0x23, 0x01, 0xAB, 0x89, 0xEF, 0xCD, 0x01, 0x23, 0x45, 0x67, 0x89,
                0xAB, 0xCD, 0xEF
            ]
        );
        assert_eq!(guid.to_string(), text);
        // format(parse(t)) == t holds for any canonical text
        let other: Guid = "FFF12B8D-7696-4C8B-A985-2747075B4F50".parse().unwrap();
        assert_eq!(other.to_string(), "FFF12B8D-7696-4C8B-A985-2747075B4F50");
    }

    #[test]
    fn from_fields_matches_parse() {
        let parsed: Guid = "EE4E5898-3914-4259-9D6E-DC7BD79403CF".parse().unwrap();
        let built = Guid::from_fields(
            0xEE4E5898,
            0x3914,
            0x4259,
            0x9D,
            0x6E,
            &[0xDC, 0x7B, 0xD7, 0x94, 0x03, 0xCF],
        );
        assert_eq!(parsed, built);
    }

    #[test]
    fn rejects_malformed_text() {
        assert!("not-a-guid".parse::<Guid>().is_err());
        assert!("01234567-89AB-CDEF-0123-456789ABCDE".parse::<Guid>().is_err());
        assert!("01234567-89AB-CDEF-0123-456789ABCDEFF".parse::<Guid>().is_err());
        assert!("0123456789ABCDEF0123456789ABCDEG".parse::<Guid>().is_err());
    }

    #[test]
    fn hyphen_free_text_is_accepted() {
        let a: Guid = "0123456789ABCDEF0123456789ABCDEF".parse().unwrap();
        let b: Guid = "01234567-89AB-CDEF-0123-456789ABCDEF".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn json_object_form() {
        let guid: Guid = "8C8CE578-8A3D-4F1C-9935-896185C32DD3".parse().unwrap();
        let json = serde_json::to_string(&guid).unwrap();
        assert_eq!(json, r#"{"GUID":"8C8CE578-8A3D-4F1C-9935-896185C32DD3"}"#);
        let back: Guid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, guid);
    }
}
