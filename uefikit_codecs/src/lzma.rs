//! LZMA codecs: an in-process backend and a system-`xz` backend. Both
//! decode identically; only encoding differs in speed and ratio.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

use lzma_rs::compress::{Options, UnpackedSize};

use uefikit_image::codec::{Codec, CodecError};

/// Byte offset of the 8-byte uncompressed-size field in an LZMA stream,
/// right after the properties byte and the dictionary size.
pub const SIZE_FIELD_OFFSET: usize = 5;

fn decode_lzma(encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoded = Vec::new();
    lzma_rs::lzma_decompress(&mut Cursor::new(encoded), &mut decoded)
        .map_err(|err| CodecError(format!("lzma decompress: {err}")))?;
    Ok(decoded)
}

/// In-process LZMA via `lzma-rs`.
#[derive(Default, Clone, Copy)]
pub struct Lzma;

impl Codec for Lzma {
    fn name(&self) -> &'static str {
        "LZMA"
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
        decode_lzma(encoded)
    }

    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoded = Vec::new();
        let options =
            Options { unpacked_size: UnpackedSize::WriteToHeader(Some(decoded.len() as u64)) };
        lzma_rs::lzma_compress_with_options(&mut Cursor::new(decoded), &mut encoded, &options)
            .map_err(|err| CodecError(format!("lzma compress: {err}")))?;
        Ok(encoded)
    }
}

/// LZMA encoding through the system `xz` command. Decoding still happens
/// in-process, so the `decode(encode(x)) == x` property holds regardless
/// of which backend produced the stream.
#[derive(Clone)]
pub struct SystemLzma {
    xz_path: String,
}

impl SystemLzma {
    pub fn new(xz_path: impl Into<String>) -> Self {
        SystemLzma { xz_path: xz_path.into() }
    }
}

impl Codec for SystemLzma {
    fn name(&self) -> &'static str {
        "LZMA"
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
        decode_lzma(encoded)
    }

    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut child = Command::new(&self.xz_path)
            .args(["--format=lzma", "-7", "--stdout"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let mut stdin =
            child.stdin.take().ok_or_else(|| CodecError("xz stdin unavailable".to_string()))?;
        // Feed stdin from a second thread; draining stdout at the same
        // time keeps large payloads from stalling on a full pipe.
        let output = std::thread::scope(|scope| -> Result<_, CodecError> {
            let writer = scope.spawn(move || stdin.write_all(decoded));
            let output = child.wait_with_output()?;
            writer
                .join()
                .map_err(|_| CodecError("xz stdin writer panicked".to_string()))??;
            Ok(output)
        })?;
        if !output.status.success() {
            return Err(CodecError(format!("{} exited with {}", self.xz_path, output.status)));
        }
        let mut encoded = output.stdout;
        if encoded.len() < SIZE_FIELD_OFFSET + 8 {
            return Err(CodecError("xz produced a truncated LZMA stream".to_string()));
        }
        // xz leaves the size field as the unknown-size sentinel; firmware
        // expects the true uncompressed length there.
        encoded[SIZE_FIELD_OFFSET..SIZE_FIELD_OFFSET + 8]
            .copy_from_slice(&(decoded.len() as u64).to_le_bytes());
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_patched_size_field() {
        let payload = b"hello world";
        let encoded = Lzma.encode(payload).unwrap();
        assert_eq!(
            &encoded[SIZE_FIELD_OFFSET..SIZE_FIELD_OFFSET + 8],
            &[0x0B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(Lzma.decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn round_trip_larger_payloads() {
        let payload: Vec<u8> = (0..100_000u32).flat_map(|v| v.to_le_bytes()).collect();
        let encoded = Lzma.encode(&payload).unwrap();
        assert_eq!(Lzma.decode(&encoded).unwrap(), payload);
    }
}
