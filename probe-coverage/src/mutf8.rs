// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Java "modified UTF-8", as used by class-file constants and `DataOutput.writeUTF()`.
//!
//! Differs from UTF-8 in two ways: NUL is encoded as `C0 80`, and
//! supplementary characters are encoded as two 3-byte surrogates.

use anyhow::{bail, Result};

pub fn decode(bytes: &[u8]) -> Result<String> {
    // Fast path: most strings are plain ASCII.
    if bytes.iter().all(|b| *b != 0 && *b < 0x80) {
        // Unwrap checked: ASCII is valid UTF-8.
        return Ok(String::from_utf8(bytes.to_vec()).unwrap());
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b0 = bytes[i] as u16;

        if b0 & 0x80 == 0 {
            units.push(b0);
            i += 1;
        } else if b0 & 0xe0 == 0xc0 {
            let b1 = continuation(bytes, i + 1)?;
            units.push(((b0 & 0x1f) << 6) | b1);
            i += 2;
        } else if b0 & 0xf0 == 0xe0 {
            let b1 = continuation(bytes, i + 1)?;
            let b2 = continuation(bytes, i + 2)?;
            units.push(((b0 & 0x0f) << 12) | (b1 << 6) | b2);
            i += 3;
        } else {
            bail!("invalid modified UTF-8 lead byte {:#04x} at {}", b0, i);
        }
    }

    Ok(String::from_utf16_lossy(&units))
}

fn continuation(bytes: &[u8], index: usize) -> Result<u16> {
    match bytes.get(index) {
        Some(b) if b & 0xc0 == 0x80 => Ok((b & 0x3f) as u16),
        Some(b) => bail!("invalid modified UTF-8 continuation byte {:#04x} at {}", b, index),
        None => bail!("truncated modified UTF-8 sequence"),
    }
}

pub fn encode(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len());

    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007f => bytes.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                bytes.push(0xc0 | (unit >> 6) as u8);
                bytes.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                bytes.push(0xe0 | (unit >> 12) as u8);
                bytes.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                bytes.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }

    bytes
}
