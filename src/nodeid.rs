/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The 20-byte identifier of a revision.
//!
//! A nodeid is a sha-1 of content and parents, but this crate treats it as
//! opaque bytes: two nodeids are equal iff all 20 bytes are equal.

use std::fmt;

use thiserror::Error;

const LEN: usize = 20;
const HEX_LEN: usize = LEN * 2;

/// The all-zero nodeid, standing for the empty root revision.
pub const NULL_ID: Nodeid = Nodeid([0u8; LEN]);

#[derive(Debug, Error)]
#[error("expected {0} bytes but got {1}")]
pub struct LengthMismatch(usize, usize);

#[derive(Debug, Error)]
#[error("{0:?} is not a {1}-character hex string")]
pub struct BadHex(String, usize);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nodeid([u8; LEN]);

impl Nodeid {
    pub const fn len() -> usize {
        LEN
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, LengthMismatch> {
        if bytes.len() != LEN {
            return Err(LengthMismatch(LEN, bytes.len()));
        }
        let mut fixed = [0u8; LEN];
        fixed.copy_from_slice(bytes);
        Ok(Nodeid(fixed))
    }

    pub const fn from_byte_array(bytes: [u8; LEN]) -> Self {
        Nodeid(bytes)
    }

    pub fn from_hex(hex: &str) -> Result<Self, BadHex> {
        let raw = hex.as_bytes();
        if raw.len() != HEX_LEN {
            return Err(BadHex(hex.to_string(), HEX_LEN));
        }
        let mut bytes = [0u8; LEN];
        for (i, pair) in raw.chunks_exact(2).enumerate() {
            let high = hex_value(pair[0]).ok_or_else(|| BadHex(hex.to_string(), HEX_LEN))?;
            let low = hex_value(pair[1]).ok_or_else(|| BadHex(hex.to_string(), HEX_LEN))?;
            bytes[i] = (high << 4) | low;
        }
        Ok(Nodeid(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_byte_array(self) -> [u8; LEN] {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    /// First 12 hex characters, the customary short notation for logs.
    pub fn short_hex(&self) -> String {
        to_hex(&self.0[..6])
    }
}

fn to_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0xf) as usize] as char);
    }
    out
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for Nodeid {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Nodeid {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Nodeid({})", self.to_hex())
    }
}
