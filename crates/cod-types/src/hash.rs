use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Castagnoli CRC32C content hash.
///
/// This is the hash the archive records per instance and the key used for
/// duplicate detection. It matches what cloud object stores report for
/// uploaded blobs, so inventory-derived hints can be compared without a
/// fetch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Crc32c(u32);

impl Crc32c {
    /// Compute the CRC32C of a byte slice.
    pub fn of(data: &[u8]) -> Self {
        Self(crc32c::crc32c(data))
    }

    /// Wrap a pre-computed checksum value.
    pub fn from_value(value: u32) -> Self {
        Self(value)
    }

    /// The raw checksum value.
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Hex-encoded representation (8 lowercase characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    /// Parse from an 8-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 4 {
            return Err(TypeError::InvalidLength {
                expected: 4,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&bytes);
        Ok(Self(u32::from_be_bytes(arr)))
    }
}

impl fmt::Debug for Crc32c {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Crc32c({})", self.to_hex())
    }
}

impl fmt::Display for Crc32c {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
