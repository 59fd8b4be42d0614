// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC data block decoding
//!
//! The controller exposes a 7 byte block laid out as follows:
//!
//! | Offset | Field  | Type              |
//! |--------|--------|-------------------|
//! | 0      | `Tag1` | `u8`              |
//! | 1      | `Tag2` | `u8`              |
//! | 2      | `Tag3` | `u8`              |
//! | 3..=6  | `Tag4` | `i32`, big-endian |
//!
//! Bytes past offset 6 are ignored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size in bytes of the data block read from the controller.
pub const RECORD_SIZE: usize = 7;

/// Errors raised while decoding a raw data block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer holds fewer bytes than the block layout requires.
    #[error("PLC payload too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// One decoded sample of the controller data block.
///
/// Serialized with PascalCase keys (`Tag1` .. `Tag4`), which is the shape
/// served by the read endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlcRecord {
    pub tag1: u8,
    pub tag2: u8,
    pub tag3: u8,
    pub tag4: i32,
}

impl PlcRecord {
    /// Decode a record from the first [`RECORD_SIZE`] bytes of `buffer`.
    ///
    /// `tag4` is read as a big-endian two's complement integer, matching the
    /// controller's storage format regardless of the host byte order.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::TooShort`] when `buffer` holds fewer than
    /// [`RECORD_SIZE`] bytes.
    pub fn decode(buffer: &[u8]) -> Result<Self, DecodeError> {
        let Some(block) = buffer.get(..RECORD_SIZE) else {
            return Err(DecodeError::TooShort {
                expected: RECORD_SIZE,
                actual: buffer.len(),
            });
        };

        Ok(Self {
            tag1: block[0],
            tag2: block[1],
            tag3: block[2],
            tag4: i32::from_be_bytes([block[3], block[4], block[5], block[6]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_big_endian_tag4() {
        let record = PlcRecord::decode(&[10, 20, 30, 0x00, 0x00, 0x00, 0x7B]).unwrap();
        assert_eq!(
            record,
            PlcRecord {
                tag1: 10,
                tag2: 20,
                tag3: 30,
                tag4: 123,
            }
        );
    }

    #[test]
    fn test_decode_multi_byte_tag4() {
        let record = PlcRecord::decode(&[0, 0, 0, 0x01, 0x02, 0x03, 0x04]).unwrap();
        assert_eq!(record.tag4, 0x0102_0304);
    }

    #[test]
    fn test_decode_negative_tag4() {
        let record = PlcRecord::decode(&[255, 128, 0, 0xFF, 0xFF, 0xFF, 0xFE]).unwrap();
        assert_eq!(record.tag1, 255);
        assert_eq!(record.tag2, 128);
        assert_eq!(record.tag3, 0);
        assert_eq!(record.tag4, -2);

        let record = PlcRecord::decode(&[0, 0, 0, 0x80, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(record.tag4, i32::MIN);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let record = PlcRecord::decode(&[1, 2, 3, 0, 0, 0, 42, 0xAA, 0xBB]).unwrap();
        assert_eq!(
            record,
            PlcRecord {
                tag1: 1,
                tag2: 2,
                tag3: 3,
                tag4: 42,
            }
        );
    }

    #[test]
    fn test_decode_too_short() {
        for len in 0..RECORD_SIZE {
            let buffer = vec![0u8; len];
            assert_eq!(
                PlcRecord::decode(&buffer),
                Err(DecodeError::TooShort {
                    expected: RECORD_SIZE,
                    actual: len,
                })
            );
        }
    }

    #[test]
    fn test_json_shape() {
        let record = PlcRecord {
            tag1: 1,
            tag2: 2,
            tag3: 3,
            tag4: -44,
        };
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"Tag1": 1, "Tag2": 2, "Tag3": 3, "Tag4": -44})
        );
    }
}
