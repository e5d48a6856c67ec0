//! Register byte ordering
//!
//! Raw bytes are the registers in wire order, each register big-endian.
//! Logical bytes are the value's big-endian representation (A = most
//! significant). A [`ByteOrder`] names where each logical byte sits in the
//! raw buffer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AcqError, Result};

const LETTERS: [char; 4] = ['A', 'B', 'C', 'D'];

/// Placement of a value's bytes across its registers
///
/// Stored as a 32-bit index map: `map[i]` is the raw position of logical
/// byte `i`. Any permutation is allowed; the four common word/byte-swap
/// arrangements are available as constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ByteOrderRepr", into = "String")]
pub struct ByteOrder {
    map: [u8; 4],
}

impl ByteOrder {
    /// Big-endian words, big-endian bytes (Modbus standard)
    pub const ABCD: Self = Self { map: [0, 1, 2, 3] };
    /// Word swapped
    pub const CDAB: Self = Self { map: [2, 3, 0, 1] };
    /// Byte swapped inside each word
    pub const BADC: Self = Self { map: [1, 0, 3, 2] };
    /// Fully reversed
    pub const DCBA: Self = Self { map: [3, 2, 1, 0] };
}

impl Default for ByteOrder {
    fn default() -> Self {
        Self::ABCD
    }
}

/// Accepted configuration forms: a name or an index map of 2 or 4 entries
#[derive(Deserialize)]
#[serde(untagged)]
enum ByteOrderRepr {
    Name(String),
    Map(Vec<u8>),
}

impl TryFrom<ByteOrderRepr> for ByteOrder {
    type Error = AcqError;

    fn try_from(repr: ByteOrderRepr) -> Result<Self> {
        match repr {
            ByteOrderRepr::Name(name) => name.parse(),
            ByteOrderRepr::Map(map) => match map.as_slice() {
                &[a, b, c, d] => Self::from_index_map([a, b, c, d]),
                &[a, b] => Self::from_word_map([a, b]),
                other => Err(AcqError::config(format!(
                    "Byte order map {:?} must have 2 or 4 entries",
                    other
                ))),
            },
        }
    }
}

impl From<ByteOrder> for String {
    fn from(order: ByteOrder) -> Self {
        order.to_string()
    }
}

impl std::str::FromStr for ByteOrder {
    type Err = AcqError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_uppercase();
        match name.as_str() {
            "BIG_ENDIAN" => return Ok(Self::ABCD),
            "BIG_ENDIAN_SWAP" => return Ok(Self::CDAB),
            "LITTLE_ENDIAN_SWAP" => return Ok(Self::BADC),
            "LITTLE_ENDIAN" => return Ok(Self::DCBA),
            _ => {},
        }

        // Letters in raw order, e.g. "CDAB": raw byte 0 holds logical byte C
        let unknown = || AcqError::config(format!("Unknown byte order: {}", name));
        let letters: Vec<char> = name.chars().collect();
        let mut map = [u8::MAX; 4];
        for (raw, letter) in letters.iter().enumerate() {
            let logical = LETTERS
                .iter()
                .position(|l| l == letter)
                .filter(|&i| i < letters.len())
                .ok_or_else(unknown)?;
            map[logical] = raw as u8;
        }
        match letters.len() {
            4 => Self::from_index_map(map).map_err(|_| unknown()),
            2 => Self::from_word_map([map[0], map[1]]).map_err(|_| unknown()),
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut letters = ['?'; 4];
        for (logical, &raw) in self.map.iter().enumerate() {
            letters[raw as usize] = LETTERS[logical];
        }
        letters.iter().try_for_each(|c| write!(f, "{}", c))
    }
}

impl ByteOrder {
    /// Build from a 32-bit index map: `map[i]` is the raw position of logical byte `i`
    pub fn from_index_map(map: [u8; 4]) -> Result<Self> {
        let mut seen = [false; 4];
        for &pos in &map {
            match seen.get_mut(pos as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(AcqError::config(format!(
                        "Byte order map {:?} is not a permutation of 0..4",
                        map
                    )))
                },
            }
        }
        Ok(Self { map })
    }

    /// Build from a 16-bit index map; words keep their wire order
    pub fn from_word_map(map: [u8; 2]) -> Result<Self> {
        match map {
            [0, 1] => Ok(Self::ABCD),
            [1, 0] => Ok(Self::BADC),
            other => Err(AcqError::config(format!(
                "Byte order map {:?} is not a permutation of 0..2",
                other
            ))),
        }
    }

    /// 32-bit index map for this order
    pub fn index_map(&self) -> [u8; 4] {
        self.map
    }

    /// 16-bit index map: a single register is laid out like the low word (C, D)
    pub fn word_map(&self) -> [u8; 2] {
        if self.map[2] < self.map[3] {
            [0, 1]
        } else {
            [1, 0]
        }
    }

    /// Raw position of every logical byte for a value `width` bytes wide
    ///
    /// `width` is 2, 4 or 8. A 64-bit value is two 32-bit halves, each laid
    /// out with the 32-bit map; the halves are swapped when the most
    /// significant byte sits in the second raw word pair.
    pub fn permutation(&self, width: usize) -> Vec<usize> {
        match width {
            2 => self.word_map().iter().map(|&p| p as usize).collect(),
            4 => self.map.iter().map(|&p| p as usize).collect(),
            _ => {
                let halves = width / 4;
                let reversed = self.map[0] >= 2;
                (0..width)
                    .map(|i| {
                        let (half, byte) = (i / 4, i % 4);
                        let raw_half = if reversed { halves - 1 - half } else { half };
                        4 * raw_half + self.map[byte] as usize
                    })
                    .collect()
            },
        }
    }
}

/// Flatten registers into raw bytes (each register big-endian)
pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
    registers.iter().flat_map(|r| r.to_be_bytes()).collect()
}

/// Split raw bytes into registers; a trailing odd byte is padded with zero
pub fn bytes_to_registers(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|c| u16::from_be_bytes([c[0], c.get(1).copied().unwrap_or(0)]))
        .collect()
}
