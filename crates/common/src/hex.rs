// Retrace - EVM Time-Travel Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Hex string conventions shared by the assembler, the engine and the
//! serialized trace format.
//!
//! Inputs accept an optional `0x`/`0X` prefix and either case. Outputs
//! are always `0x`-prefixed lowercase; the empty byte string renders as
//! `"0x"`.

use alloy_primitives::{
    hex::{self, FromHexError},
    Bytes,
};
use thiserror::Error;

/// Failure modes of hex decoding, split into the two kinds callers
/// report separately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    /// The input has an odd number of hex characters.
    #[error("hex input has an odd number of digits")]
    OddLengthHex,
    /// The input contains a character outside `[0-9a-fA-F]`.
    #[error("invalid hex character `{ch}` at position {index}")]
    NonHexChar {
        /// The offending character.
        ch: char,
        /// Byte position of the character within the digits.
        index: usize,
    },
}

impl From<FromHexError> for HexError {
    fn from(err: FromHexError) -> Self {
        match err {
            FromHexError::OddLength | FromHexError::InvalidStringLength => Self::OddLengthHex,
            FromHexError::InvalidHexCharacter { c, index } => Self::NonHexChar { ch: c, index },
        }
    }
}

/// Decode a hex string into bytes. `"0x"` and `""` decode to empty.
pub fn decode(input: &str) -> Result<Vec<u8>, HexError> {
    let digits = input.trim_start_matches("0x").trim_start_matches("0X");
    Ok(hex::decode(digits)?)
}

/// Decode a hex string into [`Bytes`].
pub fn decode_bytes(input: &str) -> Result<Bytes, HexError> {
    decode(input).map(Bytes::from)
}

/// Encode bytes as `0x`-prefixed lowercase hex (`"0x"` for empty).
pub fn encode(data: impl AsRef<[u8]>) -> String {
    hex::encode_prefixed(data)
}
