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

//! EVM mnemonic assembler and disassembler
//!
//! `assemble` turns mnemonic source (one instruction per line, `//` and
//! `/* */` comments allowed) into `0x`-prefixed bytecode. `disassemble`
//! reverses the mapping, rendering undefined opcodes as `INVALID(0xNN)`
//! and flagging PUSH operands cut short by the end of the bytecode with
//! a `// truncated` suffix.
//!
//! For canonical source (uppercase mnemonics, single spaces, lowercase
//! `0x` immediates, no comments) the two functions are inverses.

use alloy_primitives::U256;
use retrace_common::{hex, opcode_by_code, opcode_by_mnemonic, HexError};
use thiserror::Error;

/// Failure modes of the assembler and disassembler. Line numbers are
/// 1-based and refer to the original source, comments included.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    /// First token of an instruction line is not in the opcode table.
    #[error("unknown mnemonic `{mnemonic}` on line {line}")]
    UnknownMnemonic {
        /// Source line of the instruction.
        line: usize,
        /// The unrecognized token, as written.
        mnemonic: String,
    },
    /// A PUSH-family opcode is missing its operand (or carries one that
    /// is not a hex or decimal integer).
    #[error("missing {width}-byte immediate on line {line}")]
    MissingImmediate {
        /// Source line of the instruction.
        line: usize,
        /// Declared operand width in bytes.
        width: usize,
    },
    /// The operand does not fit in the declared byte width.
    #[error("immediate `{value}` does not fit in {width} byte(s) on line {line}")]
    ImmediateTooLarge {
        /// Source line of the instruction.
        line: usize,
        /// Declared operand width in bytes.
        width: usize,
        /// The operand, as written.
        value: String,
    },
    /// The operand is a negative decimal number.
    #[error("negative immediate on line {line}")]
    NegativeImmediate {
        /// Source line of the instruction.
        line: usize,
    },
    /// The disassembler input is not valid hex.
    #[error(transparent)]
    Hex(#[from] HexError),
}

/// Assemble mnemonic source into `0x`-prefixed lowercase bytecode.
///
/// Empty input (or input that is all comments/whitespace) yields `"0x"`.
pub fn assemble(source: &str) -> Result<String, AsmError> {
    let stripped = strip_block_comments(source);
    let mut bytecode = Vec::new();

    for (idx, raw_line) in stripped.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split("//").next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let raw_mnemonic = tokens.next().unwrap_or_default();
        let mnemonic = raw_mnemonic.to_uppercase();
        let info = opcode_by_mnemonic(&mnemonic).ok_or_else(|| AsmError::UnknownMnemonic {
            line: line_no,
            mnemonic: raw_mnemonic.to_string(),
        })?;

        bytecode.push(info.code);

        let width = info.immediate_bytes;
        if width > 0 {
            let operand = tokens
                .next()
                .ok_or(AsmError::MissingImmediate { line: line_no, width })?;
            let value = parse_immediate(operand, line_no, width)?;
            if ((value.bit_len() + 7) / 8) > width {
                return Err(AsmError::ImmediateTooLarge {
                    line: line_no,
                    width,
                    value: operand.to_string(),
                });
            }
            let be = value.to_be_bytes::<32>();
            bytecode.extend_from_slice(&be[32 - width..]);
        }
    }

    Ok(hex::encode(bytecode))
}

/// Disassemble `0x`-prefixed (or bare) hex bytecode into mnemonic
/// source, one instruction per line.
pub fn disassemble(code: &str) -> Result<String, AsmError> {
    let bytes = hex::decode(code)?;
    let mut lines = Vec::new();
    let mut pc = 0;

    while pc < bytes.len() {
        let byte = bytes[pc];
        match opcode_by_code(byte) {
            Some(info) if info.immediate_bytes > 0 => {
                let data_start = pc + 1;
                let data_end = (data_start + info.immediate_bytes).min(bytes.len());
                let operand: String =
                    bytes[data_start..data_end].iter().map(|b| format!("{b:02x}")).collect();
                if data_end - data_start < info.immediate_bytes {
                    lines.push(format!("{} 0x{} // truncated", info.mnemonic, operand));
                } else {
                    lines.push(format!("{} 0x{}", info.mnemonic, operand));
                }
                pc = data_end;
            }
            Some(info) => {
                lines.push(info.mnemonic.to_string());
                pc += 1;
            }
            None => {
                lines.push(format!("INVALID(0x{byte:02x})"));
                pc += 1;
            }
        }
    }

    Ok(lines.join("\n"))
}

fn parse_immediate(operand: &str, line: usize, width: usize) -> Result<U256, AsmError> {
    if operand.starts_with('-') {
        return Err(AsmError::NegativeImmediate { line });
    }
    let (digits, radix, digit_ok): (&str, u64, fn(char) -> bool) =
        match operand.strip_prefix("0x").or_else(|| operand.strip_prefix("0X")) {
            Some(digits) => (digits, 16, |c| c.is_ascii_hexdigit()),
            None => (operand, 10, |c| c.is_ascii_digit()),
        };
    if digits.is_empty() || !digits.chars().all(digit_ok) {
        return Err(AsmError::MissingImmediate { line, width });
    }
    // Well-formed digits that still fail to parse overflowed 256 bits
    // and cannot fit any PUSH width.
    U256::from_str_radix(digits, radix).map_err(|_| AsmError::ImmediateTooLarge {
        line,
        width,
        value: operand.to_string(),
    })
}

/// Blank out `/* … */` comments while preserving every newline so line
/// numbers in diagnostics keep pointing at the original source.
fn strip_block_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_comment = false;

    while let Some(c) = chars.next() {
        if in_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_comment = false;
            } else if c == '\n' {
                out.push('\n');
            }
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            in_comment = true;
        } else {
            out.push(c);
        }
    }

    out
}
