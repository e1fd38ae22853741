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

//! Static EVM opcode metadata
//!
//! The table is keyed twice: by opcode byte and by mnemonic. Every entry
//! carries the named stack inputs/outputs (top-of-stack first) and the
//! number of immediate operand bytes that follow the opcode in the
//! bytecode stream (non-zero only for PUSH1..PUSH32).
//!
//! Coverage spans the current mainnet instruction set, including
//! EIP-1153 transient storage (TLOAD/TSTORE), EIP-5656 (MCOPY),
//! EIP-3855 (PUSH0) and the EIP-4844 blob opcodes. Looking up a byte
//! outside the table yields `None`.

use std::{collections::HashMap, sync::LazyLock};

/// Metadata for a single EVM opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// Opcode byte.
    pub code: u8,
    /// Uppercase mnemonic.
    pub mnemonic: &'static str,
    /// Names of the stack items consumed, top-of-stack first.
    pub inputs: &'static [&'static str],
    /// Names of the stack items pushed, top-of-stack first.
    pub outputs: &'static [&'static str],
    /// Number of inline operand bytes following the opcode.
    pub immediate_bytes: usize,
}

impl OpcodeInfo {
    /// Number of stack items this opcode pops.
    pub fn stack_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Number of stack items this opcode pushes.
    pub fn stack_outputs(&self) -> usize {
        self.outputs.len()
    }
}

const fn op(
    code: u8,
    mnemonic: &'static str,
    inputs: &'static [&'static str],
    outputs: &'static [&'static str],
    immediate_bytes: usize,
) -> OpcodeInfo {
    OpcodeInfo { code, mnemonic, inputs, outputs, immediate_bytes }
}

/// Every defined opcode, in ascending byte order.
pub static OPCODES: &[OpcodeInfo] = &[
    op(0x00, "STOP", &[], &[], 0),
    op(0x01, "ADD", &["a", "b"], &["sum"], 0),
    op(0x02, "MUL", &["a", "b"], &["product"], 0),
    op(0x03, "SUB", &["a", "b"], &["difference"], 0),
    op(0x04, "DIV", &["a", "b"], &["quotient"], 0),
    op(0x05, "SDIV", &["a", "b"], &["quotient"], 0),
    op(0x06, "MOD", &["a", "b"], &["remainder"], 0),
    op(0x07, "SMOD", &["a", "b"], &["remainder"], 0),
    op(0x08, "ADDMOD", &["a", "b", "N"], &["result"], 0),
    op(0x09, "MULMOD", &["a", "b", "N"], &["result"], 0),
    op(0x0a, "EXP", &["a", "exponent"], &["result"], 0),
    op(0x0b, "SIGNEXTEND", &["b", "x"], &["result"], 0),
    op(0x10, "LT", &["a", "b"], &["result"], 0),
    op(0x11, "GT", &["a", "b"], &["result"], 0),
    op(0x12, "SLT", &["a", "b"], &["result"], 0),
    op(0x13, "SGT", &["a", "b"], &["result"], 0),
    op(0x14, "EQ", &["a", "b"], &["result"], 0),
    op(0x15, "ISZERO", &["a"], &["result"], 0),
    op(0x16, "AND", &["a", "b"], &["result"], 0),
    op(0x17, "OR", &["a", "b"], &["result"], 0),
    op(0x18, "XOR", &["a", "b"], &["result"], 0),
    op(0x19, "NOT", &["a"], &["result"], 0),
    op(0x1a, "BYTE", &["i", "x"], &["result"], 0),
    op(0x1b, "SHL", &["shift", "value"], &["result"], 0),
    op(0x1c, "SHR", &["shift", "value"], &["result"], 0),
    op(0x1d, "SAR", &["shift", "value"], &["result"], 0),
    op(0x20, "KECCAK256", &["offset", "size"], &["hash"], 0),
    op(0x30, "ADDRESS", &[], &["address"], 0),
    op(0x31, "BALANCE", &["address"], &["balance"], 0),
    op(0x32, "ORIGIN", &[], &["address"], 0),
    op(0x33, "CALLER", &[], &["address"], 0),
    op(0x34, "CALLVALUE", &[], &["value"], 0),
    op(0x35, "CALLDATALOAD", &["offset"], &["data"], 0),
    op(0x36, "CALLDATASIZE", &[], &["size"], 0),
    op(0x37, "CALLDATACOPY", &["destOffset", "offset", "size"], &[], 0),
    op(0x38, "CODESIZE", &[], &["size"], 0),
    op(0x39, "CODECOPY", &["destOffset", "offset", "size"], &[], 0),
    op(0x3a, "GASPRICE", &[], &["price"], 0),
    op(0x3b, "EXTCODESIZE", &["address"], &["size"], 0),
    op(0x3c, "EXTCODECOPY", &["address", "destOffset", "offset", "size"], &[], 0),
    op(0x3d, "RETURNDATASIZE", &[], &["size"], 0),
    op(0x3e, "RETURNDATACOPY", &["destOffset", "offset", "size"], &[], 0),
    op(0x3f, "EXTCODEHASH", &["address"], &["hash"], 0),
    op(0x40, "BLOCKHASH", &["blockNumber"], &["hash"], 0),
    op(0x41, "COINBASE", &[], &["address"], 0),
    op(0x42, "TIMESTAMP", &[], &["timestamp"], 0),
    op(0x43, "NUMBER", &[], &["blockNumber"], 0),
    op(0x44, "PREVRANDAO", &[], &["prevRandao"], 0),
    op(0x45, "GASLIMIT", &[], &["gasLimit"], 0),
    op(0x46, "CHAINID", &[], &["chainId"], 0),
    op(0x47, "SELFBALANCE", &[], &["balance"], 0),
    op(0x48, "BASEFEE", &[], &["baseFee"], 0),
    op(0x49, "BLOBHASH", &["index"], &["blobVersionedHash"], 0),
    op(0x4a, "BLOBBASEFEE", &[], &["blobBaseFee"], 0),
    op(0x50, "POP", &["value"], &[], 0),
    op(0x51, "MLOAD", &["offset"], &["value"], 0),
    op(0x52, "MSTORE", &["offset", "value"], &[], 0),
    op(0x53, "MSTORE8", &["offset", "value"], &[], 0),
    op(0x54, "SLOAD", &["key"], &["value"], 0),
    op(0x55, "SSTORE", &["key", "value"], &[], 0),
    op(0x56, "JUMP", &["counter"], &[], 0),
    op(0x57, "JUMPI", &["counter", "condition"], &[], 0),
    op(0x58, "PC", &[], &["counter"], 0),
    op(0x59, "MSIZE", &[], &["size"], 0),
    op(0x5a, "GAS", &[], &["gas"], 0),
    op(0x5b, "JUMPDEST", &[], &[], 0),
    op(0x5c, "TLOAD", &["key"], &["value"], 0),
    op(0x5d, "TSTORE", &["key", "value"], &[], 0),
    op(0x5e, "MCOPY", &["destOffset", "offset", "size"], &[], 0),
    op(0x5f, "PUSH0", &[], &["value"], 0),
    op(0x60, "PUSH1", &[], &["value"], 1),
    op(0x61, "PUSH2", &[], &["value"], 2),
    op(0x62, "PUSH3", &[], &["value"], 3),
    op(0x63, "PUSH4", &[], &["value"], 4),
    op(0x64, "PUSH5", &[], &["value"], 5),
    op(0x65, "PUSH6", &[], &["value"], 6),
    op(0x66, "PUSH7", &[], &["value"], 7),
    op(0x67, "PUSH8", &[], &["value"], 8),
    op(0x68, "PUSH9", &[], &["value"], 9),
    op(0x69, "PUSH10", &[], &["value"], 10),
    op(0x6a, "PUSH11", &[], &["value"], 11),
    op(0x6b, "PUSH12", &[], &["value"], 12),
    op(0x6c, "PUSH13", &[], &["value"], 13),
    op(0x6d, "PUSH14", &[], &["value"], 14),
    op(0x6e, "PUSH15", &[], &["value"], 15),
    op(0x6f, "PUSH16", &[], &["value"], 16),
    op(0x70, "PUSH17", &[], &["value"], 17),
    op(0x71, "PUSH18", &[], &["value"], 18),
    op(0x72, "PUSH19", &[], &["value"], 19),
    op(0x73, "PUSH20", &[], &["value"], 20),
    op(0x74, "PUSH21", &[], &["value"], 21),
    op(0x75, "PUSH22", &[], &["value"], 22),
    op(0x76, "PUSH23", &[], &["value"], 23),
    op(0x77, "PUSH24", &[], &["value"], 24),
    op(0x78, "PUSH25", &[], &["value"], 25),
    op(0x79, "PUSH26", &[], &["value"], 26),
    op(0x7a, "PUSH27", &[], &["value"], 27),
    op(0x7b, "PUSH28", &[], &["value"], 28),
    op(0x7c, "PUSH29", &[], &["value"], 29),
    op(0x7d, "PUSH30", &[], &["value"], 30),
    op(0x7e, "PUSH31", &[], &["value"], 31),
    op(0x7f, "PUSH32", &[], &["value"], 32),
    op(0x80, "DUP1", &["x1"], &["x1", "x1"], 0),
    op(0x81, "DUP2", &["x1", "x2"], &["x2", "x1", "x2"], 0),
    op(0x82, "DUP3", &["x1", "x2", "x3"], &["x3", "x1", "x2", "x3"], 0),
    op(0x83, "DUP4", &["x1", "x2", "x3", "x4"], &["x4", "x1", "x2", "x3", "x4"], 0),
    op(0x84, "DUP5", &["x1", "x2", "x3", "x4", "x5"], &["x5", "x1", "x2", "x3", "x4", "x5"], 0),
    op(0x85, "DUP6", &["x1", "x2", "x3", "x4", "x5", "x6"], &["x6", "x1", "x2", "x3", "x4", "x5", "x6"], 0),
    op(0x86, "DUP7", &["x1", "x2", "x3", "x4", "x5", "x6", "x7"], &["x7", "x1", "x2", "x3", "x4", "x5", "x6", "x7"], 0),
    op(0x87, "DUP8", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8"], &["x8", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8"], 0),
    op(0x88, "DUP9", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9"], &["x9", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9"], 0),
    op(0x89, "DUP10", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10"], &["x10", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10"], 0),
    op(0x8a, "DUP11", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11"], &["x11", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11"], 0),
    op(0x8b, "DUP12", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12"], &["x12", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12"], 0),
    op(0x8c, "DUP13", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13"], &["x13", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13"], 0),
    op(0x8d, "DUP14", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14"], &["x14", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14"], 0),
    op(0x8e, "DUP15", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15"], &["x15", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15"], 0),
    op(0x8f, "DUP16", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x16"], &["x16", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x16"], 0),
    op(0x90, "SWAP1", &["x1", "x2"], &["x2", "x1"], 0),
    op(0x91, "SWAP2", &["x1", "x2", "x3"], &["x3", "x2", "x1"], 0),
    op(0x92, "SWAP3", &["x1", "x2", "x3", "x4"], &["x4", "x2", "x3", "x1"], 0),
    op(0x93, "SWAP4", &["x1", "x2", "x3", "x4", "x5"], &["x5", "x2", "x3", "x4", "x1"], 0),
    op(0x94, "SWAP5", &["x1", "x2", "x3", "x4", "x5", "x6"], &["x6", "x2", "x3", "x4", "x5", "x1"], 0),
    op(0x95, "SWAP6", &["x1", "x2", "x3", "x4", "x5", "x6", "x7"], &["x7", "x2", "x3", "x4", "x5", "x6", "x1"], 0),
    op(0x96, "SWAP7", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8"], &["x8", "x2", "x3", "x4", "x5", "x6", "x7", "x1"], 0),
    op(0x97, "SWAP8", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9"], &["x9", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x1"], 0),
    op(0x98, "SWAP9", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10"], &["x10", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x1"], 0),
    op(0x99, "SWAP10", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11"], &["x11", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x1"], 0),
    op(0x9a, "SWAP11", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12"], &["x12", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x1"], 0),
    op(0x9b, "SWAP12", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13"], &["x13", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x1"], 0),
    op(0x9c, "SWAP13", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14"], &["x14", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x1"], 0),
    op(0x9d, "SWAP14", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15"], &["x15", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x1"], 0),
    op(0x9e, "SWAP15", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x16"], &["x16", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x1"], 0),
    op(0x9f, "SWAP16", &["x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x16", "x17"], &["x17", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x16", "x1"], 0),
    op(0xa0, "LOG0", &["offset", "size"], &[], 0),
    op(0xa1, "LOG1", &["offset", "size", "topic1"], &[], 0),
    op(0xa2, "LOG2", &["offset", "size", "topic1", "topic2"], &[], 0),
    op(0xa3, "LOG3", &["offset", "size", "topic1", "topic2", "topic3"], &[], 0),
    op(0xa4, "LOG4", &["offset", "size", "topic1", "topic2", "topic3", "topic4"], &[], 0),
    op(0xf0, "CREATE", &["value", "offset", "size"], &["address"], 0),
    op(0xf1, "CALL", &["gas", "address", "value", "argsOffset", "argsSize", "retOffset", "retSize"], &["success"], 0),
    op(0xf2, "CALLCODE", &["gas", "address", "value", "argsOffset", "argsSize", "retOffset", "retSize"], &["success"], 0),
    op(0xf3, "RETURN", &["offset", "size"], &[], 0),
    op(0xf4, "DELEGATECALL", &["gas", "address", "argsOffset", "argsSize", "retOffset", "retSize"], &["success"], 0),
    op(0xf5, "CREATE2", &["value", "offset", "size", "salt"], &["address"], 0),
    op(0xfa, "STATICCALL", &["gas", "address", "argsOffset", "argsSize", "retOffset", "retSize"], &["success"], 0),
    op(0xfd, "REVERT", &["offset", "size"], &[], 0),
    op(0xfe, "INVALID", &[], &[], 0),
    op(0xff, "SELFDESTRUCT", &["address"], &[], 0),
];

static BY_CODE: LazyLock<[Option<&'static OpcodeInfo>; 256]> = LazyLock::new(|| {
    let mut table = [None; 256];
    for info in OPCODES {
        table[info.code as usize] = Some(info);
    }
    table
});

static BY_MNEMONIC: LazyLock<HashMap<&'static str, &'static OpcodeInfo>> =
    LazyLock::new(|| OPCODES.iter().map(|info| (info.mnemonic, info)).collect());

/// Look up an opcode by its byte value. Undefined bytes yield `None`.
pub fn opcode_by_code(code: u8) -> Option<&'static OpcodeInfo> {
    BY_CODE[code as usize]
}

/// Look up an opcode by its uppercase mnemonic.
pub fn opcode_by_mnemonic(mnemonic: &str) -> Option<&'static OpcodeInfo> {
    BY_MNEMONIC.get(mnemonic).copied()
}

/// Render the mnemonic for a byte, falling back to the `INVALID(0xNN)`
/// form used by the disassembler for bytes outside the table.
pub fn mnemonic_for(code: u8) -> String {
    match opcode_by_code(code) {
        Some(info) => info.mnemonic.to_string(),
        None => format!("INVALID(0x{code:02x})"),
    }
}

/// Classification helpers on raw opcode bytes.
///
/// Mirrors the shape of the opcode analysis traits revm exposes, extended
/// with the two classifications the trace builder and debug session care
/// about: which opcodes open a new execution frame, and which ones
/// legally terminate a code path.
pub trait OpcodeExt {
    /// True for CREATE, CALL, CALLCODE, DELEGATECALL, CREATE2 and
    /// STATICCALL, the opcodes that spawn a child frame.
    fn spawns_frame(&self) -> bool;

    /// True for STOP, RETURN, REVERT, INVALID and SELFDESTRUCT, the
    /// opcodes that end a frame without falling through.
    fn is_terminal(&self) -> bool;

    /// True for PUSH1..PUSH32, the opcodes carrying inline operands.
    fn is_push_with_immediate(&self) -> bool;
}

impl OpcodeExt for u8 {
    fn spawns_frame(&self) -> bool {
        matches!(*self, 0xf0 | 0xf1 | 0xf2 | 0xf4 | 0xf5 | 0xfa)
    }

    fn is_terminal(&self) -> bool {
        matches!(*self, 0x00 | 0xf3 | 0xfd | 0xfe | 0xff)
    }

    fn is_push_with_immediate(&self) -> bool {
        (0x60..=0x7f).contains(self)
    }
}
