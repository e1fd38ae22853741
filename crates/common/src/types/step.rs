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

//! Per-opcode execution observations.

use std::collections::BTreeMap;

use alloy_primitives::{Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::opcode::OpcodeExt;

/// One recorded storage (or transient storage) write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    /// Storage slot being written.
    pub slot: U256,
    /// Value of the slot before the write.
    pub before: U256,
    /// Value being written.
    pub after: U256,
}

/// Memory observation attached to a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    /// Memory contents before the opcode executes.
    pub current: Bytes,
    /// New total memory size in bytes if this opcode grew memory.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expanded_size: Option<usize>,
}

/// Pre-execution observation of a single opcode, plus the post-execution
/// observations filled in once the following step (or the frame exit)
/// makes them available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Program counter, a byte offset into the frame's code.
    pub pc: usize,
    /// Opcode byte.
    pub opcode: u8,
    /// Opcode mnemonic, `INVALID(0xNN)` for undefined bytes.
    pub mnemonic: String,
    /// Gas left before the opcode executes.
    pub gas_remaining: u64,
    /// Measured gas consumed by the opcode.
    pub gas_cost: u64,
    /// Call depth of the frame this step belongs to (root = 0).
    pub depth: usize,
    /// Full stack before the opcode, top-of-stack at index 0.
    pub stack: Vec<U256>,
    /// Memory before the opcode.
    pub memory: MemorySnapshot,
    /// Persistent storage writes performed by this opcode.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub storage_changes: Vec<StorageChange>,
    /// Transient storage writes performed by this opcode.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub transient_storage_changes: Vec<StorageChange>,
    /// Storage accumulated by earlier SSTOREs in this frame, as it stood
    /// before this opcode. Absent until the frame's first SSTORE has
    /// executed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub storage: Option<BTreeMap<U256, U256>>,
    /// Stack after the opcode, top-of-stack first.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack_after: Option<Vec<U256>>,
    /// Memory after the opcode.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub memory_after: Option<Bytes>,
}

impl Step {
    /// Whether this opcode opens a child frame (CALL/CREATE families).
    pub fn spawns_frame(&self) -> bool {
        self.opcode.spawns_frame()
    }
}
