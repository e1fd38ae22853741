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

//! The immutable artifact of one execution: a tree of call frames, each
//! carrying its opcode-level steps and the result it exited with.

use std::fmt::Write as _;

use alloy_primitives::{Address, Bytes, U256};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::Step;

/// Identifier of the root frame.
pub const ROOT_FRAME_ID: &str = "root";

/// How the engine dispatched the bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run the bytecode as deployed code at a fixed address.
    #[display("call")]
    Call,
    /// Run the bytecode as initcode of a contract creation.
    #[display("deploy")]
    Deploy,
}

/// The kind of execution context a frame represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameType {
    /// The outermost frame of the execution.
    #[display("ROOT")]
    Root,
    /// Child frame opened by CALL.
    #[display("CALL")]
    Call,
    /// Child frame opened by STATICCALL.
    #[display("STATICCALL")]
    StaticCall,
    /// Child frame opened by DELEGATECALL.
    #[display("DELEGATECALL")]
    DelegateCall,
    /// Child frame opened by CALLCODE.
    #[display("CALLCODE")]
    CallCode,
    /// Child frame opened by CREATE.
    #[display("CREATE")]
    Create,
    /// Child frame opened by CREATE2.
    #[display("CREATE2")]
    Create2,
}

impl FrameType {
    /// Whether this frame executes initcode.
    pub fn is_create(&self) -> bool {
        matches!(self, Self::Create | Self::Create2)
    }
}

/// Why a frame stopped executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameExitReason {
    /// STOP, RETURN or natural code end.
    #[display("success")]
    Success,
    /// Explicit REVERT.
    #[display("revert")]
    Revert,
    /// Undefined opcode, INVALID, or any other abnormal halt.
    #[display("invalid")]
    Invalid,
    /// Gas exhausted.
    #[display("outOfGas")]
    OutOfGas,
    /// Stack popped below empty.
    #[display("stackUnderflow")]
    StackUnderflow,
    /// Stack grew past 1024 items.
    #[display("stackOverflow")]
    StackOverflow,
    /// JUMP/JUMPI to a non-JUMPDEST destination.
    #[display("invalidJump")]
    InvalidJump,
    /// State mutation inside a static context.
    #[display("writeProtection")]
    WriteProtection,
}

impl FrameExitReason {
    /// Whether the frame exited normally.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Outcome of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameResult {
    /// Why the frame exited.
    pub exit_reason: FrameExitReason,
    /// Data returned (or revert payload).
    pub return_data: Bytes,
    /// Gas consumed by the frame, children included.
    pub gas_used: u64,
    /// Address of the deployed contract for successful creates.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deployed_address: Option<Address>,
}

impl Default for FrameResult {
    fn default() -> Self {
        Self {
            exit_reason: FrameExitReason::Success,
            return_data: Bytes::new(),
            gas_used: 0,
            deployed_address: None,
        }
    }
}

/// A child frame paired with the index of the parent step that spawned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildFrame {
    /// Index into the parent's `steps` of the spawning opcode.
    pub step_index: usize,
    /// The nested frame.
    pub frame: Frame,
}

/// A single execution context: the root, a CALL-family child, or a
/// CREATE-family child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Unique id: `"root"` for the root, `"frame-N"` otherwise.
    pub id: String,
    /// Kind of context.
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// Account whose code executes here. Updated to the deployed address
    /// when a create frame exits successfully.
    pub code_address: Address,
    /// Bytecode executed in this frame.
    pub code: Bytes,
    /// Calldata for calls, initcode for creates.
    pub input: Bytes,
    /// Call value.
    pub value: U256,
    /// Caller address.
    pub caller: Address,
    /// Gas made available to this frame.
    pub gas: u64,
    /// Opcode-level steps, in execution order.
    pub steps: Vec<Step>,
    /// Child frames, sorted by `step_index` ascending.
    pub children: Vec<ChildFrame>,
    /// How the frame ended.
    pub result: FrameResult,
}

impl Frame {
    /// Total number of frames in this subtree, this frame included.
    pub fn frame_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.frame.frame_count()).sum::<usize>()
    }

    /// Total number of steps in this subtree.
    pub fn total_steps(&self) -> usize {
        self.steps.len() + self.children.iter().map(|c| c.frame.total_steps()).sum::<usize>()
    }

    /// Depth-first search for a frame by id.
    pub fn find(&self, id: &str) -> Option<&Frame> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.frame.find(id))
    }
}

/// Aggregate information about one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMetadata {
    /// Dispatch mode of the execution.
    pub mode: ExecutionMode,
    /// Whether the root frame exited successfully.
    pub success: bool,
    /// Data returned by the outermost frame.
    pub return_data: Bytes,
    /// Total gas used by the transaction.
    pub gas_used: u64,
    /// Deployed contract address for deploy-mode executions.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deployed_address: Option<Address>,
}

/// The root artifact of one execution. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// The outermost frame.
    pub root: Frame,
    /// Aggregate execution information.
    pub metadata: TraceMetadata,
}

impl Trace {
    /// Convert the trace to a `serde_json::Value`.
    pub fn to_json_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Total number of frames in the trace.
    pub fn frame_count(&self) -> usize {
        self.root.frame_count()
    }

    /// Find a frame anywhere in the tree by id.
    pub fn find_frame(&self, id: &str) -> Option<&Frame> {
        self.root.find(id)
    }

    /// Render the frame tree as an indented summary, one line per frame.
    pub fn format_tree(&self) -> String {
        let mut out = String::new();
        Self::format_frame(&mut out, &self.root, 0);
        out
    }

    fn format_frame(out: &mut String, frame: &Frame, indent: usize) {
        let marker = if frame.result.exit_reason.is_success() { "ok" } else { "err" };
        let _ = writeln!(
            out,
            "{:indent$}{} {} @ {} [{} steps, {}: {}]",
            "",
            frame.frame_type,
            frame.id,
            frame.code_address,
            frame.steps.len(),
            marker,
            frame.result.exit_reason,
            indent = indent * 2,
        );
        for child in &frame.children {
            Self::format_frame(out, &child.frame, indent + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_frame(id: &str, frame_type: FrameType) -> Frame {
        Frame {
            id: id.to_string(),
            frame_type,
            code_address: Address::ZERO,
            code: Bytes::new(),
            input: Bytes::new(),
            value: U256::ZERO,
            caller: Address::ZERO,
            gas: 0,
            steps: vec![],
            children: vec![],
            result: FrameResult::default(),
        }
    }

    #[test]
    fn test_frame_type_wire_names() {
        let json = serde_json::to_value(FrameType::StaticCall).unwrap();
        assert_eq!(json, serde_json::json!("STATICCALL"));
        let json = serde_json::to_value(FrameType::Create2).unwrap();
        assert_eq!(json, serde_json::json!("CREATE2"));
    }

    #[test]
    fn test_exit_reason_wire_names() {
        assert_eq!(
            serde_json::to_value(FrameExitReason::OutOfGas).unwrap(),
            serde_json::json!("outOfGas")
        );
        assert_eq!(
            serde_json::to_value(FrameExitReason::WriteProtection).unwrap(),
            serde_json::json!("writeProtection")
        );
        assert_eq!(FrameExitReason::InvalidJump.to_string(), "invalidJump");
    }

    #[test]
    fn test_find_frame() {
        let mut root = leaf_frame(ROOT_FRAME_ID, FrameType::Root);
        root.children
            .push(ChildFrame { step_index: 0, frame: leaf_frame("frame-0", FrameType::Call) });
        let trace = Trace {
            root,
            metadata: TraceMetadata {
                mode: ExecutionMode::Call,
                success: true,
                return_data: Bytes::new(),
                gas_used: 0,
                deployed_address: None,
            },
        };
        assert_eq!(trace.frame_count(), 2);
        assert!(trace.find_frame("frame-0").is_some());
        assert!(trace.find_frame("frame-1").is_none());
    }
}
