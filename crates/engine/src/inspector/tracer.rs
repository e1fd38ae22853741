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

//! Trace-building inspector
//!
//! Consumes revm's strictly nested hook stream and reifies it into the
//! immutable frame tree, maintaining an explicit stack of open frames
//! rather than recursing. Each `call`/`create` hook opens a frame, each
//! `step` appends a pre-execution observation to the innermost open
//! frame, and each `call_end`/`create_end` seals the frame's result and
//! attaches it to its parent.
//!
//! Post-execution state for a step comes from two places: `step_end`
//! records the measured gas cost and the stack/memory right after the
//! instruction, and for frame-spawning opcodes the *next* step event in
//! the same frame overwrites those observations, because the child's
//! result push and returndata copy land on the parent between the
//! spawning instruction's `step_end` and the parent's next step.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, U256};
use retrace_common::{
    mnemonic_for,
    opcode::OpcodeExt,
    types::{
        ChildFrame, Frame, FrameExitReason, FrameResult, FrameType, MemorySnapshot, Step,
        StorageChange, ROOT_FRAME_ID,
    },
};
use revm::{
    context::ContextTr,
    context_interface::JournalTr,
    interpreter::{
        interpreter_types::{InputsTr, Jumps, MemoryTr},
        CallInputs, CallOutcome, CallScheme, CreateInputs, CreateOutcome, CreateScheme,
        InstructionResult, Interpreter,
    },
    Inspector,
};
use tracing::{debug, error};

const SSTORE: u8 = 0x55;
const TSTORE: u8 = 0x5d;

/// A frame that has been opened by `call`/`create` but not yet closed.
#[derive(Debug)]
struct OpenFrame {
    /// The frame under construction.
    frame: Frame,
    /// Index of the spawning step within the parent's `steps`.
    spawn_index: usize,
    /// Storage accumulated by SSTOREs in this frame (slot -> value).
    storage: BTreeMap<U256, U256>,
}

/// Inspector that assembles the execution into a [`Frame`] tree.
#[derive(Debug)]
pub struct TraceInspector {
    /// User-supplied bytecode (before terminal normalization), shown on
    /// the root frame for faithful display.
    root_code: Bytes,
    /// Stack of open frames; the innermost frame is last.
    stack: Vec<OpenFrame>,
    /// The sealed root frame, available once execution finished.
    root: Option<Frame>,
    /// Counter feeding `frame-N` ids.
    next_frame_id: usize,
}

impl TraceInspector {
    /// Create an inspector for one execution of `root_code`.
    pub fn new(root_code: Bytes) -> Self {
        Self { root_code, stack: Vec::new(), root: None, next_frame_id: 0 }
    }

    /// Consume the inspector and return the sealed root frame, if the
    /// hook stream produced one.
    pub fn into_root(self) -> Option<Frame> {
        if !self.stack.is_empty() {
            error!(open = self.stack.len(), "execution ended with unclosed frames");
            return None;
        }
        self.root
    }

    fn next_frame_id(&mut self) -> String {
        let id = format!("frame-{}", self.next_frame_id);
        self.next_frame_id += 1;
        id
    }

    /// Push a freshly opened frame. The root keeps the well-known id and
    /// shows the user-supplied bytecode; children get sequential ids and
    /// remember which parent step spawned them.
    fn open_frame(&mut self, mut frame: Frame) {
        let spawn_index = match self.stack.last() {
            Some(parent) => {
                let step_len = parent.frame.steps.len();
                frame.id = self.next_frame_id();
                step_len.saturating_sub(1)
            }
            None => {
                frame.id = ROOT_FRAME_ID.to_string();
                // In deploy mode the input is the normalized initcode;
                // show the user's bytecode instead.
                if frame.frame_type.is_create() {
                    frame.input = self.root_code.clone();
                }
                frame.frame_type = FrameType::Root;
                frame.code = self.root_code.clone();
                0
            }
        };
        self.stack.push(OpenFrame { frame, spawn_index, storage: BTreeMap::new() });
    }

    fn close_frame(&mut self, result: FrameResult, created: Option<Address>) {
        let Some(mut open) = self.stack.pop() else {
            error!("frame end without a matching open frame");
            return;
        };

        open.frame.result = result;
        if let Some(address) = created {
            open.frame.code_address = address;
        }
        finalize_last_step(&mut open.frame);

        match self.stack.last_mut() {
            Some(parent) => {
                parent
                    .frame
                    .children
                    .push(ChildFrame { step_index: open.spawn_index, frame: open.frame });
            }
            None => self.root = Some(open.frame),
        }
    }
}

impl<CTX> Inspector<CTX> for TraceInspector
where
    CTX: ContextTr,
{
    fn step(&mut self, interp: &mut Interpreter, ctx: &mut CTX) {
        let depth = self.stack.len().saturating_sub(1);
        let Some(open) = self.stack.last_mut() else {
            debug!("step event outside any open frame");
            return;
        };

        let opcode = interp.bytecode.opcode();
        let pc = interp.bytecode.pc();
        let stack: Vec<U256> = interp.stack.data().iter().rev().copied().collect();
        let mem_size = interp.memory.size();
        let memory = Bytes::copy_from_slice(&interp.memory.slice(0..mem_size));

        // The state we observe now is the previous step's post-state. For
        // frame-spawning opcodes it supersedes what step_end saw, since
        // the child's result push happens after step_end.
        if let Some(prev) = open.frame.steps.last_mut() {
            if prev.opcode.spawns_frame() {
                prev.stack_after = Some(stack.clone());
                if memory.len() > prev.memory.current.len() {
                    prev.memory.expanded_size = Some(memory.len());
                }
                prev.memory_after = Some(memory.clone());
            }
        }

        let storage_snapshot =
            if open.storage.is_empty() { None } else { Some(open.storage.clone()) };

        let mut storage_changes = Vec::new();
        let mut transient_storage_changes = Vec::new();
        let target = interp.input.target_address();
        if opcode == SSTORE && stack.len() >= 2 {
            let slot = stack[0];
            let after = stack[1];
            // A failed read leaves the write unrecorded.
            if let Ok(loaded) = ctx.journal_mut().sload(target, slot) {
                storage_changes.push(StorageChange { slot, before: loaded.data, after });
                open.storage.insert(slot, after);
            }
        } else if opcode == TSTORE && stack.len() >= 2 {
            let slot = stack[0];
            let after = stack[1];
            let before = ctx.journal_mut().tload(target, slot);
            transient_storage_changes.push(StorageChange { slot, before, after });
        }

        open.frame.steps.push(Step {
            pc,
            opcode,
            mnemonic: mnemonic_for(opcode),
            gas_remaining: interp.gas.remaining(),
            gas_cost: 0,
            depth,
            stack,
            memory: MemorySnapshot { current: memory, expanded_size: None },
            storage_changes,
            transient_storage_changes,
            storage: storage_snapshot,
            stack_after: None,
            memory_after: None,
        });
    }

    fn step_end(&mut self, interp: &mut Interpreter, _ctx: &mut CTX) {
        let Some(open) = self.stack.last_mut() else {
            return;
        };
        let Some(step) = open.frame.steps.last_mut() else {
            return;
        };

        step.gas_cost = step.gas_remaining.saturating_sub(interp.gas.remaining());

        let mem_size = interp.memory.size();
        let memory = Bytes::copy_from_slice(&interp.memory.slice(0..mem_size));
        if memory.len() > step.memory.current.len() {
            step.memory.expanded_size = Some(memory.len());
        }
        step.stack_after = Some(interp.stack.data().iter().rev().copied().collect());
        step.memory_after = Some(memory);
    }

    fn call(&mut self, ctx: &mut CTX, inputs: &mut CallInputs) -> Option<CallOutcome> {
        let frame_type = match inputs.scheme {
            CallScheme::Call => FrameType::Call,
            CallScheme::CallCode => FrameType::CallCode,
            CallScheme::DelegateCall => FrameType::DelegateCall,
            CallScheme::StaticCall => FrameType::StaticCall,
        };

        let frame = Frame {
            id: String::new(),
            frame_type,
            code_address: inputs.bytecode_address,
            // Filled from state after the run for non-root frames.
            code: Bytes::new(),
            input: inputs.input.bytes(ctx),
            value: inputs.value.get(),
            caller: inputs.caller,
            gas: inputs.gas_limit,
            steps: Vec::new(),
            children: Vec::new(),
            result: FrameResult::default(),
        };
        self.open_frame(frame);
        None
    }

    fn call_end(&mut self, _ctx: &mut CTX, inputs: &CallInputs, outcome: &mut CallOutcome) {
        let result = FrameResult {
            exit_reason: exit_reason_for(outcome.result.result),
            return_data: outcome.result.output.clone(),
            gas_used: inputs.gas_limit.saturating_sub(outcome.result.gas.remaining()),
            deployed_address: None,
        };
        self.close_frame(result, None);
    }

    fn create(&mut self, _ctx: &mut CTX, inputs: &mut CreateInputs) -> Option<CreateOutcome> {
        let frame_type = match inputs.scheme {
            CreateScheme::Create2 { .. } => FrameType::Create2,
            CreateScheme::Create | CreateScheme::Custom { .. } => FrameType::Create,
        };

        let frame = Frame {
            id: String::new(),
            frame_type,
            // The created address is only known at create_end.
            code_address: Address::ZERO,
            code: inputs.init_code.clone(),
            input: inputs.init_code.clone(),
            value: inputs.value,
            caller: inputs.caller,
            gas: inputs.gas_limit,
            steps: Vec::new(),
            children: Vec::new(),
            result: FrameResult::default(),
        };
        self.open_frame(frame);
        None
    }

    fn create_end(&mut self, _ctx: &mut CTX, inputs: &CreateInputs, outcome: &mut CreateOutcome) {
        let exit_reason = exit_reason_for(outcome.result.result);
        let created = if exit_reason.is_success() { outcome.address } else { None };
        let result = FrameResult {
            exit_reason,
            return_data: outcome.result.output.clone(),
            gas_used: inputs.gas_limit.saturating_sub(outcome.result.gas.remaining()),
            deployed_address: created,
        };
        self.close_frame(result, created);
    }
}

/// Map revm's typed halt reason onto the closed exit-reason set.
/// Execution exceptions are trace data, never engine errors.
fn exit_reason_for(result: InstructionResult) -> FrameExitReason {
    if result.is_ok() {
        return FrameExitReason::Success;
    }
    match result {
        InstructionResult::Revert => FrameExitReason::Revert,
        InstructionResult::OutOfGas
        | InstructionResult::MemoryOOG
        | InstructionResult::MemoryLimitOOG
        | InstructionResult::PrecompileOOG
        | InstructionResult::InvalidOperandOOG
        | InstructionResult::ReentrancySentryOOG => FrameExitReason::OutOfGas,
        InstructionResult::StackUnderflow => FrameExitReason::StackUnderflow,
        InstructionResult::StackOverflow => FrameExitReason::StackOverflow,
        InstructionResult::InvalidJump => FrameExitReason::InvalidJump,
        InstructionResult::StateChangeDuringStaticCall
        | InstructionResult::CallNotAllowedInsideStatic => FrameExitReason::WriteProtection,
        _ => FrameExitReason::Invalid,
    }
}

/// Synthesize the final step's post-state from the terminal opcode's
/// arity when no later event observed it.
fn finalize_last_step(frame: &mut Frame) {
    let Some(step) = frame.steps.last_mut() else {
        return;
    };
    if step.stack_after.is_none() {
        let popped = match step.opcode {
            0xf3 | 0xfd => 2,
            0xff => 1,
            _ => 0,
        };
        step.stack_after = Some(step.stack.iter().skip(popped).copied().collect());
    }
    if step.memory_after.is_none() {
        step.memory_after = Some(step.memory.current.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_mapping() {
        assert_eq!(exit_reason_for(InstructionResult::Stop), FrameExitReason::Success);
        assert_eq!(exit_reason_for(InstructionResult::Return), FrameExitReason::Success);
        assert_eq!(exit_reason_for(InstructionResult::SelfDestruct), FrameExitReason::Success);
        assert_eq!(exit_reason_for(InstructionResult::Revert), FrameExitReason::Revert);
        assert_eq!(exit_reason_for(InstructionResult::OutOfGas), FrameExitReason::OutOfGas);
        assert_eq!(exit_reason_for(InstructionResult::MemoryOOG), FrameExitReason::OutOfGas);
        assert_eq!(
            exit_reason_for(InstructionResult::StackUnderflow),
            FrameExitReason::StackUnderflow
        );
        assert_eq!(
            exit_reason_for(InstructionResult::StackOverflow),
            FrameExitReason::StackOverflow
        );
        assert_eq!(exit_reason_for(InstructionResult::InvalidJump), FrameExitReason::InvalidJump);
        assert_eq!(
            exit_reason_for(InstructionResult::StateChangeDuringStaticCall),
            FrameExitReason::WriteProtection
        );
        assert_eq!(
            exit_reason_for(InstructionResult::InvalidFEOpcode),
            FrameExitReason::Invalid
        );
        assert_eq!(exit_reason_for(InstructionResult::OpcodeNotFound), FrameExitReason::Invalid);
    }

    #[test]
    fn test_finalize_last_step_arity() {
        let mut frame = Frame {
            id: ROOT_FRAME_ID.to_string(),
            frame_type: FrameType::Root,
            code_address: Address::ZERO,
            code: Bytes::new(),
            input: Bytes::new(),
            value: U256::ZERO,
            caller: Address::ZERO,
            gas: 0,
            steps: vec![Step {
                pc: 4,
                opcode: 0xfd,
                mnemonic: "REVERT".to_string(),
                gas_remaining: 100,
                gas_cost: 0,
                depth: 0,
                stack: vec![U256::ZERO, U256::ZERO, U256::from(7)],
                memory: MemorySnapshot::default(),
                storage_changes: vec![],
                transient_storage_changes: vec![],
                storage: None,
                stack_after: None,
                memory_after: None,
            }],
            children: vec![],
            result: FrameResult::default(),
        };

        finalize_last_step(&mut frame);
        let step = &frame.steps[0];
        assert_eq!(step.stack_after.as_deref(), Some(&[U256::from(7)][..]));
        assert!(step.memory_after.is_some());
    }
}
