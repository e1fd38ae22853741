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

//! End-to-end engine tests: execute real bytecode through revm and
//! check the shape of the produced traces.

use alloy_primitives::{address, U256};
use retrace_common::{
    hex,
    types::{
        AccountOverride, ExecutionMode, FrameExitReason, FrameType, StateModifications,
    },
    HexError,
};
use retrace_engine::{assemble, Engine, EngineError, ExecutionParams};

/// PUSH1 0x2a; PUSH1 0x00; MSTORE; PUSH1 0x20; PUSH1 0x00; RETURN
const RUNTIME_CODE: &str = "0x602a60005260206000f3";

fn assert_instruction_boundaries(frame: &retrace_common::types::Frame) {
    let code = frame.code.as_ref();
    let mut boundaries = std::collections::HashSet::new();
    let mut pc = 0;
    while pc < code.len() {
        boundaries.insert(pc);
        let imm = retrace_common::opcode_by_code(code[pc]).map_or(0, |info| info.immediate_bytes);
        pc += 1 + imm;
    }
    for step in &frame.steps {
        assert!(
            boundaries.contains(&step.pc),
            "step pc {} of frame {} is not an instruction boundary",
            step.pc,
            frame.id
        );
    }
    for child in &frame.children {
        assert!(child.step_index < frame.steps.len());
        assert_instruction_boundaries(&child.frame);
    }
}

#[test]
fn test_push_stop_trace() {
    let mut engine = Engine::new();
    let trace = engine.execute(ExecutionParams::call("0x604200")).unwrap();

    assert!(trace.metadata.success);
    assert_eq!(trace.root.frame_type, FrameType::Root);
    assert_eq!(trace.root.steps.len(), 2);

    let push = &trace.root.steps[0];
    assert_eq!(push.pc, 0);
    assert_eq!(push.mnemonic, "PUSH1");
    assert!(push.stack.is_empty());
    assert_eq!(push.stack_after.as_deref(), Some(&[U256::from(0x42)][..]));

    let stop = &trace.root.steps[1];
    assert_eq!(stop.pc, 2);
    assert_eq!(stop.mnemonic, "STOP");
    assert_eq!(stop.stack, vec![U256::from(0x42)]);
}

#[test]
fn test_add_trace() {
    let mut engine = Engine::new();
    let trace = engine.execute(ExecutionParams::call("0x600360050100")).unwrap();

    let add = &trace.root.steps[2];
    assert_eq!(add.mnemonic, "ADD");
    assert_eq!(add.stack, vec![U256::from(5), U256::from(3)]);
    assert_eq!(add.stack_after.as_deref(), Some(&[U256::from(8)][..]));

    let stop = &trace.root.steps[3];
    assert_eq!(stop.mnemonic, "STOP");
    assert_eq!(stop.stack, vec![U256::from(8)]);
}

#[test]
fn test_revert_is_data_not_error() {
    let mut engine = Engine::new();
    let trace = engine.execute(ExecutionParams::call("0x60006000fd")).unwrap();

    assert!(!trace.metadata.success);
    assert_eq!(trace.root.result.exit_reason, FrameExitReason::Revert);
}

#[test]
fn test_synthetic_stop_is_stripped() {
    let mut engine = Engine::new();
    let trace = engine.execute(ExecutionParams::call("0x6042")).unwrap();

    // Only the PUSH1 remains; the appended STOP contributed the
    // post-state and then disappeared.
    assert_eq!(trace.root.steps.len(), 1);
    let push = &trace.root.steps[0];
    assert_eq!(push.mnemonic, "PUSH1");
    assert_eq!(push.stack_after.as_deref(), Some(&[U256::from(0x42)][..]));
    assert!(push.memory_after.is_some());
    assert_eq!(trace.root.code.as_ref(), &[0x60, 0x42]);
    assert!(trace.metadata.success);
}

#[test]
fn test_deploy_sstore_storage_capture() {
    let mut engine = Engine::new();
    // PUSH1 0x42; PUSH1 0x01; SSTORE; STOP
    let trace = engine.execute(ExecutionParams::deploy("0x604260015500")).unwrap();

    assert!(trace.metadata.success);
    assert_eq!(trace.metadata.mode, ExecutionMode::Deploy);
    assert!(trace.metadata.deployed_address.is_some());
    assert_eq!(trace.root.result.deployed_address, trace.metadata.deployed_address);
    assert_eq!(Some(trace.root.code_address), trace.metadata.deployed_address);

    let sstore = &trace.root.steps[2];
    assert_eq!(sstore.mnemonic, "SSTORE");
    assert_eq!(sstore.storage_changes.len(), 1);
    let change = &sstore.storage_changes[0];
    assert_eq!(change.slot, U256::from(1));
    assert_eq!(change.before, U256::ZERO);
    assert_eq!(change.after, U256::from(0x42));
    // The accumulator snapshot covers state *before* the opcode, so the
    // SSTORE step itself carries none.
    assert!(sstore.storage.is_none());

    let stop = &trace.root.steps[3];
    assert_eq!(stop.mnemonic, "STOP");
    let snapshot = stop.storage.as_ref().unwrap();
    assert_eq!(snapshot.get(&U256::from(1)), Some(&U256::from(0x42)));
}

#[test]
fn test_deploy_then_call_frame_tree() {
    let mut engine = Engine::new();

    // The root stores initcode in memory, CREATEs a contract from it,
    // then CALLs the deployed address.
    let initcode = "0x69602a60005260206000f3600052600a6016f3";
    let source = "\
PUSH19 0x69602a60005260206000f3600052600a6016f3
PUSH1 0x00
MSTORE
PUSH1 0x13 // initcode size
PUSH1 0x0d // initcode offset within the word
PUSH1 0x00 // value
CREATE
PUSH1 0x00 // retSize
PUSH1 0x00 // retOffset
PUSH1 0x00 // argsSize
PUSH1 0x00 // argsOffset
PUSH1 0x00 // value
DUP6       // created address
PUSH2 0xffff
CALL
STOP";
    let bytecode = assemble(source).unwrap();
    let trace = engine.execute(ExecutionParams::call(&bytecode)).unwrap();

    assert!(trace.metadata.success);
    assert_eq!(trace.frame_count(), 3);
    assert_eq!(trace.root.children.len(), 2);

    let create = &trace.root.children[0].frame;
    assert_eq!(create.frame_type, FrameType::Create);
    assert_eq!(create.id, "frame-0");
    assert_eq!(hex::encode(&create.code), initcode);
    assert_eq!(hex::encode(&create.input), initcode);
    assert_eq!(create.result.exit_reason, FrameExitReason::Success);
    let deployed = create.result.deployed_address.unwrap();
    assert_eq!(create.code_address, deployed);

    let call = &trace.root.children[1].frame;
    assert_eq!(call.frame_type, FrameType::Call);
    assert_eq!(call.id, "frame-1");
    assert_eq!(call.code_address, deployed);
    assert_eq!(hex::encode(&call.code), RUNTIME_CODE);
    assert_eq!(call.result.exit_reason, FrameExitReason::Success);
    assert_eq!(call.result.return_data.len(), 32);

    // Children attach to the spawning steps, in order.
    let create_spawn = &trace.root.steps[trace.root.children[0].step_index];
    assert_eq!(create_spawn.mnemonic, "CREATE");
    let call_spawn = &trace.root.steps[trace.root.children[1].step_index];
    assert_eq!(call_spawn.mnemonic, "CALL");
    assert!(trace.root.children[0].step_index <= trace.root.children[1].step_index);

    // The CALL step's post-stack carries the success flag pushed after
    // the child returned.
    assert_eq!(call_spawn.stack_after.as_ref().unwrap()[0], U256::from(1));

    assert_instruction_boundaries(&trace.root);
}

#[test]
fn test_call_child_code_from_seeded_state() {
    let planted = address!("00000000000000000000000000000000000000bb");
    let mut engine = Engine::new();

    let mut modifications = StateModifications::default();
    modifications.accounts.insert(
        planted,
        AccountOverride {
            code: Some(hex::decode_bytes(RUNTIME_CODE).unwrap()),
            ..Default::default()
        },
    );
    engine.set_state(modifications);

    let source = "\
PUSH1 0x00
PUSH1 0x00
PUSH1 0x00
PUSH1 0x00
PUSH1 0x00
PUSH20 0x00000000000000000000000000000000000000bb
PUSH2 0xffff
CALL
STOP";
    let bytecode = assemble(source).unwrap();
    let trace = engine.execute(ExecutionParams::call(&bytecode)).unwrap();

    assert!(trace.metadata.success);
    let child = &trace.root.children[0].frame;
    assert_eq!(child.frame_type, FrameType::Call);
    assert_eq!(child.code_address, planted);
    assert_eq!(hex::encode(&child.code), RUNTIME_CODE);
    assert!(!child.steps.is_empty());
    assert_eq!(child.steps[0].depth, 1);
}

#[test]
fn test_staticcall_write_protection() {
    let planted = address!("00000000000000000000000000000000000000bb");
    let mut engine = Engine::new();

    let mut modifications = StateModifications::default();
    modifications.accounts.insert(
        planted,
        AccountOverride {
            // PUSH1 0x01; PUSH1 0x01; SSTORE; STOP
            code: Some(hex::decode_bytes("0x600160015500").unwrap()),
            ..Default::default()
        },
    );
    engine.set_state(modifications);

    let source = "\
PUSH1 0x00
PUSH1 0x00
PUSH1 0x00
PUSH1 0x00
PUSH20 0x00000000000000000000000000000000000000bb
PUSH2 0xffff
STATICCALL
STOP";
    let bytecode = assemble(source).unwrap();
    let trace = engine.execute(ExecutionParams::call(&bytecode)).unwrap();

    // The parent survives the failed static call.
    assert!(trace.metadata.success);
    let child = &trace.root.children[0].frame;
    assert_eq!(child.frame_type, FrameType::StaticCall);
    assert_eq!(child.result.exit_reason, FrameExitReason::WriteProtection);
}

#[test]
fn test_out_of_gas() {
    let mut engine = Engine::new();
    // JUMPDEST; PUSH1 0x00; JUMP - spins until gas runs out.
    let trace = engine
        .execute(ExecutionParams::call("0x5b600056").with_gas_limit(25_000))
        .unwrap();

    assert!(!trace.metadata.success);
    assert_eq!(trace.root.result.exit_reason, FrameExitReason::OutOfGas);
}

#[test]
fn test_invalid_jump() {
    let mut engine = Engine::new();
    // PUSH1 0x04; JUMP - destination is not a JUMPDEST.
    let trace = engine.execute(ExecutionParams::call("0x60045600")).unwrap();

    assert!(!trace.metadata.success);
    assert_eq!(trace.root.result.exit_reason, FrameExitReason::InvalidJump);
}

#[test]
fn test_stack_underflow() {
    let mut engine = Engine::new();
    let trace = engine.execute(ExecutionParams::call("0x01")).unwrap();

    assert!(!trace.metadata.success);
    assert_eq!(trace.root.result.exit_reason, FrameExitReason::StackUnderflow);
}

#[test]
fn test_invalid_opcode() {
    let mut engine = Engine::new();
    let trace = engine.execute(ExecutionParams::call("0xfe")).unwrap();

    assert!(!trace.metadata.success);
    assert_eq!(trace.root.result.exit_reason, FrameExitReason::Invalid);
    assert_eq!(trace.root.steps.len(), 1);
    assert_eq!(trace.root.steps[0].mnemonic, "INVALID");
}

#[test]
fn test_empty_bytecode_produces_no_steps() {
    let mut engine = Engine::new();
    assert_eq!(
        engine.execute(ExecutionParams::call("0x")),
        Err(EngineError::NoStepsProduced)
    );
}

#[test]
fn test_rejects_malformed_hex() {
    let mut engine = Engine::new();
    assert_eq!(
        engine.execute(ExecutionParams::call("0x123")),
        Err(EngineError::Hex(HexError::OddLengthHex))
    );
    assert!(matches!(
        engine.execute(ExecutionParams::call("0x60zz")),
        Err(EngineError::Hex(HexError::NonHexChar { ch: 'z', .. }))
    ));
}

#[test]
fn test_calldata_is_visible() {
    let mut engine = Engine::new();
    // PUSH1 0x00; CALLDATALOAD; STOP
    let trace = engine
        .execute(
            ExecutionParams::call("0x60003500")
                .with_calldata(format!("0x{}", "11".repeat(32))),
        )
        .unwrap();

    let stop = trace.root.steps.last().unwrap();
    let word = U256::from_be_bytes([0x11u8; 32]);
    assert_eq!(stop.stack, vec![word]);
    assert_eq!(trace.root.input.as_ref(), &[0x11u8; 32][..]);
}

#[test]
fn test_value_transfer_from_prefunded_sender() {
    let mut engine = Engine::new();
    let trace = engine
        .execute(ExecutionParams::call("0x00").with_value(U256::from(7)))
        .unwrap();
    assert!(trace.metadata.success);

    let state = engine.world_state();
    let target = state
        .accounts
        .get(&retrace_engine::DEFAULT_CALL_TARGET)
        .expect("target account exists after the call");
    assert_eq!(target.balance, U256::from(7));
}

#[test]
fn test_state_persists_across_executions_until_reset() {
    let mut engine = Engine::new();
    let trace = engine.execute(ExecutionParams::deploy("0x604260015500")).unwrap();
    let deployed = trace.metadata.deployed_address.unwrap();

    let state = engine.world_state();
    let account = state.accounts.get(&deployed).expect("deployed account persisted");
    assert_eq!(account.storage.get(&U256::from(1)), Some(&U256::from(0x42)));

    // A second deploy from the same sender lands on a different address.
    let second = engine.execute(ExecutionParams::deploy("0x604260015500")).unwrap();
    assert_ne!(second.metadata.deployed_address.unwrap(), deployed);

    engine.reset_state();
    let state = engine.world_state();
    assert!(!state.accounts.contains_key(&deployed));

    // After a reset the first deployment address is available again.
    let third = engine.execute(ExecutionParams::deploy("0x604260015500")).unwrap();
    assert_eq!(third.metadata.deployed_address.unwrap(), deployed);
}

#[test]
fn test_failed_execute_leaves_state_unchanged() {
    let mut engine = Engine::new();
    let before = engine.world_state();
    let _ = engine.execute(ExecutionParams::call("0x"));
    assert_eq!(engine.world_state(), before);
}

#[test]
fn test_memory_expansion_is_recorded() {
    let mut engine = Engine::new();
    // PUSH1 0x42; PUSH1 0x00; MSTORE; STOP
    let trace = engine.execute(ExecutionParams::call("0x604260005200")).unwrap();

    let mstore = &trace.root.steps[2];
    assert_eq!(mstore.mnemonic, "MSTORE");
    assert!(mstore.memory.current.is_empty());
    assert_eq!(mstore.memory.expanded_size, Some(32));
    assert_eq!(mstore.memory_after.as_ref().unwrap().len(), 32);

    let stop = &trace.root.steps[3];
    assert_eq!(stop.memory.current.len(), 32);
    assert_eq!(stop.memory.expanded_size, None);
}

#[test]
fn test_transient_storage_capture() {
    let mut engine = Engine::new();
    // PUSH1 0x07; PUSH1 0x02; TSTORE; PUSH1 0x02; TLOAD; STOP
    let trace = engine.execute(ExecutionParams::call("0x600760025d60025c00")).unwrap();

    assert!(trace.metadata.success);
    let tstore = &trace.root.steps[2];
    assert_eq!(tstore.mnemonic, "TSTORE");
    assert_eq!(tstore.transient_storage_changes.len(), 1);
    let change = &tstore.transient_storage_changes[0];
    assert_eq!(change.slot, U256::from(2));
    assert_eq!(change.before, U256::ZERO);
    assert_eq!(change.after, U256::from(7));
    assert!(tstore.storage_changes.is_empty());

    let tload = &trace.root.steps[4];
    assert_eq!(tload.mnemonic, "TLOAD");
    assert_eq!(tload.stack_after.as_deref(), Some(&[U256::from(7)][..]));
}

#[test]
fn test_gas_accounting_on_steps() {
    let mut engine = Engine::new();
    let trace = engine.execute(ExecutionParams::call("0x604200")).unwrap();

    let push = &trace.root.steps[0];
    assert_eq!(push.gas_cost, 3);
    let stop = &trace.root.steps[1];
    assert!(stop.gas_remaining < push.gas_remaining);
    assert!(trace.metadata.gas_used >= 21_000);
}

#[test]
fn test_trace_serialization_conventions() {
    let mut engine = Engine::new();
    let trace = engine.execute(ExecutionParams::call("0x604200")).unwrap();
    let json = trace.to_json_value().unwrap();

    assert_eq!(json["root"]["type"], serde_json::json!("ROOT"));
    assert_eq!(json["root"]["id"], serde_json::json!("root"));
    assert_eq!(json["root"]["code"], serde_json::json!("0x604200"));
    assert_eq!(json["root"]["steps"][1]["stack"], serde_json::json!(["0x42"]));
    assert_eq!(json["root"]["result"]["exitReason"], serde_json::json!("success"));
    assert_eq!(json["metadata"]["mode"], serde_json::json!("call"));
}

#[test]
fn test_depth_zero_on_root_steps() {
    let mut engine = Engine::new();
    let trace = engine.execute(ExecutionParams::call("0x604200")).unwrap();
    assert!(trace.root.steps.iter().all(|step| step.depth == 0));
}

#[test]
fn test_assembled_source_round_trips_through_execution() {
    let mut engine = Engine::new();
    let bytecode = assemble("PUSH1 0x42\nSTOP").unwrap();
    assert_eq!(bytecode, "0x604200");
    let trace = engine.execute(ExecutionParams::call(&bytecode)).unwrap();
    assert_eq!(trace.root.steps.len(), 2);
}

#[test]
fn test_root_gas_default() {
    let mut engine = Engine::new();
    let trace = engine.execute(ExecutionParams::call("0x00")).unwrap();
    // Frame gas is what revm handed the root frame: the limit minus
    // intrinsic transaction costs.
    assert!(trace.root.gas <= retrace_engine::DEFAULT_GAS_LIMIT);
    assert!(trace.root.gas > 0);
}

#[test]
fn test_custom_sender_and_target() {
    let sender = address!("0000000000000000000000000000000000001111");
    let target = address!("0000000000000000000000000000000000002222");
    let mut engine = Engine::new();

    let mut modifications = StateModifications::default();
    modifications.accounts.insert(
        sender,
        AccountOverride { balance: Some(U256::from(1_000_000_000u64)), ..Default::default() },
    );
    engine.set_state(modifications);

    let mut params = ExecutionParams::call("0x604200");
    params.from = Some(sender);
    params.to = Some(target);
    let trace = engine.execute(params).unwrap();

    assert!(trace.metadata.success);
    assert_eq!(trace.root.caller, sender);
    assert_eq!(trace.root.code_address, target);
}

#[test]
fn test_block_overrides_are_visible_to_bytecode() {
    let mut engine = Engine::new();
    // NUMBER; TIMESTAMP; STOP
    let mut params = ExecutionParams::call("0x434200");
    params.block = Some(retrace_engine::BlockOverrides {
        number: Some(1234),
        timestamp: Some(99_999),
        ..Default::default()
    });
    let trace = engine.execute(params).unwrap();

    let stop = trace.root.steps.last().unwrap();
    assert_eq!(stop.stack, vec![U256::from(99_999), U256::from(1234)]);
}

fn _assert_send<T: Send>() {}

#[test]
fn test_trace_is_send() {
    _assert_send::<retrace_common::types::Trace>();
}
