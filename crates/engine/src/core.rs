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

//! Core engine: drives revm over an in-memory world state and turns one
//! execution into an immutable [`Trace`].
//!
//! The world state persists across `execute` calls until `reset_state`.
//! Each execution runs against a scratch copy of the database; the
//! journaled changes are committed back only when a trace was actually
//! produced, so a failed call leaves the engine untouched. A successful
//! execution commits regardless of whether the root frame reverted
//! (revm has already unwound the reverted changes internally).

use std::collections::BTreeMap;

use alloy_primitives::{address, Address, Bytes, TxKind, U256};
use retrace_common::{
    hex,
    opcode::OpcodeExt,
    types::{
        AccountState, ExecutionMode, Frame, StateModifications, Trace, TraceMetadata, WorldState,
    },
    HexError,
};
use revm::{
    context::{
        result::{ExecutionResult, Output},
        tx::TxEnvBuilder,
        BlockEnv,
    },
    database::InMemoryDB,
    state::{Bytecode, EvmState},
    Context, DatabaseCommit, DatabaseRef, ExecuteEvm, InspectEvm, MainBuilder, MainContext,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::inspector::TraceInspector;

/// Well-known EOA used as the sender when `from` is not supplied.
/// Pre-funded at engine construction so value transfers never fail for
/// lack of balance.
pub const DEFAULT_SENDER: Address = address!("000000000000000000000000000000000000cafe");

/// Well-known address the bytecode is installed at in call mode when
/// `to` is not supplied.
pub const DEFAULT_CALL_TARGET: Address = address!("000000000000000000000000000000000000beef");

/// Default transaction gas limit.
pub const DEFAULT_GAS_LIMIT: u64 = 30_000_000;

const STOP: u8 = 0x00;

/// Engine-level failures. EVM-level outcomes (revert, out of gas, …)
/// are not errors; they surface on the trace itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The bytecode was empty or trapped before its first instruction.
    #[error("bytecode produced no steps")]
    NoStepsProduced,
    /// The underlying interpreter failed in a way that is not an
    /// EVM-level execution outcome.
    #[error("interpreter failure: {0}")]
    Interpreter(String),
    /// `bytecode` or `calldata` is not valid hex.
    #[error(transparent)]
    Hex(#[from] HexError),
}

/// Block environment overrides applied to one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOverrides {
    /// Block number.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub number: Option<u64>,
    /// Block timestamp in seconds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<u64>,
    /// Base fee per gas.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub base_fee: Option<u64>,
    /// Fee recipient.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub coinbase: Option<Address>,
    /// Block gas limit.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gas_limit: Option<u64>,
    /// Pre-merge difficulty.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub difficulty: Option<U256>,
    /// Post-merge randomness beacon.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prev_randao: Option<alloy_primitives::B256>,
}

/// Parameters of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionParams {
    /// Hex bytecode to execute (initcode in deploy mode).
    pub bytecode: String,
    /// Dispatch mode.
    pub mode: ExecutionMode,
    /// Hex calldata, call mode only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub calldata: Option<String>,
    /// Call value in wei.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<U256>,
    /// Sender address.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub from: Option<Address>,
    /// Target address, call mode only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub to: Option<Address>,
    /// Transaction gas limit.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gas_limit: Option<u64>,
    /// Block environment overrides.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub block: Option<BlockOverrides>,
}

impl ExecutionParams {
    /// Parameters for a call-mode execution of `bytecode`.
    pub fn call(bytecode: impl Into<String>) -> Self {
        Self::new(bytecode, ExecutionMode::Call)
    }

    /// Parameters for a deploy-mode execution of `bytecode`.
    pub fn deploy(bytecode: impl Into<String>) -> Self {
        Self::new(bytecode, ExecutionMode::Deploy)
    }

    fn new(bytecode: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            bytecode: bytecode.into(),
            mode,
            calldata: None,
            value: None,
            from: None,
            to: None,
            gas_limit: None,
            block: None,
        }
    }

    /// Set the calldata.
    pub fn with_calldata(mut self, calldata: impl Into<String>) -> Self {
        self.calldata = Some(calldata.into());
        self
    }

    /// Set the call value.
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the gas limit.
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    /// Set block overrides.
    pub fn with_block(mut self, block: BlockOverrides) -> Self {
        self.block = Some(block);
        self
    }
}

/// The execution engine. Owns the persistent in-memory world state and
/// produces one [`Trace`] per `execute` call.
#[derive(Debug)]
pub struct Engine {
    db: InMemoryDB,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create an engine with a fresh world state and a pre-funded
    /// default sender.
    pub fn new() -> Self {
        let mut engine = Self { db: InMemoryDB::default() };
        engine.fund_default_sender();
        engine
    }

    /// Discard all world state and start fresh.
    pub fn reset_state(&mut self) {
        self.db = InMemoryDB::default();
        self.fund_default_sender();
    }

    fn fund_default_sender(&mut self) {
        let mut info = self.db.basic_ref(DEFAULT_SENDER).unwrap_or_default().unwrap_or_default();
        // 1,000,000 ETH.
        info.balance = U256::from(10u64).pow(U256::from(24u64));
        self.db.insert_account_info(DEFAULT_SENDER, info);
    }

    /// Execute bytecode to completion and return the structured trace.
    pub fn execute(&mut self, params: ExecutionParams) -> Result<Trace, EngineError> {
        let bytecode = hex::decode_bytes(&params.bytecode)?;
        let calldata = match &params.calldata {
            Some(data) => hex::decode_bytes(data)?,
            None => Bytes::new(),
        };
        let from = params.from.unwrap_or(DEFAULT_SENDER);
        let to = params.to.unwrap_or(DEFAULT_CALL_TARGET);
        let value = params.value.unwrap_or(U256::ZERO);
        let gas_limit = params.gas_limit.unwrap_or(DEFAULT_GAS_LIMIT);

        let exec_bytecode = normalize_terminal_opcode(&bytecode);
        debug!(
            mode = %params.mode,
            bytes = bytecode.len(),
            normalized = exec_bytecode.len() != bytecode.len(),
            "executing bytecode"
        );

        let mut db = self.db.clone();
        if params.mode == ExecutionMode::Call {
            install_code(&mut db, to, exec_bytecode.clone());
        }
        let nonce = db.basic_ref(from).unwrap_or_default().map(|a| a.nonce).unwrap_or(0);

        let block = block_env(params.block.as_ref());
        let gas_price = block.basefee as u128;
        let ctx = Context::mainnet().with_db(db).with_block(block);

        let mut inspector = TraceInspector::new(bytecode.clone());
        let mut evm = ctx.build_mainnet_with_inspector(&mut inspector);

        let tx = TxEnvBuilder::new()
            .caller(from)
            .kind(match params.mode {
                ExecutionMode::Call => TxKind::Call(to),
                ExecutionMode::Deploy => TxKind::Create,
            })
            .data(match params.mode {
                ExecutionMode::Call => calldata,
                ExecutionMode::Deploy => exec_bytecode,
            })
            .value(value)
            .gas_limit(gas_limit)
            .gas_price(gas_price)
            .nonce(nonce)
            .build_fill();

        let result = evm
            .inspect_one_tx(tx)
            .map_err(|e| EngineError::Interpreter(format!("{e:?}")))?;
        let state = evm.finalize();
        drop(evm);

        let mut root = inspector.into_root().ok_or(EngineError::NoStepsProduced)?;

        populate_missing_code(&mut root, &state, &self.db);
        strip_padding_steps(&mut root);
        if root.steps.is_empty() {
            return Err(EngineError::NoStepsProduced);
        }

        self.db.commit(state);

        let success = root.result.exit_reason.is_success();
        let (return_data, gas_used, deployed_address) = match result {
            ExecutionResult::Success { gas_used, output, .. } => match output {
                Output::Call(data) => (data, gas_used, None),
                Output::Create(data, created) => (data, gas_used, created),
            },
            ExecutionResult::Revert { gas_used, output } => (output, gas_used, None),
            ExecutionResult::Halt { gas_used, .. } => (Bytes::new(), gas_used, None),
        };

        Ok(Trace {
            root,
            metadata: TraceMetadata {
                mode: params.mode,
                success,
                return_data,
                gas_used,
                deployed_address,
            },
        })
    }

    /// Snapshot the engine's entire world state.
    pub fn world_state(&self) -> WorldState {
        let mut accounts = BTreeMap::new();
        for (address, db_account) in &self.db.cache.accounts {
            let code = db_account
                .info
                .code
                .as_ref()
                .map(|code| code.original_bytes())
                .unwrap_or_default();
            accounts.insert(
                *address,
                AccountState {
                    balance: db_account.info.balance,
                    nonce: db_account.info.nonce,
                    code,
                    storage: db_account.storage.iter().map(|(k, v)| (*k, *v)).collect(),
                },
            );
        }
        WorldState { accounts }
    }

    /// Apply a batch of account overrides to the world state.
    pub fn set_state(&mut self, modifications: StateModifications) {
        for (address, account) in modifications.accounts {
            let mut info = self.db.basic_ref(address).unwrap_or_default().unwrap_or_default();
            if let Some(balance) = account.balance {
                info.balance = balance;
            }
            if let Some(nonce) = account.nonce {
                info.nonce = nonce;
            }
            if let Some(code) = account.code {
                let bytecode = Bytecode::new_raw(code);
                info.code_hash = bytecode.hash_slow();
                info.code = Some(bytecode);
            }
            self.db.insert_account_info(address, info);
            for (slot, value) in account.storage {
                if let Err(err) = self.db.insert_account_storage(address, slot, value) {
                    warn!(%address, %slot, "failed to set storage slot: {err:?}");
                }
            }
        }
    }
}

/// Append a synthetic STOP when the bytecode does not already end on a
/// terminal opcode, so the final real instruction has a successor step
/// carrying its post-state. The synthetic step is stripped from the
/// finished trace.
fn normalize_terminal_opcode(bytecode: &Bytes) -> Bytes {
    match bytecode.last() {
        Some(last) if !last.is_terminal() => {
            let mut padded = bytecode.to_vec();
            padded.push(STOP);
            padded.into()
        }
        _ => bytecode.clone(),
    }
}

/// Install `code` as the deployed code of `address`, preserving the
/// account's balance, nonce and storage.
fn install_code(db: &mut InMemoryDB, address: Address, code: Bytes) {
    let mut info = db.basic_ref(address).unwrap_or_default().unwrap_or_default();
    let bytecode = Bytecode::new_raw(code);
    info.code_hash = bytecode.hash_slow();
    info.code = Some(bytecode);
    db.insert_account_info(address, info);
}

/// Depth-first pass filling in the code of frames whose code could only
/// be resolved from state after the run (CALL-family children).
fn populate_missing_code(frame: &mut Frame, state: &EvmState, db: &InMemoryDB) {
    if frame.code.is_empty() && frame.code_address != Address::ZERO {
        if let Some(code) = lookup_code(frame.code_address, state, db) {
            frame.code = code;
        }
    }
    for child in &mut frame.children {
        populate_missing_code(&mut child.frame, state, db);
    }
}

fn lookup_code(address: Address, state: &EvmState, db: &InMemoryDB) -> Option<Bytes> {
    if let Some(account) = state.get(&address) {
        if let Some(code) = &account.info.code {
            let bytes = code.original_bytes();
            if !bytes.is_empty() {
                return Some(bytes);
            }
        }
    }
    let info = db.basic_ref(address).ok().flatten()?;
    let bytes = info.code.as_ref().map(|code| code.original_bytes())?;
    (!bytes.is_empty()).then_some(bytes)
}

/// Remove the trailing synthetic STOP step of every frame whose final
/// step landed past the end of its code (terminal normalization for the
/// root, revm's own bytecode padding for children). Its post-state
/// contribution to the preceding step has already been applied.
fn strip_padding_steps(frame: &mut Frame) {
    if let Some(last) = frame.steps.last() {
        if last.opcode == STOP && last.pc >= frame.code.len() {
            frame.steps.pop();
        }
    }
    for child in &mut frame.children {
        strip_padding_steps(&mut child.frame);
    }
}

fn block_env(overrides: Option<&BlockOverrides>) -> BlockEnv {
    let mut block = BlockEnv::default();
    let Some(overrides) = overrides else {
        return block;
    };
    if let Some(number) = overrides.number {
        block.number = U256::from(number);
    }
    if let Some(timestamp) = overrides.timestamp {
        block.timestamp = U256::from(timestamp);
    }
    if let Some(base_fee) = overrides.base_fee {
        block.basefee = base_fee;
    }
    if let Some(coinbase) = overrides.coinbase {
        block.beneficiary = coinbase;
    }
    if let Some(gas_limit) = overrides.gas_limit {
        block.gas_limit = gas_limit;
    }
    if let Some(difficulty) = overrides.difficulty {
        block.difficulty = difficulty;
    }
    if let Some(prev_randao) = overrides.prev_randao {
        block.prevrandao = Some(prev_randao);
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_appends_stop() {
        let padded = normalize_terminal_opcode(&Bytes::from(vec![0x60, 0x42]));
        assert_eq!(padded.as_ref(), &[0x60, 0x42, 0x00]);
    }

    #[test]
    fn test_normalize_keeps_terminal_endings() {
        for terminal in [0x00u8, 0xf3, 0xfd, 0xfe, 0xff] {
            let code = Bytes::from(vec![0x60, 0x42, terminal]);
            assert_eq!(normalize_terminal_opcode(&code), code);
        }
    }

    #[test]
    fn test_normalize_empty_bytecode() {
        assert_eq!(normalize_terminal_opcode(&Bytes::new()), Bytes::new());
    }

    #[test]
    fn test_params_builders() {
        let params = ExecutionParams::call("0x00").with_value(U256::from(7));
        assert_eq!(params.mode, ExecutionMode::Call);
        assert_eq!(params.value, Some(U256::from(7)));
        assert!(params.calldata.is_none());
    }
}
