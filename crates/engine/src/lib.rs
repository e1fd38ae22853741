// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! Retrace Engine - Execution, trace building and time-travel navigation
//!
//! This crate contains the behavioral half of the debugger core:
//!
//! - [`asm`] - bidirectional mapping between EVM mnemonic source and
//!   hex bytecode
//! - [`Engine`] - executes bytecode on revm over a persistent in-memory
//!   world state and produces an immutable
//!   [`Trace`](retrace_common::types::Trace)
//! - [`DebugSession`] - flattens a trace into a globally indexed
//!   sequence and navigates it (step forward/backward/over/out,
//!   breakpoints)

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod asm;
pub mod inspector;

mod core;
pub use self::core::{
    BlockOverrides, Engine, EngineError, ExecutionParams, DEFAULT_CALL_TARGET, DEFAULT_GAS_LIMIT,
    DEFAULT_SENDER,
};

mod session;
pub use session::{DebugSession, FlatStep};

pub use asm::{assemble, disassemble, AsmError};
