// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! Retrace Common - Shared functionality for the retrace debugger core
//!
//! This crate provides the pure data layer shared by the engine and any
//! embedding frontend: the static opcode table, the hex string
//! conventions, the immutable trace/frame/step artifact, breakpoint
//! conditions and the world-state boundary types.

pub mod hex;
pub mod logging;
pub mod opcode;
pub mod types;

pub use hex::HexError;
pub use opcode::{mnemonic_for, opcode_by_code, opcode_by_mnemonic, OpcodeExt, OpcodeInfo};
