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

use std::{fmt::Display, str::FromStr};

use alloy_primitives::U256;
use eyre::{bail, eyre, Error, Result};
use serde::{Deserialize, Serialize};

use crate::opcode::opcode_by_mnemonic;

/// Opaque handle returned by `add_breakpoint` and accepted by
/// `remove_breakpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakpointId(pub usize);

impl Display for BreakpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bp-{}", self.0)
    }
}

/// Condition a flat step must satisfy for a breakpoint to trigger.
///
/// When several fields are set, all of them must match (conjunction).
/// A condition with no field set never matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointCondition {
    /// Program counter the step must be at.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pc: Option<usize>,
    /// Opcode byte the step must execute.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub opcode: Option<u8>,
    /// Storage slot the step must write (matched against the step's
    /// recorded storage changes).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub storage_slot: Option<U256>,
    /// Exact flat-step index to stop at.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub global_step_index: Option<usize>,
}

impl BreakpointCondition {
    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.pc.is_none()
            && self.opcode.is_none()
            && self.storage_slot.is_none()
            && self.global_step_index.is_none()
    }
}

impl Display for BreakpointCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(pc) = self.pc {
            parts.push(format!("pc={pc}"));
        }
        if let Some(opcode) = self.opcode {
            parts.push(format!("opcode={}", crate::opcode::mnemonic_for(opcode)));
        }
        if let Some(slot) = self.storage_slot {
            parts.push(format!("slot={slot:#x}"));
        }
        if let Some(index) = self.global_step_index {
            parts.push(format!("step={index}"));
        }
        write!(f, "{}", parts.join(" "))
    }
}

impl FromStr for BreakpointCondition {
    type Err = Error;

    /// Parses a condition from space-separated `key=value` pairs.
    /// Recognized keys: `pc`, `opcode` (mnemonic or byte), `slot`, `step`.
    /// Examples:
    /// - `pc=4`
    /// - `opcode=SSTORE slot=0x1`
    /// - `step=12`
    fn from_str(s: &str) -> Result<Self> {
        let mut condition = Self::default();
        for part in s.split_whitespace() {
            let (key, value) =
                part.split_once('=').ok_or_else(|| eyre!("expected key=value, got: {part}"))?;
            match key {
                "pc" => {
                    condition.pc =
                        Some(parse_usize(value).map_err(|e| eyre!("invalid pc: {e}"))?);
                }
                "opcode" => {
                    let folded = value.to_uppercase();
                    let byte = if let Some(info) = opcode_by_mnemonic(&folded) {
                        info.code
                    } else {
                        u8::from_str_radix(value.trim_start_matches("0x"), 16)
                            .map_err(|e| eyre!("invalid opcode `{value}`: {e}"))?
                    };
                    condition.opcode = Some(byte);
                }
                "slot" => {
                    let slot = if let Some(hex) = value.strip_prefix("0x") {
                        U256::from_str_radix(hex, 16)
                    } else {
                        U256::from_str_radix(value, 10)
                    }
                    .map_err(|e| eyre!("invalid slot `{value}`: {e}"))?;
                    condition.storage_slot = Some(slot);
                }
                "step" => {
                    condition.global_step_index =
                        Some(parse_usize(value).map_err(|e| eyre!("invalid step: {e}"))?);
                }
                _ => bail!("unknown breakpoint key `{key}`"),
            }
        }
        if condition.is_empty() {
            bail!("breakpoint condition has no fields; expected key=value pairs");
        }
        Ok(condition)
    }
}

fn parse_usize(value: &str) -> Result<usize, std::num::ParseIntError> {
    if let Some(hex) = value.strip_prefix("0x") {
        usize::from_str_radix(hex, 16)
    } else {
        value.parse()
    }
}

/// A registered breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    /// Handle for removal.
    pub id: BreakpointId,
    /// Condition that triggers it.
    pub condition: BreakpointCondition,
}

impl Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.id, self.condition)
    }
}
