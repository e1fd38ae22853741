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

//! World-state boundary types for inspecting and seeding the engine's
//! in-memory database between executions.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Snapshot of a single account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    /// Balance in wei.
    pub balance: U256,
    /// Account nonce.
    pub nonce: u64,
    /// Deployed code, empty for EOAs.
    pub code: Bytes,
    /// Storage slots with non-default values.
    pub storage: BTreeMap<U256, U256>,
}

/// Snapshot of the engine's entire world state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    /// All known accounts.
    pub accounts: BTreeMap<Address, AccountState>,
}

/// Partial update of a single account. Unset fields keep their current
/// value; `storage` entries are merged in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOverride {
    /// New balance, if set.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub balance: Option<U256>,
    /// New nonce, if set.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nonce: Option<u64>,
    /// New code, if set.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<Bytes>,
    /// Storage slots to write.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub storage: HashMap<U256, U256>,
}

/// A batch of account updates applied by `Engine::set_state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateModifications {
    /// Per-account overrides.
    pub accounts: HashMap<Address, AccountOverride>,
}
