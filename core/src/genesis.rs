// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use crate::staking::types::Validator;
use ember_types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The app-state blob carried in the consensus genesis document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenesisData {
    #[serde(default)]
    pub alloc: BTreeMap<Address, GenesisAccount>,
    #[serde(default)]
    pub validators: Vec<Validator>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub balance: U256,
}
