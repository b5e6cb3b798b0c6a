// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use super::{ExecutionOutcome, TxToRun};
use crate::state::Context;
use ember_types::Address;
use primitives::BlockInfo;
use std::collections::BTreeMap;

/// A contract whose execution is performed by native code rather than the
/// VM, exposed at a fixed address.
pub trait SystemContract: Send + Sync {
    /// The fixed address this contract answers at.
    fn address(&self) -> &Address;

    /// Creates the contract's account on first start.
    fn init(&self, ctx: &mut Context);

    /// Executes a transaction whose `to` equals the contract address.
    fn execute(
        &self, ctx: &mut Context, block: &BlockInfo, tx: &TxToRun,
    ) -> ExecutionOutcome;

    /// Gas of the read-only precompile entry point.
    fn required_gas(&self, input: &[u8]) -> u64;

    /// The read-only precompile entry point; must not touch world state.
    fn run(&self, input: &[u8]) -> Result<Vec<u8>, String>;
}

/// Registered built-in contracts, dispatched by address.
#[derive(Default)]
pub struct SystemContractMap {
    contracts: BTreeMap<Address, Box<dyn SystemContract>>,
}

impl SystemContractMap {
    pub fn new() -> SystemContractMap { SystemContractMap::default() }

    pub fn register(&mut self, contract: Box<dyn SystemContract>) {
        self.contracts.insert(*contract.address(), contract);
    }

    pub fn contract(
        &self, address: &Address,
    ) -> Option<&Box<dyn SystemContract>> {
        self.contracts.get(address)
    }

    pub fn is_system_contract(&self, address: &Address) -> bool {
        self.contracts.contains_key(address)
    }

    /// Runs every registered contract's account setup.
    pub fn init_all(&self, ctx: &mut Context) {
        for contract in self.contracts.values() {
            contract.init(ctx);
        }
    }
}
