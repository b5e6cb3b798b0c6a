// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! The per-operation handle over the world state.
//!
//! A [`Context`] wraps a rabbit cache (or none, for history-only queries),
//! optionally the history database, and the current block height. It knows
//! which mode it serves; all typed reads and writes of accounts, storage
//! slots and block metadata go through it.

mod error;

pub use self::error::{Result, StateError};

use crate::{history::HistoryDb, storage::RabbitStore};
use ember_types::{Address, U256};
use primitives::{Account, Block};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ContextMode {
    CheckTx,
    RunTx,
    Rpc,
    HistoryOnly,
}

const ACCOUNT_KEY_PREFIX: u8 = b'a';
const STORAGE_KEY_PREFIX: u8 = b's';
const CURR_BLOCK_KEY: &[u8] = b"b";

fn account_key(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(ACCOUNT_KEY_PREFIX);
    key.extend_from_slice(address.as_bytes());
    key
}

fn storage_key(sequence: u64, slot: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + slot.len());
    key.push(STORAGE_KEY_PREFIX);
    key.extend_from_slice(&sequence.to_be_bytes());
    key.extend_from_slice(slot);
    key
}

pub struct Context {
    rbt: Option<RabbitStore>,
    history: Option<Arc<dyn HistoryDb>>,
    height: i64,
    mode: ContextMode,
}

impl Context {
    pub fn new(
        height: i64, rbt: Option<RabbitStore>,
        history: Option<Arc<dyn HistoryDb>>, mode: ContextMode,
    ) -> Context {
        Context {
            rbt,
            history,
            height,
            mode,
        }
    }

    /// A sibling context with a fresh empty rabbit over the same parent,
    /// used to give each transaction its own isolation bubble.
    pub fn fork(&self) -> Context {
        Context {
            rbt: self.rbt.as_ref().map(|rbt| rbt.fork()),
            history: self.history.clone(),
            height: self.height,
            mode: self.mode,
        }
    }

    pub fn height(&self) -> i64 { self.height }

    pub fn mode(&self) -> ContextMode { self.mode }

    pub fn history(&self) -> Option<&Arc<dyn HistoryDb>> {
        self.history.as_ref()
    }

    fn rbt(&mut self) -> &mut RabbitStore {
        self.rbt
            .as_mut()
            .expect("state access through a history-only context")
    }

    pub fn get_account(&mut self, address: &Address) -> Option<Account> {
        self.rbt().get(&account_key(address)).map(|raw| {
            rlp::decode(&raw).expect("stored accounts decode; qed")
        })
    }

    pub fn set_account(&mut self, address: &Address, account: &Account) {
        self.rbt()
            .set(account_key(address), rlp::encode(account).to_vec());
    }

    pub fn get_storage(
        &mut self, sequence: u64, slot: &[u8],
    ) -> Option<Vec<u8>> {
        self.rbt().get(&storage_key(sequence, slot))
    }

    pub fn set_storage(&mut self, sequence: u64, slot: &[u8], value: &[u8]) {
        self.rbt().set(storage_key(sequence, slot), value.to_vec());
    }

    /// Succeeds iff the account exists and its nonce equals `nonce`.
    pub fn check_nonce(
        &mut self, address: &Address, nonce: u64,
    ) -> Result<Account> {
        let account =
            self.get_account(address).ok_or(StateError::NoSuchAccount)?;
        if account.nonce != nonce {
            return Err(StateError::NonceMismatch {
                expected: account.nonce,
                got: nonce,
            });
        }
        Ok(account)
    }

    /// Debits `gas_limit * gas_price` from the account before execution and
    /// persists the new balance.
    pub fn deduct_tx_fee(
        &mut self, address: &Address, account: &mut Account, gas_limit: u64,
        gas_price: &U256,
    ) -> Result<()> {
        let cost = U256::from(gas_limit) * *gas_price;
        if account.balance < cost {
            return Err(StateError::InsufficientBalance {
                balance: account.balance,
                cost,
            });
        }
        account.balance -= cost;
        self.set_account(address, account);
        Ok(())
    }

    pub fn get_curr_block_basic_info(&mut self) -> Option<Block> {
        self.rbt().get(CURR_BLOCK_KEY).map(|raw| {
            rlp::decode(&raw).expect("stored block info decodes; qed")
        })
    }

    pub fn set_curr_block_basic_info(&mut self, block: &Block) {
        self.rbt()
            .set(CURR_BLOCK_KEY.to_vec(), rlp::encode(block).to_vec());
    }

    /// The keys read from below and written by this context's rabbit.
    pub fn touched_keys(&self) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
        match &self.rbt {
            Some(rbt) => (
                rbt.read_keys().cloned().collect(),
                rbt.write_keys().cloned().collect(),
            ),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Releases the context; `dirty` merges buffered writes into the parent
    /// trunk, otherwise they are discarded. Dropping an unclosed context
    /// discards as well, so no exit path can leak buffered state.
    pub fn close(mut self, dirty: bool) {
        if dirty {
            if let Some(rbt) = self.rbt.as_mut() {
                rbt.write_back();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RabbitStore, RootStore, TrunkStore};

    fn run_ctx(trunk: &Arc<TrunkStore>) -> Context {
        Context::new(
            1,
            Some(RabbitStore::new(trunk.clone())),
            None,
            ContextMode::RunTx,
        )
    }

    fn addr(byte: u8) -> Address { Address::repeat_byte(byte) }

    #[test]
    fn account_round_trip_and_close_discipline() {
        let root = Arc::new(RootStore::new());
        let trunk = Arc::new(TrunkStore::new(root.clone(), true));

        let mut ctx = run_ctx(&trunk);
        let account = Account::with_balance(U256::from(1000u64));
        ctx.set_account(&addr(1), &account);
        assert_eq!(ctx.get_account(&addr(1)), Some(account.clone()));
        ctx.close(true);

        let mut ctx = run_ctx(&trunk);
        assert_eq!(ctx.get_account(&addr(1)), Some(account));
        // Forgotten contexts leak nothing.
        ctx.set_account(&addr(2), &Account::new_empty());
        drop(ctx);
        let mut ctx = run_ctx(&trunk);
        assert_eq!(ctx.get_account(&addr(2)), None);
    }

    #[test]
    fn check_nonce_enforced() {
        let root = Arc::new(RootStore::new());
        let trunk = Arc::new(TrunkStore::new(root, true));
        let mut ctx = run_ctx(&trunk);

        assert_eq!(
            ctx.check_nonce(&addr(1), 0),
            Err(StateError::NoSuchAccount)
        );

        let mut account = Account::with_balance(U256::from(10u64));
        account.nonce = 3;
        ctx.set_account(&addr(1), &account);
        assert_eq!(
            ctx.check_nonce(&addr(1), 2),
            Err(StateError::NonceMismatch {
                expected: 3,
                got: 2
            })
        );
        assert_eq!(ctx.check_nonce(&addr(1), 3), Ok(account));
    }

    #[test]
    fn deduct_tx_fee_requires_funds() {
        let root = Arc::new(RootStore::new());
        let trunk = Arc::new(TrunkStore::new(root, true));
        let mut ctx = run_ctx(&trunk);

        let mut account = Account::with_balance(U256::from(1_000_000u64));
        ctx.set_account(&addr(1), &account);
        assert!(ctx
            .deduct_tx_fee(&addr(1), &mut account, 100_000, &U256::from(100))
            .is_err());
        assert!(ctx
            .deduct_tx_fee(&addr(1), &mut account, 100_000, &U256::from(10))
            .is_ok());
        assert!(account.balance.is_zero());
        assert!(ctx.get_account(&addr(1)).unwrap().balance.is_zero());
    }

    #[test]
    fn storage_slots_are_namespaced_by_sequence() {
        let root = Arc::new(RootStore::new());
        let trunk = Arc::new(TrunkStore::new(root, true));
        let mut ctx = run_ctx(&trunk);

        let slot = [0u8; 32];
        ctx.set_storage(1, &slot, b"one");
        ctx.set_storage(2, &slot, b"two");
        assert_eq!(ctx.get_storage(1, &slot), Some(b"one".to_vec()));
        assert_eq!(ctx.get_storage(2, &slot), Some(b"two".to_vec()));
    }
}
