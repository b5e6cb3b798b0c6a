// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use ember_types::U256;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("no such account")]
    NoSuchAccount,
    #[error("nonce mismatch: account holds {expected}, tx carries {got}")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("balance {balance} cannot cover {cost}")]
    InsufficientBalance { balance: U256, cost: U256 },
}

pub type Result<T> = std::result::Result<T, StateError>;
