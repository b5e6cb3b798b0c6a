// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

pub mod account;
pub mod block;
pub mod log_entry;
pub mod transaction;

pub use crate::{
    account::Account,
    block::{Block, BlockInfo},
    log_entry::LogEntry,
    transaction::{
        Action, SignedTransaction, Transaction, TransactionError,
        TransactionWithSignature,
    },
};

pub use keccak_hash::KECCAK_EMPTY;
