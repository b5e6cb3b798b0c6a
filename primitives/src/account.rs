// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use ember_types::{H256, U256};
use keccak_hash::KECCAK_EMPTY;
use rlp_derive::{RlpDecodable, RlpEncodable};

/// World-state entry of one address.
///
/// `sequence` identifies the code/contract incarnation of the account and
/// namespaces its storage slots, so a reused address never aliases old state.
#[derive(
    Clone, Debug, RlpDecodable, RlpEncodable, Eq, PartialEq, Ord, PartialOrd,
)]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
    pub sequence: u64,
    pub code_hash: H256,
}

impl Account {
    pub fn new_empty() -> Account {
        Account {
            balance: U256::zero(),
            nonce: 0,
            sequence: 0,
            code_hash: KECCAK_EMPTY,
        }
    }

    pub fn with_balance(balance: U256) -> Account {
        Account {
            balance,
            ..Account::new_empty()
        }
    }
}
