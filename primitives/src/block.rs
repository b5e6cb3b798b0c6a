// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use ember_types::{Address, H256, U256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

/// Basic record of one block, created at begin-block and sealed into the
/// history database when the next block commits.
///
/// `state_root` refers to the world state *before* this block's transactions
/// are applied; the post-state is stamped into the record when block N+1
/// commits.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Block {
    pub number: i64,
    pub timestamp: i64,
    pub size: i64,
    pub parent_hash: H256,
    pub transactions_root: H256,
    pub state_root: H256,
    pub miner: Address,
    pub hash: H256,
    pub gas_used: u64,
    pub transactions: Vec<H256>,
}

impl Encodable for Block {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(10);
        s.append(&(self.number as u64));
        s.append(&(self.timestamp as u64));
        s.append(&(self.size as u64));
        s.append(&self.parent_hash);
        s.append(&self.transactions_root);
        s.append(&self.state_root);
        s.append(&self.miner);
        s.append(&self.hash);
        s.append(&self.gas_used);
        s.append_list(&self.transactions);
    }
}

impl Decodable for Block {
    fn decode(d: &Rlp) -> Result<Self, DecoderError> {
        if d.item_count()? != 10 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Block {
            number: d.val_at::<u64>(0)? as i64,
            timestamp: d.val_at::<u64>(1)? as i64,
            size: d.val_at::<u64>(2)? as i64,
            parent_hash: d.val_at(3)?,
            transactions_root: d.val_at(4)?,
            state_root: d.val_at(5)?,
            miner: d.val_at(6)?,
            hash: d.val_at(7)?,
            gas_used: d.val_at(8)?,
            transactions: d.list_at(9)?,
        })
    }
}

/// The coherent per-block snapshot handed to transaction execution and to
/// read-only callers. Published as a whole, never field by field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockInfo {
    pub coinbase: Address,
    pub number: i64,
    pub timestamp: i64,
    pub chain_id: U256,
    pub hash: H256,
}

impl BlockInfo {
    pub fn from_block(block: &Block, chain_id: U256) -> BlockInfo {
        BlockInfo {
            coinbase: block.miner,
            number: block.number,
            timestamp: block.timestamp,
            chain_id,
            hash: block.hash,
        }
    }
}
