// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! The append-only history of blocks and transactions with secondary
//! indexes by address. The production deployment backs this with the
//! indexing database; the in-memory implementation below serves tests and
//! single-process runs.

use ember_types::{Address, H256};
use parking_lot::RwLock;
use primitives::{Block, LogEntry};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// One transaction as sealed into history.
#[derive(Clone, Debug)]
pub struct HistoryTx {
    pub hash: H256,
    pub from: Address,
    pub to: Address,
    /// rlp of the engine's committed record.
    pub content: Vec<u8>,
    pub logs: Vec<LogEntry>,
}

/// One block as sealed into history.
#[derive(Clone, Debug)]
pub struct HistoryBlock {
    pub height: i64,
    pub block_hash: H256,
    pub block: Block,
    pub txs: Vec<HistoryTx>,
}

/// Event published on the chain feed after every sealed block.
#[derive(Clone, Debug)]
pub struct ChainEvent {
    pub hash: H256,
    pub block: Arc<HistoryBlock>,
    pub logs: Vec<LogEntry>,
}

pub trait HistoryDb: Send + Sync {
    fn add_block(&self, block: HistoryBlock);
    fn get_block_by_height(&self, height: i64) -> Option<HistoryBlock>;
    fn get_tx_by_hash(&self, hash: &H256) -> Option<HistoryTx>;
    /// Transactions sent from or to `address`, oldest first.
    fn get_txs_by_addr(&self, address: &Address) -> Vec<HistoryTx>;
    /// Transactions that emitted a log from the given contract.
    fn get_txs_by_log_address(&self, address: &Address) -> Vec<HistoryTx>;
    fn latest_height(&self) -> i64;
}

#[derive(Default)]
struct MemHistoryInner {
    blocks: BTreeMap<i64, Arc<HistoryBlock>>,
    tx_index: HashMap<H256, (i64, usize)>,
    addr_index: HashMap<Address, Vec<(i64, usize)>>,
    log_index: HashMap<Address, Vec<(i64, usize)>>,
}

#[derive(Default)]
pub struct MemHistoryDb {
    inner: RwLock<MemHistoryInner>,
}

impl MemHistoryDb {
    pub fn new() -> MemHistoryDb { MemHistoryDb::default() }
}

impl MemHistoryInner {
    fn lookup(&self, at: &(i64, usize)) -> Option<HistoryTx> {
        self.blocks
            .get(&at.0)
            .and_then(|block| block.txs.get(at.1).cloned())
    }
}

impl HistoryDb for MemHistoryDb {
    fn add_block(&self, block: HistoryBlock) {
        let mut inner = self.inner.write();
        let height = block.height;
        for (idx, tx) in block.txs.iter().enumerate() {
            inner.tx_index.insert(tx.hash, (height, idx));
            inner
                .addr_index
                .entry(tx.from)
                .or_default()
                .push((height, idx));
            if tx.to != tx.from {
                inner
                    .addr_index
                    .entry(tx.to)
                    .or_default()
                    .push((height, idx));
            }
            for log in &tx.logs {
                inner
                    .log_index
                    .entry(log.address)
                    .or_default()
                    .push((height, idx));
            }
        }
        inner.blocks.insert(height, Arc::new(block));
    }

    fn get_block_by_height(&self, height: i64) -> Option<HistoryBlock> {
        self.inner
            .read()
            .blocks
            .get(&height)
            .map(|block| (**block).clone())
    }

    fn get_tx_by_hash(&self, hash: &H256) -> Option<HistoryTx> {
        let inner = self.inner.read();
        inner.tx_index.get(hash).and_then(|at| inner.lookup(at))
    }

    fn get_txs_by_addr(&self, address: &Address) -> Vec<HistoryTx> {
        let inner = self.inner.read();
        inner
            .addr_index
            .get(address)
            .map(|positions| {
                positions
                    .iter()
                    .filter_map(|at| inner.lookup(at))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn get_txs_by_log_address(&self, address: &Address) -> Vec<HistoryTx> {
        let inner = self.inner.read();
        inner
            .log_index
            .get(address)
            .map(|positions| {
                positions
                    .iter()
                    .filter_map(|at| inner.lookup(at))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn latest_height(&self) -> i64 {
        self.inner
            .read()
            .blocks
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
    }
}
