// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! The transaction engine: collects delivered transactions, reorders them
//! deterministically under the consensus-provided seed, executes them with
//! bounded parallelism and reports the block's fee totals.
//!
//! Execution is optimistic: a wave of transactions runs concurrently, each
//! in its own rabbit cache, and the results merge in schedule order. A
//! transaction that touched keys written by an earlier member of its wave
//! is rerun serially, so the committed effects are exactly those of the
//! serial schedule order.

use crate::{
    executive::{
        add_system_acc_balance, ExecutionOutcome, SystemContractMap, TxRunner,
        TxToRun,
    },
    state::Context,
};
use ember_types::{u64_from_le_slice, Address, H256, U256};
use keccak_hash::keccak;
use log::{debug, warn};
use parking_lot::Mutex;
use primitives::{BlockInfo, SignedTransaction, TransactionWithSignature};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{mpsc::channel, Arc},
};
use threadpool::ThreadPool;

/// One executed transaction as sealed into the block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommittedTx {
    pub hash: H256,
    pub from: Address,
    /// Zero for contract-creation shells.
    pub to: Address,
    pub outcome: ExecutionOutcome,
}

impl Encodable for CommittedTx {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        s.append(&self.hash);
        s.append(&self.from);
        s.append(&self.to);
        s.append(&self.outcome);
    }
}

impl Decodable for CommittedTx {
    fn decode(d: &Rlp) -> Result<Self, DecoderError> {
        Ok(CommittedTx {
            hash: d.val_at(0)?,
            from: d.val_at(1)?,
            to: d.val_at(2)?,
            outcome: d.val_at(3)?,
        })
    }
}

#[derive(Clone, Debug, Default)]
struct GasInfo {
    gas_used: u64,
    gas_refund: U256,
    gas_fee: U256,
}

pub struct TxEngine {
    worker_count: usize,
    prepare_lane_count: usize,
    standby_cap: usize,
    committed_cap: usize,
    chain_id: u64,
    runner: TxRunner,
    worker_pool: Mutex<ThreadPool>,
    ctx: Mutex<Option<Context>>,
    collected: Mutex<Vec<TransactionWithSignature>>,
    standby: Mutex<VecDeque<TxToRun>>,
    scheduled: Mutex<Vec<TxToRun>>,
    committed: Mutex<Vec<CommittedTx>>,
    gas_info: Mutex<GasInfo>,
}

impl TxEngine {
    pub fn new(
        worker_count: usize, prepare_lane_count: usize, standby_cap: usize,
        committed_cap: usize, chain_id: u64,
        system_contracts: Arc<SystemContractMap>,
    ) -> TxEngine {
        TxEngine {
            worker_count: worker_count.max(1),
            prepare_lane_count: prepare_lane_count.max(1),
            standby_cap,
            committed_cap,
            chain_id,
            runner: TxRunner::new(system_contracts),
            worker_pool: Mutex::new(ThreadPool::with_name(
                "Tx Engine Worker".into(),
                worker_count.max(1),
            )),
            ctx: Mutex::new(None),
            collected: Mutex::new(Vec::new()),
            standby: Mutex::new(VecDeque::new()),
            scheduled: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
            gas_info: Mutex::new(GasInfo::default()),
        }
    }

    /// Rebinds the run context after a commit reopened fresh trunks.
    pub fn set_context(&self, ctx: Context) {
        // The previous context, if any, is dropped and thereby discarded.
        *self.ctx.lock() = Some(ctx);
    }

    pub fn context_close(&self, dirty: bool) {
        if let Some(ctx) = self.ctx.lock().take() {
            ctx.close(dirty);
        }
    }

    pub fn collect_tx(&self, tx: TransactionWithSignature) {
        self.collected.lock().push(tx);
    }

    pub fn collected_count(&self) -> usize { self.collected.lock().len() }

    pub fn standby_len(&self) -> usize { self.standby.lock().len() }

    /// The last executed block's transactions, in committed order.
    pub fn committed_txs(&self) -> Vec<CommittedTx> {
        self.committed.lock().clone()
    }

    /// `(gas_used, gas_refund, gas_fee)` totals of the last executed block.
    pub fn gas_used_info(&self) -> (u64, U256, U256) {
        let info = self.gas_info.lock();
        (info.gas_used, info.gas_refund, info.gas_fee)
    }

    /// Recovers senders, permutes the collected set under the reorder seed
    /// and schedules at most one transaction per sender; the rest wait in
    /// the standby queue. Returns the senders with a transaction awaiting
    /// inclusion, for the check-tx pending guard.
    pub fn prepare(
        &self, reorder_seed: u64, min_gas_price: u64,
    ) -> HashMap<Address, usize> {
        let collected = std::mem::take(&mut *self.collected.lock());
        let recovered = self.recover_senders(collected);
        // Gas price policy is admission's business; whatever consensus
        // delivered gets scheduled.
        debug!(
            "preparing under seed {} with min gas price {}",
            reorder_seed, min_gas_price
        );

        let mut ranked: Vec<(u64, usize, TxToRun)> = Vec::new();
        for (idx, tx) in recovered.into_iter().enumerate() {
            let tx = match tx {
                Some(tx) => tx,
                None => continue,
            };
            ranked.push((
                reorder_rank(reorder_seed, &tx.hash()),
                idx,
                TxToRun::from_signed(&tx),
            ));
        }
        ranked.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut scheduled = Vec::with_capacity(ranked.len());
        let mut parked = VecDeque::new();
        let mut seen: HashSet<Address> = HashSet::new();
        // Standby transactions retry ahead of this block's arrivals.
        let standby = std::mem::take(&mut *self.standby.lock());
        for tx in standby
            .into_iter()
            .chain(ranked.into_iter().map(|(_, _, tx)| tx))
        {
            if seen.insert(tx.from) {
                scheduled.push(tx);
            } else {
                parked.push_back(tx);
            }
        }
        if parked.len() > self.standby_cap {
            warn!(
                "standby queue overflow, dropping {} transactions",
                parked.len() - self.standby_cap
            );
            parked.truncate(self.standby_cap);
        }

        let mut touched: HashMap<Address, usize> = HashMap::new();
        for tx in scheduled.iter().chain(parked.iter()) {
            *touched.entry(tx.from).or_insert(0) += 1;
        }

        *self.scheduled.lock() = scheduled;
        *self.standby.lock() = parked;
        touched
    }

    /// Parallel sender recovery over the worker pool, order preserving.
    fn recover_senders(
        &self, collected: Vec<TransactionWithSignature>,
    ) -> Vec<Option<SignedTransaction>> {
        let total = collected.len();
        if total == 0 {
            return Vec::new();
        }
        let mut recovered: Vec<Option<SignedTransaction>> = vec![None; total];
        let lane_size = (total + self.prepare_lane_count - 1)
            / self.prepare_lane_count;
        let pool = self.worker_pool.lock();
        let (sender, receiver) = channel();
        let mut lanes = 0;
        let mut collected = collected;
        let mut base = 0;
        while !collected.is_empty() {
            let rest = collected.split_off(lane_size.min(collected.len()));
            let lane = std::mem::replace(&mut collected, rest);
            let results = sender.clone();
            let chain_id = self.chain_id;
            lanes += 1;
            pool.execute(move || {
                for (offset, tx) in lane.into_iter().enumerate() {
                    let signed = tx
                        .recover_public(chain_id)
                        .ok()
                        .map(|public| SignedTransaction::new(public, tx));
                    let _ = results.send((base + offset, signed));
                }
            });
            base += lane_size;
        }
        drop(sender);
        debug!("recovering {} txs over {} lanes", total, lanes);
        for (idx, signed) in receiver {
            recovered[idx] = signed;
        }
        recovered
    }

    /// Executes the scheduled transactions against the bound context. The
    /// committed order and effects depend only on the block header and the
    /// collected set.
    pub fn execute(&self, block_info: &BlockInfo) {
        let ctx_guard = self.ctx.lock();
        let base_ctx = match ctx_guard.as_ref() {
            Some(ctx) => ctx,
            None => {
                warn!("execute without a bound context");
                return;
            }
        };
        let scheduled = std::mem::take(&mut *self.scheduled.lock());

        let mut committed =
            Vec::with_capacity(scheduled.len().min(self.committed_cap));
        let mut totals = GasInfo::default();
        let block_info = Arc::new(block_info.clone());

        let mut idx = 0;
        while idx < scheduled.len() {
            let wave_end = (idx + self.worker_count).min(scheduled.len());
            let wave = &scheduled[idx..wave_end];
            let mut results = self.run_wave(base_ctx, &block_info, wave);

            let mut flushed: HashSet<Vec<u8>> = HashSet::new();
            for (offset, tx) in wave.iter().enumerate() {
                let (ctx, result) = match results.remove(&offset) {
                    Some(entry) => entry,
                    // A lost worker result; redo the transaction serially.
                    None => self.run_one(base_ctx, &block_info, tx),
                };
                let (reads, writes) = ctx.touched_keys();
                let conflicts = reads
                    .iter()
                    .chain(writes.iter())
                    .any(|key| flushed.contains(key));
                let (ctx, result) = if conflicts {
                    ctx.close(false);
                    self.run_one(base_ctx, &block_info, tx)
                } else {
                    (ctx, result)
                };
                let (_, writes) = ctx.touched_keys();
                flushed.extend(writes);
                ctx.close(true);

                totals.gas_used += result.outcome.gas_used;
                totals.gas_refund += result.gas_refund;
                totals.gas_fee += result.gas_fee;
                committed.push(CommittedTx {
                    hash: tx.hash,
                    from: tx.from,
                    to: tx.to.unwrap_or_default(),
                    outcome: result.outcome,
                });
            }
            idx = wave_end;
        }

        // Settle the senders' fee deductions into the fee pool in one
        // step. The pool holds fee plus owed refunds; the refunds are
        // debited again at the next commit.
        let deducted = totals.gas_fee + totals.gas_refund;
        if !deducted.is_zero() {
            let mut fee_ctx = base_ctx.fork();
            add_system_acc_balance(&mut fee_ctx, &deducted);
            fee_ctx.close(true);
        }

        debug!(
            "executed {} txs, gas used {}",
            committed.len(),
            totals.gas_used
        );
        *self.committed.lock() = committed;
        *self.gas_info.lock() = totals;
    }

    /// Runs one wave concurrently; the per-transaction contexts come back
    /// with their buffered effects for the merge step.
    fn run_wave(
        &self, base_ctx: &Context, block_info: &Arc<BlockInfo>,
        wave: &[TxToRun],
    ) -> BTreeMap<usize, (Context, crate::executive::RunResult)> {
        let mut results = BTreeMap::new();
        if wave.len() == 1 {
            results.insert(0, self.run_one(base_ctx, block_info, &wave[0]));
            return results;
        }
        let pool = self.worker_pool.lock();
        let (sender, receiver) = channel();
        for (offset, tx) in wave.iter().enumerate() {
            let results_tx = sender.clone();
            let mut ctx = base_ctx.fork();
            let runner = self.runner.clone();
            let block_info = block_info.clone();
            let tx = tx.clone();
            pool.execute(move || {
                let result = runner.run(&mut ctx, &block_info, &tx);
                let _ = results_tx.send((offset, (ctx, result)));
            });
        }
        drop(sender);
        for (offset, entry) in receiver {
            results.insert(offset, entry);
        }
        results
    }

    fn run_one(
        &self, base_ctx: &Context, block_info: &BlockInfo, tx: &TxToRun,
    ) -> (Context, crate::executive::RunResult) {
        let mut ctx = base_ctx.fork();
        let result = self.runner.run(&mut ctx, block_info, tx);
        (ctx, result)
    }
}

/// The deterministic per-transaction rank under a block's reorder seed.
fn reorder_rank(seed: u64, tx_hash: &H256) -> u64 {
    let mut buf = [0u8; 40];
    buf[..8].copy_from_slice(&seed.to_le_bytes());
    buf[8..].copy_from_slice(tx_hash.as_bytes());
    u64_from_le_slice(keccak(buf).as_bytes())
}
