// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! The application state machine behind the consensus engine: it wires the
//! layered stores, the transaction engine, the staking subsystem and the
//! epoch watcher together and walks through init-chain, begin-block,
//! check-tx, deliver-tx, end-block and commit.

#[cfg(test)]
mod tests;

use crate::{
    abci::{self, Application},
    channel::Feed,
    config::ChainConfig,
    engine::TxEngine,
    executive::{
        get_system_balance, sub_system_acc_balance, SystemContractMap,
    },
    genesis::GenesisData,
    history::{ChainEvent, HistoryBlock, HistoryDb, HistoryTx, MemHistoryDb},
    parameters::{engine::MAX_TX_GAS_LIMIT, staking::EPOCH_SWITCH_DELAY},
    staking::{
        self,
        types::{Epoch, PendingReward, StakingInfo, Validator},
        watcher::Watcher,
        ReadonlyStakingInfo, StakingContractExecutor, StakingParams,
    },
    state::{Context, ContextMode, StateError},
    storage::{RabbitStore, RootStore, TrunkStore},
};
use ember_key::public_to_address;
use ember_types::{u64_from_le_slice, Address, H256, U256};
use log::{debug, info};
use parking_lot::{Condvar, Mutex, RwLock};
use primitives::{Block, BlockInfo, LogEntry, TransactionWithSignature};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        mpsc::Sender,
        Arc,
    },
    thread,
};

/// Serializes commit-path work: held from the start of `commit` until the
/// asynchronous post-commit execution finishes. The release happens on
/// another thread, which a plain mutex guard cannot express.
struct CommitGate {
    busy: Mutex<bool>,
    cv: Condvar,
}

impl CommitGate {
    fn new() -> CommitGate {
        CommitGate {
            busy: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut busy = self.busy.lock();
        while *busy {
            self.cv.wait(&mut busy);
        }
        *busy = true;
    }

    fn release(&self) {
        *self.busy.lock() = false;
        self.cv.notify_all();
    }

    /// Blocks until the gate is idle without taking it.
    fn wait_idle(&self) {
        let mut busy = self.busy.lock();
        while *busy {
            self.cv.wait(&mut busy);
        }
    }
}

#[derive(Clone, Debug, Default)]
struct LastGas {
    gas_used: u64,
    gas_refund: U256,
    gas_fee: U256,
}

pub struct App {
    // config
    chain_id: U256,
    retain_blocks: i64,
    staking_params: StakingParams,

    // stores
    root: Arc<RootStore>,
    history: Arc<dyn HistoryDb>,

    // refreshed with every block
    trunk: RwLock<Arc<TrunkStore>>,
    check_trunk: RwLock<Arc<TrunkStore>>,
    block: Mutex<Block>,
    block_info: RwLock<Arc<BlockInfo>>,
    curr_height: AtomicI64,
    slash_validators: Mutex<Vec<[u8; 20]>>,
    last_voters: Mutex<Vec<[u8; 20]>>,
    last_proposer: Mutex<[u8; 20]>,
    last_gas: Arc<Mutex<LastGas>>,
    last_min_gas_price: AtomicU64,

    // feeds
    chain_feed: Feed<ChainEvent>,
    logs_feed: Feed<Vec<LogEntry>>,

    // engine
    engine: Arc<TxEngine>,
    reorder_seed: AtomicU64,
    touched_addrs: RwLock<HashMap<Address, usize>>,

    // watcher
    watcher: Watcher,
    epoch_list: Mutex<VecDeque<Epoch>>,

    // staking snapshot for the read-only precompile path
    readonly_staking_info: ReadonlyStakingInfo,
    curr_validators: RwLock<Vec<Validator>>,

    gate: Arc<CommitGate>,

    // single-node test fallback
    test_validator_pubkey: Option<H256>,
}

impl App {
    pub fn new(
        config: &ChainConfig, chain_id: U256,
        test_validator_pubkey: Option<H256>,
    ) -> App {
        let root = Arc::new(RootStore::new());
        let history: Arc<dyn HistoryDb> = Arc::new(MemHistoryDb::new());
        let trunk = Arc::new(TrunkStore::new(root.clone(), true));
        let check_trunk = Arc::new(TrunkStore::new(root.clone(), false));

        let staking_params = config.staking.clone();
        let readonly_staking_info: ReadonlyStakingInfo =
            Arc::new(RwLock::new(StakingInfo::default()));
        let mut contracts = SystemContractMap::new();
        contracts.register(Box::new(StakingContractExecutor::new(
            staking_params.clone(),
            readonly_staking_info.clone(),
        )));
        let contracts = Arc::new(contracts);

        let engine = Arc::new(TxEngine::new(
            config.worker_count,
            config.prepare_lane_count,
            config.standby_queue_cap,
            config.committed_queue_cap,
            chain_id.low_u64(),
            contracts.clone(),
        ));

        let app = App {
            chain_id,
            retain_blocks: config.retain_blocks,
            staking_params,
            root,
            history,
            trunk: RwLock::new(trunk),
            check_trunk: RwLock::new(check_trunk),
            block: Mutex::new(Block::default()),
            block_info: RwLock::new(Arc::new(BlockInfo::default())),
            curr_height: AtomicI64::new(0),
            slash_validators: Mutex::new(Vec::new()),
            last_voters: Mutex::new(Vec::new()),
            last_proposer: Mutex::new([0u8; 20]),
            last_gas: Arc::new(Mutex::new(LastGas::default())),
            last_min_gas_price: AtomicU64::new(0),
            chain_feed: Feed::new(),
            logs_feed: Feed::new(),
            engine,
            reorder_seed: AtomicU64::new(0),
            touched_addrs: RwLock::new(HashMap::new()),
            watcher: Watcher::new(),
            epoch_list: Mutex::new(VecDeque::new()),
            readonly_staking_info,
            curr_validators: RwLock::new(Vec::new()),
            gate: Arc::new(CommitGate::new()),
            test_validator_pubkey,
        };

        // Bring up the system contracts and reload the persisted tail.
        let mut ctx = app.get_run_tx_context();
        contracts.init_all(&mut ctx);
        if let Some(prev_block) = ctx.get_curr_block_basic_info() {
            app.curr_height.store(prev_block.number, Ordering::SeqCst);
            *app.block.lock() = prev_block;
        }
        let (_, staking_info) = staking::load_staking_acc(&mut ctx);
        *app.curr_validators.write() = staking_info
            .active_validators(&app.staking_params.minimum_staking_amount);
        *app.readonly_staking_info.write() = staking_info;
        app.last_min_gas_price.store(
            staking::load_min_gas_price(&mut ctx, true),
            Ordering::SeqCst,
        );
        ctx.close(true);

        app.root
            .set_height(app.curr_height.load(Ordering::SeqCst) + 1);
        app.engine.set_context(app.get_run_tx_context());
        info!(
            "app started at height {}",
            app.curr_height.load(Ordering::SeqCst)
        );
        app
    }

    pub fn get_context(&self, mode: ContextMode) -> Context {
        let height = self.curr_height.load(Ordering::SeqCst);
        match mode {
            ContextMode::CheckTx => Context::new(
                height,
                Some(RabbitStore::new(self.check_trunk.read().clone())),
                None,
                mode,
            ),
            ContextMode::RunTx => Context::new(
                height,
                Some(RabbitStore::new(self.trunk.read().clone())),
                Some(self.history.clone()),
                mode,
            ),
            ContextMode::Rpc => Context::new(
                height,
                Some(RabbitStore::new_readonly(self.root.clone())),
                Some(self.history.clone()),
                mode,
            ),
            ContextMode::HistoryOnly => {
                Context::new(height, None, Some(self.history.clone()), mode)
            }
        }
    }

    pub fn get_check_tx_context(&self) -> Context {
        self.get_context(ContextMode::CheckTx)
    }

    pub fn get_run_tx_context(&self) -> Context {
        self.get_context(ContextMode::RunTx)
    }

    pub fn get_rpc_context(&self) -> Context {
        self.get_context(ContextMode::Rpc)
    }

    pub fn get_history_only_context(&self) -> Context {
        self.get_context(ContextMode::HistoryOnly)
    }

    pub fn chain_id(&self) -> U256 { self.chain_id }

    pub fn latest_block_num(&self) -> i64 {
        self.curr_height.load(Ordering::SeqCst)
    }

    pub fn block_num(&self) -> i64 { self.block.lock().number }

    pub fn history_store(&self) -> Arc<dyn HistoryDb> { self.history.clone() }

    pub fn block_info(&self) -> Arc<BlockInfo> {
        self.block_info.read().clone()
    }

    /// The producer handle feeding epoch nominations into end-block.
    pub fn epoch_sender(&self) -> Sender<Epoch> { self.watcher.epoch_sender() }

    pub fn subscribe_chain_event(
        &self,
    ) -> std::sync::mpsc::Receiver<ChainEvent> {
        self.chain_feed.subscribe()
    }

    pub fn subscribe_logs_event(
        &self,
    ) -> std::sync::mpsc::Receiver<Vec<LogEntry>> {
        self.logs_feed.subscribe()
    }

    /// Blocks until the commit gate is idle, i.e. the previous block's
    /// post-commit execution has finished.
    pub fn wait_lock(&self) { self.gate.wait_idle(); }

    pub fn stop(&self) {
        self.wait_lock();
        self.engine.context_close(false);
        info!("app stopped at height {}", self.latest_block_num());
    }

    fn sync_block_info(&self) -> Arc<BlockInfo> {
        let info = Arc::new(BlockInfo::from_block(
            &self.block.lock(),
            self.chain_id,
        ));
        *self.block_info.write() = info.clone();
        info
    }

    fn create_genesis_accounts(&self, ctx: &mut Context, data: &GenesisData) {
        for (address, account) in &data.alloc {
            ctx.set_account(
                address,
                &primitives::Account::with_balance(account.balance),
            );
            info!("air drop {} to {:?}", account.balance, address);
        }
    }

    /// Seeds the staking registry from the genesis validator set, falling
    /// back to the single test validator for one-node runs.
    fn init_staking_info(
        &self, ctx: &mut Context, genesis_validators: Vec<Validator>,
    ) {
        let (staking_acc, _) = staking::load_staking_acc(ctx);
        let info = if !genesis_validators.is_empty() {
            *self.curr_validators.write() = genesis_validators.clone();
            let pending_rewards = genesis_validators
                .iter()
                .map(|val| PendingReward {
                    address: val.address,
                    epoch_num: 0,
                    amount: U256::zero(),
                })
                .collect();
            StakingInfo {
                curr_epoch_num: 0,
                validators: genesis_validators,
                pending_rewards,
            }
        } else {
            let pubkey = self
                .test_validator_pubkey
                .expect("no genesis validators and no test validator");
            let address =
                Address::from_slice(&abci::consensus_address(&pubkey));
            StakingInfo {
                curr_epoch_num: 0,
                validators: vec![Validator {
                    address,
                    pubkey,
                    ..Default::default()
                }],
                pending_rewards: vec![PendingReward {
                    address,
                    epoch_num: 0,
                    amount: U256::zero(),
                }],
            }
        };
        staking::save_staking_info(ctx, &staking_acc, &info);
        *self.readonly_staking_info.write() = info;
    }

    fn validator_updates(&self) -> Vec<abci::ValidatorUpdate> {
        let validators = self.curr_validators.read();
        if validators.is_empty() {
            return match self.test_validator_pubkey {
                Some(pubkey) => vec![abci::ValidatorUpdate {
                    pubkey,
                    power: 1,
                }],
                None => Vec::new(),
            };
        }
        validators
            .iter()
            .map(|val| abci::ValidatorUpdate {
                pubkey: val.pubkey,
                power: val.voting_power,
            })
            .collect()
    }

    fn check_tx_inner(
        &self, ctx: &mut Context, req: &abci::RequestCheckTx,
    ) -> abci::ResponseCheckTx {
        let answer = |code: u32, info: &str| abci::ResponseCheckTx {
            code,
            info: info.into(),
        };
        let tx: TransactionWithSignature = match rlp::decode(&req.tx) {
            Ok(tx) => tx,
            Err(_) => return answer(abci::CANNOT_DECODE_TX, ""),
        };
        let sender = match tx.recover_public(self.chain_id.low_u64()) {
            Ok(public) => public_to_address(&public),
            Err(err) => {
                return answer(
                    abci::CANNOT_RECOVER_SENDER,
                    &format!("invalid sender: {}", err),
                )
            }
        };
        if req.kind == abci::CheckTxKind::New
            && self.touched_addrs.read().contains_key(&sender)
        {
            return answer(
                abci::HAS_PENDING_TX,
                "still has pending transaction",
            );
        }
        if tx.gas > MAX_TX_GAS_LIMIT {
            return answer(abci::GAS_LIMIT_INVALID, "invalid gas limit");
        }
        let mut account = match ctx.check_nonce(&sender, tx.nonce) {
            Ok(account) => account,
            Err(StateError::NoSuchAccount) => {
                return answer(abci::SENDER_NOT_FOUND, "sender not found")
            }
            Err(err) => {
                return answer(
                    abci::ACCOUNT_NONCE_MISMATCH,
                    &format!("bad nonce: {}", err),
                )
            }
        };
        let min_gas_price =
            U256::from(self.last_min_gas_price.load(Ordering::SeqCst));
        if tx.gas_price < min_gas_price {
            return answer(abci::INVALID_MIN_GAS_PRICE, "gas price too small");
        }
        if ctx
            .deduct_tx_fee(&sender, &mut account, tx.gas, &tx.gas_price)
            .is_err()
        {
            return answer(
                abci::CANNOT_PAY_GAS_FEE,
                "failed to deduct tx fee",
            );
        }
        // Admitting the transaction consumes the nonce in the check
        // overlay, so a second submission with the same nonce is rejected
        // until the overlay resets at commit.
        account.nonce += 1;
        ctx.set_account(&sender, &account);
        answer(abci::CODE_OK, "")
    }

    /// Closes the old trunks, seals the previous block into history,
    /// advances the root height and reopens fresh trunks.
    fn refresh(&self) {
        self.check_trunk.read().close(false);

        let mut ctx = self.get_run_tx_context();
        let prev_block_info = ctx.get_curr_block_basic_info();
        let mut block = self.block.lock().clone();
        ctx.set_curr_block_basic_info(&block);

        let min_gas_price = staking::load_min_gas_price(&mut ctx, false);
        staking::save_min_gas_price(&mut ctx, min_gas_price, true);
        self.last_min_gas_price
            .store(min_gas_price, Ordering::SeqCst);

        let (_, staking_info) = staking::load_staking_acc(&mut ctx);
        *self.readonly_staking_info.write() = staking_info;
        ctx.close(true);
        self.trunk.read().close(true);

        let app_hash = self.root.root_hash();
        block.state_root = app_hash;
        self.block.lock().state_root = app_hash;

        // The block before this one is only now sealed: its post-state is
        // this commit's root and its tx list is what the engine executed.
        if let Some(mut prev_block) = prev_block_info {
            let committed = self.engine.committed_txs();
            prev_block.state_root = app_hash;
            prev_block.gas_used = self.last_gas.lock().gas_used;
            prev_block.transactions =
                committed.iter().map(|tx| tx.hash).collect();
            let txs = committed
                .into_iter()
                .map(|tx| HistoryTx {
                    hash: tx.hash,
                    from: tx.from,
                    to: tx.to,
                    logs: tx.outcome.logs.clone(),
                    content: rlp::encode(&tx).to_vec(),
                })
                .collect();
            let history_block = Arc::new(HistoryBlock {
                height: prev_block.number,
                block_hash: prev_block.hash,
                block: prev_block,
                txs,
            });
            self.history.add_block((*history_block).clone());
            self.publish_new_block(history_block);
        }

        *self.last_proposer.lock() = {
            let mut proposer = [0u8; 20];
            proposer.copy_from_slice(block.miner.as_bytes());
            proposer
        };
        self.last_voters.lock().clear();

        self.root
            .set_height(self.curr_height.load(Ordering::SeqCst) + 1);
        *self.trunk.write() =
            Arc::new(TrunkStore::new(self.root.clone(), true));
        *self.check_trunk.write() =
            Arc::new(TrunkStore::new(self.root.clone(), false));
        self.engine.set_context(self.get_run_tx_context());
    }

    fn publish_new_block(&self, block: Arc<HistoryBlock>) {
        let logs: Vec<LogEntry> = block
            .txs
            .iter()
            .flat_map(|tx| tx.logs.iter().cloned())
            .collect();
        let event = ChainEvent {
            hash: block.block_hash,
            block,
            logs: logs.clone(),
        };
        self.chain_feed.send(&event);
        if !logs.is_empty() {
            self.logs_feed.send(&logs);
        }
    }

    /// Crash-recovery testing hook: from the height given by the
    /// RANDPANICHEIGHT environment variable on, panic after a randomized
    /// delay. Never used on a state-affecting path.
    fn random_panic(&self, base_ms: u64, prime_ms: u64) {
        use rand::Rng;
        let height: i64 = match std::env::var("RANDPANICHEIGHT") {
            Ok(value) => value.parse().expect("RANDPANICHEIGHT is a height"),
            Err(_) => return,
        };
        if self.curr_height.load(Ordering::SeqCst) < height {
            return;
        }
        let sleep_ms =
            base_ms + rand::thread_rng().gen_range(0..prime_ms.max(1));
        thread::Builder::new()
            .name("Random Panic".into())
            .spawn(move || {
                thread::sleep(std::time::Duration::from_millis(sleep_ms));
                panic!("random panic after {} ms", sleep_ms);
            })
            .expect("spawning the panic thread");
    }
}

impl Application for App {
    fn info(&self, _req: abci::RequestInfo) -> abci::ResponseInfo {
        abci::ResponseInfo {
            last_block_height: self.block.lock().number,
            last_block_app_hash: self.root.root_hash().as_bytes().to_vec(),
        }
    }

    fn init_chain(
        &self, req: abci::RequestInitChain,
    ) -> abci::ResponseInitChain {
        debug!("enter init chain, id={}", req.chain_id);
        let mut ctx = self.get_run_tx_context();
        let mut genesis_validators = Vec::new();
        if !req.app_state_bytes.is_empty() {
            let data: GenesisData =
                serde_json::from_slice(&req.app_state_bytes)
                    .expect("genesis app state parses");
            self.create_genesis_accounts(&mut ctx, &data);
            genesis_validators = data.validators;
        }
        self.init_staking_info(&mut ctx, genesis_validators);
        ctx.close(true);

        let validators = self.validator_updates();
        abci::ResponseInitChain { validators }
    }

    fn begin_block(
        &self, req: abci::RequestBeginBlock,
    ) -> abci::ResponseBeginBlock {
        debug!("enter begin block at height {}", req.header.height);
        self.random_panic(5000, 7919);

        let mut transactions_root = H256::zero();
        let len = req.header.data_hash.len().min(32);
        transactions_root.as_bytes_mut()[..len]
            .copy_from_slice(&req.header.data_hash[..len]);

        {
            let mut block = self.block.lock();
            *block = Block {
                number: req.header.height,
                timestamp: req.header.time,
                size: 0,
                parent_hash: req.header.last_block_id_hash,
                transactions_root,
                state_root: req.header.app_hash,
                miner: Address::from_slice(&req.header.proposer_address),
                hash: req.hash,
                gas_used: 0,
                transactions: Vec::new(),
            };
        }
        self.curr_height.store(req.header.height, Ordering::SeqCst);
        let seed = if req.header.data_hash.len() >= 8 {
            u64_from_le_slice(&req.header.data_hash)
        } else {
            0
        };
        self.reorder_seed.store(seed, Ordering::SeqCst);

        {
            let mut proposer = [0u8; 20];
            proposer.copy_from_slice(&req.header.proposer_address);
            *self.last_proposer.lock() = proposer;
        }
        {
            let mut voters = self.last_voters.lock();
            for vote in &req.last_commit_info.votes {
                if vote.signed_last_block {
                    let mut addr = [0u8; 20];
                    addr.copy_from_slice(&vote.validator.address);
                    voters.push(addr);
                }
            }
        }
        {
            // Only double signing gets slashed.
            let mut to_slash = self.slash_validators.lock();
            for evidence in &req.byzantine_validators {
                if evidence.kind == abci::EvidenceKind::DuplicateVote {
                    let mut addr = [0u8; 20];
                    addr.copy_from_slice(&evidence.validator.address);
                    to_slash.push(addr);
                }
            }
        }
        abci::ResponseBeginBlock {}
    }

    fn check_tx(&self, req: abci::RequestCheckTx) -> abci::ResponseCheckTx {
        let mut ctx = self.get_check_tx_context();
        let response = self.check_tx_inner(&mut ctx, &req);
        ctx.close(response.code == abci::CODE_OK);
        response
    }

    fn deliver_tx(
        &self, req: abci::RequestDeliverTx,
    ) -> abci::ResponseDeliverTx {
        debug!("enter deliver tx, len {}", req.tx.len());
        self.block.lock().size += req.tx.len() as i64;
        match rlp::decode::<TransactionWithSignature>(&req.tx) {
            Ok(tx) => self.engine.collect_tx(tx),
            Err(err) => debug!("undecodable tx delivered: {}", err),
        }
        abci::ResponseDeliverTx {
            code: abci::CODE_OK,
        }
    }

    fn end_block(&self, req: abci::RequestEndBlock) -> abci::ResponseEndBlock {
        debug!("enter end block at height {}", req.height);
        if let Some(epoch) = self.watcher.try_recv() {
            info!(
                "new epoch with start height {}",
                epoch.start_height
            );
            self.epoch_list.lock().push_back(epoch);
        }
        let pending_switch = {
            let timestamp = self.block.lock().timestamp;
            let mut epoch_list = self.epoch_list.lock();
            let head_is_due = epoch_list.front().map_or(false, |head| {
                timestamp > head.end_time + EPOCH_SWITCH_DELAY
            });
            if head_is_due {
                epoch_list.pop_front()
            } else {
                None
            }
        };
        if let Some(epoch) = pending_switch {
            // The switch writes through the run trunk; let the previous
            // block's post-commit execution finish with it first.
            self.wait_lock();
            let mut ctx = self.get_run_tx_context();
            *self.curr_validators.write() =
                staking::switch_epoch(&mut ctx, &epoch, &self.staking_params);
            ctx.close(true);
        }
        abci::ResponseEndBlock {
            validator_updates: self.validator_updates(),
        }
    }

    fn commit(&self) -> abci::ResponseCommit {
        debug!("enter commit, txs {}", self.engine.collected_count());
        self.gate.acquire();

        let mut ctx = self.get_run_tx_context();
        let (_, staking_info) = staking::load_staking_acc(&mut ctx);
        let mut pubkey_by_cons_addr: HashMap<[u8; 20], H256> = HashMap::new();
        for val in &staking_info.validators {
            pubkey_by_cons_addr
                .insert(abci::consensus_address(&val.pubkey), val.pubkey);
        }

        // Slash this block's double signers first.
        for cons_addr in std::mem::take(&mut *self.slash_validators.lock()) {
            if let Some(pubkey) = pubkey_by_cons_addr.get(&cons_addr) {
                let burnt = staking::slash(
                    &mut ctx,
                    pubkey,
                    &self.staking_params.slashed_staking_amount,
                );
                info!("slashed {} from validator {:?}", burnt, pubkey);
            }
        }

        // Then distribute the previous block's fee.
        let last_gas = self.last_gas.lock().clone();
        let mut block_reward = last_gas.gas_fee;
        if !last_gas.gas_fee.is_zero() && !last_gas.gas_refund.is_zero() {
            sub_system_acc_balance(&mut ctx, &last_gas.gas_refund)
                .expect("fee pool covers the refunds it owes");
        }
        let system_balance = get_system_balance(&mut ctx);
        if system_balance < last_gas.gas_fee {
            panic!("system balance not enough!");
        }
        if self.engine.standby_len() == 0 {
            // Nothing awaits execution, sweep the whole fee pool.
            block_reward = system_balance;
        }
        if !block_reward.is_zero() {
            sub_system_acc_balance(&mut ctx, &block_reward)
                .expect("fee pool covers the block reward");
        }
        let height = self.curr_height.load(Ordering::SeqCst);
        if height != 1 {
            let proposer = pubkey_by_cons_addr
                .get(&*self.last_proposer.lock())
                .copied()
                .unwrap_or_default();
            let voters: Vec<H256> = self
                .last_voters
                .lock()
                .iter()
                .map(|addr| {
                    pubkey_by_cons_addr
                        .get(addr)
                        .copied()
                        .unwrap_or_default()
                })
                .collect();
            staking::distribute_fee(
                &mut ctx,
                block_reward,
                &self.staking_params,
                &proposer,
                &voters,
            );
        }
        ctx.close(true);

        let seed = self.reorder_seed.load(Ordering::SeqCst);
        let min_gas_price = self.last_min_gas_price.load(Ordering::SeqCst);
        *self.touched_addrs.write() =
            self.engine.prepare(seed, min_gas_price);

        self.refresh();
        let block_info = self.sync_block_info();

        // Execute this block's transactions off the consensus thread; the
        // gate stays held until they are done.
        let engine = self.engine.clone();
        let last_gas = self.last_gas.clone();
        let gate = self.gate.clone();
        thread::Builder::new()
            .name("Post Commit".into())
            .spawn(move || {
                engine.execute(&block_info);
                let (gas_used, gas_refund, gas_fee) = engine.gas_used_info();
                *last_gas.lock() = LastGas {
                    gas_used,
                    gas_refund,
                    gas_fee,
                };
                gate.release();
            })
            .expect("spawning the post-commit thread");

        let state_root = self.block.lock().state_root;
        let mut response = abci::ResponseCommit {
            data: state_root.as_bytes().to_vec(),
            retain_height: 0,
        };
        // Prune consensus history every hundred blocks.
        if self.retain_blocks > 0
            && height >= self.retain_blocks
            && height % 100 == 0
        {
            response.retain_height = height - self.retain_blocks + 1;
        }
        response
    }
}
