// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! The staking subsystem: the system-contract executor reachable from
//! transactions, and the out-of-band operations (slashing, fee
//! distribution, epoch switching) invoked from the block lifecycle.

pub mod types;
pub mod watcher;

use crate::{
    executive::{
        transfer_to_black_hole, ExecutionOutcome, SystemContract, TxToRun,
    },
    parameters::{
        staking::*, STAKING_CONTRACT_ADDRESS, STAKING_CONTRACT_SEQUENCE,
    },
    state::Context,
};
use ember_types::{u64_from_be_slice, Address, BigEndianHash, H256, U256};
use log::warn;
use parking_lot::RwLock;
use primitives::{Account, BlockInfo};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use self::types::{Epoch, PendingReward, StakingInfo, Validator};

/*------selectors------*/
// interface Staking {
//     function createValidator(address rewardTo, bytes32 introduction, bytes32 pubkey) external;
//     function editValidator(address rewardTo, bytes32 introduction) external;
//     function retire() external;
//     function increaseMinGasPrice() external;
//     function decreaseMinGasPrice() external;
//     function sumVotingPower(address[] calldata addrList) external returns (uint summedPower, uint totalPower);
// }
pub const SELECTOR_CREATE_VALIDATOR: [u8; 4] = [0x24, 0xd1, 0xed, 0x5d];
pub const SELECTOR_EDIT_VALIDATOR: [u8; 4] = [0x9d, 0xc1, 0x59, 0xb6];
pub const SELECTOR_RETIRE: [u8; 4] = [0xa4, 0x87, 0x4d, 0x77];
pub const SELECTOR_INCREASE_MIN_GAS_PRICE: [u8; 4] = [0xf2, 0x01, 0x6e, 0x8e];
pub const SELECTOR_DECREASE_MIN_GAS_PRICE: [u8; 4] = [0x69, 0x6e, 0x6a, 0xd2];
pub const SELECTOR_SUM_VOTING_POWER: [u8; 4] = [0x9c, 0xe0, 0x69, 0x09];

/*------storage slots------*/
pub const SLOT_STAKING_INFO: [u8; 32] = slot(0);
pub const SLOT_ALL_BURNT: [u8; 32] = slot(1);
pub const SLOT_MIN_GAS_PRICE: [u8; 32] = slot(2);
pub const SLOT_LAST_MIN_GAS_PRICE: [u8; 32] = slot(3);

const fn slot(tag: u8) -> [u8; 32] {
    let mut slot = [0u8; 32];
    slot[31] = tag;
    slot
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum StakingError {
    #[error("invalid call data")]
    InvalidCallData,
    #[error("balance is not enough")]
    BalanceNotEnough,
    #[error("no such validator")]
    NoSuchValidator,
    #[error("minGasPrice bigger than max")]
    MinGasPriceTooBig,
    #[error("minGasPrice smaller than min")]
    MinGasPriceTooSmall,
    #[error("the amount of variation in minGasPrice exceeds the allowable range")]
    MinGasPriceExceedBlockChangeDelta,
    #[error("minGasPrice operator not validator or its rewardTo")]
    OperatorNotValidator,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("create validator staking amount not bigger than initial amount")]
    CreateValidatorCoinLtInitAmount,
    #[error("validator address already exists")]
    ValidatorAddressAlreadyExists,
    #[error("validator pubkey already exists")]
    ValidatorPubkeyAlreadyExists,
}

/// Staking thresholds, adjustable per deployment (and by tests).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StakingParams {
    pub initial_staking_amount: U256,
    pub minimum_staking_amount: U256,
    pub slashed_staking_amount: U256,
}

impl Default for StakingParams {
    fn default() -> StakingParams {
        StakingParams {
            initial_staking_amount: *INITIAL_STAKING_AMOUNT,
            minimum_staking_amount: *MINIMUM_STAKING_AMOUNT,
            slashed_staking_amount: *SLASHED_STAKING_AMOUNT,
        }
    }
}

/// The snapshot served to the read-only `sumVotingPower` path. Written
/// under the commit gate, read without touching world state.
pub type ReadonlyStakingInfo = Arc<RwLock<StakingInfo>>;

/// The executor behind the staking contract address. Staking operations
/// reachable through transactions live here; the extra gas of these calls
/// is kept for the validators, not refunded.
pub struct StakingContractExecutor {
    params: StakingParams,
    readonly_info: ReadonlyStakingInfo,
}

impl StakingContractExecutor {
    pub fn new(
        params: StakingParams, readonly_info: ReadonlyStakingInfo,
    ) -> StakingContractExecutor {
        StakingContractExecutor {
            params,
            readonly_info,
        }
    }
}

fn failed(err: StakingError) -> ExecutionOutcome {
    ExecutionOutcome::failure(&err.to_string(), GAS_OF_STAKING_EXTERNAL_OP)
}

impl SystemContract for StakingContractExecutor {
    fn address(&self) -> &Address { &STAKING_CONTRACT_ADDRESS }

    fn init(&self, ctx: &mut Context) {
        if ctx.get_account(&STAKING_CONTRACT_ADDRESS).is_none() {
            let mut account = Account::new_empty();
            account.sequence = STAKING_CONTRACT_SEQUENCE;
            ctx.set_account(&STAKING_CONTRACT_ADDRESS, &account);
        }
    }

    fn execute(
        &self, ctx: &mut Context, _block: &BlockInfo, tx: &TxToRun,
    ) -> ExecutionOutcome {
        if tx.data.len() < 4 {
            return failed(StakingError::InvalidCallData);
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&tx.data[..4]);
        match selector {
            SELECTOR_CREATE_VALIDATOR => {
                external_op(ctx, tx, &self.params, true, false)
            }
            SELECTOR_EDIT_VALIDATOR => {
                external_op(ctx, tx, &self.params, false, false)
            }
            SELECTOR_RETIRE => external_op(ctx, tx, &self.params, false, true),
            SELECTOR_INCREASE_MIN_GAS_PRICE => {
                handle_min_gas_price(ctx, &tx.from, &self.params, true)
            }
            SELECTOR_DECREASE_MIN_GAS_PRICE => {
                handle_min_gas_price(ctx, &tx.from, &self.params, false)
            }
            _ => failed(StakingError::InvalidCallData),
        }
    }

    fn required_gas(&self, input: &[u8]) -> u64 {
        input.len() as u64 * SUM_VOTING_POWER_GAS_PER_BYTE
            + SUM_VOTING_POWER_BASE_GAS
    }

    // function sumVotingPower(address[] calldata addrList)
    //     external returns (uint summedPower, uint totalPower)
    fn run(&self, input: &[u8]) -> Result<Vec<u8>, String> {
        if input.len() < 4 + 32 * 2
            || input[..4] != SELECTOR_SUM_VOTING_POWER
        {
            return Err(StakingError::InvalidArgument.to_string());
        }
        // Skip selector, array offset and array length; one address per
        // 32-byte word follows.
        let words = &input[4 + 32 * 2..];
        let mut listed: Vec<Address> = Vec::with_capacity(words.len() / 32);
        let mut i = 0;
        while i + 32 <= words.len() {
            listed.push(Address::from_slice(&words[i + 12..i + 32]));
            i += 32;
        }

        let info = self.readonly_info.read();
        let mut summed_power = 0i64;
        let mut total_power = 0i64;
        let mut counted: Vec<Address> = Vec::new();
        for val in &info.validators {
            if (listed.contains(&val.address)
                || listed.contains(&val.reward_to))
                && !counted.contains(&val.address)
            {
                summed_power += val.voting_power;
                counted.push(val.address);
            }
            total_power += val.voting_power;
        }

        let mut out = [0u8; 64];
        H256::from_uint(&U256::from(summed_power as u64))
            .to_fixed_bytes()
            .iter()
            .enumerate()
            .for_each(|(i, b)| out[i] = *b);
        H256::from_uint(&U256::from(total_power as u64))
            .to_fixed_bytes()
            .iter()
            .enumerate()
            .for_each(|(i, b)| out[32 + i] = *b);
        Ok(out.to_vec())
    }
}

/// Cuts trailing zero padding off a fixed-width abi string argument.
fn string_from_bytes(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map(|pos| pos + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// The shared body of createValidator, editValidator and retire.
fn external_op(
    ctx: &mut Context, tx: &TxToRun, params: &StakingParams, create: bool,
    retire: bool,
) -> ExecutionOutcome {
    let mut pubkey = H256::zero();
    let mut introduction = String::new();
    let mut reward_to = Address::zero();
    if !retire {
        // retire has no arguments
        let call_data = &tx.data[4..];
        let need = if create { 96 } else { 64 };
        if call_data.len() < need {
            return failed(StakingError::InvalidCallData);
        }
        reward_to = Address::from_slice(&call_data[12..32]);
        introduction = string_from_bytes(&call_data[32..64]);
        if create {
            pubkey = H256::from_slice(&call_data[64..96]);
        }
    }

    let mut sender = match ctx.get_account(&tx.from) {
        Some(account) => account,
        None => return failed(StakingError::BalanceNotEnough),
    };
    let coins4staking = tx.value;
    if sender.balance < coins4staking {
        return failed(StakingError::BalanceNotEnough);
    }

    let (mut staking_acc, mut info) = load_staking_acc(ctx);

    if create {
        if coins4staking <= params.initial_staking_amount {
            return failed(StakingError::CreateValidatorCoinLtInitAmount);
        }
        if let Err(err) = info.add_validator(
            tx.from,
            pubkey,
            introduction,
            coins4staking,
            reward_to,
        ) {
            return failed(err);
        }
    } else {
        // editValidator or retire
        let val = match info.get_validator_by_addr(&tx.from) {
            Some(val) => val,
            None => return failed(StakingError::NoSuchValidator),
        };
        if !reward_to.is_zero() {
            val.reward_to = reward_to;
        }
        if !introduction.is_empty() {
            val.introduction = introduction;
        }
        if !coins4staking.is_zero() {
            val.staked_coins += coins4staking;
        }
        if retire {
            val.is_retiring = true;
        }
    }

    save_staking_info(ctx, &staking_acc, &info);

    if !coins4staking.is_zero() {
        sender.balance -= coins4staking;
        staking_acc.balance += coins4staking;
        ctx.set_account(&tx.from, &sender);
        ctx.set_account(&STAKING_CONTRACT_ADDRESS, &staking_acc);
    }

    ExecutionOutcome::success(GAS_OF_STAKING_EXTERNAL_OP)
}

fn handle_min_gas_price(
    ctx: &mut Context, sender: &Address, params: &StakingParams,
    is_increase: bool,
) -> ExecutionOutcome {
    let mut mgp = load_min_gas_price(ctx, false);
    let last_mgp = load_min_gas_price(ctx, true);
    let (_, info) = load_staking_acc(ctx);
    let is_operator = info
        .active_validators(&params.minimum_staking_amount)
        .iter()
        .any(|val| val.address == *sender || val.reward_to == *sender);
    if !is_operator {
        return failed(StakingError::OperatorNotValidator);
    }

    if is_increase {
        mgp += MIN_GAS_PRICE_DELTA_RATE * mgp / 100;
    } else {
        mgp -= MIN_GAS_PRICE_DELTA_RATE * mgp / 100;
    }
    if mgp < MIN_MIN_GAS_PRICE {
        return failed(StakingError::MinGasPriceTooSmall);
    }
    if mgp > MAX_MIN_GAS_PRICE {
        return failed(StakingError::MinGasPriceTooBig);
    }
    let exceeds_delta = if mgp > last_mgp {
        100 * (mgp - last_mgp) > MAX_MIN_GAS_PRICE_DELTA_RATE * last_mgp
    } else {
        100 * (last_mgp - mgp) > MAX_MIN_GAS_PRICE_DELTA_RATE * last_mgp
    };
    if exceeds_delta {
        return failed(StakingError::MinGasPriceExceedBlockChangeDelta);
    }
    save_min_gas_price(ctx, mgp, false);
    ExecutionOutcome::success(GAS_OF_STAKING_EXTERNAL_OP)
}

/// Loads the staking account and its registry blob. A missing staking
/// account is a broken genesis and unrecoverable.
pub fn load_staking_acc(ctx: &mut Context) -> (Account, StakingInfo) {
    let account = ctx
        .get_account(&STAKING_CONTRACT_ADDRESS)
        .expect("cannot find staking contract");
    let info = match ctx.get_storage(account.sequence, &SLOT_STAKING_INFO) {
        Some(raw) => {
            rlp::decode(&raw).expect("staking info blob decodes; qed")
        }
        None => StakingInfo::default(),
    };
    (account, info)
}

pub fn save_staking_info(
    ctx: &mut Context, staking_acc: &Account, info: &StakingInfo,
) {
    ctx.set_storage(
        staking_acc.sequence,
        &SLOT_STAKING_INFO,
        &rlp::encode(info),
    );
}

pub fn load_min_gas_price(ctx: &mut Context, is_last: bool) -> u64 {
    let account = staking_account(ctx);
    let slot = if is_last {
        &SLOT_LAST_MIN_GAS_PRICE
    } else {
        &SLOT_MIN_GAS_PRICE
    };
    match ctx.get_storage(account.sequence, slot) {
        Some(raw) => u64_from_be_slice(&raw),
        None => DEFAULT_MIN_GAS_PRICE,
    }
}

pub fn save_min_gas_price(ctx: &mut Context, min_gp: u64, is_last: bool) {
    let account = staking_account(ctx);
    let slot = if is_last {
        &SLOT_LAST_MIN_GAS_PRICE
    } else {
        &SLOT_MIN_GAS_PRICE
    };
    ctx.set_storage(account.sequence, slot, &min_gp.to_be_bytes());
}

fn staking_account(ctx: &mut Context) -> Account {
    ctx.get_account(&STAKING_CONTRACT_ADDRESS)
        .expect("cannot find staking contract")
}

/// The total of coins burnt through slashing so far.
pub fn load_all_burnt(ctx: &mut Context) -> U256 {
    let account = staking_account(ctx);
    match ctx.get_storage(account.sequence, &SLOT_ALL_BURNT) {
        Some(raw) => U256::from_big_endian(&raw),
        None => U256::zero(),
    }
}

fn incr_all_burnt(ctx: &mut Context, staking_acc: &Account, amount: &U256) {
    let burnt = match ctx.get_storage(staking_acc.sequence, &SLOT_ALL_BURNT) {
        Some(raw) => U256::from_big_endian(&raw),
        None => U256::zero(),
    } + *amount;
    ctx.set_storage(
        staking_acc.sequence,
        &SLOT_ALL_BURNT,
        H256::from_uint(&burnt).as_bytes(),
    );
}

// ========================================================================
// Staking operations which cannot be invoked through transactions.

/// Slashes up to `amount` of staked coins from the validator with `pubkey`
/// and clears all of its accumulated rewards; everything slashed is burnt.
/// Returns the total burnt.
pub fn slash(ctx: &mut Context, pubkey: &H256, amount: &U256) -> U256 {
    let (staking_acc, mut info) = load_staking_acc(ctx);
    let (address, slashed) = match info.get_validator_by_pubkey(pubkey) {
        Some(val) => {
            let slashed = val.staked_coins.min(*amount);
            val.staked_coins -= slashed;
            (val.address, slashed)
        }
        // With a sane consensus engine evidence always names a known key.
        None => return U256::zero(),
    };
    let mut total_slashed = slashed;
    total_slashed += info.clear_rewards_of(&address);

    save_staking_info(ctx, &staking_acc, &info);

    if let Err(err) =
        transfer_to_black_hole(ctx, &STAKING_CONTRACT_ADDRESS, &total_slashed)
    {
        warn!("slashed coins exceed staking balance: {}", err);
    }
    incr_all_burnt(ctx, &staking_acc, &total_slashed);
    total_slashed
}

/// Distributes the previous block's collected gas fee to its proposer and
/// voters, as pending rewards of the current epoch.
pub fn distribute_fee(
    ctx: &mut Context, collected_fee: U256, params: &StakingParams,
    proposer: &H256, voters: &[H256],
) {
    let (mut staking_acc, mut info) = load_staking_acc(ctx);
    staking_acc.balance += collected_fee;
    ctx.set_account(&STAKING_CONTRACT_ADDRESS, &staking_acc);

    let total_voting_power: i64 = info
        .active_validators(&params.minimum_staking_amount)
        .iter()
        .map(|val| val.voting_power)
        .sum();
    let by_pubkey: HashMap<H256, (Address, i64)> = info
        .validators
        .iter()
        .map(|val| (val.pubkey, (val.address, val.voting_power)))
        .collect();
    let voter_power = |pubkey: &H256| -> i64 {
        by_pubkey.get(pubkey).map(|(_, power)| *power).unwrap_or(0)
    };
    let voted_power: i64 = voters.iter().map(|v| voter_power(v)).sum();

    // proposerBaseFee and proposerExtraFee both go to the proposer.
    let proposer_base_fee =
        collected_fee * U256::from(BASE_PROPOSER_PERCENTAGE) / U256::from(100);
    let mut rest = collected_fee - proposer_base_fee;
    let proposer_extra_fee = mul_div(
        rest * U256::from(EXTRA_PROPOSER_PERCENTAGE),
        U256::from(voted_power as u64),
        U256::from(100) * U256::from(total_voting_power as u64),
    );
    rest -= proposer_extra_fee;

    let mut remained_fee = rest;
    for voter in voters {
        if voter == proposer {
            continue;
        }
        let (address, power) = match by_pubkey.get(voter) {
            Some(entry) => *entry,
            None => continue,
        };
        let reward = mul_div(
            rest,
            U256::from(power as u64),
            U256::from(voted_power as u64),
        );
        remained_fee -= reward;
        info.credit_reward(address, reward);
    }

    // Rounding residue sticks to the proposer.
    match by_pubkey.get(proposer).map(|(address, _)| *address) {
        Some(address) => {
            info.credit_reward(
                address,
                proposer_base_fee + proposer_extra_fee + remained_fee,
            );
        }
        None => warn!("fee distribution: proposer is not a validator"),
    }

    save_staking_info(ctx, &staking_acc, &info);
}

/// `a * b / c`, where a zero denominator means a zero share.
fn mul_div(a: U256, b: U256, c: U256) -> U256 {
    if c.is_zero() {
        return U256::zero();
    }
    a * b / c
}

/// Switches to a new epoch: pays out mature rewards, reassigns voting
/// power from the epoch's nominations, drops useless validators and opens
/// fresh reward slots. Returns the active validator set.
pub fn switch_epoch(
    ctx: &mut Context, epoch: &Epoch, params: &StakingParams,
) -> Vec<Validator> {
    let mut pubkey2power: BTreeMap<H256, i64> = BTreeMap::new();
    for nomination in epoch.nominations.values() {
        pubkey2power.insert(nomination.pubkey, nomination.nominated_count);
    }

    // Mature pending rewards reach their rewardTo now.
    let (mut staking_acc, mut info) = end_epoch(ctx);
    // Whoever called createValidator before the switch enjoys the voting
    // power update; whoever called retire() before it misses it.
    update_voting_power(&mut info, &pubkey2power, params);
    // Pay back staked coins of useless validators and drop them.
    clear_up(ctx, &mut staking_acc, &mut info);
    // Open a fresh zero reward slot per active validator.
    let active = info.active_validators(&params.minimum_staking_amount);
    for val in &active {
        info.pending_rewards.push(PendingReward {
            address: val.address,
            epoch_num: info.curr_epoch_num,
            amount: U256::zero(),
        });
    }
    save_staking_info(ctx, &staking_acc, &info);
    active
}

/// Enters the next epoch and delivers every pending reward that matured,
/// crediting the owning validator's rewardTo.
fn end_epoch(ctx: &mut Context) -> (Account, StakingInfo) {
    let (mut staking_acc, mut info) = load_staking_acc(ctx);
    info.curr_epoch_num += 1;

    let mature_before =
        info.curr_epoch_num - EPOCH_COUNT_BEFORE_REWARD_MATURE;
    let reward_to_by_addr: HashMap<Address, Address> = info
        .validators
        .iter()
        .map(|val| (val.address, val.reward_to))
        .collect();
    let mut reward_map: BTreeMap<Address, U256> = BTreeMap::new();
    let mut retained = Vec::with_capacity(info.pending_rewards.len());
    for reward in std::mem::take(&mut info.pending_rewards) {
        if reward.epoch_num > mature_before {
            retained.push(reward); // not mature yet
            continue;
        }
        let reward_to = reward_to_by_addr
            .get(&reward.address)
            .copied()
            .unwrap_or(reward.address);
        *reward_map.entry(reward_to).or_default() += reward.amount;
    }
    info.pending_rewards = retained;

    for (address, amount) in reward_map {
        let mut account =
            ctx.get_account(&address).unwrap_or_else(Account::new_empty);
        staking_acc.balance -= amount;
        account.balance += amount;
        ctx.set_account(&address, &account);
    }
    ctx.set_account(&STAKING_CONTRACT_ADDRESS, &staking_acc);
    (staking_acc, info)
}

/// Clears the old voting powers and assigns the nominated counts to
/// validators that qualify.
fn update_voting_power(
    info: &mut StakingInfo, pubkey2power: &BTreeMap<H256, i64>,
    params: &StakingParams,
) {
    for val in &mut info.validators {
        val.voting_power = 0;
    }
    for (pubkey, power) in pubkey2power {
        if let Some(val) = info.get_validator_by_pubkey(pubkey) {
            if !val.is_retiring
                && val.staked_coins >= params.minimum_staking_amount
            {
                val.voting_power = *power;
            }
        }
    }
}

/// Removes the useless validators and returns their staked coins to their
/// rewardTo.
fn clear_up(
    ctx: &mut Context, staking_acc: &mut Account, info: &mut StakingInfo,
) {
    let useless = info.useless_validators();
    for val in &info.validators {
        if !useless.contains(&val.address) {
            continue;
        }
        let mut refund_acc = ctx
            .get_account(&val.reward_to)
            .unwrap_or_else(Account::new_empty);
        staking_acc.balance -= val.staked_coins;
        refund_acc.balance += val.staked_coins;
        ctx.set_account(&val.reward_to, &refund_acc);
    }
    info.validators.retain(|val| !useless.contains(&val.address));
    ctx.set_account(&STAKING_CONTRACT_ADDRESS, staking_acc);
}
