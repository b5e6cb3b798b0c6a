// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use ember_types::{Address, H256, U256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Upper bound on the introduction string carried by a validator.
pub const MAX_INTRODUCTION_LEN: usize = 32;

/// One registered validator. `address` is derived from the consensus
/// public key's operator, `pubkey` is the 32-byte consensus key itself.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub pubkey: H256,
    pub reward_to: Address,
    pub introduction: String,
    pub staked_coins: U256,
    pub voting_power: i64,
    pub is_retiring: bool,
}

impl Encodable for Validator {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(7);
        s.append(&self.address);
        s.append(&self.pubkey);
        s.append(&self.reward_to);
        s.append(&self.introduction);
        s.append(&self.staked_coins);
        s.append(&(self.voting_power as u64));
        s.append(&self.is_retiring);
    }
}

impl Decodable for Validator {
    fn decode(d: &Rlp) -> Result<Self, DecoderError> {
        if d.item_count()? != 7 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Validator {
            address: d.val_at(0)?,
            pubkey: d.val_at(1)?,
            reward_to: d.val_at(2)?,
            introduction: d.val_at(3)?,
            staked_coins: d.val_at(4)?,
            voting_power: d.val_at::<u64>(5)? as i64,
            is_retiring: d.val_at(6)?,
        })
    }
}

/// A reward earned in some epoch, waiting to mature. Multiple entries per
/// address are allowed, one per epoch.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PendingReward {
    pub address: Address,
    pub epoch_num: i64,
    pub amount: U256,
}

impl Encodable for PendingReward {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.address);
        s.append(&(self.epoch_num as u64));
        s.append(&self.amount);
    }
}

impl Decodable for PendingReward {
    fn decode(d: &Rlp) -> Result<Self, DecoderError> {
        Ok(PendingReward {
            address: d.val_at(0)?,
            epoch_num: d.val_at::<u64>(1)? as i64,
            amount: d.val_at(2)?,
        })
    }
}

/// The staking registry, persisted as one blob in slot 0 of the staking
/// contract's storage.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StakingInfo {
    pub curr_epoch_num: i64,
    pub validators: Vec<Validator>,
    pub pending_rewards: Vec<PendingReward>,
}

impl Encodable for StakingInfo {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&(self.curr_epoch_num as u64));
        s.append_list(&self.validators);
        s.append_list(&self.pending_rewards);
    }
}

impl Decodable for StakingInfo {
    fn decode(d: &Rlp) -> Result<Self, DecoderError> {
        Ok(StakingInfo {
            curr_epoch_num: d.val_at::<u64>(0)? as i64,
            validators: d.list_at(1)?,
            pending_rewards: d.list_at(2)?,
        })
    }
}

impl StakingInfo {
    pub fn get_validator_by_addr(
        &mut self, address: &Address,
    ) -> Option<&mut Validator> {
        self.validators.iter_mut().find(|val| val.address == *address)
    }

    pub fn get_validator_by_pubkey(
        &mut self, pubkey: &H256,
    ) -> Option<&mut Validator> {
        self.validators.iter_mut().find(|val| val.pubkey == *pubkey)
    }

    pub fn val_map_by_pubkey(&self) -> HashMap<H256, &Validator> {
        self.validators.iter().map(|val| (val.pubkey, val)).collect()
    }

    pub fn val_map_by_addr(&self) -> HashMap<Address, &Validator> {
        self.validators
            .iter()
            .map(|val| (val.address, val))
            .collect()
    }

    /// Validators that currently count: enough stake, not retiring and
    /// holding voting power from the latest epoch.
    pub fn active_validators(&self, min_stake: &U256) -> Vec<Validator> {
        self.validators
            .iter()
            .filter(|val| {
                val.voting_power > 0
                    && !val.is_retiring
                    && val.staked_coins >= *min_stake
            })
            .cloned()
            .collect()
    }

    /// Appends a new validator; addresses and consensus keys must be fresh.
    pub fn add_validator(
        &mut self, address: Address, pubkey: H256, introduction: String,
        staked_coins: U256, reward_to: Address,
    ) -> Result<(), super::StakingError> {
        if self.validators.iter().any(|val| val.address == address) {
            return Err(super::StakingError::ValidatorAddressAlreadyExists);
        }
        if self.validators.iter().any(|val| val.pubkey == pubkey) {
            return Err(super::StakingError::ValidatorPubkeyAlreadyExists);
        }
        self.validators.push(Validator {
            address,
            pubkey,
            reward_to,
            introduction,
            staked_coins,
            voting_power: 0,
            is_retiring: false,
        });
        Ok(())
    }

    /// Validators with neither voting power nor outstanding rewards; they
    /// are removed (and refunded) at epoch switch.
    pub fn useless_validators(&self) -> HashSet<Address> {
        let mut useless: HashSet<Address> = self
            .validators
            .iter()
            .filter(|val| val.voting_power == 0)
            .map(|val| val.address)
            .collect();
        for reward in &self.pending_rewards {
            useless.remove(&reward.address);
        }
        useless
    }

    /// Removes all pending rewards of `address`, returning their sum.
    pub fn clear_rewards_of(&mut self, address: &Address) -> U256 {
        let mut cleared = U256::zero();
        self.pending_rewards.retain(|reward| {
            if reward.address == *address {
                cleared += reward.amount;
                false
            } else {
                true
            }
        });
        cleared
    }

    /// Adds `amount` to the address's reward entry of the current epoch,
    /// allocating the entry if it does not exist yet.
    pub fn credit_reward(&mut self, address: Address, amount: U256) {
        let epoch_num = self.curr_epoch_num;
        if let Some(entry) = self
            .pending_rewards
            .iter_mut()
            .find(|r| r.address == address && r.epoch_num == epoch_num)
        {
            entry.amount += amount;
            return;
        }
        self.pending_rewards.push(PendingReward {
            address,
            epoch_num,
            amount,
        });
    }
}

/// An (pubkey, count) pair produced by the external watcher: "this key
/// should have this much voting power in the next epoch".
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Nomination {
    pub pubkey: H256,
    pub nominated_count: i64,
}

/// A finalized epoch observed on the external chain. Consumed at most once.
#[derive(Clone, Debug, Default)]
pub struct Epoch {
    pub start_height: i64,
    pub end_time: i64,
    pub nominations: BTreeMap<H256, Nomination>,
}
