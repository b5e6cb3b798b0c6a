// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use ember_types::Address;
use lazy_static::lazy_static;

pub mod engine {
    /// Intrinsic gas of a plain value transfer.
    pub const TX_GAS: u64 = 21_000;
    /// Upper bound on the per-transaction gas limit accepted at admission.
    pub const MAX_TX_GAS_LIMIT: u64 = 10_000_000;

    pub const DEFAULT_WORKER_COUNT: usize = 32;
    pub const DEFAULT_PREPARE_LANE_COUNT: usize = 10;
    pub const DEFAULT_STANDBY_QUEUE_CAP: usize = 100;
    pub const DEFAULT_COMMITTED_QUEUE_CAP: usize = 100;
}

pub mod staking {
    use ember_types::U256;
    use lazy_static::lazy_static;

    pub const ONE_COIN: u64 = 1_000_000_000_000_000_000;

    lazy_static! {
        /// A createValidator call must stake strictly more than this.
        pub static ref INITIAL_STAKING_AMOUNT: U256 =
            U256::from(1000u64) * U256::from(ONE_COIN);
        /// Validators below this stake get no voting power at epoch switch.
        pub static ref MINIMUM_STAKING_AMOUNT: U256 =
            U256::from(800u64) * U256::from(ONE_COIN);
        /// Stake burnt per duplicate-vote slash.
        pub static ref SLASHED_STAKING_AMOUNT: U256 =
            U256::from(10u64) * U256::from(ONE_COIN);
    }

    /// Flat gas of createValidator / editValidator / retire and the
    /// min-gas-price operations.
    pub const GAS_OF_STAKING_EXTERNAL_OP: u64 = 400_000;

    /// Pending rewards mature once they are this many epochs old.
    pub const EPOCH_COUNT_BEFORE_REWARD_MATURE: i64 = 1;

    pub const BASE_PROPOSER_PERCENTAGE: u64 = 15;
    pub const EXTRA_PROPOSER_PERCENTAGE: u64 = 15;

    pub const DEFAULT_MIN_GAS_PRICE: u64 = 0;
    /// Percentage step of one increase/decreaseMinGasPrice call.
    pub const MIN_GAS_PRICE_DELTA_RATE: u64 = 5;
    /// Per-block cap on `100 * |MGP - lastMGP| / lastMGP`.
    pub const MAX_MIN_GAS_PRICE_DELTA_RATE: u64 = 16;
    pub const MAX_MIN_GAS_PRICE: u64 = 500;
    pub const MIN_MIN_GAS_PRICE: u64 = 0;

    pub const SUM_VOTING_POWER_BASE_GAS: u64 = 10_000;
    pub const SUM_VOTING_POWER_GAS_PER_BYTE: u64 = 25;

    /// How long past an epoch's end time the switch waits, in seconds
    /// (about one hundred external-chain block times).
    pub const EPOCH_SWITCH_DELAY: i64 = 100 * 10 * 60;
}

lazy_static! {
    /// The staking system contract lives at 0x..2710 (decimal 10000).
    pub static ref STAKING_CONTRACT_ADDRESS: Address = {
        let mut addr = Address::zero();
        addr.0[18] = 0x27;
        addr.0[19] = 0x10;
        addr
    };
    /// Collected gas fees accumulate here until distribution.
    pub static ref SYSTEM_ACC_ADDRESS: Address = {
        let mut addr = Address::zero();
        addr.0[18] = 0x27;
        addr.0[19] = 0x11;
        addr
    };
    /// Slashed coins are transferred here and counted in the AllBurnt slot.
    pub static ref BLACK_HOLE_ADDRESS: Address = Address::zero();
}

/// The staking contract's storage slots live under this reserved sequence.
pub const STAKING_CONTRACT_SEQUENCE: u64 = u64::MAX - 2;
