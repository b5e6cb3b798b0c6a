// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use crate::{parameters::engine, staking::StakingParams};
use serde::Deserialize;

/// Node-level application configuration. Deserialized from the node's
/// config file by the client; every field has a working default.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// When positive, ask consensus to prune history below
    /// `height - retain_blocks + 1` every hundred blocks.
    pub retain_blocks: i64,
    /// Engine worker pool size.
    pub worker_count: usize,
    /// Parallel lanes used while preparing a block.
    pub prepare_lane_count: usize,
    /// Bound on transactions parked for a sender with an earlier
    /// in-flight transaction.
    pub standby_queue_cap: usize,
    /// Capacity hint for the per-block committed transaction list.
    pub committed_queue_cap: usize,
    /// Staking thresholds; production deployments keep the defaults.
    pub staking: StakingParams,
}

impl Default for ChainConfig {
    fn default() -> ChainConfig {
        ChainConfig {
            retain_blocks: 0,
            worker_count: engine::DEFAULT_WORKER_COUNT,
            prepare_lane_count: engine::DEFAULT_PREPARE_LANE_COUNT,
            standby_queue_cap: engine::DEFAULT_STANDBY_QUEUE_CAP,
            committed_queue_cap: engine::DEFAULT_COMMITTED_QUEUE_CAP,
            staking: StakingParams::default(),
        }
    }
}
