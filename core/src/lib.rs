// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

pub mod abci;
pub mod app;
pub mod channel;
pub mod config;
pub mod engine;
pub mod executive;
pub mod genesis;
pub mod history;
pub mod parameters;
pub mod staking;
pub mod state;
pub mod storage;

#[cfg(test)]
pub mod test_helpers;

pub use crate::{
    app::App,
    config::ChainConfig,
    state::{Context, ContextMode},
};
