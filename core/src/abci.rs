// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! The consensus-facing lifecycle contract. The BFT engine driving these
//! callbacks is an external collaborator; this module pins down exactly the
//! request and response shapes the application consumes.

use ember_types::H256;
use sha2::{Digest, Sha256};

pub const CODE_OK: u32 = 0;
pub const CANNOT_DECODE_TX: u32 = 101;
pub const CANNOT_RECOVER_SENDER: u32 = 102;
pub const SENDER_NOT_FOUND: u32 = 103;
pub const ACCOUNT_NONCE_MISMATCH: u32 = 104;
pub const CANNOT_PAY_GAS_FEE: u32 = 105;
pub const GAS_LIMIT_INVALID: u32 = 106;
pub const INVALID_MIN_GAS_PRICE: u32 = 107;
pub const HAS_PENDING_TX: u32 = 108;

/// The first 20 bytes of the SHA-256 of a consensus public key, the address
/// under which the consensus engine reports proposers, voters and evidence.
pub fn consensus_address(pubkey: &H256) -> [u8; 20] {
    let digest = Sha256::digest(pubkey.as_bytes());
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[..20]);
    address
}

#[derive(Clone, Debug, Default)]
pub struct Header {
    pub height: i64,
    /// Unix seconds of the proposer's clock, agreed on by consensus.
    pub time: i64,
    pub proposer_address: Vec<u8>,
    pub last_block_id_hash: H256,
    /// Hash over the block's transaction data; its first eight bytes seed
    /// the engine's deterministic reordering.
    pub data_hash: Vec<u8>,
    pub app_hash: H256,
}

#[derive(Clone, Debug, Default)]
pub struct ValidatorRef {
    pub address: Vec<u8>,
    pub power: i64,
}

#[derive(Clone, Debug, Default)]
pub struct VoteInfo {
    pub validator: ValidatorRef,
    pub signed_last_block: bool,
}

#[derive(Clone, Debug, Default)]
pub struct LastCommitInfo {
    pub round: i32,
    pub votes: Vec<VoteInfo>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EvidenceKind {
    DuplicateVote,
    LightClientAttack,
}

#[derive(Clone, Debug)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub validator: ValidatorRef,
    pub height: i64,
}

#[derive(Clone, Debug)]
pub struct ValidatorUpdate {
    pub pubkey: H256,
    pub power: i64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CheckTxKind {
    New,
    Recheck,
}

#[derive(Clone, Debug, Default)]
pub struct RequestInfo {}

#[derive(Clone, Debug, Default)]
pub struct ResponseInfo {
    pub last_block_height: i64,
    pub last_block_app_hash: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct RequestSetOption {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default)]
pub struct ResponseSetOption {}

#[derive(Clone, Debug, Default)]
pub struct RequestQuery {
    pub data: Vec<u8>,
    pub path: String,
    pub height: i64,
}

#[derive(Clone, Debug, Default)]
pub struct ResponseQuery {
    pub code: u32,
}

#[derive(Clone, Debug, Default)]
pub struct RequestInitChain {
    pub chain_id: String,
    pub app_state_bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct ResponseInitChain {
    pub validators: Vec<ValidatorUpdate>,
}

#[derive(Clone, Debug, Default)]
pub struct RequestBeginBlock {
    pub hash: H256,
    pub header: Header,
    pub last_commit_info: LastCommitInfo,
    pub byzantine_validators: Vec<Evidence>,
}

#[derive(Clone, Debug, Default)]
pub struct ResponseBeginBlock {}

#[derive(Clone, Debug)]
pub struct RequestCheckTx {
    pub tx: Vec<u8>,
    pub kind: CheckTxKind,
}

#[derive(Clone, Debug, Default)]
pub struct ResponseCheckTx {
    pub code: u32,
    pub info: String,
}

#[derive(Clone, Debug, Default)]
pub struct RequestDeliverTx {
    pub tx: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct ResponseDeliverTx {
    pub code: u32,
}

#[derive(Clone, Debug, Default)]
pub struct RequestEndBlock {
    pub height: i64,
}

#[derive(Clone, Debug, Default)]
pub struct ResponseEndBlock {
    pub validator_updates: Vec<ValidatorUpdate>,
}

#[derive(Clone, Debug, Default)]
pub struct ResponseCommit {
    pub data: Vec<u8>,
    pub retain_height: i64,
}

#[derive(Clone, Debug, Default)]
pub struct RequestListSnapshots {}
#[derive(Clone, Debug, Default)]
pub struct ResponseListSnapshots {}
#[derive(Clone, Debug, Default)]
pub struct RequestOfferSnapshot {}
#[derive(Clone, Debug, Default)]
pub struct ResponseOfferSnapshot {}
#[derive(Clone, Debug, Default)]
pub struct RequestLoadSnapshotChunk {}
#[derive(Clone, Debug, Default)]
pub struct ResponseLoadSnapshotChunk {}
#[derive(Clone, Debug, Default)]
pub struct RequestApplySnapshotChunk {}
#[derive(Clone, Debug, Default)]
pub struct ResponseApplySnapshotChunk {}

/// The ordered callback contract the consensus engine drives. Apart from
/// `check_tx`, which may run concurrently, calls arrive serially.
pub trait Application: Send + Sync {
    fn info(&self, req: RequestInfo) -> ResponseInfo;

    fn set_option(&self, _req: RequestSetOption) -> ResponseSetOption {
        ResponseSetOption::default()
    }

    fn query(&self, _req: RequestQuery) -> ResponseQuery {
        ResponseQuery { code: CODE_OK }
    }

    fn init_chain(&self, req: RequestInitChain) -> ResponseInitChain;

    fn begin_block(&self, req: RequestBeginBlock) -> ResponseBeginBlock;

    fn check_tx(&self, req: RequestCheckTx) -> ResponseCheckTx;

    fn deliver_tx(&self, req: RequestDeliverTx) -> ResponseDeliverTx;

    fn end_block(&self, req: RequestEndBlock) -> ResponseEndBlock;

    fn commit(&self) -> ResponseCommit;

    fn list_snapshots(
        &self, _req: RequestListSnapshots,
    ) -> ResponseListSnapshots {
        ResponseListSnapshots::default()
    }

    fn offer_snapshot(
        &self, _req: RequestOfferSnapshot,
    ) -> ResponseOfferSnapshot {
        ResponseOfferSnapshot::default()
    }

    fn load_snapshot_chunk(
        &self, _req: RequestLoadSnapshotChunk,
    ) -> ResponseLoadSnapshotChunk {
        ResponseLoadSnapshotChunk::default()
    }

    fn apply_snapshot_chunk(
        &self, _req: RequestApplySnapshotChunk,
    ) -> ResponseApplySnapshotChunk {
        ResponseApplySnapshotChunk::default()
    }
}
