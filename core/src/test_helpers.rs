// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! An in-process harness that drives the application the way the
//! consensus engine would: deterministic headers, one proposer, explicit
//! block sequencing.

use crate::{
    abci::{self, Application},
    app::App,
    config::ChainConfig,
    engine::CommittedTx,
    genesis::{GenesisAccount, GenesisData},
    staking,
};
use ember_key::KeyPair;
use ember_types::{Address, H256, U256};
use keccak_hash::keccak;
use primitives::{Action, SignedTransaction, Transaction};
use std::collections::BTreeMap;

pub const DEFAULT_INIT_BALANCE: u64 = 10_000_000;
pub const TEST_CHAIN_ID: u64 = 1;
pub const TEST_GAS_LIMIT: u64 = 1_000_000;

/// The fixed consensus key of the harness's single validator.
pub fn test_validator_pubkey() -> H256 { H256::repeat_byte(0x51) }

pub fn gen_keypair(byte: u8) -> KeyPair {
    KeyPair::from_secret(H256::repeat_byte(byte)).expect("test secret valid")
}

pub struct TestApp {
    pub app: App,
    next_height: i64,
}

impl TestApp {
    pub fn new(funded: &[Address]) -> TestApp {
        TestApp::with_config(ChainConfig::default(), funded)
    }

    pub fn with_config(config: ChainConfig, funded: &[Address]) -> TestApp {
        let app = App::new(
            &config,
            U256::from(TEST_CHAIN_ID),
            Some(test_validator_pubkey()),
        );
        let mut alloc = BTreeMap::new();
        for address in funded {
            alloc.insert(
                *address,
                GenesisAccount {
                    balance: U256::from(DEFAULT_INIT_BALANCE),
                },
            );
        }
        let genesis = GenesisData {
            alloc,
            validators: Vec::new(),
        };
        app.init_chain(abci::RequestInitChain {
            chain_id: "ember-test".into(),
            app_state_bytes: serde_json::to_vec(&genesis).unwrap(),
        });
        TestApp {
            app,
            next_height: 1,
        }
    }

    fn begin_block_request(&self, height: i64) -> abci::RequestBeginBlock {
        let proposer =
            abci::consensus_address(&test_validator_pubkey()).to_vec();
        abci::RequestBeginBlock {
            hash: keccak(format!("block-{}", height)),
            header: abci::Header {
                height,
                time: 1_600_000_000 + height,
                proposer_address: proposer.clone(),
                last_block_id_hash: keccak(format!("block-{}", height - 1)),
                data_hash: keccak(height.to_le_bytes()).as_bytes().to_vec(),
                app_hash: H256::zero(),
            },
            last_commit_info: abci::LastCommitInfo {
                round: 0,
                votes: vec![abci::VoteInfo {
                    validator: abci::ValidatorRef {
                        address: proposer,
                        power: 1,
                    },
                    signed_last_block: true,
                }],
            },
            byzantine_validators: Vec::new(),
        }
    }

    /// Runs exactly one consensus round with the given transactions.
    pub fn exec_single_block(&mut self, txs: &[SignedTransaction]) -> i64 {
        self.exec_single_block_with(txs, Vec::new())
    }

    pub fn exec_single_block_with(
        &mut self, txs: &[SignedTransaction],
        byzantine_validators: Vec<abci::Evidence>,
    ) -> i64 {
        let height = self.next_height;
        let mut request = self.begin_block_request(height);
        request.byzantine_validators = byzantine_validators;
        self.app.begin_block(request);
        for tx in txs {
            self.app.deliver_tx(abci::RequestDeliverTx {
                tx: rlp::encode(&tx.transaction).to_vec(),
            });
        }
        self.app.end_block(abci::RequestEndBlock { height });
        self.app.commit();
        self.next_height += 1;
        height
    }

    /// Runs the transactions in one block plus an empty block after it, so
    /// the first block's results are executed and sealed into history.
    pub fn exec_txs_in_block(&mut self, txs: &[SignedTransaction]) -> i64 {
        let height = self.exec_single_block(txs);
        self.exec_single_block(&[]);
        height
    }

    pub fn exec_empty_block(&mut self) -> i64 { self.exec_txs_in_block(&[]) }

    /// One empty consensus round, handing back the raw commit response.
    pub fn exec_block_for_commit_response(
        &mut self,
    ) -> (i64, abci::ResponseCommit) {
        let height = self.next_height;
        self.app.begin_block(self.begin_block_request(height));
        self.app.end_block(abci::RequestEndBlock { height });
        let response = self.app.commit();
        self.next_height += 1;
        (height, response)
    }

    pub fn make_and_sign_tx(
        &self, key: &KeyPair, to: Option<Address>, value: u64,
        data: Vec<u8>, gas_price: u64,
    ) -> SignedTransaction {
        self.make_and_sign_tx_with_nonce(
            key,
            to,
            value,
            data,
            gas_price,
            self.nonce_of(&key.address()),
        )
    }

    pub fn make_and_sign_tx_with_nonce(
        &self, key: &KeyPair, to: Option<Address>, value: u64,
        data: Vec<u8>, gas_price: u64, nonce: u64,
    ) -> SignedTransaction {
        Transaction {
            nonce,
            gas_price: U256::from(gas_price),
            gas: TEST_GAS_LIMIT,
            action: match to {
                Some(address) => Action::Call(address),
                None => Action::Create,
            },
            value: U256::from(value),
            data,
        }
        .sign(key.secret(), TEST_CHAIN_ID)
    }

    /// Signs and executes one transfer in its own block; returns the
    /// transaction and the block height it ran in.
    pub fn make_and_exec_tx_in_block(
        &mut self, key: &KeyPair, to: Address, value: u64,
    ) -> (SignedTransaction, i64) {
        self.make_and_exec_tx_in_block_with_gas_price(
            key,
            to,
            value,
            Vec::new(),
            0,
        )
    }

    pub fn make_and_exec_tx_in_block_with_gas_price(
        &mut self, key: &KeyPair, to: Address, value: u64, data: Vec<u8>,
        gas_price: u64,
    ) -> (SignedTransaction, i64) {
        let tx = self.make_and_sign_tx(key, Some(to), value, data, gas_price);
        let height = self.exec_txs_in_block(&[tx.clone()]);
        (tx, height)
    }

    pub fn check_new_tx(&self, tx: &SignedTransaction) -> u32 {
        self.app
            .check_tx(abci::RequestCheckTx {
                tx: rlp::encode(&tx.transaction).to_vec(),
                kind: abci::CheckTxKind::New,
            })
            .code
    }

    // Reads through the run trunk so that genesis state is visible even
    // before the first commit flushes it.
    pub fn get_balance(&self, address: &Address) -> U256 {
        self.app.wait_lock();
        let mut ctx = self.app.get_run_tx_context();
        let balance = ctx
            .get_account(address)
            .map(|account| account.balance)
            .unwrap_or_default();
        ctx.close(false);
        balance
    }

    pub fn nonce_of(&self, address: &Address) -> u64 {
        self.app.wait_lock();
        let mut ctx = self.app.get_run_tx_context();
        let nonce = ctx
            .get_account(address)
            .map(|account| account.nonce)
            .unwrap_or_default();
        ctx.close(false);
        nonce
    }

    pub fn get_tx(&self, hash: &H256) -> Option<CommittedTx> {
        self.app.wait_lock();
        self.app
            .history_store()
            .get_tx_by_hash(hash)
            .map(|tx| rlp::decode(&tx.content).expect("committed tx decodes"))
    }

    pub fn ensure_tx_success(&self, hash: &H256) {
        let tx = self.get_tx(hash).expect("tx sealed into history");
        assert_eq!(
            tx.outcome.status,
            crate::executive::ExecStatus::Success,
            "tx failed: {}",
            tx.outcome.reason()
        );
    }

    pub fn ensure_tx_failed(&self, hash: &H256, reason: &str) {
        let tx = self.get_tx(hash).expect("tx sealed into history");
        assert_eq!(tx.outcome.status, crate::executive::ExecStatus::Failed);
        assert_eq!(tx.outcome.reason(), reason);
    }

    /// Direct read of the persisted staking registry.
    pub fn staking_info(&self) -> staking::types::StakingInfo {
        self.app.wait_lock();
        let mut ctx = self.app.get_run_tx_context();
        let (_, info) = staking::load_staking_acc(&mut ctx);
        ctx.close(false);
        info
    }

    pub fn staking_balance(&self) -> U256 {
        self.app.wait_lock();
        let mut ctx = self.app.get_run_tx_context();
        let balance = ctx
            .get_account(&crate::parameters::STAKING_CONTRACT_ADDRESS)
            .expect("staking account exists")
            .balance;
        ctx.close(false);
        balance
    }
}

/// Left-pads an address into one 32-byte abi word.
pub fn abi_word_from_address(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

pub fn pack_create_validator(
    reward_to: &Address, introduction: [u8; 32], pubkey: [u8; 32],
) -> Vec<u8> {
    let mut data = staking::SELECTOR_CREATE_VALIDATOR.to_vec();
    data.extend_from_slice(&abi_word_from_address(reward_to));
    data.extend_from_slice(&introduction);
    data.extend_from_slice(&pubkey);
    data
}

pub fn pack_edit_validator(
    reward_to: &Address, introduction: [u8; 32],
) -> Vec<u8> {
    let mut data = staking::SELECTOR_EDIT_VALIDATOR.to_vec();
    data.extend_from_slice(&abi_word_from_address(reward_to));
    data.extend_from_slice(&introduction);
    data
}

pub fn pack_selector(selector: [u8; 4]) -> Vec<u8> { selector.to_vec() }
