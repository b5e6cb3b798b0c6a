// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use crate::{
    abci::{self, Application},
    config::ChainConfig,
    executive::{REASON_BALANCE_NOT_ENOUGH, REASON_INCORRECT_NONCE},
    staking::{
        self,
        types::{Epoch, Nomination},
        StakingParams,
    },
    test_helpers::*,
};
use ember_types::{Address, H256, U256};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;

/// A 32-byte abi word with the tag in its first byte.
fn word(tag: u8) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[0] = tag;
    word
}

fn staking_test_config() -> ChainConfig {
    ChainConfig {
        staking: StakingParams {
            initial_staking_amount: U256::from(1u64),
            minimum_staking_amount: U256::zero(),
            slashed_staking_amount: U256::from(60u64),
        },
        ..Default::default()
    }
}

#[test]
fn get_balance_after_genesis() {
    let key = gen_keypair(1);
    let app = TestApp::new(&[key.address()]);
    assert_eq!(
        app.get_balance(&key.address()),
        U256::from(DEFAULT_INIT_BALANCE)
    );
}

#[test]
fn transfer_ok() {
    let key1 = gen_keypair(1);
    let key2 = gen_keypair(2);
    let mut app = TestApp::new(&[key1.address(), key2.address()]);
    let init = U256::from(DEFAULT_INIT_BALANCE);
    assert_eq!(app.get_balance(&key1.address()), init);
    assert_eq!(app.get_balance(&key2.address()), init);

    let (tx, _) = app.make_and_exec_tx_in_block(&key1, key2.address(), 100);
    app.ensure_tx_success(&tx.hash());

    assert_eq!(app.get_balance(&key1.address()), init - 100);
    assert_eq!(app.get_balance(&key2.address()), init + 100);
    assert_eq!(app.app.latest_block_num(), 2);
}

#[test]
fn transfer_of_more_than_balance_fails_cleanly() {
    let key1 = gen_keypair(1);
    let key2 = gen_keypair(2);
    let mut app = TestApp::new(&[key1.address(), key2.address()]);
    let init = U256::from(DEFAULT_INIT_BALANCE);

    let (tx, _) = app.make_and_exec_tx_in_block(
        &key1,
        key2.address(),
        DEFAULT_INIT_BALANCE + 1,
    );
    app.ensure_tx_failed(&tx.hash(), REASON_BALANCE_NOT_ENOUGH);

    assert_eq!(app.get_balance(&key1.address()), init);
    assert_eq!(app.get_balance(&key2.address()), init);
}

#[test]
fn blocks_reach_history_with_their_txs() {
    let key1 = gen_keypair(1);
    let key2 = gen_keypair(2);
    let mut app = TestApp::new(&[key1.address(), key2.address()]);

    let (_, h1) = app.make_and_exec_tx_in_block(&key1, key2.address(), 100);
    let blk1 = app
        .app
        .history_store()
        .get_block_by_height(h1)
        .expect("block sealed");
    assert_eq!(blk1.block.number, h1);
    assert_eq!(blk1.txs.len(), 1);

    let h2 = app.exec_empty_block();
    let blk2 = app
        .app
        .history_store()
        .get_block_by_height(h2)
        .expect("block sealed");
    assert_eq!(blk2.block.number, h2);
    assert_eq!(blk2.txs.len(), 0);
}

#[test]
fn check_tx_response_codes() {
    let key = gen_keypair(1);
    let app = TestApp::new(&[key.address()]);

    // not an rlp transaction at all
    let response = app.app.check_tx(abci::RequestCheckTx {
        tx: b"definitely not rlp".to_vec(),
        kind: abci::CheckTxKind::New,
    });
    assert_eq!(response.code, abci::CANNOT_DECODE_TX);

    // well-formed but unsigned
    let unsigned = primitives::Transaction {
        nonce: 0,
        gas_price: U256::from(1u64),
        gas: 100_000,
        action: primitives::Action::Call(key.address()),
        value: U256::from(100u64),
        data: vec![],
    }
    .fake_sign();
    let response = app.app.check_tx(abci::RequestCheckTx {
        tx: rlp::encode(&unsigned).to_vec(),
        kind: abci::CheckTxKind::New,
    });
    assert_eq!(response.code, abci::CANNOT_RECOVER_SENDER);

    // nonce ahead of the account
    let tx = app.make_and_sign_tx_with_nonce(
        &key,
        Some(key.address()),
        100,
        vec![],
        1,
        1,
    );
    assert_eq!(app.check_new_tx(&tx), abci::ACCOUNT_NONCE_MISMATCH);

    // unknown sender
    let stranger = gen_keypair(9);
    let tx = app.make_and_sign_tx_with_nonce(
        &stranger,
        Some(key.address()),
        100,
        vec![],
        1,
        0,
    );
    assert_eq!(app.check_new_tx(&tx), abci::SENDER_NOT_FOUND);

    // gas limit above the cap
    let mut over_limit = primitives::Transaction {
        nonce: 0,
        gas_price: U256::from(1u64),
        gas: 20_000_000,
        action: primitives::Action::Call(key.address()),
        value: U256::zero(),
        data: vec![],
    };
    let signed = over_limit.clone().sign(key.secret(), TEST_CHAIN_ID);
    assert_eq!(app.check_new_tx(&signed), abci::GAS_LIMIT_INVALID);

    // fee that the balance cannot cover
    over_limit.gas = 9_000_000;
    over_limit.gas_price = U256::from(10u64);
    let signed = over_limit.sign(key.secret(), TEST_CHAIN_ID);
    assert_eq!(app.check_new_tx(&signed), abci::CANNOT_PAY_GAS_FEE);

    // and a clean admission
    let tx = app.make_and_sign_tx_with_nonce(
        &key,
        Some(key.address()),
        100,
        vec![],
        0,
        0,
    );
    assert_eq!(app.check_new_tx(&tx), abci::CODE_OK);
}

#[test]
fn check_tx_enforces_min_gas_price() {
    let key = gen_keypair(1);
    let mut app = TestApp::new(&[key.address()]);

    // Raise the operational minimum and let a commit snapshot it.
    let mut ctx = app.app.get_run_tx_context();
    staking::save_min_gas_price(&mut ctx, 5, false);
    ctx.close(true);
    app.exec_empty_block();

    let cheap = app.make_and_sign_tx(&key, Some(key.address()), 1, vec![], 1);
    assert_eq!(app.check_new_tx(&cheap), abci::INVALID_MIN_GAS_PRICE);

    let paying =
        app.make_and_sign_tx(&key, Some(key.address()), 1, vec![], 5);
    assert_eq!(app.check_new_tx(&paying), abci::CODE_OK);
}

#[test]
fn check_tx_consumes_the_nonce_serially() {
    let key1 = gen_keypair(1);
    let key2 = gen_keypair(2);
    let app = TestApp::new(&[key1.address(), key2.address()]);

    let tx1 = app.make_and_sign_tx_with_nonce(
        &key1,
        Some(key2.address()),
        1,
        vec![],
        0,
        0,
    );
    let tx2 = app.make_and_sign_tx_with_nonce(
        &key1,
        Some(key2.address()),
        2,
        vec![],
        0,
        0,
    );
    assert_eq!(app.check_new_tx(&tx1), abci::CODE_OK);
    assert_eq!(app.check_new_tx(&tx2), abci::ACCOUNT_NONCE_MISMATCH);
}

#[test]
fn check_tx_rejects_sender_with_pending_tx() {
    let key1 = gen_keypair(1);
    let key2 = gen_keypair(2);
    let mut app = TestApp::new(&[key1.address(), key2.address()]);

    let tx1 = app.make_and_sign_tx_with_nonce(
        &key1,
        Some(key2.address()),
        1,
        vec![],
        0,
        0,
    );
    let tx2 = app.make_and_sign_tx_with_nonce(
        &key1,
        Some(key2.address()),
        2,
        vec![],
        0,
        0,
    );
    app.exec_single_block(&[tx1]);
    assert_eq!(app.check_new_tx(&tx2), abci::HAS_PENDING_TX);
}

#[test]
fn second_tx_with_same_nonce_retries_and_fails() {
    let key1 = gen_keypair(1);
    let to = gen_keypair(7).address();
    let mut app = TestApp::new(&[key1.address()]);

    let tx1 =
        app.make_and_sign_tx_with_nonce(&key1, Some(to), 1, vec![], 0, 0);
    let tx2 =
        app.make_and_sign_tx_with_nonce(&key1, Some(to), 2, vec![], 0, 0);

    let h = app.exec_txs_in_block(&[tx1.clone(), tx2.clone()]);
    app.exec_empty_block();

    // One of the two ran in the first block; the other stood by, retried
    // in the next block and died on the consumed nonce.
    let history = app.app.history_store();
    assert_eq!(history.get_block_by_height(h).unwrap().txs.len(), 1);
    assert_eq!(history.get_block_by_height(h + 1).unwrap().txs.len(), 1);

    let c1 = app.get_tx(&tx1.hash()).expect("sealed");
    let c2 = app.get_tx(&tx2.hash()).expect("sealed");
    let (winner, loser) =
        if c1.outcome.status == crate::executive::ExecStatus::Success {
            (c1, c2)
        } else {
            (c2, c1)
        };
    assert_eq!(winner.outcome.status, crate::executive::ExecStatus::Success);
    assert_eq!(loser.outcome.status, crate::executive::ExecStatus::Failed);
    assert_eq!(loser.outcome.reason(), REASON_INCORRECT_NONCE);
    assert_eq!(
        history.get_block_by_height(h).unwrap().txs[0].hash,
        winner.hash
    );

    let sent = history.get_txs_by_addr(&key1.address());
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].hash, winner.hash);
}

#[test]
fn replaying_random_txs_yields_identical_state() {
    let key1 = gen_keypair(1);
    let key2 = gen_keypair(2);
    let to1 = gen_keypair(3).address();
    let to2 = gen_keypair(4).address();
    let funded = [key1.address(), key2.address()];

    // Pre-sign blocks of transfers with mostly-bogus nonces.
    let mut rng = StdRng::seed_from_u64(2021);
    let seed_app = TestApp::new(&funded);
    let mut blocks = Vec::new();
    for _ in 0..10 {
        let mut txs = Vec::new();
        for _ in 0..20 {
            let nonce = rng.gen_range(0..12u64);
            let value = rng.gen_range(1..100u64);
            txs.push(seed_app.make_and_sign_tx_with_nonce(
                &key1,
                Some(to1),
                value,
                vec![],
                0,
                nonce,
            ));
            let nonce = rng.gen_range(0..12u64);
            let value = rng.gen_range(1..100u64);
            txs.push(seed_app.make_and_sign_tx_with_nonce(
                &key2,
                Some(to2),
                value,
                vec![],
                0,
                nonce,
            ));
        }
        blocks.push(txs);
    }

    let run = |blocks: &Vec<Vec<primitives::SignedTransaction>>| {
        let mut app = TestApp::new(&funded);
        for txs in blocks {
            app.exec_single_block(txs);
        }
        app.exec_empty_block();
        let root = {
            app.app.wait_lock();
            let response = app.app.info(abci::RequestInfo {});
            response.last_block_app_hash
        };
        (
            app.get_balance(&key1.address()),
            app.get_balance(&key2.address()),
            app.get_balance(&to1),
            app.get_balance(&to2),
            root,
        )
    };

    assert_eq!(run(&blocks), run(&blocks));
}

#[test]
fn staking_create_edit_mgp_retire_and_epoch_switch() {
    let key1 = gen_keypair(1);
    let key2 = gen_keypair(2);
    let mut app = TestApp::with_config(
        staking_test_config(),
        &[key1.address(), key2.address()],
    );
    let staking_addr = *crate::parameters::STAKING_CONTRACT_ADDRESS;

    // create validator
    let data = pack_create_validator(
        &key1.address(),
        word(b'a'),
        word(b'1'),
    );
    let (tx, _) = app.make_and_exec_tx_in_block_with_gas_price(
        &key1,
        staking_addr,
        100,
        data,
        1,
    );
    app.ensure_tx_success(&tx.hash());
    // staked coins plus the full (unrefunded) gas fee of the call, swept
    // to the validators at the next commit
    assert_eq!(
        app.staking_balance(),
        U256::from(100 + TEST_GAS_LIMIT * 1)
    );
    let info = app.staking_info();
    assert_eq!(info.validators.len(), 2);
    assert_eq!(info.validators[1].address, key1.address());
    assert_eq!(info.validators[1].pubkey, H256::from(word(b'1')));
    assert_eq!(info.validators[1].staked_coins, U256::from(100u64));

    // edit validator: only the introduction changes
    let data = pack_edit_validator(&Address::zero(), word(b'2'));
    let (tx, _) = app.make_and_exec_tx_in_block_with_gas_price(
        &key1,
        staking_addr,
        0,
        data,
        1,
    );
    app.ensure_tx_success(&tx.hash());
    let info = app.staking_info();
    assert_eq!(info.validators.len(), 2);
    assert_eq!(info.validators[1].introduction, "2");
    assert_eq!(info.validators[1].reward_to, key1.address());

    // bump the operational min gas price: needs an active validator
    let mut ctx = app.app.get_run_tx_context();
    staking::save_min_gas_price(&mut ctx, 100, true);
    staking::save_min_gas_price(&mut ctx, 100, false);
    let (acc, mut info) = staking::load_staking_acc(&mut ctx);
    info.validators[1].voting_power = 1000;
    staking::save_staking_info(&mut ctx, &acc, &info);
    ctx.close(true);

    let data = pack_selector(staking::SELECTOR_INCREASE_MIN_GAS_PRICE);
    let (tx, _) = app.make_and_exec_tx_in_block_with_gas_price(
        &key1,
        staking_addr,
        0,
        data,
        1,
    );
    app.ensure_tx_success(&tx.hash());
    let mut ctx = app.app.get_run_tx_context();
    assert_eq!(staking::load_min_gas_price(&mut ctx, false), 105);
    ctx.close(false);

    // retire, after resetting the min gas price floor
    let mut ctx = app.app.get_run_tx_context();
    staking::save_min_gas_price(&mut ctx, 0, true);
    staking::save_min_gas_price(&mut ctx, 0, false);
    ctx.close(true);
    app.exec_empty_block();

    let data = pack_selector(staking::SELECTOR_RETIRE);
    let (tx, _) = app.make_and_exec_tx_in_block_with_gas_price(
        &key1,
        staking_addr,
        0,
        data,
        1,
    );
    app.ensure_tx_success(&tx.hash());
    let info = app.staking_info();
    assert_eq!(info.validators.len(), 2);
    assert!(info.validators[1].is_retiring);

    // epoch switch: only the harness validator is nominated, the retired
    // one is removed and its stake refunded to its rewardTo
    let balance_before_refund = app.get_balance(&key1.address());
    let mut nominations = BTreeMap::new();
    nominations.insert(
        test_validator_pubkey(),
        Nomination {
            pubkey: test_validator_pubkey(),
            nominated_count: 2,
        },
    );
    app.app
        .epoch_sender()
        .send(Epoch {
            start_height: 1,
            end_time: 0,
            nominations,
        })
        .unwrap();
    app.exec_empty_block();
    app.exec_empty_block();

    let info = app.staking_info();
    assert_eq!(info.validators.len(), 1);
    assert_eq!(info.validators[0].pubkey, test_validator_pubkey());
    assert_eq!(info.validators[0].voting_power, 2);
    assert_eq!(
        app.get_balance(&key1.address()),
        balance_before_refund + 100
    );
}

#[test]
fn mgp_call_from_non_validator_is_rejected() {
    let key = gen_keypair(1);
    let mut app =
        TestApp::with_config(staking_test_config(), &[key.address()]);
    let data = pack_selector(staking::SELECTOR_INCREASE_MIN_GAS_PRICE);
    let (tx, _) = app.make_and_exec_tx_in_block_with_gas_price(
        &key,
        *crate::parameters::STAKING_CONTRACT_ADDRESS,
        0,
        data,
        1,
    );
    app.ensure_tx_failed(
        &tx.hash(),
        "minGasPrice operator not validator or its rewardTo",
    );
}

#[test]
fn duplicate_vote_evidence_slashes_and_burns() {
    let key = gen_keypair(1);
    let mut app =
        TestApp::with_config(staking_test_config(), &[key.address()]);
    let staking_addr = *crate::parameters::STAKING_CONTRACT_ADDRESS;

    let data =
        pack_create_validator(&key.address(), word(b'a'), word(b'1'));
    let (tx, _) = app.make_and_exec_tx_in_block_with_gas_price(
        &key,
        staking_addr,
        100,
        data,
        0,
    );
    app.ensure_tx_success(&tx.hash());

    let evidence = abci::Evidence {
        kind: abci::EvidenceKind::DuplicateVote,
        validator: abci::ValidatorRef {
            address: abci::consensus_address(&H256::from(word(b'1')))
                .to_vec(),
            power: 1,
        },
        height: app.app.latest_block_num(),
    };
    app.exec_single_block_with(&[], vec![evidence]);
    app.exec_single_block(&[]);

    let info = app.staking_info();
    // 60 of the 100 staked coins are gone and the burn counter moved.
    assert_eq!(info.validators[1].staked_coins, U256::from(40u64));
    let mut ctx = app.app.get_run_tx_context();
    assert_eq!(staking::load_all_burnt(&mut ctx), U256::from(60u64));
    ctx.close(false);
    assert_eq!(app.staking_balance(), U256::from(40u64));
}

#[test]
fn block_fees_become_proposer_rewards() {
    let key = gen_keypair(1);
    let mut app =
        TestApp::with_config(staking_test_config(), &[key.address()]);

    let (tx, _) = app.make_and_exec_tx_in_block_with_gas_price(
        &key,
        gen_keypair(2).address(),
        100,
        Vec::new(),
        9,
    );
    app.ensure_tx_success(&tx.hash());

    // The transfer's fee (used gas only, the rest was refunded) was swept
    // into pending rewards of the proposer.
    let info = app.staking_info();
    let proposer_addr = ember_types::Address::from_slice(
        &abci::consensus_address(&test_validator_pubkey()),
    );
    let rewarded: U256 = info
        .pending_rewards
        .iter()
        .filter(|r| r.address == proposer_addr)
        .map(|r| r.amount)
        .fold(U256::zero(), |acc, amount| acc + amount);
    assert_eq!(rewarded, U256::from(21_000u64 * 9));
    assert_eq!(app.staking_balance(), rewarded);
}

#[test]
fn commit_reports_retain_height_every_hundred_blocks() {
    let key = gen_keypair(1);
    let mut app = TestApp::with_config(
        ChainConfig {
            retain_blocks: 50,
            ..Default::default()
        },
        &[key.address()],
    );
    for expected in 1..=100i64 {
        let (height, response) = app.exec_block_for_commit_response();
        assert_eq!(height, expected);
        if height % 100 == 0 {
            assert_eq!(response.retain_height, height - 50 + 1);
        } else {
            assert_eq!(response.retain_height, 0);
        }
    }
}
