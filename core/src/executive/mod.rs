// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! Single-transaction execution: nonce and fee accounting, plain value
//! transfers, and dispatch into the registered system contracts. The EVM
//! interpreter for ordinary contract code is an external collaborator and
//! not part of this crate.

mod system_contract;

pub use self::system_contract::{SystemContract, SystemContractMap};

use crate::{
    parameters::{engine::TX_GAS, SYSTEM_ACC_ADDRESS},
    state::{Context, StateError},
};
use ember_types::{Address, H256, U256};
use primitives::{Account, Action, BlockInfo, LogEntry, SignedTransaction};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use std::sync::Arc;

pub const REASON_INCORRECT_NONCE: &str = "incorrect nonce";
pub const REASON_BALANCE_NOT_ENOUGH: &str = "balance-not-enough";
pub const REASON_CANNOT_PAY_GAS_FEE: &str = "cannot pay gas fee";
pub const REASON_NOT_ENOUGH_GAS: &str = "not enough gas";

/// A decoded transaction with its sender resolved, ready for execution.
#[derive(Clone, Debug)]
pub struct TxToRun {
    pub hash: H256,
    pub from: Address,
    /// `None` for contract creation, which executes as a no-op transfer
    /// here (code deployment belongs to the external VM).
    pub to: Option<Address>,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub value: U256,
    pub data: Vec<u8>,
}

impl TxToRun {
    pub fn from_signed(tx: &SignedTransaction) -> TxToRun {
        TxToRun {
            hash: tx.hash(),
            from: tx.sender(),
            to: match tx.action {
                Action::Call(address) => Some(address),
                Action::Create => None,
            },
            nonce: tx.nonce(),
            gas_limit: tx.gas(),
            gas_price: *tx.gas_price(),
            value: tx.value,
            data: tx.data.clone(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExecStatus {
    Success,
    Failed,
}

/// What a single transaction did: status, logs, gas burnt and the return
/// payload (a human-readable reason on failure).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionOutcome {
    pub status: ExecStatus,
    pub logs: Vec<LogEntry>,
    pub gas_used: u64,
    pub out_data: Vec<u8>,
}

impl ExecutionOutcome {
    pub fn success(gas_used: u64) -> ExecutionOutcome {
        ExecutionOutcome {
            status: ExecStatus::Success,
            logs: Vec::new(),
            gas_used,
            out_data: Vec::new(),
        }
    }

    pub fn failure(reason: &str, gas_used: u64) -> ExecutionOutcome {
        ExecutionOutcome {
            status: ExecStatus::Failed,
            logs: Vec::new(),
            gas_used,
            out_data: reason.as_bytes().to_vec(),
        }
    }

    pub fn reason(&self) -> String {
        String::from_utf8_lossy(&self.out_data).into_owned()
    }
}

impl Encodable for ExecutionOutcome {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        s.append(&(matches!(self.status, ExecStatus::Failed) as u8));
        s.append_list(&self.logs);
        s.append(&self.gas_used);
        s.append(&self.out_data);
    }
}

impl Decodable for ExecutionOutcome {
    fn decode(d: &Rlp) -> Result<Self, DecoderError> {
        Ok(ExecutionOutcome {
            status: if d.val_at::<u8>(0)? == 0 {
                ExecStatus::Success
            } else {
                ExecStatus::Failed
            },
            logs: d.list_at(1)?,
            gas_used: d.val_at(2)?,
            out_data: d.val_at(3)?,
        })
    }
}

/// Per-transaction fee totals reported back to the engine.
#[derive(Clone, Debug, Default)]
pub struct RunResult {
    pub outcome: ExecutionOutcome,
    pub gas_refund: U256,
    pub gas_fee: U256,
}

impl Default for ExecutionOutcome {
    fn default() -> Self { ExecutionOutcome::success(0) }
}

pub fn get_system_balance(ctx: &mut Context) -> U256 {
    ctx.get_account(&SYSTEM_ACC_ADDRESS)
        .map(|account| account.balance)
        .unwrap_or_default()
}

pub fn add_system_acc_balance(ctx: &mut Context, amount: &U256) {
    let mut account = ctx
        .get_account(&SYSTEM_ACC_ADDRESS)
        .unwrap_or_else(Account::new_empty);
    account.balance += *amount;
    ctx.set_account(&SYSTEM_ACC_ADDRESS, &account);
}

pub fn sub_system_acc_balance(
    ctx: &mut Context, amount: &U256,
) -> Result<(), StateError> {
    let mut account = ctx
        .get_account(&SYSTEM_ACC_ADDRESS)
        .unwrap_or_else(Account::new_empty);
    if account.balance < *amount {
        return Err(StateError::InsufficientBalance {
            balance: account.balance,
            cost: *amount,
        });
    }
    account.balance -= *amount;
    ctx.set_account(&SYSTEM_ACC_ADDRESS, &account);
    Ok(())
}

/// Moves `amount` from `from` to the black-hole address, burning it for
/// every practical purpose while keeping the books balanced.
pub fn transfer_to_black_hole(
    ctx: &mut Context, from: &Address, amount: &U256,
) -> Result<(), StateError> {
    use crate::parameters::BLACK_HOLE_ADDRESS;
    let mut sender = ctx.get_account(from).ok_or(StateError::NoSuchAccount)?;
    if sender.balance < *amount {
        return Err(StateError::InsufficientBalance {
            balance: sender.balance,
            cost: *amount,
        });
    }
    sender.balance -= *amount;
    ctx.set_account(from, &sender);
    let mut hole = ctx
        .get_account(&BLACK_HOLE_ADDRESS)
        .unwrap_or_else(Account::new_empty);
    hole.balance += *amount;
    ctx.set_account(&BLACK_HOLE_ADDRESS, &hole);
    Ok(())
}

/// Runs one transaction against a per-transaction context.
#[derive(Clone)]
pub struct TxRunner {
    system_contracts: Arc<SystemContractMap>,
}

impl TxRunner {
    pub fn new(system_contracts: Arc<SystemContractMap>) -> TxRunner {
        TxRunner { system_contracts }
    }

    pub fn run(
        &self, ctx: &mut Context, block: &BlockInfo, tx: &TxToRun,
    ) -> RunResult {
        let mut sender = ctx
            .get_account(&tx.from)
            .unwrap_or_else(Account::new_empty);
        if sender.nonce != tx.nonce {
            return RunResult {
                outcome: ExecutionOutcome::failure(REASON_INCORRECT_NONCE, 0),
                ..Default::default()
            };
        }

        let fee = U256::from(tx.gas_limit) * tx.gas_price;
        if sender.balance < fee {
            return RunResult {
                outcome: ExecutionOutcome::failure(
                    REASON_CANNOT_PAY_GAS_FEE,
                    0,
                ),
                ..Default::default()
            };
        }
        // The matching credit of the fee pool happens once per block, after
        // the whole transaction set ran.
        sender.balance -= fee;
        sender.nonce += 1;
        ctx.set_account(&tx.from, &sender);

        if let Some(to) = tx.to {
            if let Some(contract) = self.system_contracts.contract(&to) {
                // The unused portion of a system-contract call is not
                // refunded; it stays in the fee pool.
                let outcome = contract.execute(ctx, block, tx);
                return RunResult {
                    outcome,
                    gas_refund: U256::zero(),
                    gas_fee: fee,
                };
            }
        }
        self.run_transfer(ctx, tx)
    }

    fn run_transfer(&self, ctx: &mut Context, tx: &TxToRun) -> RunResult {
        if tx.gas_limit < TX_GAS {
            return RunResult {
                outcome: ExecutionOutcome::failure(
                    REASON_NOT_ENOUGH_GAS,
                    tx.gas_limit,
                ),
                gas_refund: U256::zero(),
                gas_fee: U256::from(tx.gas_limit) * tx.gas_price,
            };
        }

        let gas_fee = U256::from(TX_GAS) * tx.gas_price;
        let refund = U256::from(tx.gas_limit - TX_GAS) * tx.gas_price;
        let settle = |ctx: &mut Context, outcome: ExecutionOutcome| {
            // The sender gets the unused gas back right away; the matching
            // debit of the fee pool is settled at the next commit.
            if !refund.is_zero() {
                let mut sender = ctx
                    .get_account(&tx.from)
                    .expect("sender persisted above; qed");
                sender.balance += refund;
                ctx.set_account(&tx.from, &sender);
            }
            RunResult {
                outcome,
                gas_refund: refund,
                gas_fee,
            }
        };

        let mut sender = ctx
            .get_account(&tx.from)
            .expect("sender persisted above; qed");
        if sender.balance < tx.value {
            return settle(
                ctx,
                ExecutionOutcome::failure(REASON_BALANCE_NOT_ENOUGH, TX_GAS),
            );
        }
        if let Some(to) = tx.to {
            if to != tx.from && !tx.value.is_zero() {
                sender.balance -= tx.value;
                ctx.set_account(&tx.from, &sender);
                let mut receiver =
                    ctx.get_account(&to).unwrap_or_else(Account::new_empty);
                receiver.balance += tx.value;
                ctx.set_account(&to, &receiver);
            }
        }
        settle(ctx, ExecutionOutcome::success(TX_GAS))
    }
}
