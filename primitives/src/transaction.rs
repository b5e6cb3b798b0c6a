// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use ember_key::{
    public_to_address, recover, sign, Public, Secret, Signature,
};
use ember_types::{Address, BigEndianHash, H256, U256};
use keccak_hash::keccak;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use std::ops::Deref;

/// Errors concerning transaction decoding and signature handling.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction has invalid RLP structure: {0}")]
    InvalidRlp(String),
    #[error("transaction has invalid signature: {0}")]
    InvalidSignature(String),
    #[error("transaction was signed for another chain (v = {v})")]
    ChainIdMismatch { v: u64 },
}

impl From<DecoderError> for TransactionError {
    fn from(err: DecoderError) -> Self {
        TransactionError::InvalidRlp(format!("{}", err))
    }
}

impl From<ember_key::Error> for TransactionError {
    fn from(err: ember_key::Error) -> Self {
        TransactionError::InvalidSignature(format!("{}", err))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action {
    /// Create creates a new contract.
    Create,
    /// Calls the contract at the given address. In the case of a transfer,
    /// this is the receiver's address.
    Call(Address),
}

impl Default for Action {
    fn default() -> Action { Action::Create }
}

impl Decodable for Action {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.is_empty() {
            Ok(Action::Create)
        } else {
            Ok(Action::Call(rlp.as_val()?))
        }
    }
}

impl Encodable for Action {
    fn rlp_append(&self, stream: &mut RlpStream) {
        match *self {
            Action::Create => stream.append_internal(&""),
            Action::Call(ref address) => stream.append_internal(address),
        };
    }
}

/// The unsigned body of an Ethereum-style transaction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Transaction {
    /// Per-sender 64-bit counter.
    pub nonce: u64,
    /// Gas price.
    pub gas_price: U256,
    /// Gas paid up front for transaction execution.
    pub gas: u64,
    /// Action, can be either call or contract create.
    pub action: Action,
    /// Transferred value.
    pub value: U256,
    /// Transaction data.
    pub data: Vec<u8>,
}

impl Transaction {
    /// The replay-protected signing hash: the transaction fields followed by
    /// `(chain_id, 0, 0)`.
    pub fn signing_hash(&self, chain_id: u64) -> H256 {
        let mut s = RlpStream::new_list(9);
        self.rlp_append_unsigned(&mut s);
        s.append(&chain_id);
        s.append(&0u8);
        s.append(&0u8);
        keccak(s.as_raw())
    }

    fn rlp_append_unsigned(&self, s: &mut RlpStream) {
        s.append(&self.nonce);
        s.append(&self.gas_price);
        s.append(&self.gas);
        s.append(&self.action);
        s.append(&self.value);
        s.append(&self.data);
    }

    pub fn sign(self, secret: &Secret, chain_id: u64) -> SignedTransaction {
        let sig = sign(secret, &self.signing_hash(chain_id))
            .expect("data is valid and context has signing capabilities; qed");
        let tx_with_sig = self.with_signature(sig, chain_id);
        let public = tx_with_sig
            .recover_public(chain_id)
            .expect("secret is valid so it's recoverable");
        SignedTransaction::new(public, tx_with_sig)
    }

    /// Seals the transaction with a recoverable signature.
    pub fn with_signature(
        self, sig: Signature, chain_id: u64,
    ) -> TransactionWithSignature {
        TransactionWithSignature {
            unsigned: self,
            v: 35 + chain_id * 2 + sig.v() as u64,
            r: sig.r().into(),
            s: sig.s().into(),
            hash: H256::zero(),
            rlp_size: None,
        }
        .compute_hash()
    }

    /// An unsigned shell, useful for constructing invalid-signature cases.
    pub fn fake_sign(self) -> TransactionWithSignature {
        TransactionWithSignature {
            unsigned: self,
            v: 0,
            r: U256::zero(),
            s: U256::zero(),
            hash: H256::zero(),
            rlp_size: None,
        }
        .compute_hash()
    }
}

/// Signed transaction information without a verified sender.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransactionWithSignature {
    /// Plain transaction.
    pub unsigned: Transaction,
    /// The V field of the signature; carries the chain id and the half of
    /// the curve our point falls in.
    pub v: u64,
    /// The R field of the signature.
    pub r: U256,
    /// The S field of the signature.
    pub s: U256,
    /// Hash of the signed transaction.
    pub hash: H256,
    /// The transaction size when serialized in rlp.
    pub rlp_size: Option<usize>,
}

impl Deref for TransactionWithSignature {
    type Target = Transaction;

    fn deref(&self) -> &Self::Target { &self.unsigned }
}

impl Decodable for TransactionWithSignature {
    fn decode(d: &Rlp) -> Result<Self, DecoderError> {
        if d.item_count()? != 9 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let hash = keccak(d.as_raw());
        let rlp_size = Some(d.as_raw().len());

        Ok(TransactionWithSignature {
            unsigned: Transaction {
                nonce: d.val_at(0)?,
                gas_price: d.val_at(1)?,
                gas: d.val_at(2)?,
                action: d.val_at(3)?,
                value: d.val_at(4)?,
                data: d.val_at(5)?,
            },
            v: d.val_at(6)?,
            r: d.val_at(7)?,
            s: d.val_at(8)?,
            hash,
            rlp_size,
        })
    }
}

impl Encodable for TransactionWithSignature {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(9);
        self.unsigned.rlp_append_unsigned(s);
        s.append(&self.v);
        s.append(&self.r);
        s.append(&self.s);
    }
}

impl TransactionWithSignature {
    fn compute_hash(mut self) -> TransactionWithSignature {
        let bytes = self.rlp_bytes();
        self.hash = keccak(&*bytes);
        self.rlp_size = Some(bytes.len());
        self
    }

    /// Checks whether the signature is empty.
    pub fn is_unsigned(&self) -> bool { self.r.is_zero() && self.s.is_zero() }

    pub fn hash(&self) -> H256 { self.hash }

    pub fn rlp_size(&self) -> usize {
        self.rlp_size.unwrap_or_else(|| self.rlp_bytes().len())
    }

    /// Extracts the raw recovery id for the given chain, rejecting
    /// signatures made for other chains.
    fn recovery_id(&self, chain_id: u64) -> Result<u8, TransactionError> {
        let base = 35 + chain_id * 2;
        match self.v.checked_sub(base) {
            Some(rec @ 0..=1) => Ok(rec as u8),
            _ => Err(TransactionError::ChainIdMismatch { v: self.v }),
        }
    }

    /// Recovers the public key of the sender.
    pub fn recover_public(
        &self, chain_id: u64,
    ) -> Result<Public, TransactionError> {
        if self.is_unsigned() {
            return Err(TransactionError::InvalidSignature(
                "transaction is unsigned".into(),
            ));
        }
        let rec_id = self.recovery_id(chain_id)?;
        let signature = Signature::from_rsv(
            &BigEndianHash::from_uint(&self.r),
            &BigEndianHash::from_uint(&self.s),
            rec_id,
        );
        Ok(recover(&signature, &self.unsigned.signing_hash(chain_id))?)
    }
}

/// A signed transaction with a successfully recovered `sender`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignedTransaction {
    pub transaction: TransactionWithSignature,
    pub sender: Address,
    pub public: Public,
}

impl Deref for SignedTransaction {
    type Target = TransactionWithSignature;

    fn deref(&self) -> &Self::Target { &self.transaction }
}

impl SignedTransaction {
    pub fn new(
        public: Public, transaction: TransactionWithSignature,
    ) -> Self {
        let sender = public_to_address(&public);
        SignedTransaction {
            transaction,
            sender,
            public,
        }
    }

    pub fn sender(&self) -> Address { self.sender }

    pub fn nonce(&self) -> u64 { self.transaction.nonce }

    pub fn gas(&self) -> u64 { self.transaction.gas }

    pub fn gas_price(&self) -> &U256 { &self.transaction.gas_price }

    pub fn hash(&self) -> H256 { self.transaction.hash() }
}
