// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! Minimal secp256k1 wrapper used for transaction signing and sender
//! recovery. The curve context is process-wide, created once.

use ember_types::{Address, H256, H512, H520};
use keccak_hash::keccak;
use lazy_static::lazy_static;
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message as SecpMessage, PublicKey, Secp256k1, SecretKey,
};

lazy_static! {
    pub static ref SECP256K1: Secp256k1<All> = Secp256k1::new();
}

pub type Secret = H256;
pub type Public = H512;
pub type Message = H256;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid secret key")]
    InvalidSecret,
    #[error("invalid message")]
    InvalidMessage,
    #[error("invalid signature")]
    InvalidSignature,
}

impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Self {
        match e {
            secp256k1::Error::InvalidSecretKey => Error::InvalidSecret,
            secp256k1::Error::InvalidMessage => Error::InvalidMessage,
            _ => Error::InvalidSignature,
        }
    }
}

/// A 65-byte recoverable signature laid out as `r || s || recovery_id`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Signature(pub H520);

impl Signature {
    pub fn from_rsv(r: &H256, s: &H256, v: u8) -> Self {
        let mut sig = [0u8; 65];
        sig[0..32].copy_from_slice(r.as_bytes());
        sig[32..64].copy_from_slice(s.as_bytes());
        sig[64] = v;
        Signature(H520(sig))
    }

    pub fn r(&self) -> &[u8] { &self.0[0..32] }

    pub fn s(&self) -> &[u8] { &self.0[32..64] }

    pub fn v(&self) -> u8 { self.0[64] }
}

/// A secret/public key pair with its derived account address.
#[derive(Clone, Debug)]
pub struct KeyPair {
    secret: Secret,
    public: Public,
}

impl KeyPair {
    pub fn from_secret(secret: Secret) -> Result<KeyPair, Error> {
        let sk = SecretKey::from_slice(secret.as_bytes())?;
        let pk = PublicKey::from_secret_key(&SECP256K1, &sk);
        Ok(KeyPair {
            secret,
            public: public_from_key(&pk),
        })
    }

    pub fn secret(&self) -> &Secret { &self.secret }

    pub fn public(&self) -> &Public { &self.public }

    pub fn address(&self) -> Address { public_to_address(&self.public) }
}

fn public_from_key(pk: &PublicKey) -> Public {
    let serialized = pk.serialize_uncompressed();
    let mut public = Public::zero();
    public.as_bytes_mut().copy_from_slice(&serialized[1..65]);
    public
}

/// The low 20 bytes of the keccak of the uncompressed public key.
pub fn public_to_address(public: &Public) -> Address {
    let hash = keccak(public);
    let mut address = Address::zero();
    address.as_bytes_mut().copy_from_slice(&hash[12..]);
    address
}

pub fn sign(secret: &Secret, message: &Message) -> Result<Signature, Error> {
    let sk = SecretKey::from_slice(secret.as_bytes())?;
    let msg = SecpMessage::from_slice(message.as_bytes())?;
    let sig = SECP256K1.sign_ecdsa_recoverable(&msg, &sk);
    let (rec_id, data) = sig.serialize_compact();
    let mut out = [0u8; 65];
    out[0..64].copy_from_slice(&data);
    out[64] = rec_id.to_i32() as u8;
    Ok(Signature(H520(out)))
}

pub fn recover(
    signature: &Signature, message: &Message,
) -> Result<Public, Error> {
    let rec_id = RecoveryId::from_i32(signature.v() as i32)?;
    let sig =
        RecoverableSignature::from_compact(&signature.0[0..64], rec_id)?;
    let msg = SecpMessage::from_slice(message.as_bytes())?;
    let pk = SECP256K1.recover_ecdsa(&msg, &sig)?;
    Ok(public_from_key(&pk))
}
