//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::convert::TryFrom;

use prost::Message;
use rand::{CryptoRng, Rng};

use crate::proto::storage::IdentityKeyPairStructure;
use crate::{KeyPair, PrivateKey, PublicKey, Result, SignalProtocolError};

/// A long-term public identity. Serializes exactly like the [PublicKey] it wraps.
#[derive(Debug, PartialOrd, Ord, PartialEq, Eq, Clone, Copy)]
pub struct IdentityKey(PublicKey);

impl IdentityKey {
    pub fn new(public_key: PublicKey) -> Self {
        Self(public_key)
    }

    pub fn decode(value: &[u8]) -> Result<Self> {
        PublicKey::deserialize(value).map(Self)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.0
    }

    pub fn serialize(&self) -> Box<[u8]> {
        self.0.serialize()
    }
}

impl From<PublicKey> for IdentityKey {
    fn from(public_key: PublicKey) -> Self {
        Self(public_key)
    }
}

impl TryFrom<&[u8]> for IdentityKey {
    type Error = SignalProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        Self::decode(value)
    }
}

/// An [IdentityKey] together with its secret half.
#[derive(Copy, Clone, Debug)]
pub struct IdentityKeyPair {
    public: IdentityKey,
    secret: PrivateKey,
}

impl IdentityKeyPair {
    pub fn new(identity_key: IdentityKey, private_key: PrivateKey) -> Self {
        Self {
            public: identity_key,
            secret: private_key,
        }
    }

    pub fn generate<R: CryptoRng + Rng>(csprng: &mut R) -> Self {
        KeyPair::generate(csprng).into()
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.public
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public.0
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.secret
    }

    pub fn serialize(&self) -> Box<[u8]> {
        let structure = IdentityKeyPairStructure {
            public_key: self.public.serialize().into_vec(),
            private_key: self.secret.serialize(),
        };
        structure.encode_to_vec().into()
    }
}

impl TryFrom<&[u8]> for IdentityKeyPair {
    type Error = SignalProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let structure = IdentityKeyPairStructure::decode(value)?;
        Ok(Self::new(
            IdentityKey::decode(&structure.public_key)?,
            PrivateKey::deserialize(&structure.private_key)?,
        ))
    }
}

impl From<KeyPair> for IdentityKeyPair {
    fn from(pair: KeyPair) -> Self {
        Self::new(IdentityKey(pair.public_key), pair.private_key)
    }
}

impl From<PrivateKey> for IdentityKeyPair {
    fn from(private_key: PrivateKey) -> Self {
        KeyPair::from(private_key).into()
    }
}

impl From<IdentityKeyPair> for KeyPair {
    fn from(pair: IdentityKeyPair) -> Self {
        KeyPair::new(pair.public.0, pair.secret)
    }
}
