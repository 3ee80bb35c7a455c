//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use prost::Message;

use crate::proto::storage::SignedPreKeyRecordStructure;
use crate::{KeyPair, Result};

pub type SignedPreKeyId = u32;

/// A medium-term prekey, published with a signature by the identity key.
#[derive(Debug, Clone)]
pub struct SignedPreKeyRecord {
    id: SignedPreKeyId,
    /// Milliseconds since the Unix epoch.
    timestamp: u64,
    key_pair: KeyPair,
    signature: Vec<u8>,
}

impl SignedPreKeyRecord {
    pub fn new(id: SignedPreKeyId, timestamp: u64, key_pair: &KeyPair, signature: &[u8]) -> Self {
        Self {
            id,
            timestamp,
            key_pair: *key_pair,
            signature: signature.to_vec(),
        }
    }

    pub fn id(&self) -> SignedPreKeyId {
        self.id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn key_pair(&self) -> KeyPair {
        self.key_pair
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn serialize(&self) -> Vec<u8> {
        SignedPreKeyRecordStructure {
            id: self.id,
            public_key: self.key_pair.public_key.serialize().into_vec(),
            private_key: self.key_pair.private_key.serialize(),
            signature: self.signature.clone(),
            timestamp: self.timestamp,
        }
        .encode_to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let stored = SignedPreKeyRecordStructure::decode(bytes)?;
        Ok(Self {
            id: stored.id,
            timestamp: stored.timestamp,
            key_pair: KeyPair::from_public_and_private(&stored.public_key, &stored.private_key)?,
            signature: stored.signature,
        })
    }
}
