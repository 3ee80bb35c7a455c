//
// Copyright 2020-2022 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use prost::Message;

use crate::proto::storage::PreKeyRecordStructure;
use crate::{KeyPair, Result};

/// Names a one-time prekey. Ids fit in 24 bits.
pub type PreKeyId = u32;

/// A one-time prekey. A responder consumes it with the first prekey message that names it.
#[derive(Debug, Clone)]
pub struct PreKeyRecord {
    id: PreKeyId,
    key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn new(id: PreKeyId, key_pair: &KeyPair) -> Self {
        Self {
            id,
            key_pair: *key_pair,
        }
    }

    pub fn id(&self) -> PreKeyId {
        self.id
    }

    pub fn key_pair(&self) -> KeyPair {
        self.key_pair
    }

    pub fn serialize(&self) -> Vec<u8> {
        PreKeyRecordStructure {
            id: self.id,
            public_key: self.key_pair.public_key.serialize().into_vec(),
            private_key: self.key_pair.private_key.serialize(),
        }
        .encode_to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let stored = PreKeyRecordStructure::decode(bytes)?;
        Ok(Self {
            id: stored.id,
            key_pair: KeyPair::from_public_and_private(&stored.public_key, &stored.private_key)?,
        })
    }
}
