//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::fmt;

use arrayref::array_ref;

use crate::proto::storage::session_structure::chain::MessageKey;
use crate::{crypto, PrivateKey, PublicKey, Result, SignalProtocolError};

/// The cipher key, MAC key and IV for a single message.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MessageKeys {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
    iv: [u8; 16],
    counter: u32,
}

impl MessageKeys {
    fn expand(seed: &[u8; 32], counter: u32) -> Self {
        let okm: [u8; 80] = crypto::derive_secrets(seed, None, b"WhisperMessageKeys");
        Self {
            cipher_key: *array_ref![okm, 0, 32],
            mac_key: *array_ref![okm, 32, 32],
            iv: *array_ref![okm, 64, 16],
            counter,
        }
    }

    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    pub fn mac_key(&self) -> &[u8; 32] {
        &self.mac_key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    /// The chain index these keys were derived at.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub(crate) fn to_stored(self) -> MessageKey {
        MessageKey {
            index: self.counter,
            cipher_key: self.cipher_key.to_vec(),
            mac_key: self.mac_key.to_vec(),
            iv: self.iv.to_vec(),
        }
    }

    pub(crate) fn from_stored(stored: &MessageKey) -> Result<Self> {
        fn exact<const N: usize>(bytes: &[u8], what: &'static str) -> Result<[u8; N]> {
            bytes
                .try_into()
                .map_err(|_| SignalProtocolError::InvalidSessionStructure(what))
        }
        Ok(Self {
            cipher_key: exact(&stored.cipher_key, "cached cipher key has the wrong length")?,
            mac_key: exact(&stored.mac_key, "cached MAC key has the wrong length")?,
            iv: exact(&stored.iv, "cached IV has the wrong length")?,
            counter: stored.index,
        })
    }
}

impl fmt::Debug for MessageKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageKeys {{ counter: {}, .. }}", self.counter)
    }
}

/// One link of a symmetric chain. HMAC with seed 0x01 yields message keys, 0x02 the next link.
#[derive(Clone, Debug)]
pub(crate) struct ChainKey {
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    pub(crate) fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    pub(crate) fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn next(&self) -> Self {
        Self::new(crypto::hmac_sha256(&self.key, &[0x02]), self.index + 1)
    }

    pub(crate) fn message_keys(&self) -> MessageKeys {
        MessageKeys::expand(&crypto::hmac_sha256(&self.key, &[0x01]), self.index)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RootKey([u8; 32]);

impl RootKey {
    pub(crate) fn new(key: [u8; 32]) -> Self {
        Self(key)
    }

    pub(crate) fn key(&self) -> &[u8; 32] {
        &self.0
    }

    /// Mixes one ratchet agreement into the root, giving the next root and a fresh chain.
    pub(crate) fn derive_chain(&self, peer: &PublicKey, local: &PrivateKey) -> (RootKey, ChainKey) {
        let agreement = local.calculate_agreement(peer);
        let okm: [u8; 64] = crypto::derive_secrets(&agreement, Some(&self.0), b"WhisperRatchet");
        (
            RootKey(*array_ref![okm, 0, 32]),
            ChainKey::new(*array_ref![okm, 32, 32], 0),
        )
    }
}
