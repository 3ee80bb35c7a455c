//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::collections::VecDeque;

use arrayref::array_ref;
use prost::Message;

use crate::consts::limits;
use crate::crypto::{derive_secrets, hmac_sha256};
use crate::proto::storage::sender_key_state_structure as stored;
use crate::proto::storage::{SenderKeyRecordStructure, SenderKeyStateStructure};
use crate::{KeyPair, PrivateKey, PublicKey, Result, SenderKeyName, SignalProtocolError};

fn corrupt(what: &'static str) -> SignalProtocolError {
    SignalProtocolError::InvalidState("sender key state", what.to_owned())
}

/// The IV and cipher key for one group message. Only the seed is persisted.
#[derive(Debug, Clone)]
pub(crate) struct SenderMessageKey {
    iteration: u32,
    seed: [u8; 32],
    iv: [u8; 16],
    cipher_key: [u8; 32],
}

impl SenderMessageKey {
    fn derive(iteration: u32, seed: [u8; 32]) -> Self {
        let okm: [u8; 48] = derive_secrets(&seed, None, b"WhisperGroup");
        Self {
            iteration,
            seed,
            iv: *array_ref![okm, 0, 16],
            cipher_key: *array_ref![okm, 16, 32],
        }
    }

    pub(crate) fn iteration(&self) -> u32 {
        self.iteration
    }

    pub(crate) fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    pub(crate) fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }
}

/// A position on a sender's chain.
#[derive(Debug, Clone)]
pub(crate) struct SenderChainKey {
    iteration: u32,
    seed: [u8; 32],
}

impl SenderChainKey {
    pub(crate) fn new(iteration: u32, seed: [u8; 32]) -> Self {
        Self { iteration, seed }
    }

    pub(crate) fn iteration(&self) -> u32 {
        self.iteration
    }

    pub(crate) fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    pub(crate) fn message_key(&self) -> SenderMessageKey {
        SenderMessageKey::derive(self.iteration, hmac_sha256(&self.seed, &[0x01]))
    }

    pub(crate) fn step(&self) -> Result<Self> {
        let iteration = self
            .iteration
            .checked_add(1)
            .ok_or_else(|| corrupt("chain iteration overflowed"))?;
        Ok(Self::new(iteration, hmac_sha256(&self.seed, &[0x02])))
    }
}

/// One sender's chain within a group: key id, chain position, signing key, cached keys.
#[derive(Debug, Clone)]
pub(crate) struct SenderKeyState {
    structure: SenderKeyStateStructure,
}

impl SenderKeyState {
    fn new(
        key_id: u32,
        chain_key: &SenderChainKey,
        signing_key: PublicKey,
        signing_private_key: Option<PrivateKey>,
    ) -> Self {
        let mut state = Self {
            structure: SenderKeyStateStructure {
                sender_key_id: key_id,
                sender_chain_key: None,
                sender_signing_key: Some(stored::SenderSigningKey {
                    public: signing_key.serialize().into_vec(),
                    private: signing_private_key
                        .map(|key| key.serialize())
                        .unwrap_or_default(),
                }),
                sender_message_keys: Vec::new(),
            },
        };
        state.set_chain_key(chain_key);
        state
    }

    pub(crate) fn key_id(&self) -> u32 {
        self.structure.sender_key_id
    }

    pub(crate) fn chain_key(&self) -> Result<SenderChainKey> {
        let chain = self
            .structure
            .sender_chain_key
            .as_ref()
            .ok_or_else(|| corrupt("no chain key"))?;
        let seed = chain
            .seed
            .as_slice()
            .try_into()
            .map_err(|_| corrupt("chain seed is not 32 bytes"))?;
        Ok(SenderChainKey::new(chain.iteration, seed))
    }

    pub(crate) fn set_chain_key(&mut self, chain_key: &SenderChainKey) {
        self.structure.sender_chain_key = Some(stored::SenderChainKey {
            iteration: chain_key.iteration,
            seed: chain_key.seed.to_vec(),
        });
    }

    pub(crate) fn signing_key(&self) -> Result<PublicKey> {
        let signing = self
            .structure
            .sender_signing_key
            .as_ref()
            .ok_or_else(|| corrupt("no signing key"))?;
        PublicKey::deserialize(&signing.public)
    }

    /// Only states we created ourselves can sign.
    pub(crate) fn signing_private_key(&self) -> Result<Option<PrivateKey>> {
        match &self.structure.sender_signing_key {
            Some(signing) if !signing.private.is_empty() => {
                PrivateKey::deserialize(&signing.private).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn cache_message_key(&mut self, key: &SenderMessageKey) {
        let cache = &mut self.structure.sender_message_keys;
        cache.push(stored::SenderMessageKey {
            iteration: key.iteration,
            seed: key.seed.to_vec(),
        });
        if cache.len() > limits::MAX_MESSAGE_KEYS {
            cache.remove(0);
        }
    }

    fn take_message_key(&mut self, iteration: u32) -> Result<Option<SenderMessageKey>> {
        let cache = &mut self.structure.sender_message_keys;
        let Some(at) = cache.iter().position(|key| key.iteration == iteration) else {
            return Ok(None);
        };
        let key = cache.remove(at);
        let seed = key
            .seed
            .as_slice()
            .try_into()
            .map_err(|_| corrupt("cached message key seed is not 32 bytes"))?;
        Ok(Some(SenderMessageKey::derive(key.iteration, seed)))
    }

    /// The key for message `iteration`, moving the chain past it.
    ///
    /// Iterations skipped over are cached, and one behind the chain is only available from that
    /// cache.
    pub(crate) fn message_key_for(
        &mut self,
        iteration: u32,
        name: &SenderKeyName,
    ) -> Result<SenderMessageKey> {
        let mut chain_key = self.chain_key()?;
        let current = chain_key.iteration();

        if iteration < current {
            return self.take_message_key(iteration)?.ok_or_else(|| {
                log::info!("{name} repeated iteration {iteration}, chain is at {current}");
                SignalProtocolError::DuplicatedMessage(current, iteration)
            });
        }

        let jump = iteration - current;
        if jump as usize > limits::MAX_SENDER_KEY_FORWARD_JUMPS {
            log::error!(
                "{name} jumped {jump} iterations ahead of {current}, more than {}",
                limits::MAX_SENDER_KEY_FORWARD_JUMPS
            );
            return Err(SignalProtocolError::TooManyMessages(jump));
        }

        while chain_key.iteration() < iteration {
            self.cache_message_key(&chain_key.message_key());
            chain_key = chain_key.step()?;
        }
        self.set_chain_key(&chain_key.step()?);
        Ok(chain_key.message_key())
    }
}

/// Every known chain for one group sender. The first state is current. New states are
/// appended and the oldest is dropped once there are too many.
#[derive(Debug, Clone, Default)]
pub struct SenderKeyRecord {
    states: VecDeque<SenderKeyState>,
}

impl SenderKeyRecord {
    pub fn new_empty() -> Self {
        Self::default()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let structure = SenderKeyRecordStructure::decode(bytes)?;
        Ok(Self {
            states: structure
                .sender_key_states
                .into_iter()
                .map(|structure| SenderKeyState { structure })
                .collect(),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        SenderKeyRecordStructure {
            sender_key_states: self
                .states
                .iter()
                .map(|state| state.structure.clone())
                .collect(),
        }
        .encode_to_vec()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub(crate) fn current_state(&self) -> Result<&SenderKeyState> {
        self.states
            .front()
            .ok_or(SignalProtocolError::NoSenderKeyState)
    }

    pub(crate) fn current_state_mut(&mut self) -> Result<&mut SenderKeyState> {
        self.states
            .front_mut()
            .ok_or(SignalProtocolError::NoSenderKeyState)
    }

    pub(crate) fn state_for_key_id(&mut self, key_id: u32) -> Result<&mut SenderKeyState> {
        let known: Vec<u32> = self.states.iter().map(SenderKeyState::key_id).collect();
        match self.states.iter_mut().find(|state| state.key_id() == key_id) {
            Some(state) => Ok(state),
            None => {
                log::error!("no sender key state with id {key_id}, have {known:?}");
                Err(SignalProtocolError::NoSenderKeyState)
            }
        }
    }

    /// Appends a state that can only verify and decrypt.
    pub(crate) fn add_peer_state(
        &mut self,
        key_id: u32,
        chain_key: &SenderChainKey,
        signing_key: PublicKey,
    ) {
        self.push_state(SenderKeyState::new(key_id, chain_key, signing_key, None));
    }

    /// Replaces every state with one we author.
    pub(crate) fn reset_to_own_state(
        &mut self,
        key_id: u32,
        chain_key: &SenderChainKey,
        signing_key: &KeyPair,
    ) {
        self.states.clear();
        self.push_state(SenderKeyState::new(
            key_id,
            chain_key,
            signing_key.public_key,
            Some(signing_key.private_key),
        ));
    }

    fn push_state(&mut self, state: SenderKeyState) {
        self.states.push_back(state);
        while self.states.len() > limits::MAX_SENDER_KEY_STATES {
            self.states.pop_front();
        }
    }
}
