//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::collections::VecDeque;

use prost::Message;
use rand::{CryptoRng, Rng};

use crate::consts::{limits, MEDIUM_MAX_VALUE};
use crate::proto::storage::session_structure::{self, Chain};
use crate::proto::storage::{RecordStructure, SessionStructure};
use crate::ratchet::{ChainKey, MessageKeys, RootKey};
use crate::state::{PreKeyId, SignedPreKeyId};
use crate::{
    IdentityKey, IdentityKeyPair, KeyPair, PrivateKey, PublicKey, Result, SignalProtocolError,
};

/// What an initiator repeats in every outgoing message until the peer first replies.
#[derive(Debug, Clone)]
pub(crate) struct PendingPreKey {
    pub(crate) pre_key_id: Option<PreKeyId>,
    pub(crate) signed_pre_key_id: SignedPreKeyId,
    pub(crate) base_key: PublicKey,
}

/// Local half of an interactive key exchange awaiting the peer's response.
#[derive(Debug, Clone)]
pub struct PendingKeyExchange {
    pub sequence: u32,
    pub local_base_key: KeyPair,
    pub local_ratchet_key: KeyPair,
    pub local_identity_key: IdentityKeyPair,
}

fn corrupt(what: &'static str) -> SignalProtocolError {
    SignalProtocolError::InvalidSessionStructure(what)
}

fn stored_chain_key(chain_key: &ChainKey) -> Option<session_structure::chain::ChainKey> {
    Some(session_structure::chain::ChainKey {
        index: chain_key.index(),
        key: chain_key.key().to_vec(),
    })
}

fn load_chain_key(chain: &Chain) -> Result<ChainKey> {
    let stored = chain
        .chain_key
        .as_ref()
        .ok_or_else(|| corrupt("chain has no chain key"))?;
    let key = stored
        .key
        .as_slice()
        .try_into()
        .map_err(|_| corrupt("chain key is not 32 bytes"))?;
    Ok(ChainKey::new(key, stored.index))
}

/// The double-ratchet state shared with one peer device.
#[derive(Clone, Debug)]
pub struct SessionState {
    structure: SessionStructure,
}

impl SessionState {
    pub(crate) fn new(
        version: u8,
        local_identity: &IdentityKey,
        remote_identity: &IdentityKey,
        root_key: &RootKey,
        base_key: &PublicKey,
    ) -> Self {
        Self {
            structure: SessionStructure {
                session_version: version.into(),
                local_identity_public: local_identity.serialize().into_vec(),
                remote_identity_public: remote_identity.serialize().into_vec(),
                root_key: root_key.key().to_vec(),
                alice_base_key: base_key.serialize().into_vec(),
                ..Default::default()
            },
        }
    }

    pub(crate) fn with_receiving_chain(mut self, ratchet_key: &PublicKey, chain: &ChainKey) -> Self {
        self.push_receiving_chain(ratchet_key, chain);
        self
    }

    pub(crate) fn with_sending_chain(mut self, ratchet_pair: &KeyPair, chain: &ChainKey) -> Self {
        self.install_sending_chain(ratchet_pair, chain);
        self
    }

    /// The initiator's base key, as serialized. Identifies which handshake built this state.
    pub(crate) fn base_key_bytes(&self) -> &[u8] {
        &self.structure.alice_base_key
    }

    /// Records written before versions were stored are version 2.
    pub fn session_version(&self) -> u32 {
        match self.structure.session_version {
            0 => 2,
            version => version,
        }
    }

    pub fn remote_identity_key(&self) -> Result<Option<IdentityKey>> {
        let bytes = &self.structure.remote_identity_public;
        if bytes.is_empty() {
            return Ok(None);
        }
        IdentityKey::decode(bytes).map(Some)
    }

    pub fn local_identity_key(&self) -> Result<IdentityKey> {
        IdentityKey::decode(&self.structure.local_identity_public)
    }

    pub(crate) fn previous_counter(&self) -> u32 {
        self.structure.previous_counter
    }

    fn root_key(&self) -> Result<RootKey> {
        let key = self
            .structure
            .root_key
            .as_slice()
            .try_into()
            .map_err(|_| corrupt("root key is not 32 bytes"))?;
        Ok(RootKey::new(key))
    }

    fn sending_chain(&self) -> Result<&Chain> {
        self.structure
            .sender_chain
            .as_ref()
            .ok_or_else(|| corrupt("no sending chain"))
    }

    pub fn has_sender_chain(&self) -> bool {
        self.structure.sender_chain.is_some()
    }

    /// Our current ratchet public key, sent in every outgoing message.
    pub(crate) fn local_ratchet_key(&self) -> Result<PublicKey> {
        PublicKey::deserialize(&self.sending_chain()?.sender_ratchet_key)
    }

    pub(crate) fn ratchet_key_hex(&self) -> String {
        match self.local_ratchet_key() {
            Ok(key) => hex::encode(key.public_key_bytes()),
            Err(e) => format!("<{e}>"),
        }
    }

    pub(crate) fn sending_chain_key(&self) -> Result<ChainKey> {
        load_chain_key(self.sending_chain()?)
    }

    pub(crate) fn store_sending_chain_key(&mut self, chain_key: &ChainKey) -> Result<()> {
        let chain = self
            .structure
            .sender_chain
            .as_mut()
            .ok_or_else(|| corrupt("no sending chain"))?;
        chain.chain_key = stored_chain_key(chain_key);
        Ok(())
    }

    fn install_sending_chain(&mut self, ratchet_pair: &KeyPair, chain_key: &ChainKey) {
        self.structure.sender_chain = Some(Chain {
            sender_ratchet_key: ratchet_pair.public_key.serialize().into_vec(),
            sender_ratchet_key_private: ratchet_pair.private_key.serialize(),
            chain_key: stored_chain_key(chain_key),
            message_keys: Vec::new(),
        });
    }

    pub(crate) fn receiving_chain_count(&self) -> usize {
        self.structure.receiver_chains.len()
    }

    fn receiving_chain(&self, ratchet_key: &PublicKey) -> Option<&Chain> {
        let wanted = ratchet_key.serialize();
        self.structure
            .receiver_chains
            .iter()
            .find(|chain| chain.sender_ratchet_key[..] == wanted[..])
    }

    fn receiving_chain_mut(&mut self, ratchet_key: &PublicKey) -> Result<&mut Chain> {
        let wanted = ratchet_key.serialize();
        self.structure
            .receiver_chains
            .iter_mut()
            .find(|chain| chain.sender_ratchet_key[..] == wanted[..])
            .ok_or_else(|| corrupt("no receiving chain for ratchet key"))
    }

    pub(crate) fn receiving_chain_key(&self, ratchet_key: &PublicKey) -> Result<Option<ChainKey>> {
        self.receiving_chain(ratchet_key)
            .map(load_chain_key)
            .transpose()
    }

    pub(crate) fn store_receiving_chain_key(
        &mut self,
        ratchet_key: &PublicKey,
        chain_key: &ChainKey,
    ) -> Result<()> {
        self.receiving_chain_mut(ratchet_key)?.chain_key = stored_chain_key(chain_key);
        Ok(())
    }

    /// Appends a chain for a peer ratchet key. The oldest chain goes once there are too many.
    fn push_receiving_chain(&mut self, ratchet_key: &PublicKey, chain_key: &ChainKey) {
        let chains = &mut self.structure.receiver_chains;
        chains.push(Chain {
            sender_ratchet_key: ratchet_key.serialize().into_vec(),
            sender_ratchet_key_private: Vec::new(),
            chain_key: stored_chain_key(chain_key),
            message_keys: Vec::new(),
        });
        if chains.len() > limits::MAX_RECEIVING_CHAINS {
            chains.remove(0);
            log::warn!(
                "dropped oldest receiving chain of session with ratchet key {}",
                self.ratchet_key_hex()
            );
        }
    }

    /// Removes and returns the cached keys for `counter` on the chain of `ratchet_key`.
    pub(crate) fn take_skipped_keys(
        &mut self,
        ratchet_key: &PublicKey,
        counter: u32,
    ) -> Result<Option<MessageKeys>> {
        let Ok(chain) = self.receiving_chain_mut(ratchet_key) else {
            return Ok(None);
        };
        match chain.message_keys.iter().position(|keys| keys.index == counter) {
            Some(at) => MessageKeys::from_stored(&chain.message_keys.remove(at)).map(Some),
            None => Ok(None),
        }
    }

    /// Caches keys for a message not yet received. The oldest cached key goes beyond the cap.
    pub(crate) fn cache_skipped_keys(
        &mut self,
        ratchet_key: &PublicKey,
        keys: MessageKeys,
    ) -> Result<()> {
        let cache = &mut self.receiving_chain_mut(ratchet_key)?.message_keys;
        cache.push(keys.to_stored());
        if cache.len() > limits::MAX_MESSAGE_KEYS {
            cache.remove(0);
        }
        Ok(())
    }

    /// Runs a DH ratchet step for a peer ratchet key we have no chain for.
    ///
    /// The new receiving chain is derived with our current ratchet key, after which a fresh
    /// ratchet key pair and sending chain replace the current ones. Returns the receiving chain.
    pub(crate) fn step_ratchet<R: Rng + CryptoRng>(
        &mut self,
        peer_ratchet_key: &PublicKey,
        csprng: &mut R,
    ) -> Result<ChainKey> {
        let local_ratchet =
            PrivateKey::deserialize(&self.sending_chain()?.sender_ratchet_key_private)?;
        let (root_key, receiving) = self
            .root_key()?
            .derive_chain(peer_ratchet_key, &local_ratchet);

        let next_ratchet = KeyPair::generate(csprng);
        let (root_key, sending) = root_key.derive_chain(peer_ratchet_key, &next_ratchet.private_key);

        self.structure.previous_counter = self.sending_chain_key()?.index().saturating_sub(1);
        self.structure.root_key = root_key.key().to_vec();
        self.push_receiving_chain(peer_ratchet_key, &receiving);
        self.install_sending_chain(&next_ratchet, &sending);
        Ok(receiving)
    }

    pub(crate) fn mark_pending_pre_key(&mut self, pending: &PendingPreKey) {
        self.structure.pending_pre_key = Some(session_structure::PendingPreKey {
            pre_key_id: pending.pre_key_id,
            signed_pre_key_id: pending.signed_pre_key_id as i32,
            base_key: pending.base_key.serialize().into_vec(),
        });
    }

    /// The pending prekey reference, if the peer has not replied yet. The reserved
    /// [MEDIUM_MAX_VALUE] id reads back as no one-time prekey.
    pub(crate) fn pending_pre_key(&self) -> Result<Option<PendingPreKey>> {
        self.structure
            .pending_pre_key
            .as_ref()
            .map(|stored| {
                Ok(PendingPreKey {
                    pre_key_id: stored.pre_key_id.filter(|&id| id != MEDIUM_MAX_VALUE),
                    signed_pre_key_id: stored.signed_pre_key_id as SignedPreKeyId,
                    base_key: PublicKey::deserialize(&stored.base_key)?,
                })
            })
            .transpose()
    }

    pub(crate) fn acknowledge_pre_key(&mut self) {
        self.structure.pending_pre_key = None;
    }

    pub fn set_pending_key_exchange(&mut self, exchange: &PendingKeyExchange) {
        let identity = &exchange.local_identity_key;
        self.structure.pending_key_exchange = Some(session_structure::PendingKeyExchange {
            sequence: exchange.sequence,
            local_base_key: exchange.local_base_key.public_key.serialize().into_vec(),
            local_base_key_private: exchange.local_base_key.private_key.serialize(),
            local_ratchet_key: exchange.local_ratchet_key.public_key.serialize().into_vec(),
            local_ratchet_key_private: exchange.local_ratchet_key.private_key.serialize(),
            local_identity_key: identity.identity_key().serialize().into_vec(),
            local_identity_key_private: identity.private_key().serialize(),
        });
    }

    pub fn pending_key_exchange(&self) -> Result<Option<PendingKeyExchange>> {
        let Some(stored) = &self.structure.pending_key_exchange else {
            return Ok(None);
        };
        let pair = KeyPair::from_public_and_private;
        Ok(Some(PendingKeyExchange {
            sequence: stored.sequence,
            local_base_key: pair(&stored.local_base_key, &stored.local_base_key_private)?,
            local_ratchet_key: pair(&stored.local_ratchet_key, &stored.local_ratchet_key_private)?,
            local_identity_key: pair(
                &stored.local_identity_key,
                &stored.local_identity_key_private,
            )?
            .into(),
        }))
    }

    pub fn has_pending_key_exchange(&self) -> bool {
        self.structure.pending_key_exchange.is_some()
    }

    pub fn needs_refresh(&self) -> bool {
        self.structure.needs_refresh
    }

    pub fn set_needs_refresh(&mut self, needs_refresh: bool) {
        self.structure.needs_refresh = needs_refresh;
    }

    pub(crate) fn set_registration_ids(&mut self, local: u32, remote: u32) {
        self.structure.local_registration_id = local;
        self.structure.remote_registration_id = remote;
    }

    pub fn local_registration_id(&self) -> u32 {
        self.structure.local_registration_id
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.structure.remote_registration_id
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.structure.encode_to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let structure = SessionStructure::decode(bytes)?;
        Ok(Self { structure })
    }

    fn summary(&self) -> String {
        format!(
            "v{} base {} ratchet {} ({} receiving chains)",
            self.session_version(),
            hex::encode(self.base_key_bytes()),
            self.ratchet_key_hex(),
            self.receiving_chain_count()
        )
    }
}

/// The live session with a peer device, followed by the sessions it superseded, newest first.
#[derive(Clone, Debug, Default)]
pub struct SessionRecord {
    current: Option<SessionState>,
    archived: VecDeque<SessionState>,
}

impl From<SessionState> for SessionRecord {
    fn from(state: SessionState) -> Self {
        Self {
            current: Some(state),
            archived: VecDeque::new(),
        }
    }
}

impl SessionRecord {
    pub fn new_fresh() -> Self {
        Self::default()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let RecordStructure {
            current_session,
            previous_sessions,
        } = RecordStructure::decode(bytes)?;
        let wrap = |structure| SessionState { structure };
        Ok(Self {
            current: current_session.map(wrap),
            archived: previous_sessions.into_iter().map(wrap).collect(),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let unwrap = |state: &SessionState| state.structure.clone();
        RecordStructure {
            current_session: self.current.as_ref().map(unwrap),
            previous_sessions: self.archived.iter().map(unwrap).collect(),
        }
        .encode_to_vec()
    }

    /// True until the first session is installed.
    pub fn is_fresh(&self) -> bool {
        self.current.is_none()
    }

    pub fn session_state(&self) -> Option<&SessionState> {
        self.current.as_ref()
    }

    pub fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current.as_mut()
    }

    pub fn archived_states(&self) -> impl ExactSizeIterator<Item = &SessionState> {
        self.archived.iter()
    }

    /// Whether the current or an archived state came from a handshake with this base key.
    pub(crate) fn has_state_for_base_key(&self, version: u32, base_key: &[u8]) -> bool {
        self.current
            .iter()
            .chain(&self.archived)
            .any(|state| state.session_version() == version && state.base_key_bytes() == base_key)
    }

    /// Replaces the current state without archiving it.
    pub(crate) fn update_current(&mut self, state: SessionState) {
        self.current = Some(state);
    }

    /// Takes archived state `index` out of the archive and makes `updated` current.
    pub(crate) fn restore_archived(&mut self, index: usize, updated: SessionState) -> Result<()> {
        if self.archived.remove(index).is_none() {
            return Err(SignalProtocolError::InvalidState(
                "restore_archived",
                format!("no archived state {index}"),
            ));
        }
        self.install_state(updated);
        Ok(())
    }

    /// Archives the current state, if any, and makes `state` current.
    pub fn install_state(&mut self, state: SessionState) {
        self.archive_current_state();
        self.current = Some(state);
    }

    pub fn archive_current_state(&mut self) {
        let Some(current) = self.current.take() else {
            log::debug!("nothing to archive, record is fresh");
            return;
        };
        self.archived.push_front(current);
        if self.archived.len() > limits::MAX_ARCHIVED_STATES {
            self.archived.pop_back();
            log::info!("dropped oldest archived session state");
        }
    }

    pub fn local_registration_id(&self) -> Option<u32> {
        self.session_state().map(|state| state.local_registration_id())
    }

    pub fn remote_registration_id(&self) -> Option<u32> {
        self.session_state().map(|state| state.remote_registration_id())
    }

    pub fn session_version(&self) -> Option<u32> {
        self.session_state().map(|state| state.session_version())
    }

    /// Whether the current state can encrypt.
    pub fn has_usable_sender_chain(&self) -> bool {
        self.session_state().is_some_and(SessionState::has_sender_chain)
    }

    pub fn is_local_ratchet_key(&self, key: &PublicKey) -> Result<bool> {
        match self.session_state() {
            Some(state) => Ok(state.local_ratchet_key()? == *key),
            None => Ok(false),
        }
    }

    fn require_current(&self) -> Result<&SessionState> {
        self.session_state()
            .ok_or_else(|| SignalProtocolError::InvalidState("chain key lookup", "fresh record".into()))
    }

    pub fn sending_chain_key_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.require_current()?.sending_chain_key()?.key().to_vec())
    }

    pub fn receiving_chain_key_bytes(&self, ratchet_key: &PublicKey) -> Result<Option<Vec<u8>>> {
        let chain_key = self.require_current()?.receiving_chain_key(ratchet_key)?;
        Ok(chain_key.map(|chain_key| chain_key.key().to_vec()))
    }

    /// One line per state, for logging failed decrypts. Holds no secrets.
    pub(crate) fn describe(&self) -> String {
        let current = match &self.current {
            Some(state) => state.summary(),
            None => "none".to_owned(),
        };
        let mut out = format!("current: {current}");
        for (index, state) in self.archived.iter().enumerate() {
            out.push_str(&format!("\narchived {index}: {}", state.summary()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;
    use crate::protocol::CIPHERTEXT_MESSAGE_CURRENT_VERSION;

    const CURRENT: u32 = CIPHERTEXT_MESSAGE_CURRENT_VERSION as u32;

    fn sample_state() -> SessionState {
        let local = IdentityKeyPair::generate(&mut OsRng);
        let remote = IdentityKeyPair::generate(&mut OsRng);
        SessionState::new(
            CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            local.identity_key(),
            remote.identity_key(),
            &RootKey::new([1; 32]),
            &KeyPair::generate(&mut OsRng).public_key,
        )
        .with_sending_chain(&KeyPair::generate(&mut OsRng), &ChainKey::new([2; 32], 0))
    }

    fn fresh_key() -> PublicKey {
        KeyPair::generate(&mut OsRng).public_key
    }

    #[test]
    fn sixth_receiving_chain_evicts_the_first() -> Result<()> {
        let mut state = sample_state();
        let ratchet_keys: Vec<_> = (0..=limits::MAX_RECEIVING_CHAINS).map(|_| fresh_key()).collect();
        for key in &ratchet_keys {
            state.push_receiving_chain(key, &ChainKey::new([9; 32], 0));
        }

        assert_eq!(state.receiving_chain_count(), limits::MAX_RECEIVING_CHAINS);
        assert!(state.receiving_chain_key(&ratchet_keys[0])?.is_none());
        assert!(state.receiving_chain_key(&ratchet_keys[1])?.is_some());
        assert!(state
            .receiving_chain_key(&ratchet_keys[limits::MAX_RECEIVING_CHAINS])?
            .is_some());
        Ok(())
    }

    #[test]
    fn skipped_key_cache_drops_oldest_and_hands_keys_out_once() -> Result<()> {
        let mut state = sample_state();
        let peer = fresh_key();
        let mut chain_key = ChainKey::new([3; 32], 0);
        state.push_receiving_chain(&peer, &chain_key);

        for _ in 0..=limits::MAX_MESSAGE_KEYS {
            state.cache_skipped_keys(&peer, chain_key.message_keys())?;
            chain_key = chain_key.next();
        }

        assert!(state.take_skipped_keys(&peer, 0)?.is_none());
        let keys = state.take_skipped_keys(&peer, 1)?.expect("cached");
        assert_eq!(keys.counter(), 1);
        assert!(state.take_skipped_keys(&peer, 1)?.is_none());
        assert!(state.take_skipped_keys(&fresh_key(), 2)?.is_none());
        Ok(())
    }

    #[test]
    fn ratchet_step_replaces_sending_chain() -> Result<()> {
        let mut state = sample_state();
        state.store_sending_chain_key(&ChainKey::new([2; 32], 7))?;
        let before = state.local_ratchet_key()?;
        let peer = fresh_key();

        let receiving = state.step_ratchet(&peer, &mut OsRng)?;

        assert_eq!(receiving.index(), 0);
        assert_eq!(state.previous_counter(), 6);
        assert_ne!(state.local_ratchet_key()?, before);
        assert_eq!(state.sending_chain_key()?.index(), 0);
        assert_eq!(
            state.receiving_chain_key(&peer)?.map(|c| *c.key()),
            Some(*receiving.key())
        );
        Ok(())
    }

    #[test]
    fn archive_keeps_forty_states() {
        let mut record = SessionRecord::new_fresh();
        record.archive_current_state();
        assert!(record.is_fresh());
        assert_eq!(record.archived_states().len(), 0);

        for _ in 0..limits::MAX_ARCHIVED_STATES + 2 {
            record.install_state(sample_state());
        }
        assert!(!record.is_fresh());
        assert_eq!(record.archived_states().len(), limits::MAX_ARCHIVED_STATES);
    }

    #[test]
    fn record_storage_form_keeps_archive_and_pending_prekey() -> Result<()> {
        let mut first = sample_state();
        first.set_registration_ids(11, 77);
        first.mark_pending_pre_key(&PendingPreKey {
            pre_key_id: Some(5),
            signed_pre_key_id: 9,
            base_key: fresh_key(),
        });
        let mut record = SessionRecord::from(first);
        record.install_state(sample_state());

        let restored = SessionRecord::deserialize(&record.serialize())?;
        assert_eq!(restored.serialize(), record.serialize());

        let archived = restored.archived_states().next().expect("one archived state");
        assert_eq!(archived.remote_registration_id(), 77);
        assert_eq!(archived.local_registration_id(), 11);
        let pending = archived.pending_pre_key()?.expect("pending prekey");
        assert_eq!((pending.pre_key_id, pending.signed_pre_key_id), (Some(5), 9));
        Ok(())
    }

    #[test]
    fn base_key_lookup_searches_the_archive() {
        let original = sample_state();
        let base_key = original.base_key_bytes().to_vec();
        let mut record = SessionRecord::from(original);
        record.install_state(sample_state());

        assert!(record.has_state_for_base_key(CURRENT, &base_key));
        assert!(!record.has_state_for_base_key(2, &base_key));
        assert!(!record.has_state_for_base_key(CURRENT, &[5; 33]));
    }

    #[test]
    fn restoring_an_archived_state_archives_the_current_one() -> Result<()> {
        let old = sample_state();
        let old_base = old.base_key_bytes().to_vec();
        let mut record = SessionRecord::from(old.clone());
        let newer = sample_state();
        let newer_base = newer.base_key_bytes().to_vec();
        record.install_state(newer);

        record.restore_archived(0, old)?;
        let current = record.session_state().expect("current");
        assert_eq!(current.base_key_bytes(), &old_base[..]);
        let archived: Vec<_> = record.archived_states().collect();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].base_key_bytes(), &newer_base[..]);

        assert!(matches!(
            record.restore_archived(3, sample_state()),
            Err(SignalProtocolError::InvalidState(..))
        ));
        Ok(())
    }

    #[test]
    fn pending_key_exchange_storage_form() -> Result<()> {
        let mut state = sample_state();
        assert!(!state.has_pending_key_exchange());

        let exchange = PendingKeyExchange {
            sequence: 17,
            local_base_key: KeyPair::generate(&mut OsRng),
            local_ratchet_key: KeyPair::generate(&mut OsRng),
            local_identity_key: IdentityKeyPair::generate(&mut OsRng),
        };
        state.set_pending_key_exchange(&exchange);
        state.set_needs_refresh(true);

        let restored = SessionState::deserialize(&state.serialize())?;
        assert!(restored.needs_refresh());
        let loaded = restored.pending_key_exchange()?.expect("exchange stored");
        assert_eq!(loaded.sequence, 17);
        assert_eq!(loaded.local_base_key.public_key, exchange.local_base_key.public_key);
        assert_eq!(
            loaded.local_ratchet_key.public_key,
            exchange.local_ratchet_key.public_key
        );
        assert_eq!(
            loaded.local_identity_key.identity_key(),
            exchange.local_identity_key.identity_key()
        );
        Ok(())
    }

    #[test]
    fn reserved_pre_key_id_reads_back_as_none() -> Result<()> {
        let mut state = sample_state();
        let base_key = fresh_key();
        state.mark_pending_pre_key(&PendingPreKey {
            pre_key_id: Some(MEDIUM_MAX_VALUE),
            signed_pre_key_id: 3,
            base_key,
        });
        let pending = state.pending_pre_key()?.expect("pending");
        assert_eq!(pending.pre_key_id, None);
        assert_eq!(pending.base_key, base_key);

        state.acknowledge_pre_key();
        assert!(state.pending_pre_key()?.is_none());
        Ok(())
    }
}
