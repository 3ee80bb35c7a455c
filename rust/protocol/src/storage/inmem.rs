//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::collections::HashMap;
use std::hash::Hash;

use crate::storage::traits::{
    Direction, IdentityKeyStore, PreKeyStore, ProtocolStore, SenderKeyStore, SessionStore,
    SignedPreKeyStore,
};
use crate::{
    IdentityKey, IdentityKeyPair, PreKeyId, PreKeyRecord, ProtocolAddress, Result, SenderKeyName,
    SenderKeyRecord, SessionRecord, SignalProtocolError, SignedPreKeyId, SignedPreKeyRecord,
};

/// Identity store that trusts whatever key it first sees for an address.
#[derive(Clone)]
pub struct InMemIdentityKeyStore {
    own_identity: IdentityKeyPair,
    registration_id: u32,
    peers: HashMap<ProtocolAddress, IdentityKey>,
}

impl InMemIdentityKeyStore {
    /// A store for `own_identity` that knows no peers yet.
    pub fn new(own_identity: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            own_identity,
            registration_id,
            peers: HashMap::new(),
        }
    }

    /// Forgets every peer identity, so the next key seen for each is trusted again.
    pub fn reset(&mut self) {
        self.peers.clear();
    }
}

impl IdentityKeyStore for InMemIdentityKeyStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        Ok(self.own_identity)
    }

    fn get_local_registration_id(&self) -> Result<u32> {
        Ok(self.registration_id)
    }

    fn save_identity(&mut self, peer: &ProtocolAddress, identity: &IdentityKey) -> Result<bool> {
        let previous = self.peers.insert(peer.clone(), *identity);
        Ok(previous.is_some_and(|previous| previous != *identity))
    }

    fn is_trusted_identity(
        &self,
        peer: &ProtocolAddress,
        identity: &IdentityKey,
        _direction: Direction,
    ) -> Result<bool> {
        Ok(self.peers.get(peer).map_or(true, |known| known == identity))
    }

    fn get_identity(&self, peer: &ProtocolAddress) -> Result<Option<IdentityKey>> {
        Ok(self.peers.get(peer).copied())
    }
}

/// A map of records held in memory. Each record store below is one of these.
#[derive(Clone)]
pub struct InMemRecords<K, V> {
    records: HashMap<K, V>,
}

impl<K: Eq + Hash, V: Clone> InMemRecords<K, V> {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// The keys currently stored, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.records.keys()
    }

    fn get(&self, key: &K) -> Option<V> {
        self.records.get(key).cloned()
    }

    fn put(&mut self, key: K, record: &V) {
        self.records.insert(key, record.clone());
    }
}

impl<K: Eq + Hash, V: Clone> Default for InMemRecords<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// One-time prekeys by id.
pub type InMemPreKeyStore = InMemRecords<PreKeyId, PreKeyRecord>;
/// Signed prekeys by id.
pub type InMemSignedPreKeyStore = InMemRecords<SignedPreKeyId, SignedPreKeyRecord>;
/// Session records by peer address.
pub type InMemSessionStore = InMemRecords<ProtocolAddress, SessionRecord>;
/// Sender key records by group sender.
pub type InMemSenderKeyStore = InMemRecords<SenderKeyName, SenderKeyRecord>;

impl PreKeyStore for InMemPreKeyStore {
    fn get_pre_key(&self, id: PreKeyId) -> Result<PreKeyRecord> {
        self.get(&id).ok_or(SignalProtocolError::InvalidPreKeyId)
    }

    fn save_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<()> {
        self.put(id, record);
        Ok(())
    }

    fn contains_pre_key(&self, id: PreKeyId) -> Result<bool> {
        Ok(self.records.contains_key(&id))
    }

    fn remove_pre_key(&mut self, id: PreKeyId) -> Result<()> {
        self.records.remove(&id);
        Ok(())
    }
}

impl SignedPreKeyStore for InMemSignedPreKeyStore {
    fn get_signed_pre_key(&self, id: SignedPreKeyId) -> Result<SignedPreKeyRecord> {
        self.get(&id)
            .ok_or(SignalProtocolError::InvalidSignedPreKeyId)
    }

    fn get_all_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>> {
        Ok(self.records.values().cloned().collect())
    }

    fn save_signed_pre_key(&mut self, id: SignedPreKeyId, record: &SignedPreKeyRecord)
        -> Result<()> {
        self.put(id, record);
        Ok(())
    }

    fn contains_signed_pre_key(&self, id: SignedPreKeyId) -> Result<bool> {
        Ok(self.records.contains_key(&id))
    }

    fn remove_signed_pre_key(&mut self, id: SignedPreKeyId) -> Result<()> {
        self.records.remove(&id);
        Ok(())
    }
}

impl SessionStore for InMemSessionStore {
    fn load_session(&self, peer: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        Ok(self.get(peer))
    }

    fn store_session(&mut self, peer: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.put(peer.clone(), record);
        Ok(())
    }

    fn contains_session(&self, peer: &ProtocolAddress) -> Result<bool> {
        Ok(self.records.contains_key(peer))
    }

    fn delete_session(&mut self, peer: &ProtocolAddress) -> Result<()> {
        self.records.remove(peer);
        Ok(())
    }

    fn get_sub_device_sessions(&self, name: &str) -> Result<Vec<u32>> {
        let mut devices: Vec<u32> = self
            .records
            .keys()
            .filter(|peer| peer.name() == name)
            .map(ProtocolAddress::device_id)
            .filter(|&device| device != 1)
            .collect();
        devices.sort_unstable();
        Ok(devices)
    }

    fn delete_all_sessions(&mut self) -> Result<()> {
        self.records.clear();
        Ok(())
    }
}

impl SenderKeyStore for InMemSenderKeyStore {
    fn store_sender_key(&mut self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()> {
        self.put(name.clone(), record);
        Ok(())
    }

    fn load_sender_key(&mut self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>> {
        Ok(self.get(name))
    }
}

/// All five in-memory stores for one local identity.
///
/// The fields can be borrowed separately, which is what
/// [SessionBuilder::new](crate::SessionBuilder::new) and
/// [SessionCipher::new](crate::SessionCipher::new) take.
#[derive(Clone)]
pub struct InMemSignalProtocolStore {
    /// Sessions by peer.
    pub sessions: InMemSessionStore,
    /// Our one-time prekeys.
    pub pre_keys: InMemPreKeyStore,
    /// Our signed prekeys.
    pub signed_pre_keys: InMemSignedPreKeyStore,
    /// Our identity and the peer identities we trust.
    pub identities: InMemIdentityKeyStore,
    /// Group sender keys.
    pub sender_keys: InMemSenderKeyStore,
}

impl InMemSignalProtocolStore {
    /// Empty stores for `identity` and `registration_id`.
    pub fn new(identity: IdentityKeyPair, registration_id: u32) -> Result<Self> {
        Ok(Self {
            sessions: InMemSessionStore::new(),
            pre_keys: InMemPreKeyStore::new(),
            signed_pre_keys: InMemSignedPreKeyStore::new(),
            identities: InMemIdentityKeyStore::new(identity, registration_id),
            sender_keys: InMemSenderKeyStore::new(),
        })
    }
}

impl IdentityKeyStore for InMemSignalProtocolStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        self.identities.get_identity_key_pair()
    }

    fn get_local_registration_id(&self) -> Result<u32> {
        self.identities.get_local_registration_id()
    }

    fn save_identity(&mut self, peer: &ProtocolAddress, identity: &IdentityKey) -> Result<bool> {
        self.identities.save_identity(peer, identity)
    }

    fn is_trusted_identity(
        &self,
        peer: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool> {
        self.identities.is_trusted_identity(peer, identity, direction)
    }

    fn get_identity(&self, peer: &ProtocolAddress) -> Result<Option<IdentityKey>> {
        self.identities.get_identity(peer)
    }
}

impl PreKeyStore for InMemSignalProtocolStore {
    fn get_pre_key(&self, id: PreKeyId) -> Result<PreKeyRecord> {
        self.pre_keys.get_pre_key(id)
    }

    fn save_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<()> {
        self.pre_keys.save_pre_key(id, record)
    }

    fn contains_pre_key(&self, id: PreKeyId) -> Result<bool> {
        self.pre_keys.contains_pre_key(id)
    }

    fn remove_pre_key(&mut self, id: PreKeyId) -> Result<()> {
        self.pre_keys.remove_pre_key(id)
    }
}

impl SignedPreKeyStore for InMemSignalProtocolStore {
    fn get_signed_pre_key(&self, id: SignedPreKeyId) -> Result<SignedPreKeyRecord> {
        self.signed_pre_keys.get_signed_pre_key(id)
    }

    fn get_all_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>> {
        self.signed_pre_keys.get_all_signed_pre_keys()
    }

    fn save_signed_pre_key(&mut self, id: SignedPreKeyId, record: &SignedPreKeyRecord)
        -> Result<()> {
        self.signed_pre_keys.save_signed_pre_key(id, record)
    }

    fn contains_signed_pre_key(&self, id: SignedPreKeyId) -> Result<bool> {
        self.signed_pre_keys.contains_signed_pre_key(id)
    }

    fn remove_signed_pre_key(&mut self, id: SignedPreKeyId) -> Result<()> {
        self.signed_pre_keys.remove_signed_pre_key(id)
    }
}

impl SessionStore for InMemSignalProtocolStore {
    fn load_session(&self, peer: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        self.sessions.load_session(peer)
    }

    fn store_session(&mut self, peer: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.sessions.store_session(peer, record)
    }

    fn contains_session(&self, peer: &ProtocolAddress) -> Result<bool> {
        self.sessions.contains_session(peer)
    }

    fn delete_session(&mut self, peer: &ProtocolAddress) -> Result<()> {
        self.sessions.delete_session(peer)
    }

    fn get_sub_device_sessions(&self, name: &str) -> Result<Vec<u32>> {
        self.sessions.get_sub_device_sessions(name)
    }

    fn delete_all_sessions(&mut self) -> Result<()> {
        self.sessions.delete_all_sessions()
    }
}

impl SenderKeyStore for InMemSignalProtocolStore {
    fn store_sender_key(&mut self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()> {
        self.sender_keys.store_sender_key(name, record)
    }

    fn load_sender_key(&mut self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>> {
        self.sender_keys.load_sender_key(name)
    }
}

impl ProtocolStore for InMemSignalProtocolStore {}
