//
// Copyright 2020-2022 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

//! What the protocol needs from the application's storage.
//!
//! Every method is synchronous and takes the store by reference. The session builder and
//! cipher borrow their stores mutably for their whole lifetime, so one caller at a time works
//! on a given set of stores.

use crate::address::{ProtocolAddress, SenderKeyName};
use crate::error::Result;
use crate::sender_keys::SenderKeyRecord;
use crate::state::{PreKeyId, PreKeyRecord, SessionRecord, SignedPreKeyId, SignedPreKeyRecord};
use crate::{IdentityKey, IdentityKeyPair};

/// Which way the message whose identity is being checked is travelling.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    /// We are about to encrypt to the peer.
    Sending,
    /// We just heard from the peer.
    Receiving,
}

/// Our own identity, plus the identities we have accepted for peers.
///
/// A store may trust on first use, or defer to the user. The protocol only asks.
pub trait IdentityKeyStore {
    /// Our long-term identity key pair.
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair>;

    /// Our registration id. Stable for the lifetime of the installation and unrelated to
    /// [ProtocolAddress::device_id].
    fn get_local_registration_id(&self) -> Result<u32>;

    /// Accepts `identity` for `peer`. Returns `true` only when it replaced a different key.
    fn save_identity(&mut self, peer: &ProtocolAddress, identity: &IdentityKey) -> Result<bool>;

    /// Whether `identity` may be used with `peer` for a message going `direction`.
    fn is_trusted_identity(
        &self,
        peer: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool>;

    /// The identity last saved for `peer`.
    fn get_identity(&self, peer: &ProtocolAddress) -> Result<Option<IdentityKey>>;
}

/// Our unused one-time prekeys.
pub trait PreKeyStore {
    /// Fails with [crate::SignalProtocolError::InvalidPreKeyId] for an unknown id.
    fn get_pre_key(&self, id: PreKeyId) -> Result<PreKeyRecord>;

    /// Stores `record` under `id`, replacing any previous record.
    fn save_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<()>;

    /// Whether a record is stored under `id`.
    fn contains_pre_key(&self, id: PreKeyId) -> Result<bool>;

    /// Drops the record under `id`. Called once the prekey has been used. Unknown ids are not
    /// an error.
    fn remove_pre_key(&mut self, id: PreKeyId) -> Result<()>;
}

/// Our signed prekeys.
pub trait SignedPreKeyStore {
    /// Fails with [crate::SignalProtocolError::InvalidSignedPreKeyId] for an unknown id.
    fn get_signed_pre_key(&self, id: SignedPreKeyId) -> Result<SignedPreKeyRecord>;

    /// All stored records, in any order.
    fn get_all_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>>;

    /// Stores `record` under `id`, replacing any previous record.
    fn save_signed_pre_key(&mut self, id: SignedPreKeyId, record: &SignedPreKeyRecord)
        -> Result<()>;

    /// Whether a record is stored under `id`.
    fn contains_signed_pre_key(&self, id: SignedPreKeyId) -> Result<bool>;

    /// Drops the record under `id`.
    fn remove_signed_pre_key(&mut self, id: SignedPreKeyId) -> Result<()>;
}

/// One [SessionRecord] per peer device.
pub trait SessionStore {
    /// The record for `peer`, if one was stored.
    fn load_session(&self, peer: &ProtocolAddress) -> Result<Option<SessionRecord>>;

    /// Stores `record` for `peer`, replacing any previous record.
    fn store_session(&mut self, peer: &ProtocolAddress, record: &SessionRecord) -> Result<()>;

    /// Whether a record is stored for `peer`.
    fn contains_session(&self, peer: &ProtocolAddress) -> Result<bool>;

    /// Drops the record for `peer`.
    fn delete_session(&mut self, peer: &ProtocolAddress) -> Result<()>;

    /// Device ids other than 1 with a record under account `name`.
    fn get_sub_device_sessions(&self, name: &str) -> Result<Vec<u32>>;

    /// Drops every record.
    fn delete_all_sessions(&mut self) -> Result<()>;
}

/// One [SenderKeyRecord] per group sender.
pub trait SenderKeyStore {
    /// Stores `record` for `name`, replacing any previous record.
    fn store_sender_key(&mut self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()>;

    /// The record for `name`, if one was stored.
    fn load_sender_key(&mut self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>>;
}

/// Everything 1:1 sessions need, in one object.
pub trait ProtocolStore: SessionStore + PreKeyStore + SignedPreKeyStore + IdentityKeyStore {}
