//
// Copyright 2020-2022 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use rand::{CryptoRng, Rng};

use crate::consts::MEDIUM_MAX_VALUE;
use crate::ratchet::{self, InitiatorKeys, ResponderKeys};
use crate::state::PendingPreKey;
use crate::{
    Direction, IdentityKey, IdentityKeyStore, KeyPair, PreKeyBundle, PreKeyId,
    PreKeySignalMessage, PreKeyStore, ProtocolAddress, Result, SessionRecord, SessionStore,
    SignalProtocolError, SignedPreKeyStore,
};

/// The four stores a 1:1 session touches, borrowed together.
///
/// [SessionBuilder] and [crate::SessionCipher] each hold one of these, so the handshake steps
/// live here and both can run them.
pub(crate) struct SessionStores<'a> {
    pub(crate) sessions: &'a mut dyn SessionStore,
    pub(crate) pre_keys: &'a mut dyn PreKeyStore,
    pub(crate) signed_pre_keys: &'a mut dyn SignedPreKeyStore,
    pub(crate) identities: &'a mut dyn IdentityKeyStore,
}

impl<'a> SessionStores<'a> {
    pub(crate) fn new(
        sessions: &'a mut dyn SessionStore,
        pre_keys: &'a mut dyn PreKeyStore,
        signed_pre_keys: &'a mut dyn SignedPreKeyStore,
        identities: &'a mut dyn IdentityKeyStore,
    ) -> Self {
        Self {
            sessions,
            pre_keys,
            signed_pre_keys,
            identities,
        }
    }

    pub(crate) fn require_trusted(
        &self,
        peer: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<()> {
        if self.identities.is_trusted_identity(peer, identity, direction)? {
            return Ok(());
        }
        log::warn!(
            "{direction:?} refused: identity {} is not trusted for {peer}",
            hex::encode(identity.public_key().public_key_bytes())
        );
        Err(SignalProtocolError::UntrustedIdentity(peer.clone()))
    }

    pub(crate) fn existing_session(&self, peer: &ProtocolAddress) -> Result<SessionRecord> {
        self.sessions
            .load_session(peer)?
            .ok_or_else(|| SignalProtocolError::SessionNotFound(peer.clone()))
    }

    pub(crate) fn session_or_fresh(&self, peer: &ProtocolAddress) -> Result<SessionRecord> {
        Ok(self
            .sessions
            .load_session(peer)?
            .unwrap_or_else(SessionRecord::new_fresh))
    }

    /// Starts a session from the peer's published bundle and stores it.
    pub(crate) fn accept_bundle<R: Rng + CryptoRng>(
        &mut self,
        peer: &ProtocolAddress,
        bundle: &PreKeyBundle,
        csprng: &mut R,
    ) -> Result<()> {
        self.require_trusted(peer, &bundle.identity_key, Direction::Sending)?;

        let signed_pre_key = bundle
            .signed_pre_key
            .ok_or(SignalProtocolError::NoSignedPreKey)?;
        if !bundle
            .identity_key
            .public_key()
            .verify_signature(&signed_pre_key.serialize(), &bundle.signed_pre_key_signature)
        {
            return Err(SignalProtocolError::InvalidSignature);
        }

        let mut record = self.session_or_fresh(peer)?;
        let base_key = KeyPair::generate(csprng);
        let keys = InitiatorKeys {
            identity: self.identities.get_identity_key_pair()?,
            base_key,
            peer_identity: bundle.identity_key,
            peer_signed_pre_key: signed_pre_key,
            peer_one_time_pre_key: bundle.pre_key.map(|(_, key)| key),
            peer_ratchet_key: signed_pre_key,
        };

        let mut state = ratchet::initialize_alice_session(&keys, csprng);
        let pre_key_id = bundle.pre_key.map(|(id, _)| id);
        log::info!(
            "session with {peer} will announce signed prekey {} and one-time prekey {pre_key_id:?}",
            bundle.signed_pre_key_id
        );
        state.mark_pending_pre_key(&PendingPreKey {
            pre_key_id,
            signed_pre_key_id: bundle.signed_pre_key_id,
            base_key: base_key.public_key,
        });
        state.set_registration_ids(
            self.identities.get_local_registration_id()?,
            bundle.registration_id,
        );
        record.install_state(state);

        self.sessions.store_session(peer, &record)?;
        self.identities.save_identity(peer, &bundle.identity_key)?;
        Ok(())
    }

    /// Installs into `record` the session the sender built for `message`, unless one with the
    /// same base key is already there. Nothing is stored.
    ///
    /// Returns the one-time prekey the new session consumed, to be removed once the embedded
    /// message has decrypted.
    pub(crate) fn accept_pre_key_message(
        &mut self,
        peer: &ProtocolAddress,
        record: &mut SessionRecord,
        message: &PreKeySignalMessage,
    ) -> Result<Option<PreKeyId>> {
        let peer_identity = message.identity_key();
        self.require_trusted(peer, peer_identity, Direction::Receiving)?;

        let used = self.install_responder_state(peer, record, message)?;

        self.identities.save_identity(peer, peer_identity)?;
        Ok(used)
    }

    fn install_responder_state(
        &mut self,
        peer: &ProtocolAddress,
        record: &mut SessionRecord,
        message: &PreKeySignalMessage,
    ) -> Result<Option<PreKeyId>> {
        let base_key = message.base_key();
        if record.has_state_for_base_key(message.message_version().into(), &base_key.serialize()) {
            log::info!(
                "{peer} repeated base key {}, session already set up",
                hex::encode(base_key.public_key_bytes())
            );
            return Ok(None);
        }

        let signed_pre_key = self
            .signed_pre_keys
            .get_signed_pre_key(message.signed_pre_key_id())?
            .key_pair();
        let one_time_pre_key = match message.pre_key_id() {
            Some(id) => Some(self.pre_keys.get_pre_key(id)?.key_pair()),
            None => {
                log::warn!("{peer} started a session without a one-time prekey");
                None
            }
        };

        let mut state = ratchet::initialize_bob_session(&ResponderKeys {
            identity: self.identities.get_identity_key_pair()?,
            signed_pre_key,
            one_time_pre_key,
            ratchet_key: signed_pre_key,
            peer_identity: *message.identity_key(),
            peer_base_key: *base_key,
        });
        state.set_registration_ids(
            self.identities.get_local_registration_id()?,
            message.registration_id(),
        );
        record.install_state(state);

        Ok(message.pre_key_id().filter(|&id| id != MEDIUM_MAX_VALUE))
    }
}

/// Establishes sessions with one remote device, either from its published bundle or from the
/// first message it sent us.
pub struct SessionBuilder<'a> {
    peer: ProtocolAddress,
    stores: SessionStores<'a>,
}

impl<'a> SessionBuilder<'a> {
    pub fn new(
        remote_address: ProtocolAddress,
        session_store: &'a mut dyn SessionStore,
        pre_key_store: &'a mut dyn PreKeyStore,
        signed_pre_key_store: &'a mut dyn SignedPreKeyStore,
        identity_store: &'a mut dyn IdentityKeyStore,
    ) -> Self {
        Self {
            peer: remote_address,
            stores: SessionStores::new(
                session_store,
                pre_key_store,
                signed_pre_key_store,
                identity_store,
            ),
        }
    }

    pub fn remote_address(&self) -> &ProtocolAddress {
        &self.peer
    }

    /// Builds a new session from `bundle` and stores it as the current session for the remote
    /// address. Until the peer replies, every message we send is a [PreKeySignalMessage].
    pub fn process_pre_key_bundle<R: Rng + CryptoRng>(
        &mut self,
        bundle: &PreKeyBundle,
        csprng: &mut R,
    ) -> Result<()> {
        self.stores.accept_bundle(&self.peer, bundle, csprng)
    }

    /// Installs the session `message` was sent from into `session_record`.
    ///
    /// Returns the one-time prekey id the message consumed, which the caller removes from the
    /// prekey store once the embedded message has been decrypted.
    pub fn process(
        &mut self,
        session_record: &mut SessionRecord,
        message: &PreKeySignalMessage,
    ) -> Result<Option<PreKeyId>> {
        self.stores
            .accept_pre_key_message(&self.peer, session_record, message)
    }
}
