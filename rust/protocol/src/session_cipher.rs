//
// Copyright 2020-2022 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use rand::{CryptoRng, Rng};

use crate::consts::limits::MAX_FORWARD_JUMPS;
use crate::crypto;
use crate::ratchet::{ChainKey, MessageKeys};
use crate::session::SessionStores;
use crate::state::SessionState;
use crate::{
    CiphertextMessage, Direction, IdentityKey, IdentityKeyStore, PreKeySignalMessage,
    PreKeyStore, ProtocolAddress, PublicKey, Result, SessionRecord, SessionStore, SignalMessage,
    SignalProtocolError, SignedPreKeyStore,
};

/// Encrypts to and decrypts from one remote device over its stored session.
pub struct SessionCipher<'a> {
    peer: ProtocolAddress,
    stores: SessionStores<'a>,
}

impl<'a> SessionCipher<'a> {
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

    /// Encrypts `ptext` with the next key of the current sending chain.
    ///
    /// While the peer has not yet answered a session we started from their bundle, the result is
    /// a [PreKeySignalMessage]; afterwards it is a plain [SignalMessage].
    pub fn encrypt(&mut self, ptext: &[u8]) -> Result<CiphertextMessage> {
        let peer = &self.peer;
        let mut record = self.stores.existing_session(peer)?;
        let state = record
            .session_state_mut()
            .ok_or_else(|| SignalProtocolError::SessionNotFound(peer.clone()))?;

        let chain_key = state.sending_chain_key()?;
        let keys = chain_key.message_keys();
        let version = state.session_version() as u8;
        let local_identity = state.local_identity_key()?;
        let peer_identity = state.remote_identity_key()?.ok_or_else(|| {
            SignalProtocolError::InvalidState("encrypt", format!("no identity stored for {peer}"))
        })?;

        let body = crypto::aes_256_cbc_encrypt(ptext, keys.cipher_key(), keys.iv())?;
        let message = SignalMessage::new(
            version,
            keys.mac_key(),
            state.local_ratchet_key()?,
            chain_key.index(),
            state.previous_counter(),
            &body,
            &local_identity,
            &peer_identity,
        )?;

        let message = match state.pending_pre_key()? {
            Some(pending) => {
                log::info!(
                    "message {} to {peer} carries prekey {:?}",
                    chain_key.index(),
                    pending.pre_key_id
                );
                CiphertextMessage::PreKeySignalMessage(PreKeySignalMessage::new(
                    version,
                    state.local_registration_id(),
                    pending.pre_key_id,
                    pending.signed_pre_key_id,
                    pending.base_key,
                    local_identity,
                    message,
                )?)
            }
            None => CiphertextMessage::SignalMessage(message),
        };

        state.store_sending_chain_key(&chain_key.next())?;

        self.stores
            .require_trusted(peer, &peer_identity, Direction::Sending)?;
        self.stores.identities.save_identity(peer, &peer_identity)?;
        self.stores.sessions.store_session(peer, &record)?;
        Ok(message)
    }

    /// Decrypts either kind of 1:1 message.
    pub fn decrypt<R: Rng + CryptoRng>(
        &mut self,
        ciphertext: &CiphertextMessage,
        csprng: &mut R,
    ) -> Result<Vec<u8>> {
        match ciphertext {
            CiphertextMessage::SignalMessage(m) => self.decrypt_signal_message(m, csprng),
            CiphertextMessage::PreKeySignalMessage(m) => self.decrypt_pre_key_message(m, csprng),
            other => Err(SignalProtocolError::InvalidArgument(format!(
                "{:?} messages belong to a group cipher",
                other.message_type()
            ))),
        }
    }

    /// Sets up the session `ciphertext` was sent from (unless it already exists), then
    /// decrypts the embedded message. The one-time prekey it used is removed afterwards.
    pub fn decrypt_pre_key_message<R: Rng + CryptoRng>(
        &mut self,
        ciphertext: &PreKeySignalMessage,
        csprng: &mut R,
    ) -> Result<Vec<u8>> {
        let (ptext, _) = self.decrypt_pre_key_message_and_get_keys(ciphertext, csprng)?;
        Ok(ptext)
    }

    /// Like [Self::decrypt_pre_key_message], also returning the keys the embedded message was
    /// encrypted with, for later use with [Self::decrypt_with_keys].
    ///
    /// If the embedded message fails to decrypt, neither the session nor the prekey store is
    /// touched.
    pub fn decrypt_pre_key_message_and_get_keys<R: Rng + CryptoRng>(
        &mut self,
        ciphertext: &PreKeySignalMessage,
        csprng: &mut R,
    ) -> Result<(Vec<u8>, MessageKeys)> {
        let peer = &self.peer;
        let mut record = self.stores.session_or_fresh(peer)?;

        let used_pre_key = self
            .stores
            .accept_pre_key_message(peer, &mut record, ciphertext)
            .map_err(|e| {
                log::error!(
                    "could not set up session from prekey message of {peer}: {e}\n{}",
                    record.describe()
                );
                e
            })?;

        let decrypted = decrypt_with_record(peer, &mut record, ciphertext.message(), csprng)?;

        self.stores.sessions.store_session(peer, &record)?;
        if let Some(id) = used_pre_key {
            self.stores.pre_keys.remove_pre_key(id)?;
        }
        Ok(decrypted)
    }

    /// Decrypts a message over an established session.
    pub fn decrypt_signal_message<R: Rng + CryptoRng>(
        &mut self,
        ciphertext: &SignalMessage,
        csprng: &mut R,
    ) -> Result<Vec<u8>> {
        let (ptext, _) = self.decrypt_and_get_keys(ciphertext, csprng)?;
        Ok(ptext)
    }

    /// Like [Self::decrypt_signal_message], also returning the keys the message was encrypted
    /// with so the caller can decrypt it again later with [Self::decrypt_with_keys].
    pub fn decrypt_and_get_keys<R: Rng + CryptoRng>(
        &mut self,
        ciphertext: &SignalMessage,
        csprng: &mut R,
    ) -> Result<(Vec<u8>, MessageKeys)> {
        let peer = &self.peer;
        let mut record = self.stores.existing_session(peer)?;
        let decrypted = decrypt_with_record(peer, &mut record, ciphertext, csprng)?;

        let peer_identity = record
            .session_state()
            .ok_or_else(|| SignalProtocolError::SessionNotFound(peer.clone()))?
            .remote_identity_key()?
            .ok_or(SignalProtocolError::InvalidSessionStructure(
                "state has no remote identity",
            ))?;
        self.stores
            .require_trusted(peer, &peer_identity, Direction::Receiving)?;
        self.stores.identities.save_identity(peer, &peer_identity)?;

        self.stores.sessions.store_session(peer, &record)?;
        Ok(decrypted)
    }

    /// Decrypts `ciphertext` with keys previously returned by [Self::decrypt_and_get_keys] or
    /// [Self::decrypt_pre_key_message_and_get_keys]. The stored session is not modified.
    pub fn decrypt_with_keys(
        &self,
        ciphertext: &SignalMessage,
        message_keys: &MessageKeys,
    ) -> Result<Vec<u8>> {
        let record = self.stores.existing_session(&self.peer)?;
        let state = record
            .session_state()
            .ok_or_else(|| SignalProtocolError::SessionNotFound(self.peer.clone()))?;
        let peer_identity = state
            .remote_identity_key()?
            .ok_or(SignalProtocolError::InvalidSessionStructure(
                "state has no remote identity",
            ))?;
        open_message(
            ciphertext,
            message_keys,
            &peer_identity,
            &state.local_identity_key()?,
        )
    }

    /// The registration id the remote device reported when the current session was set up.
    pub fn remote_registration_id(&self) -> Result<u32> {
        self.stores
            .existing_session(&self.peer)?
            .remote_registration_id()
            .ok_or_else(|| SignalProtocolError::SessionNotFound(self.peer.clone()))
    }

    pub fn session_version(&self) -> Result<u32> {
        self.stores
            .existing_session(&self.peer)?
            .session_version()
            .ok_or_else(|| SignalProtocolError::SessionNotFound(self.peer.clone()))
    }
}

/// Tries the current state, then each archived state, newest first.
///
/// The first state that decrypts is written back, and an archived one becomes current. A
/// duplicate on the current state ends the search. Otherwise the current state's error wins,
/// then the first archived state's.
fn decrypt_with_record<R: Rng + CryptoRng>(
    peer: &ProtocolAddress,
    record: &mut SessionRecord,
    message: &SignalMessage,
    csprng: &mut R,
) -> Result<(Vec<u8>, MessageKeys)> {
    let log_failure = |state: &SessionState, error: &SignalProtocolError| {
        log::warn!(
            "state with ratchet key {} could not decrypt message {} on ratchet key {} from \
             {peer}: {error}",
            state.ratchet_key_hex(),
            message.counter(),
            hex::encode(message.sender_ratchet_key().public_key_bytes()),
        );
    };

    let mut current_error = None;
    if let Some(current) = record.session_state() {
        let mut state = current.clone();
        match decrypt_with_state(&mut state, message, peer, csprng) {
            Ok(decrypted) => {
                record.update_current(state);
                return Ok(decrypted);
            }
            Err(e @ SignalProtocolError::DuplicatedMessage(..)) => return Err(e),
            Err(e) => {
                log_failure(&state, &e);
                current_error = Some(e);
            }
        }
    }

    let mut archived_error = None;
    let restored = record
        .archived_states()
        .enumerate()
        .find_map(|(index, archived)| {
            let mut state = archived.clone();
            match decrypt_with_state(&mut state, message, peer, csprng) {
                Ok(decrypted) => Some((index, state, decrypted)),
                Err(e) => {
                    log_failure(&state, &e);
                    if archived_error.is_none() {
                        archived_error = Some(e);
                    }
                    None
                }
            }
        });

    if let Some((index, state, decrypted)) = restored {
        log::info!("archived state {index} decrypted message from {peer}, restoring it");
        record.restore_archived(index, state)?;
        return Ok(decrypted);
    }

    log::error!(
        "no state could decrypt message from {peer} ({} archived)\n{}",
        record.archived_states().len(),
        record.describe()
    );
    Err(current_error
        .or(archived_error)
        .unwrap_or_else(|| SignalProtocolError::SessionNotFound(peer.clone())))
}

fn decrypt_with_state<R: Rng + CryptoRng>(
    state: &mut SessionState,
    message: &SignalMessage,
    peer: &ProtocolAddress,
    csprng: &mut R,
) -> Result<(Vec<u8>, MessageKeys)> {
    if !state.has_sender_chain() {
        return Err(SignalProtocolError::InvalidSessionStructure(
            "state has no sending chain",
        ));
    }

    let version = u32::from(message.message_version());
    if version != state.session_version() {
        return Err(SignalProtocolError::UnrecognizedMessageVersion(version));
    }

    let ratchet_key = message.sender_ratchet_key();
    let chain_key = match state.receiving_chain_key(ratchet_key)? {
        Some(chain_key) => chain_key,
        None => {
            log::info!(
                "{peer} moved to ratchet key {}",
                hex::encode(ratchet_key.public_key_bytes())
            );
            state.step_ratchet(ratchet_key, csprng)?
        }
    };
    let keys = message_keys_for(state, ratchet_key, chain_key, message.counter(), peer)?;

    let peer_identity = state
        .remote_identity_key()?
        .ok_or(SignalProtocolError::InvalidSessionStructure(
            "state has no remote identity",
        ))?;
    let ptext = open_message(message, &keys, &peer_identity, &state.local_identity_key()?)?;

    state.acknowledge_pre_key();
    Ok((ptext, keys))
}

/// Keys for `counter` on the chain of `ratchet_key`, advancing the chain past it.
///
/// Keys for counters jumped over are cached. A counter behind the chain can only be served from
/// that cache.
fn message_keys_for(
    state: &mut SessionState,
    ratchet_key: &PublicKey,
    mut chain_key: ChainKey,
    counter: u32,
    peer: &ProtocolAddress,
) -> Result<MessageKeys> {
    let index = chain_key.index();
    if counter < index {
        return state
            .take_skipped_keys(ratchet_key, counter)?
            .ok_or_else(|| {
                log::info!("{peer} repeated message {counter}, chain is at {index}");
                SignalProtocolError::DuplicatedMessage(index, counter)
            });
    }

    let jump = counter - index;
    if jump as usize > MAX_FORWARD_JUMPS {
        log::error!("{peer} jumped {jump} messages ahead, more than {MAX_FORWARD_JUMPS}");
        return Err(SignalProtocolError::TooManyMessages(jump));
    }

    while chain_key.index() < counter {
        state.cache_skipped_keys(ratchet_key, chain_key.message_keys())?;
        chain_key = chain_key.next();
    }
    state.store_receiving_chain_key(ratchet_key, &chain_key.next())?;
    Ok(chain_key.message_keys())
}

fn open_message(
    message: &SignalMessage,
    keys: &MessageKeys,
    sender: &IdentityKey,
    receiver: &IdentityKey,
) -> Result<Vec<u8>> {
    if !message.verify_mac(sender, receiver, keys.mac_key())? {
        return Err(SignalProtocolError::BadMac);
    }
    crypto::aes_256_cbc_decrypt(message.body(), keys.cipher_key(), keys.iv()).map_err(|e| {
        log::warn!("authenticated message did not decrypt: {e}");
        e
    })
}
