//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use rand::{CryptoRng, Rng};

use crate::crypto;
use crate::protocol::CIPHERTEXT_MESSAGE_CURRENT_VERSION;
use crate::sender_keys::SenderChainKey;
use crate::{
    KeyPair, Result, SenderKeyDistributionMessage, SenderKeyMessage, SenderKeyName,
    SenderKeyRecord, SenderKeyStore, SignalProtocolError,
};

fn record_or_empty(store: &mut dyn SenderKeyStore, name: &SenderKeyName) -> Result<SenderKeyRecord> {
    Ok(store
        .load_sender_key(name)?
        .unwrap_or_else(SenderKeyRecord::new_empty))
}

fn existing_record(store: &mut dyn SenderKeyStore, name: &SenderKeyName) -> Result<SenderKeyRecord> {
    match store.load_sender_key(name)? {
        Some(record) if !record.is_empty() => Ok(record),
        _ => Err(SignalProtocolError::NoSenderKeyState),
    }
}

/// Creates our own sender key for a group and installs the ones other members distribute.
pub struct GroupSessionBuilder<'a> {
    store: &'a mut dyn SenderKeyStore,
}

impl<'a> GroupSessionBuilder<'a> {
    pub fn new(sender_key_store: &'a mut dyn SenderKeyStore) -> Self {
        Self {
            store: sender_key_store,
        }
    }

    /// Adds the chain described by `skdm` to the record for `sender_key_name`.
    pub fn process(
        &mut self,
        sender_key_name: &SenderKeyName,
        skdm: &SenderKeyDistributionMessage,
    ) -> Result<()> {
        let seed: [u8; 32] = skdm.chain_key().try_into().map_err(|_| {
            SignalProtocolError::InvalidArgument(format!(
                "chain key must be 32 bytes, got {}",
                skdm.chain_key().len()
            ))
        })?;
        log::info!(
            "{sender_key_name} distributed key {} at iteration {}",
            skdm.key_id(),
            skdm.iteration()
        );

        let mut record = record_or_empty(self.store, sender_key_name)?;
        record.add_peer_state(
            skdm.key_id(),
            &SenderChainKey::new(skdm.iteration(), seed),
            *skdm.signing_key(),
        );
        self.store.store_sender_key(sender_key_name, &record)
    }

    /// Returns the distribution message for our own chain in `sender_key_name`, creating the
    /// chain first if there is none.
    pub fn create<R: Rng + CryptoRng>(
        &mut self,
        sender_key_name: &SenderKeyName,
        csprng: &mut R,
    ) -> Result<SenderKeyDistributionMessage> {
        let mut record = record_or_empty(self.store, sender_key_name)?;

        if record.is_empty() {
            let key_id = csprng.gen::<u32>() >> 1;
            log::info!("new sender key {key_id} for {sender_key_name}");
            let chain_key = SenderChainKey::new(0, csprng.gen());
            let signing_key = KeyPair::generate(csprng);
            record.reset_to_own_state(key_id, &chain_key, &signing_key);
            self.store.store_sender_key(sender_key_name, &record)?;
        }

        let state = record.current_state()?;
        let chain_key = state.chain_key()?;
        SenderKeyDistributionMessage::new(
            CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            state.key_id(),
            chain_key.iteration(),
            chain_key.seed().to_vec(),
            state.signing_key()?,
        )
    }
}

/// Encrypts and decrypts messages on one sender's chain within a group.
pub struct GroupCipher<'a> {
    store: &'a mut dyn SenderKeyStore,
    name: SenderKeyName,
}

impl<'a> GroupCipher<'a> {
    pub fn new(sender_key_store: &'a mut dyn SenderKeyStore, sender_key_name: SenderKeyName) -> Self {
        Self {
            store: sender_key_store,
            name: sender_key_name,
        }
    }

    pub fn sender_key_name(&self) -> &SenderKeyName {
        &self.name
    }

    /// Encrypts `plaintext` with the next key of our own chain and signs the result.
    pub fn encrypt<R: Rng + CryptoRng>(
        &mut self,
        plaintext: &[u8],
        csprng: &mut R,
    ) -> Result<SenderKeyMessage> {
        let mut record = self
            .store
            .load_sender_key(&self.name)?
            .ok_or(SignalProtocolError::NoSenderKeyState)?;
        let state = record.current_state_mut()?;

        let chain_key = state.chain_key()?;
        let message_key = chain_key.message_key();
        let signing_key = state
            .signing_private_key()?
            .ok_or(SignalProtocolError::SenderKeySigningKeyMissing)?;

        let ciphertext =
            crypto::aes_256_cbc_encrypt(plaintext, message_key.cipher_key(), message_key.iv())?;
        let message = SenderKeyMessage::new(
            CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            state.key_id(),
            message_key.iteration(),
            ciphertext.into(),
            csprng,
            &signing_key,
        )?;

        state.set_chain_key(&chain_key.step()?);
        self.store.store_sender_key(&self.name, &record)?;
        Ok(message)
    }

    /// Verifies and decrypts a serialized [SenderKeyMessage] from this cipher's sender.
    pub fn decrypt(&mut self, skm_bytes: &[u8]) -> Result<Vec<u8>> {
        let message = SenderKeyMessage::try_from(skm_bytes)?;
        let mut record = existing_record(self.store, &self.name)?;
        let state = record.state_for_key_id(message.key_id())?;

        if !message.verify_signature(&state.signing_key()?) {
            log::warn!(
                "{}: signature check failed for key {}",
                self.name,
                message.key_id()
            );
            return Err(SignalProtocolError::SignatureValidationFailed);
        }

        let message_key = state.message_key_for(message.iteration(), &self.name)?;
        let plaintext = crypto::aes_256_cbc_decrypt(
            message.ciphertext(),
            message_key.cipher_key(),
            message_key.iv(),
        )?;

        self.store.store_sender_key(&self.name, &record)?;
        Ok(plaintext)
    }
}
