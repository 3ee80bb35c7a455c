//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

#![allow(dead_code)]

use axolotl_protocol::*;
use rand::rngs::OsRng;
use rand::{CryptoRng, Rng};

pub type TestResult = Result<(), SignalProtocolError>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn address(name: &str) -> ProtocolAddress {
    ProtocolAddress::new(name.to_owned(), 1)
}

/// A device with its own stores.
pub fn new_store() -> InMemSignalProtocolStore {
    let registration_id = OsRng.gen_range(1..16380);
    InMemSignalProtocolStore::new(IdentityKeyPair::generate(&mut OsRng), registration_id)
        .expect("in-memory store")
}

pub fn cipher_for<'a>(store: &'a mut InMemSignalProtocolStore, peer: &ProtocolAddress) -> SessionCipher<'a> {
    SessionCipher::new(
        peer.clone(),
        &mut store.sessions,
        &mut store.pre_keys,
        &mut store.signed_pre_keys,
        &mut store.identities,
    )
}

pub fn builder_for<'a>(store: &'a mut InMemSignalProtocolStore, peer: &ProtocolAddress) -> SessionBuilder<'a> {
    SessionBuilder::new(
        peer.clone(),
        &mut store.sessions,
        &mut store.pre_keys,
        &mut store.signed_pre_keys,
        &mut store.identities,
    )
}

pub fn encrypt(
    store: &mut InMemSignalProtocolStore,
    peer: &ProtocolAddress,
    text: &str,
) -> Result<CiphertextMessage, SignalProtocolError> {
    cipher_for(store, peer).encrypt(text.as_bytes())
}

pub fn decrypt(
    store: &mut InMemSignalProtocolStore,
    peer: &ProtocolAddress,
    message: &CiphertextMessage,
) -> Result<Vec<u8>, SignalProtocolError> {
    cipher_for(store, peer).decrypt(message, &mut OsRng)
}

/// Decrypts and checks the text in one step.
pub fn expect_text(
    store: &mut InMemSignalProtocolStore,
    peer: &ProtocolAddress,
    message: &CiphertextMessage,
    text: &str,
) -> TestResult {
    let plaintext = decrypt(store, peer, message)?;
    assert_eq!(String::from_utf8(plaintext).expect("utf-8"), text);
    Ok(())
}

/// Stores a new signed prekey, and a one-time prekey under `pre_key_id` if given, and returns
/// the bundle advertising them.
pub fn publish_bundle<R: Rng + CryptoRng>(
    store: &mut dyn ProtocolStore,
    pre_key_id: Option<PreKeyId>,
    signed_pre_key_id: SignedPreKeyId,
    csprng: &mut R,
) -> Result<PreKeyBundle, SignalProtocolError> {
    let identity = store.get_identity_key_pair()?;
    let signed_pre_key = KeyPair::generate(csprng);
    let signature = identity
        .private_key()
        .calculate_signature(&signed_pre_key.public_key.serialize(), csprng);
    store.save_signed_pre_key(
        signed_pre_key_id,
        &SignedPreKeyRecord::new(signed_pre_key_id, csprng.gen(), &signed_pre_key, &signature),
    )?;

    let pre_key = match pre_key_id {
        Some(id) => {
            let pair = KeyPair::generate(csprng);
            store.save_pre_key(id, &PreKeyRecord::new(id, &pair))?;
            Some((id, pair.public_key))
        }
        None => None,
    };

    Ok(PreKeyBundle {
        registration_id: store.get_local_registration_id()?,
        device_id: csprng.gen_range(1..128),
        pre_key,
        signed_pre_key_id,
        signed_pre_key: Some(signed_pre_key.public_key),
        signed_pre_key_signature: signature.to_vec(),
        identity_key: *identity.identity_key(),
    })
}

/// A bundle with random prekey ids.
pub fn random_bundle<R: Rng + CryptoRng>(
    store: &mut dyn ProtocolStore,
    csprng: &mut R,
) -> Result<PreKeyBundle, SignalProtocolError> {
    let pre_key_id = csprng.gen_range(1..consts::MEDIUM_MAX_VALUE);
    let signed_pre_key_id = csprng.gen_range(1..consts::MEDIUM_MAX_VALUE);
    publish_bundle(store, Some(pre_key_id), signed_pre_key_id, csprng)
}

/// Matching session records for both ends, built directly from keys with no stores involved.
/// Bob's signed prekey doubles as his first ratchet key.
pub fn paired_records() -> Result<(SessionRecord, SessionRecord), SignalProtocolError> {
    let alice_identity = IdentityKeyPair::generate(&mut OsRng);
    let bob_identity = IdentityKeyPair::generate(&mut OsRng);
    let alice_base = KeyPair::generate(&mut OsRng);
    let bob_signed = KeyPair::generate(&mut OsRng);

    let alice = initialize_alice_session(
        &InitiatorKeys {
            identity: alice_identity,
            base_key: alice_base,
            peer_identity: *bob_identity.identity_key(),
            peer_signed_pre_key: bob_signed.public_key,
            peer_one_time_pre_key: None,
            peer_ratchet_key: bob_signed.public_key,
        },
        &mut OsRng,
    );
    let bob = initialize_bob_session(&ResponderKeys {
        identity: bob_identity,
        signed_pre_key: bob_signed,
        one_time_pre_key: None,
        ratchet_key: bob_signed,
        peer_identity: *alice_identity.identity_key(),
        peer_base_key: alice_base.public_key,
    });

    Ok((alice.into(), bob.into()))
}
