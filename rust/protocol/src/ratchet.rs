//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The X3DH handshake that seeds a session, and the keys the double ratchet derives from it.

mod keys;

use arrayref::array_ref;
use rand::{CryptoRng, Rng};

pub use self::keys::MessageKeys;
pub(crate) use self::keys::{ChainKey, RootKey};
use crate::protocol::CIPHERTEXT_MESSAGE_CURRENT_VERSION;
use crate::state::SessionState;
use crate::{crypto, IdentityKey, IdentityKeyPair, KeyPair, PublicKey};

/// Keys known to the side that starts a session from the peer's prekey bundle.
#[derive(Clone, Copy)]
pub struct InitiatorKeys {
    pub identity: IdentityKeyPair,
    pub base_key: KeyPair,
    pub peer_identity: IdentityKey,
    pub peer_signed_pre_key: PublicKey,
    pub peer_one_time_pre_key: Option<PublicKey>,
    /// The peer's first ratchet key. Sessions built from a bundle use its signed prekey.
    pub peer_ratchet_key: PublicKey,
}

/// Keys known to the side that answers an incoming prekey message.
#[derive(Clone, Copy)]
pub struct ResponderKeys {
    pub identity: IdentityKeyPair,
    pub signed_pre_key: KeyPair,
    pub one_time_pre_key: Option<KeyPair>,
    /// Our first ratchet key pair. Sessions built from a prekey message use the signed prekey.
    pub ratchet_key: KeyPair,
    pub peer_identity: IdentityKey,
    pub peer_base_key: PublicKey,
}

/// Feeds 32 bytes of 0xFF and the agreements through HKDF, giving the first root and chain keys.
fn handshake_secrets<const N: usize>(agreements: [Option<[u8; 32]>; N]) -> (RootKey, ChainKey) {
    let mut input = Vec::with_capacity(32 * (N + 1));
    input.extend_from_slice(&[0xFFu8; 32]);
    for agreement in agreements.iter().flatten() {
        input.extend_from_slice(agreement);
    }

    let okm: [u8; 64] = crypto::derive_secrets(&input, None, b"WhisperText");
    (
        RootKey::new(*array_ref![okm, 0, 32]),
        ChainKey::new(*array_ref![okm, 32, 32], 0),
    )
}

/// Builds the initiator's first session state. It can receive on the peer's ratchet key, and
/// sends on a chain from a freshly generated ratchet key.
pub fn initialize_alice_session<R: Rng + CryptoRng>(
    keys: &InitiatorKeys,
    csprng: &mut R,
) -> SessionState {
    let base = &keys.base_key.private_key;
    let (root_key, receiving) = handshake_secrets([
        Some(
            keys.identity
                .private_key()
                .calculate_agreement(&keys.peer_signed_pre_key),
        ),
        Some(base.calculate_agreement(keys.peer_identity.public_key())),
        Some(base.calculate_agreement(&keys.peer_signed_pre_key)),
        keys.peer_one_time_pre_key
            .map(|one_time| base.calculate_agreement(&one_time)),
    ]);

    let ratchet_pair = KeyPair::generate(csprng);
    let (root_key, sending) = root_key.derive_chain(&keys.peer_ratchet_key, &ratchet_pair.private_key);

    log::info!(
        "new outgoing session, ratchet key {}",
        hex::encode(ratchet_pair.public_key.public_key_bytes())
    );

    SessionState::new(
        CIPHERTEXT_MESSAGE_CURRENT_VERSION,
        keys.identity.identity_key(),
        &keys.peer_identity,
        &root_key,
        &keys.base_key.public_key,
    )
    .with_receiving_chain(&keys.peer_ratchet_key, &receiving)
    .with_sending_chain(&ratchet_pair, &sending)
}

/// Builds the responder's first session state, which can only send until the initiator ratchets.
pub fn initialize_bob_session(keys: &ResponderKeys) -> SessionState {
    let peer_base = &keys.peer_base_key;
    let signed = &keys.signed_pre_key.private_key;
    let (root_key, sending) = handshake_secrets([
        Some(signed.calculate_agreement(keys.peer_identity.public_key())),
        Some(keys.identity.private_key().calculate_agreement(peer_base)),
        Some(signed.calculate_agreement(peer_base)),
        keys.one_time_pre_key
            .map(|one_time| one_time.private_key.calculate_agreement(peer_base)),
    ]);

    log::info!(
        "new incoming session for base key {}",
        hex::encode(peer_base.public_key_bytes())
    );

    SessionState::new(
        CIPHERTEXT_MESSAGE_CURRENT_VERSION,
        keys.identity.identity_key(),
        &keys.peer_identity,
        &root_key,
        peer_base,
    )
    .with_sending_chain(&keys.ratchet_key, &sending)
}
