//
// Copyright 2020-2021 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Double-ratchet sessions for 1:1 conversations and sender keys for groups, over Curve25519.

#![warn(clippy::unwrap_used)]
#![deny(unsafe_code)]

mod address;
pub mod consts;
mod crypto;
mod curve;
pub mod error;
mod group_cipher;
mod identity_key;
pub mod proto;
mod protocol;
mod ratchet;
mod sender_keys;
mod session;
mod session_cipher;
mod state;
mod storage;

use error::Result;

pub use {
    address::{ProtocolAddress, SenderKeyName},
    curve::{KeyPair, KeyType, PrivateKey, PublicKey},
    error::SignalProtocolError,
    group_cipher::{GroupCipher, GroupSessionBuilder},
    identity_key::{IdentityKey, IdentityKeyPair},
    protocol::{
        CiphertextMessage, CiphertextMessageType, PreKeySignalMessage,
        SenderKeyDistributionMessage, SenderKeyMessage, SignalMessage,
        CIPHERTEXT_MESSAGE_CURRENT_VERSION,
    },
    ratchet::{
        initialize_alice_session, initialize_bob_session, InitiatorKeys, MessageKeys,
        ResponderKeys,
    },
    sender_keys::SenderKeyRecord,
    session::SessionBuilder,
    session_cipher::SessionCipher,
    state::{
        PendingKeyExchange, PreKeyBundle, PreKeyId, PreKeyRecord, SessionRecord, SessionState,
        SignedPreKeyId, SignedPreKeyRecord,
    },
    storage::{
        Direction, IdentityKeyStore, InMemIdentityKeyStore, InMemPreKeyStore, InMemRecords,
        InMemSenderKeyStore, InMemSessionStore, InMemSignalProtocolStore, InMemSignedPreKeyStore,
        PreKeyStore, ProtocolStore, SenderKeyStore, SessionStore, SignedPreKeyStore,
    },
};
