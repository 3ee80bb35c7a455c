//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::error::Error;

use crate::curve::KeyType;
use crate::ProtocolAddress;

pub type Result<T> = std::result::Result<T, SignalProtocolError>;

/// Everything the protocol layer can fail with.
///
/// Store implementations report their own failures through
/// [SignalProtocolError::ApplicationCallbackError].
#[derive(thiserror::Error, Debug)]
pub enum SignalProtocolError {
    #[error("bad argument: {0}")]
    InvalidArgument(String),
    /// The named operation cannot run on the current state.
    #[error("{0} cannot proceed: {1}")]
    InvalidState(&'static str, String),

    // Framing and encoding.
    #[error("could not decode protobuf body: {0}")]
    ProtobufDecodingError(#[from] prost::DecodeError),
    #[error("malformed protobuf contents")]
    InvalidProtobufEncoding,
    #[error("serialized message of {0} bytes is too short")]
    CiphertextMessageTooShort(usize),
    #[error("ciphertext version {0} is no longer supported")]
    LegacyCiphertextVersion(u8),
    #[error("ciphertext version {0} is newer than this library")]
    UnrecognizedCiphertextVersion(u8),
    #[error("message version {0} does not match the session")]
    UnrecognizedMessageVersion(u32),
    #[error("message lacks its {0}")]
    IncompleteMessage(&'static str),

    // Keys.
    #[error("serialized key is empty")]
    NoKeyTypeIdentifier,
    #[error("unknown key type byte {0:#04x}")]
    BadKeyType(u8),
    #[error("{0} key cannot be {1} bytes long")]
    BadKeyLength(KeyType, usize),

    // Trust and signatures.
    #[error("identity key of {0} is not trusted")]
    UntrustedIdentity(ProtocolAddress),
    #[error("bundle carries no signed prekey")]
    NoSignedPreKey,
    #[error("signed prekey signature does not verify")]
    InvalidSignature,
    #[error("sender key message signature does not verify")]
    SignatureValidationFailed,

    /// A message named a one-time prekey the store does not hold.
    #[error("unknown prekey id")]
    InvalidPreKeyId,
    #[error("unknown signed prekey id")]
    InvalidSignedPreKeyId,

    // Decryption.
    #[error("message authentication failed")]
    BadMac,
    #[error("cipher key of {0} bytes or IV of {1} bytes is unusable")]
    InvalidCipherCryptographicParameters(usize, usize),
    #[error("ciphertext could not be decrypted")]
    InvalidCiphertext,
    /// Chain index, then the counter the message asked for.
    #[error("counter {1} is behind chain index {0} and has no cached key")]
    DuplicatedMessage(u32, u32),
    #[error("message is {0} steps ahead of its chain")]
    TooManyMessages(u32),

    // Sessions and sender keys.
    #[error("no session with {0}")]
    SessionNotFound(ProtocolAddress),
    #[error("stored session is corrupt: {0}")]
    InvalidSessionStructure(&'static str),
    #[error("no sender key state for this message")]
    NoSenderKeyState,
    #[error("sender key state has no private signing key")]
    SenderKeySigningKeyMissing,

    #[error("store callback {0} failed: {1}")]
    ApplicationCallbackError(&'static str, Box<dyn Error + Send + Sync + 'static>),
}

impl SignalProtocolError {
    /// Adapts a store's own error type, for use with `map_err`.
    pub fn for_application_callback<E>(callback: &'static str) -> impl FnOnce(E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        move |error| Self::ApplicationCallbackError(callback, Box::new(error))
    }
}
