//
// Copyright 2020-2021 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The four message kinds, in the form they travel in.
//!
//! Each is one version byte (the ASCII digit of the version), a protobuf body, and for the two
//! authenticated kinds a fixed-size trailer: an 8-byte MAC or a 64-byte signature. Parsed
//! messages keep their exact input bytes, so [CiphertextMessage::serialize] never re-encodes.

use prost::Message;
use rand::{CryptoRng, Rng};
use subtle::ConstantTimeEq;

use crate::crypto::hmac_sha256;
use crate::curve::curve25519::SIGNATURE_LEN;
use crate::{proto, IdentityKey, PrivateKey, PublicKey, Result, SignalProtocolError};

pub const CIPHERTEXT_MESSAGE_CURRENT_VERSION: u8 = 3;

const MAC_LEN: usize = 8;

/// Version byte followed by the encoded body. The caller appends any trailer.
fn seal(version: u8, body: &impl Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + body.encoded_len() + SIGNATURE_LEN);
    out.push(b'0' + version);
    out.extend_from_slice(&body.encode_to_vec());
    out
}

/// Splits `bytes` into its version, body and `trailer_len`-byte trailer.
fn open(bytes: &[u8], trailer_len: usize) -> Result<(u8, &[u8], &[u8])> {
    if bytes.len() < 1 + trailer_len {
        return Err(SignalProtocolError::CiphertextMessageTooShort(bytes.len()));
    }
    let (version, rest) = bytes.split_at(1);
    let version = match version[0] {
        digit @ b'0'..=b'9' => digit - b'0',
        _ => return Err(SignalProtocolError::InvalidProtobufEncoding),
    };
    match version {
        0 | 1 => return Err(SignalProtocolError::LegacyCiphertextVersion(version)),
        v if v > CIPHERTEXT_MESSAGE_CURRENT_VERSION => {
            return Err(SignalProtocolError::UnrecognizedCiphertextVersion(v))
        }
        _ => {}
    }
    let (body, trailer) = rest.split_at(rest.len() - trailer_len);
    Ok((version, body, trailer))
}

fn required<T>(field: Option<T>, name: &'static str) -> Result<T> {
    field.ok_or(SignalProtocolError::IncompleteMessage(name))
}

/// Truncated HMAC-SHA256 over the identities (version 3 and up) and the message up to its MAC.
fn message_mac(
    version: u8,
    mac_key: &[u8],
    sender: &IdentityKey,
    receiver: &IdentityKey,
    content: &[u8],
) -> Result<[u8; MAC_LEN]> {
    if mac_key.len() != 32 {
        return Err(SignalProtocolError::InvalidArgument(format!(
            "MAC key must be 32 bytes, got {}",
            mac_key.len()
        )));
    }
    let mut input = Vec::with_capacity(66 + content.len());
    if version >= 3 {
        input.extend_from_slice(&sender.serialize());
        input.extend_from_slice(&receiver.serialize());
    }
    input.extend_from_slice(content);
    let full = hmac_sha256(mac_key, &input);
    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&full[..MAC_LEN]);
    Ok(mac)
}

/// Any message this crate can produce or consume.
#[derive(Debug, Clone)]
pub enum CiphertextMessage {
    SignalMessage(SignalMessage),
    PreKeySignalMessage(PreKeySignalMessage),
    SenderKeyMessage(SenderKeyMessage),
    SenderKeyDistributionMessage(SenderKeyDistributionMessage),
}

/// Numeric tags applications use to say which kind a serialized message is.
#[derive(Copy, Clone, Eq, PartialEq, Debug, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum CiphertextMessageType {
    Whisper = 2,
    PreKey = 3,
    SenderKey = 4,
    SenderKeyDistribution = 5,
}

impl CiphertextMessage {
    pub fn message_type(&self) -> CiphertextMessageType {
        match self {
            Self::SignalMessage(_) => CiphertextMessageType::Whisper,
            Self::PreKeySignalMessage(_) => CiphertextMessageType::PreKey,
            Self::SenderKeyMessage(_) => CiphertextMessageType::SenderKey,
            Self::SenderKeyDistributionMessage(_) => CiphertextMessageType::SenderKeyDistribution,
        }
    }

    pub fn serialize(&self) -> &[u8] {
        match self {
            Self::SignalMessage(m) => m.serialized(),
            Self::PreKeySignalMessage(m) => m.serialized(),
            Self::SenderKeyMessage(m) => m.serialized(),
            Self::SenderKeyDistributionMessage(m) => m.serialized(),
        }
    }

    /// Parses `bytes` as the message kind named by `message_type`.
    pub fn deserialize(message_type: CiphertextMessageType, bytes: &[u8]) -> Result<Self> {
        use CiphertextMessageType as Kind;
        Ok(match message_type {
            Kind::Whisper => Self::SignalMessage(bytes.try_into()?),
            Kind::PreKey => Self::PreKeySignalMessage(bytes.try_into()?),
            Kind::SenderKey => Self::SenderKeyMessage(bytes.try_into()?),
            Kind::SenderKeyDistribution => Self::SenderKeyDistributionMessage(bytes.try_into()?),
        })
    }
}

/// A double-ratchet message, authenticated with a truncated MAC.
#[derive(Debug, Clone)]
pub struct SignalMessage {
    version: u8,
    ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    body: Box<[u8]>,
    serialized: Box<[u8]>,
}

impl SignalMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_version: u8,
        mac_key: &[u8],
        sender_ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: &[u8],
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
    ) -> Result<Self> {
        let mut serialized = seal(
            message_version,
            &proto::wire::SignalMessage {
                ratchet_key: Some(sender_ratchet_key.serialize().into_vec()),
                counter: Some(counter),
                previous_counter: Some(previous_counter),
                ciphertext: Some(ciphertext.to_vec()),
            },
        );
        let mac = message_mac(
            message_version,
            mac_key,
            sender_identity_key,
            receiver_identity_key,
            &serialized,
        )?;
        serialized.extend_from_slice(&mac);
        Ok(Self {
            version: message_version,
            ratchet_key: sender_ratchet_key,
            counter,
            previous_counter,
            body: ciphertext.into(),
            serialized: serialized.into(),
        })
    }

    pub fn message_version(&self) -> u8 {
        self.version
    }

    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.ratchet_key
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// The AES-CBC ciphertext.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Checks the trailing MAC in constant time. `Err` only for a malformed `mac_key`.
    pub fn verify_mac(
        &self,
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        mac_key: &[u8],
    ) -> Result<bool> {
        let (content, received) = self.serialized.split_at(self.serialized.len() - MAC_LEN);
        let expected = message_mac(
            self.version,
            mac_key,
            sender_identity_key,
            receiver_identity_key,
            content,
        )?;
        let matches = bool::from(expected[..].ct_eq(received));
        if !matches {
            log::warn!(
                "MAC mismatch: received {}, computed {}",
                hex::encode(received),
                hex::encode(expected)
            );
        }
        Ok(matches)
    }
}

impl AsRef<[u8]> for SignalMessage {
    fn as_ref(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for SignalMessage {
    type Error = SignalProtocolError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let (version, body, _mac) = open(bytes, MAC_LEN)?;
        let decoded = proto::wire::SignalMessage::decode(body)?;
        Ok(Self {
            version,
            ratchet_key: PublicKey::deserialize(&required(decoded.ratchet_key, "ratchet key")?)?,
            counter: decoded.counter.unwrap_or_default(),
            previous_counter: decoded.previous_counter.unwrap_or_default(),
            body: required(decoded.ciphertext, "ciphertext")?.into(),
            serialized: bytes.into(),
        })
    }
}

/// A [SignalMessage] wrapped with what the recipient needs to build the session first.
#[derive(Debug, Clone)]
pub struct PreKeySignalMessage {
    version: u8,
    registration_id: u32,
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    base_key: PublicKey,
    identity_key: IdentityKey,
    message: SignalMessage,
    serialized: Box<[u8]>,
}

impl PreKeySignalMessage {
    pub fn new(
        message_version: u8,
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: PublicKey,
        identity_key: IdentityKey,
        message: SignalMessage,
    ) -> Result<Self> {
        let serialized = seal(
            message_version,
            &proto::wire::PreKeySignalMessage {
                registration_id: Some(registration_id),
                pre_key_id,
                signed_pre_key_id: Some(signed_pre_key_id),
                base_key: Some(base_key.serialize().into_vec()),
                identity_key: Some(identity_key.serialize().into_vec()),
                message: Some(message.serialized().to_vec()),
            },
        );
        Ok(Self {
            version: message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized: serialized.into(),
        })
    }

    pub fn message_version(&self) -> u8 {
        self.version
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// The one-time prekey the sender used, if any.
    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    /// The sender's ephemeral handshake key.
    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn message(&self) -> &SignalMessage {
        &self.message
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl AsRef<[u8]> for PreKeySignalMessage {
    fn as_ref(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for PreKeySignalMessage {
    type Error = SignalProtocolError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let (version, body, _) = open(bytes, 0)?;
        let decoded = proto::wire::PreKeySignalMessage::decode(body)?;
        let base_key = required(decoded.base_key, "base key")?;
        let identity_key = required(decoded.identity_key, "identity key")?;
        let inner = required(decoded.message, "message")?;
        Ok(Self {
            version,
            registration_id: decoded.registration_id.unwrap_or_default(),
            pre_key_id: decoded.pre_key_id,
            signed_pre_key_id: decoded.signed_pre_key_id.unwrap_or_default(),
            base_key: PublicKey::deserialize(&base_key)?,
            identity_key: IdentityKey::decode(&identity_key)?,
            message: SignalMessage::try_from(&inner[..])?,
            serialized: bytes.into(),
        })
    }
}

/// A group message, signed by the sender's signing key for that group.
#[derive(Debug, Clone)]
pub struct SenderKeyMessage {
    version: u8,
    key_id: u32,
    iteration: u32,
    ciphertext: Box<[u8]>,
    serialized: Box<[u8]>,
}

impl SenderKeyMessage {
    pub fn new<R: CryptoRng + Rng>(
        message_version: u8,
        key_id: u32,
        iteration: u32,
        ciphertext: Box<[u8]>,
        csprng: &mut R,
        signature_key: &PrivateKey,
    ) -> Result<Self> {
        let mut serialized = seal(
            message_version,
            &proto::wire::SenderKeyMessage {
                id: Some(key_id),
                iteration: Some(iteration),
                ciphertext: Some(ciphertext.to_vec()),
            },
        );
        let signature = signature_key.calculate_signature(&serialized, csprng);
        serialized.extend_from_slice(&signature);
        Ok(Self {
            version: message_version,
            key_id,
            iteration,
            ciphertext,
            serialized: serialized.into(),
        })
    }

    pub fn verify_signature(&self, signature_key: &PublicKey) -> bool {
        let (content, signature) = self
            .serialized
            .split_at(self.serialized.len() - SIGNATURE_LEN);
        signature_key.verify_signature(content, signature)
    }

    pub fn message_version(&self) -> u8 {
        self.version
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl AsRef<[u8]> for SenderKeyMessage {
    fn as_ref(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for SenderKeyMessage {
    type Error = SignalProtocolError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let (version, body, _signature) = open(bytes, SIGNATURE_LEN)?;
        let decoded = proto::wire::SenderKeyMessage::decode(body)?;
        Ok(Self {
            version,
            key_id: required(decoded.id, "key id")?,
            iteration: decoded.iteration.unwrap_or_default(),
            ciphertext: required(decoded.ciphertext, "ciphertext")?.into(),
            serialized: bytes.into(),
        })
    }
}

/// Hands a sender's chain key and signing key to the group members.
#[derive(Debug, Clone)]
pub struct SenderKeyDistributionMessage {
    version: u8,
    key_id: u32,
    iteration: u32,
    chain_key: Vec<u8>,
    signing_key: PublicKey,
    serialized: Box<[u8]>,
}

impl SenderKeyDistributionMessage {
    pub fn new(
        message_version: u8,
        key_id: u32,
        iteration: u32,
        chain_key: Vec<u8>,
        signing_key: PublicKey,
    ) -> Result<Self> {
        let serialized = seal(
            message_version,
            &proto::wire::SenderKeyDistributionMessage {
                id: Some(key_id),
                iteration: Some(iteration),
                chain_key: Some(chain_key.clone()),
                signing_key: Some(signing_key.serialize().into_vec()),
            },
        );
        Ok(Self {
            version: message_version,
            key_id,
            iteration,
            chain_key,
            signing_key,
            serialized: serialized.into(),
        })
    }

    pub fn message_version(&self) -> u8 {
        self.version
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn chain_key(&self) -> &[u8] {
        &self.chain_key
    }

    pub fn signing_key(&self) -> &PublicKey {
        &self.signing_key
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl AsRef<[u8]> for SenderKeyDistributionMessage {
    fn as_ref(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for SenderKeyDistributionMessage {
    type Error = SignalProtocolError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let (version, body, _) = open(bytes, 0)?;
        let decoded = proto::wire::SenderKeyDistributionMessage::decode(body)?;
        let key_id = required(decoded.id, "key id")?;
        let chain_key = required(decoded.chain_key, "chain key")?;
        let signing_key = required(decoded.signing_key, "signing key")?;
        if chain_key.len() != 32 {
            return Err(SignalProtocolError::InvalidProtobufEncoding);
        }
        Ok(Self {
            version,
            key_id,
            iteration: decoded.iteration.unwrap_or_default(),
            chain_key,
            signing_key: PublicKey::deserialize(&signing_key)?,
            serialized: bytes.into(),
        })
    }
}
