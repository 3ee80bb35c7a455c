//
// Copyright 2020-2022 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

pub(crate) mod curve25519;

use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt;

use arrayref::array_ref;
use displaydoc::Display;
use rand::{CryptoRng, Rng};
use subtle::ConstantTimeEq;

use self::curve25519::{Curve25519Secret, KEY_LEN, SIGNATURE_LEN};
use crate::{Result, SignalProtocolError};

/// The byte that prefixes every serialized public key.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum KeyType {
    /// <curve25519 key type>
    Djb = 0x05u8,
}

#[derive(Clone, Copy)]
pub struct PublicKey {
    bytes: [u8; KEY_LEN],
}

impl PublicKey {
    /// Decodes a key carrying the leading [KeyType] byte.
    pub fn deserialize(value: &[u8]) -> Result<Self> {
        let (&tag, body) = value
            .split_first()
            .ok_or(SignalProtocolError::NoKeyTypeIdentifier)?;
        match KeyType::try_from(tag) {
            Err(unknown) => Err(SignalProtocolError::BadKeyType(unknown.number)),
            Ok(KeyType::Djb) if body.len() == KEY_LEN => Self::from_djb_public_key_bytes(body),
            Ok(KeyType::Djb) => Err(SignalProtocolError::BadKeyLength(KeyType::Djb, value.len())),
        }
    }

    /// Decodes a bare 32-byte Curve25519 key.
    pub fn from_djb_public_key_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes = <[u8; KEY_LEN]>::try_from(bytes)
            .map_err(|_| SignalProtocolError::BadKeyLength(KeyType::Djb, bytes.len()))?;
        Ok(Self { bytes })
    }

    pub fn public_key_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn key_type(&self) -> KeyType {
        KeyType::Djb
    }

    pub fn serialize(&self) -> Box<[u8]> {
        [&[KeyType::Djb as u8][..], &self.bytes[..]].concat().into()
    }

    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        signature.len() == SIGNATURE_LEN
            && curve25519::xeddsa_verify(
                &self.bytes,
                message,
                array_ref![signature, 0, SIGNATURE_LEN],
            )
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = SignalProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        Self::deserialize(value)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes[..].ct_eq(&other.bytes[..]).into()
    }
}

impl Eq for PublicKey {}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("PublicKey")
            .field(&hex::encode(self.bytes))
            .finish()
    }
}

/// A clamped Curve25519 scalar.
#[derive(Clone, Copy)]
pub struct PrivateKey {
    bytes: [u8; KEY_LEN],
}

impl PrivateKey {
    pub fn deserialize(value: &[u8]) -> Result<Self> {
        let mut bytes = <[u8; KEY_LEN]>::try_from(value)
            .map_err(|_| SignalProtocolError::BadKeyLength(KeyType::Djb, value.len()))?;
        bytes[0] &= 0b1111_1000;
        bytes[KEY_LEN - 1] = (bytes[KEY_LEN - 1] & 0b0111_1111) | 0b0100_0000;
        Ok(Self { bytes })
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    fn secret(&self) -> Curve25519Secret {
        Curve25519Secret::from(self.bytes)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            bytes: self.secret().public_bytes(),
        }
    }

    pub fn calculate_signature<R: CryptoRng + Rng>(
        &self,
        message: &[u8],
        csprng: &mut R,
    ) -> [u8; SIGNATURE_LEN] {
        self.secret().xeddsa_sign(message, csprng)
    }

    pub fn calculate_agreement(&self, peer: &PublicKey) -> [u8; KEY_LEN] {
        self.secret().agree(&peer.bytes)
    }
}

impl TryFrom<&[u8]> for PrivateKey {
    type Error = SignalProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        Self::deserialize(value)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

#[derive(Copy, Clone, Debug)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyPair {
    pub fn generate<R: Rng + CryptoRng>(csprng: &mut R) -> Self {
        let secret = Curve25519Secret::random(csprng);
        Self::from(PrivateKey {
            bytes: secret.secret_bytes(),
        })
    }

    pub fn new(public_key: PublicKey, private_key: PrivateKey) -> Self {
        Self {
            public_key,
            private_key,
        }
    }

    pub fn from_public_and_private(public_key: &[u8], private_key: &[u8]) -> Result<Self> {
        Ok(Self::new(
            PublicKey::deserialize(public_key)?,
            PrivateKey::deserialize(private_key)?,
        ))
    }

    pub fn calculate_signature<R: CryptoRng + Rng>(
        &self,
        message: &[u8],
        csprng: &mut R,
    ) -> [u8; SIGNATURE_LEN] {
        self.private_key.calculate_signature(message, csprng)
    }

    pub fn calculate_agreement(&self, peer: &PublicKey) -> [u8; KEY_LEN] {
        self.private_key.calculate_agreement(peer)
    }
}

impl From<PrivateKey> for KeyPair {
    fn from(private_key: PrivateKey) -> Self {
        Self::new(private_key.public_key(), private_key)
    }
}
