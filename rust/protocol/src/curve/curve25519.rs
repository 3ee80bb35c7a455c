//
// Copyright 2020-2021 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

//! X25519 agreement and XEdDSA signatures over one Montgomery-form secret.
//!
//! See <https://signal.org/docs/specifications/xeddsa/#curve25519>.

use arrayref::array_ref;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::{clamp_integer, Scalar};
use rand::{CryptoRng, Rng};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use x25519_dalek::StaticSecret;

pub(crate) const KEY_LEN: usize = 32;
pub(crate) const SIGNATURE_LEN: usize = 64;

/// The top bit of the last signature byte. `s` never sets it, so it carries the Edwards sign.
const EDWARDS_SIGN: u8 = 0x80;

/// 0xFE then 31 bytes of 0xFF.
const NONCE_DOMAIN: [u8; 32] = {
    let mut domain = [0xFFu8; 32];
    domain[0] = 0xFE;
    domain
};

#[derive(Clone)]
pub(crate) struct Curve25519Secret(StaticSecret);

impl Curve25519Secret {
    pub(crate) fn random<R: CryptoRng + Rng>(csprng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_LEN];
        csprng.fill_bytes(&mut bytes);
        Self::from(clamp_integer(bytes))
    }

    pub(crate) fn secret_bytes(&self) -> [u8; KEY_LEN] {
        self.0.to_bytes()
    }

    pub(crate) fn public_bytes(&self) -> [u8; KEY_LEN] {
        x25519_dalek::PublicKey::from(&self.0).to_bytes()
    }

    pub(crate) fn agree(&self, peer: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
        self.0
            .diffie_hellman(&x25519_dalek::PublicKey::from(*peer))
            .to_bytes()
    }

    pub(crate) fn xeddsa_sign<R: CryptoRng + Rng>(
        &self,
        message: &[u8],
        csprng: &mut R,
    ) -> [u8; SIGNATURE_LEN] {
        let mut entropy = [0u8; 64];
        csprng.fill_bytes(&mut entropy);

        let clamped = clamp_integer(self.0.to_bytes());
        let secret = Scalar::from_bytes_mod_order(clamped);
        let edwards_public = EdwardsPoint::mul_base(&secret).compress();

        let nonce = scalar_from_hash(
            Sha512::new()
                .chain_update(NONCE_DOMAIN)
                .chain_update(clamped)
                .chain_update(message)
                .chain_update(entropy),
        );
        let commitment = EdwardsPoint::mul_base(&nonce).compress();
        let challenge = scalar_from_hash(
            Sha512::new()
                .chain_update(commitment.as_bytes())
                .chain_update(edwards_public.as_bytes())
                .chain_update(message),
        );
        let response = challenge * secret + nonce;

        let mut signature = [0u8; SIGNATURE_LEN];
        signature[..32].copy_from_slice(commitment.as_bytes());
        signature[32..].copy_from_slice(response.as_bytes());
        signature[SIGNATURE_LEN - 1] |= edwards_public.as_bytes()[31] & EDWARDS_SIGN;
        signature
    }
}

impl From<[u8; KEY_LEN]> for Curve25519Secret {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(StaticSecret::from(bytes))
    }
}

pub(crate) fn xeddsa_verify(
    public: &[u8; KEY_LEN],
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> bool {
    let edwards_sign = signature[SIGNATURE_LEN - 1] >> 7;
    let Some(edwards_public) = MontgomeryPoint(*public).to_edwards(edwards_sign) else {
        return false;
    };

    let commitment = array_ref![signature, 0, 32];
    let mut response = *array_ref![signature, 32, 32];
    response[31] &= !EDWARDS_SIGN;
    let Some(response) = Option::<Scalar>::from(Scalar::from_canonical_bytes(response)) else {
        return false;
    };

    let challenge = scalar_from_hash(
        Sha512::new()
            .chain_update(commitment)
            .chain_update(edwards_public.compress().as_bytes())
            .chain_update(message),
    );
    let recomputed =
        EdwardsPoint::vartime_double_scalar_mul_basepoint(&challenge, &-edwards_public, &response)
            .compress();

    bool::from(recomputed.as_bytes()[..].ct_eq(&commitment[..]))
}

fn scalar_from_hash(hash: Sha512) -> Scalar {
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hash.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}
