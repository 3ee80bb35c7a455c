//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{Result, SignalProtocolError};

pub(crate) fn aes_256_cbc_encrypt(ptext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    Ok(cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
        .map_err(|_| {
            SignalProtocolError::InvalidCipherCryptographicParameters(key.len(), iv.len())
        })?
        .encrypt_padded_vec_mut::<Pkcs7>(ptext))
}

pub(crate) fn aes_256_cbc_decrypt(ctext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    if ctext.is_empty() || ctext.len() % 16 != 0 {
        return Err(SignalProtocolError::InvalidCiphertext);
    }

    cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
        .map_err(|_| {
            SignalProtocolError::InvalidCipherCryptographicParameters(key.len(), iv.len())
        })?
        .decrypt_padded_vec_mut::<Pkcs7>(ctext)
        .map_err(|_| SignalProtocolError::InvalidCiphertext)
}

pub(crate) fn hmac_sha256(key: &[u8], input: &[u8]) -> [u8; 32] {
    let mut hmac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC-SHA256 should accept any size key");
    hmac.update(input);
    hmac.finalize().into_bytes().into()
}

/// HKDF-SHA256 expanding `input_key_material` into `N` bytes.
pub(crate) fn derive_secrets<const N: usize>(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> [u8; N] {
    let mut secrets = [0u8; N];
    Hkdf::<Sha256>::new(salt, input_key_material)
        .expand(info, &mut secrets)
        .expect("valid output length");
    secrets
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn aes_cbc_vector() -> Result<()> {
        let key = hex!("4e22eb16d964779994222e82192ce9f747da72dc4abe49dfdeeb71d0ffe3796e");
        let iv = hex!("6f8a557ddc0a140c878063a6d5f31d3d");
        let ptext = hex!("30736294a124482a4159");

        let ctext = aes_256_cbc_encrypt(&ptext, &key, &iv)?;
        assert_eq!(hex::encode(&ctext), "dd3f573ab4508b9ed0e45e0baf5608f3");
        assert_eq!(aes_256_cbc_decrypt(&ctext, &key, &iv)?, ptext);

        // a flipped IV bit flips the same plaintext bit
        let bad_iv = hex!("ef8a557ddc0a140c878063a6d5f31d3d");
        assert_eq!(
            hex::encode(aes_256_cbc_decrypt(&ctext, &key, &bad_iv)?),
            "b0736294a124482a4159"
        );
        Ok(())
    }

    #[test]
    fn aes_cbc_rejects_bad_input() {
        let key = [0x42u8; 32];
        let iv = [0x17u8; 16];

        assert!(matches!(
            aes_256_cbc_decrypt(&[], &key, &iv),
            Err(SignalProtocolError::InvalidCiphertext)
        ));
        assert!(matches!(
            aes_256_cbc_decrypt(&[0u8; 15], &key, &iv),
            Err(SignalProtocolError::InvalidCiphertext)
        ));
        assert!(matches!(
            aes_256_cbc_encrypt(b"short key", &key[..16], &iv),
            Err(SignalProtocolError::InvalidCipherCryptographicParameters(16, 16))
        ));
    }

    #[test]
    fn hmac_vector() {
        // RFC 4231, test case 2
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            mac,
            hex!("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
        );
    }

    #[test]
    fn hkdf_vector() {
        // RFC 5869, test case 1
        let ikm = hex!("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b");
        let salt = hex!("000102030405060708090a0b0c");
        let info = hex!("f0f1f2f3f4f5f6f7f8f9");

        let okm: [u8; 42] = derive_secrets(&ikm, Some(&salt), &info);
        assert_eq!(
            okm,
            hex!(
                "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf"
                "34007208d5b887185865"
            )
        );
    }
}
