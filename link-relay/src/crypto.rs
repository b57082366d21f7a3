//! Seed-keyed string encryption for links and bus envelopes.
//!
//! This module provides:
//! - Deterministic key/IV derivation from a caller-supplied seed (an identity)
//! - AES-256-CBC encryption, base64 output. Plaintext that is not a whole
//!   number of blocks is PKCS#7 padded; block-aligned plaintext is not padded
//! - The identity "self token" used as the inbox key and channel name
//!
//! # Security Notes
//!
//! The IV is derived from the seed, so identical plaintexts under the same
//! seed produce identical ciphertexts (equality leaks). Stored rows and
//! channel names depend on this exact derivation, so it must not change
//! without migrating the store.

use aes::cipher::{
    block_padding::{NoPadding, Pkcs7},
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// CBC initialization vector size in bytes.
pub const IV_SIZE: usize = 16;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Repeat the seed bytes until `N` bytes are filled.
fn stretch_seed<const N: usize>(seed: &str) -> Result<[u8; N], CryptoError> {
    let bytes = seed.as_bytes();
    if bytes.is_empty() {
        return Err(CryptoError::EmptySeed);
    }

    let mut out = [0u8; N];
    for (dst, src) in out.iter_mut().zip(bytes.iter().cycle()) {
        *dst = *src;
    }
    Ok(out)
}

/// Derive the AES-256 key for a seed.
pub fn derive_key(seed: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    stretch_seed::<KEY_SIZE>(seed)
}

/// Derive the CBC IV for a seed.
pub fn derive_iv(seed: &str) -> Result<[u8; IV_SIZE], CryptoError> {
    stretch_seed::<IV_SIZE>(seed)
}

/// Encrypt `plaintext` under the key derived from `seed`.
///
/// Returns standard base64 of the CBC ciphertext. Block-aligned plaintext
/// is encrypted as is, without an extra padding block, so existing stored
/// tokens keep matching.
pub fn encrypt(seed: &str, plaintext: &str) -> Result<String, CryptoError> {
    let key = derive_key(seed)?;
    let iv = derive_iv(seed)?;

    let cipher = Aes256CbcEnc::new(&key.into(), &iv.into());
    let bytes = plaintext.as_bytes();
    let ciphertext = if bytes.len() % BLOCK_SIZE == 0 {
        cipher.encrypt_padded_vec_mut::<NoPadding>(bytes)
    } else {
        cipher.encrypt_padded_vec_mut::<Pkcs7>(bytes)
    };

    Ok(STANDARD.encode(ciphertext))
}

/// Decrypt a base64 ciphertext produced by [`encrypt`] with the same seed.
///
/// Fails with `MalformedCiphertext` before touching the cipher if the input
/// is not base64 or not a whole number of blocks. A trailing PKCS#7 pad is
/// stripped when present. If the last byte claims a pad length of 1..=16 but
/// the pad bytes disagree, the result is `PaddingError`; any other last byte
/// means the plaintext was block-aligned and is returned whole. Never returns
/// partially-decrypted data.
pub fn decrypt(seed: &str, ciphertext: &str) -> Result<String, CryptoError> {
    let key = derive_key(seed)?;
    let iv = derive_iv(seed)?;

    let bytes = STANDARD
        .decode(ciphertext.trim())
        .map_err(|e| CryptoError::MalformedCiphertext {
            reason: e.to_string(),
        })?;

    if bytes.is_empty() || bytes.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::MalformedCiphertext {
            reason: format!(
                "length {} is not a non-zero multiple of {}",
                bytes.len(),
                BLOCK_SIZE
            ),
        });
    }

    let cipher = Aes256CbcDec::new(&key.into(), &iv.into());
    let mut plaintext = cipher
        .decrypt_padded_vec_mut::<NoPadding>(&bytes)
        .map_err(|_| CryptoError::PaddingError)?;

    let unpadded = unpad_len(&plaintext)?;
    plaintext.truncate(unpadded);

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
}

/// Length of `block` without its PKCS#7 pad, if it carries one.
fn unpad_len(block: &[u8]) -> Result<usize, CryptoError> {
    let Some(&last) = block.last() else {
        return Ok(0);
    };
    let pad = usize::from(last);
    if pad == 0 || pad > BLOCK_SIZE {
        return Ok(block.len());
    }
    let start = block.len() - pad;
    if block[start..].iter().all(|&b| b == last) {
        Ok(start)
    } else {
        Err(CryptoError::PaddingError)
    }
}

/// The identity encrypted under itself.
///
/// Used as the stored receiver key of an inbox and as the bus channel name,
/// so it is the same value every time for a given identity.
pub fn self_token(identity: &str) -> Result<String, CryptoError> {
    encrypt(identity, identity)
}
