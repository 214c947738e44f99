//! Encrypted payload framing.
//!
//! # Wire Format
//!
//! ```text
//! {"data": hex(ciphertext), "iv": hex(16 bytes), "hmac": hex(32 bytes)}
//!
//! ciphertext = AES-256-CBC(key, iv, PKCS7(plaintext))
//! hmac       = HMAC-SHA256(key, ciphertext || iv)
//! ```

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::key::SymmetricKey;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// CBC initialisation vector length.
pub const IV_LEN: usize = 16;

/// HMAC-SHA256 tag length.
pub const MAC_LEN: usize = 32;

/// Crypto layer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key material is not 32 bytes of valid hex.
    #[error("invalid key material")]
    InvalidKey,

    /// HMAC mismatch, malformed fields or corrupt padding.
    #[error("payload authentication failed")]
    Authentication,
}

/// Encrypted wire payload. All fields are lowercase hex without prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub data: String,
    pub iv: String,
    pub hmac: String,
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<EncryptedPayload, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(key.as_bytes().into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let tag = keyed_mac(key, &ciphertext, &iv)?.finalize().into_bytes();

    Ok(EncryptedPayload {
        data: hex::encode(&ciphertext),
        iv: hex::encode(iv),
        hmac: hex::encode(tag),
    })
}

/// Verify and decrypt a payload.
///
/// The HMAC is checked (in constant time) before any decryption happens.
pub fn decrypt(payload: &EncryptedPayload, key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = hex::decode(&payload.data).map_err(|_| CryptoError::Authentication)?;
    let mut iv = [0u8; IV_LEN];
    hex::decode_to_slice(&payload.iv, &mut iv).map_err(|_| CryptoError::Authentication)?;
    let tag = hex::decode(&payload.hmac).map_err(|_| CryptoError::Authentication)?;

    keyed_mac(key, &ciphertext, &iv)?
        .verify_slice(&tag)
        .map_err(|_| CryptoError::Authentication)?;

    Aes256CbcDec::new(key.as_bytes().into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

fn keyed_mac(
    key: &SymmetricKey,
    ciphertext: &[u8],
    iv: &[u8; IV_LEN],
) -> Result<HmacSha256, CryptoError> {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::InvalidKey)?;
    mac.update(ciphertext);
    mac.update(iv);
    Ok(mac)
}
