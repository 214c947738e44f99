//! Cryptographic primitives for wc sessions.
//!
//! This crate provides:
//! - `SymmetricKey`: the 32-byte shared secret of a session (hex on the wire)
//! - `EncryptedPayload`: the `{data, iv, hmac}` wire object
//! - `encrypt` / `decrypt`: AES-256-CBC with PKCS#7 padding, authenticated
//!   with HMAC-SHA256 over `ciphertext || iv`
//!
//! # Design
//!
//! Everything here is stateless. A fresh random IV is drawn from the OS
//! CSPRNG on every `encrypt` call, and `decrypt` verifies the HMAC before
//! touching the ciphertext. All decrypt failures collapse into
//! `CryptoError::Authentication` so callers cannot distinguish a bad MAC
//! from bad padding.

#![forbid(unsafe_code)]

pub mod key;
pub mod payload;

pub use key::SymmetricKey;
pub use payload::{decrypt, encrypt, CryptoError, EncryptedPayload, IV_LEN, MAC_LEN};
