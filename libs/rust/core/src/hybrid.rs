//! Hybrid RSA + AES-256-GCM encryption for bodies of any size.
//!
//! Envelope layout: `rsa_oaep(aes_key) || nonce(12) || aes_gcm(body) + tag(16)`.
//! The wrapped key is exactly as long as the RSA modulus, which both sides know from the
//! key pair, so the envelope carries no length prefix.

use std::path::Path;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const AES_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("envelope too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },
    #[error("failed to unwrap session key")]
    KeyUnwrap,
    #[error("payload authentication failed")]
    Authentication,
    #[error("failed to wrap session key: {0}")]
    KeyWrap(String),
    #[error("invalid key material: {0}")]
    Key(String),
    #[error("reading key file: {0}")]
    Io(#[from] std::io::Error),
}

/// Sender side: holds the collector's public key.
#[derive(Debug, Clone)]
pub struct Encrypter {
    public: RsaPublicKey,
}

impl Encrypter {
    pub fn new(public: RsaPublicKey) -> Self { Self { public } }

    /// Accepts SPKI (`BEGIN PUBLIC KEY`) or PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self, CipherError> {
        let public = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| CipherError::Key(e.to_string()))?;
        Ok(Self::new(public))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CipherError> {
        Self::from_pem(&std::fs::read_to_string(path)?)
    }

    pub fn key_size(&self) -> usize { self.public.size() }

    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CipherError> {
        let key = Aes256Gcm::generate_key(OsRng);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = Aes256Gcm::new(&key).encrypt(&nonce, plain).map_err(|_| CipherError::Authentication)?;
        let wrapped = self
            .public
            .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), key.as_slice())
            .map_err(|e| CipherError::KeyWrap(e.to_string()))?;

        let mut envelope = Vec::with_capacity(wrapped.len() + NONCE_LEN + sealed.len());
        envelope.extend_from_slice(&wrapped);
        envelope.extend_from_slice(nonce.as_slice());
        envelope.extend_from_slice(&sealed);
        Ok(envelope)
    }
}

/// Receiver side: holds the collector's private key.
#[derive(Clone)]
pub struct Decrypter {
    private: RsaPrivateKey,
}

impl Decrypter {
    pub fn new(private: RsaPrivateKey) -> Self { Self { private } }

    /// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self, CipherError> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CipherError::Key(e.to_string()))?;
        Ok(Self::new(private))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CipherError> {
        Self::from_pem(&std::fs::read_to_string(path)?)
    }

    pub fn encrypter(&self) -> Encrypter { Encrypter::new(self.private.to_public_key()) }

    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, CipherError> {
        let key_len = self.private.size();
        let min = key_len + NONCE_LEN + TAG_LEN;
        if envelope.len() < min {
            return Err(CipherError::TooShort { len: envelope.len(), min });
        }
        let (wrapped, rest) = envelope.split_at(key_len);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);

        let key = self.private.decrypt(Oaep::new::<Sha256>(), wrapped).map_err(|_| CipherError::KeyUnwrap)?;
        if key.len() != AES_KEY_LEN {
            return Err(CipherError::KeyUnwrap);
        }
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CipherError::KeyUnwrap)?;
        cipher.decrypt(Nonce::from_slice(nonce), sealed).map_err(|_| CipherError::Authentication)
    }
}

impl std::fmt::Debug for Decrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decrypter").field("key_size", &self.private.size()).finish()
    }
}
