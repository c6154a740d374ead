//! AES-CBC payload coding for the command channel.
//!
//! Non-loopback TLS connections carry base64-encoded AES-CBC ciphertext of
//! UTF-8 text, one payload per line. The same cipher encrypts log exports
//! (raw ciphertext, no base64). Key length selects the AES variant:
//! 16 → AES-128, 24 → AES-192, 32 → AES-256. PKCS#7 padding throughout.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("aes key must be 16, 24, or 32 bytes (got {0})")]
    KeyLength(usize),
    #[error("aes iv must be 16 bytes (got {0})")]
    IvLength(usize),
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decryption failed (bad padding or wrong key)")]
    Decrypt,
    #[error("decrypted payload is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Symmetric cipher for command payloads and log exports.
#[derive(Clone)]
pub struct PayloadCipher {
    key: Vec<u8>,
    iv: [u8; 16],
}

impl PayloadCipher {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(CryptoError::KeyLength(key.len()));
        }
        let iv: [u8; 16] = iv
            .try_into()
            .map_err(|_| CryptoError::IvLength(iv.len()))?;
        Ok(Self {
            key: key.to_vec(),
            iv,
        })
    }

    /// Encrypt raw bytes to raw ciphertext.
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Vec<u8> {
        match self.key.len() {
            16 => Aes128CbcEnc::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            24 => Aes192CbcEnc::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            _ => Aes256CbcEnc::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        }
    }

    /// Decrypt raw ciphertext back to bytes.
    pub fn decrypt_bytes(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let result = match self.key.len() {
            16 => Aes128CbcDec::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            24 => Aes192CbcDec::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            _ => Aes256CbcDec::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        result.map_err(|_| CryptoError::Decrypt)
    }

    /// Encrypt a text payload for the wire: AES-CBC then base64.
    pub fn encrypt_line(&self, plaintext: &str) -> String {
        BASE64.encode(self.encrypt_bytes(plaintext.as_bytes()))
    }

    /// Decode and decrypt one wire payload.
    pub fn decrypt_line(&self, encoded: &str) -> Result<String, CryptoError> {
        let ciphertext = BASE64.decode(encoded.trim())?;
        let plaintext = self.decrypt_bytes(&ciphertext)?;
        Ok(String::from_utf8(plaintext)?)
    }
}
