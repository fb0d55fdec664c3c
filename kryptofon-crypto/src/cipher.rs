//! Symmetric session cipher (§4.5): Blowfish/CBC/PKCS5Padding, keyed
//! per call and carried forward from whichever side generated or
//! unwrapped it.

use crate::error::{CryptoError, Result};
use blowfish::Blowfish;
use cbc::{Decryptor, Encryptor};
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

type BfEncryptor = Encryptor<Blowfish>;
type BfDecryptor = Decryptor<Blowfish>;

const IV_LEN: usize = 8;
/// The IV is always the zero block in this implementation — a known
/// weakness carried over deliberately, not a bug (documented design
/// note, not fixed here).
const ZERO_IV: [u8; IV_LEN] = [0u8; IV_LEN];
const PDU_PREAMBLE_LEN: usize = 8;
const TEXT_PREAMBLE_LEN: usize = 256;
const TEXT_MARKER: &[u8] = b"[BEGIN]";

/// 32 bits: a deliberately small default key size, overridable by
/// callers who want a stronger session key (§4.5).
const DEFAULT_KEY_LEN: usize = 4;

/// The bare secret key, as carried inside a [`crate::signed::SignedObject`]
/// envelope over the wire (§3: "secretPayload ... for ACCEPT, the
/// signed serialized session key").
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretKeyMaterial {
    pub key_bytes: Vec<u8>,
    pub algorithm: String,
}

/// A keyed Blowfish/CBC session, optionally carrying the verificator
/// name of whoever it was unwrapped from.
pub struct SessionCipher {
    key_bytes: Vec<u8>,
    verificator: Option<String>,
}

impl SessionCipher {
    /// Local generator role (§4.5): a fresh secret key with no
    /// verificator (we made it, we don't verify ourselves).
    pub fn generate() -> SessionCipher {
        Self::generate_with_len(DEFAULT_KEY_LEN)
    }

    pub fn generate_with_len(key_len: usize) -> SessionCipher {
        let mut key_bytes = vec![0u8; key_len];
        OsRng.fill_bytes(&mut key_bytes);
        SessionCipher {
            key_bytes,
            verificator: None,
        }
    }

    /// Remote wrapper role (§4.5): wrap key material unwrapped via
    /// `Identity::unwrap_session_key`, carrying its verificator name.
    pub fn from_material(material: SecretKeyMaterial, verificator: Option<String>) -> SessionCipher {
        SessionCipher {
            key_bytes: material.key_bytes,
            verificator,
        }
    }

    pub fn to_material(&self) -> SecretKeyMaterial {
        SecretKeyMaterial {
            key_bytes: self.key_bytes.clone(),
            algorithm: "blowfish".to_string(),
        }
    }

    pub fn verificator(&self) -> Option<&str> {
        self.verificator.as_deref()
    }

    fn encrypt_raw(&self, plaintext: &[u8]) -> Vec<u8> {
        let enc = BfEncryptor::new_from_slices(&self.key_bytes, &ZERO_IV).expect("blowfish accepts any key length in [4, 56] bytes");
        enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    fn decrypt_raw(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let dec = BfDecryptor::new_from_slices(&self.key_bytes, &ZERO_IV).expect("blowfish accepts any key length in [4, 56] bytes");
        dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::MalformedCiphertext)
    }

    fn encrypt_with_preamble(&self, data: &[u8], preamble_len: usize) -> Vec<u8> {
        let mut plaintext = Vec::with_capacity(IV_LEN + preamble_len + data.len());
        plaintext.extend_from_slice(&ZERO_IV);
        let mut preamble = vec![0u8; preamble_len];
        OsRng.fill_bytes(&mut preamble);
        plaintext.extend_from_slice(&preamble);
        plaintext.extend_from_slice(data);
        self.encrypt_raw(&plaintext)
    }

    fn decrypt_with_preamble(&self, ciphertext: &[u8], preamble_len: usize) -> Result<Vec<u8>> {
        let plaintext = self.decrypt_raw(ciphertext)?;
        let skip = IV_LEN + preamble_len;
        if plaintext.len() < skip {
            return Err(CryptoError::MalformedCiphertext);
        }
        Ok(plaintext[skip..].to_vec())
    }

    /// Encrypt one datagram's payload, `preamble_len = 8` (§4.5).
    pub fn encrypt_datagram(&self, data: &[u8]) -> Vec<u8> {
        self.encrypt_with_preamble(data, PDU_PREAMBLE_LEN)
    }

    /// Decrypt one datagram's ciphertext, discarding IV + preamble.
    pub fn decrypt_datagram(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_with_preamble(ciphertext, PDU_PREAMBLE_LEN)
    }

    /// Encrypt a text (IMSG) message, `preamble_len = 256`, prefixing
    /// the `[BEGIN]` marker the decrypt side requires (§4.5).
    pub fn encrypt_text(&self, message: &str) -> Vec<u8> {
        let mut marked = Vec::with_capacity(TEXT_MARKER.len() + message.len());
        marked.extend_from_slice(TEXT_MARKER);
        marked.extend_from_slice(message.as_bytes());
        self.encrypt_with_preamble(&marked, TEXT_PREAMBLE_LEN)
    }

    /// Decrypt a text message; messages whose plaintext lacks the
    /// `[BEGIN]` marker are discarded as malformed (§4.5).
    pub fn decrypt_text(&self, ciphertext: &[u8]) -> Result<String> {
        let marked = self.decrypt_with_preamble(ciphertext, TEXT_PREAMBLE_LEN)?;
        let body = marked.strip_prefix(TEXT_MARKER).ok_or(CryptoError::MalformedCiphertext)?;
        String::from_utf8(body.to_vec()).map_err(|_| CryptoError::MalformedCiphertext)
    }
}
