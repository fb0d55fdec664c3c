use std::fmt;

/// Errors from the asymmetric identity, peer encryptor and session
/// cipher machinery.
#[derive(Debug)]
pub enum CryptoError {
    /// The identity key pair could not be loaded or generated, even
    /// after the one-shot regeneration fallback (§4.3).
    IdentityUnavailable(String),
    /// RSA keygen, encrypt, decrypt or sign failed at the `rsa` crate
    /// boundary.
    Rsa(rsa::Error),
    /// Base64 decoding of a signaling payload failed.
    Base64(base64::DecodeError),
    /// `bincode` (de)serialization of a key or envelope failed.
    Serde(bincode::Error),
    /// A signed envelope's signature did not verify against the
    /// candidate public key it was checked against.
    NotVerified,
    /// Blowfish/CBC decryption could not recover a plaintext shaped
    /// like a valid per-datagram or IMSG frame (bad padding, missing
    /// `[BEGIN]` marker, or too short).
    MalformedCiphertext,
    /// I/O error persisting or loading the identity directory.
    Io(std::io::Error),
    /// Operation attempted on a `PeerPublicEncryptor` that failed to
    /// decode, verify or initialize (§4.4: `isActive`).
    NotActive,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::IdentityUnavailable(why) => write!(f, "identity unavailable: {why}"),
            CryptoError::Rsa(e) => write!(f, "RSA error: {e}"),
            CryptoError::Base64(e) => write!(f, "base64 decode error: {e}"),
            CryptoError::Serde(e) => write!(f, "serialization error: {e}"),
            CryptoError::NotVerified => write!(f, "signed object did not verify against the given key"),
            CryptoError::MalformedCiphertext => write!(f, "ciphertext did not decode to a well-formed plaintext"),
            CryptoError::Io(e) => write!(f, "I/O error: {e}"),
            CryptoError::NotActive => write!(f, "peer public encryptor is not active"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<rsa::Error> for CryptoError {
    fn from(e: rsa::Error) -> Self {
        CryptoError::Rsa(e)
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        CryptoError::Base64(e)
    }
}

impl From<bincode::Error> for CryptoError {
    fn from(e: bincode::Error) -> Self {
        CryptoError::Serde(e)
    }
}

impl From<std::io::Error> for CryptoError {
    fn from(e: std::io::Error) -> Self {
        CryptoError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;
