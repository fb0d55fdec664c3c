//! Asymmetric identity, authorized-keys trust store, per-peer public
//! encryptor and the symmetric session cipher used once a call is
//! established.

mod authorized_keys;
mod cbc_rsa;
mod cipher;
mod encryptor;
mod error;
mod identity;
mod named_key;
mod signed;

pub use authorized_keys::{encode_public_key, AuthorizedKeys, AUTHORIZED_KEYS_FILENAME};
pub use cipher::{SecretKeyMaterial, SessionCipher};
pub use encryptor::PeerPublicEncryptor;
pub use error::{CryptoError, Result};
pub use identity::{Identity, PRIVATE_KEY_FILENAME, PUBLIC_KEY_FILENAME};
pub use named_key::{timestamp_comment, NamedKeyPair, NamedPublicKey};
pub use signed::SignedObject;
