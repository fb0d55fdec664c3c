//! Asymmetric identity (§4.3): load-or-generate an RSA-1024 key pair,
//! sign, decrypt, and unwrap session keys delivered by a peer.

use crate::authorized_keys::{encode_public_key, AuthorizedKeys};
use crate::cbc_rsa;
use crate::cipher::SessionCipher;
use crate::error::{CryptoError, Result};
use crate::named_key::{timestamp_comment, NamedKeyPair};
use crate::signed::SignedObject;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const RSA_BITS: usize = 1024;
const SANITY_CHECK_BYTES: usize = 2048;

/// Private key file name under the identity directory (§6): Base64 of a
/// serialized `NamedKeyPair`.
pub const PRIVATE_KEY_FILENAME: &str = "mykf-private-key.txt";

/// Public key file name under the identity directory (§6): Base64 of the
/// public half, followed by a space and the comment.
pub const PUBLIC_KEY_FILENAME: &str = "mykf-public-key.txt";

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// The owner's long-lived RSA identity.
pub struct Identity {
    keys: NamedKeyPair,
    dir: PathBuf,
}

impl Identity {
    /// Load the identity from `dir` if present, otherwise generate a
    /// fresh one and persist it. Falls back to regenerating once if the
    /// loaded pair fails the sanity check (§4.3).
    pub fn load_or_generate(dir: impl Into<PathBuf>) -> Result<Identity> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        restrict_to_owner(&dir)?;

        let identity_path = dir.join(PRIVATE_KEY_FILENAME);

        if identity_path.exists() {
            match Self::load(&identity_path) {
                Ok(identity) if identity.sanity_check().is_ok() => return Ok(identity),
                Ok(_) => log::warn!("identity at {} failed sanity check, regenerating", identity_path.display()),
                Err(e) => log::warn!("could not load identity at {}: {e}, regenerating", identity_path.display()),
            }
        }

        let identity = Self::generate(dir.clone())?;
        identity.persist(&identity_path)?;
        identity.export_public_key(&dir)?;
        identity.sanity_check()?;
        Ok(identity)
    }

    fn generate(dir: PathBuf) -> Result<Identity> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS)?;
        let comment = timestamp_comment(chrono::Local::now());
        Ok(Identity {
            keys: NamedKeyPair::new(private, comment),
            dir,
        })
    }

    fn load(path: &Path) -> Result<Identity> {
        let text = fs::read_to_string(path)?;
        let bytes = STANDARD.decode(text.trim())?;
        let keys: NamedKeyPair = bincode::deserialize(&bytes)?;
        Ok(Identity {
            keys,
            dir: path.parent().unwrap_or(Path::new(".")).to_path_buf(),
        })
    }

    fn persist(&self, path: &Path) -> Result<()> {
        let encoded = STANDARD.encode(bincode::serialize(&self.keys)?);
        fs::write(path, encoded)?;
        restrict_to_owner(path)?;
        Ok(())
    }

    fn export_public_key(&self, dir: &Path) -> Result<()> {
        let line = format!("{} {}", encode_public_key(&self.keys.public), self.keys.comment);
        fs::write(dir.join(PUBLIC_KEY_FILENAME), line)?;
        Ok(())
    }

    /// Encrypt `SANITY_CHECK_BYTES` random bytes through our own public
    /// half and decrypt them back, requiring equality (§4.3).
    fn sanity_check(&self) -> Result<()> {
        let mut probe = vec![0u8; SANITY_CHECK_BYTES];
        rand::RngCore::fill_bytes(&mut OsRng, &mut probe);
        let ciphertext = cbc_rsa::encrypt(&mut OsRng, &self.keys.public, &probe)?;
        let recovered = cbc_rsa::decrypt(&self.keys.private, &ciphertext)?;
        if recovered == probe {
            Ok(())
        } else {
            Err(CryptoError::IdentityUnavailable("encrypt/decrypt sanity check mismatch".to_string()))
        }
    }

    pub fn comment(&self) -> &str {
        &self.keys.comment
    }

    pub fn named_key_pair(&self) -> &NamedKeyPair {
        &self.keys
    }

    /// Sign `payload`, producing a `SignedObject` (§4.3).
    pub fn sign<T: Serialize + serde::de::DeserializeOwned>(&self, payload: T) -> Result<SignedObject<T>> {
        Ok(SignedObject::sign(&self.keys.private, payload)?)
    }

    /// Decrypt ciphertext produced by a peer's public encryptor
    /// (§4.3's software CBC decrypt).
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(cbc_rsa::decrypt(&self.keys.private, ciphertext)?)
    }

    /// Unwrap a Base64-encoded, software-CBC-RSA-encrypted, signed
    /// session key envelope (§4.3: "Session-key unwrap"). Trust is
    /// advisory (§7 kind 5): a signer that doesn't match any authorized
    /// key still unwraps the session key, just with no verificator name
    /// attached, so the call proceeds unverified rather than failing.
    pub fn unwrap_session_key(&self, b64_envelope: &str, authorized: &AuthorizedKeys) -> Result<SessionCipher> {
        let ciphertext = STANDARD.decode(b64_envelope)?;
        let plaintext = self.decrypt(&ciphertext)?;
        let signed: SignedObject<crate::cipher::SecretKeyMaterial> = bincode::deserialize(&plaintext)?;
        let verificator = authorized.verify(&signed);
        Ok(SessionCipher::from_material(signed.payload, verificator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_shim::TempDir;

    mod tempfile_shim {
        use std::path::PathBuf;

        /// Minimal scratch-directory helper so these tests don't need
        /// to depend on the `tempfile` crate just for a throwaway path.
        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new(tag: &str) -> TempDir {
                let mut path = std::env::temp_dir();
                path.push(format!("kryptofon-crypto-test-{tag}-{}", std::process::id()));
                TempDir(path)
            }

            pub fn path(&self) -> &std::path::Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    #[test]
    fn generates_persists_and_reloads() {
        let dir = TempDir::new("reload");
        let identity = Identity::load_or_generate(dir.path()).unwrap();
        let comment = identity.comment().to_string();
        drop(identity);

        let reloaded = Identity::load_or_generate(dir.path()).unwrap();
        assert_eq!(reloaded.comment(), comment);
    }

    #[test]
    fn sign_and_self_verify_round_trip() {
        let dir = TempDir::new("sign");
        let identity = Identity::load_or_generate(dir.path()).unwrap();
        let signed = identity.sign(vec![1u8, 2, 3]).unwrap();
        assert!(signed.verify_with(&identity.named_key_pair().public).is_ok());
    }
}
