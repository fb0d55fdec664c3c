//! Per-peer public encryptor (§4.4): the callee's or caller's public
//! key, received signed over the wire, wrapped for software-CBC-RSA
//! encryption of the session key envelope.

use crate::authorized_keys::AuthorizedKeys;
use crate::cbc_rsa;
use crate::error::{CryptoError, Result};
use crate::signed::SignedObject;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rsa::RsaPublicKey;

/// A peer's public key, constructed from the Base64 envelope carried in
/// an INVITE/RING's `secretPayload` (§3, §4.4).
pub struct PeerPublicEncryptor {
    public: Option<RsaPublicKey>,
    verificator: Option<String>,
}

impl PeerPublicEncryptor {
    /// Decode `b64` and check it is self-consistent — the envelope's
    /// signature verifies against the public key it carries, proving
    /// possession of the matching private key — independent of whether
    /// that key is in `authorized`. On any failure (bad Base64, bad
    /// encoding, signature doesn't match its own payload) the result is
    /// an inactive encryptor rather than an error — callers check
    /// [`is_active`](Self::is_active) before using it, matching the
    /// original's `isActive` boolean. `isActive` and `isVerified` are
    /// separate predicates (§4.4): a key can be active (usable to
    /// encrypt to) without being verified (matching an authorized key).
    pub fn from_base64(b64: &str, authorized: &AuthorizedKeys) -> PeerPublicEncryptor {
        match Self::try_from_base64(b64, authorized) {
            Ok(encryptor) => encryptor,
            Err(e) => {
                log::warn!("peer public encryptor inactive: {e}");
                PeerPublicEncryptor {
                    public: None,
                    verificator: None,
                }
            }
        }
    }

    fn try_from_base64(b64: &str, authorized: &AuthorizedKeys) -> Result<PeerPublicEncryptor> {
        let bytes = STANDARD.decode(b64)?;
        let signed: SignedObject<RsaPublicKey> = bincode::deserialize(&bytes)?;
        signed.verify_with(&signed.payload)?;
        let verificator = authorized.verify(&signed);
        Ok(PeerPublicEncryptor {
            public: Some(signed.payload),
            verificator,
        })
    }

    /// `isActive` iff decode and the self-signed proof-of-possession
    /// check succeeded — this says nothing about trust, only that the
    /// envelope is usable to encrypt to (§4.4).
    pub fn is_active(&self) -> bool {
        self.public.is_some()
    }

    /// `isVerified` iff the key additionally matched an entry in the
    /// authorized-keys set. A trust failure here is advisory (§7 kind
    /// 5): callers still encrypt/establish, they just surface
    /// [`TrustStatus::Unverified`](../../kryptofon_client/controller/enum.TrustStatus.html)
    /// instead of a verified peer name.
    pub fn is_verified(&self) -> bool {
        self.verificator.is_some()
    }

    pub fn verificator(&self) -> Option<&str> {
        self.verificator.as_deref()
    }

    /// Software-CBC-RSA encrypt `plaintext` under the peer's public key
    /// (§4.4).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let public = self.public.as_ref().ok_or(CryptoError::NotActive)?;
        Ok(cbc_rsa::encrypt(&mut OsRng, public, plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::named_key::NamedPublicKey;
    use rsa::RsaPrivateKey;

    fn signed_pub_key_b64(priv_key: &RsaPrivateKey) -> String {
        let public = RsaPublicKey::from(priv_key);
        let signed = SignedObject::sign(priv_key, public).unwrap();
        STANDARD.encode(bincode::serialize(&signed).unwrap())
    }

    #[test]
    fn active_and_verified_when_signer_is_authorized() {
        let priv_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let b64 = signed_pub_key_b64(&priv_key);
        let authorized = AuthorizedKeys::from_keys(vec![NamedPublicKey {
            public: RsaPublicKey::from(&priv_key),
            comment: "bob".to_string(),
        }]);

        let encryptor = PeerPublicEncryptor::from_base64(&b64, &authorized);
        assert!(encryptor.is_active());
        assert!(encryptor.is_verified());
        assert_eq!(encryptor.verificator(), Some("bob"));
        assert!(encryptor.encrypt(b"session key bytes").is_ok());
    }

    #[test]
    fn active_but_unverified_when_signer_is_unauthorized() {
        let priv_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let b64 = signed_pub_key_b64(&priv_key);
        let authorized = AuthorizedKeys::new();

        let encryptor = PeerPublicEncryptor::from_base64(&b64, &authorized);
        assert!(encryptor.is_active());
        assert!(!encryptor.is_verified());
        assert_eq!(encryptor.verificator(), None);
        assert!(encryptor.encrypt(b"x").is_ok());
    }

    #[test]
    fn inactive_when_self_signature_does_not_match_payload() {
        let priv_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let other_pub = RsaPublicKey::from(&RsaPrivateKey::new(&mut OsRng, 1024).unwrap());
        // Sign one key but carry a different one as the payload.
        let signed = SignedObject::sign(&priv_key, RsaPublicKey::from(&priv_key)).unwrap();
        let tampered = SignedObject {
            payload: other_pub,
            signature: signed.signature,
        };
        let b64 = STANDARD.encode(bincode::serialize(&tampered).unwrap());
        let authorized = AuthorizedKeys::new();

        let encryptor = PeerPublicEncryptor::from_base64(&b64, &authorized);
        assert!(!encryptor.is_active());
    }

    #[test]
    fn inactive_on_garbage_input() {
        let authorized = AuthorizedKeys::new();
        let encryptor = PeerPublicEncryptor::from_base64("not valid base64!!", &authorized);
        assert!(!encryptor.is_active());
    }
}
