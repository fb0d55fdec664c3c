//! Signed envelope (§3): a payload plus a `SHA1withRSA` signature over
//! its serialized form (§4.3).

use crate::error::{CryptoError, Result};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// A payload paired with a signature over its serialized bytes.
#[derive(Serialize, Deserialize)]
pub struct SignedObject<T> {
    pub payload: T,
    pub signature: Vec<u8>,
}

impl<T: Serialize + DeserializeOwned> SignedObject<T> {
    /// Sign `payload` with `priv_key`, producing `{payload, signature}`.
    pub fn sign(priv_key: &RsaPrivateKey, payload: T) -> Result<SignedObject<T>> {
        let serialized = bincode::serialize(&payload)?;
        let digest = Sha1::digest(&serialized);
        let signature = priv_key.sign(Pkcs1v15Sign::new::<Sha1>(), &digest)?;
        Ok(SignedObject { payload, signature })
    }

    /// Verify the signature against a single candidate public key.
    pub fn verify_with(&self, pub_key: &RsaPublicKey) -> Result<()> {
        let serialized = bincode::serialize(&self.payload)?;
        let digest = Sha1::digest(&serialized);
        pub_key
            .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, &self.signature)
            .map_err(|_| CryptoError::NotVerified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Payload {
        value: u32,
    }

    #[test]
    fn signs_and_verifies() {
        let priv_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        let signed = SignedObject::sign(&priv_key, Payload { value: 42 }).unwrap();
        assert!(signed.verify_with(&pub_key).is_ok());
    }

    #[test]
    fn rejects_wrong_key() {
        let priv_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let other = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let other_pub = RsaPublicKey::from(&other);
        let signed = SignedObject::sign(&priv_key, Payload { value: 7 }).unwrap();
        assert!(signed.verify_with(&other_pub).is_err());
    }
}
