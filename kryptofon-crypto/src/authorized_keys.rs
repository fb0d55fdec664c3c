//! Authorized public keys store (§4.2): a reloadable, process-wide list
//! of named public keys used to verify signed envelopes.

use crate::named_key::NamedPublicKey;
use crate::signed::SignedObject;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::RsaPublicKey;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::RwLock;

/// Authorized-keys file name under the identity directory (§6).
pub const AUTHORIZED_KEYS_FILENAME: &str = "mykf-authorized-keys.txt";

/// Holds the current authorized-keys list behind a lock that is only
/// ever replaced wholesale, never mutated in place, so a verify in
/// progress always sees one consistent snapshot (§3 invariant: "The
/// authorized-keys set is immutable during a verify operation").
pub struct AuthorizedKeys {
    keys: RwLock<Vec<NamedPublicKey>>,
}

impl Default for AuthorizedKeys {
    fn default() -> Self {
        AuthorizedKeys {
            keys: RwLock::new(Vec::new()),
        }
    }
}

impl AuthorizedKeys {
    pub fn new() -> AuthorizedKeys {
        AuthorizedKeys::default()
    }

    /// Parse `contents` (the file's text) and atomically replace the
    /// current list. Malformed lines are logged and skipped (§4.2).
    pub fn reload(&self, contents: &str) {
        let keys = parse_authorized_keys(contents);
        *self.keys.write().expect("authorized keys lock poisoned") = keys;
    }

    /// Construct directly from an already-parsed list, for tests and
    /// for callers that build trust sets in memory.
    pub fn from_keys(keys: Vec<NamedPublicKey>) -> AuthorizedKeys {
        AuthorizedKeys {
            keys: RwLock::new(keys),
        }
    }

    /// Verify `signed` against every key in the current snapshot,
    /// returning the first matching key's comment (§4.2: "on the first
    /// key that validates ... returns that key's comment").
    pub fn verify<T: Serialize + DeserializeOwned>(&self, signed: &SignedObject<T>) -> Option<String> {
        let keys = self.keys.read().expect("authorized keys lock poisoned");
        keys.iter()
            .find(|k| signed.verify_with(&k.public).is_ok())
            .map(|k| k.comment.clone())
    }

    /// Load `mykf-authorized-keys.txt` from `dir`, if present. A missing
    /// file is not an error: it just means nobody is trusted yet.
    pub fn load_from_dir(dir: &Path) -> std::io::Result<AuthorizedKeys> {
        let path = dir.join(AUTHORIZED_KEYS_FILENAME);
        let store = AuthorizedKeys::new();
        match std::fs::read_to_string(&path) {
            Ok(contents) => store.reload(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.keys.read().expect("authorized keys lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_authorized_keys(contents: &str) -> Vec<NamedPublicKey> {
    let mut keys = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Ok(key) => keys.push(key),
            Err(reason) => log::warn!("authorized_keys line {}: {reason}", lineno + 1),
        }
    }
    keys
}

fn parse_line(line: &str) -> Result<NamedPublicKey, String> {
    let (b64, comment) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| "missing comment field".to_string())?;
    let bytes = STANDARD.decode(b64).map_err(|e| e.to_string())?;
    let public: RsaPublicKey = bincode::deserialize(&bytes).map_err(|e| e.to_string())?;
    Ok(NamedPublicKey {
        public,
        comment: comment.trim().to_string(),
    })
}

/// Serialize a public key as the Base64 token used by an
/// authorized-keys line, for export/`NamedPublicKey` file writers.
pub fn encode_public_key(key: &RsaPublicKey) -> String {
    let bytes = bincode::serialize(key).expect("RsaPublicKey always serializes");
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signed::SignedObject;
    use rand::rngs::OsRng;
    use rsa::RsaPrivateKey;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Payload(u32);

    #[test]
    fn malformed_lines_are_skipped() {
        let keys = AuthorizedKeys::new();
        keys.reload("# a comment\n\nnot-base64-at-all\nalso bad no comment");
        assert!(keys.is_empty());
    }

    #[test]
    fn reload_replaces_and_verify_finds_first_match() {
        let priv_a = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pub_a = rsa::RsaPublicKey::from(&priv_a);
        let line = format!("{} alice", encode_public_key(&pub_a));

        let store = AuthorizedKeys::new();
        store.reload(&line);
        assert_eq!(store.len(), 1);

        let signed = SignedObject::sign(&priv_a, Payload(1)).unwrap();
        assert_eq!(store.verify(&signed), Some("alice".to_string()));

        let priv_b = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let signed_b = SignedObject::sign(&priv_b, Payload(2)).unwrap();
        assert_eq!(store.verify(&signed_b), None);
    }
}
