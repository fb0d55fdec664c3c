//! Named key pair/public key types (§3): a raw key plus the human
//! comment that authorized-keys files and verification results carry
//! around as the "verificator name".

use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

/// A long-lived asymmetric key pair plus an identifying comment, e.g.
/// `rsa-key-2026-07-28-153045123` (§4.3).
#[derive(Serialize, Deserialize)]
pub struct NamedKeyPair {
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
    pub comment: String,
}

impl NamedKeyPair {
    pub fn new(private: RsaPrivateKey, comment: String) -> NamedKeyPair {
        let public = RsaPublicKey::from(&private);
        NamedKeyPair {
            private,
            public,
            comment,
        }
    }

    pub fn as_named_public(&self) -> NamedPublicKey {
        NamedPublicKey {
            public: self.public.clone(),
            comment: self.comment.clone(),
        }
    }
}

/// A public key loaded from an authorized-keys line, tagged with the
/// comment that names its owner (§4.2).
#[derive(Clone, Serialize, Deserialize)]
pub struct NamedPublicKey {
    pub public: RsaPublicKey,
    pub comment: String,
}

/// `rsa-key-YYYY-MM-DD-HHmmssSSS`, the comment format assigned to a
/// freshly generated key pair (§4.3).
pub fn timestamp_comment(now: chrono::DateTime<chrono::Local>) -> String {
    format!("rsa-key-{}", now.format("%Y-%m-%d-%H%M%S%3f"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn comment_format() {
        let ts = chrono::Local.with_ymd_and_hms(2026, 7, 28, 15, 30, 45).unwrap();
        let comment = timestamp_comment(ts);
        assert!(comment.starts_with("rsa-key-2026-07-28-153045"));
    }
}
