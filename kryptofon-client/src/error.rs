use std::fmt;

/// Client-level errors, grouped by kind rather than by source type
/// (§7): most kinds are handled locally (logged, loop continues) and
/// never reach a caller — this enum exists for the kinds that do.
#[derive(Debug)]
pub enum ClientError {
    /// No free UDP port in `[base, base+100)` (§4.9) — fatal for the
    /// media subsystem.
    NoFreePort { base: u16 },
    /// Identity init failed even after the one-shot regenerate
    /// fallback — fatal for the cipher subsystem, but text-only
    /// signaling still works.
    IdentityUnavailable(kryptofon_crypto::CryptoError),
    Io(std::io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NoFreePort { base } => {
                write!(f, "no free UDP port in [{base}, {})", base + 100)
            }
            ClientError::IdentityUnavailable(e) => write!(f, "identity unavailable: {e}"),
            ClientError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e)
    }
}

impl From<kryptofon_crypto::CryptoError> for ClientError {
    fn from(e: kryptofon_crypto::CryptoError) -> Self {
        ClientError::IdentityUnavailable(e)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
