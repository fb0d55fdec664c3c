//! # kryptofon — peer-to-peer encrypted telephony
//!
//! `kryptofon` is a modular Rust implementation of a secure two-party
//! voice/text telephony endpoint. It consists of four focused
//! sub-crates wired together here for convenience:
//!
//! | Sub-crate          | Role                                               |
//! |--------------------|-----------------------------------------------------|
//! | `kryptofon-proto`  | PDU wire framing, call state machine, signaling grammar |
//! | `kryptofon-crypto` | RSA identity, authorized keys, session cipher       |
//! | `kryptofon-media`  | Audio codecs, de-jitter buffer, ring tone            |
//! | `kryptofon-client` | Rendezvous client, session controller, datagram transport |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! # async fn demo() -> kryptofon::client::Result<()> {
//! use kryptofon::client::Config;
//!
//! let config = Config { local_user_id: "alice".to_string(), ..Default::default() };
//! # let _ = config;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

/// Re-export of [`kryptofon_proto`] — PDUs, call state, signaling grammar.
pub use kryptofon_proto as proto;

/// Re-export of [`kryptofon_crypto`] — identity, authorized keys, session cipher.
pub use kryptofon_crypto as crypto;

/// Re-export of [`kryptofon_media`] — codecs, de-jitter buffer, ring tone.
pub use kryptofon_media as media;

/// Re-export of [`kryptofon_client`] — rendezvous client, session controller.
pub use kryptofon_client as client;

// ─── Convenience re-exports ──────────────────────────────────────────────

pub use kryptofon_client::{CallStatus, Config, SessionController, TrustStatus};
pub use kryptofon_crypto::Identity;
pub use kryptofon_proto::{CallContext, Pdu};
