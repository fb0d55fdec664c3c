//! Rendezvous client, session controller, datagram transport and
//! remote peer bookkeeping: the pieces that turn the proto, crypto and
//! media crates into an actual two-party call.

pub mod config;
pub mod controller;
pub mod datagram;
pub mod error;
pub mod peer;
pub mod rendezvous;

pub use config::Config;
pub use controller::{CallStatus, SessionController, TrustStatus};
pub use datagram::DatagramChannel;
pub use error::{ClientError, Result};
pub use peer::RemotePeer;
pub use rendezvous::{InboundLine, RendezvousClient};
