//! Wire framing and grammar shared by the rendezvous client and the
//! datagram channel: the PDU codec, per-call sequencing, and the
//! `[$] VERB ...` control message grammar.
//!
//! This crate has no I/O of its own — sockets live in `kryptofon-client`.

pub mod call;
pub mod octets;
pub mod pdu;
pub mod signaling;

pub use call::{CallContext, CallState};
pub use octets::{OctetBuffer, OutOfRange};
pub use pdu::{Pdu, PduError, PduType, Subclass, FIXED_DST_CALL, FIXED_SRC_CALL};
pub use signaling::{list_matches, should_handle, ControlMessage, ControlParseError, RendezvousLine};
