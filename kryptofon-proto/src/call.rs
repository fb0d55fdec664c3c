//! Call sequencing and the call state machine (§4.10), extracted from
//! the PDU codec so it can be driven both by `kryptofon-client::peer`
//! (arrival) and `kryptofon-media::sender` (departure) without either
//! depending on the other.
//!
//! The outbound/inbound counters are a small struct that only ever
//! hands out the next value, post-incrementing internal state.

use crate::pdu::{FIXED_DST_CALL, FIXED_SRC_CALL};

/// The call lifecycle state machine (§4.10).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CallState {
    Idle,
    Dialing,
    Alerting,
    Established,
}

/// Per-call sequencing, timing and state.
///
/// `start_ts_ms` is reset when the call transitions into
/// [`CallState::Established`]; `first_voice_received` flips once and is
/// used upstream to stop local ringback on the first inbound voice PDU.
#[derive(Clone)]
pub struct CallContext {
    state: CallState,
    out_seq: u8,
    expected_in_seq: u8,
    src_call: u16,
    dst_call: u16,
    start_ts_ms: u64,
    first_voice_received: bool,
}

impl CallContext {
    /// Construct a fresh call context at `CallState::Idle`, with the
    /// fixed call-number pairing from §3.
    pub fn new(now_ms: u64) -> CallContext {
        CallContext {
            state: CallState::Idle,
            out_seq: 0,
            expected_in_seq: 0,
            src_call: FIXED_SRC_CALL,
            dst_call: FIXED_DST_CALL,
            start_ts_ms: now_ms,
            first_voice_received: false,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn src_call(&self) -> u16 {
        self.src_call
    }

    pub fn dst_call(&self) -> u16 {
        self.dst_call
    }

    pub fn start_ts_ms(&self) -> u64 {
        self.start_ts_ms
    }

    pub fn first_voice_received(&self) -> bool {
        self.first_voice_received
    }

    /// The next outbound sequence number, post-incrementing mod 256.
    pub fn next_out(&mut self) -> u8 {
        let v = self.out_seq;
        self.out_seq = self.out_seq.wrapping_add(1);
        v
    }

    /// The inbound sequence value we currently expect from the peer,
    /// echoed back in our own outbound header's `in_seq` field.
    pub fn current_in(&self) -> u8 {
        self.expected_in_seq
    }

    /// Offer a received outbound sequence number. Advances the expected
    /// value and returns `true` iff it matched (§3 invariant: "Inbound
    /// sequence advances only when the received outbound sequence equals
    /// the expected value"); otherwise the frame is dropped by the
    /// caller and the expectation is left unchanged.
    pub fn accept_in_seq(&mut self, received_out_seq: u8) -> bool {
        if received_out_seq == self.expected_in_seq {
            self.expected_in_seq = self.expected_in_seq.wrapping_add(1);
            true
        } else {
            false
        }
    }

    /// Transition to `CallState::Dialing` (invite sent).
    pub fn dial(&mut self) {
        self.state = CallState::Dialing;
    }

    /// Transition to `CallState::Alerting` (ring received/sent).
    pub fn alert(&mut self) {
        if self.state == CallState::Dialing || self.state == CallState::Idle {
            self.state = CallState::Alerting;
        }
    }

    /// Transition into `CallState::Established`, resetting the start
    /// timestamp (§4.10: "on entering ESTABLISHED ... reset").
    pub fn establish(&mut self, now_ms: u64) {
        self.state = CallState::Established;
        self.start_ts_ms = now_ms;
    }

    /// Record that a voice PDU has been received; returns `true` only on
    /// the transition from not-yet-received to received, so callers can
    /// stop ringback exactly once.
    pub fn note_voice_received(&mut self) -> bool {
        if self.first_voice_received {
            false
        } else {
            self.first_voice_received = true;
            true
        }
    }

    /// Tear the call down to `CallState::Idle` (BYE or timeout).
    pub fn hang_up(&mut self) {
        self.state = CallState::Idle;
        self.first_voice_received = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_sequence_filter() {
        let mut call = CallContext::new(0);
        assert!(call.accept_in_seq(0));
        assert!(!call.accept_in_seq(0)); // replay, expected is now 1
        assert!(!call.accept_in_seq(5)); // out of order
        assert!(call.accept_in_seq(1));
    }

    #[test]
    fn state_machine_transitions() {
        let mut call = CallContext::new(0);
        assert_eq!(call.state(), CallState::Idle);
        call.dial();
        assert_eq!(call.state(), CallState::Dialing);
        call.alert();
        assert_eq!(call.state(), CallState::Alerting);
        call.establish(1000);
        assert_eq!(call.state(), CallState::Established);
        assert_eq!(call.start_ts_ms(), 1000);
        call.hang_up();
        assert_eq!(call.state(), CallState::Idle);
    }

    #[test]
    fn first_voice_flag_fires_once() {
        let mut call = CallContext::new(0);
        assert!(call.note_voice_received());
        assert!(!call.note_voice_received());
    }
}
