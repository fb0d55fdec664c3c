//! Voice sender (§4.11): wired into an established call, ticks once
//! per 20 ms, reading one microphone frame and producing an outbound
//! voice PDU for the datagram channel to transmit.

use crate::codec::Codec;
use crate::device::{PcmDevice, AudioDevice, FRAME_INTERVAL_MS};
use kryptofon_proto::{CallContext, Pdu, PduType};

/// Drives the per-call 20 ms send cadence. `next_due_ts` starts at the
/// call's start timestamp and increments by `FRAME_INTERVAL_MS` every
/// tick, independent of the device's own capture timestamp (which is
/// read but unused in header math, per §4.11).
pub struct VoiceSender {
    codec: Codec,
    next_due_ts: u64,
}

impl VoiceSender {
    pub fn new(call_start_ts_ms: u64, codec: Codec) -> VoiceSender {
        VoiceSender {
            codec,
            next_due_ts: call_start_ts_ms,
        }
    }

    /// One send tick: read a microphone frame (if the device has one
    /// ready), encode it, and build the outbound PDU. Returns `None`
    /// when no capture frame was ready this tick.
    pub fn send<D: PcmDevice>(&mut self, device: &mut AudioDevice<D>, call: &mut CallContext) -> Option<Pdu> {
        let (pcm, _device_ts) = device.read_with_timestamp()?;
        let encoded = self.codec.convert_from_pcm(&pcm);
        let pdu = Pdu::for_send(call, PduType::Voice, self.codec.to_subclass(), self.next_due_ts, encoded);
        self.next_due_ts += FRAME_INTERVAL_MS;
        Some(pdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AudioDevice;
    use std::collections::VecDeque;

    struct MockDevice {
        queue: VecDeque<(Vec<u8>, u64)>,
        clock_ms: u64,
    }

    impl PcmDevice for MockDevice {
        fn capture_frame(&mut self) -> Option<Vec<u8>> {
            self.queue.pop_front().map(|(data, ts)| {
                self.clock_ms = ts;
                data
            })
        }
        fn playback_frame(&mut self, _data: &[u8]) {}
        fn available_frames(&self) -> usize {
            0
        }
        fn now_ms(&self) -> u64 {
            self.clock_ms
        }
        fn sample_size(&self) -> usize {
            4
        }
    }

    #[test]
    fn next_due_ts_increments_by_frame_interval_each_tick() {
        let mut device = AudioDevice::new(MockDevice {
            queue: VecDeque::from(vec![(vec![1, 2, 3, 4], 20), (vec![5, 6, 7, 8], 40)]),
            clock_ms: 0,
        });
        device.start_record();
        let mut call = CallContext::new(0);
        let mut sender = VoiceSender::new(100, Codec::Alaw);

        let first = sender.send(&mut device, &mut call).unwrap();
        assert_eq!(first.timestamp, 100);
        let second = sender.send(&mut device, &mut call).unwrap();
        assert_eq!(second.timestamp, 120);
        assert_eq!(second.out_seq, first.out_seq.wrapping_add(1));
    }
}
