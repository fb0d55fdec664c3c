//! Local ring/ringback tone generation (§4.8): two superposed
//! sinusoids written directly to the output device, bypassing the
//! de-jitter ring, with an on/off cadence.

use crate::device::{PcmDevice, AudioDevice, FRAME_INTERVAL_MS, SAMPLE_SIZE};
use std::f64::consts::PI;

const ENVELOPE_HZ: f64 = 25.0;
const TONE_HZ: f64 = 420.0;
const LEVEL_DBFS: f64 = -12.0;
const SAMPLE_RATE_HZ: f64 = 8_000.0;
const ON_FRAMES: u32 = 40;
const OFF_FRAMES: u32 = 80;

fn amplitude() -> f64 {
    i16::MAX as f64 * 10f64.powf(LEVEL_DBFS / 20.0)
}

/// Render one 20 ms frame of the dual-sinusoid ring tone starting at
/// `frame_index` frames into the tone (each frame is
/// `SAMPLE_SIZE / 2` 16-bit samples).
pub fn render_frame(frame_index: u64) -> Vec<u8> {
    let samples_per_frame = SAMPLE_SIZE / 2;
    let amp = amplitude();
    let mut out = Vec::with_capacity(SAMPLE_SIZE);
    for n in 0..samples_per_frame {
        let t = (frame_index as f64 * samples_per_frame as f64 + n as f64) / SAMPLE_RATE_HZ;
        let envelope = (2.0 * PI * ENVELOPE_HZ * t).sin().abs();
        let tone = (2.0 * PI * TONE_HZ * t).sin();
        let sample = (amp * envelope * tone) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Is ring frame number `frame_index` within an "on" burst of the
/// 40-frame-on / 80-frame-off cadence?
pub fn is_audible(frame_index: u64) -> bool {
    (frame_index % (ON_FRAMES + OFF_FRAMES) as u64) < ON_FRAMES as u64
}

/// Drive one ring-tone tick against `device`: if ringing is enabled and
/// this frame falls in an audible burst, render and write it directly.
pub fn ring_tick<D: PcmDevice>(device: &mut AudioDevice<D>, frame_index: u64) {
    if !device.is_ringing() {
        return;
    }
    if is_audible(frame_index) {
        device.write_directly(&render_frame(frame_index));
    }
}

pub fn frame_interval_ms() -> u64 {
    FRAME_INTERVAL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_is_forty_on_eighty_off() {
        for f in 0..40 {
            assert!(is_audible(f), "frame {f} should be audible");
        }
        for f in 40..120 {
            assert!(!is_audible(f), "frame {f} should be silent");
        }
        assert!(is_audible(120));
    }

    #[test]
    fn rendered_frame_has_expected_byte_length() {
        assert_eq!(render_frame(0).len(), SAMPLE_SIZE);
    }

    #[test]
    fn amplitude_stays_within_16_bit_range() {
        for f in 0..10 {
            let frame = render_frame(f);
            for chunk in frame.chunks_exact(2) {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                assert!(sample.unsigned_abs() <= i16::MAX as u16);
            }
        }
    }
}
