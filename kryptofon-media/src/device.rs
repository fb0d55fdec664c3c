//! Audio device abstraction (§4.8): fixed 8 kHz/16-bit/mono capture and
//! playback rings, built against an abstract [`PcmDevice`] trait since
//! real hardware access is out of scope here.

use crate::jitter::{conceal, needs_concealment, SkewAction, SkewTracker};
use std::time::Instant;

/// 20 ms per frame.
pub const FRAME_INTERVAL_MS: u64 = 20;
/// Capture ring depth.
pub const FRAME_COUNT: usize = 10;
/// Low-water mark, in frames, the device is allowed to drain to before
/// concealment kicks in.
pub const LLBS: usize = 6;
/// Playback ring depth.
pub const PLAYBACK_CAPACITY: usize = 2 * FRAME_COUNT;
/// 8 kHz, 16-bit signed linear, mono: bytes per 20 ms frame.
pub const SAMPLE_SIZE: usize = 320;
/// Ring fill required before playback starts emitting audio.
pub const PLAYBACK_PRIME_FILL: usize = (FRAME_COUNT + LLBS) / 2;

/// Abstracts the platform PCM device: capture, playback, and a device
/// clock used to stamp captured frames.
pub trait PcmDevice: Send {
    /// Pull one ready capture frame, or `None` if nothing is ready yet.
    fn capture_frame(&mut self) -> Option<Vec<u8>>;
    /// Push one frame straight to the output (bypassing the playback
    /// ring) — used by the playback loop and by ring-tone generation.
    fn playback_frame(&mut self, data: &[u8]);
    /// How many frames' worth of audio the output device currently has
    /// buffered and not yet played (used by the concealment trigger).
    fn available_frames(&self) -> usize;
    /// The device's own millisecond clock, used to stamp captured
    /// frames and drive skew compensation.
    fn now_ms(&self) -> u64;
    fn sample_size(&self) -> usize {
        SAMPLE_SIZE
    }
}

/// Byte buffer plus timestamp plus written flag (§3).
#[derive(Clone)]
pub struct AudioBuffer {
    pub data: Vec<u8>,
    pub timestamp_ms: u64,
    pub written: bool,
}

impl AudioBuffer {
    fn empty(sample_size: usize) -> AudioBuffer {
        AudioBuffer {
            data: vec![0u8; sample_size],
            timestamp_ms: 0,
            written: false,
        }
    }
}

/// Fixed-size capture ring: one dedicated writer (the capture loop),
/// read by the send tick.
struct CaptureRing {
    slots: Vec<AudioBuffer>,
    write_cursor: u64,
    last_ts: Option<u64>,
}

impl CaptureRing {
    fn new(sample_size: usize) -> CaptureRing {
        CaptureRing {
            slots: (0..FRAME_COUNT).map(|_| AudioBuffer::empty(sample_size)).collect(),
            write_cursor: 0,
            last_ts: None,
        }
    }

    /// Write a captured frame, dropping it if its timestamp isn't
    /// strictly increasing (§4.8: "drops samples whose stamp is not
    /// monotonically increasing").
    fn push(&mut self, data: Vec<u8>, timestamp_ms: u64) -> bool {
        if let Some(last) = self.last_ts {
            if timestamp_ms <= last {
                return false;
            }
        }
        let idx = (self.write_cursor as usize) % self.slots.len();
        self.slots[idx] = AudioBuffer {
            data,
            timestamp_ms,
            written: true,
        };
        self.write_cursor += 1;
        self.last_ts = Some(timestamp_ms);
        true
    }

    fn latest(&self) -> Option<&AudioBuffer> {
        if self.write_cursor == 0 {
            None
        } else {
            let idx = ((self.write_cursor - 1) as usize) % self.slots.len();
            Some(&self.slots[idx])
        }
    }
}

/// Fixed-size playback ring, written by inbound voice PDUs, drained by
/// the playback loop.
struct PlaybackRing {
    slots: Vec<AudioBuffer>,
    write_slot: Option<u64>,
    read_slot: u64,
}

impl PlaybackRing {
    fn new(sample_size: usize) -> PlaybackRing {
        PlaybackRing {
            slots: (0..PLAYBACK_CAPACITY).map(|_| AudioBuffer::empty(sample_size)).collect(),
            write_slot: None,
            read_slot: 0,
        }
    }

    fn cap(&self) -> usize {
        self.slots.len()
    }

    /// `writeBuffered` (§4.8): compute the destination slot from
    /// `timestamp_ms / FRAME_INTERVAL_MS`, write it, and force a
    /// catch-up (dropping history) if the slot is too far ahead of the
    /// read cursor to fit in the ring.
    fn write_buffered(&mut self, data: Vec<u8>, timestamp_ms: u64) {
        let slot = timestamp_ms / FRAME_INTERVAL_MS;
        let idx = (slot as usize) % self.slots.len();
        self.slots[idx] = AudioBuffer {
            data,
            timestamp_ms,
            written: true,
        };
        if slot >= self.read_slot + self.cap() as u64 {
            self.read_slot = slot + 1 - self.cap() as u64;
        }
        self.write_slot = Some(slot);
    }

    fn fill(&self) -> usize {
        match self.write_slot {
            Some(w) if w >= self.read_slot => (w - self.read_slot + 1) as usize,
            _ => 0,
        }
    }

    /// Pop the next slot to play, without advancing past data that
    /// hasn't been written yet.
    fn take_next(&mut self) -> AudioBuffer {
        let idx = (self.read_slot as usize) % self.slots.len();
        let slot = self.slots[idx].clone();
        self.read_slot += 1;
        slot
    }
}

/// Playback/record/ring state plus the two rings, parameterized over a
/// concrete [`PcmDevice`].
pub struct AudioDevice<D: PcmDevice> {
    device: D,
    capture: CaptureRing,
    playback: PlaybackRing,
    recording: bool,
    playing: bool,
    ringing: bool,
    playback_primed: bool,
    last_mic_ts: Option<u64>,
    skew: SkewTracker,
}

impl<D: PcmDevice> AudioDevice<D> {
    pub fn new(device: D) -> AudioDevice<D> {
        let sample_size = device.sample_size();
        AudioDevice {
            device,
            capture: CaptureRing::new(sample_size),
            playback: PlaybackRing::new(sample_size),
            recording: false,
            playing: false,
            ringing: false,
            playback_primed: false,
            last_mic_ts: None,
            skew: SkewTracker::new(),
        }
    }

    pub fn sample_size(&self) -> usize {
        self.device.sample_size()
    }

    pub fn start_record(&mut self) {
        self.recording = true;
    }

    pub fn stop_record(&mut self) {
        self.recording = false;
        self.capture.last_ts = None;
    }

    pub fn start_play(&mut self) {
        self.playing = true;
        self.playback_primed = false;
    }

    pub fn stop_play(&mut self) {
        self.playing = false;
    }

    pub fn start_ring(&mut self) {
        self.ringing = true;
    }

    pub fn stop_ring(&mut self) {
        self.ringing = false;
    }

    pub fn is_ringing(&self) -> bool {
        self.ringing
    }

    /// One capture-loop iteration: read a frame if ready, stamp and
    /// store it, returning `(bytes, timestamp_ms)` on success.
    pub fn read_with_timestamp(&mut self) -> Option<(Vec<u8>, u64)> {
        if !self.recording {
            return None;
        }
        let data = self.device.capture_frame()?;
        let ts = self.device.now_ms();
        if self.capture.push(data.clone(), ts) {
            Some((data, ts))
        } else {
            None
        }
    }

    /// Enqueue an inbound voice frame for de-jittered playback.
    pub fn write_buffered(&mut self, data: Vec<u8>, timestamp_ms: u64) {
        self.playback.write_buffered(data, timestamp_ms);
    }

    /// Write straight to the output device, bypassing the de-jitter
    /// ring (used by ring-tone generation, §4.8).
    pub fn write_directly(&mut self, data: &[u8]) {
        self.device.playback_frame(data);
    }

    /// One playback-loop iteration. Returns the frame actually handed
    /// to the device, or `None` if playback hasn't started yet or is
    /// waiting out a bounded retry.
    pub fn playback_tick(&mut self) -> Option<Vec<u8>> {
        if !self.playing {
            return None;
        }

        if !self.playback_primed {
            if self.playback.fill() < PLAYBACK_PRIME_FILL {
                return None;
            }
            self.playback_primed = true;
        }

        let idx = (self.playback.read_slot as usize) % self.playback.cap();
        if !self.playback.slots[idx].written {
            let has_previous = self.playback.read_slot > 0;
            if needs_concealment(
                self.device.available_frames(),
                self.playback.fill(),
                self.playback.cap(),
                has_previous,
            ) {
                let prev_idx = ((self.playback.read_slot.saturating_sub(1)) as usize) % self.playback.cap();
                let next_idx = ((self.playback.read_slot + 1) as usize) % self.playback.cap();
                let prev = self.playback.slots[prev_idx].data.clone();
                let next = self.playback.slots[next_idx].data.clone();
                let concealed = conceal(&prev, &next);
                self.playback.read_slot += 1;
                self.device.playback_frame(&concealed);
                return Some(concealed);
            }
            return None;
        }

        let slot = self.playback.take_next();

        if let Some(last_mic_ts) = self.last_mic_ts {
            let delta = slot.timestamp_ms as i64 - last_mic_ts as i64;
            match self.skew.observe(delta) {
                SkewAction::DropOneFrame => self.playback.read_slot += 1,
                SkewAction::DropTwoFrames => self.playback.read_slot += 2,
                SkewAction::DuplicateOneFrame => {
                    self.device.playback_frame(&slot.data);
                }
                SkewAction::None => {}
            }
        }
        self.last_mic_ts = self.capture.latest().map(|b| b.timestamp_ms).or(Some(slot.timestamp_ms));

        self.device.playback_frame(&slot.data);
        Some(slot.data)
    }
}

/// A `PcmDevice` that never captures and never actually plays anything,
/// standing in for real hardware access (deliberately out of scope
/// here, §4.8). `now_ms` still runs off a real clock so the capture
/// timestamp monotonicity check and skew compensation behave the same
/// as they would against a real device.
pub struct NullDevice {
    clock: Instant,
}

impl NullDevice {
    pub fn new() -> NullDevice {
        NullDevice { clock: Instant::now() }
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmDevice for NullDevice {
    fn capture_frame(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn playback_frame(&mut self, _data: &[u8]) {}

    fn available_frames(&self) -> usize {
        0
    }

    fn now_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MockDevice {
        capture_queue: VecDeque<(Vec<u8>, u64)>,
        playback_log: Vec<Vec<u8>>,
        clock_ms: u64,
        available: usize,
    }

    impl MockDevice {
        fn new() -> MockDevice {
            MockDevice {
                capture_queue: VecDeque::new(),
                playback_log: Vec::new(),
                clock_ms: 0,
                available: 0,
            }
        }
    }

    impl PcmDevice for MockDevice {
        fn capture_frame(&mut self) -> Option<Vec<u8>> {
            self.capture_queue.pop_front().map(|(data, ts)| {
                self.clock_ms = ts;
                data
            })
        }

        fn playback_frame(&mut self, data: &[u8]) {
            self.playback_log.push(data.to_vec());
        }

        fn available_frames(&self) -> usize {
            self.available
        }

        fn now_ms(&self) -> u64 {
            self.clock_ms
        }

        fn sample_size(&self) -> usize {
            4
        }
    }

    #[test]
    fn capture_drops_non_monotonic_timestamps() {
        let mut device = AudioDevice::new(MockDevice::new());
        device.start_record();
        device.device.capture_queue.push_back((vec![1, 2, 3, 4], 20));
        device.device.capture_queue.push_back((vec![5, 6, 7, 8], 10)); // stale
        assert!(device.read_with_timestamp().is_some());
        assert!(device.read_with_timestamp().is_none());
    }

    #[test]
    fn playback_waits_for_prime_fill() {
        let mut device = AudioDevice::new(MockDevice::new());
        device.start_play();
        for ts in 0..(PLAYBACK_PRIME_FILL as u64 - 1) {
            device.write_buffered(vec![1, 2, 3, 4], ts * FRAME_INTERVAL_MS);
        }
        assert!(device.playback_tick().is_none());
        device.write_buffered(vec![1, 2, 3, 4], PLAYBACK_PRIME_FILL as u64 * FRAME_INTERVAL_MS);
        assert!(device.playback_tick().is_some());
    }

    #[test]
    fn write_buffered_catch_up_drops_history_when_far_ahead() {
        let mut ring = PlaybackRing::new(4);
        ring.write_buffered(vec![0; 4], 0);
        let far_slot_ts = (ring.cap() as u64 + 5) * FRAME_INTERVAL_MS;
        ring.write_buffered(vec![1; 4], far_slot_ts);
        assert!(ring.read_slot > 0);
    }
}
