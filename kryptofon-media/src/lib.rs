//! Audio codecs, the de-jitter playback ring, ring-tone generation and
//! the per-call voice sender, built against an abstract PCM device
//! trait (no real hardware access here).

pub mod codec;
pub mod device;
pub mod jitter;
pub mod ring_tone;
pub mod sender;

pub use codec::Codec;
pub use device::{AudioBuffer, AudioDevice, NullDevice, PcmDevice, FRAME_COUNT, FRAME_INTERVAL_MS, LLBS, PLAYBACK_CAPACITY, SAMPLE_SIZE};
pub use sender::VoiceSender;
