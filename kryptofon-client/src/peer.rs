//! Remote peer (§4.10): an inbound-PDU queue drained by a dedicated
//! worker task, which parses each datagram and dispatches it into the
//! bound call context, plus a second tick task that drives the
//! real-time audio pipeline (§4.8, §4.11) for the life of the call.

use crate::datagram::DatagramChannel;
use kryptofon_media::{AudioDevice, Codec, NullDevice, VoiceSender, FRAME_INTERVAL_MS};
use kryptofon_proto::{CallContext, CallState, Pdu, PduType};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One remote party's address, inbound queue, call state and audio
/// pipeline.
///
/// `last_receive_ms` is an offset from `epoch`, not wall-clock, so
/// `idle()` only ever needs a monotonic `Instant` subtraction.
pub struct RemotePeer {
    pub addr: SocketAddr,
    pub display_name: String,
    epoch: Instant,
    last_receive_ms: AtomicU64,
    call: Mutex<CallContext>,
    audio: Mutex<AudioDevice<NullDevice>>,
    sender: Mutex<VoiceSender>,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl RemotePeer {
    /// Construct a peer already in `call`'s (established) state, and
    /// spawn its two tasks: the inbound worker, which parses each
    /// datagram and forwards accepted voice PDUs to `voice_tx`, and the
    /// audio tick, which rings back until the first inbound voice PDU
    /// arrives and then plays/sends real audio every `FRAME_INTERVAL_MS`.
    pub fn spawn(
        addr: SocketAddr,
        display_name: String,
        call: CallContext,
        datagram: Weak<DatagramChannel>,
        voice_tx: mpsc::UnboundedSender<Pdu>,
        run: CancellationToken,
    ) -> std::sync::Arc<RemotePeer> {
        let mut audio = AudioDevice::new(NullDevice::new());
        audio.start_record();
        audio.start_ring();
        let sender = VoiceSender::new(call.start_ts_ms(), Codec::Alaw);

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let peer = std::sync::Arc::new(RemotePeer {
            addr,
            display_name,
            epoch: Instant::now(),
            last_receive_ms: AtomicU64::new(0),
            call: Mutex::new(call),
            audio: Mutex::new(audio),
            sender: Mutex::new(sender),
            inbound_tx,
        });

        let worker_peer = peer.clone();
        let worker_run = run.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_run.cancelled() => break,
                    received = inbound_rx.recv() => {
                        match received {
                            Some(bytes) => worker_peer.handle_datagram(&bytes, &voice_tx),
                            None => break,
                        }
                    }
                }
            }
        });

        let tick_peer = peer.clone();
        tokio::spawn(tick_peer.run_audio_tick(datagram, run));

        peer
    }

    fn handle_datagram(&self, bytes: &[u8], voice_tx: &mpsc::UnboundedSender<Pdu>) {
        let pdu = match Pdu::parse(bytes) {
            Ok(pdu) => pdu,
            Err(e) => {
                log::warn!("dropping malformed PDU from {}: {e}", self.addr);
                return;
            }
        };

        if !pdu.matches_fixed_call() {
            log::warn!(
                "dropping PDU from {} with mismatched call numbers (src={:#06x} dst={:#06x})",
                self.addr, pdu.src_call, pdu.dst_call
            );
            return;
        }

        let became_audible = {
            let mut call = self.call.lock().expect("call lock poisoned");
            if !call.accept_in_seq(pdu.out_seq) {
                log::warn!("dropping out-of-order PDU from {} (out_seq={})", self.addr, pdu.out_seq);
                return;
            }
            matches!(pdu.pdu_type, PduType::Voice) && call.note_voice_received()
        };

        if matches!(pdu.pdu_type, PduType::Voice) {
            if let Some(codec) = Codec::from_subclass(pdu.subclass) {
                let mut audio = self.audio.lock().expect("audio lock poisoned");
                if let Some(sample) = pdu.voice_sample(audio.sample_size()) {
                    let pcm = codec.convert_to_pcm(sample);
                    audio.write_buffered(pcm, pdu.timestamp);
                }
                if became_audible {
                    audio.stop_ring();
                    audio.start_play();
                }
            } else {
                log::warn!("dropping voice PDU from {} with unknown codec subclass", self.addr);
            }
        }

        if voice_tx.send(pdu).is_err() {
            log::debug!("voice receiver for {} gone, dropping PDU", self.addr);
        }
    }

    /// 20 ms tick: advance ring tone or real playback, read one
    /// microphone frame and hand any produced outbound PDU to the
    /// datagram channel. Stops once the call leaves `Established`.
    async fn run_audio_tick(self: std::sync::Arc<Self>, datagram: Weak<DatagramChannel>, run: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_INTERVAL_MS));
        let mut frame_index = 0u64;
        loop {
            tokio::select! {
                _ = run.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let still_established = {
                let call = self.call.lock().expect("call lock poisoned");
                call.state() == CallState::Established
            };
            if !still_established {
                return;
            }

            let outbound = {
                let mut audio = self.audio.lock().expect("audio lock poisoned");
                kryptofon_media::ring_tone::ring_tick(&mut audio, frame_index);
                audio.playback_tick();
                let mut call = self.call.lock().expect("call lock poisoned");
                let mut sender = self.sender.lock().expect("sender lock poisoned");
                sender.send(&mut audio, &mut call)
            };
            frame_index += 1;

            if let Some(pdu) = outbound {
                if let Some(channel) = datagram.upgrade() {
                    if let Err(e) = channel.send(&pdu, self.addr).await {
                        log::warn!("failed to send voice PDU to {}: {e}", self.addr);
                    }
                }
            }
        }
    }

    /// Enqueue a raw (already decrypted, if applicable) datagram for
    /// the worker task, and stamp the last-receive clock.
    pub fn enqueue(&self, bytes: Vec<u8>) {
        self.last_receive_ms.store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
        let _ = self.inbound_tx.send(bytes);
    }

    /// Time since the last datagram was enqueued.
    pub fn idle(&self) -> Duration {
        let last = self.last_receive_ms.load(Ordering::Relaxed);
        self.epoch.elapsed().saturating_sub(Duration::from_millis(last))
    }

    pub fn is_dead(&self, max_idle: Duration) -> bool {
        self.idle() > max_idle
    }

    pub fn with_call<R>(&self, f: impl FnOnce(&mut CallContext) -> R) -> R {
        let mut call = self.call.lock().expect("call lock poisoned");
        f(&mut call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_pdu_does_not_advance_inbound_sequence() {
        let run = CancellationToken::new();
        let (voice_tx, mut voice_rx) = mpsc::unbounded_channel();
        let peer = RemotePeer::spawn(
            "127.0.0.1:1".parse().unwrap(),
            "bob".to_string(),
            CallContext::new(0),
            Weak::new(),
            voice_tx,
            run.clone(),
        );

        peer.enqueue(vec![0u8; 3]); // too short
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(voice_rx.try_recv().is_err());
        run.cancel();
    }

    #[tokio::test]
    async fn idle_tracks_time_since_last_enqueue() {
        let run = CancellationToken::new();
        let (voice_tx, _voice_rx) = mpsc::unbounded_channel();
        let peer = RemotePeer::spawn(
            "127.0.0.1:1".parse().unwrap(),
            "bob".to_string(),
            CallContext::new(0),
            Weak::new(),
            voice_tx,
            run.clone(),
        );
        assert!(peer.is_dead(Duration::from_millis(0)) || peer.idle() >= Duration::from_millis(0));
        peer.enqueue(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!peer.is_dead(Duration::from_secs(10)));
        run.cancel();
    }
}
