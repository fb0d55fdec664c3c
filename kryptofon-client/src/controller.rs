//! Session state machine (§4.13): INVITE/RING/ACCEPT/BYE/IMSG over the
//! rendezvous line, with a 3s invite timeout and a 1s liveness check
//! once a call is established.

use crate::datagram::DatagramChannel;
use crate::error::Result;
use crate::peer::RemotePeer;
use crate::rendezvous::{InboundLine, RendezvousClient};
use crate::Config;
use kryptofon_crypto::{AuthorizedKeys, Identity, PeerPublicEncryptor, SessionCipher};
use kryptofon_proto::{should_handle, CallContext, ControlMessage, ControlParseError, Pdu};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const INVITE_TIMEOUT: Duration = Duration::from_secs(3);
const LIVENESS_POLL: Duration = Duration::from_secs(1);
const DEAD_PEER_THRESHOLD: Duration = Duration::from_millis(2500);

/// A pending outbound or inbound invite, tracked while waiting for the
/// other side's RING/ACCEPT. `peer_signed_pub_key_b64` is whichever
/// side's signed public key arrived with the INVITE or RING that
/// created this entry: the caller's key (stored at the callee, used to
/// encrypt the ACCEPT's session key) or the callee's key (stored at
/// the caller, used only for a trust check). `call` carries this
/// attempt's own `CallContext` through Dialing/Alerting so it reaches
/// `establish` already in the right state (§4.10/§4.13).
#[derive(Clone)]
struct PendingInvite {
    remote_user: String,
    remote_addr: String,
    remote_udp_port: u16,
    peer_signed_pub_key_b64: Option<String>,
    call: CallContext,
}

enum ControllerState {
    Idle,
    /// We sent an INVITE and are waiting for RING/ACCEPT.
    Dialing(PendingInvite),
    /// A peer INVITEd us and we rang; waiting for local accept or
    /// their timeout/BYE.
    Alerting(PendingInvite),
    Established {
        peer: Arc<RemotePeer>,
        remote_user: String,
        trust: TrustStatus,
    },
}

/// Whether the peer's signed public key on an established call matched
/// an authorized key (§4.13, §7 kind 5: a trust failure is advisory,
/// not fatal — the call proceeds but the UI can show the security
/// level).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TrustStatus {
    /// Verified against the authorized-keys entry with this comment.
    Verified(String),
    /// A signed key was presented but did not verify against any
    /// authorized key.
    Unverified,
    /// The peer sent no signed public key at all.
    NoKey,
}

/// Observable state, for callers that want to render call UI without
/// reaching into the controller's internals.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CallStatus {
    Idle,
    Dialing(String),
    Alerting(String),
    Established(String, TrustStatus),
}

pub struct SessionController {
    config: Config,
    identity: Arc<Identity>,
    authorized_keys: Arc<AuthorizedKeys>,
    rendezvous: RendezvousClient,
    datagram: Arc<DatagramChannel>,
    state: Mutex<ControllerState>,
    voice_tx: mpsc::UnboundedSender<Pdu>,
    text_tx: mpsc::UnboundedSender<(String, String)>,
    invite_epoch_ms: AtomicU64,
    run: CancellationToken,
}

impl SessionController {
    pub fn new(
        config: Config,
        identity: Arc<Identity>,
        authorized_keys: Arc<AuthorizedKeys>,
        rendezvous: RendezvousClient,
        datagram: Arc<DatagramChannel>,
        voice_tx: mpsc::UnboundedSender<Pdu>,
        text_tx: mpsc::UnboundedSender<(String, String)>,
        run: CancellationToken,
    ) -> Arc<SessionController> {
        Arc::new(SessionController {
            config,
            identity,
            authorized_keys,
            rendezvous,
            datagram,
            state: Mutex::new(ControllerState::Idle),
            voice_tx,
            text_tx,
            invite_epoch_ms: AtomicU64::new(0),
            run,
        })
    }

    pub fn status(&self) -> CallStatus {
        match &*self.state.lock().expect("state lock poisoned") {
            ControllerState::Idle => CallStatus::Idle,
            ControllerState::Dialing(p) => CallStatus::Dialing(p.remote_user.clone()),
            ControllerState::Alerting(p) => CallStatus::Alerting(p.remote_user.clone()),
            ControllerState::Established { remote_user, trust, .. } => CallStatus::Established(remote_user.clone(), trust.clone()),
        }
    }

    /// Drive the controller: drain inbound rendezvous lines and run the
    /// periodic invite-timeout / liveness checks, until `run` cancels.
    pub async fn drive(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<InboundLine>) {
        let mut ticker = tokio::time::interval(LIVENESS_POLL);
        loop {
            tokio::select! {
                _ = self.run.cancelled() => return,
                _ = ticker.tick() => self.on_tick(),
                line = inbound.recv() => {
                    match line {
                        Some(line) => self.on_line(line),
                        None => return,
                    }
                }
            }
        }
    }

    fn on_tick(&self) {
        let timed_out = matches!(&*self.state.lock().expect("state lock poisoned"), ControllerState::Dialing(_))
            && self.invite_epoch_ms.load(Ordering::Relaxed) > 0
            && now_ms().saturating_sub(self.invite_epoch_ms.load(Ordering::Relaxed)) > INVITE_TIMEOUT.as_millis() as u64;

        if timed_out {
            log::info!("invite timed out waiting for RING/ACCEPT");
            self.teardown();
        }

        if self.datagram.is_peer_dead(DEAD_PEER_THRESHOLD) {
            log::warn!("established peer has been silent past the dead-peer threshold");
        }
    }

    fn on_line(&self, inbound: InboundLine) {
        let line = inbound.line;
        if !line.is_control() {
            return; // plain chat noise on the rendezvous channel, not ours to handle
        }
        let message = match ControlMessage::parse(&line.body) {
            Ok(m) => m,
            Err(ControlParseError::NotControl) => return,
            Err(e) => {
                log::warn!("malformed control message from {}: {e}", line.user);
                return;
            }
        };

        match &message {
            ControlMessage::List { username_regex } => self.on_list(username_regex.as_deref()),
            ControlMessage::Alive => {}
            ControlMessage::Invite { local_name, .. }
            | ControlMessage::Ring { local_name, .. }
            | ControlMessage::Accept { local_name, .. }
            | ControlMessage::Bye { local_name, .. }
            | ControlMessage::Imsg { local_name, .. } => {
                if !should_handle(Some(local_name.as_str()), &line.user, &self.config.local_user_id) {
                    return;
                }
                match message {
                    ControlMessage::Invite { remote_addr, remote_udp_port, signed_pub_key_b64, .. } => {
                        self.on_invite(line.user, remote_addr, remote_udp_port, signed_pub_key_b64)
                    }
                    ControlMessage::Ring { remote_addr, remote_udp_port, signed_pub_key_b64, .. } => {
                        self.on_ring(line.user, remote_addr, remote_udp_port, signed_pub_key_b64)
                    }
                    ControlMessage::Accept { remote_addr, remote_udp_port, encrypted_signed_key_b64, .. } => {
                        self.on_accept(line.user, remote_addr, remote_udp_port, encrypted_signed_key_b64)
                    }
                    ControlMessage::Bye { .. } => self.on_bye(line.user),
                    ControlMessage::Imsg { ciphertext_b64, .. } => self.on_imsg(line.user, ciphertext_b64),
                    _ => unreachable!("matched above"),
                }
            }
        }
    }

    fn on_list(&self, username_regex: Option<&str>) {
        if kryptofon_proto::list_matches(username_regex, &self.config.local_user_id) {
            self.rendezvous.send_control(&ControlMessage::Alive);
        }
    }

    /// Place an outbound call (§4.13: "Dial"). Sends INVITE carrying our
    /// signed public key so the callee can authenticate and encrypt the
    /// session key back to us.
    pub fn dial(&self, remote_user: &str) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if !matches!(*state, ControllerState::Idle) {
            log::warn!("refusing to dial {remote_user}: a call is already in progress");
            return;
        }

        let signed_pub_key_b64 = self.signed_own_public_key();

        self.rendezvous.send_control(&ControlMessage::Invite {
            local_name: remote_user.to_string(),
            remote_addr: self.config.public_host.clone(),
            remote_udp_port: self.datagram.local_port(),
            signed_pub_key_b64,
        });

        let mut call = CallContext::new(now_ms());
        call.dial();

        *state = ControllerState::Dialing(PendingInvite {
            remote_user: remote_user.to_string(),
            remote_addr: self.config.public_host.clone(),
            remote_udp_port: self.datagram.local_port(),
            peer_signed_pub_key_b64: None,
            call,
        });
        self.invite_epoch_ms.store(now_ms(), Ordering::Relaxed);
    }

    /// §4.13 On INVITE: reject with BYE if busy, otherwise store the
    /// pending invite, start local ring (left to the embedding
    /// application via [`Self::status`]) and wait for
    /// [`Self::accept_pending_invite`] or [`Self::reject_pending_invite`].
    fn on_invite(&self, sender: String, remote_addr: String, remote_udp_port: u16, signed_pub_key_b64: Option<String>) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if !matches!(*state, ControllerState::Idle) {
            log::info!("busy, rejecting INVITE from {sender}");
            self.rendezvous.send_control(&ControlMessage::Bye {
                local_name: sender,
                remote_addr: None,
                remote_udp_port: None,
            });
            return;
        }

        if let Some(b64) = &signed_pub_key_b64 {
            if !PeerPublicEncryptor::from_base64(b64, &self.authorized_keys).is_active() {
                log::warn!("INVITE from {sender} carried a malformed key, ringing anyway (trust is advisory)");
            }
        }

        let mut call = CallContext::new(now_ms());
        call.alert();

        *state = ControllerState::Alerting(PendingInvite {
            remote_user: sender.clone(),
            remote_addr,
            remote_udp_port,
            peer_signed_pub_key_b64: signed_pub_key_b64,
            call,
        });

        let our_signed_pub_key_b64 = self.signed_own_public_key();
        self.rendezvous.send_control(&ControlMessage::Ring {
            local_name: sender,
            remote_addr: self.config.public_host.clone(),
            remote_udp_port: self.datagram.local_port(),
            signed_pub_key_b64: our_signed_pub_key_b64,
        });
    }

    /// §4.13 On RING: confirm it matches the outstanding invite, cancel
    /// the invite timeout while keeping the pending invite alive, and
    /// trust-check the callee's public key. Does not yet establish the
    /// call — that happens on ACCEPT.
    fn on_ring(&self, sender: String, remote_addr: String, remote_udp_port: u16, signed_pub_key_b64: Option<String>) {
        let mut state = self.state.lock().expect("state lock poisoned");
        let ControllerState::Dialing(pending) = &mut *state else {
            log::debug!("ignoring RING from {sender}: not currently dialing");
            return;
        };
        if pending.remote_user != sender {
            log::debug!("ignoring RING from {sender}: does not match outstanding invite to {}", pending.remote_user);
            return;
        }

        self.invite_epoch_ms.store(0, Ordering::Relaxed);
        pending.remote_addr = remote_addr;
        pending.remote_udp_port = remote_udp_port;
        pending.call.alert();

        if let Some(b64) = &signed_pub_key_b64 {
            if !PeerPublicEncryptor::from_base64(b64, &self.authorized_keys).is_active() {
                log::warn!("RING from {sender} carried a malformed key");
            }
        }
        pending.peer_signed_pub_key_b64 = signed_pub_key_b64;
    }

    /// A locally accepted call (user action, or auto-answer): §4.13's
    /// ACCEPT path run from the callee's side — generate the session
    /// key, encrypt it to the caller's public key, send ACCEPT, and
    /// establish immediately (we don't wait on our own message).
    pub fn accept_pending_invite(&self) {
        let pending = {
            let state = self.state.lock().expect("state lock poisoned");
            match &*state {
                ControllerState::Alerting(p) => p.clone(),
                _ => {
                    log::warn!("accept_pending_invite called with no alerting invite");
                    return;
                }
            }
        };

        let Some(caller_key_b64) = &pending.peer_signed_pub_key_b64 else {
            log::warn!("cannot accept invite from {}: no caller public key on file", pending.remote_user);
            return;
        };
        let peer_encryptor = PeerPublicEncryptor::from_base64(caller_key_b64, &self.authorized_keys);
        if !peer_encryptor.is_active() {
            log::warn!("cannot accept invite from {}: caller key was malformed or inconsistent", pending.remote_user);
            return;
        }

        let session_cipher = SessionCipher::generate();
        let material = session_cipher.to_material();
        let Some(envelope) = self.build_encrypted_key_envelope(&peer_encryptor, material) else {
            return;
        };

        self.rendezvous.send_control(&ControlMessage::Accept {
            local_name: pending.remote_user.clone(),
            remote_addr: self.config.public_host.clone(),
            remote_udp_port: self.datagram.local_port(),
            encrypted_signed_key_b64: Some(envelope),
        });

        let trust = self.check_trust(&pending.peer_signed_pub_key_b64);
        self.datagram.install_symmetric_cipher(Some(session_cipher));
        self.establish(pending.remote_addr, pending.remote_udp_port, trust, pending.call);
    }

    pub fn reject_pending_invite(&self) {
        let pending = {
            let state = self.state.lock().expect("state lock poisoned");
            match &*state {
                ControllerState::Alerting(p) => Some(p.remote_user.clone()),
                _ => None,
            }
        };
        if let Some(remote_user) = pending {
            self.rendezvous.send_control(&ControlMessage::Bye {
                local_name: remote_user,
                remote_addr: None,
                remote_udp_port: None,
            });
            self.teardown();
        }
    }

    fn signed_own_public_key(&self) -> Option<String> {
        match self.identity.sign(self.identity.named_key_pair().public.clone()) {
            Ok(signed) => bincode::serialize(&signed).ok().map(|bytes| base64_encode(&bytes)),
            Err(e) => {
                log::warn!("failed to sign our own public key: {e}");
                None
            }
        }
    }

    fn on_accept(&self, sender: String, remote_addr: String, remote_udp_port: u16, encrypted_signed_key_b64: Option<String>) {
        let pending = {
            let state = self.state.lock().expect("state lock poisoned");
            match &*state {
                ControllerState::Dialing(p) if p.remote_user == sender => Some(p.clone()),
                _ => None,
            }
        };
        let Some(pending) = pending else {
            log::debug!("ignoring ACCEPT from {sender} with no matching outstanding INVITE");
            return;
        };

        let Some(b64) = encrypted_signed_key_b64 else {
            log::warn!("ACCEPT from {sender} carried no session key");
            return;
        };

        let session_cipher = match self.identity.unwrap_session_key(&b64, &self.authorized_keys) {
            Ok(cipher) => cipher,
            Err(e) => {
                log::warn!("could not unwrap session key from {sender}: {e}");
                return;
            }
        };

        let trust = self.check_trust(&pending.peer_signed_pub_key_b64);
        self.datagram.install_symmetric_cipher(Some(session_cipher));
        self.establish(remote_addr, remote_udp_port, trust, pending.call);
    }

    /// §7 kind 5: classify a peer's signed public key as verified
    /// against the authorized-keys set, presented but unverified, or
    /// absent altogether. Advisory only — never blocks call setup.
    fn check_trust(&self, signed_pub_key_b64: &Option<String>) -> TrustStatus {
        let Some(b64) = signed_pub_key_b64 else {
            return TrustStatus::NoKey;
        };
        let encryptor = PeerPublicEncryptor::from_base64(b64, &self.authorized_keys);
        match encryptor.verificator() {
            Some(comment) => TrustStatus::Verified(comment.to_string()),
            None => TrustStatus::Unverified,
        }
    }

    fn establish(&self, remote_addr: String, remote_udp_port: u16, trust: TrustStatus, mut call: CallContext) {
        let remote_user = {
            let state = self.state.lock().expect("state lock poisoned");
            match &*state {
                ControllerState::Dialing(p) | ControllerState::Alerting(p) => p.remote_user.clone(),
                _ => "unknown".to_string(),
            }
        };

        let socket_addr = match format!("{remote_addr}:{remote_udp_port}").parse() {
            Ok(addr) => addr,
            Err(e) => {
                log::warn!("peer advertised an unparseable address {remote_addr}:{remote_udp_port}: {e}");
                return;
            }
        };

        call.establish(now_ms());
        let peer = RemotePeer::spawn(
            socket_addr,
            remote_user.clone(),
            call,
            Arc::downgrade(&self.datagram),
            self.voice_tx.clone(),
            self.run.clone(),
        );
        self.datagram.attach_peer(peer.clone());

        match &trust {
            TrustStatus::Verified(name) => log::info!("call with {remote_user} established, verified as {name}"),
            TrustStatus::Unverified => log::warn!("call with {remote_user} established, key did not verify"),
            TrustStatus::NoKey => log::warn!("call with {remote_user} established, no signed key presented"),
        }

        *self.state.lock().expect("state lock poisoned") = ControllerState::Established { peer, remote_user, trust };
    }

    fn build_encrypted_key_envelope(
        &self,
        peer_encryptor: &PeerPublicEncryptor,
        material: kryptofon_crypto::SecretKeyMaterial,
    ) -> Option<String> {
        let signed = match self.identity.sign(material) {
            Ok(signed) => signed,
            Err(e) => {
                log::warn!("failed to sign session key envelope: {e}");
                return None;
            }
        };
        let plaintext = match bincode::serialize(&signed) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("failed to serialize session key envelope: {e}");
                return None;
            }
        };
        match peer_encryptor.encrypt(&plaintext) {
            Ok(ciphertext) => Some(base64_encode(&ciphertext)),
            Err(e) => {
                log::warn!("failed to encrypt session key envelope: {e}");
                None
            }
        }
    }

    fn on_bye(&self, sender: String) {
        let applies = {
            let state = self.state.lock().expect("state lock poisoned");
            match &*state {
                ControllerState::Idle => false,
                ControllerState::Dialing(p) | ControllerState::Alerting(p) => p.remote_user == sender,
                ControllerState::Established { remote_user, .. } => *remote_user == sender,
            }
        };
        if applies {
            log::info!("{sender} hung up");
            self.teardown();
        }
    }

    /// Hang up a call we're dialing, alerting on, or have established.
    pub fn hang_up(&self) {
        let remote_user = match &*self.state.lock().expect("state lock poisoned") {
            ControllerState::Idle => return,
            ControllerState::Dialing(p) | ControllerState::Alerting(p) => p.remote_user.clone(),
            ControllerState::Established { remote_user, .. } => remote_user.clone(),
        };
        self.rendezvous.send_control(&ControlMessage::Bye {
            local_name: remote_user,
            remote_addr: None,
            remote_udp_port: None,
        });
        self.teardown();
    }

    fn teardown(&self) {
        {
            let state = self.state.lock().expect("state lock poisoned");
            if let ControllerState::Established { peer, .. } = &*state {
                peer.with_call(|call| call.hang_up());
            }
        }
        self.datagram.install_symmetric_cipher(None);
        self.datagram.detach_peer();
        self.invite_epoch_ms.store(0, Ordering::Relaxed);
        *self.state.lock().expect("state lock poisoned") = ControllerState::Idle;
    }

    fn on_imsg(&self, sender: String, ciphertext_b64: String) {
        let established = matches!(&*self.state.lock().expect("state lock poisoned"), ControllerState::Established { remote_user, .. } if *remote_user == sender);
        if !established {
            log::debug!("dropping IMSG from {sender}, no established session");
            return;
        }
        let Some(ciphertext) = base64_decode(&ciphertext_b64) else {
            log::warn!("IMSG from {sender} was not valid base64");
            return;
        };
        match self.datagram.decrypt_text(&ciphertext) {
            Some(message) => {
                let _ = self.text_tx.send((sender, message));
            }
            None => log::warn!("IMSG from {sender} failed to decrypt"),
        }
    }

    /// Send a text message to the established peer (§4.13: IMSG).
    pub fn send_imsg(&self, message: &str) -> Result<()> {
        let remote_user = match &*self.state.lock().expect("state lock poisoned") {
            ControllerState::Established { remote_user, .. } => remote_user.clone(),
            _ => {
                log::warn!("cannot send IMSG, no established session");
                return Ok(());
            }
        };
        let Some(ciphertext) = self.datagram.encrypt_text(message) else {
            log::warn!("cannot send IMSG, no session cipher installed");
            return Ok(());
        };
        self.rendezvous.send_control(&ControlMessage::Imsg {
            local_name: remote_user,
            ciphertext_b64: base64_encode(&ciphertext),
        });
        Ok(())
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.decode(s).ok()
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kryptofon_crypto::NamedPublicKey;
    use tokio::net::TcpListener;

    struct TempDir(std::path::PathBuf);

    impl TempDir {
        fn new(tag: &str) -> TempDir {
            let mut path = std::env::temp_dir();
            path.push(format!("kryptofon-client-test-{tag}-{}-{}", std::process::id(), tag.len()));
            TempDir(path)
        }
        fn path(&self) -> std::path::PathBuf {
            self.0.clone()
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    /// A minimal stand-in for the rendezvous server: relays every line
    /// it reads from either of exactly two connected sockets to both.
    async fn spawn_loopback_rendezvous() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (a, _) = listener.accept().await.unwrap();
            let (b, _) = listener.accept().await.unwrap();
            let (a_read, mut a_write) = a.into_split();
            let (b_read, mut b_write) = b.into_split();
            let mut a_lines = tokio::io::BufReader::new(a_read).lines();
            let mut b_lines = tokio::io::BufReader::new(b_read).lines();
            use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
            loop {
                tokio::select! {
                    line = a_lines.next_line() => {
                        match line {
                            Ok(Some(l)) => { let _ = b_write.write_all(format!("{l}\n").as_bytes()).await; }
                            _ => break,
                        }
                    }
                    line = b_lines.next_line() => {
                        match line {
                            Ok(Some(l)) => { let _ = a_write.write_all(format!("{l}\n").as_bytes()).await; }
                            _ => break,
                        }
                    }
                }
            }
        });
        port
    }

    fn load_identity(tag: &str) -> Arc<Identity> {
        let dir = TempDir::new(tag);
        let identity = Arc::new(Identity::load_or_generate(dir.path()).unwrap());
        std::mem::forget(dir); // keep the directory alive for the test's duration
        identity
    }

    fn trusting(other: &Identity) -> Arc<AuthorizedKeys> {
        Arc::new(AuthorizedKeys::from_keys(vec![NamedPublicKey {
            public: other.named_key_pair().public.clone(),
            comment: other.comment().to_string(),
        }]))
    }

    async fn build_controller(
        identity: Arc<Identity>,
        authorized_keys: Arc<AuthorizedKeys>,
        user_id: &str,
        rendezvous_port: u16,
        udp_base: u16,
    ) -> (Arc<SessionController>, mpsc::UnboundedReceiver<Pdu>, mpsc::UnboundedReceiver<(String, String)>, CancellationToken) {
        let run = CancellationToken::new();
        let (rendezvous, inbound) = RendezvousClient::spawn("127.0.0.1".to_string(), rendezvous_port, user_id.to_string(), run.clone());
        let datagram = DatagramChannel::bind_first_free(udp_base, run.clone()).await.unwrap();
        let (voice_tx, voice_rx) = mpsc::unbounded_channel();
        let (text_tx, text_rx) = mpsc::unbounded_channel();

        let config = Config {
            local_user_id: user_id.to_string(),
            public_host: "127.0.0.1".to_string(),
            ..Config::default()
        };

        let controller = SessionController::new(config, identity, authorized_keys, rendezvous, datagram, voice_tx, text_tx, run.clone());
        let driver = controller.clone();
        tokio::spawn(async move { driver.drive(inbound).await });

        // Give the TCP session a moment to connect before either side sends.
        tokio::time::sleep(Duration::from_millis(50)).await;

        (controller, voice_rx, text_rx, run)
    }

    #[tokio::test]
    async fn full_invite_ring_accept_establishes_and_exchanges_imsg() {
        let port = spawn_loopback_rendezvous().await;
        let alice_identity = load_identity("alice");
        let bob_identity = load_identity("bob");

        let (alice, _alice_voice, mut alice_text, alice_run) =
            build_controller(alice_identity.clone(), trusting(&bob_identity), "alice", port, 45000).await;
        let (bob, _bob_voice, mut bob_text, bob_run) =
            build_controller(bob_identity.clone(), trusting(&alice_identity), "bob", port, 45100).await;

        alice.dial("bob");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(bob.status(), CallStatus::Alerting("alice".to_string()));
        assert_eq!(alice.status(), CallStatus::Dialing("bob".to_string()));

        bob.accept_pending_invite();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(
            alice.status(),
            CallStatus::Established("bob".to_string(), TrustStatus::Verified(bob_identity.comment().to_string()))
        );
        assert_eq!(
            bob.status(),
            CallStatus::Established("alice".to_string(), TrustStatus::Verified(alice_identity.comment().to_string()))
        );

        alice.send_imsg("hello bob").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let (from, message) = bob_text.try_recv().expect("bob should have received alice's IMSG");
        assert_eq!(from, "alice");
        assert_eq!(message, "hello bob");

        alice.hang_up();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(alice.status(), CallStatus::Idle);
        assert_eq!(bob.status(), CallStatus::Idle);

        let _ = alice_text.try_recv();
        alice_run.cancel();
        bob_run.cancel();
    }

    #[test]
    fn pending_invite_clone_preserves_peer_key() {
        let pending = PendingInvite {
            remote_user: "bob".to_string(),
            remote_addr: "10.0.0.2".to_string(),
            remote_udp_port: 40001,
            peer_signed_pub_key_b64: Some("abc".to_string()),
            call: CallContext::new(0),
        };
        let cloned = pending.clone();
        assert_eq!(cloned.peer_signed_pub_key_b64.as_deref(), Some("abc"));
    }
}
