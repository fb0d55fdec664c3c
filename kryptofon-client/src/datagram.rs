//! UDP transport for voice/IMSG datagrams (§4.9): binds the first free
//! port in `[base, base+100)`, optionally encrypts/decrypts with an
//! installed session cipher, and forwards accepted bytes to whichever
//! `RemotePeer` is currently attached.

use crate::error::{ClientError, Result};
use crate::peer::RemotePeer;
use kryptofon_crypto::SessionCipher;
use kryptofon_proto::Pdu;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

const PORT_RANGE_WIDTH: u16 = 100;

pub struct DatagramChannel {
    socket: Arc<UdpSocket>,
    local_port: u16,
    cipher: RwLock<Option<SessionCipher>>,
    peer: RwLock<Option<Arc<RemotePeer>>>,
}

impl DatagramChannel {
    /// Bind the first free UDP port in `[base, base+100)` and spawn its
    /// receive loop, which runs until `run` cancels.
    pub async fn bind_first_free(base: u16, run: CancellationToken) -> Result<Arc<DatagramChannel>> {
        for offset in 0..PORT_RANGE_WIDTH {
            let port = base.wrapping_add(offset);
            match UdpSocket::bind(("0.0.0.0", port)).await {
                Ok(socket) => {
                    let channel = Arc::new(DatagramChannel {
                        socket: Arc::new(socket),
                        local_port: port,
                        cipher: RwLock::new(None),
                        peer: RwLock::new(None),
                    });
                    tokio::spawn(channel.clone().run(run));
                    return Ok(channel);
                }
                Err(_) => continue,
            }
        }
        Err(ClientError::NoFreePort { base })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Install (or clear, passing `None`) the symmetric cipher used to
    /// encrypt outgoing and decrypt incoming datagrams. Installs are
    /// rare (call establishment/teardown); reads happen on every
    /// packet, hence the `RwLock`.
    pub fn install_symmetric_cipher(&self, cipher: Option<SessionCipher>) {
        *self.cipher.write().expect("cipher lock poisoned") = cipher;
    }

    pub fn attach_peer(&self, peer: Arc<RemotePeer>) {
        *self.peer.write().expect("peer lock poisoned") = Some(peer);
    }

    pub fn detach_peer(&self) {
        *self.peer.write().expect("peer lock poisoned") = None;
    }

    pub fn is_peer_dead(&self, max_idle: std::time::Duration) -> bool {
        match self.peer.read().expect("peer lock poisoned").as_ref() {
            Some(peer) => peer.is_dead(max_idle),
            None => false,
        }
    }

    /// Encrypt an IMSG text body with the installed session cipher, if
    /// any (§4.5: text preamble is 256 bytes, wider than a voice PDU's).
    pub fn encrypt_text(&self, message: &str) -> Option<Vec<u8>> {
        self.cipher.read().expect("cipher lock poisoned").as_ref().map(|cipher| cipher.encrypt_text(message))
    }

    pub fn decrypt_text(&self, ciphertext: &[u8]) -> Option<String> {
        self.cipher
            .read()
            .expect("cipher lock poisoned")
            .as_ref()
            .and_then(|cipher| cipher.decrypt_text(ciphertext).ok())
    }

    pub async fn send(&self, pdu: &Pdu, addr: SocketAddr) -> Result<()> {
        let encoded = match pdu.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("refusing to send PDU with out-of-range field: {e}");
                return Ok(());
            }
        };
        let wire = match self.cipher.read().expect("cipher lock poisoned").as_ref() {
            Some(cipher) => match cipher.encrypt_datagram(&encoded) {
                Ok(ciphertext) => ciphertext,
                Err(e) => {
                    log::warn!("failed to encrypt outgoing datagram: {e}");
                    return Ok(());
                }
            },
            None => encoded,
        };
        self.socket.send_to(&wire, addr).await?;
        Ok(())
    }

    /// The receive loop, spawned by `bind_first_free` and run until
    /// cancelled. Failed decrypts and datagrams arriving with no peer
    /// attached are silently dropped, matching the fire-and-forget
    /// nature of voice transport.
    async fn run(self: Arc<Self>, run: CancellationToken) {
        let mut buf = vec![0u8; 2048];
        loop {
            tokio::select! {
                _ = run.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => {
                    let (len, _from) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("UDP receive error: {e}");
                            continue;
                        }
                    };
                    self.dispatch(&buf[..len]);
                }
            }
        }
    }

    fn dispatch(&self, datagram: &[u8]) {
        let plaintext = match self.cipher.read().expect("cipher lock poisoned").as_ref() {
            Some(cipher) => match cipher.decrypt_datagram(datagram) {
                Ok(plaintext) => plaintext,
                Err(_) => {
                    log::debug!("dropping datagram that failed to decrypt");
                    return;
                }
            },
            None => datagram.to_vec(),
        };

        match self.peer.read().expect("peer lock poisoned").as_ref() {
            Some(peer) => peer.enqueue(plaintext),
            None => log::debug!("dropping datagram with no peer attached"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_first_free_port_in_range() {
        let channel = DatagramChannel::bind_first_free(41000, CancellationToken::new()).await.unwrap();
        assert!((41000..41100).contains(&channel.local_port()));
    }

    #[tokio::test]
    async fn falling_back_past_a_taken_port_still_succeeds() {
        let held = UdpSocket::bind(("0.0.0.0", 41200)).await.unwrap();
        let channel = DatagramChannel::bind_first_free(41200, CancellationToken::new()).await.unwrap();
        assert_ne!(channel.local_port(), 41200);
        drop(held);
    }

    #[tokio::test]
    async fn no_peer_attached_does_not_panic_on_dispatch() {
        let channel = DatagramChannel::bind_first_free(41300, CancellationToken::new()).await.unwrap();
        channel.dispatch(&[1, 2, 3]);
    }
}
