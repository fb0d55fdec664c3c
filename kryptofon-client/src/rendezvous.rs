//! Line-oriented TCP client for the rendezvous server (§4.12): reads
//! and writes `kryptofon_proto::RendezvousLine`s, and reconnects on
//! disconnect per the documented policy before going dormant.

use kryptofon_proto::{ControlMessage, RendezvousLine};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// A line received from the rendezvous server, already split into
/// sender and body but not yet interpreted as a control verb.
#[derive(Debug, Clone)]
pub struct InboundLine {
    pub line: RendezvousLine,
}

pub struct RendezvousClient {
    host: String,
    port: u16,
    local_user_id: String,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl RendezvousClient {
    /// Connect and spawn the read/write/reconnect loop. Returns the
    /// client handle plus the channel on which inbound lines arrive.
    pub fn spawn(
        host: String,
        port: u16,
        local_user_id: String,
        run: CancellationToken,
    ) -> (RendezvousClient, mpsc::UnboundedReceiver<InboundLine>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundLine>();

        let client = RendezvousClient {
            host: host.clone(),
            port,
            local_user_id: local_user_id.clone(),
            outbound_tx,
        };

        tokio::spawn(connection_loop(host, port, outbound_rx, inbound_tx, run));

        (client, inbound_rx)
    }

    pub fn send_control(&self, message: &ControlMessage) {
        let line = format!("{} :: {}", normalize_emit_user(&self.local_user_id), message.emit());
        let _ = self.outbound_tx.send(line);
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn normalize_emit_user(user: &str) -> String {
    user.split_whitespace().collect::<Vec<_>>().join("-")
}

/// Owns the reconnect policy: connect, relay lines in both directions
/// until the socket drops, wait 2s and retry up to 3 times, then go
/// dormant until `run` is cancelled (user intervention).
async fn connection_loop(
    host: String,
    port: u16,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<InboundLine>,
    run: CancellationToken,
) {
    let mut attempt = 0u32;
    loop {
        if run.is_cancelled() {
            return;
        }

        match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => {
                attempt = 0;
                log::info!("connected to rendezvous server {host}:{port}");
                session(stream, &mut outbound_rx, &inbound_tx, &run).await;
                log::warn!("rendezvous connection to {host}:{port} lost");
            }
            Err(e) => {
                log::warn!("failed to connect to rendezvous server {host}:{port}: {e}");
            }
        }

        if run.is_cancelled() {
            return;
        }

        attempt += 1;
        if attempt > MAX_RECONNECT_ATTEMPTS {
            log::error!("giving up on rendezvous server {host}:{port} after {MAX_RECONNECT_ATTEMPTS} attempts");
            return;
        }

        tokio::select! {
            _ = run.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

async fn session(
    stream: TcpStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    inbound_tx: &mpsc::UnboundedSender<InboundLine>,
    run: &CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            _ = run.cancelled() => return,
            read_result = reader.next_line() => {
                match read_result {
                    Ok(Some(raw)) => {
                        let line = RendezvousLine::parse(&raw);
                        if inbound_tx.send(InboundLine { line }).is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        log::warn!("rendezvous read error: {e}");
                        return;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(mut line) => {
                        line.push('\n');
                        if write_half.write_all(line.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}
