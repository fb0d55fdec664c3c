//! kryptofon-cli — interactive demo endpoint.
//!
//! Connects to a rendezvous server, registers under a chosen handle,
//! and exposes a line-oriented command loop to dial, accept, and chat
//! with another endpoint over an encrypted peer-to-peer call.
//!
//!   cargo run -p kryptofon-cli -- [<host> <port>]
//!
//! With no arguments the demo defaults documented in `kryptofon_client::Config`
//! are used (127.0.0.1:7000).

use kryptofon::client::{CallStatus, Config, DatagramChannel, RendezvousClient, SessionController};
use kryptofon::crypto::{AuthorizedKeys, Identity};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        // SAFETY: single-threaded at this point, no other threads reading env
        unsafe {
            std::env::set_var("RUST_LOG", "kryptofon_client=info,kryptofon_cli=info");
        }
    }
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("\nfatal: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args()?;

    let identity = Arc::new(Identity::load_or_generate(&config.identity_dir)?);
    let authorized_keys = Arc::new(AuthorizedKeys::load_from_dir(&config.identity_dir)?);
    println!(
        "identity: {} ({} authorized key{})",
        identity.comment(),
        authorized_keys.len(),
        if authorized_keys.len() == 1 { "" } else { "s" }
    );

    let run = CancellationToken::new();
    let (rendezvous, inbound) =
        RendezvousClient::spawn(config.rendezvous_host.clone(), config.rendezvous_port, config.local_user_id.clone(), run.clone());
    let datagram = DatagramChannel::bind_first_free(config.udp_base_port, run.clone()).await?;
    println!("listening on UDP port {} as '{}'", datagram.local_port(), config.local_user_id);

    let (voice_tx, mut voice_rx) = tokio::sync::mpsc::unbounded_channel();
    let (text_tx, mut text_rx) = tokio::sync::mpsc::unbounded_channel();

    let controller = SessionController::new(config, identity, authorized_keys, rendezvous, datagram, voice_tx, text_tx, run.clone());

    {
        let run = run.clone();
        tokio::spawn(async move {
            let mut frames = 0u64;
            loop {
                tokio::select! {
                    _ = run.cancelled() => break,
                    pdu = voice_rx.recv() => {
                        match pdu {
                            Some(_pdu) => {
                                frames += 1;
                                log::debug!("received voice frame #{frames}");
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    {
        let run = run.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = run.cancelled() => break,
                    message = text_rx.recv() => {
                        match message {
                            Some((from, text)) => println!("\n[{from}] {text}"),
                            None => break,
                        }
                    }
                }
            }
        });
    }

    {
        let controller = controller.clone();
        tokio::spawn(async move { controller.drive(inbound).await });
    }

    print_help();
    command_loop(controller, run).await;
    Ok(())
}

fn parse_args() -> Result<Config, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = Config::default();
    match args.as_slice() {
        [] => {}
        [host, port] => {
            config.rendezvous_host = host.clone();
            config.rendezvous_port = port.parse().map_err(|_| format!("'{port}' is not a valid port number"))?;
        }
        _ => return Err("usage: kryptofon-cli [<host> <port>]".into()),
    }

    print!("your handle on the rendezvous server: ");
    io::stdout().flush()?;
    let mut handle = String::new();
    io::stdin().read_line(&mut handle)?;
    let handle = handle.trim();
    if !handle.is_empty() {
        config.local_user_id = handle.to_string();
    }

    Ok(config)
}

fn print_help() {
    println!(
        "\ncommands: dial <user> | accept | reject | hangup | say <text> | status | quit\n"
    );
}

async fn command_loop(controller: Arc<SessionController>, run: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = io::stdout().flush();

        tokio::select! {
            _ = run.cancelled() => return,
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    run.cancel();
                    return;
                };
                if !handle_command(&controller, line.trim(), &run) {
                    return;
                }
            }
        }
    }
}

/// Returns `false` when the command loop should stop (quit, or stdin closed).
fn handle_command(controller: &Arc<SessionController>, line: &str, run: &CancellationToken) -> bool {
    let mut parts = line.splitn(2, char::is_whitespace);
    match parts.next().unwrap_or("") {
        "" => {}
        "dial" => match parts.next().map(str::trim) {
            Some(user) if !user.is_empty() => controller.dial(user),
            _ => println!("usage: dial <user>"),
        },
        "accept" => controller.accept_pending_invite(),
        "reject" => controller.reject_pending_invite(),
        "hangup" => controller.hang_up(),
        "say" => match parts.next() {
            Some(text) if !text.is_empty() => {
                if let Err(e) = controller.send_imsg(text) {
                    println!("could not send: {e}");
                }
            }
            _ => println!("usage: say <text>"),
        },
        "status" => println!("{}", describe_status(controller.status())),
        "quit" | "exit" => {
            controller.hang_up();
            run.cancel();
            return false;
        }
        other => println!("unknown command: {other}"),
    }
    true
}

fn describe_status(status: CallStatus) -> String {
    match status {
        CallStatus::Idle => "idle".to_string(),
        CallStatus::Dialing(user) => format!("dialing {user} ..."),
        CallStatus::Alerting(user) => format!("incoming call from {user}, 'accept' or 'reject'"),
        CallStatus::Established(user, trust) => format!("on a call with {user} ({trust:?})"),
    }
}
