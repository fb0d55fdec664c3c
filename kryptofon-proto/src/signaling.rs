//! Rendezvous line grammar (§4.12): parsing the broadcast chat server's
//! `[<user> :: ]<body>` framing and the `[$] <VERB> <args...>` control
//! message grammar nested inside it, plus the matching emission side.
//!
//! The split between "parse a line into an addressed envelope" and
//! "parse the envelope's body into a typed verb" is two-stage by
//! design: a generic outer framing, then a verb-specific inner grammar.

use regex::Regex;
use std::fmt;

const ANONYMOUS: &str = "[Anonymous]";

/// A line received from the rendezvous server, split into its sender
/// and body. `user` is `ANONYMOUS` when the server sent no `<user> ::`
/// prefix.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RendezvousLine {
    pub user: String,
    pub body: String,
}

impl RendezvousLine {
    /// Parse one line as received from the server's socket, already
    /// stripped of its trailing newline.
    pub fn parse(line: &str) -> RendezvousLine {
        match line.split_once(" :: ") {
            Some((user, body)) if !user.is_empty() => RendezvousLine {
                user: user.to_string(),
                body: body.to_string(),
            },
            _ => RendezvousLine {
                user: ANONYMOUS.to_string(),
                body: line.to_string(),
            },
        }
    }

    /// Is this line's body a control message (`[$] VERB ...`)?
    pub fn is_control(&self) -> bool {
        self.body.starts_with("[$] ")
    }
}

/// A parsed control message body, independent of who sent it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ControlMessage {
    Invite {
        local_name: String,
        remote_addr: String,
        remote_udp_port: u16,
        signed_pub_key_b64: Option<String>,
    },
    Ring {
        local_name: String,
        remote_addr: String,
        remote_udp_port: u16,
        signed_pub_key_b64: Option<String>,
    },
    Accept {
        local_name: String,
        remote_addr: String,
        remote_udp_port: u16,
        encrypted_signed_key_b64: Option<String>,
    },
    Bye {
        local_name: String,
        remote_addr: Option<String>,
        remote_udp_port: Option<u16>,
    },
    Imsg {
        local_name: String,
        ciphertext_b64: String,
    },
    List {
        username_regex: Option<String>,
    },
    Alive,
}

/// Errors parsing a `[$] VERB ...` body.
#[derive(Debug)]
pub enum ControlParseError {
    NotControl,
    UnknownVerb(String),
    MissingArg { verb: &'static str, arg: &'static str },
    BadPort(std::num::ParseIntError),
}

impl fmt::Display for ControlParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlParseError::NotControl => write!(f, "body is not a `[$] ...` control message"),
            ControlParseError::UnknownVerb(v) => write!(f, "unknown control verb `{v}`"),
            ControlParseError::MissingArg { verb, arg } => {
                write!(f, "{verb} is missing required argument `{arg}`")
            }
            ControlParseError::BadPort(e) => write!(f, "bad port number: {e}"),
        }
    }
}

impl std::error::Error for ControlParseError {}

impl ControlMessage {
    /// Parse a `[$] VERB ...` body. Returns [`ControlParseError::NotControl`]
    /// if `body` doesn't start with the control prefix.
    pub fn parse(body: &str) -> Result<ControlMessage, ControlParseError> {
        let rest = body
            .strip_prefix("[$] ")
            .ok_or(ControlParseError::NotControl)?;
        let mut parts = rest.split_whitespace();
        let verb = parts.next().unwrap_or("");

        match verb {
            "INVITE" | "RING" => {
                let local_name = next_arg(&mut parts, verb, "localName")?;
                let remote_addr = next_arg(&mut parts, verb, "remoteAddr")?;
                let remote_udp_port = next_port(&mut parts, verb, "remoteUdpPort")?;
                let signed_pub_key_b64 = parts.next().map(str::to_string);
                if verb == "INVITE" {
                    Ok(ControlMessage::Invite {
                        local_name,
                        remote_addr,
                        remote_udp_port,
                        signed_pub_key_b64,
                    })
                } else {
                    Ok(ControlMessage::Ring {
                        local_name,
                        remote_addr,
                        remote_udp_port,
                        signed_pub_key_b64,
                    })
                }
            }
            "ACCEPT" => {
                let local_name = next_arg(&mut parts, verb, "localName")?;
                let remote_addr = next_arg(&mut parts, verb, "remoteAddr")?;
                let remote_udp_port = next_port(&mut parts, verb, "remoteUdpPort")?;
                let encrypted_signed_key_b64 = parts.next().map(str::to_string);
                Ok(ControlMessage::Accept {
                    local_name,
                    remote_addr,
                    remote_udp_port,
                    encrypted_signed_key_b64,
                })
            }
            "BYE" => {
                let local_name = next_arg(&mut parts, verb, "localName")?;
                let remote_addr = parts.next().map(str::to_string);
                let remote_udp_port = match parts.next() {
                    Some(p) => Some(p.parse().map_err(ControlParseError::BadPort)?),
                    None => None,
                };
                Ok(ControlMessage::Bye {
                    local_name,
                    remote_addr,
                    remote_udp_port,
                })
            }
            "IMSG" => {
                let local_name = next_arg(&mut parts, verb, "localName")?;
                let ciphertext_b64 = next_arg(&mut parts, verb, "ciphertextB64")?;
                Ok(ControlMessage::Imsg {
                    local_name,
                    ciphertext_b64,
                })
            }
            "LIST" => Ok(ControlMessage::List {
                username_regex: parts.next().map(str::to_string),
            }),
            "ALIVE" => Ok(ControlMessage::Alive),
            other => Err(ControlParseError::UnknownVerb(other.to_string())),
        }
    }

    /// Render back to wire form. User ids have whitespace runs collapsed
    /// to `-` (§4.12: "Emission mirrors parsing").
    pub fn emit(&self) -> String {
        match self {
            ControlMessage::Invite {
                local_name,
                remote_addr,
                remote_udp_port,
                signed_pub_key_b64,
            } => emit_invite_like("INVITE", local_name, remote_addr, *remote_udp_port, signed_pub_key_b64),
            ControlMessage::Ring {
                local_name,
                remote_addr,
                remote_udp_port,
                signed_pub_key_b64,
            } => emit_invite_like("RING", local_name, remote_addr, *remote_udp_port, signed_pub_key_b64),
            ControlMessage::Accept {
                local_name,
                remote_addr,
                remote_udp_port,
                encrypted_signed_key_b64,
            } => emit_invite_like(
                "ACCEPT",
                local_name,
                remote_addr,
                *remote_udp_port,
                encrypted_signed_key_b64,
            ),
            ControlMessage::Bye {
                local_name,
                remote_addr,
                remote_udp_port,
            } => {
                let mut out = format!("[$] BYE {}", normalize_user(local_name));
                if let Some(addr) = remote_addr {
                    out.push(' ');
                    out.push_str(addr);
                    if let Some(port) = remote_udp_port {
                        out.push(' ');
                        out.push_str(&port.to_string());
                    }
                }
                out
            }
            ControlMessage::Imsg {
                local_name,
                ciphertext_b64,
            } => format!("[$] IMSG {} {}", normalize_user(local_name), ciphertext_b64),
            ControlMessage::List { username_regex } => match username_regex {
                Some(r) => format!("[$] LIST {r}"),
                None => "[$] LIST".to_string(),
            },
            ControlMessage::Alive => "[$] ALIVE".to_string(),
        }
    }
}

fn emit_invite_like(
    verb: &str,
    local_name: &str,
    remote_addr: &str,
    remote_udp_port: u16,
    payload: &Option<String>,
) -> String {
    let mut out = format!(
        "[$] {verb} {} {remote_addr} {remote_udp_port}",
        normalize_user(local_name)
    );
    if let Some(p) = payload {
        out.push(' ');
        out.push_str(p);
    }
    out
}

/// Collapse whitespace runs to a single `-`, per §4.12.
fn normalize_user(user: &str) -> String {
    user.split_whitespace().collect::<Vec<_>>().join("-")
}

fn next_arg<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    verb: &'static str,
    arg: &'static str,
) -> Result<String, ControlParseError> {
    parts
        .next()
        .map(str::to_string)
        .ok_or(ControlParseError::MissingArg { verb, arg })
}

fn next_port<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    verb: &'static str,
    arg: &'static str,
) -> Result<u16, ControlParseError> {
    next_arg(parts, verb, arg)?
        .parse()
        .map_err(ControlParseError::BadPort)
}

/// Routing decision for a directed control message (§4.12): drop if the
/// message's `local_name` isn't us, or if `sender` is us (self-echo
/// suppression). LIST/ALIVE are undirected and always pass.
pub fn should_handle(local_name_in_msg: Option<&str>, sender: &str, our_user_id: &str) -> bool {
    if sender == our_user_id {
        return false;
    }
    match local_name_in_msg {
        Some(name) => name == our_user_id,
        None => true,
    }
}

/// Does `username_regex` match `candidate` (LIST verb, §4.12)? Absent
/// regex matches everything; matching is case-insensitive.
pub fn list_matches(username_regex: Option<&str>, candidate: &str) -> bool {
    match username_regex {
        None => true,
        Some(pattern) => Regex::new(&format!("(?i){pattern}"))
            .map(|re| re.is_match(candidate))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_parsing_defaults_to_anonymous() {
        let line = RendezvousLine::parse("hello there");
        assert_eq!(line.user, ANONYMOUS);
        assert_eq!(line.body, "hello there");

        let line = RendezvousLine::parse("alice :: [$] ALIVE");
        assert_eq!(line.user, "alice");
        assert!(line.is_control());
    }

    #[test]
    fn invite_round_trips() {
        let msg = ControlMessage::parse("[$] INVITE bob 10.0.0.2 40001 aGVsbG8=").unwrap();
        assert_eq!(
            msg,
            ControlMessage::Invite {
                local_name: "bob".to_string(),
                remote_addr: "10.0.0.2".to_string(),
                remote_udp_port: 40001,
                signed_pub_key_b64: Some("aGVsbG8=".to_string()),
            }
        );
        assert_eq!(msg.emit(), "[$] INVITE bob 10.0.0.2 40001 aGVsbG8=");
    }

    #[test]
    fn invite_without_key_has_no_trailing_space() {
        let msg = ControlMessage::parse("[$] INVITE bob 10.0.0.2 40001").unwrap();
        assert_eq!(msg.emit(), "[$] INVITE bob 10.0.0.2 40001");
    }

    #[test]
    fn bye_grammar_is_variadic() {
        assert_eq!(
            ControlMessage::parse("[$] BYE bob").unwrap(),
            ControlMessage::Bye {
                local_name: "bob".to_string(),
                remote_addr: None,
                remote_udp_port: None,
            }
        );
        assert_eq!(
            ControlMessage::parse("[$] BYE bob 10.0.0.2 40001").unwrap(),
            ControlMessage::Bye {
                local_name: "bob".to_string(),
                remote_addr: Some("10.0.0.2".to_string()),
                remote_udp_port: Some(40001),
            }
        );
    }

    #[test]
    fn list_with_no_args() {
        assert_eq!(
            ControlMessage::parse("[$] LIST").unwrap(),
            ControlMessage::List { username_regex: None }
        );
        assert_eq!(ControlMessage::parse("[$] ALIVE").unwrap(), ControlMessage::Alive);
    }

    #[test]
    fn unknown_verb_is_rejected() {
        assert!(matches!(
            ControlMessage::parse("[$] FROB x"),
            Err(ControlParseError::UnknownVerb(_))
        ));
    }

    #[test]
    fn user_id_whitespace_collapses_to_dash() {
        let msg = ControlMessage::Imsg {
            local_name: "bob   the builder".to_string(),
            ciphertext_b64: "xx".to_string(),
        };
        assert_eq!(msg.emit(), "[$] IMSG bob-the-builder xx");
    }

    #[test]
    fn routing_drops_self_echo_and_foreign_targets() {
        assert!(!should_handle(Some("bob"), "alice", "alice"));
        assert!(!should_handle(Some("carol"), "bob", "alice"));
        assert!(should_handle(Some("alice"), "bob", "alice"));
        assert!(should_handle(None, "bob", "alice"));
    }

    #[test]
    fn list_regex_is_case_insensitive_and_optional() {
        assert!(list_matches(None, "anything"));
        assert!(list_matches(Some("^bob"), "BOB123"));
        assert!(!list_matches(Some("^bob"), "alice"));
    }
}
