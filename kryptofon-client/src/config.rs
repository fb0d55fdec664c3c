//! Runtime configuration: a plain struct with `..Default::default()`-
//! friendly defaults so callers only override what they care about.

use std::path::PathBuf;

/// Defaults are implementation-defined per §6; these match the values
/// used throughout the rest of this implementation's tests and demos.
pub const DEFAULT_RENDEZVOUS_HOST: &str = "127.0.0.1";
pub const DEFAULT_RENDEZVOUS_PORT: u16 = 7000;
pub const DEFAULT_UDP_BASE_PORT: u16 = 40000;

#[derive(Clone, Debug)]
pub struct Config {
    pub rendezvous_host: String,
    pub rendezvous_port: u16,
    pub local_user_id: String,
    pub udp_base_port: u16,
    pub identity_dir: PathBuf,
    /// Address we advertise to peers in INVITE/RING/ACCEPT so they know
    /// where to send us UDP datagrams. Loopback by default; a deployment
    /// reachable over a real network overrides this with its public or
    /// NAT-mapped address.
    pub public_host: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            rendezvous_host: DEFAULT_RENDEZVOUS_HOST.to_string(),
            rendezvous_port: DEFAULT_RENDEZVOUS_PORT,
            local_user_id: "anonymous".to_string(),
            udp_base_port: DEFAULT_UDP_BASE_PORT,
            identity_dir: default_identity_dir(),
            public_host: DEFAULT_RENDEZVOUS_HOST.to_string(),
        }
    }
}

fn default_identity_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".mykf"),
        None => PathBuf::from(".mykf"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_ports() {
        let config = Config::default();
        assert_eq!(config.rendezvous_host, "127.0.0.1");
        assert_eq!(config.rendezvous_port, 7000);
        assert_eq!(config.udp_base_port, 40000);
    }
}
