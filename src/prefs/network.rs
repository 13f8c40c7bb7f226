//! Network list (`networks.toml`).
//!
//! ```toml
//! [[network]]
//! name = "Libera"
//! autojoin = ["#rust", "#slirc secretkey"]
//! sasl_user = "alice"
//! sasl_password = "hunter2"
//!
//! [[network.server]]
//! host = "irc.libera.chat"
//! port = 6697
//! tls = true
//!
//! [[command]]
//! name = "J"
//! body = "join &2"
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("network {0} has no servers")]
    NoServers(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkList {
    #[serde(default, rename = "network")]
    pub networks: Vec<NetworkConfig>,
    /// User-defined commands, available everywhere.
    #[serde(default, rename = "command")]
    pub commands: Vec<UserCommandConfig>,
}

impl NetworkList {
    /// Load from a TOML file. A missing file yields an empty list.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let list: NetworkList = toml::from_str(content)?;
        if let Some(empty) = list.networks.iter().find(|n| n.servers.is_empty()) {
            return Err(ConfigError::NoServers(empty.name.clone()));
        }
        Ok(list)
    }

    /// Network by name, case-insensitively.
    pub fn find(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks
            .iter()
            .find(|n| n.name.eq_ignore_ascii_case(name))
    }

    /// Network that lists `host` among its servers.
    pub fn find_by_host(&self, host: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| {
            n.servers
                .iter()
                .any(|s| s.host.eq_ignore_ascii_case(host))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(rename = "server")]
    pub servers: Vec<ServerEntry>,
    /// Overrides `irc_nick1`.
    pub nick: Option<String>,
    pub user_name: Option<String>,
    pub real_name: Option<String>,
    /// Server password (PASS).
    #[serde(default)]
    pub password: Option<SecureString>,
    pub sasl_user: Option<String>,
    #[serde(default)]
    pub sasl_password: Option<SecureString>,
    /// `PLAIN` (default when a password is set) or `EXTERNAL`.
    pub sasl_mechanism: Option<String>,
    /// PEM file with a client certificate and key (SASL EXTERNAL).
    pub client_cert: Option<String>,
    /// Channels to join after the MOTD, `"#chan"` or `"#chan key"`.
    #[serde(default)]
    pub autojoin: Vec<String>,
    /// Commands run after the MOTD.
    #[serde(default)]
    pub connect_commands: Vec<String>,
    /// Charset label; pins the encoding against 005 `CHARSET`.
    pub encoding: Option<String>,
    #[serde(default)]
    pub accept_invalid_cert: bool,
    /// Skip CAP/PASS/NICK/USER (raw gateways, bouncers with their own login).
    #[serde(default)]
    pub no_login: bool,
}

/// A secret that is zeroized when dropped.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print actual content
        f.debug_struct("SecureString")
            .field("len", &self.0.len())
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
}

fn default_port() -> u16 {
    6667
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserCommandConfig {
    pub name: String,
    /// One or more lines, each run through substitution.
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
[[network]]
name = "Libera"
autojoin = ["#rust", "#slirc key"]
sasl_user = "alice"
sasl_password = "hunter2"

[[network.server]]
host = "irc.libera.chat"
port = 6697
tls = true

[[network.server]]
host = "irc.eu.libera.chat"

[[command]]
name = "J"
body = "join &2"
"##;

    #[test]
    fn test_parse_sample() {
        let list = NetworkList::parse(SAMPLE).unwrap();
        let libera = list.find("libera").unwrap();
        assert_eq!(libera.servers.len(), 2);
        assert!(libera.servers[0].tls);
        assert_eq!(libera.servers[1].port, 6667);
        assert_eq!(libera.sasl_password.as_ref().map(SecureString::as_str), Some("hunter2"));
        assert_eq!(list.commands[0].body, "join &2");
        assert!(list.find_by_host("IRC.EU.LIBERA.CHAT").is_some());
    }

    #[test]
    fn test_network_without_servers_rejected() {
        let err = NetworkList::parse("[[network]]\nname = \"X\"\nserver = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoServers(name) if name == "X"));
    }
}
