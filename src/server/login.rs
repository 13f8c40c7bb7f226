//! Registration: CAP negotiation, SASL, PASS/NICK/USER and nick fallback.

use std::net::SocketAddr;
use std::time::Instant;

use slirc_proto::{Message, SaslMechanism, sasl};
use tracing::{debug, info, warn};

use super::{LinkState, Output, Server};
use crate::events::TextEvent;
use crate::prefs::Prefs;
use crate::ui::Target;

/// Capabilities requested whenever the server offers them.
const WANTED_CAPS: &[&str] = &[
    "multi-prefix",
    "away-notify",
    "account-notify",
    "extended-join",
    "chghost",
    "userhost-in-names",
    "server-time",
    "cap-notify",
];

impl Server {
    /// The socket is up: record addresses and queue the login lines.
    pub fn on_connected(&mut self, local: SocketAddr, prefs: &Prefs) {
        self.link = LinkState::Connected;
        self.local_addr = Some(local);
        self.last_recv = Instant::now();
        self.nick_attempt = 0;
        self.cap_ls.clear();
        self.sasl_pending = false;

        if self.no_login {
            debug!(server = %self.host, "no_login set, skipping registration");
            return;
        }

        let network = self.network.clone();
        let user = network
            .as_ref()
            .and_then(|n| n.user_name.clone())
            .unwrap_or_else(|| prefs.get_str("irc_user_name").to_owned());
        let real = network
            .as_ref()
            .and_then(|n| n.real_name.clone())
            .unwrap_or_else(|| prefs.get_str("irc_real_name").to_owned());

        self.send("CAP LS 302");
        if let Some(pass) = network.as_ref().and_then(|n| n.password.as_ref()) {
            self.send(format!("PASS {}", pass.as_str()));
        }
        self.send(format!("NICK {}", self.nick));
        self.send(format!("USER {} 0 * :{}", user, real));
    }

    /// The SASL mechanism configured for this network, if any.
    fn wanted_sasl(&self) -> Option<SaslMechanism> {
        let net = self.network.as_ref()?;
        if let Some(name) = &net.sasl_mechanism {
            return Some(SaslMechanism::parse(name));
        }
        if net.sasl_password.is_some() {
            Some(SaslMechanism::Plain)
        } else if net.client_cert.is_some() {
            Some(SaslMechanism::External)
        } else {
            None
        }
    }

    fn cap_end(&mut self) {
        if self.link != LinkState::Registered {
            self.send("CAP END");
        }
    }

    /// `CAP` subcommands.
    pub(super) fn handle_cap(&mut self, msg: &Message) -> Vec<Output> {
        let mut out = Vec::new();
        let Some(sub) = msg.param(1) else {
            return out;
        };
        match sub.to_ascii_uppercase().as_str() {
            "LS" => {
                // CAP * LS * :more follows
                let more = msg.params.len() > 3 && msg.param(2) == Some("*");
                let list = msg.trailing().unwrap_or_default();
                for cap in list.split_whitespace() {
                    let (name, value) = match cap.split_once('=') {
                        Some((n, v)) => (n.to_owned(), Some(v.to_owned())),
                        None => (cap.to_owned(), None),
                    };
                    self.cap_ls.push((name, value));
                }
                if !more {
                    self.request_caps(false);
                }
            }
            "NEW" => {
                let list = msg.trailing().unwrap_or_default();
                for cap in list.split_whitespace() {
                    let (name, value) = match cap.split_once('=') {
                        Some((n, v)) => (n.to_owned(), Some(v.to_owned())),
                        None => (cap.to_owned(), None),
                    };
                    self.cap_ls.retain(|(n, _)| *n != name);
                    self.cap_ls.push((name, value));
                }
                self.request_caps(true);
            }
            "DEL" => {
                let list = msg.trailing().unwrap_or_default();
                for cap in list.split_whitespace() {
                    self.caps.enabled.retain(|c| !c.eq_ignore_ascii_case(cap));
                    self.cap_ls.retain(|(n, _)| !n.eq_ignore_ascii_case(cap));
                }
            }
            "ACK" => {
                let list = msg.trailing().unwrap_or_default();
                let mut sasl_acked = false;
                for cap in list.split_whitespace() {
                    if let Some(removed) = cap.strip_prefix('-') {
                        self.caps.enabled.retain(|c| !c.eq_ignore_ascii_case(removed));
                        continue;
                    }
                    if cap.eq_ignore_ascii_case("sasl") {
                        sasl_acked = true;
                    }
                    if !self.caps.has(cap) {
                        self.caps.enabled.push(cap.to_owned());
                    }
                }
                out.push(Output::Print(
                    Target::Server(self.id),
                    TextEvent::Capabilities(list.to_owned()),
                ));
                match (sasl_acked, self.caps.sasl_mechanism.clone()) {
                    (true, Some(mech)) if self.link != LinkState::Registered => {
                        self.sasl_pending = true;
                        out.push(Output::Print(
                            Target::Server(self.id),
                            TextEvent::SaslAuthenticating(mech.as_str().to_owned()),
                        ));
                        self.send(format!("AUTHENTICATE {}", mech.as_str()));
                    }
                    _ if !self.sasl_pending => self.cap_end(),
                    _ => {}
                }
            }
            "NAK" => {
                debug!(server = %self.host, caps = ?msg.trailing(), "capabilities rejected");
                if !self.sasl_pending {
                    self.cap_end();
                }
            }
            other => debug!(server = %self.host, sub = other, "unhandled CAP"),
        }
        out
    }

    /// Send `CAP REQ` for what we want from `cap_ls`. `incremental` is a
    /// `CAP NEW`: nothing to end if nothing is wanted.
    fn request_caps(&mut self, incremental: bool) {
        let mut wanted: Vec<String> = self
            .cap_ls
            .iter()
            .filter(|(name, _)| {
                WANTED_CAPS.iter().any(|w| w.eq_ignore_ascii_case(name)) && !self.caps.has(name)
            })
            .map(|(name, _)| name.clone())
            .collect();

        if !incremental && self.link != LinkState::Registered {
            if let Some(mech) = self.wanted_sasl() {
                let offered = self
                    .cap_ls
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("sasl"));
                match offered {
                    Some((_, value)) if mech.offered_by(value.as_deref()) => {
                        self.caps.sasl_mechanism = Some(mech);
                        wanted.push("sasl".to_owned());
                    }
                    Some(_) => {
                        warn!(server = %self.host, mechanism = mech.as_str(), "SASL mechanism not offered")
                    }
                    None => warn!(server = %self.host, "server does not offer SASL"),
                }
            }
        }

        if wanted.is_empty() {
            if !incremental {
                self.cap_end();
            }
            return;
        }
        self.send(format!("CAP REQ :{}", wanted.join(" ")));
    }

    /// `AUTHENTICATE +`: send our credentials.
    pub(super) fn handle_authenticate(&mut self, msg: &Message) {
        if msg.param(0) != Some("+") || !self.sasl_pending {
            return;
        }
        let encoded = self.network.as_ref().and_then(|net| match &self.caps.sasl_mechanism {
            Some(SaslMechanism::Plain) => {
                let user = net
                    .sasl_user
                    .clone()
                    .or_else(|| net.nick.clone())
                    .unwrap_or_else(|| self.nick.clone());
                let pass = net
                    .sasl_password
                    .as_ref()
                    .or(net.password.as_ref())
                    .map(|p| p.as_str().to_owned())
                    .unwrap_or_default();
                Some(sasl::encode_plain(&user, &pass))
            }
            Some(SaslMechanism::External) => Some(sasl::encode_external(net.sasl_user.as_deref())),
            _ => None,
        });
        let Some(encoded) = encoded else {
            // abort the exchange
            self.send("AUTHENTICATE *");
            return;
        };
        for chunk in sasl::chunk_response(&encoded) {
            self.send(format!("AUTHENTICATE {}", chunk));
        }
    }

    /// 900-908.
    pub(super) fn handle_sasl_numeric(&mut self, code: u16, msg: &Message) -> Vec<Output> {
        let text = msg.trailing().unwrap_or_default().to_owned();
        match code {
            900 => {
                return vec![Output::Print(
                    Target::Server(self.id),
                    TextEvent::SaslResult(text),
                )];
            }
            903 => info!(server = %self.host, "SASL authentication succeeded"),
            902 | 904 | 905 | 906 | 907 => {
                warn!(server = %self.host, code, reason = %text, "SASL authentication failed")
            }
            _ => return Vec::new(),
        }
        self.sasl_pending = false;
        self.cap_end();
        vec![Output::Print(
            Target::Server(self.id),
            TextEvent::SaslResult(text),
        )]
    }

    /// 433 during registration: move to the next configured nick.
    pub(super) fn handle_nick_in_use(&mut self, msg: &Message, prefs: &Prefs) -> Vec<Output> {
        let taken = msg.param(1).unwrap_or(&self.nick).to_owned();
        if self.link == LinkState::Registered {
            return vec![Output::Print(
                Target::Front,
                TextEvent::ServerText(format!("* {} is already in use", taken)),
            )];
        }
        self.nick_attempt += 1;
        let next = match self.nick_attempt {
            1 => prefs.get_str("irc_nick2").to_owned(),
            2 => prefs.get_str("irc_nick3").to_owned(),
            n => format!("{}{}", prefs.get_str("irc_nick1"), n),
        };
        self.nick = next.clone();
        self.send(format!("NICK {}", next));
        vec![Output::Print(
            Target::Server(self.id),
            TextEvent::NickInUse { nick: taken, retry: next },
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::NetworkList;
    use crate::server::ServerId;

    fn server_with(config: &str) -> Server {
        let prefs = Prefs::default();
        let net = NetworkList::parse(config).unwrap().networks.into_iter().next();
        let mut server = Server::new(ServerId(1), "irc.example.net", 6697, true, net, &prefs);
        server.begin_connect(&prefs);
        server.on_connected("127.0.0.1:40000".parse().unwrap(), &prefs);
        server
    }

    fn drain(server: &mut Server) -> Vec<String> {
        server.queue.set_throttle(false);
        server.queue.poll(0)
    }

    fn msg(line: &str) -> Message {
        line.parse().unwrap()
    }

    const SASL_NET: &str = r#"
[[network]]
name = "Example"
nick = "alice"
sasl_user = "alice"
sasl_password = "hunter2"
[[network.server]]
host = "irc.example.net"
"#;

    #[test]
    fn test_registration_lines() {
        let mut server = server_with(SASL_NET);
        let lines = drain(&mut server);
        assert_eq!(lines[0], "CAP LS 302");
        assert_eq!(lines[1], "NICK alice");
        assert!(lines[2].starts_with("USER slirc 0 * :"));
    }

    #[test]
    fn test_sasl_plain_flow() {
        let mut server = server_with(SASL_NET);
        drain(&mut server);

        server.handle_cap(&msg(":srv CAP * LS * :multi-prefix sasl=PLAIN,EXTERNAL"));
        assert!(drain(&mut server).is_empty());
        server.handle_cap(&msg(":srv CAP * LS :away-notify"));
        let req = drain(&mut server);
        assert_eq!(req, vec!["CAP REQ :multi-prefix away-notify sasl"]);

        server.handle_cap(&msg(":srv CAP alice ACK :multi-prefix away-notify sasl"));
        assert_eq!(drain(&mut server), vec!["AUTHENTICATE PLAIN"]);
        assert!(server.caps.has("multi-prefix"));

        server.handle_authenticate(&msg("AUTHENTICATE +"));
        let auth = drain(&mut server);
        assert_eq!(auth, vec![format!("AUTHENTICATE {}", sasl::encode_plain("alice", "hunter2"))]);

        server.handle_sasl_numeric(903, &msg(":srv 903 alice :SASL authentication successful"));
        assert_eq!(drain(&mut server), vec!["CAP END"]);
    }

    #[test]
    fn test_sasl_failure_still_ends_negotiation() {
        let mut server = server_with(SASL_NET);
        drain(&mut server);
        server.handle_cap(&msg(":srv CAP * LS :sasl"));
        server.handle_cap(&msg(":srv CAP * ACK :sasl"));
        drain(&mut server);
        let out = server.handle_sasl_numeric(904, &msg(":srv 904 alice :SASL authentication failed"));
        assert_eq!(out.len(), 1);
        assert_eq!(drain(&mut server), vec!["CAP END"]);
    }

    #[test]
    fn test_no_caps_wanted_ends_immediately() {
        let mut server = server_with("");
        drain(&mut server);
        server.handle_cap(&msg(":srv CAP * LS :znc.in/playback"));
        assert_eq!(drain(&mut server), vec!["CAP END"]);
    }

    #[test]
    fn test_nick_fallback_order() {
        let prefs = Prefs::default();
        let mut server = server_with("");
        drain(&mut server);
        server.handle_nick_in_use(&msg(":srv 433 * slirc :Nickname is already in use"), &prefs);
        assert_eq!(server.nick, "slirc_");
        server.handle_nick_in_use(&msg(":srv 433 * slirc_ :Nickname is already in use"), &prefs);
        assert_eq!(server.nick, "slirc__");
        server.handle_nick_in_use(&msg(":srv 433 * slirc__ :Nickname is already in use"), &prefs);
        assert_eq!(server.nick, "slirc3");
        assert_eq!(drain(&mut server), vec!["NICK slirc_", "NICK slirc__", "NICK slirc3"]);
    }
}
