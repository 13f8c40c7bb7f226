//! Applying 005 tokens to a server's tables.

use slirc_proto::isupport::{self, DEFAULT_CHANTYPES, IsupportToken};
use slirc_proto::{Casemapping, ChanModes, Message, PrefixSpec};
use tracing::{debug, info, warn};

use crate::server::Server;

use super::ModeTables;

impl Server {
    pub fn mode_tables(&self) -> ModeTables<'_> {
        ModeTables {
            chanmodes: &self.chanmodes,
            prefix: &self.prefix,
            casemap: self.casemap,
        }
    }

    /// Read one `RPL_ISUPPORT` line. `-KEY` restores the default.
    pub fn apply_isupport(&mut self, msg: &Message) {
        let mut tables_changed = false;

        for token in isupport::tokens(&msg.params) {
            match token {
                IsupportToken::Set(key, value) => match key.to_ascii_uppercase().as_str() {
                    "CHANMODES" => {
                        self.chanmodes = ChanModes::parse(value.unwrap_or_default());
                    }
                    "PREFIX" => match value.and_then(PrefixSpec::parse) {
                        Some(spec) => {
                            self.prefix = spec;
                            tables_changed = true;
                        }
                        None => warn!(server = %self.host, value = ?value, "unusable PREFIX"),
                    },
                    "CASEMAPPING" => {
                        self.casemap = Casemapping::parse(value.unwrap_or_default());
                        tables_changed = true;
                    }
                    "CHANTYPES" => {
                        self.chantypes = value.unwrap_or_default().to_owned();
                    }
                    "NETWORK" => {
                        self.network_name = value.map(str::to_owned);
                    }
                    "CHARSET" => self.apply_charset(value.unwrap_or_default()),
                    "EXCEPTS" => self.caps.have_except = true,
                    "INVEX" => self.caps.have_invite = true,
                    "WATCH" => self.caps.supports_watch = true,
                    "MONITOR" => {
                        self.caps.supports_monitor = true;
                        self.caps.monitor_limit = value.and_then(|v| v.parse().ok());
                    }
                    "WHOX" => self.caps.have_whox = true,
                    "NAMESX" => {
                        if !self.caps.have_namesx && !self.caps.has("multi-prefix") {
                            self.send("PROTOCTL NAMESX");
                        }
                        self.caps.have_namesx = true;
                    }
                    "UHNAMES" => {
                        if !self.caps.have_uhnames && !self.caps.has("userhost-in-names") {
                            self.send("PROTOCTL UHNAMES");
                        }
                        self.caps.have_uhnames = true;
                    }
                    "MODES" => {
                        self.caps.modes_per_line = value.and_then(|v| v.parse().ok()).unwrap_or(3);
                    }
                    _ => {}
                },
                IsupportToken::Unset(key) => match key.to_ascii_uppercase().as_str() {
                    "CHANMODES" => self.chanmodes = ChanModes::default(),
                    "PREFIX" => {
                        self.prefix = PrefixSpec::default();
                        tables_changed = true;
                    }
                    "CASEMAPPING" => {
                        self.casemap = Casemapping::default();
                        tables_changed = true;
                    }
                    "CHANTYPES" => self.chantypes = DEFAULT_CHANTYPES.to_owned(),
                    "WATCH" => self.caps.supports_watch = false,
                    "MONITOR" => {
                        self.caps.supports_monitor = false;
                        self.caps.monitor_limit = None;
                    }
                    _ => {}
                },
            }
        }

        if tables_changed {
            debug!(server = %self.host, prefix = ?self.prefix, casemap = ?self.casemap, "tables updated");
            let (casemap, prefix) = (self.casemap, self.prefix.clone());
            for session in &mut self.sessions {
                if session.user_count() == 0 {
                    session.set_tables(casemap, prefix.clone());
                }
            }
        }
    }

    fn apply_charset(&mut self, label: &str) {
        if self.encoding_pinned {
            return;
        }
        match slirc_proto::encoding_for_label(label) {
            Some(encoding) if encoding != self.encoding => {
                info!(server = %self.host, charset = encoding.name(), "switching charset");
                self.encoding = encoding;
                if let Some(conn) = &self.conn {
                    conn.set_encoding(encoding);
                }
            }
            Some(_) => {}
            None => warn!(server = %self.host, charset = label, "unknown CHARSET"),
        }
    }
}

#[cfg(test)]
mod tests {
    use slirc_proto::ChanModeClass;

    use crate::prefs::Prefs;
    use crate::server::{Server, ServerId};

    fn apply(server: &mut Server, line: &str) {
        server.apply_isupport(&line.parse().unwrap());
    }

    #[test]
    fn test_tables_from_005() {
        let prefs = Prefs::default();
        let mut server = Server::new(ServerId(1), "irc.example.net", 6667, false, None, &prefs);
        apply(
            &mut server,
            ":srv 005 me CHANMODES=eIbq,k,flj,CFLMPQScgimnprstz PREFIX=(qaohv)~&@%+ \
             CASEMAPPING=ascii NETWORK=Example MONITOR=100 EXCEPTS MODES=4 :are supported by this server",
        );
        assert_eq!(server.chanmodes.class('q'), Some(ChanModeClass::A));
        assert_eq!(server.prefix.rank_of_mode('q'), Some(0));
        assert_eq!(server.casemap, slirc_proto::Casemapping::Ascii);
        assert_eq!(server.network_label(), "Example");
        assert!(server.caps.supports_monitor);
        assert_eq!(server.caps.monitor_limit, Some(100));
        assert!(server.caps.have_except);
        assert_eq!(server.caps.modes_per_line, 4);

        apply(&mut server, ":srv 005 me -MONITOR -PREFIX :are supported by this server");
        assert!(!server.caps.supports_monitor);
        assert_eq!(server.prefix.rank_of_mode('q'), None);
    }

    #[test]
    fn test_charset_respects_pin() {
        let prefs = Prefs::default();
        let mut server = Server::new(ServerId(1), "h", 6667, false, None, &prefs);
        apply(&mut server, ":srv 005 me CHARSET=iso-8859-1 :are supported");
        assert_ne!(server.encoding, slirc_proto::UTF_8);

        let mut pinned = Server::new(ServerId(2), "h", 6667, false, None, &prefs);
        pinned.encoding_pinned = true;
        apply(&mut pinned, ":srv 005 me CHARSET=iso-8859-1 :are supported");
        assert_eq!(pinned.encoding, slirc_proto::UTF_8);
    }
}
