//! Command resolution and the builtin commands.

use slirc_proto::irc_eq;
use tracing::debug;

use super::{Eat, ExpandContext, MAX_DEPTH, Words, expand_user_command, split_words};
use crate::client::{Client, Focus};
use crate::dcc::{DccState, DccType};
use crate::error::{CommandError, DccError};
use crate::events::TextEvent;
use crate::mode::build_mode_lines;
use crate::prefs::PrefValue;
use crate::server::{CleanupState, Server, ServerId};
use crate::ui::Target;

const HELP: &str = "Commands: CTCP DCC DEOP DEVOICE DISCONNECT ECHO HELP JOIN LAGCHECK ME MODE \
MSG NICK NOTICE NOTIFY OP PART QUIT QUOTE RAW RECONNECT SERVER SET TOPIC UNNOTIFY VOICE WHO WHOIS";

const DCC_HELP: &str = "Usage: DCC LIST | GET <nick|id> [file] | RESUME <nick|id> [file] | \
SEND <nick> <file>... | PSEND <nick> <file>... | CHAT <nick> | PCHAT <nick> | \
CLOSE <send|get|chat> <nick|id> [file]";

impl Client {
    /// Run one line typed in the window `focus`. Lines without the command
    /// character are sent to the window's channel, query or DCC chat.
    pub fn handle_command(&mut self, focus: &Focus, line: &str) -> Result<(), CommandError> {
        let cmdchar = self.prefs.get_str("input_command_char").chars().next().unwrap_or('/');
        let Some(rest) = line.strip_prefix(cmdchar) else {
            return self.say(focus, line);
        };
        // "//text" says "/text"
        if rest.starts_with(cmdchar) {
            return self.say(focus, rest);
        }
        let words = split_words(rest);
        if words.is_empty() {
            return Ok(());
        }
        self.run_words(focus, &words, 0)
    }

    fn run_words(&mut self, focus: &Focus, words: &Words, depth: usize) -> Result<(), CommandError> {
        if self.hooks.dispatch(words) == Eat::All {
            return Ok(());
        }

        let name = words.word(0);
        let bodies: Vec<String> = self
            .networks
            .commands
            .iter()
            .filter(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.body.clone())
            .collect();
        if !bodies.is_empty() {
            return self.run_user_command(focus, words, &bodies, depth);
        }

        if self.builtin(focus, words)? {
            return Ok(());
        }

        debug!(command = %name, "unknown command, sending raw");
        self.connected_server(focus)?.send(words.eol(0).to_owned());
        Ok(())
    }

    fn run_user_command(
        &mut self,
        focus: &Focus,
        words: &Words,
        bodies: &[String],
        depth: usize,
    ) -> Result<(), CommandError> {
        if depth >= MAX_DEPTH {
            return Err(CommandError::RecursionLimit(MAX_DEPTH));
        }

        let server = focus.server.and_then(|id| self.server(id));
        let ctx = ExpandContext {
            channel: focus.target.as_deref().unwrap_or_default(),
            nick: server.map(|s| s.nick.as_str()).unwrap_or_default(),
            server: server.map(|s| s.host.as_str()).unwrap_or_default(),
            network: server.map(Server::network_label).unwrap_or_default(),
        };
        let mut lines = Vec::new();
        for body in bodies {
            for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
                lines.push(expand_user_command(line, &ctx, words)?);
            }
        }

        for line in lines {
            let line = line.strip_prefix('/').unwrap_or(&line);
            let words = split_words(line);
            if !words.is_empty() {
                self.run_words(focus, &words, depth + 1)?;
            }
        }
        Ok(())
    }

    /// Returns `false` when `words[0]` is not a builtin.
    fn builtin(&mut self, focus: &Focus, words: &Words) -> Result<bool, CommandError> {
        match words.word(0).to_ascii_uppercase().as_str() {
            "SERVER" => self.cmd_server(focus, words)?,
            "RECONNECT" => {
                let id = self.focused_id(focus)?;
                let reason = self.prefs.get_str("irc_quit_reason").to_owned();
                self.disconnect(id, Some(&reason));
                self.connect(id)?;
            }
            "DISCONNECT" => {
                let id = self.focused_id(focus)?;
                let reason = self.quit_reason(words);
                let event = match self.disconnect(id, Some(&reason)) {
                    CleanupState::NotConnected => TextEvent::NotConnected,
                    _ => TextEvent::Disconnected { reason },
                };
                self.print(Target::Server(id), event);
            }
            "QUIT" => {
                let reason = self.quit_reason(words);
                let ids: Vec<ServerId> = self.servers.iter().map(|s| s.id).collect();
                for id in ids {
                    self.disconnect(id, Some(&reason));
                }
                self.quitting = true;
            }
            "JOIN" => {
                if words.word(1).is_empty() {
                    return Err(CommandError::NeedMoreParams("JOIN"));
                }
                let server = self.connected_server(focus)?;
                let mut channel = words.word(1).to_owned();
                if !server.is_channel(&channel) {
                    channel.insert(0, '#');
                }
                match words.word(2) {
                    "" => server.send(format!("JOIN {}", channel)),
                    key => server.send(format!("JOIN {} {}", channel, key)),
                }
            }
            "PART" => {
                let default_reason = self.prefs.get_str("irc_part_reason").to_owned();
                let server = self.connected_server(focus)?;
                let (channel, reason) = if server.is_channel(words.word(1)) {
                    (words.word(1).to_owned(), words.eol(2))
                } else {
                    let channel = focus.target.clone().ok_or(CommandError::NeedMoreParams("PART"))?;
                    (channel, words.eol(1))
                };
                let reason = if reason.is_empty() { default_reason.as_str() } else { reason };
                server.send(format!("PART {} :{}", channel, reason));
            }
            "MSG" => {
                let (target, text) = (words.word(1), words.eol(2));
                if target.is_empty() || text.is_empty() {
                    return Err(CommandError::NeedMoreParams("MSG"));
                }
                self.message(focus, target, text)?;
            }
            "NOTICE" => {
                let (target, text) = (words.word(1), words.eol(2));
                if target.is_empty() || text.is_empty() {
                    return Err(CommandError::NeedMoreParams("NOTICE"));
                }
                let server = self.connected_server(focus)?;
                server.send(format!("NOTICE {} :{}", target, text));
                let where_ = server.target_for(target);
                let event = TextEvent::Notice {
                    nick: format!("->{}", target),
                    text: text.to_owned(),
                };
                self.print(where_, event);
            }
            "ME" => self.cmd_me(focus, words.eol(1))?,
            "QUOTE" | "RAW" => {
                if words.eol(1).is_empty() {
                    return Err(CommandError::NeedMoreParams("QUOTE"));
                }
                self.connected_server(focus)?.send(words.eol(1).to_owned());
            }
            "MODE" => {
                let server = self.connected_server(focus)?;
                match (words.word(1).chars().next(), &focus.target) {
                    (Some('+' | '-'), Some(target)) => server.send(format!("MODE {} {}", target, words.eol(1))),
                    (Some(_), _) => server.send(format!("MODE {}", words.eol(1))),
                    (None, Some(target)) => server.send(format!("MODE {}", target)),
                    (None, None) => return Err(CommandError::NeedMoreParams("MODE")),
                }
            }
            "OP" => self.cmd_nick_modes(focus, words, '+', 'o')?,
            "DEOP" => self.cmd_nick_modes(focus, words, '-', 'o')?,
            "VOICE" => self.cmd_nick_modes(focus, words, '+', 'v')?,
            "DEVOICE" => self.cmd_nick_modes(focus, words, '-', 'v')?,
            "NICK" => {
                let nick = words.word(1);
                if nick.is_empty() {
                    return Err(CommandError::NeedMoreParams("NICK"));
                }
                let id = self.focused_id(focus)?;
                let Some(server) = self.server_mut(id) else {
                    return Err(CommandError::NoSuchServer(id.to_string()));
                };
                if server.is_connected() {
                    server.send(format!("NICK {}", nick));
                } else {
                    server.nick = nick.to_owned();
                }
            }
            "WHOIS" => {
                if words.word(1).is_empty() {
                    return Err(CommandError::NeedMoreParams("WHOIS"));
                }
                self.connected_server(focus)?.send(format!("WHOIS {}", words.eol(1)));
            }
            "WHO" => {
                let mask = match (words.word(1), &focus.target) {
                    ("", Some(target)) => target.clone(),
                    ("", None) => return Err(CommandError::NeedMoreParams("WHO")),
                    (mask, _) => mask.to_owned(),
                };
                self.connected_server(focus)?.send(format!("WHO {}", mask));
            }
            "TOPIC" => {
                let server = self.connected_server(focus)?;
                let (channel, text) = if server.is_channel(words.word(1)) {
                    (words.word(1).to_owned(), words.eol(2))
                } else {
                    let channel = focus.target.clone().ok_or(CommandError::NeedMoreParams("TOPIC"))?;
                    (channel, words.eol(1))
                };
                if text.is_empty() {
                    server.send(format!("TOPIC {}", channel));
                } else {
                    server.send(format!("TOPIC {} :{}", channel, text));
                }
            }
            "CTCP" => {
                let (target, what) = (words.word(1), words.word(2));
                if target.is_empty() || what.is_empty() {
                    return Err(CommandError::NeedMoreParams("CTCP"));
                }
                let body = match words.eol(3) {
                    "" => what.to_ascii_uppercase(),
                    rest => format!("{} {}", what.to_ascii_uppercase(), rest),
                };
                self.connected_server(focus)?
                    .send(format!("PRIVMSG {} :\x01{}\x01", target, body));
            }
            "NOTIFY" => self.cmd_notify(words),
            "UNNOTIFY" => self.cmd_unnotify(words)?,
            "DCC" => self.cmd_dcc(focus, words)?,
            "SET" => self.cmd_set(words)?,
            "ECHO" => self.print(Target::Front, TextEvent::ServerText(words.eol(1).to_owned())),
            "HELP" => self.print(Target::Front, TextEvent::Info(HELP.to_owned())),
            "LAGCHECK" => {
                let server = self.connected_server(focus)?;
                server.lag_sent = Some(std::time::Instant::now());
                server.lag_verbose = true;
                server.send(format!("PING LAG{}", chrono::Utc::now().timestamp_millis()));
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn focused_id(&self, focus: &Focus) -> Result<ServerId, CommandError> {
        focus.server.ok_or(CommandError::NotConnected)
    }

    /// The focused server, which must have a live connection.
    fn connected_server(&mut self, focus: &Focus) -> Result<&mut Server, CommandError> {
        let id = self.focused_id(focus)?;
        match self.server_mut(id) {
            Some(server) if server.is_connected() => Ok(server),
            Some(_) => Err(CommandError::NotConnected),
            None => Err(CommandError::NoSuchServer(id.to_string())),
        }
    }

    fn quit_reason(&self, words: &Words) -> String {
        match words.eol(1) {
            "" => self.prefs.get_str("irc_quit_reason").to_owned(),
            reason => reason.to_owned(),
        }
    }

    /// Plain text typed into a window.
    fn say(&mut self, focus: &Focus, text: &str) -> Result<(), CommandError> {
        if text.is_empty() {
            return Ok(());
        }
        let target = focus
            .target
            .clone()
            .ok_or(CommandError::Usage("no channel or query in this window"))?;
        self.message(focus, &target, text)
    }

    /// PRIVMSG to `target`, or a DCC chat line when it is `=nick`.
    fn message(&mut self, focus: &Focus, target: &str, text: &str) -> Result<(), CommandError> {
        if let Some(nick) = target.strip_prefix('=') {
            let me = self.dcc_chat_nick(nick);
            self.dcc.send_chat(nick, text, &me)?;
            self.drain_dcc();
            return Ok(());
        }
        let server = self.connected_server(focus)?;
        server.send(format!("PRIVMSG {} :{}", target, text));
        let where_ = server.target_for(target);
        let event = TextEvent::SelfMessage {
            nick: server.nick.clone(),
            text: text.to_owned(),
        };
        self.print(where_, event);
        Ok(())
    }

    /// Our nick on the server an open DCC chat with `nick` was set up through.
    fn dcc_chat_nick(&self, nick: &str) -> String {
        self.dcc
            .transfers()
            .iter()
            .find(|t| t.kind.is_chat() && t.state == DccState::Active && irc_eq(&t.nick, nick))
            .and_then(|t| self.server(t.server))
            .map(|s| s.nick.clone())
            .unwrap_or_else(|| self.prefs.get_str("irc_nick1").to_owned())
    }

    fn cmd_me(&mut self, focus: &Focus, text: &str) -> Result<(), CommandError> {
        if text.is_empty() {
            return Err(CommandError::NeedMoreParams("ME"));
        }
        let target = focus
            .target
            .clone()
            .ok_or(CommandError::Usage("no channel or query in this window"))?;
        let action = format!("\x01ACTION {}\x01", text);
        if let Some(nick) = target.strip_prefix('=') {
            let me = self.dcc_chat_nick(nick);
            self.dcc.send_chat(nick, &action, &me)?;
            self.drain_dcc();
            return Ok(());
        }
        let server = self.connected_server(focus)?;
        server.send(format!("PRIVMSG {} :{}", target, action));
        let where_ = server.target_for(&target);
        let event = TextEvent::Action {
            nick: server.nick.clone(),
            text: text.to_owned(),
        };
        self.print(where_, event);
        Ok(())
    }

    /// `/server [-ssl] host [port]` or `/server network`. A port written
    /// as `+6697` also selects TLS.
    fn cmd_server(&mut self, focus: &Focus, words: &Words) -> Result<(), CommandError> {
        let mut args: Vec<&str> = words.word.iter().skip(1).map(String::as_str).collect();
        let mut tls = false;
        if let Some(pos) = args.iter().position(|a| a.eq_ignore_ascii_case("-ssl") || a.eq_ignore_ascii_case("-tls")) {
            args.remove(pos);
            tls = true;
        }
        let Some(name) = args.first().copied() else {
            return Err(CommandError::NeedMoreParams("SERVER"));
        };

        let (host, port, tls, network) = match self.networks.find(name) {
            Some(network) => {
                let Some(entry) = network.servers.first() else {
                    return Err(CommandError::NoSuchServer(name.to_owned()));
                };
                (entry.host.clone(), entry.port, entry.tls || tls, Some(network.clone()))
            }
            None => {
                let (port, plus) = match args.get(1) {
                    Some(p) => match p.strip_prefix('+') {
                        Some(p) => (p.parse().ok(), true),
                        None => (p.parse().ok(), false),
                    },
                    None => (Some(if tls { 6697 } else { 6667 }), false),
                };
                let port = port.ok_or(CommandError::Usage("invalid port"))?;
                let network = self.networks.find_by_host(name).cloned();
                (name.to_owned(), port, tls || plus, network)
            }
        };

        let id = match focus.server.filter(|id| self.server(*id).is_some()) {
            Some(id) => {
                let reason = self.prefs.get_str("irc_quit_reason").to_owned();
                self.disconnect(id, Some(&reason));
                let nick = network.as_ref().and_then(|n| n.nick.clone());
                if let Some(server) = self.server_mut(id) {
                    server.host = host;
                    server.port = port;
                    server.tls = tls;
                    server.network = network;
                    if let Some(nick) = nick {
                        server.nick = nick;
                    }
                }
                id
            }
            None => self.add_server(&host, port, tls, network),
        };
        self.connect(id)
    }

    fn cmd_nick_modes(&mut self, focus: &Focus, words: &Words, sign: char, letter: char) -> Result<(), CommandError> {
        let nicks: Vec<&str> = words.word.iter().skip(1).map(String::as_str).collect();
        if nicks.is_empty() {
            return Err(CommandError::NeedMoreParams("OP"));
        }
        let server = self.connected_server(focus)?;
        let channel = focus
            .target
            .as_deref()
            .filter(|t| server.is_channel(t))
            .ok_or(CommandError::Usage("not in a channel"))?;
        for line in build_mode_lines(channel, sign, letter, &nicks, server.caps.modes_per_line) {
            server.send(line);
        }
        Ok(())
    }

    /// `/notify` lists; `/notify nick [net1,net2]` adds.
    fn cmd_notify(&mut self, words: &Words) {
        let nick = words.word(1);
        if nick.is_empty() {
            for line in self.notify.list() {
                self.print(Target::Front, TextEvent::Info(line));
            }
            return;
        }
        let networks: Vec<String> = words
            .word(2)
            .split(',')
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .collect();
        if !self.notify.add(nick, networks) {
            self.print(Target::Front, TextEvent::Info(format!("{} is already in the notify list", nick)));
            return;
        }
        if let Some(entry) = self.notify.find(nick) {
            for server in self.servers.iter_mut().filter(|s| s.end_of_motd) {
                if !entry.applies_to(server.network_label()) {
                    continue;
                }
                if let Some(line) = self.notify.watch_line(server, nick, true) {
                    server.send(line);
                }
            }
        }
        self.save_notify();
        self.print(Target::Front, TextEvent::NotifyAdded { nick: nick.to_owned() });
    }

    fn cmd_unnotify(&mut self, words: &Words) -> Result<(), CommandError> {
        let nick = words.word(1);
        if nick.is_empty() {
            return Err(CommandError::NeedMoreParams("UNNOTIFY"));
        }
        if !self.notify.remove(nick) {
            self.print(Target::Front, TextEvent::Info(format!("{} is not in the notify list", nick)));
            return Ok(());
        }
        for server in self.servers.iter_mut().filter(|s| s.end_of_motd) {
            if let Some(line) = self.notify.watch_line(server, nick, false) {
                server.send(line);
            }
        }
        self.save_notify();
        self.print(Target::Front, TextEvent::NotifyRemoved { nick: nick.to_owned() });
        Ok(())
    }

    /// `/set` lists, `/set name` shows, `/set name [=] value` changes and
    /// saves.
    fn cmd_set(&mut self, words: &Words) -> Result<(), CommandError> {
        let name = words.word(1);
        if name.is_empty() {
            let lines: Vec<String> = self
                .prefs
                .iter()
                .map(|(name, value)| format!("{:<28} = {}", name, show(value)))
                .collect();
            for line in lines {
                self.print(Target::Front, TextEvent::Info(line));
            }
            return Ok(());
        }
        let value = match words.word(2) {
            "=" => words.eol(3),
            _ => words.eol(2),
        };
        if value.is_empty() {
            let shown = self
                .prefs
                .get(name)
                .map(show)
                .ok_or_else(|| crate::prefs::PrefsError::Unknown(name.to_owned()))?;
            self.print(Target::Front, TextEvent::Info(format!("{} = {}", name, shown)));
            return Ok(());
        }
        self.prefs.set(name, value)?;
        self.save_prefs()?;
        self.print(Target::Front, TextEvent::Info(format!("{} set to {}", name, value)));
        Ok(())
    }

    fn cmd_dcc(&mut self, focus: &Focus, words: &Words) -> Result<(), CommandError> {
        let sub = words.word(1).to_ascii_uppercase();
        let nick = words.word(2);
        let file = match words.word(3) {
            "" => None,
            f => Some(f),
        };
        let result = match sub.as_str() {
            "" | "LIST" => {
                for line in self.dcc.list() {
                    self.print(Target::Front, TextEvent::DccList(line));
                }
                Ok(())
            }
            _ if nick.is_empty() => return Err(CommandError::Usage(DCC_HELP)),
            "GET" => {
                let id = self
                    .dcc
                    .find(Some(DccType::Recv), nick, file)
                    .or_else(|| self.dcc.find(Some(DccType::ChatRecv), nick, None))
                    .ok_or_else(|| DccError::NoSuchTransfer(nick.to_owned()))?;
                let our_ip = self.dcc.get(id).and_then(|t| self.dcc_ip_for(t.server));
                self.dcc.accept(&self.prefs, id, our_ip)
            }
            "RESUME" => {
                let id = self
                    .dcc
                    .find(Some(DccType::Recv), nick, file)
                    .ok_or_else(|| DccError::NoSuchTransfer(nick.to_owned()))?;
                self.dcc.resume(id)
            }
            "SEND" | "PSEND" => {
                let paths: Vec<&str> = words.word.iter().skip(3).map(String::as_str).collect();
                if paths.is_empty() {
                    return Err(CommandError::Usage(DCC_HELP));
                }
                let id = self.connected_server(focus)?.id;
                let our_ip = self.dcc_ip_for(id);
                let passive = sub == "PSEND";
                paths
                    .into_iter()
                    .try_for_each(|path| self.dcc.offer_send(&self.prefs, id, nick, path, passive, our_ip).map(drop))
            }
            "CHAT" | "PCHAT" => {
                let id = self.connected_server(focus)?.id;
                let our_ip = self.dcc_ip_for(id);
                self.dcc
                    .offer_chat(&self.prefs, id, nick, sub == "PCHAT", our_ip)
                    .map(drop)
            }
            "CLOSE" => {
                let (kind, who, file) = (nick, words.word(3), words.word(4));
                let file = (!file.is_empty()).then_some(file);
                let found = match kind.to_ascii_uppercase().as_str() {
                    "SEND" => self.dcc.find(Some(DccType::Send), who, file),
                    "GET" => self.dcc.find(Some(DccType::Recv), who, file),
                    "CHAT" => self
                        .dcc
                        .find(Some(DccType::ChatSend), who, None)
                        .or_else(|| self.dcc.find(Some(DccType::ChatRecv), who, None)),
                    _ => return Err(CommandError::Usage(DCC_HELP)),
                };
                let id = found.ok_or_else(|| DccError::NoSuchTransfer(who.to_owned()))?;
                self.dcc.abort(&self.prefs, id)
            }
            _ => return Err(CommandError::Usage(DCC_HELP)),
        };
        self.drain_dcc();
        result.map_err(CommandError::from)
    }
}

fn show(value: &PrefValue) -> String {
    match value {
        PrefValue::Str(s) => s.clone(),
        PrefValue::Int(i) => i.to_string(),
        PrefValue::Bool(b) => u8::from(*b).to_string(),
    }
}
