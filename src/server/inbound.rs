//! Inbound dispatch: one received line at a time, in arrival order.

use std::net::IpAddr;
use std::time::Instant;

use chrono::Local;
use slirc_proto::ctcp::SUPPORTED;
use slirc_proto::{Ctcp, CtcpKind, DccRequest, Line, Message, decode_line};
use tracing::{debug, info, trace, warn};

use super::{LinkState, Output, Server, SessionKind};
use crate::events::TextEvent;
use crate::mode::{self, ModeTables};
use crate::notify::PresenceUpdate;
use crate::prefs::Prefs;
use crate::ui::Target;

impl Server {
    /// Decode and dispatch one line from the connection task.
    pub fn handle_line(&mut self, line: &Line, prefs: &Prefs) -> Vec<Output> {
        self.last_recv = Instant::now();
        let text = decode_line(&line.bytes, self.encoding);
        let mut out = Vec::new();
        if line.truncated {
            warn!(server = %self.host, len = line.bytes.len(), "truncated line");
            out.push(Output::Print(Target::Server(self.id), TextEvent::TruncatedLine));
        }
        if text.trim().is_empty() {
            return out;
        }
        trace!(server = %self.host, line = %text, "recv");
        match text.parse::<Message>() {
            Ok(msg) => out.extend(self.handle_message(&msg, prefs)),
            Err(e) => {
                debug!(server = %self.host, error = %e, "unparseable line");
                out.push(Output::Print(Target::Server(self.id), TextEvent::ServerText(text)));
            }
        }
        out
    }

    fn print_server(&self, event: TextEvent) -> Output {
        Output::Print(Target::Server(self.id), event)
    }

    fn print_in(&self, name: &str, event: TextEvent) -> Output {
        Output::Print(self.target_for(name), event)
    }

    pub fn handle_message(&mut self, msg: &Message, prefs: &Prefs) -> Vec<Output> {
        let nick = msg.source_nick().unwrap_or_default().to_owned();
        match msg.command.as_str() {
            "PING" => {
                let token = msg.trailing().unwrap_or_default();
                self.send(format!("PONG :{}", token));
                Vec::new()
            }
            "PONG" => self.handle_pong(msg),
            "ERROR" => {
                let text = msg.trailing().unwrap_or_default().to_owned();
                vec![self.print_server(TextEvent::ServerError(text))]
            }
            "CAP" => self.handle_cap(msg),
            "AUTHENTICATE" => {
                self.handle_authenticate(msg);
                Vec::new()
            }
            "JOIN" => self.handle_join(msg, &nick),
            "PART" => self.handle_part(msg, &nick),
            "KICK" => self.handle_kick(msg, &nick, prefs),
            "QUIT" => self.handle_quit(msg, &nick),
            "NICK" => self.handle_nick(msg, &nick),
            "MODE" => self.handle_mode_line(msg, &nick),
            "TOPIC" => {
                let (Some(channel), Some(topic)) = (msg.param(0), msg.param(1)) else {
                    return Vec::new();
                };
                if let Some(session) = self.session_mut(channel) {
                    session.topic = Some(topic.to_owned());
                }
                vec![self.print_in(
                    channel,
                    TextEvent::TopicChange {
                        nick,
                        channel: channel.to_owned(),
                        topic: topic.to_owned(),
                    },
                )]
            }
            "INVITE" => {
                let channel = msg.param(1).unwrap_or_default();
                vec![Output::Print(
                    Target::Front,
                    TextEvent::Info(format!("{} has invited you to {}", nick, channel)),
                )]
            }
            "AWAY" => {
                let away = msg.param(0).is_some();
                for session in &mut self.sessions {
                    if let Some(user) = session.user_mut(&nick) {
                        user.away = away;
                    }
                }
                Vec::new()
            }
            "ACCOUNT" => {
                let account = msg.param(0).filter(|a| *a != "*").map(str::to_owned);
                for session in &mut self.sessions {
                    if let Some(user) = session.user_mut(&nick) {
                        user.account = account.clone();
                    }
                }
                Vec::new()
            }
            "CHGHOST" => {
                if let (Some(user), Some(host)) = (msg.param(0), msg.param(1)) {
                    let userhost = format!("{}@{}", user, host);
                    for session in &mut self.sessions {
                        if let Some(u) = session.user_mut(&nick) {
                            u.host = Some(userhost.clone());
                        }
                    }
                }
                Vec::new()
            }
            "PRIVMSG" | "NOTICE" => self.handle_privmsg(msg, &nick),
            _ => match msg.numeric() {
                Some(code) => self.handle_numeric(code, msg, prefs),
                None => {
                    debug!(server = %self.host, command = %msg.command, "unhandled command");
                    Vec::new()
                }
            },
        }
    }

    fn handle_pong(&mut self, msg: &Message) -> Vec<Output> {
        let token = msg.trailing().unwrap_or_default();
        if !token.starts_with("LAG") {
            return Vec::new();
        }
        let Some(sent) = self.lag_sent.take() else {
            return Vec::new();
        };
        let lag = sent.elapsed();
        self.lag = Some(lag);
        debug!(server = %self.host, lag_ms = lag.as_millis() as u64, "lag");
        if std::mem::take(&mut self.lag_verbose) {
            vec![self.print_server(TextEvent::Lag {
                millis: lag.as_millis() as u64,
            })]
        } else {
            Vec::new()
        }
    }

    fn handle_join(&mut self, msg: &Message, nick: &str) -> Vec<Output> {
        let Some(channel) = msg.param(0) else {
            return Vec::new();
        };
        let userhost = msg.prefix.as_ref().and_then(|p| p.userhost());
        if self.is_me(nick) {
            let session = self.session_or_create(channel, SessionKind::Channel);
            session.clear_users();
            session.mode_list.clear();
            session.joined = true;
            let name = session.name.clone();
            self.send(format!("MODE {}", name));
            info!(server = %self.host, channel = %name, "joined");
            return vec![self.print_in(&name, TextEvent::YouJoin { channel: name.clone() })];
        }

        let extended = self.caps.has("extended-join");
        let Some(session) = self.session_mut(channel) else {
            return Vec::new();
        };
        session.add_user(nick, userhost.as_deref(), "");
        if extended {
            if let Some(user) = session.user_mut(nick) {
                user.account = msg.param(1).filter(|a| *a != "*").map(str::to_owned);
                user.realname = msg.param(2).map(str::to_owned);
            }
        }
        vec![self.print_in(
            channel,
            TextEvent::Join {
                nick: nick.to_owned(),
                channel: channel.to_owned(),
                host: userhost.unwrap_or_default(),
            },
        )]
    }

    fn handle_part(&mut self, msg: &Message, nick: &str) -> Vec<Output> {
        let Some(channel) = msg.param(0) else {
            return Vec::new();
        };
        let reason = msg.param(1).unwrap_or_default().to_owned();
        let me = self.is_me(nick);
        let Some(session) = self.session_mut(channel) else {
            return Vec::new();
        };
        if me {
            session.disconnect();
        } else {
            session.remove_user(nick);
        }
        vec![self.print_in(
            channel,
            TextEvent::Part {
                nick: nick.to_owned(),
                channel: channel.to_owned(),
                reason,
            },
        )]
    }

    fn handle_kick(&mut self, msg: &Message, kicker: &str, prefs: &Prefs) -> Vec<Output> {
        let (Some(channel), Some(victim)) = (msg.param(0), msg.param(1)) else {
            return Vec::new();
        };
        let reason = msg.param(2).unwrap_or_default().to_owned();
        let me = self.is_me(victim);
        let mut rejoin = None;
        if let Some(session) = self.session_mut(channel) {
            if me {
                rejoin = Some(session.key.clone());
                session.disconnect();
            } else {
                session.remove_user(victim);
            }
        }
        if let Some(key) = rejoin.filter(|_| prefs.get_bool("irc_auto_rejoin")) {
            match key {
                Some(key) => self.send(format!("JOIN {} {}", channel, key)),
                None => self.send(format!("JOIN {}", channel)),
            }
        }
        vec![self.print_in(
            channel,
            TextEvent::Kick {
                kicker: kicker.to_owned(),
                nick: victim.to_owned(),
                channel: channel.to_owned(),
                reason,
            },
        )]
    }

    fn handle_quit(&mut self, msg: &Message, nick: &str) -> Vec<Output> {
        let reason = msg.param(0).unwrap_or_default().to_owned();
        let id = self.id;
        let mut out: Vec<Output> = self
            .sessions
            .iter_mut()
            .filter_map(|s| {
                s.remove_user(nick)?;
                Some(Output::Print(
                    Target::Session(id, s.name.clone()),
                    TextEvent::Quit {
                        nick: nick.to_owned(),
                        reason: reason.clone(),
                    },
                ))
            })
            .collect();
        out.push(Output::Presence(PresenceUpdate::Quit(nick.to_owned())));
        out
    }

    fn handle_nick(&mut self, msg: &Message, old: &str) -> Vec<Output> {
        let Some(new) = msg.param(0) else {
            return Vec::new();
        };
        let me = self.is_me(old);
        if me {
            self.nick = new.to_owned();
        }
        let (id, casemap) = (self.id, self.casemap);
        let mut out = Vec::new();
        for session in &mut self.sessions {
            let renamed = session.rename_user(old, new);
            if session.kind == SessionKind::Dialog && casemap.equals(&session.name, old) {
                session.name = new.to_owned();
            } else if !renamed {
                continue;
            }
            out.push(Output::Print(
                Target::Session(id, session.name.clone()),
                TextEvent::NickChange {
                    old: old.to_owned(),
                    new: new.to_owned(),
                },
            ));
        }
        if me && out.is_empty() {
            out.push(self.print_server(TextEvent::NickChange {
                old: old.to_owned(),
                new: new.to_owned(),
            }));
        }
        if !me {
            out.push(Output::NickChange {
                old: old.to_owned(),
                new: new.to_owned(),
            });
        }
        out
    }

    fn handle_mode_line(&mut self, msg: &Message, setter: &str) -> Vec<Output> {
        let (Some(target), Some(modes)) = (msg.param(0), msg.param(1)) else {
            return Vec::new();
        };
        let args = &msg.params[2..];
        let setter = if setter.is_empty() {
            msg.prefix.as_ref().map(|p| p.name()).unwrap_or_default()
        } else {
            setter
        };

        if !self.is_channel(target) {
            let event = mode::user_mode_event(setter, target, modes, args);
            return vec![self.print_server(TextEvent::Mode(event))];
        }

        let tables = ModeTables {
            chanmodes: &self.chanmodes,
            prefix: &self.prefix,
            casemap: self.casemap,
        };
        let casemap = self.casemap;
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.kind == SessionKind::Channel && casemap.equals(&s.name, target));
        let events = mode::handle_mode(&tables, session, setter, target, modes, args);
        let to = self.target_for(target);
        events
            .into_iter()
            .map(|e| Output::Print(to.clone(), TextEvent::Mode(e)))
            .collect()
    }

    fn handle_privmsg(&mut self, msg: &Message, nick: &str) -> Vec<Output> {
        let (Some(target), Some(text)) = (msg.param(0), msg.param(1)) else {
            return Vec::new();
        };
        let notice = msg.command == "NOTICE";

        if Ctcp::is_ctcp(text) {
            if let Some(ctcp) = Ctcp::parse(text) {
                return self.handle_ctcp(msg, nick, target, &ctcp, notice);
            }
        }

        let to_channel = self.is_channel(target);
        let where_ = if to_channel {
            self.target_for(target)
        } else if nick.is_empty() {
            Target::Server(self.id)
        } else if notice {
            match self.session(nick) {
                Some(s) => Target::Session(self.id, s.name.clone()),
                None => Target::Front,
            }
        } else {
            let name = self.session_or_create(nick, SessionKind::Dialog).name.clone();
            Target::Session(self.id, name)
        };
        let sender = msg.prefix.as_ref().map(|p| p.name().to_owned()).unwrap_or_default();
        let event = if notice {
            TextEvent::Notice {
                nick: sender,
                text: text.to_owned(),
            }
        } else {
            TextEvent::Message {
                nick: sender,
                text: text.to_owned(),
            }
        };
        vec![Output::Print(where_, event)]
    }

    fn handle_ctcp(
        &mut self,
        msg: &Message,
        nick: &str,
        target: &str,
        ctcp: &Ctcp<'_>,
        notice: bool,
    ) -> Vec<Output> {
        let params = ctcp.params.unwrap_or_default();
        if notice {
            return vec![Output::Print(
                Target::Front,
                TextEvent::CtcpReply {
                    nick: nick.to_owned(),
                    what: ctcp.kind.to_string(),
                    text: params.to_owned(),
                },
            )];
        }

        let reply = |kind: &str, body: &str| format!("NOTICE {} :\x01{} {}\x01", nick, kind, body);
        match &ctcp.kind {
            CtcpKind::Action => {
                let where_ = if self.is_channel(target) {
                    self.target_for(target)
                } else {
                    let name = self.session_or_create(nick, SessionKind::Dialog).name.clone();
                    Target::Session(self.id, name)
                };
                return vec![Output::Print(
                    where_,
                    TextEvent::Action {
                        nick: nick.to_owned(),
                        text: params.to_owned(),
                    },
                )];
            }
            CtcpKind::Dcc => {
                let userhost = msg.prefix.as_ref().and_then(|p| p.userhost());
                return match params.parse::<DccRequest>() {
                    Ok(request) => vec![Output::Dcc {
                        nick: nick.to_owned(),
                        userhost,
                        request,
                    }],
                    Err(e) => {
                        warn!(server = %self.host, nick, error = %e, "malformed DCC request");
                        vec![Output::Print(
                            Target::Front,
                            TextEvent::DccMalformed {
                                nick: nick.to_owned(),
                                reason: e.to_string(),
                            },
                        )]
                    }
                };
            }
            CtcpKind::Version => {
                let line = reply("VERSION", &format!("slirc {}", crate::VERSION));
                self.send(line);
            }
            CtcpKind::Ping => {
                let line = reply("PING", params);
                self.send(line);
            }
            CtcpKind::Time => {
                let now = Local::now().format("%a %b %d %H:%M:%S %Y").to_string();
                let line = reply("TIME", &now);
                self.send(line);
            }
            CtcpKind::Clientinfo => {
                let line = reply("CLIENTINFO", SUPPORTED);
                self.send(line);
            }
            CtcpKind::Unknown(_) => {}
            _ => {}
        }
        vec![Output::Print(
            Target::Front,
            TextEvent::CtcpRequest {
                nick: nick.to_owned(),
                what: ctcp.kind.to_string(),
            },
        )]
    }

    fn handle_numeric(&mut self, code: u16, msg: &Message, prefs: &Prefs) -> Vec<Output> {
        let text = msg.trailing().unwrap_or_default().to_owned();
        match code {
            1 => {
                self.link = LinkState::Registered;
                if let Some(me) = msg.param(0) {
                    self.nick = me.to_owned();
                }
                info!(server = %self.host, nick = %self.nick, "registered");
                if prefs.get_bool("dcc_ip_from_server") {
                    self.send(format!("USERHOST {}", self.nick));
                }
                vec![self.print_server(TextEvent::ServerText(text))]
            }
            5 => {
                self.apply_isupport(msg);
                Vec::new()
            }
            2..=4 | 250..=266 => vec![self.print_server(TextEvent::ServerText(
                msg.params.get(1..).unwrap_or_default().join(" "),
            ))],
            301 => {
                let who = msg.param(1).unwrap_or_default().to_owned();
                for session in &mut self.sessions {
                    if let Some(user) = session.user_mut(&who) {
                        user.away = true;
                    }
                }
                vec![Output::Print(
                    Target::Front,
                    TextEvent::Away {
                        nick: who,
                        message: text,
                    },
                )]
            }
            302 => {
                // nick[*]=[+-]user@host
                let ip = text
                    .split_whitespace()
                    .filter_map(|reply| reply.split_once('@'))
                    .find_map(|(_, host)| host.parse::<IpAddr>().ok());
                match ip {
                    Some(ip) => {
                        self.dcc_ip = Some(ip);
                        vec![Output::DccIp(ip)]
                    }
                    None => Vec::new(),
                }
            }
            303 => {
                let online = text.split_whitespace().map(str::to_owned).collect();
                vec![Output::Presence(PresenceUpdate::Ison(online))]
            }
            324 => {
                let (Some(channel), Some(modes)) = (msg.param(1), msg.param(2)) else {
                    return Vec::new();
                };
                let args = &msg.params[3..];
                let tables = ModeTables {
                    chanmodes: &self.chanmodes,
                    prefix: &self.prefix,
                    casemap: self.casemap,
                };
                let casemap = self.casemap;
                let Some(session) = self
                    .sessions
                    .iter_mut()
                    .find(|s| s.kind == SessionKind::Channel && casemap.equals(&s.name, channel))
                else {
                    return Vec::new();
                };
                mode::handle_324(&tables, session, modes, args);
                let rendered = session.modes();
                vec![self.print_in(
                    channel,
                    TextEvent::ChannelModes {
                        channel: channel.to_owned(),
                        modes: rendered,
                    },
                )]
            }
            329 | 333 | 366 | 315 => Vec::new(),
            332 => {
                let Some(channel) = msg.param(1) else {
                    return Vec::new();
                };
                if let Some(session) = self.session_mut(channel) {
                    session.topic = Some(text.clone());
                }
                vec![self.print_in(
                    channel,
                    TextEvent::Topic {
                        channel: channel.to_owned(),
                        topic: text,
                    },
                )]
            }
            352 => {
                // me chan user host server nick flags :hops realname
                if let (Some(user), Some(host), Some(who), Some(flags)) =
                    (msg.param(2), msg.param(3), msg.param(5), msg.param(6))
                {
                    let realname = text.split_once(' ').map(|(_, r)| r.to_owned());
                    let userhost = format!("{}@{}", user, host);
                    for session in &mut self.sessions {
                        if let Some(u) = session.user_mut(who) {
                            u.host = Some(userhost.clone());
                            u.away = flags.starts_with('G');
                            if realname.is_some() {
                                u.realname = realname.clone();
                            }
                        }
                    }
                }
                Vec::new()
            }
            353 => self.handle_names(msg),
            372 | 375 => vec![self.print_server(TextEvent::Motd(text))],
            376 | 422 => {
                if self.end_of_motd {
                    return Vec::new();
                }
                self.end_of_motd = true;
                let mut out = Vec::new();
                if code == 422 {
                    out.push(self.print_server(TextEvent::ServerText(text)));
                }
                out.push(Output::LoggedIn);
                out
            }
            433 => self.handle_nick_in_use(msg, prefs),
            600 | 604 => match msg.param(1) {
                Some(who) => vec![Output::Presence(PresenceUpdate::Online(who.to_owned()))],
                None => Vec::new(),
            },
            601 | 605 => match msg.param(1) {
                Some(who) => vec![Output::Presence(PresenceUpdate::Offline(who.to_owned()))],
                None => Vec::new(),
            },
            602 | 603 | 606 | 607 | 732 | 733 => Vec::new(),
            730 | 731 => text
                .split(',')
                .filter_map(|target| target.split('!').next())
                .filter(|who| !who.is_empty())
                .map(|who| {
                    Output::Presence(if code == 730 {
                        PresenceUpdate::Online(who.to_owned())
                    } else {
                        PresenceUpdate::Offline(who.to_owned())
                    })
                })
                .collect(),
            734 => vec![Output::Presence(PresenceUpdate::ListFull)],
            900..=908 => self.handle_sasl_numeric(code, msg),
            _ => vec![self.print_server(TextEvent::ServerText(
                msg.params.get(1..).unwrap_or_default().join(" "),
            ))],
        }
    }

    /// 353: `me = #chan :@alice +bob carol`, with every prefix under
    /// multi-prefix and `nick!user@host` under userhost-in-names.
    fn handle_names(&mut self, msg: &Message) -> Vec<Output> {
        let (Some(channel), Some(names)) = (msg.param(2), msg.param(3)) else {
            return Vec::new();
        };
        let prefixes = self.prefix.prefixes.clone();
        if let Some(session) = self.session_mut(channel) {
            for entry in names.split_whitespace() {
                let split = entry
                    .char_indices()
                    .find(|(_, c)| !prefixes.contains(*c))
                    .map(|(i, _)| i)
                    .unwrap_or(entry.len());
                let (marks, rest) = entry.split_at(split);
                let (nick, host) = match rest.split_once('!') {
                    Some((nick, host)) => (nick, Some(host)),
                    None => (rest, None),
                };
                if !nick.is_empty() {
                    session.add_user(nick, host, marks);
                }
            }
        }
        vec![self.print_in(
            channel,
            TextEvent::Names {
                channel: channel.to_owned(),
                names: names.to_owned(),
            },
        )]
    }
}
