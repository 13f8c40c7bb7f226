//! The client event loop.
//!
//! [`Client`] owns every server, the DCC and notify engines, the prefs and
//! the frontend. It runs on a single task: connection tasks, transfer tasks
//! and timers only ever talk to it through channels, and every message they
//! send carries a generation so late ones can be dropped.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::command::HookRegistry;
use crate::dcc::{DccAction, DccEngine, DccEvent};
use crate::error::CommandError;
use crate::events::TextEvent;
use crate::net::{DnsCache, Identd, ProxyConfig, Resolver, TlsOptions};
use crate::notify::{NotifyAction, NotifyEngine, PresenceUpdate};
use crate::prefs::{NetworkConfig, NetworkList, Prefs, expand_home};
use crate::server::{
    CleanupState, ConnEvent, ConnMsg, ConnectParams, LinkState, Output, Server, ServerId,
    connection,
};
use crate::ui::{Frontend, Target};

/// How often queued lines are written out.
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Shortest reconnect delay.
const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// How long `/quit` waits for servers to close the connection.
const QUIT_GRACE: Duration = Duration::from_millis(500);

/// Notify entries for dead servers are dropped this often (in ticks).
const NOTIFY_CLEANUP_TICKS: u64 = 60;

/// Timer expiries delivered to the loop.
#[derive(Debug)]
pub enum ClientEvent {
    Reconnect { server: ServerId, r#gen: u64 },
}

/// The window a command was typed in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Focus {
    pub server: Option<ServerId>,
    /// Channel, query nick, or `=nick` for a DCC chat.
    pub target: Option<String>,
}

impl Focus {
    pub fn server(server: ServerId) -> Self {
        Focus {
            server: Some(server),
            target: None,
        }
    }

    pub fn session(server: ServerId, target: &str) -> Self {
        Focus {
            server: Some(server),
            target: Some(target.to_owned()),
        }
    }
}

pub struct Client {
    pub prefs: Prefs,
    pub networks: NetworkList,
    pub servers: Vec<Server>,
    pub dcc: DccEngine,
    pub notify: NotifyEngine,
    pub hooks: HookRegistry,
    /// Where `slirc.conf` and `notify.conf` are saved; `None` keeps
    /// everything in memory.
    pub config_dir: Option<PathBuf>,
    pub(crate) frontend: Box<dyn Frontend>,
    pub(crate) quitting: bool,
    next_server: u32,
    ticks: u64,
    identd: Identd,
    resolver: Arc<Resolver>,
    dns_cache: Arc<DnsCache>,
    conn_tx: mpsc::UnboundedSender<ConnMsg>,
    conn_rx: mpsc::UnboundedReceiver<ConnMsg>,
    dcc_rx: mpsc::UnboundedReceiver<DccEvent>,
    timer_tx: mpsc::UnboundedSender<ClientEvent>,
    timer_rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Client {
    pub fn new(
        prefs: Prefs,
        networks: NetworkList,
        notify: NotifyEngine,
        frontend: Box<dyn Frontend>,
    ) -> Self {
        let resolver = Arc::new(Resolver::new());
        let dns_cache = Arc::new(DnsCache::default());
        let download_dir = frontend.default_download_dir();
        let (dcc, dcc_rx) = DccEngine::new(Arc::clone(&resolver), Arc::clone(&dns_cache), download_dir);
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Client {
            prefs,
            networks,
            servers: Vec::new(),
            dcc,
            notify,
            hooks: HookRegistry::new(),
            config_dir: None,
            frontend,
            quitting: false,
            next_server: 1,
            ticks: 0,
            identd: Identd::new(),
            resolver,
            dns_cache,
            conn_tx,
            conn_rx,
            dcc_rx,
            timer_tx,
            timer_rx,
        }
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting
    }

    /// Start the identd responder if `identd` is set.
    pub async fn start_identd(&mut self) -> std::io::Result<()> {
        if !self.prefs.get_bool("identd") {
            return Ok(());
        }
        let port = u16::try_from(self.prefs.get_int("identd_port")).unwrap_or(113);
        self.identd.start(([0, 0, 0, 0], port).into()).await?;
        Ok(())
    }

    /// Run until `/quit` or until `input` closes.
    pub async fn run(&mut self, mut input: mpsc::UnboundedReceiver<String>) {
        let mut flush = tokio::time::interval(FLUSH_INTERVAL);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !self.quitting {
            tokio::select! {
                line = input.recv() => match line {
                    Some(line) => {
                        let focus = self.default_focus();
                        self.input(&focus, &line);
                    }
                    None => break,
                },
                _ = flush.tick() => self.flush_all(),
                _ = tick.tick() => self.on_tick(Instant::now()),
                () = self.process_next() => {}
            }
        }

        if self.quitting {
            self.flush_all();
            tokio::time::sleep(QUIT_GRACE).await;
        }
        self.identd.stop();
        info!("client loop finished");
    }

    /// Wait for one connection, transfer or timer event and apply it.
    pub async fn process_next(&mut self) {
        tokio::select! {
            Some(msg) = self.conn_rx.recv() => self.handle_conn(msg),
            Some(event) = self.dcc_rx.recv() => {
                self.dcc.handle_event(&self.prefs, event);
                self.drain_dcc();
            }
            Some(event) = self.timer_rx.recv() => self.handle_timer(event),
            else => {}
        }
    }

    /// Run a line of input, printing any error.
    pub fn input(&mut self, focus: &Focus, line: &str) {
        if let Err(e) = self.handle_command(focus, line) {
            debug!(error = %e, "command failed");
            self.print(Target::Front, TextEvent::Error(e.to_string()));
        }
    }

    /// The last server added, as the window commands from stdin apply to.
    pub fn default_focus(&self) -> Focus {
        Focus {
            server: self.servers.last().map(|s| s.id),
            target: None,
        }
    }

    pub fn print(&mut self, target: Target, event: TextEvent) {
        self.frontend.print_text(&target, &event.to_string(), Local::now());
    }

    pub fn server(&self, id: ServerId) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn server_mut(&mut self, id: ServerId) -> Option<&mut Server> {
        self.servers.iter_mut().find(|s| s.id == id)
    }

    /// Add a server entry without connecting it.
    pub fn add_server(&mut self, host: &str, port: u16, tls: bool, network: Option<NetworkConfig>) -> ServerId {
        let id = ServerId(self.next_server);
        self.next_server += 1;
        self.servers.push(Server::new(id, host, port, tls, network, &self.prefs));
        debug!(server = %host, %id, "server added");
        id
    }

    /// Tear down and drop a server.
    pub fn remove_server(&mut self, id: ServerId) {
        let reason = self.prefs.get_str("irc_quit_reason").to_owned();
        if let Some(server) = self.server_mut(id) {
            server.cleanup(Some(&reason));
        }
        self.servers.retain(|s| s.id != id);
        self.notify.server_disconnected(id);
    }

    /// (Re)connect a server. Any existing connection is dropped first.
    pub fn connect(&mut self, id: ServerId) -> Result<(), CommandError> {
        if self.server(id).is_none() {
            return Err(CommandError::NoSuchServer(id.to_string()));
        }
        self.disconnect(id, None);
        let Some(server) = self.servers.iter_mut().find(|s| s.id == id) else {
            return Err(CommandError::NoSuchServer(id.to_string()));
        };

        let r#gen = server.begin_connect(&self.prefs);
        let tls = server.tls.then(|| TlsOptions {
            accept_invalid: server.network.as_ref().is_some_and(|n| n.accept_invalid_cert),
            client_cert: server
                .network
                .as_ref()
                .and_then(|n| n.client_cert.as_deref())
                .map(expand_home),
        });
        let secs = |name| Duration::from_secs(self.prefs.get_int(name).max(1) as u64);
        let params = ConnectParams {
            host: server.host.clone(),
            port: server.port,
            tls,
            proxy: ProxyConfig::from_prefs(&self.prefs),
            bind: self.prefs.get_str("net_bind_host").parse().ok(),
            connect_timeout: secs("net_connect_timeout"),
            ssl_timeout: secs("net_ssl_timeout"),
            encoding: server.encoding,
        };
        info!(server = %server.host, port = server.port, tls = server.tls, "gen" = r#gen, "connecting");
        server.conn = Some(connection::spawn(
            id,
            r#gen,
            params,
            Arc::clone(&self.resolver),
            Arc::clone(&self.dns_cache),
            self.conn_tx.clone(),
        ));

        let event = TextEvent::Connecting {
            host: server.host.clone(),
            port: server.port,
        };
        self.print(Target::Server(id), event);
        Ok(())
    }

    /// Drop the connection, optionally sending QUIT first.
    pub fn disconnect(&mut self, id: ServerId, quit: Option<&str>) -> CleanupState {
        let Some(server) = self.servers.iter_mut().find(|s| s.id == id) else {
            return CleanupState::NotConnected;
        };
        if let Some(local) = server.local_addr.take() {
            self.identd.unregister(local.port());
        }
        let state = server.cleanup(quit);
        self.notify.server_disconnected(id);
        state
    }

    /// An event from a connection task.
    pub fn handle_conn(&mut self, msg: ConnMsg) {
        let Some(server) = self.server(msg.server) else {
            debug!(server = %msg.server, "event for removed server");
            return;
        };
        if server.r#gen != msg.r#gen {
            debug!(server = %server.host, "gen" = msg.r#gen, current = server.r#gen, "stale connection event");
            return;
        }
        let id = msg.server;

        match msg.event {
            ConnEvent::Connected { local, peer } => {
                let user = self.ident_user(id);
                let Some(server) = self.servers.iter_mut().find(|s| s.id == id) else {
                    return;
                };
                info!(server = %server.host, %peer, "connected");
                server.on_connected(local, &self.prefs);
                let host = server.host.clone();
                if self.identd.is_running() {
                    self.identd.register(local.port(), &user);
                }
                self.print(Target::Server(id), TextEvent::Connected { host });
            }
            ConnEvent::Failed(e) => {
                let host = server.host.clone();
                warn!(server = %host, error = %e, "connection failed");
                self.disconnect(id, None);
                if let Some(server) = self.server_mut(id) {
                    server.link = LinkState::Failed;
                }
                let event = TextEvent::ConnectFailed {
                    host,
                    reason: e.to_string(),
                };
                self.print(Target::Server(id), event);
                if self.prefs.get_bool("net_auto_reconnect_on_fail") && e.is_transient() {
                    self.schedule_reconnect(id);
                }
            }
            ConnEvent::Line(line) => {
                let Some(server) = self.servers.iter_mut().find(|s| s.id == id) else {
                    return;
                };
                let outputs = server.handle_line(&line, &self.prefs);
                self.apply_outputs(id, outputs);
            }
            ConnEvent::Closed(reason) => self.on_closed(id, reason),
        }
    }

    /// The connection went away. `None` is a clean EOF.
    fn on_closed(&mut self, id: ServerId, reason: Option<String>) {
        let Some(server) = self.server(id) else {
            return;
        };
        let logged_in = server.end_of_motd;
        info!(server = %server.host, reason = ?reason, logged_in, "disconnected");
        self.disconnect(id, None);

        // A clean close after the MOTD is the server saying goodbye.
        let reconnect = self.prefs.get_bool("net_auto_reconnect") && (reason.is_some() || !logged_in);
        let event = TextEvent::Disconnected {
            reason: reason.unwrap_or_else(|| String::from("Remote host closed socket")),
        };
        self.print(Target::Server(id), event);
        if reconnect {
            self.schedule_reconnect(id);
        }
    }

    fn schedule_reconnect(&mut self, id: ServerId) {
        let delay = Duration::from_secs(self.prefs.get_int("net_reconnect_delay").max(0) as u64)
            .max(MIN_RECONNECT_DELAY);
        let tx = self.timer_tx.clone();
        let Some(server) = self.server_mut(id) else {
            return;
        };
        let r#gen = server.r#gen;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ClientEvent::Reconnect { server: id, r#gen });
        });
        if let Some(old) = server.reconnect.replace(timer.abort_handle()) {
            old.abort();
        }
        debug!(server = %server.host, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.print(
            Target::Server(id),
            TextEvent::Reconnecting {
                seconds: delay.as_secs_f64(),
            },
        );
    }

    fn handle_timer(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Reconnect { server, r#gen } => {
                let Some(s) = self.server_mut(server) else {
                    return;
                };
                if s.r#gen != r#gen || !matches!(s.link, LinkState::Disconnected | LinkState::Failed) {
                    debug!(server = %s.host, "stale reconnect timer");
                    return;
                }
                s.reconnect = None;
                if let Err(e) = self.connect(server) {
                    self.print(Target::Server(server), TextEvent::Error(e.to_string()));
                }
            }
        }
    }

    /// User name identd answers with for connections to `id`.
    fn ident_user(&self, id: ServerId) -> String {
        self.server(id)
            .and_then(|s| s.network.as_ref())
            .and_then(|n| n.user_name.clone())
            .unwrap_or_else(|| self.prefs.get_str("irc_user_name").to_owned())
    }

    fn apply_outputs(&mut self, id: ServerId, outputs: Vec<Output>) {
        for output in outputs {
            match output {
                Output::Print(target, event) => self.print(target, event),
                Output::Dcc { nick, request, .. } => {
                    let our_ip = self.dcc_ip_for(id);
                    self.dcc.handle_ctcp(&self.prefs, id, &nick, request, our_ip);
                    self.drain_dcc();
                }
                Output::Presence(update) => self.on_presence(id, update),
                Output::LoggedIn => self.on_logged_in(id),
                Output::DccIp(ip) => debug!(server = %id, %ip, "address for DCC learned"),
                Output::NickChange { old, new } => {
                    self.dcc.rename_nick(id, &old, &new);
                    self.drain_dcc();
                }
            }
        }
    }

    /// End of MOTD: rejoin, autojoin, register the notify list, then run
    /// the network's connect commands.
    fn on_logged_in(&mut self, id: ServerId) {
        let Some(server) = self.servers.iter_mut().find(|s| s.id == id) else {
            return;
        };
        let mut joins: Vec<(String, Option<String>)> = std::mem::take(&mut server.rejoin);
        let mut commands = Vec::new();
        if let Some(network) = &server.network {
            for entry in &network.autojoin {
                let mut parts = entry.split_whitespace();
                let Some(channel) = parts.next() else { continue };
                if joins.iter().any(|(c, _)| server.casemap.equals(c, channel)) {
                    continue;
                }
                joins.push((channel.to_owned(), parts.next().map(str::to_owned)));
            }
            commands = network.connect_commands.clone();
        }
        for (channel, key) in joins {
            match key {
                Some(key) => server.send(format!("JOIN {} {}", channel, key)),
                None => server.send(format!("JOIN {}", channel)),
            }
        }
        for line in self.notify.on_login(server) {
            server.send(line);
        }
        info!(server = %server.host, network = %server.network_label(), "logged in");

        let focus = Focus::server(id);
        for command in commands {
            let line = if command.starts_with('/') {
                command
            } else {
                format!("/{}", command)
            };
            self.input(&focus, &line);
        }
    }

    fn on_presence(&mut self, id: ServerId, update: PresenceUpdate) {
        let actions: Vec<NotifyAction> = match update {
            PresenceUpdate::Ison(online) => self.notify.handle_ison(id, &online),
            PresenceUpdate::Online(nick) => self.notify.handle_online(id, &nick).into_iter().collect(),
            PresenceUpdate::Offline(nick) => self.notify.handle_offline(id, &nick).into_iter().collect(),
            PresenceUpdate::Quit(nick) => self.notify.handle_quit(id, &nick).into_iter().collect(),
            PresenceUpdate::ListFull => {
                warn!(server = %id, "MONITOR list full");
                self.print(
                    Target::Server(id),
                    TextEvent::Info(String::from("The server's notify list is full")),
                );
                Vec::new()
            }
        };
        for action in actions {
            self.notify_action(action);
        }
    }

    fn notify_action(&mut self, action: NotifyAction) {
        let whois = self.prefs.get_bool("notify_whois_online");
        match action {
            NotifyAction::Online { server, nick } => {
                let Some(s) = self.server_mut(server) else {
                    return;
                };
                let network = s.network_label().to_owned();
                if whois {
                    s.send(format!("WHOIS {}", nick));
                }
                self.print(Target::Server(server), TextEvent::NotifyOnline { nick, network });
            }
            NotifyAction::Offline { server, nick } => {
                let Some(s) = self.server(server) else {
                    return;
                };
                let network = s.network_label().to_owned();
                self.print(Target::Server(server), TextEvent::NotifyOffline { nick, network });
            }
        }
    }

    /// Once a second: transfer rates and timeouts, lag checks, ping
    /// timeouts and ISON polls.
    pub fn on_tick(&mut self, now: Instant) {
        self.ticks += 1;
        self.dcc.check_timeouts(&self.prefs, now);
        self.drain_dcc();

        let lag_every = self.prefs.get_int("net_lag_interval").max(0) as u64;
        let ping_timeout = self.prefs.get_int("net_ping_timeout");
        let notify_every = self.prefs.get_int("notify_timeout").max(0) as u64;
        let mut timed_out = Vec::new();

        for server in &mut self.servers {
            if !server.is_connected() {
                continue;
            }
            if ping_timeout > 0
                && now.saturating_duration_since(server.last_recv) > Duration::from_secs(ping_timeout as u64)
            {
                timed_out.push(server.id);
                continue;
            }
            if server.link != LinkState::Registered {
                continue;
            }
            if lag_every > 0 && self.ticks % lag_every == 0 && server.lag_sent.is_none() {
                server.lag_sent = Some(now);
                server.send(format!("PING LAG{}", chrono::Utc::now().timestamp_millis()));
            }
            if notify_every > 0 && self.ticks % notify_every == 0 {
                for line in self.notify.tick(server) {
                    server.send(line);
                }
            }
        }

        for id in timed_out {
            warn!(server = %id, "ping timeout");
            self.on_closed(id, Some(String::from("ping timeout")));
        }

        if self.ticks % NOTIFY_CLEANUP_TICKS == 0 {
            let live: Vec<ServerId> = self.servers.iter().map(|s| s.id).collect();
            self.notify.cleanup(&live);
        }
    }

    /// Write out what each server's send queue allows.
    pub fn flush_all(&mut self) {
        let now = chrono::Utc::now().timestamp();
        for server in &mut self.servers {
            server.flush(now);
        }
    }

    /// The address DCC offers on `server` announce.
    pub fn dcc_ip_for(&self, server: ServerId) -> Option<IpAddr> {
        self.server(server).and_then(|s| s.announce_ip(&self.prefs))
    }

    /// Carry out what the DCC engine queued.
    pub fn drain_dcc(&mut self) {
        loop {
            let actions = self.dcc.take_actions();
            if actions.is_empty() {
                break;
            }
            for action in actions {
                match action {
                    DccAction::Ctcp { server, nick, body } => match self.server_mut(server) {
                        Some(s) => s.send(format!("PRIVMSG {} :\x01{}\x01", nick, body)),
                        None => warn!(server = %server, nick = %nick, "DCC reply for a removed server"),
                    },
                    DccAction::Print { target, event } => self.print(target, event),
                    DccAction::Update(id) => {
                        if let Some(view) = self.dcc.view(id) {
                            self.frontend.update_dcc(&view);
                        }
                    }
                    DccAction::Removed(id) => debug!(dcc_id = id, "transfer removed"),
                    DccAction::AskAccept { id, prompt } => {
                        if !self.frontend.confirm(&prompt) {
                            continue;
                        }
                        let our_ip = self.dcc.get(id).and_then(|t| self.dcc_ip_for(t.server));
                        if let Err(e) = self.dcc.accept(&self.prefs, id, our_ip) {
                            self.print(Target::Front, TextEvent::Error(e.to_string()));
                        }
                    }
                }
            }
        }
    }

    /// Persist prefs and the notify list into `config_dir`.
    pub fn save_prefs(&self) -> Result<(), CommandError> {
        if let Some(dir) = &self.config_dir {
            self.prefs.save(dir.join("slirc.conf"))?;
        }
        Ok(())
    }

    pub(crate) fn save_notify(&mut self) {
        let Some(dir) = &self.config_dir else {
            return;
        };
        if let Err(e) = self.notify.save(dir.join("notify.conf")) {
            warn!(error = %e, "cannot save notify list");
            self.print(Target::Front, TextEvent::Error(format!("cannot save notify list: {}", e)));
        }
    }
}
