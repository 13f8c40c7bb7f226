//! The preference table: every setting the engine reads, with its type
//! and default.

/// Storage type of a setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefType {
    Bool,
    Int,
    Str,
}

/// Compile-time default.
#[derive(Clone, Copy, Debug)]
pub enum PrefDefault {
    Bool(bool),
    Int(i64),
    Str(&'static str),
}

impl PrefDefault {
    pub fn pref_type(&self) -> PrefType {
        match self {
            PrefDefault::Bool(_) => PrefType::Bool,
            PrefDefault::Int(_) => PrefType::Int,
            PrefDefault::Str(_) => PrefType::Str,
        }
    }
}

#[derive(Debug)]
pub struct PrefDef {
    pub name: &'static str,
    pub default: PrefDefault,
}

const fn b(name: &'static str, v: bool) -> PrefDef {
    PrefDef { name, default: PrefDefault::Bool(v) }
}

const fn i(name: &'static str, v: i64) -> PrefDef {
    PrefDef { name, default: PrefDefault::Int(v) }
}

const fn s(name: &'static str, v: &'static str) -> PrefDef {
    PrefDef { name, default: PrefDefault::Str(v) }
}

/// Grouped by prefix; `/set` lists them in this order.
pub static PREFS: &[PrefDef] = &[
    s("dcc_completed_dir", ""),
    s("dcc_dir", ""),
    b("dcc_auto_resume", true),
    i("dcc_auto_chat", 0),
    i("dcc_auto_recv", 0),
    i("dcc_blocksize", 1024),
    b("dcc_fast_send", true),
    i("dcc_global_max_get_cps", 0),
    i("dcc_global_max_send_cps", 0),
    s("dcc_ip", ""),
    b("dcc_ip_from_server", false),
    i("dcc_max_get_cps", 0),
    i("dcc_max_send_cps", 0),
    i("dcc_port_first", 0),
    i("dcc_port_last", 0),
    b("dcc_remove", false),
    b("dcc_save_nick", false),
    b("dcc_send_fillspaces", true),
    i("dcc_stall_timeout", 60),
    i("dcc_timeout", 180),
    b("identd", false),
    i("identd_port", 113),
    b("irc_auto_rejoin", true),
    s("irc_nick1", "slirc"),
    s("irc_nick2", "slirc_"),
    s("irc_nick3", "slirc__"),
    s("irc_part_reason", "Leaving"),
    s("irc_quit_reason", "Leaving"),
    s("irc_real_name", "slirc user"),
    s("irc_user_name", "slirc"),
    s("input_command_char", "/"),
    b("net_auto_reconnect", true),
    b("net_auto_reconnect_on_fail", false),
    s("net_bind_host", ""),
    i("net_connect_timeout", 30),
    i("net_lag_interval", 30),
    i("net_ping_timeout", 120),
    b("net_proxy_auth", false),
    s("net_proxy_host", ""),
    s("net_proxy_pass", ""),
    i("net_proxy_port", 0),
    i("net_proxy_type", 0),
    i("net_proxy_use", 0),
    s("net_proxy_user", ""),
    i("net_reconnect_delay", 10),
    i("net_ssl_timeout", 90),
    b("net_throttle", true),
    b("notify_whois_online", false),
    i("notify_timeout", 15),
];

/// Index of a setting by name.
pub fn find(name: &str) -> Option<usize> {
    PREFS.iter().position(|p| p.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_unique() {
        for (idx, pref) in PREFS.iter().enumerate() {
            assert_eq!(find(pref.name), Some(idx), "duplicate {}", pref.name);
        }
    }
}
