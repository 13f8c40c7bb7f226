//! Message source prefixes (`nick!user@host` or a server name).

use std::fmt;

/// Source of an IRC message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Prefix {
    /// A server name (contains a `.` and no `!`/`@`).
    ServerName(String),
    /// A user: nick, user, host (user/host may be empty).
    Nickname(String, String, String),
}

impl Prefix {
    /// Parse a prefix string (without the leading `:`).
    pub fn parse(s: &str) -> Self {
        let (nick_part, host) = match s.split_once('@') {
            Some((n, h)) => (n, h),
            None => (s, ""),
        };
        let (nick, user) = match nick_part.split_once('!') {
            Some((n, u)) => (n, u),
            None => (nick_part, ""),
        };

        if user.is_empty() && host.is_empty() && nick.contains('.') {
            Prefix::ServerName(s.to_owned())
        } else {
            Prefix::Nickname(nick.to_owned(), user.to_owned(), host.to_owned())
        }
    }

    /// The nickname, or the server name.
    pub fn name(&self) -> &str {
        match self {
            Prefix::ServerName(name) => name,
            Prefix::Nickname(nick, _, _) => nick,
        }
    }

    /// The nickname for user prefixes.
    pub fn nick(&self) -> Option<&str> {
        match self {
            Prefix::Nickname(nick, _, _) => Some(nick),
            Prefix::ServerName(_) => None,
        }
    }

    /// `user@host` when both are known.
    pub fn userhost(&self) -> Option<String> {
        match self {
            Prefix::Nickname(_, user, host) if !host.is_empty() => {
                Some(format!("{}@{}", user, host))
            }
            _ => None,
        }
    }

    /// Host part of a user prefix.
    pub fn host(&self) -> Option<&str> {
        match self {
            Prefix::Nickname(_, _, host) if !host.is_empty() => Some(host),
            _ => None,
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::ServerName(name) => f.write_str(name),
            Prefix::Nickname(nick, user, host) => {
                f.write_str(nick)?;
                if !user.is_empty() {
                    write!(f, "!{}", user)?;
                }
                if !host.is_empty() {
                    write!(f, "@{}", host)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_user() {
        let p = Prefix::parse("nick!user@example.com");
        assert_eq!(
            p,
            Prefix::Nickname("nick".into(), "user".into(), "example.com".into())
        );
        assert_eq!(p.userhost().as_deref(), Some("user@example.com"));
        assert_eq!(p.to_string(), "nick!user@example.com");
    }

    #[test]
    fn test_parse_server() {
        let p = Prefix::parse("irc.example.net");
        assert_eq!(p, Prefix::ServerName("irc.example.net".into()));
        assert_eq!(p.nick(), None);
    }

    #[test]
    fn test_bare_nick() {
        let p = Prefix::parse("alice");
        assert_eq!(p.nick(), Some("alice"));
        assert_eq!(p.userhost(), None);
    }
}
