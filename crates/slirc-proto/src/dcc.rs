//! DCC negotiation carried inside CTCP.
//!
//! Argument shapes:
//!
//! ```text
//! SEND   <file> <addr> <port> <size> [<pasvid>]
//! CHAT   chat <addr> <port> [<pasvid>]
//! RESUME <file> <port> <pos> [<pasvid>]
//! ACCEPT <file> <port> <pos> [<pasvid>]
//! ```
//!
//! IPv4 addresses travel as a decimal `u32`, IPv6 as text. A passive offer
//! carries address `0`, port `0` and a passive id; the peer answers with the
//! same id and a real address and port.
//!
//! ```
//! use slirc_proto::dcc::{DccAddr, DccRequest};
//!
//! let req: DccRequest = "SEND \"my file.txt\" 3232235777 5000 1024".parse().unwrap();
//! match &req {
//!     DccRequest::Send { file, addr, port, size, pasvid } => {
//!         assert_eq!(file, "my file.txt");
//!         assert_eq!(addr.to_string(), "3232235777");
//!         assert_eq!((*port, *size, *pasvid), (5000, 1024, None));
//!     }
//!     _ => unreachable!(),
//! }
//! assert_eq!(req.to_string(), "SEND \"my file.txt\" 3232235777 5000 1024");
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::DccParseError;

/// Peer address as written on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DccAddr(pub IpAddr);

impl DccAddr {
    /// The `0` address used by passive offers.
    pub const UNSPECIFIED: DccAddr = DccAddr(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    /// Whether this is `0` / `::`.
    pub fn is_unspecified(&self) -> bool {
        self.0.is_unspecified()
    }

    /// Parse the wire form: a decimal `u32`, textual IPv6, or (leniently) a
    /// dotted quad.
    pub fn parse(s: &str) -> Result<Self, DccParseError> {
        if let Ok(n) = s.parse::<u32>() {
            return Ok(DccAddr(IpAddr::V4(Ipv4Addr::from(n))));
        }
        if s.contains(':') {
            return s
                .parse::<Ipv6Addr>()
                .map(|a| DccAddr(IpAddr::V6(a)))
                .map_err(|_| DccParseError::BadAddress(s.to_owned()));
        }
        s.parse::<Ipv4Addr>()
            .map(|a| DccAddr(IpAddr::V4(a)))
            .map_err(|_| DccParseError::BadAddress(s.to_owned()))
    }
}

impl From<IpAddr> for DccAddr {
    fn from(ip: IpAddr) -> Self {
        DccAddr(ip)
    }
}

impl fmt::Display for DccAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            IpAddr::V4(v4) => write!(f, "{}", u32::from(v4)),
            IpAddr::V6(v6) => write!(f, "{}", v6),
        }
    }
}

/// One DCC request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DccRequest {
    /// File offer, or a passive reply carrying the real address.
    Send {
        /// Offered name.
        file: String,
        /// Sender address (`0` when passive).
        addr: DccAddr,
        /// Sender port (`0` when passive).
        port: u16,
        /// File size in bytes.
        size: u64,
        /// Passive id.
        pasvid: Option<u32>,
    },
    /// Chat offer.
    Chat {
        /// Offerer address.
        addr: DccAddr,
        /// Offerer port.
        port: u16,
        /// Passive id.
        pasvid: Option<u32>,
    },
    /// Receiver asks to continue at `pos`.
    Resume {
        /// Name from the original offer.
        file: String,
        /// Port of the offer (`0` when passive).
        port: u16,
        /// Requested offset.
        pos: u64,
        /// Passive id.
        pasvid: Option<u32>,
    },
    /// Sender agrees to continue at `pos`.
    Accept {
        /// Name from the original offer.
        file: String,
        /// Port of the offer (`0` when passive).
        port: u16,
        /// Agreed offset.
        pos: u64,
        /// Passive id.
        pasvid: Option<u32>,
    },
}

impl DccRequest {
    /// The whole CTCP body, `\x01DCC ...\x01`.
    pub fn to_ctcp(&self) -> String {
        format!("\x01DCC {}\x01", self)
    }

    /// Passive id, if any.
    pub fn pasvid(&self) -> Option<u32> {
        match self {
            DccRequest::Send { pasvid, .. }
            | DccRequest::Chat { pasvid, .. }
            | DccRequest::Resume { pasvid, .. }
            | DccRequest::Accept { pasvid, .. } => *pasvid,
        }
    }
}

/// Quote a filename if it contains spaces.
pub fn quote_filename(name: &str) -> String {
    if name.contains(' ') {
        format!("\"{}\"", name)
    } else {
        name.to_owned()
    }
}

/// Split off the filename: a quoted run or the first word.
fn take_filename(s: &str) -> Result<(String, &str), DccParseError> {
    let s = s.trim_start();
    if let Some(quoted) = s.strip_prefix('"') {
        let end = quoted.find('"').ok_or(DccParseError::UnterminatedName)?;
        return Ok((quoted[..end].to_owned(), &quoted[end + 1..]));
    }
    match s.split_once(' ') {
        Some((name, rest)) if !name.is_empty() => Ok((name.to_owned(), rest)),
        None if !s.is_empty() => Ok((s.to_owned(), "")),
        _ => Err(DccParseError::Missing("filename")),
    }
}

fn number<T: FromStr>(field: &'static str, value: Option<&str>) -> Result<T, DccParseError> {
    let value = value.ok_or(DccParseError::Missing(field))?;
    value.parse().map_err(|_| DccParseError::BadNumber {
        field,
        value: value.to_owned(),
    })
}

fn optional_pasvid(value: Option<&str>) -> Result<Option<u32>, DccParseError> {
    value.map(|v| number("passive id", Some(v))).transpose()
}

impl FromStr for DccRequest {
    type Err = DccParseError;

    /// Parse the text after `DCC `. A leading `DCC ` is also accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("DCC ")
            .or_else(|| s.strip_prefix("dcc "))
            .unwrap_or(s);
        let (kind, rest) = s.split_once(' ').unwrap_or((s, ""));

        match kind.to_ascii_uppercase().as_str() {
            "SEND" => {
                let (file, rest) = take_filename(rest)?;
                let mut args = rest.split_whitespace();
                let addr = DccAddr::parse(args.next().ok_or(DccParseError::Missing("address"))?)?;
                let port = number("port", args.next())?;
                let size = number("size", args.next())?;
                let pasvid = optional_pasvid(args.next())?;
                Ok(DccRequest::Send {
                    file,
                    addr,
                    port,
                    size,
                    pasvid,
                })
            }
            "CHAT" => {
                let mut args = rest.split_whitespace();
                args.next().ok_or(DccParseError::Missing("protocol"))?;
                let addr = DccAddr::parse(args.next().ok_or(DccParseError::Missing("address"))?)?;
                let port = number("port", args.next())?;
                let pasvid = optional_pasvid(args.next())?;
                Ok(DccRequest::Chat { addr, port, pasvid })
            }
            upper @ ("RESUME" | "ACCEPT") => {
                let (file, rest) = take_filename(rest)?;
                let mut args = rest.split_whitespace();
                let port = number("port", args.next())?;
                let pos = number("position", args.next())?;
                let pasvid = optional_pasvid(args.next())?;
                Ok(if upper == "RESUME" {
                    DccRequest::Resume {
                        file,
                        port,
                        pos,
                        pasvid,
                    }
                } else {
                    DccRequest::Accept {
                        file,
                        port,
                        pos,
                        pasvid,
                    }
                })
            }
            "" => Err(DccParseError::Missing("type")),
            _ => Err(DccParseError::UnknownType(kind.to_owned())),
        }
    }
}

impl fmt::Display for DccRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pasvid = self.pasvid();
        match self {
            DccRequest::Send {
                file,
                addr,
                port,
                size,
                ..
            } => write!(f, "SEND {} {} {} {}", quote_filename(file), addr, port, size)?,
            DccRequest::Chat { addr, port, .. } => write!(f, "CHAT chat {} {}", addr, port)?,
            DccRequest::Resume { file, port, pos, .. } => {
                write!(f, "RESUME {} {} {}", quote_filename(file), port, pos)?
            }
            DccRequest::Accept { file, port, pos, .. } => {
                write!(f, "ACCEPT {} {} {}", quote_filename(file), port, pos)?
            }
        }
        if let Some(id) = pasvid {
            write!(f, " {}", id)?;
        }
        Ok(())
    }
}
