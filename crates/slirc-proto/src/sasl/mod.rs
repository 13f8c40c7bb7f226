//! SASL payloads for `AUTHENTICATE`.
//!
//! # Reference
//! - IRCv3 SASL: <https://ircv3.net/specs/extensions/sasl-3.2>
//! - RFC 4616 (PLAIN): <https://tools.ietf.org/html/rfc4616>
//!
//! ```
//! use slirc_proto::sasl::{chunk_response, encode_plain, SaslMechanism};
//!
//! let encoded = encode_plain("myuser", "mypassword");
//! assert_eq!(chunk_response(&encoded), vec![encoded.clone()]);
//! assert_eq!(SaslMechanism::parse("plain"), SaslMechanism::Plain);
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Maximum length of one `AUTHENTICATE` argument.
pub const SASL_CHUNK_SIZE: usize = 400;

/// Mechanisms this client can drive.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SaslMechanism {
    /// Username and password.
    Plain,
    /// TLS client certificate.
    External,
    /// Anything else the server lists.
    Unknown(String),
}

impl SaslMechanism {
    /// Parse a mechanism name.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "PLAIN" => Self::Plain,
            "EXTERNAL" => Self::External,
            _ => Self::Unknown(name.to_owned()),
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain => "PLAIN",
            Self::External => "EXTERNAL",
            Self::Unknown(s) => s,
        }
    }

    /// Whether the mechanism is listed in a `sasl=` capability value.
    /// An absent value (CAP 301 servers) means any mechanism may work.
    pub fn offered_by(&self, cap_value: Option<&str>) -> bool {
        match cap_value {
            None => true,
            Some(list) => list
                .split(',')
                .any(|m| m.eq_ignore_ascii_case(self.as_str())),
        }
    }
}

/// `\0user\0password`, base64.
pub fn encode_plain(username: &str, password: &str) -> String {
    let payload = format!("\0{}\0{}", username, password);
    BASE64.encode(payload.as_bytes())
}

/// EXTERNAL response: `+`, or the base64 authzid.
pub fn encode_external(authzid: Option<&str>) -> String {
    match authzid {
        Some(id) if !id.is_empty() => BASE64.encode(id.as_bytes()),
        _ => "+".to_owned(),
    }
}

/// Split an encoded response into `AUTHENTICATE` arguments. A response
/// whose length is a multiple of the chunk size ends with a lone `+`.
pub fn chunk_response(encoded: &str) -> Vec<String> {
    if encoded == "+" {
        return vec!["+".to_owned()];
    }
    let mut chunks: Vec<String> = encoded
        .as_bytes()
        .chunks(SASL_CHUNK_SIZE)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();
    if encoded.len() % SASL_CHUNK_SIZE == 0 {
        chunks.push("+".to_owned());
    }
    chunks
}
