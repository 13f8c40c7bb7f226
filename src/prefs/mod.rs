//! Preferences.
//!
//! Two files live in the config directory:
//! - `slirc.conf`: flat `key = value` settings read through [`Prefs`]
//! - `networks.toml`: the network list, see [`NetworkList`]

mod network;
mod table;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, warn};

pub use network::{
    ConfigError, NetworkConfig, NetworkList, SecureString, ServerEntry, UserCommandConfig,
};
pub use table::{PrefDef, PrefDefault, PrefType, PREFS};

/// Preference errors.
#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("failed to access preferences file: {0}")]
    Io(#[from] io::Error),
    #[error("unknown setting {0}")]
    Unknown(String),
    #[error("{name} expects {expected:?}, got {value:?}")]
    Type {
        name: &'static str,
        expected: PrefType,
        value: String,
    },
}

/// A typed setting value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrefValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<&PrefDefault> for PrefValue {
    fn from(d: &PrefDefault) -> Self {
        match *d {
            PrefDefault::Bool(v) => PrefValue::Bool(v),
            PrefDefault::Int(v) => PrefValue::Int(v),
            PrefDefault::Str(v) => PrefValue::Str(v.to_owned()),
        }
    }
}

impl fmt::Display for PrefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefValue::Bool(v) => f.write_str(if *v { "1" } else { "0" }),
            PrefValue::Int(v) => write!(f, "{}", v),
            PrefValue::Str(v) => f.write_str(v),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(path[1..].trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

/// Default config directory, `$XDG_CONFIG_HOME/slirc` or `~/.config/slirc`.
pub fn config_dir() -> PathBuf {
    match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("slirc"),
        _ => expand_home("~/.config/slirc"),
    }
}

/// The settings table, one value per entry of [`PREFS`].
#[derive(Clone, Debug)]
pub struct Prefs {
    values: Vec<PrefValue>,
}

impl Default for Prefs {
    fn default() -> Self {
        Prefs {
            values: PREFS.iter().map(|p| PrefValue::from(&p.default)).collect(),
        }
    }
}

impl Prefs {
    /// Load from a file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PrefsError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.as_ref().display(), "no preferences file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Linear scan of `key = value` lines. Unknown keys and bad values are
    /// logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut prefs = Self::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = lineno + 1, "preference line without '='");
                continue;
            };
            if let Err(e) = prefs.set(key.trim(), value.trim()) {
                warn!(line = lineno + 1, error = %e, "ignoring preference");
            }
        }
        prefs
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PrefsError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("conf.tmp");
        std::fs::write(&tmp, self.to_text())?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (name, value) in self.iter() {
            out.push_str(name);
            out.push_str(" = ");
            out.push_str(&value.to_string());
            out.push('\n');
        }
        out
    }

    /// Set from text, checking the type.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), PrefsError> {
        let idx = table::find(name).ok_or_else(|| PrefsError::Unknown(name.to_owned()))?;
        let def = &PREFS[idx];
        let mismatch = || PrefsError::Type {
            name: def.name,
            expected: def.default.pref_type(),
            value: value.to_owned(),
        };
        self.values[idx] = match def.default.pref_type() {
            PrefType::Bool => PrefValue::Bool(parse_bool(value).ok_or_else(mismatch)?),
            PrefType::Int => PrefValue::Int(value.parse().map_err(|_| mismatch())?),
            PrefType::Str => PrefValue::Str(value.to_owned()),
        };
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PrefValue> {
        table::find(name).map(|idx| &self.values[idx])
    }

    pub fn get_str(&self, name: &str) -> &str {
        match self.get(name) {
            Some(PrefValue::Str(v)) => v,
            _ => {
                error!(pref = name, "not a string setting");
                ""
            }
        }
    }

    pub fn get_int(&self, name: &str) -> i64 {
        match self.get(name) {
            Some(PrefValue::Int(v)) => *v,
            _ => {
                error!(pref = name, "not an integer setting");
                0
            }
        }
    }

    pub fn get_bool(&self, name: &str) -> bool {
        match self.get(name) {
            Some(PrefValue::Bool(v)) => *v,
            _ => {
                error!(pref = name, "not a boolean setting");
                false
            }
        }
    }

    /// A path setting with `~` expanded. Empty settings yield `None`.
    pub fn get_path(&self, name: &str) -> Option<PathBuf> {
        let raw = self.get_str(name);
        (!raw.is_empty()).then(|| expand_home(raw))
    }

    pub fn set_int(&mut self, name: &str, value: i64) -> Result<(), PrefsError> {
        self.set(name, &value.to_string())
    }

    pub fn set_bool(&mut self, name: &str, value: bool) -> Result<(), PrefsError> {
        self.set(name, if value { "1" } else { "0" })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &PrefValue)> {
        PREFS.iter().map(|p| p.name).zip(self.values.iter())
    }
}
