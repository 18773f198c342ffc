//! Untyped settings sources and the merge rule between them.
//!
//! Settings are a flat, ordered list of logical name → string value. They
//! come from two places:
//!
//! - the process environment, filtered to variables carrying the
//!   [`ENV_PREFIX`], with the prefix stripped;
//! - a JSON settings file (default [`DEFAULT_SETTINGS_FILE`]).
//!
//! The file is overlaid on top of the environment, so file values win on a
//! name collision. Logical names are upper-cased in both sources, so
//! `vu_unseal_key_1` and a file's `UNSEAL_KEY_1` are the same setting.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

/// Prefix marking an environment variable as a vault-unseal setting.
pub const ENV_PREFIX: &str = "VU_";

/// Settings file read when no other path is given.
pub const DEFAULT_SETTINGS_FILE: &str = "vault-unseal.json";

/// An ordered, flat mapping of logical setting names to values.
///
/// Order is insertion order. Overlaying a name that already exists replaces
/// the value in place; new names are appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    entries: Vec<(String, String)>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build settings from environment-like pairs.
    ///
    /// Only names starting with `prefix` (compared case-insensitively) are
    /// kept, with the prefix stripped and the rest upper-cased. Entries are
    /// sorted by logical name so the result does not depend on the
    /// platform's enumeration order.
    pub fn from_vars<I, K, V>(vars: I, prefix: &str) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut entries: Vec<(String, String)> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                strip_prefix_ignore_case(key.as_ref(), prefix)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_ascii_uppercase(), value.into()))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut settings = Self::new();
        for (name, value) in entries {
            settings.set(name, value);
        }
        settings
    }

    /// Read settings from a JSON file.
    ///
    /// A missing, unreadable, or malformed file yields empty settings; the
    /// reason is logged at debug level only.
    pub fn from_json_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json_str(&text).unwrap_or_else(|e| {
                debug!(path = %path.display(), error = %e, "settings file ignored");
                Self::new()
            }),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "settings file not read");
                Self::new()
            }
        }
    }

    /// Parse settings from JSON text, which must be an object.
    ///
    /// Names are upper-cased. Strings are taken verbatim, numbers and
    /// booleans as their JSON text. A nested object is flattened by joining
    /// names with `_`, so
    /// `{"UNSEAL_KEY": {"1": "a"}}` yields `UNSEAL_KEY_1 = "a"`. Nulls and
    /// arrays are skipped.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let mut settings = Self::new();
        match value {
            Value::Object(map) => {
                for (name, value) in map {
                    settings.insert_json(name, value);
                }
            }
            other => {
                debug!(kind = json_kind(&other), "settings file is not a JSON object");
            }
        }
        Ok(settings)
    }

    fn insert_json(&mut self, name: String, value: Value) {
        let name = name.to_ascii_uppercase();
        match value {
            Value::String(s) => self.set(name, s),
            Value::Number(n) => self.set(name, n.to_string()),
            Value::Bool(b) => self.set(name, b.to_string()),
            Value::Object(map) => {
                for (child, value) in map {
                    self.insert_json(format!("{name}_{child}"), value);
                }
            }
            Value::Null | Value::Array(_) => {
                debug!(%name, "unsupported settings value skipped");
            }
        }
    }

    /// Merge environment and file settings; file values win.
    pub fn merge(env: Settings, file: Settings) -> Self {
        let mut merged = env;
        merged.overlay(file);
        merged
    }

    /// Overlay `other` on top of `self`.
    pub fn overlay(&mut self, other: Settings) {
        for (name, value) in other.entries {
            self.set(name, value);
        }
    }

    /// Set a value, replacing any existing value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Look up a single-valued setting by exact name.
    ///
    /// Empty and whitespace-only values count as absent.
    pub fn single(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Collect every non-empty entry whose name starts with `prefix`
    /// (case-insensitive), keyed by full name, in settings order.
    pub fn multi(&self, prefix: &str) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .filter(|(n, _)| strip_prefix_ignore_case(n, prefix).is_some())
            .map(|(n, v)| (n.as_str(), v.trim()))
            .filter(|(_, v)| !v.is_empty())
            .collect()
    }

    /// Logical names in settings order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where settings are loaded from at process start.
#[derive(Debug, Clone)]
pub struct ConfigSources {
    /// Path of the JSON settings file.
    pub file: PathBuf,
    env_prefix: String,
}

impl Default for ConfigSources {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_SETTINGS_FILE),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }
}

impl ConfigSources {
    pub fn with_file(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    /// Read the process environment and the settings file and merge them.
    ///
    /// This is the only place that reads process-global state.
    pub fn load(&self) -> Settings {
        let env = Settings::from_vars(utf8_vars(std::env::vars_os()), &self.env_prefix);
        let file = Settings::from_json_file(&self.file);
        debug!(
            env_settings = env.len(),
            file_settings = file.len(),
            file = %self.file.display(),
            "settings sources loaded"
        );
        Settings::merge(env, file)
    }
}

/// Keep only variables whose name and value are valid UTF-8.
fn utf8_vars(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> impl Iterator<Item = (String, String)> {
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (Ok(key), Err(_)) => {
                debug!(%key, "environment variable with non UTF-8 value skipped");
                None
            }
            (Err(key), _) => {
                debug!(key = %key.to_string_lossy(), "environment variable with non UTF-8 name skipped");
                None
            }
        })
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
