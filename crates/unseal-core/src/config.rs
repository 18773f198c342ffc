//! Typed, validated configuration.

use std::fmt;
use std::time::Duration;

use http::Uri;

use crate::error::ConfigError;
use crate::settings::Settings;

pub const ADDRESS_URL: &str = "ADDRESS_URL";
/// Accepted in place of [`ADDRESS_URL`] when that is not set.
pub const VAULT_URL: &str = "VAULT_URL";
pub const TIME_INTERVAL_SECONDS: &str = "TIME_INTERVAL_SECONDS";
pub const UNSEAL_KEY_PREFIX: &str = "UNSEAL_KEY_";
pub const REQUEST_TIMEOUT_SECONDS: &str = "REQUEST_TIMEOUT_SECONDS";
pub const DEBUG: &str = "DEBUG";

/// Display name used for the multi-valued key setting in messages.
const UNSEAL_KEYS: &str = "UNSEAL_KEY_*";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A single unseal key share.
///
/// `Debug` and `Display` are redacted; use [`KeyShare::expose`] to get the
/// secret.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyShare(String);

impl KeyShare {
    pub fn new(share: impl Into<String>) -> Self {
        Self(share.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyShare(***)")
    }
}

impl fmt::Display for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// A named key share, as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsealKey {
    /// Full logical setting name, e.g. `UNSEAL_KEY_1`.
    pub id: String,
    pub share: KeyShare,
}

/// Resolved configuration. Immutable for the life of the process.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Base URL of the Vault server, without trailing slash.
    pub service_url: String,
    pub poll_interval: Duration,
    /// Key shares in submission order. Never empty.
    pub unseal_keys: Vec<UnsealKey>,
    pub request_timeout: Duration,
    /// Enables debug logging, including secrets.
    pub debug: bool,
}

impl Configuration {
    /// Resolve and validate a configuration from merged settings.
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let service_url = settings
            .single(ADDRESS_URL)
            .or_else(|| settings.single(VAULT_URL))
            .ok_or(ConfigError::Missing { name: ADDRESS_URL })
            .and_then(normalize_url)?;

        let poll_interval = settings
            .single(TIME_INTERVAL_SECONDS)
            .ok_or(ConfigError::Missing {
                name: TIME_INTERVAL_SECONDS,
            })
            .and_then(|v| parse_seconds(TIME_INTERVAL_SECONDS, v))?;

        let unseal_keys: Vec<UnsealKey> = settings
            .multi(UNSEAL_KEY_PREFIX)
            .into_iter()
            .map(|(id, share)| UnsealKey {
                id: id.to_string(),
                share: KeyShare::new(share),
            })
            .collect();
        if unseal_keys.is_empty() {
            return Err(ConfigError::Missing { name: UNSEAL_KEYS });
        }

        let request_timeout = match settings.single(REQUEST_TIMEOUT_SECONDS) {
            Some(v) => parse_seconds(REQUEST_TIMEOUT_SECONDS, v)?,
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        Ok(Self {
            service_url,
            poll_interval,
            unseal_keys,
            request_timeout,
            debug: debug_enabled(settings),
        })
    }
}

/// Whether the debug flag is set in `settings`.
///
/// Any non-empty value enables it except `0`, `false`, `no` and `off`.
pub fn debug_enabled(settings: &Settings) -> bool {
    match settings.single(DEBUG) {
        Some(v) => !matches!(
            v.to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        None => false,
    }
}

fn normalize_url(raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        name: ADDRESS_URL,
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim_end_matches('/');
    let uri: Uri = trimmed.parse().map_err(|_| invalid("not a valid URL"))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(_) => return Err(invalid("scheme must be http or https")),
        None => return Err(invalid("missing scheme, expected http:// or https://")),
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    if uri.query().is_some() {
        return Err(invalid("query strings are not supported"));
    }
    Ok(trimmed.to_string())
}

fn parse_seconds(name: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
            reason: "must be a positive number of seconds".to_string(),
        }),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}
