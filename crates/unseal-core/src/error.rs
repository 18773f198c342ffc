//! Startup errors and the process exit status table.

use thiserror::Error;

/// Errors raised while resolving a [`crate::Configuration`].
///
/// All of them are fatal at startup and map to [`ExitStatus::InvalidConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "{name} is not specified. Specify it either in the vault-unseal.json file, \
         or as environment variable prefixed with VU_"
    )]
    Missing { name: &'static str },

    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    /// Name of the offending setting.
    pub fn setting(&self) -> &'static str {
        match self {
            ConfigError::Missing { name } | ConfigError::Invalid { name, .. } => name,
        }
    }
}

/// Documented process exit statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    /// Clean shutdown (signal, or a successful single cycle).
    Success = 0,
    /// A required setting is missing or invalid.
    InvalidConfig = 1,
    /// Every configured key share was submitted and the service is still sealed.
    UnsealExhausted = 2,
    /// A single-cycle run hit a recoverable error.
    CycleFailed = 3,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}
