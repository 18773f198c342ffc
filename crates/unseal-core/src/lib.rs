//! unseal-core — configuration for vault-unseal.
//!
//! Settings come from two sources and are merged with a fixed rule:
//!
//! ```text
//! VU_* environment variables ──► Settings (base)
//! vault-unseal.json          ──► Settings (overlay, wins on collision)
//!                                    │
//!                                    ▼
//!                        Configuration::resolve()
//! ```
//!
//! Resolution fails with a [`ConfigError`] when a required setting is
//! absent or malformed; the binary turns that into exit status 1.

pub mod config;
pub mod error;
pub mod settings;

pub use config::{Configuration, KeyShare, UnsealKey};
pub use error::{ConfigError, ExitStatus};
pub use settings::{ConfigSources, Settings};
