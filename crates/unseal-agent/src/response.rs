//! Vault seal-status response model.
//!
//! Both `GET /v1/sys/seal-status` and `PUT /v1/sys/unseal` answer with the
//! same shape. Only `sealed` drives the unseal loop; the rest is kept for
//! progress logging.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Status endpoint path, relative to the service base URL.
pub const SEAL_STATUS_PATH: &str = "/v1/sys/seal-status";
/// Key submission endpoint path, relative to the service base URL.
pub const UNSEAL_PATH: &str = "/v1/sys/unseal";

/// Body of a single key submission.
#[derive(Debug, Serialize)]
pub struct UnsealRequest<'a> {
    pub key: &'a str,
}

/// A seal-status answer from Vault.
#[derive(Debug, Clone, PartialEq)]
pub struct SealStatus {
    /// `None` when the field is absent or not a boolean.
    pub sealed: Option<bool>,
    /// Threshold of shares needed.
    pub threshold: Option<u64>,
    /// Total number of shares.
    pub shares: Option<u64>,
    /// Shares accepted so far in the current unseal attempt.
    pub progress: Option<u64>,
    pub version: Option<String>,
    raw: Value,
}

/// The response does not carry what the loop needs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResponseError {
    #[error("cannot find 'sealed' in returned json")]
    MissingSealed { raw: Value },
}

impl ResponseError {
    /// The raw response that failed extraction.
    pub fn raw(&self) -> &Value {
        match self {
            ResponseError::MissingSealed { raw } => raw,
        }
    }
}

impl SealStatus {
    /// Extract the known fields from any JSON value.
    ///
    /// Never fails: a non-object or mistyped field just leaves the
    /// corresponding member `None`.
    pub fn from_json(raw: Value) -> Self {
        let u64_field = |name: &str| raw.get(name).and_then(Value::as_u64);
        Self {
            sealed: raw.get("sealed").and_then(Value::as_bool),
            threshold: u64_field("t"),
            shares: u64_field("n"),
            progress: u64_field("progress"),
            version: raw.get("version").and_then(Value::as_str).map(str::to_string),
            raw,
        }
    }

    /// The `sealed` flag, or an error carrying the raw response.
    pub fn sealed_flag(&self) -> Result<bool, ResponseError> {
        self.sealed.ok_or_else(|| ResponseError::MissingSealed {
            raw: self.raw.clone(),
        })
    }

    /// The full JSON body as received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// `progress/threshold`, when Vault reported both.
    pub fn progress_label(&self) -> Option<String> {
        match (self.progress, self.threshold) {
            (Some(p), Some(t)) => Some(format!("{p}/{t}")),
            _ => None,
        }
    }
}
