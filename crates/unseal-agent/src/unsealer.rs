//! The unseal control loop.
//!
//! Each cycle polls the seal status and, if Vault is sealed, submits the
//! configured key shares in order until Vault reports unsealed. Cycles are
//! separated by the configured poll interval.
//!
//! Cycle results fall into three classes:
//!
//! - success: [`CycleOutcome`];
//! - recoverable: [`CycleError::Transport`] and [`CycleError::Malformed`],
//!   logged by the supervisor, retried next cycle;
//! - fatal: [`CycleError::Exhausted`], which ends [`Unsealer::run`].

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

use unseal_core::Configuration;

use crate::client::{ApiError, VaultApi};
use crate::response::{ResponseError, SealStatus};

/// A cycle that completed without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Vault was already unsealed; nothing was submitted.
    AlreadyUnsealed,
    /// Vault became unsealed after `submitted` shares, the last being `key_id`.
    Unsealed { key_id: String, submitted: usize },
}

/// A cycle that did not complete.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Transport(#[from] ApiError),

    #[error(transparent)]
    Malformed(#[from] ResponseError),

    #[error("failed to unseal after submitting all {submitted} key shares, check the keys")]
    Exhausted { submitted: usize, last: SealStatus },
}

impl CycleError {
    /// Fatal errors stop the loop; everything else is retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleError::Exhausted { .. })
    }
}

/// Why [`Unsealer::run`] gave up.
#[derive(Debug, Error)]
pub enum UnsealError {
    #[error("vault is still sealed after submitting all {submitted} configured key shares")]
    Exhausted { submitted: usize, last: SealStatus },
}

/// Drives the poll/unseal protocol against one Vault server.
pub struct Unsealer<A> {
    api: A,
    config: Configuration,
}

impl<A: VaultApi> Unsealer<A> {
    pub fn new(api: A, config: Configuration) -> Self {
        Self { api, config }
    }

    /// Run cycles until shutdown is signalled or a fatal error occurs.
    ///
    /// Recoverable errors are logged and the next cycle starts after the
    /// poll interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), UnsealError> {
        debug!(
            interval_secs = self.config.poll_interval.as_secs(),
            "unseal loop starting"
        );

        loop {
            tokio::select! {
                result = self.run_cycle() => {
                    if let Err(e) = result {
                        self.report(&e);
                        if let CycleError::Exhausted { submitted, last } = e {
                            return Err(UnsealError::Exhausted { submitted, last });
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("unseal loop shutting down");
        Ok(())
    }

    /// Run a single poll-and-maybe-unseal cycle.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        let status = self.api.seal_status().await?;
        self.trace_response("status", &status);

        if !status.sealed_flag()? {
            return Ok(CycleOutcome::AlreadyUnsealed);
        }

        let total = self.config.unseal_keys.len();
        info!(keys = total, "Detected sealed vault. Unsealing...");

        let mut last = status;
        for (index, key) in self.config.unseal_keys.iter().enumerate() {
            if self.config.debug {
                debug!(key_id = %key.id, key = key.share.expose(), "submitting unseal key");
            }

            let response = self.api.submit_key(&key.share).await?;
            self.trace_response("unseal", &response);
            let submitted = index + 1;

            if !response.sealed_flag()? {
                info!(submitted, "Unsealed successfully");
                return Ok(CycleOutcome::Unsealed {
                    key_id: key.id.clone(),
                    submitted,
                });
            }

            match response.progress_label() {
                Some(progress) => info!(submitted, total, %progress, "key share accepted, vault still sealed"),
                None => info!(submitted, total, "key share accepted, vault still sealed"),
            }
            last = response;
        }

        Err(CycleError::Exhausted {
            submitted: total,
            last,
        })
    }

    /// Log a failed cycle.
    pub fn report(&self, err: &CycleError) {
        match err {
            CycleError::Transport(e) => {
                error!(error = %e, "Exception while contacting vault");
                if let Some(body) = e.body() {
                    error!(%body, "response body");
                }
            }
            CycleError::Malformed(e) => {
                error!(response = %compact(e.raw()), "Error: {e}");
            }
            CycleError::Exhausted { last, .. } => {
                error!(response = %compact(last.raw()), "{err}");
            }
        }
    }

    fn trace_response(&self, call: &'static str, status: &SealStatus) {
        if self.config.debug {
            debug!(call, response = %compact(status.raw()), "vault response");
        }
    }
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}
