//! unseal-agent — keeps a Vault server unsealed.
//!
//! # Architecture
//!
//! ```text
//! Unsealer
//!   ├── run(): cycle → idle → cycle → ... until shutdown or fatal error
//!   └── run_cycle()
//!       ├── VaultApi::seal_status()      GET /v1/sys/seal-status
//!       └── VaultApi::submit_key() × k   PUT /v1/sys/unseal, in key order,
//!                                        stopping at the first sealed:false
//! ```
//!
//! Transport failures and responses without a `sealed` flag are logged and
//! retried on the next cycle. Submitting every configured share without
//! Vault unsealing is fatal: retrying with the same keys will not help.

pub mod client;
pub mod response;
pub mod unsealer;

pub use client::{ApiError, ApiFuture, HttpVaultClient, VaultApi};
pub use response::{ResponseError, SealStatus};
pub use unsealer::{CycleError, CycleOutcome, UnsealError, Unsealer};
