//! Vault HTTP API access.
//!
//! [`VaultApi`] is the seam the unseal loop talks through; the production
//! implementation is [`HttpVaultClient`], and tests inject scripted fakes.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use unseal_core::{Configuration, KeyShare};

use crate::response::{SEAL_STATUS_PATH, SealStatus, UNSEAL_PATH, UnsealRequest};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future returned by [`VaultApi`] calls.
pub type ApiFuture<'a> = Pin<Box<dyn Future<Output = Result<SealStatus, ApiError>> + Send + 'a>>;

/// The two Vault endpoints the unseal loop needs, injected for testability.
pub trait VaultApi: Send + Sync {
    /// `GET /v1/sys/seal-status`.
    fn seal_status(&self) -> ApiFuture<'_>;

    /// `PUT /v1/sys/unseal` with a single key share.
    fn submit_key<'a>(&'a self, share: &'a KeyShare) -> ApiFuture<'a>;
}

/// Transport-level failures talking to Vault.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build request for {uri}: {reason}")]
    InvalidRequest { uri: String, reason: String },

    #[error("request to {uri} failed: {source}")]
    Transport {
        uri: String,
        #[source]
        source: BoxError,
    },

    #[error("request to {uri} timed out after {timeout:?}")]
    Timeout { uri: String, timeout: Duration },

    #[error("{uri} returned HTTP {status} with a non-JSON body")]
    Status {
        uri: String,
        status: StatusCode,
        body: String,
    },

    #[error("{uri} returned a non-JSON body: {source}")]
    Decode {
        uri: String,
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

impl ApiError {
    /// The response body, when one was received.
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::Status { body, .. } | ApiError::Decode { body, .. } => Some(body),
            _ => None,
        }
    }
}

type HttpsClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// [`VaultApi`] over HTTP(S) using hyper.
#[derive(Clone)]
pub struct HttpVaultClient {
    base_url: String,
    timeout: Duration,
    client: HttpsClient,
}

impl HttpVaultClient {
    /// Create a client for `base_url`. Every request is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::new(&config.service_url, config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<SealStatus, ApiError> {
        let uri = format!("{}{}", self.base_url, path);

        let mut builder = Request::builder()
            .method(method)
            .uri(&uri)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("vault-unseal/", env!("CARGO_PKG_VERSION")));
        let body = match body {
            Some(bytes) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        let req = builder.body(body).map_err(|e| ApiError::InvalidRequest {
            uri: uri.clone(),
            reason: e.to_string(),
        })?;

        let exchange = async {
            let resp: hyper::Response<Incoming> =
                self.client
                    .request(req)
                    .await
                    .map_err(|e| ApiError::Transport {
                        uri: uri.clone(),
                        source: Box::new(e),
                    })?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| ApiError::Transport {
                    uri: uri.clone(),
                    source: Box::new(e),
                })?
                .to_bytes();
            Ok::<_, ApiError>((status, bytes))
        };

        let (status, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ApiError::Timeout {
                uri: uri.clone(),
                timeout: self.timeout,
            })??;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => {
                if !status.is_success() {
                    debug!(%uri, %status, "vault answered with an error status");
                }
                Ok(SealStatus::from_json(value))
            }
            Err(source) if status.is_success() => Err(ApiError::Decode {
                uri,
                source,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(_) => Err(ApiError::Status {
                uri,
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            }),
        }
    }
}

impl VaultApi for HttpVaultClient {
    fn seal_status(&self) -> ApiFuture<'_> {
        Box::pin(self.call(Method::GET, SEAL_STATUS_PATH, None))
    }

    fn submit_key<'a>(&'a self, share: &'a KeyShare) -> ApiFuture<'a> {
        Box::pin(async move {
            let body = serde_json::to_vec(&UnsealRequest {
                key: share.expose(),
            })
            .map_err(|e| ApiError::InvalidRequest {
                uri: format!("{}{}", self.base_url, UNSEAL_PATH),
                reason: e.to_string(),
            })?;
            self.call(Method::PUT, UNSEAL_PATH, Some(body)).await
        })
    }
}

impl std::fmt::Debug for HttpVaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVaultClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
