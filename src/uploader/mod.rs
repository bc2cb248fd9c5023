// SPDX-License-Identifier: Apache-2.0

//! Uploads single journal lines to the remote journal API.
//!
//! [`Uploader`] is a `tower::Service<UploadRequest>`. It encodes the request
//! body and hands it to an inner transport service, normally the HTTP client
//! wrapped in retry and per-attempt timeout layers, then turns the final
//! response into `Ok(())` or an [`UploadError`].

pub mod client;
pub mod request;
pub mod response;
pub mod retry;
pub mod tls;

use crate::journal::parser::FileHeaderMeta;
use crate::uploader::client::HttpClient;
use crate::uploader::request::{ApiRequest, RequestBody};
use crate::uploader::response::{ApiResponse, Verdict};
use crate::uploader::retry::{RetryConfig, RetryPolicy};
use bytes::Bytes;
use http::{StatusCode, Uri};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tower::retry::Retry as TowerRetry;
use tower::timeout::Timeout;
use tower::{BoxError, Service, ServiceBuilder, ServiceExt};
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://www.edsm.net/api-journal-v1";

type SvcType = TowerRetry<RetryPolicy, Timeout<HttpClient>>;

/// One line to upload, with the header that was current when it was read.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub header: Arc<FileHeaderMeta>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorKind {
    /// The API refused the request; sending it again will not help
    Rejected,
    /// Every attempt failed with a retryable status or transport error
    RetriesExhausted,
    /// The request could not be built or sent at all
    Transport,
}

impl Display for UploadErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadErrorKind::Rejected => write!(f, "upload rejected"),
            UploadErrorKind::RetriesExhausted => write!(f, "upload retries exhausted"),
            UploadErrorKind::Transport => write!(f, "upload transport failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} ({}): {body}", fmt_status(.status))]
pub struct UploadError {
    pub kind: UploadErrorKind,
    pub status: Option<StatusCode>,
    pub body: String,
}

fn fmt_status(status: &Option<StatusCode>) -> String {
    match status {
        Some(s) => format!("status {}", s.as_u16()),
        None => "no response".to_string(),
    }
}

impl UploadError {
    pub(crate) fn new(
        kind: UploadErrorKind,
        status: Option<StatusCode>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            status,
            body: body.into(),
        }
    }
}

/// Identity and credentials sent with every upload
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub commander_name: String,
    pub api_key: String,
    pub software: String,
    pub software_version: String,
}

impl ClientIdentity {
    pub fn new(commander_name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            commander_name: commander_name.into(),
            api_key: api_key.into(),
            software: env!("CARGO_PKG_NAME").to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn user_agent(&self) -> String {
        format!("{}/{}", self.software, self.software_version)
    }
}

#[derive(Clone)]
pub struct Uploader<S = SvcType> {
    svc: S,
    endpoint: Uri,
    identity: Arc<ClientIdentity>,
}

impl<S> Uploader<S> {
    /// Wrap an already layered transport service
    pub fn new(svc: S, endpoint: Uri, identity: ClientIdentity) -> Self {
        Self {
            svc,
            endpoint,
            identity: Arc::new(identity),
        }
    }

    fn encode(&self, req: &UploadRequest) -> Result<ApiRequest, UploadError> {
        let body = RequestBody {
            commander_name: &self.identity.commander_name,
            api_key: &self.identity.api_key,
            from_software: &self.identity.software,
            from_software_version: &self.identity.software_version,
            from_game_version: &req.header.game_version,
            from_game_build: &req.header.build,
            message: &req.message,
        };

        let body = serde_json::to_vec(&body).map_err(|e| {
            UploadError::new(UploadErrorKind::Transport, None, format!("encoding failed: {}", e))
        })?;

        Ok(ApiRequest {
            uri: self.endpoint.clone(),
            user_agent: self.identity.user_agent(),
            body: Bytes::from(body),
        })
    }
}

/// Map the outcome of the last attempt to the upload result
fn finish(result: Result<ApiResponse, BoxError>) -> Result<(), UploadError> {
    match result {
        Ok(resp) => match resp.verdict() {
            Verdict::Accepted => {
                debug!(status = ?resp.status, "Upload accepted");
                Ok(())
            }
            Verdict::Retry => Err(UploadError::new(
                UploadErrorKind::RetriesExhausted,
                Some(resp.status),
                resp.body_text(),
            )),
            Verdict::Rejected => Err(UploadError::new(
                UploadErrorKind::Rejected,
                Some(resp.status),
                resp.body_text(),
            )),
        },
        // The retry policy retries every transport error until it gives up
        Err(e) => Err(UploadError::new(
            UploadErrorKind::RetriesExhausted,
            None,
            e.to_string(),
        )),
    }
}

impl<S> Service<UploadRequest> for Uploader<S>
where
    S: Service<ApiRequest, Response = ApiResponse, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = UploadError;
    type Future = Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: UploadRequest) -> Self::Future {
        let encoded = self.encode(&req);
        let svc = self.svc.clone();

        Box::pin(async move {
            let api_req = encoded?;
            finish(svc.oneshot(api_req).await)
        })
    }
}

pub struct UploaderBuilder {
    endpoint: String,
    identity: ClientIdentity,
    retry_config: RetryConfig,
    request_timeout: Duration,
    tls_config: tls::Config,
}

impl UploaderBuilder {
    pub fn new(commander_name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            identity: ClientIdentity::new(commander_name, api_key),
            retry_config: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
            tls_config: tls::Config::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_tls_config(mut self, tls_config: tls::Config) -> Self {
        self.tls_config = tls_config;
        self
    }

    pub fn build(self) -> Result<Uploader, BoxError> {
        crate::crypto::init_crypto_provider()?;

        let endpoint: Uri = self
            .endpoint
            .parse()
            .map_err(|e| format!("invalid endpoint {}: {}", self.endpoint, e))?;

        let client = HttpClient::build(self.tls_config)?;

        let svc = ServiceBuilder::new()
            .retry(RetryPolicy::new(self.retry_config))
            .timeout(self.request_timeout)
            .service(client);

        Ok(Uploader::new(svc, endpoint, self.identity))
    }
}
