// SPDX-License-Identifier: Apache-2.0

use crate::uploader::request::ApiRequest;
use crate::uploader::response::ApiResponse;
use crate::uploader::tls::Config;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{BoxError, Service};

#[derive(Debug)]
pub struct ConnectError(pub(crate) String);

impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unable to connect: {}", self.0)
    }
}

impl Error for ConnectError {}

pub(crate) fn build_hyper_client(
    tls_config: Config,
) -> Result<HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>, BoxError> {
    let client_config = tls_config.into_client_config()?;

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(client_config)
        .https_or_http()
        .enable_all_versions()
        .build();

    let client = HyperClient::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(16)
        .timer(TokioTimer::new())
        .build::<_, Full<Bytes>>(https);

    Ok(client)
}

/// Plain HTTP transport. Every response is returned as-is, including error
/// statuses; classifying them is left to the retry policy and the uploader.
#[derive(Clone)]
pub struct HttpClient {
    inner: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpClient {
    pub fn build(tls_config: Config) -> Result<Self, BoxError> {
        Ok(Self {
            inner: build_hyper_client(tls_config)?,
        })
    }

    async fn perform_request(&self, req: ApiRequest) -> Result<ApiResponse, BoxError> {
        let req = req.to_http()?;

        match self.inner.request(req).await {
            Err(e) => {
                if e.is_connect() {
                    Err(ConnectError(e.to_string()).into())
                } else {
                    Err(e.into())
                }
            }
            Ok(resp) => {
                let (head, body) = resp.into_parts();
                let body = body
                    .collect()
                    .await
                    .map_err(|e| format!("failed reading response: {}", e))?
                    .to_bytes();

                Ok(ApiResponse::new(head.status, body))
            }
        }
    }
}

impl Service<ApiRequest> for HttpClient {
    type Response = ApiResponse;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ApiRequest) -> Self::Future {
        let this = self.clone();

        Box::pin(async move { this.perform_request(req).await })
    }
}
