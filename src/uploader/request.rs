// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{Method, Request, Uri};
use http_body_util::Full;
use serde::Serialize;

/// A fully encoded API call. Cheap to clone so the retry layer can replay it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub uri: Uri,
    pub user_agent: String,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn to_http(&self) -> Result<Request<Full<Bytes>>, http::Error> {
        Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, self.user_agent.as_str())
            .body(Full::new(self.body.clone()))
    }
}

/// JSON body of a journal upload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody<'a> {
    pub commander_name: &'a str,
    pub api_key: &'a str,
    pub from_software: &'a str,
    pub from_software_version: &'a str,
    pub from_game_version: &'a str,
    pub from_game_build: &'a str,
    pub message: &'a str,
}
