//! WebHDFS over HTTPS.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication.

use std::time::Duration;

use lakestore_protocol::constants::{
    DEFAULT_API_VERSION, DEFAULT_URL_SUFFIX, HttpMethod, WEBHDFS_EXT_PREFIX, WEBHDFS_PREFIX,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, trace};

use crate::transport::BoxFuture;
use crate::{RestError, RestRequest, RestResponse, RestTransport};

/// Characters left as-is inside a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub store_name: String,
    pub url_suffix: String,
    pub api_version: String,
    pub token: String,
    /// Per-request timeout; `None` leaves it to the OS.
    pub timeout: Option<Duration>,
}

impl HttpConfig {
    pub fn new(store_name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            url_suffix: DEFAULT_URL_SUFFIX.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            token: token.into(),
            timeout: None,
        }
    }
}

/// [`RestTransport`] backed by a real store endpoint.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    identity: String,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self, RestError> {
        if config.store_name.is_empty() {
            return Err(RestError::Config("store name must not be empty".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.token))
                .map_err(|_| RestError::Config("token is not a valid header value".into()))?,
        );

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| RestError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url: format!("https://{}.{}", config.store_name, config.url_suffix),
            api_version: config.api_version,
            identity: config.store_name,
        })
    }

    /// Sets a custom base URL (for testing).
    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn url(&self, request: &RestRequest) -> String {
        let prefix = if request.op.is_extended() {
            WEBHDFS_EXT_PREFIX
        } else {
            WEBHDFS_PREFIX
        };
        let encoded = request
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| utf8_percent_encode(s, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{prefix}{encoded}", self.base_url)
    }

    async fn send(&self, request: RestRequest) -> Result<RestResponse, RestError> {
        let url = self.url(&request);
        let method = match request.op.method() {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut query: Vec<(&str, &str)> = vec![
            ("op", request.op.as_str()),
            ("api-version", self.api_version.as_str()),
        ];
        query.extend(request.params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        trace!(op = %request.op, path = %request.path, bytes = request.body_len(), "sending request");

        let mut builder = self.http.request(method, &url).query(&query);
        if let Some(body) = request.body.clone() {
            let content_type = if request.op == lakestore_protocol::Operation::MsConcat {
                "application/json"
            } else {
                "application/octet-stream"
            };
            builder = builder.header(CONTENT_TYPE, content_type).body(body);
        }

        let resp = builder.send().await.map_err(map_reqwest)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(map_reqwest)?.to_vec();

        if !status.is_success() {
            debug!(
                op = %request.op,
                path = %request.path,
                status = status.as_u16(),
                "request failed"
            );
            return Err(RestError::from_response(
                &request.path,
                status.as_u16(),
                &body,
            ));
        }

        Ok(RestResponse::new(status.as_u16(), body))
    }
}

fn map_reqwest(e: reqwest::Error) -> RestError {
    if e.is_timeout() {
        RestError::Timeout
    } else {
        RestError::Transport(e.to_string())
    }
}

impl RestTransport for HttpTransport {
    fn call(&self, request: RestRequest) -> BoxFuture<'_, Result<RestResponse, RestError>> {
        Box::pin(self.send(request))
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}
