use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use reqwest::Response;
use serde::Serialize;
use tracing::{debug, warn};

use super::error::ApiError;
use crate::config::ApiConfig;
use crate::session::Auth;

/// Substituted for the response body when it cannot be read.
pub const UNREADABLE_BODY: &str = "Unknown error";

/// Per-request options. `headers` are merged under the generated ones,
/// `skip_json` suppresses the automatic JSON content type, and everything
/// else is handed to the transport as is.
#[derive(Debug, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub skip_json: bool,
    pub query: Vec<(String, String)>,
    pub body: Option<reqwest::Body>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn skip_json(mut self) -> Self {
        self.skip_json = true;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<reqwest::Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the request body.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        Ok(self.body(serde_json::to_vec(value)?))
    }
}

/// Sends requests to the configured API, attaching the session's bearer token
/// whenever authentication is enabled.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: Auth,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, auth: Auth) -> Self {
        Self::with_client(config, auth, reqwest::Client::new())
    }

    pub fn with_client(config: &ApiConfig, auth: Auth, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            auth,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends `options` to `base_url + endpoint`.
    ///
    /// The response is returned unread on any 2xx status; reading the body is
    /// up to the caller.
    ///
    /// # Errors
    ///
    /// - [`ApiError::NoCredential`] when auth is enabled and the session has no
    ///   token. The request is not sent.
    /// - [`ApiError::Http`] for a non-2xx status, with the body text.
    /// - [`ApiError::Transport`] for anything the transport itself reports.
    pub async fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Response, ApiError> {
        let RequestOptions {
            method,
            mut headers,
            skip_json,
            query,
            body,
        } = options;

        if !skip_json {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        if self.auth.auth_enabled() {
            let Some(token) = self.auth.get_token().await else {
                warn!("Refusing to call '{}': no token available", endpoint);
                return Err(ApiError::NoCredential);
            };
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(ApiError::MalformedCredential)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let url = format!("{}{}", self.base_url, endpoint);
        debug!("{} {}", method, url);

        let mut builder = self.http.request(method, &url).headers(headers);
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| UNREADABLE_BODY.to_string());
            warn!("Request to '{}' failed with status {}", url, status);
            return Err(ApiError::Http { status, body });
        }

        Ok(response)
    }

    pub async fn get(&self, endpoint: &str) -> Result<Response, ApiError> {
        self.request(endpoint, RequestOptions::new()).await
    }
}
