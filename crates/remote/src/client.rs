//! Shared HTTP plumbing for the remote job and annotation services.

use labelsync_engine::RemoteError;
use reqwest::{Method, RequestBuilder};

/// Base client: one [`reqwest::Client`], the service root and an optional
/// bearer token. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

/// Errors from the HTTP adapter layer.
#[derive(Debug, thiserror::Error)]
pub enum RemoteApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl From<RemoteApiError> for RemoteError {
    fn from(err: RemoteApiError) -> Self {
        match err {
            RemoteApiError::Request(e) if e.is_decode() => RemoteError::Decode(e.to_string()),
            RemoteApiError::Request(e) => RemoteError::Transport(e.to_string()),
            RemoteApiError::Api { status, body } => RemoteError::Status {
                status,
                message: body,
            },
        }
    }
}

impl ApiClient {
    /// * `api_url` - Service root, e.g. `https://labels.example.com`. A
    ///   trailing slash is dropped.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Absolute URL for `path`, which starts with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    // ---- response helpers ----

    /// Returns the response unchanged on success, or
    /// [`RemoteApiError::Api`] with the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RemoteApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RemoteApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    pub(crate) async fn check_status(response: reqwest::Response) -> Result<(), RemoteApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
