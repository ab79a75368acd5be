//! Async HTTP helper for relaying between server processes.
//!
//! Thin layer over [`reqwest`]: GET and url-encoded form POST, each with an
//! optional request preparer, plus a best-effort body read that turns any
//! failure into `None` so the caller simply retries on its next poll.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use tracing::{trace, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Content type of form posts.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

// ============================================================================
// HttpHelper
// ============================================================================

/// Async HTTP client for relay traffic.
///
/// Cheap to clone; clones share the connection pool.
///
/// # Example
///
/// ```ignore
/// let http = HttpHelper::with_timeout(Duration::from_secs(30))?;
/// let response = http.post(&url, &[("connectionId", "c1"), ("data", "hi")]).await?;
/// if let Some(body) = HttpHelper::read_as_string(response).await {
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct HttpHelper {
    client: Client,
    /// Per-request timeout the client was built with, if known.
    timeout: Option<Duration>,
}

impl Default for HttpHelper {
    fn default() -> Self {
        Self::from_client(Client::new())
    }
}

impl HttpHelper {
    /// Creates a helper with default client settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a helper whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`](crate::Error::Http) if the client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            timeout: Some(timeout),
        })
    }

    /// Wraps an existing client.
    #[inline]
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    /// Sends a GET request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`](crate::Error::Http) if the request fails.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.get_with(url, |request| request).await
    }

    /// Sends a GET request after `prepare` adjusts it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`](crate::Error::Timeout) if the request
    /// times out, [`Error::Http`](crate::Error::Http) on any other failure.
    pub async fn get_with<F>(&self, url: &str, prepare: F) -> Result<Response>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        trace!(url, "GET");
        prepare(self.client.get(url))
            .send()
            .await
            .map_err(|e| self.map_error("GET", url, e))
    }

    /// Posts url-encoded form data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`](crate::Error::Http) if the request fails.
    pub async fn post(&self, url: &str, form: &[(&str, &str)]) -> Result<Response> {
        self.post_with(url, |request| request, form).await
    }

    /// Posts url-encoded form data after `prepare` adjusts the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`](crate::Error::Timeout) if the request
    /// times out, [`Error::Http`](crate::Error::Http) on any other failure.
    pub async fn post_with<F>(&self, url: &str, prepare: F, form: &[(&str, &str)]) -> Result<Response>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let body = encode_form(form);
        trace!(url, bytes = body.len(), "POST");

        let request = prepare(self.client.post(url))
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body);
        request
            .send()
            .await
            .map_err(|e| self.map_error("POST", url, e))
    }

    fn map_error(&self, method: &str, url: &str, e: reqwest::Error) -> Error {
        if !e.is_timeout() {
            return e.into();
        }
        let timeout_ms = self
            .timeout
            .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        warn!(method, url, timeout_ms, "Relay request timed out");
        Error::timeout(format!("{method} {url}"), timeout_ms)
    }

    /// Reads the body as text.
    ///
    /// Returns `None` if the body cannot be read.
    pub async fn read_as_string(response: Response) -> Option<String> {
        let url = response.url().clone();
        match response.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(%url, error = %e, "Failed to read response body");
                None
            }
        }
    }
}

// ============================================================================
// Form encoding
// ============================================================================

/// Encodes pairs as `application/x-www-form-urlencoded`.
///
/// Pairs with an empty value are left out.
#[must_use]
pub fn encode_form(form: &[(&str, &str)]) -> String {
    form.iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serves one canned reply and returns the raw request it received.
    async fn serve_once(reply: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/relay", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];

            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);

                let text = String::from_utf8_lossy(&received);
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if received.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }

            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&received).into_owned()
        });

        (url, handle)
    }

    #[test]
    fn test_encode_form_skips_empty_values() {
        let body = encode_form(&[("connectionId", "c1"), ("groups", ""), ("data", "a b&c")]);
        assert_eq!(body, "connectionId=c1&data=a%20b%26c");
    }

    #[test]
    fn test_encode_form_empty() {
        assert_eq!(encode_form(&[]), "");
        assert_eq!(encode_form(&[("a", "")]), "");
    }

    #[tokio::test]
    async fn test_post_sends_form() {
        let (url, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok").await;

        let response = HttpHelper::new()
            .post(&url, &[("connectionId", "c1"), ("data", "ping")])
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(HttpHelper::read_as_string(response).await.as_deref(), Some("ok"));

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /relay "));
        assert!(raw.to_ascii_lowercase().contains("content-type: application/x-www-form-urlencoded"));
        assert!(raw.ends_with("connectionId=c1&data=ping"));
    }

    #[tokio::test]
    async fn test_get_with_preparer() -> anyhow::Result<()> {
        let (url, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello").await;

        let response = HttpHelper::with_timeout(Duration::from_secs(5))?
            .get_with(&url, |request| request.header("x-relay", "node-1"))
            .await?;
        assert_eq!(HttpHelper::read_as_string(response).await.as_deref(), Some("hello"));

        let raw = server.await?;
        assert!(raw.starts_with("GET /relay "));
        assert!(raw.to_ascii_lowercase().contains("x-relay: node-1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_body_reads_as_none() {
        let (url, _server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nshort").await;

        let response = HttpHelper::new().get(&url).await.unwrap();
        assert_eq!(HttpHelper::read_as_string(response).await, None);
    }

    #[tokio::test]
    async fn test_silent_server_is_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/relay", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let error = HttpHelper::with_timeout(Duration::from_millis(200))
            .unwrap()
            .post(&url, &[("data", "ping")])
            .await
            .unwrap_err();
        assert!(error.is_timeout());
        assert!(matches!(error, Error::Timeout { timeout_ms: 200, .. }));
        server.abort();
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let error = HttpHelper::new().get(&url).await.unwrap_err();
        assert!(error.is_connection_error());
    }
}
