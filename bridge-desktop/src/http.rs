//! HTTP Downloader Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{Downloader, HttpMethod, HttpRequest, StreamingResponse},
};
use futures_util::TryStreamExt;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Reqwest-based streaming downloader
///
/// Provides:
/// - Connection pooling via reqwest
/// - TLS support by default
/// - Chunked body streaming without buffering the whole file
///
/// No retry happens here. The cache engine decides when to try again.
pub struct ReqwestDownloader {
    client: Client,
}

impl ReqwestDownloader {
    /// Create a downloader with default configuration
    pub fn new() -> Result<Self> {
        Self::with_timeouts(Duration::from_secs(10), Duration::from_secs(30))
    }

    /// Create a downloader with custom connect and read timeouts.
    ///
    /// `read_timeout` bounds each read from the socket, not the whole body:
    /// song bodies can take minutes on slow links, but a read that stalls for
    /// longer than `read_timeout` ends the body stream with a network error.
    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .pool_max_idle_per_host(10)
            .user_agent(concat!("song-cache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap a preconfigured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
        }
    }

    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    fn map_error(e: reqwest::Error) -> BridgeError {
        if e.is_builder() {
            BridgeError::InvalidRequest(e.to_string())
        } else if e.is_timeout() {
            BridgeError::Network(format!("Request timed out: {}", e))
        } else if e.is_connect() {
            BridgeError::Network(format!("Connection failed: {}", e))
        } else {
            BridgeError::Network(e.to_string())
        }
    }
}

/// URL without credentials or query string, for logging.
fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

#[async_trait]
impl Downloader for ReqwestDownloader {
    async fn fetch(&self, request: HttpRequest) -> Result<StreamingResponse> {
        debug!(
            url = %redact(&request.url),
            range = ?request.header_value("Range"),
            "Fetching"
        );

        let response = self
            .build_request(request)
            .send()
            .await
            .map_err(Self::map_error)?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let body = response.bytes_stream().map_err(Self::map_error);

        Ok(StreamingResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_downloader_creation() {
        assert!(ReqwestDownloader::new().is_ok());
    }

    #[test]
    fn test_method_conversion() {
        assert_eq!(
            ReqwestDownloader::convert_method(HttpMethod::Get),
            reqwest::Method::GET
        );
    }

    #[test]
    fn test_redact_drops_credentials_and_query() {
        assert_eq!(
            redact("https://user:pw@cdn.example.com/songs/1.mp3?token=secret#t=10"),
            "https://cdn.example.com/songs/1.mp3"
        );
        assert_eq!(redact("not a url"), "<invalid url>");
    }

    #[tokio::test]
    async fn test_stalled_body_read_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nabc")
                .await
                .unwrap();
            // Hold the connection open without sending the rest.
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let downloader =
            ReqwestDownloader::with_timeouts(Duration::from_secs(5), Duration::from_millis(200))
                .unwrap();
        let mut response = downloader
            .fetch(HttpRequest::get(format!("http://{}/1.mp3", addr)))
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let err = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match response.body.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return e,
                    None => panic!("body ended without an error"),
                }
            }
        })
        .await
        .expect("read timeout did not fire");
        assert!(err.is_transient());

        server.abort();
    }

    #[tokio::test]
    async fn test_malformed_url_is_not_transient() {
        let downloader = ReqwestDownloader::new().unwrap();
        let err = downloader
            .fetch(HttpRequest::get("not a url"))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
