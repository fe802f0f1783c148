//! HTTP search endpoint client
//!
//! Sends `GET <endpoint>?q=<query>` and reads the total hit count from the
//! JSON response at a configurable JSON pointer. Counts may be reported as
//! numbers or numeric strings.

use async_trait::async_trait;
use eta_core::{EtaError, HitCountService, Result, SearchConfig};
use reqwest::Client;
use std::time::Duration;

/// Hit counter backed by an HTTP search API
pub struct HttpHitCounter {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    hit_count_pointer: String,
}

impl HttpHitCounter {
    /// Create a new client for an endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
            hit_count_pointer: SearchConfig::default().hit_count_pointer,
        }
    }

    /// Create from config
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EtaError::HitCount(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            hit_count_pointer: config.hit_count_pointer.clone(),
        })
    }

    /// Set the API key sent as bearer token
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the JSON pointer of the total hit count
    pub fn with_hit_count_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.hit_count_pointer = pointer.into();
        self
    }

    fn extract_count(&self, body: &serde_json::Value) -> Result<u64> {
        let value = body.pointer(&self.hit_count_pointer).ok_or_else(|| {
            EtaError::HitCount(format!(
                "Response has no hit count at {}",
                self.hit_count_pointer
            ))
        })?;

        match value {
            serde_json::Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
                .ok_or_else(|| EtaError::HitCount(format!("Invalid hit count: {n}"))),
            serde_json::Value::String(s) => s
                .replace(',', "")
                .trim()
                .parse()
                .map_err(|_| EtaError::HitCount(format!("Invalid hit count: {s}"))),
            other => Err(EtaError::HitCount(format!("Invalid hit count: {other}"))),
        }
    }
}

#[async_trait]
impl HitCountService for HttpHitCounter {
    async fn hit_count(&self, query: &str) -> Result<u64> {
        let mut request = self.client.get(&self.endpoint).query(&[("q", query)]);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EtaError::HitCount(format!("Search request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EtaError::HitCount(format!(
                "Search error ({status}): {error_text}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EtaError::HitCount(format!("Failed to parse response: {e}")))?;

        let count = self.extract_count(&body)?;
        tracing::trace!(query, count, "Hit count");
        Ok(count)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single HTTP response with the given status line and body
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        format!("http://{addr}/search")
    }

    #[test]
    fn test_extract_count_formats() {
        let counter = HttpHitCounter::new("http://localhost");
        let number = serde_json::json!({ "totalResults": 1200 });
        let string = serde_json::json!({ "totalResults": "1,200" });
        let missing = serde_json::json!({ "items": [] });

        assert_eq!(counter.extract_count(&number).unwrap(), 1200);
        assert_eq!(counter.extract_count(&string).unwrap(), 1200);
        assert!(counter.extract_count(&missing).is_err());
    }

    #[test]
    fn test_custom_pointer() {
        let counter =
            HttpHitCounter::new("http://localhost").with_hit_count_pointer("/queries/0/total");
        let body = serde_json::json!({ "queries": [{ "total": 7 }] });
        assert_eq!(counter.extract_count(&body).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_hit_count_over_http() {
        let endpoint = serve_once("200 OK", r#"{"totalResults": 42}"#).await;
        let counter = HttpHitCounter::new(endpoint).with_api_key("secret");
        assert_eq!(counter.hit_count("\"London\"").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let endpoint = serve_once("500 Internal Server Error", r#"{"error": "boom"}"#).await;
        let counter = HttpHitCounter::new(endpoint);
        assert!(matches!(
            counter.hit_count("\"London\"").await,
            Err(EtaError::HitCount(_))
        ));
    }
}
