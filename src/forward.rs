//! ==============================================================================
//! forward.rs - gateway -> collector uplink
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     one HTTP POST per accepted reading. failures are reported to the
//!     caller, which logs and drops them: the node's retry/ACK cycle is the
//!     only delivery assurance and it has already finished by now.
//!
//! endpoints:
//!     POST {collector}/api/moisture     {"moisture": <int>, "name": <int>}
//!     POST {collector}/api/temperature  {"temperature": <int>, "name": "<int>"}
//!     headers: Content-Type: application/json, x-access-token: <token>
//! ```
//!
//! ==============================================================================

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::domain::{MoistureReport, Reading, TemperatureReport};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector answered {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Error)]
pub enum UplinkError {
    #[error("invalid collector url {0:?}")]
    InvalidUrl(String),
    #[error("collector {0} unreachable: {1}")]
    Unreachable(String, std::io::Error),
    #[error("collector {0} did not accept a connection within {1:?}")]
    Timeout(String, Duration),
}

#[async_trait]
pub trait Forwarder: Send {
    async fn forward(&self, reading: &Reading) -> Result<(), ForwardError>;
}

#[async_trait]
impl<F: Forwarder + Sync + ?Sized> Forwarder for Box<F> {
    async fn forward(&self, reading: &Reading) -> Result<(), ForwardError> {
        (**self).forward(reading).await
    }
}

pub struct HttpForwarder {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpForwarder {
    pub fn new(base_url: &str, access_token: &str, timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    async fn post<T: serde::Serialize + Sync>(&self, path: &str, body: &T) -> Result<(), ForwardError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("x-access-token", &self.access_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        tracing::info!(%status, "[HTTP] POST {}", path);
        if !status.is_success() {
            return Err(ForwardError::Status(status));
        }
        if status == reqwest::StatusCode::OK {
            if let Ok(text) = response.text().await {
                tracing::debug!("[HTTP] collector said: {}", text);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, reading: &Reading) -> Result<(), ForwardError> {
        match *reading {
            Reading::Moisture { node, level } => {
                self.post("/api/moisture", &MoistureReport { moisture: level, name: node }).await
            }
            Reading::Temperature { node, celsius } => {
                self.post("/api/temperature", &TemperatureReport { temperature: celsius, name: node.to_string() })
                    .await
            }
        }
    }
}

/// Dry-run forwarder: logs what would have been posted.
pub struct LogForwarder;

#[async_trait]
impl Forwarder for LogForwarder {
    async fn forward(&self, reading: &Reading) -> Result<(), ForwardError> {
        tracing::info!(?reading, "[DRY RUN] would forward");
        Ok(())
    }
}

/// Boot-time connectivity check: can we open a TCP connection to the collector?
pub async fn check_uplink(collector_url: &str, timeout: Duration) -> Result<(), UplinkError> {
    let url = reqwest::Url::parse(collector_url).map_err(|_| UplinkError::InvalidUrl(collector_url.to_string()))?;
    let host = url.host_str().ok_or_else(|| UplinkError::InvalidUrl(collector_url.to_string()))?;
    let port = url.port_or_known_default().ok_or_else(|| UplinkError::InvalidUrl(collector_url.to_string()))?;
    let addr = format!("{}:{}", host, port);

    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(UplinkError::Unreachable(addr, e)),
        Err(_) => Err(UplinkError::Timeout(addr, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one HTTP request, answer with `status`, hand back the raw request text.
    async fn one_shot_collector(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut raw = String::new();
            // read until headers and the (small) body are in
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                raw.push_str(&String::from_utf8_lossy(&buf[..n]));
                if let Some(split) = raw.find("\r\n\r\n") {
                    let len = raw
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap()))
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + len {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!("HTTP/1.1 {}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok", status);
            sock.write_all(reply.as_bytes()).await.unwrap();
            raw
        });
        (url, handle)
    }

    #[tokio::test]
    async fn posts_moisture_with_numeric_name() {
        let (url, collector) = one_shot_collector("200 OK").await;
        let fwd = HttpForwarder::new(&url, "s3cret", Duration::from_secs(5)).unwrap();

        fwd.forward(&Reading::Moisture { node: 7, level: 724 }).await.unwrap();

        let raw = collector.await.unwrap();
        assert!(raw.starts_with("POST /api/moisture HTTP/1.1"));
        assert!(raw.to_ascii_lowercase().contains("x-access-token: s3cret"));
        assert!(raw.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(raw.ends_with(r#"{"moisture":724,"name":7}"#));
    }

    #[tokio::test]
    async fn posts_temperature_with_string_name() {
        let (url, collector) = one_shot_collector("200 OK").await;
        let fwd = HttpForwarder::new(&format!("{}/", url), "t", Duration::from_secs(5)).unwrap();

        fwd.forward(&Reading::Temperature { node: 7, celsius: -3 }).await.unwrap();

        let raw = collector.await.unwrap();
        assert!(raw.starts_with("POST /api/temperature HTTP/1.1"));
        assert!(raw.ends_with(r#"{"temperature":-3,"name":"7"}"#));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, collector) = one_shot_collector("503 Service Unavailable").await;
        let fwd = HttpForwarder::new(&url, "t", Duration::from_secs(5)).unwrap();

        let err = fwd.forward(&Reading::Moisture { node: 1, level: 1 }).await.unwrap_err();
        assert!(matches!(err, ForwardError::Status(s) if s.as_u16() == 503));
        collector.await.unwrap();
    }

    #[tokio::test]
    async fn uplink_check_finds_listening_collector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        assert!(check_uplink(&url, Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn uplink_check_rejects_bad_url() {
        assert!(matches!(
            check_uplink("not a url", Duration::from_secs(1)).await,
            Err(UplinkError::InvalidUrl(_))
        ));
    }
}
