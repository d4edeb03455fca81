//! Zabbix trapper client (sender protocol)
//!
//! Frame layout: `ZBXD`, protocol flags byte `0x01`, payload length as a
//! little-endian u64, then the JSON payload. The server answers with the
//! same framing.

use crate::metrics::ClusterMetricsSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

const MAGIC: &[u8; 4] = b"ZBXD";
const FLAGS: u8 = 0x01;
const HEADER_LEN: usize = 13;
const MAX_RESPONSE: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TrapperError {
    #[error("trapper connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("trapper did not answer within {0:?}")]
    Timeout(Duration),

    #[error("invalid response header")]
    BadHeader,

    #[error("response of {0} bytes exceeds limit")]
    TooLarge(u64),

    #[error("invalid trapper JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server rejected data: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrapperItem {
    pub host: String,
    pub key: String,
    pub value: String,
}

#[derive(Serialize)]
struct SenderRequest<'a> {
    request: &'static str,
    data: &'a [TrapperItem],
}

#[derive(Debug, Deserialize)]
struct SenderResponse {
    response: String,
    #[serde(default)]
    info: String,
}

/// Counters reported back by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SendSummary {
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
}

/// Items for one snapshot: `<prefix>.<metric>[<cluster id>]`
pub fn snapshot_items(
    snapshot: &ClusterMetricsSnapshot,
    host: &str,
    prefix: &str,
) -> Vec<TrapperItem> {
    snapshot
        .metric_values()
        .into_iter()
        .map(|(metric, value)| TrapperItem {
            host: host.to_string(),
            key: format!("{prefix}.{metric}[{}]", snapshot.cluster_id),
            value,
        })
        .collect()
}

pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(MAGIC);
    frame.push(FLAGS);
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Payload length announced by a frame header
pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<u64, TrapperError> {
    if &header[..4] != MAGIC {
        return Err(TrapperError::BadHeader);
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&header[5..13]);
    Ok(u64::from_le_bytes(len))
}

/// Parse `processed: 3; failed: 0; total: 3; seconds spent: 0.000041`
pub fn parse_info(info: &str) -> SendSummary {
    let mut summary = SendSummary::default();
    for part in info.split(';') {
        let Some((name, value)) = part.split_once(':') else {
            continue;
        };
        let value = value.trim().parse().unwrap_or(0);
        match name.trim() {
            "processed" => summary.processed = value,
            "failed" => summary.failed = value,
            "total" => summary.total = value,
            _ => {}
        }
    }
    summary
}

#[derive(Debug, Clone)]
pub struct TrapperClient {
    server: String,
    port: u16,
    timeout: Duration,
}

impl TrapperClient {
    pub fn new(server: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            port,
            timeout,
        }
    }

    pub async fn send(&self, items: &[TrapperItem]) -> Result<SendSummary, TrapperError> {
        if items.is_empty() {
            return Ok(SendSummary::default());
        }

        let payload = serde_json::to_vec(&SenderRequest {
            request: "sender data",
            data: items,
        })?;

        let exchange = self.exchange(encode_frame(&payload));
        let body = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TrapperError::Timeout(self.timeout))??;

        let response: SenderResponse = serde_json::from_slice(&body)?;
        if response.response != "success" {
            return Err(TrapperError::Rejected(response.info));
        }

        let summary = parse_info(&response.info);
        info!(
            "Sent {} items to {}:{} (processed {}, failed {})",
            items.len(),
            self.server,
            self.port,
            summary.processed,
            summary.failed
        );
        Ok(summary)
    }

    async fn exchange(&self, frame: Vec<u8>) -> Result<Vec<u8>, TrapperError> {
        let mut stream = TcpStream::connect((self.server.as_str(), self.port)).await?;
        stream.write_all(&frame).await?;
        stream.flush().await?;
        debug!("Wrote {} byte frame to trapper", frame.len());

        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await?;
        let len = parse_header(&header)?;
        if len > MAX_RESPONSE {
            return Err(TrapperError::TooLarge(len));
        }

        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).await?;
        Ok(body)
    }
}
