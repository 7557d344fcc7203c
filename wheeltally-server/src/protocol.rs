//! Live event protocol: one JSON object per line, `{"event": ..., "payload": ...}`.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use wheeltally_engine::{Color, TickRecord};

/// Payload of the completion event.
pub const COMPLETED_MARKER: &str = "fin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Requested number of ticks; validated by the session.
    StartRequest(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub tick: u32,
    pub tick_limit: u32,
    pub outcome: u8,
    pub color: Color,
}

impl Progress {
    #[must_use]
    pub fn from_record(record: &TickRecord, tick_limit: u32) -> Self {
        Self {
            tick: record.tick,
            tick_limit,
            outcome: record.outcome.number(),
            color: record.classification.color,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    Info(String),
    Progress(Progress),
    Completed(String),
    Error(String),
}

impl ServerEvent {
    #[must_use]
    pub fn completed() -> Self {
        Self::Completed(COMPLETED_MARKER.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed event line: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("connection write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse one client line, ignoring surrounding whitespace.
pub fn parse_client_line(line: &str) -> Result<ClientEvent, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Serialize and write one event followed by a newline.
pub async fn write_event<W>(writer: &mut W, event: &ServerEvent) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
