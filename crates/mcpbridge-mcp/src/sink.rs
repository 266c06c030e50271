//! Outbound notification delivery.
//!
//! A [`NotificationSink`] is whatever carries server-to-client notifications:
//! the stdio pipe of an MCP server, an in-process channel, or a test double.

use crate::error::{McpError, McpResult};
use crate::protocol::JsonRpcNotification;
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

/// Sink for JSON-RPC notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification. Errors describe transport failures only.
    async fn send_notification(&self, notification: JsonRpcNotification) -> McpResult<()>;
}

/// Sink that forwards notifications into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<JsonRpcNotification>,
}

impl ChannelSink {
    /// Create a sink together with the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JsonRpcNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn send_notification(&self, notification: JsonRpcNotification) -> McpResult<()> {
        self.tx
            .send(notification)
            .map_err(|_| McpError::connection_failed("notification channel closed"))
    }
}

/// Sink writing newline-delimited JSON, the framing of the MCP stdio transport.
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W> WriterSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl WriterSink<tokio::io::Stdout> {
    /// Sink writing to the process stdout.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> NotificationSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_notification(&self, notification: JsonRpcNotification) -> McpResult<()> {
        let mut line = serde_json::to_vec(&notification)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}
