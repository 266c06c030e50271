//! Server-sent events decoding shared by the HTTP providers.

use crate::error::{ProviderError, ProviderResult};
use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;

/// One decoded SSE event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; empty when the server omits it.
    pub event: String,
    /// `data:` field, multiple data lines joined with `\n`.
    pub data: String,
}

/// Incremental SSE decoder over a text buffer.
///
/// Network chunks may end in the middle of a UTF-8 sequence; those trailing
/// bytes wait in `pending` until the rest of the character arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes received from the network.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // Incomplete sequence at the end: keep it for the next chunk.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let decoded: Vec<u8> = self.pending.drain(..complete).collect();
        self.buffer.push_str(&String::from_utf8_lossy(&decoded));

        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
    }

    /// Extract the next complete event, if the buffer holds one.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            // Look for double newline (event boundary)
            let end = self.buffer.find("\n\n")?;
            let block: String = self.buffer.drain(..end + 2).collect();

            let mut event = SseEvent::default();
            let mut data_lines = Vec::new();
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    event.event = value.trim_start().to_string();
                } else if let Some(value) = line.strip_prefix("data:") {
                    data_lines.push(value.strip_prefix(' ').unwrap_or(value));
                }
            }
            event.data = data_lines.join("\n");

            // Comment-only or empty blocks carry nothing.
            if !event.event.is_empty() || !event.data.is_empty() {
                return Some(event);
            }
        }
    }
}

/// Decode an HTTP response body into SSE events.
pub fn events(response: reqwest::Response) -> BoxStream<'static, ProviderResult<SseEvent>> {
    Box::pin(try_stream! {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(ProviderError::RequestFailed)?;
            decoder.push(&chunk);
            while let Some(event) = decoder.next_event() {
                yield event;
            }
        }

        // Flush a trailing event the server did not terminate.
        decoder.push(b"\n\n");
        while let Some(event) = decoder.next_event() {
            yield event;
        }
    })
}
