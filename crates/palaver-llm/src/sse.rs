//! # SSE Parser
//!
//! Splits a chunked HTTP body into Server-Sent Events `data:` payloads:
//! - Line buffering across chunk boundaries
//! - `data: ` prefix extraction
//! - Comment, empty and `[DONE]` line filtering
//!
//! A transport error ends the stream after yielding it once.

use std::fmt::Display;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use palaver_core::UpstreamError;

/// Parse SSE lines from a byte stream and yield the data payloads.
pub fn parse_sse_lines<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, UpstreamError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send,
{
    futures::stream::unfold(
        (byte_stream, BytesMut::with_capacity(8192), false),
        |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }

                    let Ok(line) = std::str::from_utf8(&line_bytes) else {
                        continue;
                    };

                    if let Some(data) = extract_sse_data(line) {
                        return Some((Ok(data), (stream, buffer, false)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        let err = UpstreamError::StreamInterrupted(e.to_string());
                        return Some((Err(err), (stream, buffer, true)));
                    }
                    None => {
                        // Trailing line without a newline.
                        let data = std::str::from_utf8(&buffer).ok().and_then(extract_sse_data);
                        buffer.clear();
                        return data.map(|d| (Ok(d), (stream, buffer, true)));
                    }
                }
            }
        },
    )
}

/// Extract the data payload from one SSE line.
///
/// Returns `None` for comments, empty lines, non-data fields and `[DONE]`.
pub fn extract_sse_data(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();

    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
