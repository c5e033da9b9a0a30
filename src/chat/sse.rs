//! # Upstream SSE decoding
//!
//! The completion service streams Server-Sent Events: `data: <json>` lines
//! separated by blank lines, closed by `data: [DONE]`. This module turns the
//! raw HTTP byte stream into the sequence of `data` payloads:
//! - Line buffering across arbitrary chunk boundaries
//! - `data:` prefix extraction (with or without the space)
//! - Comment, blank and non-`data` field lines skipped
//! - `[DONE]` ends the sequence normally
//!
//! Unlike a lenient parser, failures are surfaced rather than swallowed: a
//! transport error, a line that is not UTF-8, or end-of-body before `[DONE]`
//! is yielded as one `Err` item, after which the stream ends.

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::errors::RelayError;

const DONE_MARKER: &str = "[DONE]";

enum Line {
    Payload(String),
    Done,
    Skip,
}

/// Decode an SSE byte stream into its `data` payloads.
pub fn data_payloads<S>(byte_stream: S) -> BoxStream<'static, Result<String, RelayError>>
where
    S: Stream<Item = Result<Bytes, RelayError>> + Send + 'static,
{
    let state = (byte_stream.boxed(), BytesMut::with_capacity(8192), false);

    futures::stream::unfold(state, |(mut stream, mut buffer, finished)| async move {
        if finished {
            return None;
        }

        loop {
            if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let mut line = buffer.split_to(newline_pos + 1);
                line.truncate(line.len() - 1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }

                match classify(&line) {
                    Ok(Line::Payload(data)) => return Some((Ok(data), (stream, buffer, false))),
                    Ok(Line::Done) => return None,
                    Ok(Line::Skip) => continue,
                    Err(e) => return Some((Err(e), (stream, buffer, true))),
                }
            }

            match stream.next().await {
                Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Some((Err(e), (stream, buffer, true))),
                None => {
                    // A final line without a trailing newline still counts.
                    if !buffer.is_empty() {
                        let rest = buffer.split();
                        match classify(&rest) {
                            Ok(Line::Payload(data)) => {
                                return Some((Ok(data), (stream, buffer, false)));
                            }
                            Ok(Line::Done) => return None,
                            Ok(Line::Skip) => {}
                            Err(e) => return Some((Err(e), (stream, buffer, true))),
                        }
                    }
                    return Some((Err(RelayError::Truncated), (stream, buffer, true)));
                }
            }
        }
    })
    .boxed()
}

fn classify(raw: &[u8]) -> Result<Line, RelayError> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| RelayError::Decode(format!("stream line is not UTF-8: {}", e)))?;
    let trimmed = line.trim();

    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Ok(Line::Skip);
    }

    let Some(data) = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))
    else {
        // event:, id:, retry: carry nothing we use
        return Ok(Line::Skip);
    };

    let data = data.trim();
    if data == DONE_MARKER {
        Ok(Line::Done)
    } else if data.is_empty() {
        Ok(Line::Skip)
    } else {
        Ok(Line::Payload(data.to_string()))
    }
}
