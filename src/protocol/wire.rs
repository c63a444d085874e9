//! Line-delimited wire records: `<code>:<json>\n`.
//!
//! The JSON payload is self-describing through its `type` field; the code is
//! a one-character prefix that lets clients dispatch without parsing.

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::BraidError;
use crate::types::StreamPart;
use crate::ui::UiChunk;

/// Version of the part stream protocol, sent as `x-braid-stream`.
pub const PROTOCOL_VERSION: &str = "v1";
/// Version of the UI chunk protocol.
pub const UI_PROTOCOL_VERSION: &str = "ui-v1";

/// A record that can travel over the wire.
pub trait WireRecord: Serialize + DeserializeOwned + Send + 'static {
    fn code(&self) -> char;

    /// Whether the record closes the stream.
    fn is_terminal(&self) -> bool;
}

impl WireRecord for StreamPart {
    fn code(&self) -> char {
        match self {
            Self::TextDelta { .. } => '0',
            Self::ReasoningDelta { .. } => 'g',
            Self::ToolInputStart { .. } => 'b',
            Self::ToolCallDelta { .. } => 'c',
            Self::ToolCall(_) => '9',
            Self::ToolResult(_) => 'a',
            Self::Error { .. } => '3',
            Self::Finish { .. } => 'd',
            Self::FinishStep { .. } => 'e',
            Self::StartStep { .. } => 'f',
            Self::Source(_) => 'h',
            Self::File(_) => 'k',
            Self::TextStart { .. } => 'm',
            Self::TextEnd { .. } => 'n',
            Self::ReasoningStart { .. } => 'o',
            Self::ReasoningEnd { .. } => 'p',
            Self::ToolError(_) => 'q',
            Self::ToolApprovalRequest { .. } => 'r',
            Self::Raw { .. } => 'z',
        }
    }

    fn is_terminal(&self) -> bool {
        StreamPart::is_terminal(self)
    }
}

impl WireRecord for UiChunk {
    fn code(&self) -> char {
        match self {
            Self::Start { .. } => 'S',
            Self::Finish { .. } => 'd',
            Self::Abort => 'A',
            Self::StartStep => 'f',
            Self::FinishStep => 'e',
            Self::TextStart { .. } => 'm',
            Self::TextDelta { .. } => '0',
            Self::TextEnd { .. } => 'n',
            Self::ReasoningStart { .. } => 'o',
            Self::ReasoningDelta { .. } => 'g',
            Self::ReasoningEnd { .. } => 'p',
            Self::ToolInputStart { .. } => 'b',
            Self::ToolInputDelta { .. } => 'c',
            Self::ToolInputAvailable { .. } => '9',
            Self::ToolInputError { .. } => 'I',
            Self::ToolApprovalRequest { .. } => 'r',
            Self::ToolOutputAvailable { .. } => 'a',
            Self::ToolOutputError { .. } => 'q',
            Self::ToolOutputDenied { .. } => 'D',
            Self::SourceUrl { .. } => 'h',
            Self::SourceDocument { .. } => 'H',
            Self::File { .. } => 'k',
            Self::Error { .. } => '3',
        }
    }

    fn is_terminal(&self) -> bool {
        UiChunk::is_terminal(self)
    }
}

/// Encode one record as a full line, newline included.
pub fn encode<R: WireRecord>(record: &R) -> Result<String, BraidError> {
    let json = serde_json::to_string(record)?;
    Ok(format!("{}:{}\n", record.code(), json))
}

/// Decode one line (without its newline). The code must match the payload.
pub fn decode_line<R: WireRecord>(line: &str) -> Result<R, BraidError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (code, json) = line
        .split_once(':')
        .ok_or_else(|| BraidError::Stream(format!("malformed wire record: {line:?}")))?;
    let mut chars = code.chars();
    let (Some(code), None) = (chars.next(), chars.next()) else {
        return Err(BraidError::Stream(format!("invalid wire code {code:?}")));
    };
    let record: R = serde_json::from_str(json)?;
    if record.code() != code {
        return Err(BraidError::Stream(format!(
            "wire code {code:?} does not match payload code {:?}",
            record.code()
        )));
    }
    Ok(record)
}

/// Decode a byte stream of records split at arbitrary chunk boundaries.
///
/// Ends after the terminal record. A stream that closes before one arrives
/// yields a final `BraidError::Stream`.
pub fn decode_stream<R, E>(
    bytes: BoxStream<'static, Result<Bytes, E>>,
) -> BoxStream<'static, Result<R, BraidError>>
where
    R: WireRecord,
    E: Into<BraidError> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut bytes = bytes;
        let mut buffer = BytesMut::new();
        let mut terminated = false;

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(err.into());
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);
            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line = buffer.split_to(newline + 1);
                match decode_bytes::<R>(&line) {
                    None => continue,
                    Some(Ok(record)) => {
                        terminated = record.is_terminal();
                        yield Ok(record);
                        if terminated {
                            break 'read;
                        }
                    }
                    Some(Err(err)) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        }

        if !terminated {
            match decode_bytes::<R>(&buffer) {
                Some(Ok(record)) if record.is_terminal() => {
                    yield Ok(record);
                }
                Some(Ok(record)) => {
                    yield Ok(record);
                    yield Err(incomplete());
                }
                Some(Err(err)) => yield Err(err),
                None => yield Err(incomplete()),
            }
        }
    };
    stream.boxed()
}

/// `None` for blank lines.
fn decode_bytes<R: WireRecord>(line: &[u8]) -> Option<Result<R, BraidError>> {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line.trim(),
        Err(err) => return Some(Err(BraidError::Stream(format!("wire record is not utf-8: {err}")))),
    };
    if line.is_empty() {
        return None;
    }
    Some(decode_line(line))
}

fn incomplete() -> BraidError {
    BraidError::Stream("stream closed before a finish record".to_string())
}
