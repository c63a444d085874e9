//! Streaming HTTP responses.
//!
//! Responses are framework-neutral: a status, headers and a byte stream,
//! convertible into an [`http::Response`].

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use http::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::StatusCode;

use crate::error::BraidError;
use crate::protocol::{encode, WireRecord, PROTOCOL_VERSION, UI_PROTOCOL_VERSION};
use crate::types::StreamPart;
use crate::ui::UiChunk;

/// Header carrying the stream protocol version.
pub const STREAM_VERSION_HEADER: &str = "x-braid-stream";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

pub type ByteStream = BoxStream<'static, Result<Bytes, BraidError>>;

/// A streaming response ready to hand to an HTTP server.
pub struct StreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl StreamResponse {
    fn new(headers: HeaderMap, body: ByteStream) -> Self {
        Self {
            status: StatusCode::OK,
            headers,
            body,
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add or replace a header. Invalid names or values are rejected.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, BraidError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| BraidError::Configuration(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| BraidError::Configuration(format!("invalid header value {value:?}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn into_http(self) -> http::Response<ByteStream> {
        let mut response = http::Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers
}

/// Framing headers for a record stream of the given protocol version.
pub fn stream_headers(version: &'static str) -> HeaderMap {
    let mut headers = base_headers();
    headers.insert(
        HeaderName::from_static(STREAM_VERSION_HEADER),
        HeaderValue::from_static(version),
    );
    headers
}

fn record_body<R: WireRecord>(records: BoxStream<'static, R>) -> ByteStream {
    records
        .map(|record| encode(&record).map(Bytes::from))
        .boxed()
}

/// Every stream part as a wire record.
pub fn part_stream_response(parts: BoxStream<'static, StreamPart>) -> StreamResponse {
    StreamResponse::new(stream_headers(PROTOCOL_VERSION), record_body(parts))
}

/// UI chunks as wire records.
pub fn ui_stream_response(chunks: BoxStream<'static, UiChunk>) -> StreamResponse {
    StreamResponse::new(stream_headers(UI_PROTOCOL_VERSION), record_body(chunks))
}

/// Bare text deltas, no framing.
pub fn text_stream_response(text: BoxStream<'static, String>) -> StreamResponse {
    StreamResponse::new(
        base_headers(),
        text.map(|delta| Ok(Bytes::from(delta))).boxed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_stream;
    use crate::types::FinishReason;
    use pretty_assertions::assert_eq;

    fn parts() -> BoxStream<'static, StreamPart> {
        futures::stream::iter(vec![
            StreamPart::text_delta("t", "Hi"),
            StreamPart::Finish {
                finish_reason: FinishReason::Stop,
                total_usage: None,
            },
        ])
        .boxed()
    }

    #[test]
    fn part_streams_carry_framing_headers() {
        let response = part_stream_response(parts());
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers[CONTENT_TYPE], TEXT_PLAIN);
        assert_eq!(response.headers[CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers[CONNECTION], "keep-alive");
        assert_eq!(response.headers["x-accel-buffering"], "no");
        assert_eq!(response.headers[STREAM_VERSION_HEADER], "v1");

        let ui = ui_stream_response(futures::stream::iter(vec![UiChunk::Abort]).boxed());
        assert_eq!(ui.headers[STREAM_VERSION_HEADER], "ui-v1");
    }

    #[tokio::test]
    async fn body_round_trips_through_the_decoder() {
        let response = part_stream_response(parts());
        let decoded: Vec<StreamPart> = decode_stream(response.body)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(decoded.len(), 2);
        assert!(decoded[1].is_terminal());
    }

    #[tokio::test]
    async fn text_responses_are_plain() {
        let response = text_stream_response(
            futures::stream::iter(vec!["Hello".to_string(), " world".to_string()]).boxed(),
        );
        assert!(response.headers.get(STREAM_VERSION_HEADER).is_none());
        let http = response
            .with_header("x-request-id", "r1")
            .unwrap()
            .into_http();
        assert_eq!(http.headers()["x-request-id"], "r1");
        let body: Vec<Bytes> = http.into_body().map(|b| b.unwrap()).collect().await;
        assert_eq!(body.concat(), b"Hello world");
    }
}
