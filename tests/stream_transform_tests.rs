//! Tests for stream transforms applied to a run's views.

mod common;

use std::sync::Arc;
use std::time::Duration;

use braid::generation::stream_text;
use braid::prelude::*;
use braid::stream_transform::{Chunking, FilterTransform, MapTextTransform, SmoothStream};
use braid::util::retry::RetryPolicy;
use common::{text_step, type_names, MockProvider, Script};
use futures::StreamExt;
use pretty_assertions::assert_eq;

fn request(chunks: &[&str]) -> RunRequest {
    RunRequest::new(
        MockProvider::arc(vec![Script::Parts(text_step("t1", chunks, FinishReason::Stop))]),
        vec![ModelMessage::user("Hi")],
    )
    .with_retry(RetryPolicy::none())
}

#[tokio::test]
async fn map_transform_rewrites_every_view() {
    let result = stream_text(
        request(&["hello", " world"])
            .with_transform(Arc::new(MapTextTransform::new(|text| text.to_uppercase()))),
    );
    let full = result.full_stream();
    let text: Vec<String> = result.text_stream().collect().await;
    assert_eq!(text, vec!["HELLO", " WORLD"]);

    let parts: Vec<StreamPart> = full.collect().await;
    assert!(parts.contains(&StreamPart::text_delta("t1", "HELLO")));
}

#[tokio::test]
async fn filter_transform_never_drops_the_terminal_part() {
    let result = stream_text(
        request(&["a", "b"]).with_transform(Arc::new(FilterTransform::new(|part| {
            !matches!(part, StreamPart::TextDelta { .. })
        }))),
    );
    let parts: Vec<StreamPart> = result.full_stream().collect().await;
    assert_eq!(
        type_names(&parts),
        vec!["start-step", "text-start", "text-end", "finish-step", "finish"]
    );
}

#[tokio::test(start_paused = true)]
async fn smooth_stream_rechunks_by_word() {
    let result = stream_text(
        request(&["The qu", "ick brown", " fox"]).with_transform(Arc::new(SmoothStream::new(
            Chunking::Word,
            Some(Duration::from_millis(10)),
        ))),
    );
    let text: Vec<String> = result.text_stream().collect().await;
    assert_eq!(text, vec!["The ", "quick ", "brown ", "fox"]);
}

#[tokio::test]
async fn transforms_apply_in_registration_order() {
    let result = stream_text(
        request(&["one two"])
            .with_transform(Arc::new(SmoothStream::new(Chunking::Word, None)))
            .with_transform(Arc::new(MapTextTransform::new(|text| format!("[{text}]")))),
    );
    let text: Vec<String> = result.text_stream().collect().await;
    assert_eq!(text, vec!["[one ]", "[two]"]);
}
