//! Property tests for incremental JSON parsing.

use braid::partial_json::{parse_partial, PartialValue};
use proptest::prelude::*;
use serde_json::Value;

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ,:{}\\[\\]\"\\\\é東\n]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z\"]{1,6}", inner, 0..6)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn prefixes(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(i, _)| &text[..i])
        .chain(std::iter::once(text))
        .collect()
}

/// A partial value never disagrees with the final document about the kind
/// of value found at any key path.
fn consistent_with(partial: &Value, full: &Value) -> bool {
    match (partial, full) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(_), Value::Bool(_)) => true,
        (Value::Number(_), Value::Number(_)) => true,
        (Value::String(p), Value::String(f)) => f.starts_with(p.as_str()),
        (Value::Array(p), Value::Array(f)) => {
            p.len() <= f.len() && p.iter().zip(f).all(|(a, b)| consistent_with(a, b))
        }
        (Value::Object(p), Value::Object(f)) => p
            .iter()
            .all(|(k, v)| f.get(k).is_some_and(|fv| consistent_with(v, fv))),
        _ => false,
    }
}

proptest! {
    #[test]
    fn full_serialization_parses_to_the_document(doc in json_value()) {
        let text = serde_json::to_string(&doc).unwrap();
        prop_assert_eq!(parse_partial(&text), PartialValue::Parsed(doc.clone()));

        let pretty = serde_json::to_string_pretty(&doc).unwrap();
        prop_assert_eq!(parse_partial(&pretty), PartialValue::Parsed(doc));
    }

    #[test]
    fn every_prefix_keeps_the_final_shape(doc in json_value()) {
        let text = serde_json::to_string(&doc).unwrap();
        for prefix in prefixes(&text) {
            if let Some(value) = parse_partial(prefix).value() {
                prop_assert!(
                    consistent_with(value, &doc),
                    "prefix {:?} produced {} for {}",
                    prefix,
                    value,
                    doc
                );
            }
        }
    }

    #[test]
    fn arbitrary_text_never_panics(text in "\\PC{0,64}") {
        let _ = parse_partial(&text);
    }
}

#[test]
fn streaming_an_object_grows_monotonically() {
    let text = r#"{"title": "Rust", "tags": ["fast", "safe"], "stars": 42}"#;
    let mut seen = Vec::new();
    for prefix in prefixes(text) {
        if let Some(value) = parse_partial(prefix).into_value() {
            if seen.last() != Some(&value) {
                seen.push(value);
            }
        }
    }
    assert_eq!(seen.first(), Some(&serde_json::json!({})));
    assert_eq!(
        seen.last(),
        Some(&serde_json::json!({"title": "Rust", "tags": ["fast", "safe"], "stars": 42}))
    );
}
