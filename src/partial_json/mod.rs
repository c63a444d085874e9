//! Incremental JSON parsing for text that is still streaming in.
//!
//! [`parse_partial`] is a pure function of its input, so it can be called on
//! the accumulated buffer after every delta.

mod fix;

pub use fix::fix_json;

use serde::{Deserialize, Serialize};

/// Best-effort value of a possibly incomplete JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "kebab-case")]
pub enum PartialValue {
    /// The input is a complete document.
    Parsed(serde_json::Value),
    /// The input was repaired by closing open strings and containers.
    Partial(serde_json::Value),
    /// Not enough input to infer any value.
    Undefined,
}

impl PartialValue {
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Parsed(v) | Self::Partial(v) => Some(v),
            Self::Undefined => None,
        }
    }

    pub fn into_value(self) -> Option<serde_json::Value> {
        match self {
            Self::Parsed(v) | Self::Partial(v) => Some(v),
            Self::Undefined => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// Parse a prefix of a JSON document.
///
/// A number at the end of the input is kept as parsed so far; it may still
/// grow on the next delta. A bare top-level number that happens to be valid
/// JSON is reported as [`PartialValue::Parsed`].
pub fn parse_partial(text: &str) -> PartialValue {
    if text.trim().is_empty() {
        return PartialValue::Undefined;
    }
    if let Ok(value) = serde_json::from_str(text) {
        return PartialValue::Parsed(value);
    }
    match serde_json::from_str(&fix_json(text)) {
        Ok(value) => PartialValue::Partial(value),
        Err(_) => PartialValue::Undefined,
    }
}
