//! Token usage types.

use serde::{Deserialize, Serialize};

/// Token usage for a generation step.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            ..Default::default()
        }
    }

    /// Merge another usage into this one (accumulate).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(v) = other.cache_read_tokens {
            *self.cache_read_tokens.get_or_insert(0) += v;
        }
        if let Some(v) = other.reasoning_tokens {
            *self.reasoning_tokens.get_or_insert(0) += v;
        }
    }

    /// Sum per-step usage.
    ///
    /// Defined only when every step reported usage: a single unreported step
    /// (or no steps at all) yields `None`.
    pub fn sum<'a>(steps: impl IntoIterator<Item = Option<&'a Usage>>) -> Option<Usage> {
        let mut total: Option<Usage> = None;
        for usage in steps {
            let usage = usage?;
            total.get_or_insert_with(Usage::default).merge(usage);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_requires_every_step() {
        let a = Usage::new(1, 2);
        let b = Usage::new(3, 4);
        assert_eq!(Usage::sum([Some(&a), Some(&b)]), Some(Usage::new(4, 6)));
        assert_eq!(Usage::sum([Some(&a), None]), None);
        assert_eq!(Usage::sum(std::iter::empty()), None);
    }

    #[test]
    fn merge_keeps_optional_counters() {
        let mut a = Usage::new(1, 1);
        let b = Usage {
            reasoning_tokens: Some(5),
            ..Usage::new(1, 1)
        };
        a.merge(&b);
        assert_eq!(a.reasoning_tokens, Some(5));
        assert_eq!(a.cache_read_tokens, None);
        assert_eq!(a.total_tokens, 4);
    }
}
