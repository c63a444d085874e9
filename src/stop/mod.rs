//! Stop conditions evaluated after every step of a multi-step run.
//!
//! A run keeps going while it has tool results to feed back. A stop
//! condition ends it early; any one condition returning `true` is enough.

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::Step;

/// Trait for conditions that end a run after a step.
#[async_trait]
pub trait StopCondition: Send + Sync {
    /// Check whether the run should stop given all steps so far. The last
    /// element is the step that just finished.
    async fn should_stop(&self, steps: &[Step]) -> bool;
}

/// Stop once the run has produced `n` steps.
#[derive(Debug, Clone, Copy)]
pub struct StepCountIs {
    count: usize,
}

impl StepCountIs {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

#[async_trait]
impl StopCondition for StepCountIs {
    async fn should_stop(&self, steps: &[Step]) -> bool {
        steps.len() >= self.count
    }
}

/// Stop when the last step called the named tool.
#[derive(Debug, Clone)]
pub struct HasToolCall {
    tool_name: String,
}

impl HasToolCall {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
        }
    }
}

#[async_trait]
impl StopCondition for HasToolCall {
    async fn should_stop(&self, steps: &[Step]) -> bool {
        steps.last().is_some_and(|step| {
            step.tool_calls()
                .iter()
                .any(|call| call.tool_name == self.tool_name)
        })
    }
}

/// Stop when the run's accumulated text matches a regex.
#[derive(Debug, Clone)]
pub struct TextMatches {
    regex: regex::Regex,
}

impl TextMatches {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: regex::Regex::new(pattern)?,
        })
    }
}

#[async_trait]
impl StopCondition for TextMatches {
    async fn should_stop(&self, steps: &[Step]) -> bool {
        let text: String = steps.iter().map(Step::text).collect();
        self.regex.is_match(&text)
    }
}

/// Stop when a custom predicate returns true.
pub struct PredicateStop<F: Fn(&[Step]) -> bool + Send + Sync> {
    predicate: F,
}

impl<F: Fn(&[Step]) -> bool + Send + Sync> PredicateStop<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl<F: Fn(&[Step]) -> bool + Send + Sync> StopCondition for PredicateStop<F> {
    async fn should_stop(&self, steps: &[Step]) -> bool {
        (self.predicate)(steps)
    }
}

pub fn step_count_is(count: usize) -> Arc<dyn StopCondition> {
    Arc::new(StepCountIs::new(count))
}

pub fn has_tool_call(tool_name: impl Into<String>) -> Arc<dyn StopCondition> {
    Arc::new(HasToolCall::new(tool_name))
}

pub fn text_matches(pattern: &str) -> Result<Arc<dyn StopCondition>, regex::Error> {
    Ok(Arc::new(TextMatches::new(pattern)?))
}

/// True if any condition says stop.
pub async fn any_should_stop(conditions: &[Arc<dyn StopCondition>], steps: &[Step]) -> bool {
    for condition in conditions {
        if condition.should_stop(steps).await {
            return true;
        }
    }
    false
}
