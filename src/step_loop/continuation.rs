//! Text rewriting for steps that extend a response truncated by `length`.
//!
//! While a step may still be continued, text is published only up to its last
//! whitespace and the closing `text-end` is held back. A continue step writes
//! into the same text part id, so consumers see one uninterrupted block.
//!
//! The held tail is dropped when the step is continued: the model only sees
//! the published text, so it writes the tail again.

use crate::types::StreamPart;

#[derive(Debug, Default)]
pub(super) struct Continuation {
    enabled: bool,
    /// The current step extends the previous one.
    extending: bool,
    /// No tool call has been seen in this step yet.
    possible: bool,
    /// Id of the text part being extended across steps.
    text_id: Option<String>,
    /// Text after the last whitespace, and the id it belongs to.
    tail: String,
    tail_id: String,
    held_end: Option<String>,
    /// `text-end` of the block carried into a continue step, still owed.
    carried_end: Option<String>,
    /// Some text was published in the current step.
    published: bool,
}

impl Continuation {
    pub(super) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub(super) fn begin_step(&mut self, extending: bool) {
        self.extending = extending && self.enabled;
        self.possible = self.enabled;
        self.published = false;
        if !self.extending {
            self.text_id = None;
        }
    }

    /// Rewrite one text part. Returns the parts to publish now.
    pub(super) fn filter(&mut self, part: StreamPart) -> Vec<StreamPart> {
        if !self.enabled {
            return vec![part];
        }
        match part {
            StreamPart::TextStart { id } => {
                if self.extending && self.text_id.is_some() {
                    return Vec::new();
                }
                let mut out = self.flush();
                self.text_id = Some(id.clone());
                out.push(StreamPart::TextStart { id });
                out
            }
            StreamPart::TextDelta { id, delta } => {
                let id = self.map_id(id);
                if !self.extending {
                    self.text_id = Some(id.clone());
                }
                if !self.possible {
                    self.published = true;
                    return vec![StreamPart::TextDelta { id, delta }];
                }
                let mut out = Vec::new();
                if !self.tail.is_empty() && self.tail_id != id {
                    out.extend(self.flush());
                }
                self.tail_id = id.clone();
                self.tail.push_str(&delta);
                let boundary = self
                    .tail
                    .char_indices()
                    .rev()
                    .find(|(_, c)| c.is_whitespace())
                    .map(|(index, c)| index + c.len_utf8());
                if let Some(boundary) = boundary {
                    let rest = self.tail.split_off(boundary);
                    let ready = std::mem::replace(&mut self.tail, rest);
                    self.published = true;
                    out.push(StreamPart::TextDelta { id, delta: ready });
                }
                out
            }
            StreamPart::TextEnd { id } => {
                let id = self.map_id(id);
                if self.carried_end.as_deref() == Some(id.as_str()) {
                    self.carried_end = None;
                }
                if self.possible {
                    self.held_end = Some(id);
                    Vec::new()
                } else {
                    vec![StreamPart::TextEnd { id }]
                }
            }
            other => vec![other],
        }
    }

    /// A tool call makes continuing impossible for this step.
    pub(super) fn rule_out(&mut self) -> Vec<StreamPart> {
        self.possible = false;
        self.flush()
    }

    /// The next step continues this one. The held `text-end` stays owed until
    /// the block really ends. The tail is dropped, unless this continue step
    /// published nothing else, in which case it is returned for publishing.
    pub(super) fn carry_over(&mut self) -> Vec<StreamPart> {
        if let Some(id) = self.held_end.take() {
            self.carried_end = Some(id);
        }
        if self.extending && !self.published && !self.tail.is_empty() {
            self.published = true;
            return vec![StreamPart::TextDelta {
                id: self.tail_id.clone(),
                delta: std::mem::take(&mut self.tail),
            }];
        }
        self.tail.clear();
        Vec::new()
    }

    /// Publish what the current step held back.
    pub(super) fn flush(&mut self) -> Vec<StreamPart> {
        let mut out = Vec::new();
        if !self.tail.is_empty() {
            out.push(StreamPart::TextDelta {
                id: self.tail_id.clone(),
                delta: std::mem::take(&mut self.tail),
            });
        }
        if let Some(id) = self.held_end.take() {
            if self.carried_end.as_deref() == Some(id.as_str()) {
                self.carried_end = None;
            }
            out.push(StreamPart::TextEnd { id });
        }
        out
    }

    /// Publish everything held back, closing a carried block that the last
    /// step never ended.
    pub(super) fn finish(&mut self) -> Vec<StreamPart> {
        let mut out = self.flush();
        if let Some(id) = self.carried_end.take() {
            out.push(StreamPart::TextEnd { id });
        }
        out
    }

    fn map_id(&self, id: String) -> String {
        match (&self.text_id, self.extending) {
            (Some(carried), true) => carried.clone(),
            _ => id,
        }
    }
}
