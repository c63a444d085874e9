//! Repair a truncated JSON document by closing whatever is still open.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Root,
    Finish,
    /// `key` strings are object keys: their content is never committed on its own.
    String { key: bool },
    StringEscape { key: bool },
    StringUnicode { key: bool, digits: u8 },
    Literal,
    Number,
    ObjectStart,
    ObjectAfterKey,
    ObjectBeforeValue,
    ObjectAfterValue,
    ObjectAfterComma,
    ArrayStart,
    ArrayAfterValue,
    ArrayAfterComma,
}

const LITERALS: [&str; 3] = ["true", "false", "null"];

struct Scanner<'a> {
    input: &'a str,
    stack: Vec<State>,
    /// Byte offset one past the last character that belongs to a valid prefix.
    valid_end: usize,
    literal_start: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            stack: vec![State::Root],
            valid_end: 0,
            literal_start: 0,
        }
    }

    fn top(&self) -> Option<State> {
        self.stack.last().copied()
    }

    fn replace_top(&mut self, state: State) {
        self.stack.pop();
        self.stack.push(state);
    }

    fn commit(&mut self, i: usize, c: char) {
        self.valid_end = i + c.len_utf8();
    }

    fn value_start(&mut self, i: usize, c: char, after: State) {
        match c {
            '"' => {
                self.commit(i, c);
                self.replace_top(after);
                self.stack.push(State::String { key: false });
            }
            't' | 'f' | 'n' => {
                self.commit(i, c);
                self.literal_start = i;
                self.replace_top(after);
                self.stack.push(State::Literal);
            }
            '-' => {
                self.replace_top(after);
                self.stack.push(State::Number);
            }
            '0'..='9' => {
                self.commit(i, c);
                self.replace_top(after);
                self.stack.push(State::Number);
            }
            '{' => {
                self.commit(i, c);
                self.replace_top(after);
                self.stack.push(State::ObjectStart);
            }
            '[' => {
                self.commit(i, c);
                self.replace_top(after);
                self.stack.push(State::ArrayStart);
            }
            _ => {}
        }
    }

    fn after_object_value(&mut self, i: usize, c: char) {
        match c {
            ',' => self.replace_top(State::ObjectAfterComma),
            '}' => {
                self.commit(i, c);
                self.stack.pop();
            }
            _ => {}
        }
    }

    fn after_array_value(&mut self, i: usize, c: char) {
        match c {
            ',' => self.replace_top(State::ArrayAfterComma),
            ']' => {
                self.commit(i, c);
                self.stack.pop();
            }
            _ => {}
        }
    }

    /// Hand a delimiter that ended a scalar to the enclosing container.
    fn close_scalar(&mut self, i: usize, c: char) {
        self.stack.pop();
        match self.top() {
            Some(State::ObjectAfterValue) => self.after_object_value(i, c),
            Some(State::ArrayAfterValue) => self.after_array_value(i, c),
            _ => {}
        }
    }

    fn step(&mut self, i: usize, c: char) {
        let Some(state) = self.top() else {
            return;
        };
        match state {
            State::Root => self.value_start(i, c, State::Finish),
            State::Finish => {}
            State::ObjectStart => match c {
                '"' => {
                    self.replace_top(State::ObjectAfterKey);
                    self.stack.push(State::String { key: true });
                }
                '}' => {
                    self.commit(i, c);
                    self.stack.pop();
                }
                _ => {}
            },
            State::ObjectAfterComma => {
                if c == '"' {
                    self.replace_top(State::ObjectAfterKey);
                    self.stack.push(State::String { key: true });
                }
            }
            State::ObjectAfterKey => {
                if c == ':' {
                    self.replace_top(State::ObjectBeforeValue);
                }
            }
            State::ObjectBeforeValue => self.value_start(i, c, State::ObjectAfterValue),
            State::ObjectAfterValue => self.after_object_value(i, c),
            State::String { key } => match c {
                '"' => {
                    self.stack.pop();
                    if !key {
                        self.commit(i, c);
                    }
                }
                '\\' => self.stack.push(State::StringEscape { key }),
                _ => {
                    if !key {
                        self.commit(i, c);
                    }
                }
            },
            State::StringEscape { key } => {
                if c == 'u' {
                    self.replace_top(State::StringUnicode { key, digits: 0 });
                } else {
                    self.stack.pop();
                    if !key {
                        self.commit(i, c);
                    }
                }
            }
            State::StringUnicode { key, digits } => {
                if c.is_ascii_hexdigit() {
                    if digits == 3 {
                        self.stack.pop();
                        if !key {
                            self.commit(i, c);
                        }
                    } else {
                        self.replace_top(State::StringUnicode {
                            key,
                            digits: digits + 1,
                        });
                    }
                } else {
                    // Malformed escape: nothing past this point can be repaired.
                    self.stack.pop();
                }
            }
            State::ArrayStart => {
                if c == ']' {
                    self.commit(i, c);
                    self.stack.pop();
                } else {
                    self.value_start(i, c, State::ArrayAfterValue);
                }
            }
            State::ArrayAfterValue => self.after_array_value(i, c),
            State::ArrayAfterComma => self.value_start(i, c, State::ArrayAfterValue),
            State::Number => match c {
                '0'..='9' => self.commit(i, c),
                'e' | 'E' | '-' | '+' | '.' => {}
                ',' | '}' | ']' => self.close_scalar(i, c),
                _ => {
                    self.stack.pop();
                }
            },
            State::Literal => {
                let end = i + c.len_utf8();
                let partial = &self.input[self.literal_start..end];
                if LITERALS.iter().any(|lit| lit.starts_with(partial)) {
                    self.commit(i, c);
                } else {
                    self.close_scalar(i, c);
                }
            }
        }
    }

    fn finish(self) -> String {
        let mut out = self.input[..self.valid_end].to_string();
        for state in self.stack.iter().rev() {
            match state {
                State::String { key: false } => out.push('"'),
                State::ObjectStart
                | State::ObjectAfterKey
                | State::ObjectBeforeValue
                | State::ObjectAfterValue
                | State::ObjectAfterComma => out.push('}'),
                State::ArrayStart | State::ArrayAfterValue | State::ArrayAfterComma => {
                    out.push(']')
                }
                State::Literal => {
                    let partial = &self.input[self.literal_start..];
                    if let Some(lit) = LITERALS.iter().find(|lit| lit.starts_with(partial)) {
                        out.push_str(&lit[partial.len()..]);
                    }
                }
                _ => {}
            }
        }
        out
    }
}

/// Close every open string, literal, array and object in `input`.
///
/// Dangling object keys are dropped, partial `true`/`false`/`null` literals are
/// completed, and trailing characters that cannot belong to a valid document
/// (a lone `-`, an exponent marker, half of a `\u` escape) are cut off.
pub fn fix_json(input: &str) -> String {
    let mut scanner = Scanner::new(input);
    for (i, c) in input.char_indices() {
        scanner.step(i, c);
    }
    scanner.finish()
}
