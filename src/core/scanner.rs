/// Template scanner - finds balanced `{...}` blocks in free text and drives
/// recursive substitution.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::context::{DiagnosticKind, EvaluationContext, Frame};
use crate::core::evaluator::Mode;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("unclosed brace at offset {0}")]
    Unclosed(usize),
    #[error("unmatched closing brace at offset {0}")]
    UnmatchedClose(usize),
}

/// A segment of a scanned template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateSegment {
    /// Literal text, emitted as-is.
    Literal(String),
    /// The contents of one top-level `{...}` block, braces stripped.
    Block(String),
}

/// A scanned template - a sequence of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub segments: Vec<TemplateSegment>,
}

impl Template {
    /// Scan a template, failing on the first unbalanced brace.
    ///
    /// Blocks nest: `{ a {b} c }` is one block whose contents are
    /// ` a {b} c `. Inside a block, quoted strings may hold literal braces.
    pub fn parse(input: &str) -> Result<Template, ScanError> {
        let (template, errors) = scan(input, false);
        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(template),
        }
    }

    /// Scan a template, keeping unbalanced braces as literal text.
    pub fn parse_lenient(input: &str) -> (Template, Vec<ScanError>) {
        scan(input, false)
    }

    /// The contents of the template's only block, if the template is exactly
    /// one block (surrounding whitespace allowed).
    pub fn single_block(&self) -> Option<&str> {
        let mut block = None;
        for segment in &self.segments {
            match segment {
                TemplateSegment::Block(content) if block.is_none() => block = Some(content.as_str()),
                TemplateSegment::Literal(text) if text.trim().is_empty() => {}
                _ => return None,
            }
        }
        block
    }

    pub fn blocks(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            TemplateSegment::Block(content) => Some(content.as_str()),
            TemplateSegment::Literal(_) => None,
        })
    }
}

/// Scan `input`. With `quotes_at_top`, quoted regions outside blocks are
/// copied through untouched (used for text that already sits inside a block).
fn scan(input: &str, quotes_at_top: bool) -> (Template, Vec<ScanError>) {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut segments = Vec::new();
    let mut errors = Vec::new();
    let mut literal_buf = String::new();
    let mut i = 0;

    while i < len {
        let c = chars[i];
        if quotes_at_top && is_quote(c) && opens_quote(previous_significant(&chars, i)) {
            if let Some(close) = quote_end(&chars, i) {
                literal_buf.extend(&chars[i..=close]);
                i = close + 1;
                continue;
            }
        }

        if c == '{' {
            match block_end(&chars, i) {
                Some(end) => {
                    if !literal_buf.is_empty() {
                        segments.push(TemplateSegment::Literal(std::mem::take(&mut literal_buf)));
                    }
                    segments.push(TemplateSegment::Block(chars[i + 1..end].iter().collect()));
                    i = end + 1;
                }
                None => {
                    errors.push(ScanError::Unclosed(i));
                    literal_buf.extend(&chars[i..]);
                    break;
                }
            }
        } else {
            if c == '}' {
                errors.push(ScanError::UnmatchedClose(i));
            }
            literal_buf.push(c);
            i += 1;
        }
    }

    if !literal_buf.is_empty() {
        segments.push(TemplateSegment::Literal(literal_buf));
    }

    (Template { segments }, errors)
}

/// Index of the `}` matching the `{` at `open`. Quotes are honoured first;
/// if that leaves the block unterminated, plain depth counting is used.
fn block_end(chars: &[char], open: usize) -> Option<usize> {
    matching_brace(chars, open, true).or_else(|| matching_brace(chars, open, false))
}

fn matching_brace(chars: &[char], open: usize, honour_quotes: bool) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            q if honour_quotes && is_quote(q) && opens_quote(previous_significant(chars, i)) => {
                i = quote_end(chars, i)?;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

pub(crate) fn is_quote(c: char) -> bool {
    c == '\'' || c == '"'
}

/// A quote opens a string unless it directly follows a word character, so
/// apostrophes in words like `don't` stay literal.
pub(crate) fn opens_quote(previous: Option<char>) -> bool {
    previous.map_or(true, |p| !p.is_alphanumeric())
}

/// The character before `i`, if any.
pub(crate) fn previous_significant(chars: &[char], i: usize) -> Option<char> {
    if i == 0 {
        None
    } else {
        Some(chars[i - 1])
    }
}

/// Index of the quote closing the one at `open`.
pub(crate) fn quote_end(chars: &[char], open: usize) -> Option<usize> {
    let quote = chars[open];
    chars[open + 1..]
        .iter()
        .position(|&c| c == quote)
        .map(|offset| open + 1 + offset)
}

impl EvaluationContext<'_> {
    /// Substitute every block of `input` with its evaluated text.
    ///
    /// Text without `{` is returned unchanged. Block results that still
    /// contain braces are re-scanned one level deeper until the depth
    /// ceiling, after which the raw result is kept.
    pub(crate) fn expand_text(&mut self, input: &str, frame: &Frame) -> String {
        self.expand(input, frame, false)
    }

    /// Like [`expand_text`](Self::expand_text) for text inside a block:
    /// quoted strings are left untouched.
    pub(crate) fn expand_inner(&mut self, input: &str, frame: &Frame) -> String {
        self.expand(input, frame, true)
    }

    fn expand(&mut self, input: &str, frame: &Frame, quotes_at_top: bool) -> String {
        if !input.contains('{') {
            return input.to_string();
        }

        let (template, errors) = scan(input, quotes_at_top);
        if let Some(err) = errors.first() {
            self.record(DiagnosticKind::UnbalancedBraces, err.to_string(), input);
        }

        let mut output = String::new();
        for segment in &template.segments {
            match segment {
                TemplateSegment::Literal(text) => output.push_str(text),
                TemplateSegment::Block(content) => {
                    let outcome = self.evaluate_content(content, frame, Mode::Text);
                    let text = outcome.value.to_string();
                    if outcome.settled || !text.contains('{') {
                        output.push_str(&text);
                    } else {
                        match self.descend(frame, &text) {
                            Some(inner) => output.push_str(&self.expand_text(&text, &inner)),
                            None => output.push_str(&text),
                        }
                    }
                }
            }
        }
        output
    }
}
