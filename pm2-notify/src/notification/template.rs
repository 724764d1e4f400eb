//! Placeholder templates for notification subjects and bodies.
//!
//! Templates are plain text (usually markdown) with `{name}` placeholders.
//! Dotted names reach into the process block, e.g. `{process.name}`.
//! `{{` and `}}` produce literal braces. A `{` that does not open a valid
//! placeholder name (for example in a JSON snippet) is kept verbatim.

use crate::{Error, Result};

/// Source of placeholder values.
pub trait TemplateFields {
    /// Resolve a placeholder name to its display value.
    fn field(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed template, ready to render many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template text.
    ///
    /// Fails only on a placeholder that is opened and never closed.
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(pos) = rest.find(['{', '}']) {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") {
                literal.push('{');
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with("}}") {
                literal.push('}');
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with('}') {
                literal.push('}');
                rest = &tail[1..];
                continue;
            }

            let Some(close) = tail.find('}') else {
                let offset = source.len() - tail.len();
                return Err(Error::template(format!(
                    "unterminated placeholder at byte {offset}"
                )));
            };

            let name = tail[1..close].trim();
            if is_placeholder_name(name) {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Field(name.to_string()));
                rest = &tail[close + 1..];
            } else {
                // Only the opening brace is literal; a placeholder may follow.
                literal.push('{');
                rest = &tail[1..];
            }
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Original template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template would render to whitespace only.
    pub fn is_blank(&self) -> bool {
        self.segments.iter().all(|s| match s {
            Segment::Literal(text) => text.trim().is_empty(),
            Segment::Field(_) => false,
        })
    }

    /// Placeholder names in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitute every placeholder.
    ///
    /// A placeholder with no value is an error rather than an empty string,
    /// so a broken template never yields a silently truncated notification.
    pub fn render<F: TemplateFields + ?Sized>(&self, fields: &F) -> Result<String> {
        let mut out = String::with_capacity(self.source.len() * 2);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = fields.field(name).ok_or_else(|| {
                        Error::template(format!("no value for placeholder {{{name}}}"))
                    })?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
