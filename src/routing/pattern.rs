//! URL pattern compilation and matching.
//!
//! # Responsibilities
//! - Compile `google.api.http` style templates into segment lists
//! - Match request paths and capture path variables
//!
//! # Syntax
//! ```text
//! Template = "/" [ Segments ] [ ":" Verb ]
//! Segment  = LITERAL | "*" | "**" | "{" FieldPath [ "=" Segments ] "}"
//! ```
//!
//! # Design Decisions
//! - `**` is only accepted as the final segment
//! - Captured values are percent-decoded, literals are compared verbatim

use percent_encoding::percent_decode_str;
use thiserror::Error;

/// Error raised when a template cannot be compiled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid path pattern `{pattern}`: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    Rest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Capture {
    field: String,
    start: usize,
    end: usize,
}

/// A compiled URL template.
#[derive(Debug, Clone)]
pub struct PathPattern {
    template: String,
    segments: Vec<Segment>,
    captures: Vec<Capture>,
    verb: Option<String>,
}

impl PathPattern {
    /// Compile a template such as `/v1/{name=shelves/*}/books/{id}:publish`.
    pub fn parse(template: &str) -> Result<Self, PatternError> {
        let fail = |reason| PatternError {
            pattern: template.to_owned(),
            reason,
        };

        let body = template
            .strip_prefix('/')
            .ok_or_else(|| fail("must start with `/`"))?;

        let (path, verb) = split_verb(body);
        if verb.is_some_and(str::is_empty) {
            return Err(fail("empty verb"));
        }

        let mut segments = Vec::new();
        let mut captures = Vec::new();

        if !path.is_empty() {
            for part in split_top_level(path).ok_or_else(|| fail("unbalanced braces"))? {
                if let Some(inner) = part.strip_prefix('{') {
                    let inner = inner
                        .strip_suffix('}')
                        .ok_or_else(|| fail("variable must span a whole segment"))?;
                    let (field, sub) = inner.split_once('=').unwrap_or((inner, "*"));
                    if field.is_empty() {
                        return Err(fail("variable without a field name"));
                    }
                    let start = segments.len();
                    for sub_part in sub.split('/') {
                        segments.push(literal_or_wildcard(sub_part).ok_or_else(|| fail("empty segment"))?);
                    }
                    captures.push(Capture {
                        field: field.to_owned(),
                        start,
                        end: segments.len(),
                    });
                } else if part.contains(['{', '}']) {
                    return Err(fail("variable must span a whole segment"));
                } else {
                    segments.push(literal_or_wildcard(part).ok_or_else(|| fail("empty segment"))?);
                }
            }
        }

        if let Some(pos) = segments.iter().position(|s| *s == Segment::Rest) {
            if pos + 1 != segments.len() {
                return Err(fail("`**` must be the last segment"));
            }
        }

        Ok(Self {
            template: template.to_owned(),
            segments,
            captures,
            verb: verb.map(str::to_owned),
        })
    }

    /// The template this pattern was compiled from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Field paths bound by `{...}` variables, in template order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.captures.iter().map(|c| c.field.as_str())
    }

    /// Number of literal segments, used to rank overlapping patterns.
    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
            + usize::from(self.verb.is_some())
    }

    /// Match a request path, returning captured `(field, value)` pairs.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let rest = path.strip_prefix('/')?;
        let rest = match &self.verb {
            Some(verb) => rest.strip_suffix(verb.as_str())?.strip_suffix(':')?,
            None => rest,
        };

        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        let mut spans = Vec::with_capacity(self.segments.len());
        let mut cursor = 0;
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(cursor) != Some(&literal.as_str()) {
                        return None;
                    }
                    spans.push((cursor, cursor + 1));
                    cursor += 1;
                }
                Segment::Single => {
                    if parts.get(cursor).is_none_or(|p| p.is_empty()) {
                        return None;
                    }
                    spans.push((cursor, cursor + 1));
                    cursor += 1;
                }
                Segment::Rest => {
                    spans.push((cursor, parts.len()));
                    cursor = parts.len();
                }
            }
        }
        if cursor != parts.len() {
            return None;
        }

        let mut captured = Vec::with_capacity(self.captures.len());
        for capture in &self.captures {
            let (from, _) = spans[capture.start];
            let (_, to) = spans[capture.end - 1];
            let raw = parts[from..to].join("/");
            let value = percent_decode_str(&raw).decode_utf8().ok()?.into_owned();
            captured.push((capture.field.clone(), value));
        }
        Some(captured)
    }
}

fn literal_or_wildcard(part: &str) -> Option<Segment> {
    match part {
        "" => None,
        "*" => Some(Segment::Single),
        "**" => Some(Segment::Rest),
        literal => Some(Segment::Literal(literal.to_owned())),
    }
}

/// Splits off a trailing `:verb` that follows the last segment.
fn split_verb(body: &str) -> (&str, Option<&str>) {
    let Some(colon) = body.rfind(':') else {
        return (body, None);
    };
    let after_brace = body.rfind('}').is_none_or(|brace| colon > brace);
    let in_last_segment = !body[colon..].contains('/');
    if after_brace && in_last_segment {
        (&body[..colon], Some(&body[colon + 1..]))
    } else {
        (body, None)
    }
}

/// Splits on `/` outside of `{...}`.
fn split_top_level(path: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.checked_sub(1)?,
            '/' if depth == 0 => {
                parts.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    parts.push(&path[start..]);
    Some(parts)
}
