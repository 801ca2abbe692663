use crate::quantity::{Quantity, QuantityError};
use std::{fmt, str::FromStr};

/// A JSONPath-like reference to a field, e.g. `.spec.replicas`,
/// `.metadata.annotations['example.com/size']` or
/// `.spec.containers[0].resources.requests.cpu`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FieldPathError {
    #[error("invalid field path {path:?}: {reason}")]
    Parse { path: String, reason: &'static str },

    #[error("field {0} is missing")]
    Missing(String),

    #[error("field {path}: {source}")]
    Value {
        path: String,
        #[source]
        source: QuantityError,
    },
}

// === impl FieldPath ===

impl FieldPath {
    pub fn lookup<'v>(&self, value: &'v serde_json::Value) -> Option<&'v serde_json::Value> {
        self.segments
            .iter()
            .try_fold(value, |value, segment| match segment {
                Segment::Field(name) => value.get(name.as_str()),
                Segment::Index(i) => value.get(*i),
            })
            .filter(|v| !v.is_null())
    }

    /// Extracts the referenced field as a quantity. A missing field is an
    /// error, not zero.
    pub fn extract(&self, value: &serde_json::Value) -> Result<Quantity, FieldPathError> {
        let field = self
            .lookup(value)
            .ok_or_else(|| FieldPathError::Missing(self.raw.clone()))?;
        Quantity::from_json(field).map_err(|source| FieldPathError::Value {
            path: self.raw.clone(),
            source,
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for FieldPath {
    type Err = FieldPathError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let err = |reason| FieldPathError::Parse {
            path: raw.to_string(),
            reason,
        };

        let mut s = raw.trim();
        if let Some(inner) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            s = inner.trim();
        }
        s = s.strip_prefix('$').unwrap_or(s);

        let mut segments = Vec::new();
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    let mut name = String::new();
                    while let Some(&c) = chars.peek() {
                        if c == '.' || c == '[' {
                            break;
                        }
                        name.push(c);
                        chars.next();
                    }
                    if name.is_empty() {
                        return Err(err("empty field name"));
                    }
                    segments.push(Segment::Field(name));
                }
                '[' => {
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(c) => inner.push(c),
                            None => return Err(err("unterminated bracket")),
                        }
                    }
                    let quoted = inner
                        .strip_prefix('\'')
                        .and_then(|i| i.strip_suffix('\''))
                        .or_else(|| inner.strip_prefix('"').and_then(|i| i.strip_suffix('"')));
                    match quoted {
                        Some(name) if !name.is_empty() => {
                            segments.push(Segment::Field(name.to_string()))
                        }
                        Some(_) => return Err(err("empty field name")),
                        None => {
                            let index = inner.trim().parse().map_err(|_| err("invalid index"))?;
                            segments.push(Segment::Index(index));
                        }
                    }
                }
                c if segments.is_empty() => {
                    // The leading dot is optional.
                    let mut name = c.to_string();
                    while let Some(&c) = chars.peek() {
                        if c == '.' || c == '[' {
                            break;
                        }
                        name.push(c);
                        chars.next();
                    }
                    segments.push(Segment::Field(name));
                }
                _ => return Err(err("unexpected character")),
            }
        }

        if segments.is_empty() {
            return Err(err("empty path"));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }
}
