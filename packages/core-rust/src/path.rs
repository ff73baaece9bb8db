//! Resource path grammar used by the worker-side dispatch table.
//!
//! ```text
//! path     := "" | "/" | "/" segment [ "/" ]
//!           | "/" relation "/" segment [ "/" ]
//!           | "/" segment "/" action [ "/" ]
//! segment  := 1*(any char except "/")
//! relation := the service's parent literal, matched as a whole segment
//! action   := any other second segment, e.g. `validate` in `/7/validate`
//! ```
//!
//! A leading `/` is optional and a single trailing `/` is ignored. Literals
//! are compared segment-for-segment, so a relation named `patient` never
//! matches `/patients/3` or `/outpatient/3`.

/// Structural reading of a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathShape<'a> {
    /// `""` or `"/"`.
    Root,
    /// `/<segment>`: the segment sits in an id position.
    Member(&'a str),
    /// `/<relation>/<segment>`: a parent-scoped listing.
    Related { relation: &'a str, key: &'a str },
    /// `/<segment>/<action>`: a named action on one member.
    Action { key: &'a str, action: &'a str },
    /// Anything the grammar does not route.
    Unrouted,
}

impl<'a> PathShape<'a> {
    /// Reads `path`, recognising `relation` as the only parent literal.
    #[must_use]
    pub fn parse(path: &'a str, relation: Option<&str>) -> Self {
        let inner = path.strip_prefix('/').unwrap_or(path);
        let inner = inner.strip_suffix('/').unwrap_or(inner);
        if inner.is_empty() {
            return Self::Root;
        }

        let mut segments = inner.split('/');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(segment), None, _) if !segment.is_empty() => Self::Member(segment),
            (Some(literal), Some(key), None)
                if !key.is_empty() && relation.is_some_and(|r| r == literal) =>
            {
                Self::Related {
                    relation: literal,
                    key,
                }
            }
            (Some(key), Some(action), None) if !key.is_empty() && !action.is_empty() => {
                Self::Action { key, action }
            }
            _ => Self::Unrouted,
        }
    }
}

/// Result of reading a segment that sits in an id position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSegment {
    /// A positive 32-bit identifier.
    Positive(u32),
    /// The literal `0`: well formed, but never a valid identifier.
    Zero,
    /// Not an unsigned 32-bit decimal.
    Invalid,
}

impl IdSegment {
    /// Parses a decimal identifier. Signs, whitespace and values above
    /// `u32::MAX` are invalid.
    #[must_use]
    pub fn parse(segment: &str) -> Self {
        if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
            return Self::Invalid;
        }
        match segment.parse::<u32>() {
            Ok(0) => Self::Zero,
            Ok(id) => Self::Positive(id),
            Err(_) => Self::Invalid,
        }
    }
}
