use std::fmt::{Display, Formatter};

use crate::error::{invalid_argument, DbResult};

/// Path to a (possibly nested) field inside a document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<String>,
}

const DOCUMENT_ID_FIELD: &str = "__name__";

impl FieldPath {
    pub fn new<S, I>(segments: I) -> DbResult<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(invalid_argument("Field path must contain at least one segment"));
        }
        if segments.iter().any(String::is_empty) {
            return Err(invalid_argument("Field path segments cannot be empty"));
        }
        Ok(Self { segments })
    }

    pub fn from_dot_separated(path: &str) -> DbResult<Self> {
        if path.trim().is_empty() {
            return Err(invalid_argument("Field path string cannot be empty"));
        }
        FieldPath::new(path.split('.'))
    }

    /// Special path addressing the document id in queries.
    pub fn document_id() -> Self {
        Self {
            segments: vec![DOCUMENT_ID_FIELD.to_string()],
        }
    }

    pub fn is_document_id(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == DOCUMENT_ID_FIELD
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Wire form: segments that are not simple identifiers are backquoted.
    pub fn canonical_string(&self) -> String {
        self.segments
            .iter()
            .map(|segment| {
                if is_simple_segment(segment) {
                    segment.clone()
                } else {
                    format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(l, r)| l == r)
    }
}

fn is_simple_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

/// Converts common user inputs into a validated [`FieldPath`].
pub trait IntoFieldPath {
    fn into_field_path(self) -> DbResult<FieldPath>;
}

impl IntoFieldPath for FieldPath {
    fn into_field_path(self) -> DbResult<FieldPath> {
        Ok(self)
    }
}

impl IntoFieldPath for &FieldPath {
    fn into_field_path(self) -> DbResult<FieldPath> {
        Ok(self.clone())
    }
}

impl IntoFieldPath for &str {
    fn into_field_path(self) -> DbResult<FieldPath> {
        FieldPath::from_dot_separated(self)
    }
}

impl IntoFieldPath for String {
    fn into_field_path(self) -> DbResult<FieldPath> {
        FieldPath::from_dot_separated(&self)
    }
}

impl<const N: usize> IntoFieldPath for [&str; N] {
    fn into_field_path(self) -> DbResult<FieldPath> {
        FieldPath::new(self)
    }
}

impl IntoFieldPath for Vec<String> {
    fn into_field_path(self) -> DbResult<FieldPath> {
        FieldPath::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_non_identifier_segments() {
        let path = FieldPath::new(["stats", "first-name"]).unwrap();
        assert_eq!(path.canonical_string(), "stats.`first-name`");
    }

    #[test]
    fn arrays_convert_segment_by_segment() {
        let path = ["address", "city.name"].into_field_path().unwrap();
        assert_eq!(path.segments().len(), 2);
    }

    #[test]
    fn rejects_empty() {
        let err = FieldPath::from_dot_separated("").unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
        assert!(FieldPath::from_dot_separated("a..b").is_err());
    }
}
