use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use crate::error::{invalid_argument, DbResult};

/// Slash separated path below `projects/{p}/databases/{d}/documents`.
///
/// Odd lengths address collections, even lengths address documents.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses `users/42/posts`, ignoring leading and trailing slashes.
    pub fn parse(path: &str) -> DbResult<Self> {
        let trimmed = path.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        if trimmed.contains("//") {
            return Err(invalid_argument(format!(
                "Invalid path '{path}': found an empty segment"
            )));
        }
        Ok(Self::from_segments(trimmed.split('/')))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_collection(&self) -> bool {
        self.len() % 2 == 1
    }

    pub fn is_document(&self) -> bool {
        !self.is_empty() && self.len() % 2 == 0
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join("/")
    }

    /// Renders the path for use inside a request URL, escaping each segment.
    pub fn url_encoded(&self) -> String {
        use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
        self.segments
            .iter()
            .map(|segment| utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.len() <= other.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(l, r)| l == r)
    }
}

impl PartialOrd for ResourcePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourcePath {
    fn cmp(&self, other: &Self) -> Ordering {
        for (l, r) in self.segments.iter().zip(other.segments.iter()) {
            match l.cmp(r) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        self.len().cmp(&other.len())
    }
}

impl Display for ResourcePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_collection() {
        let path = ResourcePath::parse("/users/42/posts/").unwrap();
        assert_eq!(path.len(), 3);
        assert!(path.is_collection());
        assert_eq!(path.last_segment(), Some("posts"));
        assert_eq!(path.parent().unwrap().canonical_string(), "users/42");
    }

    #[test]
    fn rejects_empty_segments() {
        let err = ResourcePath::parse("users//42").unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn escapes_segments_for_urls() {
        let path = ResourcePath::from_segments(["users", "a b"]);
        assert_eq!(path.url_encoded(), "users/a%20b");
    }

    #[test]
    fn orders_segment_by_segment() {
        let a = ResourcePath::parse("users/a").unwrap();
        let b = ResourcePath::parse("users/b").unwrap();
        let nested = ResourcePath::parse("users/a/posts/1").unwrap();
        assert!(a < b);
        assert!(a < nested);
        assert!(a.is_prefix_of(&nested));
    }
}
