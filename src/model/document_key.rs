use std::fmt::{Display, Formatter};

use crate::error::{invalid_argument, DbResult};
use crate::model::ResourcePath;

/// Validated path of a single document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    path: ResourcePath,
}

impl DocumentKey {
    pub fn from_path(path: ResourcePath) -> DbResult<Self> {
        if !path.is_document() {
            return Err(invalid_argument(format!(
                "'{path}' is not a document path (expected an even number of segments)"
            )));
        }
        if let Some(id) = path.last_segment() {
            validate_document_id(id)?;
        }
        Ok(Self { path })
    }

    pub fn parse(path: &str) -> DbResult<Self> {
        Self::from_path(ResourcePath::parse(path)?)
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn collection_path(&self) -> ResourcePath {
        self.path.parent().unwrap_or_else(ResourcePath::root)
    }

    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }
}

impl Display for DocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Rejects ids the backend refuses: empty, containing `/`, `.`/`..`, or `__x__`.
pub fn validate_document_id(id: &str) -> DbResult<()> {
    if id.is_empty() {
        return Err(invalid_argument("Document ID cannot be empty"));
    }
    if id.contains('/') {
        return Err(invalid_argument(format!(
            "Document ID '{id}' cannot contain '/'"
        )));
    }
    if id == "." || id == ".." {
        return Err(invalid_argument(format!(
            "Document ID '{id}' is reserved"
        )));
    }
    if id.len() > 4 && id.starts_with("__") && id.ends_with("__") {
        return Err(invalid_argument(format!(
            "Document ID '{id}' matches the reserved __.*__ pattern"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_collection_paths() {
        let err = DocumentKey::parse("users").unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn exposes_id_and_collection() {
        let key = DocumentKey::parse("users/42/posts/p1").unwrap();
        assert_eq!(key.id(), "p1");
        assert_eq!(key.collection_path().canonical_string(), "users/42/posts");
    }

    #[test]
    fn rejects_reserved_ids() {
        assert!(validate_document_id("__name__").is_err());
        assert!(validate_document_id("..").is_err());
        assert!(validate_document_id("__").is_ok());
    }
}
