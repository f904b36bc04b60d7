use crate::error::{invalid_argument, DbResult};
use crate::model::{DocumentKey, ResourcePath};

pub const DEFAULT_DATABASE: &str = "(default)";

/// Project + database pair every native handle is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatabaseId {
    project_id: String,
    database: String,
}

impl DatabaseId {
    pub fn new(project_id: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: database.into(),
        }
    }

    pub fn default_database(project_id: impl Into<String>) -> Self {
        Self::new(project_id, DEFAULT_DATABASE)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// `projects/{p}/databases/{d}`
    pub fn database_name(&self) -> String {
        format!("projects/{}/databases/{}", self.project_id, self.database)
    }

    /// Full resource name used for reference values and REST document names.
    pub fn document_name(&self, path: &ResourcePath) -> String {
        if path.is_empty() {
            format!("{}/documents", self.database_name())
        } else {
            format!("{}/documents/{}", self.database_name(), path)
        }
    }

    /// Parses a full resource name back into a document key.
    ///
    /// Names from another project or database are accepted as long as they
    /// have the expected shape, since references may point across databases.
    pub fn parse_document_name(name: &str) -> DbResult<DocumentKey> {
        let segments: Vec<&str> = name.split('/').collect();
        if segments.len() < 7
            || segments[0] != "projects"
            || segments[2] != "databases"
            || segments[4] != "documents"
        {
            return Err(invalid_argument(format!(
                "'{name}' is not a document resource name"
            )));
        }
        DocumentKey::from_path(ResourcePath::from_segments(segments[5..].iter().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_and_parses_document_names() {
        let db = DatabaseId::default_database("demo");
        let key = DocumentKey::parse("users/42").unwrap();
        let name = db.document_name(key.path());
        assert_eq!(name, "projects/demo/databases/(default)/documents/users/42");
        assert_eq!(DatabaseId::parse_document_name(&name).unwrap(), key);
    }

    #[test]
    fn rejects_foreign_shapes() {
        assert!(DatabaseId::parse_document_name("users/42").is_err());
        assert!(DatabaseId::parse_document_name("projects/p/databases/d/documents/users").is_err());
    }
}
