use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{invalid_argument, DbResult};
use crate::model::{DocumentKey, ResourcePath};
use crate::value::special::{deserialize_reference, serialize_reference};

/// A typed collection. Holds only the path; every operation asks for the
/// active adaptor when it runs.
pub struct Collection<T> {
    path: ResourcePath,
    _model: PhantomData<fn() -> T>,
}

impl<T> Collection<T> {
    pub(crate) fn from_path(path: ResourcePath) -> DbResult<Self> {
        if !path.is_collection() {
            return Err(invalid_argument(format!(
                "'{path}' is not a collection path (expected an odd number of segments)"
            )));
        }
        Ok(Self {
            path,
            _model: PhantomData,
        })
    }

    /// Full path of the collection, e.g. `users/sasha/posts`.
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    /// Reference to the document `id` in this collection.
    pub fn doc_ref(&self, id: &str) -> DbResult<Ref<T>> {
        if id.contains('/') {
            return Err(invalid_argument(format!(
                "Document ID '{id}' cannot contain '/'"
            )));
        }
        Ok(Ref::from_key(DocumentKey::from_path(self.path.child(id))?))
    }

    /// Reference to a new document with an auto-generated id.
    pub fn new_ref(&self) -> DbResult<Ref<T>> {
        self.doc_ref(&generate_auto_id())
    }
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _model: PhantomData,
        }
    }
}

impl<T> PartialEq for Collection<T> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl<T> Eq for Collection<T> {}

impl<T> Debug for Collection<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Collection({})", self.path)
    }
}

/// Typed collection at `path` (`"users"`, or a nested `"users/sasha/posts"`).
pub fn collection<T>(path: &str) -> DbResult<Collection<T>> {
    Collection::from_path(ResourcePath::parse(path)?)
}

/// Typed collection `name` nested below the document `parent`.
pub fn subcollection<T, P>(parent: &Ref<P>, name: &str) -> DbResult<Collection<T>> {
    if name.is_empty() || name.contains('/') {
        return Err(invalid_argument(format!(
            "Subcollection name '{name}' must be a single non-empty segment"
        )));
    }
    Collection::from_path(parent.path().child(name))
}

/// A typed reference to one document.
///
/// Inside a document model, a `Ref<U>` field is stored as a native reference
/// and reads back as a `Ref<U>` to the same path.
pub struct Ref<T> {
    key: DocumentKey,
    _model: PhantomData<fn() -> T>,
}

impl<T> Ref<T> {
    pub(crate) fn from_key(key: DocumentKey) -> Self {
        Self {
            key,
            _model: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn path(&self) -> &ResourcePath {
        self.key.path()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// The collection this document belongs to.
    pub fn collection(&self) -> Collection<T> {
        Collection {
            path: self.key.collection_path(),
            _model: PhantomData,
        }
    }

    /// The same document viewed as another model type.
    pub fn cast<U>(&self) -> Ref<U> {
        Ref {
            key: self.key.clone(),
            _model: PhantomData,
        }
    }
}

/// Reference to document `id` of `collection`.
pub fn doc_ref<T>(collection: &Collection<T>, id: &str) -> DbResult<Ref<T>> {
    collection.doc_ref(id)
}

/// Parses a document path such as `users/sasha/posts/1`.
pub fn ref_from_path<T>(path: &str) -> DbResult<Ref<T>> {
    Ok(Ref::from_key(DocumentKey::parse(path)?))
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        self.cast()
    }
}

impl<T> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Ref<T> {}

impl<T> Hash for Ref<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T> Debug for Ref<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({})", self.key)
    }
}

impl<T> Display for Ref<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.key, f)
    }
}

impl<T> Serialize for Ref<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_reference(&self.key, serializer)
    }
}

impl<'de, T> Deserialize<'de> for Ref<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_reference(deserializer).map(Ref::from_key)
    }
}

fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(20)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbErrorCode;

    struct User;
    struct Post;

    #[test]
    fn builds_nested_refs() {
        let users = collection::<User>("users").unwrap();
        let sasha = users.doc_ref("sasha").unwrap();
        let posts = subcollection::<Post, _>(&sasha, "posts").unwrap();
        let post = doc_ref(&posts, "first").unwrap();
        assert_eq!(post.path().canonical_string(), "users/sasha/posts/first");
        assert_eq!(post.collection(), posts);
        assert_eq!(ref_from_path::<Post>("users/sasha/posts/first").unwrap(), post);
    }

    #[test]
    fn rejects_document_paths_as_collections() {
        let err = collection::<User>("users/sasha").unwrap_err();
        assert_eq!(err.code, DbErrorCode::InvalidArgument);
        assert!(collection::<User>("users").unwrap().doc_ref("a/b").is_err());
    }

    #[test]
    fn auto_ids_are_twenty_alphanumerics() {
        let users = collection::<User>("users").unwrap();
        let generated = users.new_ref().unwrap();
        assert_eq!(generated.id().len(), 20);
        assert!(generated.id().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(users.new_ref().unwrap(), generated);
    }

    #[test]
    fn refs_use_plain_paths_in_other_formats() {
        let sasha = ref_from_path::<User>("users/sasha").unwrap();
        let json = serde_json::to_value(&sasha).unwrap();
        assert_eq!(json, serde_json::json!("users/sasha"));
        let back: Ref<User> = serde_json::from_value(json).unwrap();
        assert_eq!(back, sasha);
    }
}
