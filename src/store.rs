//! In-memory data snapshot of authors and blogs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::{Result, SubgraphError};

/// Author record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub description: String,
}

/// Blog record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blog {
    pub id: String,
    pub title: String,
    pub labels: Vec<String>,
    /// Not checked against the author collection
    pub author_id: String,
}

/// Raw snapshot as stored on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub blogs: Vec<Blog>,
}

/// Read-only store loaded once at startup
///
/// Collections keep snapshot order. Lookups go through id indexes; when an
/// id appears twice the first record wins, the same answer a front-to-back
/// scan would give.
#[derive(Debug, Default)]
pub struct DataStore {
    authors: Vec<Arc<Author>>,
    blogs: Vec<Arc<Blog>>,
    author_index: HashMap<String, usize>,
    blog_index: HashMap<String, usize>,
}

impl DataStore {
    /// Build store from a snapshot
    pub fn new(snapshot: Snapshot) -> Self {
        let authors: Vec<Arc<Author>> = snapshot.authors.into_iter().map(Arc::new).collect();
        let blogs: Vec<Arc<Blog>> = snapshot.blogs.into_iter().map(Arc::new).collect();

        let author_index = index_by_id("Author", authors.iter().map(|a| a.id.as_str()));
        let blog_index = index_by_id("Blog", blogs.iter().map(|b| b.id.as_str()));

        Self {
            authors,
            blogs,
            author_index,
            blog_index,
        }
    }

    /// Parse a JSON snapshot
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        Ok(Self::new(snapshot))
    }

    /// Load a JSON snapshot from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| SubgraphError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_json(&json)?;

        tracing::info!(
            path = %path.display(),
            authors = store.authors.len(),
            blogs = store.blogs.len(),
            "Loaded data snapshot"
        );

        Ok(store)
    }

    pub fn authors(&self) -> &[Arc<Author>] {
        &self.authors
    }

    pub fn blogs(&self) -> &[Arc<Blog>] {
        &self.blogs
    }

    pub fn author(&self, id: &str) -> Option<&Arc<Author>> {
        self.author_index.get(id).map(|&idx| &self.authors[idx])
    }

    pub fn blog(&self, id: &str) -> Option<&Arc<Blog>> {
        self.blog_index.get(id).map(|&idx| &self.blogs[idx])
    }

    /// Blogs written by an author, in collection order
    pub fn blogs_by_author<'a>(&'a self, author_id: &'a str) -> impl Iterator<Item = &'a Arc<Blog>> + 'a {
        self.blogs.iter().filter(move |blog| blog.author_id == author_id)
    }
}

fn index_by_id<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (idx, id) in ids.enumerate() {
        if index.contains_key(id) {
            tracing::warn!(kind, id, "Duplicate id in snapshot, keeping first record");
            continue;
        }
        index.insert(id.to_string(), idx);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "authors": [
            { "id": "101", "name": "Ada Lovelace", "age": 37, "description": "Analytical engines." },
            { "id": "102", "name": "Grace Hopper", "age": 85, "description": "Compilers." },
            { "id": "101", "name": "Impostor", "age": 1, "description": "Shadowed." }
        ],
        "blogs": [
            { "id": "1", "title": "The Poetry of Code", "labels": ["history"], "authorId": "101" },
            { "id": "2", "title": "Bugs", "labels": [], "authorId": "102" },
            { "id": "3", "title": "Engines", "labels": ["math", "technology"], "authorId": "101" }
        ]
    }"#;

    #[test]
    fn test_lookup_by_id() {
        let store = DataStore::from_json(SNAPSHOT).unwrap();
        assert_eq!(store.author("102").unwrap().name, "Grace Hopper");
        assert_eq!(store.blog("3").unwrap().labels, vec!["math", "technology"]);
        assert!(store.blog("999").is_none());
        assert!(store.author("999").is_none());
    }

    #[test]
    fn test_duplicate_id_keeps_first() {
        let store = DataStore::from_json(SNAPSHOT).unwrap();
        assert_eq!(store.authors().len(), 3);
        assert_eq!(store.author("101").unwrap().name, "Ada Lovelace");
    }

    #[test]
    fn test_blogs_by_author_keeps_order() {
        let store = DataStore::from_json(SNAPSHOT).unwrap();
        let ids: Vec<&str> = store.blogs_by_author("101").map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(store.blogs_by_author("404").count(), 0);
    }

    #[test]
    fn test_invalid_snapshot() {
        let err = DataStore::from_json(r#"{ "authors": [{ "id": 1 }] }"#).unwrap_err();
        assert!(matches!(err, SubgraphError::DataFormat(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = DataStore::load("does/not/exist.json").unwrap_err();
        assert!(matches!(err, SubgraphError::Read { .. }));
    }
}
