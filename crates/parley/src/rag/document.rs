use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::RagError;

pub const FILE_NAME: &str = "file_name";
pub const ABSOLUTE_DIRECTORY_PATH: &str = "absolute_directory_path";

/// String key/value pairs carried from a document to its segments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(key, value);
        self
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(text, Metadata::new())
    }
}

/// A piece of a document small enough to embed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSegment {
    pub text: String,
    pub metadata: Metadata,
}

impl TextSegment {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(text, Metadata::new())
    }
}

pub struct FileSystemDocumentLoader;

impl FileSystemDocumentLoader {
    /// Load every regular file directly inside `dir` whose file name matches
    /// the glob `pattern`, e.g. `*.txt`. Files are returned in name order.
    pub fn load_documents(dir: impl AsRef<Path>, pattern: &str) -> Result<Vec<Document>, RagError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(RagError::DirectoryNotFound(dir.to_path_buf()));
        }
        let pattern = glob::Pattern::new(pattern)?;
        let absolute_dir = dir.canonicalize().map_err(|source| RagError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let entries = fs::read_dir(&absolute_dir).map_err(|source| RagError::Io {
            path: absolute_dir.clone(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| pattern.matches(name))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::load_document(&path, &absolute_dir) {
                Ok(Some(document)) => documents.push(document),
                Ok(None) => warn!("Skipping empty document {}", path.display()),
                Err(e) => warn!("Skipping unreadable document: {}", e),
            }
        }
        debug!(count = documents.len(), dir = %absolute_dir.display(), "loaded documents");
        Ok(documents)
    }

    fn load_document(path: &Path, dir: &Path) -> Result<Option<Document>, RagError> {
        let text = fs::read_to_string(path).map_err(|source| RagError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let metadata = Metadata::new()
            .with(FILE_NAME, file_name)
            .with(ABSOLUTE_DIRECTORY_PATH, dir.to_string_lossy());
        Ok(Some(Document::new(text, metadata)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_documents_filters_by_pattern() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "second").unwrap();
        fs::write(dir.path().join("a.txt"), "first").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), "not recursive").unwrap();

        let documents = FileSystemDocumentLoader::load_documents(dir.path(), "*.txt").unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].text, "first");
        assert_eq!(documents[0].metadata.get(FILE_NAME), Some("a.txt"));
        assert_eq!(documents[1].metadata.get(FILE_NAME), Some("b.txt"));

        let expected_dir = dir.path().canonicalize().unwrap();
        assert_eq!(
            documents[0].metadata.get(ABSOLUTE_DIRECTORY_PATH),
            Some(expected_dir.to_string_lossy().as_ref())
        );
    }

    #[test]
    fn test_load_documents_skips_empty_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("empty.txt"), "  \n").unwrap();
        fs::write(dir.path().join("binary.txt"), [0xff, 0xfe, 0x00]).unwrap();
        fs::write(dir.path().join("ok.txt"), "content").unwrap();

        let documents = FileSystemDocumentLoader::load_documents(dir.path(), "*.txt").unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].text, "content");
    }

    #[test]
    fn test_load_documents_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let result = FileSystemDocumentLoader::load_documents(&missing, "*.txt");
        assert!(matches!(result, Err(RagError::DirectoryNotFound(_))));
    }

    #[test]
    fn test_load_documents_invalid_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileSystemDocumentLoader::load_documents(dir.path(), "[");
        assert!(matches!(result, Err(RagError::Pattern(_))));
    }
}
