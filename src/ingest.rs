//! Input document loading.
//!
//! The pipeline consumes plain text. A single file is loaded as one document; a
//! directory is walked recursively and every supported file becomes a document, ordered
//! by path so chunk identifiers are stable across runs. Unreadable files are skipped
//! with a warning rather than failing the whole run.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// File extensions treated as plain text input.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["txt", "md", "text"];

/// Errors raised while loading input documents.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The input path does not exist.
    #[error("input path not found: {0}")]
    MissingInput(PathBuf),
    /// The input path yielded no readable documents.
    #[error("no supported documents found under {0}")]
    EmptyDocumentSet(PathBuf),
}

/// One loaded input document.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path the document was read from.
    pub path: PathBuf,
    /// Extracted plain text.
    pub text: String,
}

impl Document {
    /// Base name of the document's file.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Load the document set at `input`.
///
/// A file path loads that single file regardless of extension; a directory loads every
/// file with a supported extension, sorted by path.
pub fn load_documents(input: &Path) -> Result<Vec<Document>, IngestError> {
    if !input.exists() {
        return Err(IngestError::MissingInput(input.to_path_buf()));
    }

    let mut documents = Vec::new();
    if input.is_file() {
        if let Some(document) = read_document(input) {
            documents.push(document);
        }
    } else {
        let mut paths: Vec<PathBuf> = WalkDir::new(input)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| has_supported_extension(path))
            .collect();
        paths.sort();
        for path in paths {
            if let Some(document) = read_document(&path) {
                documents.push(document);
            }
        }
    }

    if documents.is_empty() {
        return Err(IngestError::EmptyDocumentSet(input.to_path_buf()));
    }
    tracing::info!(count = documents.len(), input = %input.display(), "Loaded input documents");
    Ok(documents)
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| extension.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

fn read_document(path: &Path) -> Option<Document> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let text = raw.strip_prefix('\u{feff}').unwrap_or(&raw).to_string();
            if text.trim().is_empty() {
                tracing::warn!(path = %path.display(), "Skipping empty document");
                None
            } else {
                Some(Document {
                    path: path.to_path_buf(),
                    text,
                })
            }
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "Skipping unreadable document");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ragpipe-ingest-{tag}-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[test]
    fn missing_path_is_an_error() {
        let error = load_documents(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert!(matches!(error, IngestError::MissingInput(_)));
    }

    #[test]
    fn single_file_loads_regardless_of_extension() {
        let dir = scratch_dir("single");
        let path = dir.join("book.fb2-extracted");
        fs::write(&path, "some text").expect("write file");
        let documents = load_documents(&path).expect("loads");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].text, "some text");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn directory_loads_supported_files_sorted() {
        let dir = scratch_dir("dir");
        fs::write(dir.join("b.txt"), "second").expect("write");
        fs::write(dir.join("a.md"), "first").expect("write");
        fs::write(dir.join("ignored.bin"), "binary").expect("write");
        let documents = load_documents(&dir).expect("loads");
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].file_name(), "a.md");
        assert_eq!(documents[1].file_name(), "b.txt");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = scratch_dir("empty");
        let error = load_documents(&dir).unwrap_err();
        assert!(matches!(error, IngestError::EmptyDocumentSet(_)));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn bom_is_stripped() {
        let dir = scratch_dir("bom");
        let path = dir.join("bom.txt");
        fs::write(&path, "\u{feff}content").expect("write");
        let documents = load_documents(&path).expect("loads");
        assert_eq!(documents[0].text, "content");
        fs::remove_dir_all(&dir).ok();
    }
}
