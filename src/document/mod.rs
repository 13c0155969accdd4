//! PDF text extraction


use std::path::{Path, PathBuf};

use lopdf::Document;
use tracing::{debug, warn};

use crate::{RagError, Result};

/// Text extracted from one PDF, one entry per page in page order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    /// File name the document is identified by
    pub source: String,
    pub path: PathBuf,
    pub pages: Vec<String>,
}

impl LoadedDocument {
    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Load a PDF and extract the text of every page
#[inline]
pub fn load_document(path: &Path) -> Result<LoadedDocument> {
    let pages = extract_pages(path)?;
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    Ok(LoadedDocument {
        source: source_name(&path),
        path,
        pages,
    })
}

/// Extract the text of each page of the PDF at `path`.
///
/// Missing, non-PDF and unparsable files, and encrypted files that need a
/// user password, are all reported as [`RagError::DocumentRead`]. A page
/// whose text cannot be decoded yields an empty string so page numbering is
/// preserved.
#[inline]
pub fn extract_pages(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Err(read_error(path, "file does not exist"));
    }

    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(read_error(path, "not a .pdf file"));
    }

    let mut document = Document::load(path)
        .map_err(|err| read_error(path, format!("failed to parse PDF: {err}")))?;

    // Files protected only by an owner password open with the empty user password
    if document.is_encrypted() {
        document.decrypt("").map_err(|err| {
            debug!("{} does not open with an empty password: {}", path.display(), err);
            read_error(path, "PDF is encrypted")
        })?;
    }

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    debug!("{} has {} pages", path.display(), page_numbers.len());

    let pages = page_numbers
        .iter()
        .map(|&page| match document.extract_text(&[page]) {
            Ok(text) => text,
            Err(err) => {
                warn!(
                    "Could not extract text from page {} of {}: {}",
                    page,
                    path.display(),
                    err
                );
                String::new()
            }
        })
        .collect();

    Ok(pages)
}

/// File name used to identify a document in answers and sources
#[inline]
pub fn source_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

fn read_error(path: &Path, reason: impl Into<String>) -> RagError {
    RagError::DocumentRead {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
