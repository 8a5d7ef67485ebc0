//! Text extraction from uploaded files.
//!
//! The pipeline never parses file formats itself. Each [`Upload`] is turned into a
//! [`Document`] by an injected [`TextExtractor`], which runs on the blocking pool
//! because PDF parsing is CPU-bound.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::document::Document;
use crate::error::{RagError, Result};

/// One file handed over by the upload boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// File name; becomes the document's source identifier.
    pub filename: String,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self { filename: filename.into(), bytes: bytes.into() }
    }

    /// Read a file from disk, using its file name as the source identifier.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { filename, bytes })
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

/// Converts raw upload bytes into plain text.
pub trait TextExtractor: Send + Sync {
    /// Extract the text of `upload`.
    ///
    /// Implementations report failures as [`RagError::Extraction`].
    fn extract(&self, upload: &Upload) -> Result<String>;
}

/// Treats the upload as UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, upload: &Upload) -> Result<String> {
        String::from_utf8(upload.bytes.clone()).map_err(|e| RagError::Extraction {
            source_id: upload.filename.clone(),
            message: format!("not valid UTF-8: {e}"),
        })
    }
}

/// Extracts the text of every page of a PDF, pages concatenated in order.
///
/// Only available when the `pdf` feature is enabled.
#[cfg(feature = "pdf")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

#[cfg(feature = "pdf")]
impl TextExtractor for PdfExtractor {
    fn extract(&self, upload: &Upload) -> Result<String> {
        pdf_extract::extract_text_from_mem(&upload.bytes).map_err(|e| RagError::Extraction {
            source_id: upload.filename.clone(),
            message: format!("PDF extraction failed: {e}"),
        })
    }
}

/// Dispatches to a per-extension extractor.
///
/// [`ExtensionExtractor::default`] handles `pdf` (with the `pdf` feature) and
/// `txt`/`md` files.
pub struct ExtensionExtractor {
    by_extension: HashMap<String, Arc<dyn TextExtractor>>,
}

impl ExtensionExtractor {
    /// An extractor that knows no extensions.
    pub fn empty() -> Self {
        Self { by_extension: HashMap::new() }
    }

    /// Register `extractor` for a case-insensitive file extension.
    pub fn with(mut self, extension: &str, extractor: Arc<dyn TextExtractor>) -> Self {
        self.by_extension.insert(extension.to_ascii_lowercase(), extractor);
        self
    }
}

impl Default for ExtensionExtractor {
    fn default() -> Self {
        let text: Arc<dyn TextExtractor> = Arc::new(PlainTextExtractor);
        let extractor = Self::empty().with("txt", text.clone()).with("md", text);
        #[cfg(feature = "pdf")]
        let extractor = extractor.with("pdf", Arc::new(PdfExtractor));
        extractor
    }
}

impl TextExtractor for ExtensionExtractor {
    fn extract(&self, upload: &Upload) -> Result<String> {
        let extension = upload.extension().unwrap_or_default();
        let extractor = self.by_extension.get(&extension).ok_or_else(|| RagError::Extraction {
            source_id: upload.filename.clone(),
            message: format!("unsupported file type '{extension}'"),
        })?;
        extractor.extract(upload)
    }
}

/// Turns uploads into [`Document`]s using an injected [`TextExtractor`].
#[derive(Clone)]
pub struct DocumentLoader {
    extractor: Arc<dyn TextExtractor>,
}

impl DocumentLoader {
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Self {
        Self { extractor }
    }

    /// Extract one upload on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Extraction`] naming the upload when extraction fails.
    pub async fn load(&self, upload: Upload) -> Result<Document> {
        let extractor = Arc::clone(&self.extractor);
        let filename = upload.filename.clone();
        let text = tokio::task::spawn_blocking(move || extractor.extract(&upload))
            .await
            .map_err(|e| RagError::Extraction {
                source_id: filename.clone(),
                message: format!("extraction task failed: {e}"),
            })??;

        debug!(document.id = %filename, chars = text.chars().count(), "extracted text");
        let mut document = Document::new(filename.clone(), text);
        document.metadata.insert("source".to_string(), filename);
        Ok(document)
    }
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new(Arc::new(ExtensionExtractor::default()))
    }
}
