//! The file object handed to the checkers.
//!
//! Carries the filename, raw bytes (kept for re-encoding checks), the
//! parsed document, the detected charset, and the verification result
//! slot the checker writes into.

use std::path::Path;

use anyhow::{Context, Result};

use crate::dom::Document;
use crate::error::VerifyResult;
use crate::io_utils;

#[derive(Debug)]
pub struct CheckedFile {
    pub filename: String,
    pub content: Vec<u8>,
    pub document: Document,
    pub charset: Option<String>,
    pub verify_result: Option<VerifyResult>,
}

impl CheckedFile {
    /// Builds a file object from in-memory bytes.
    pub fn from_bytes(filename: impl Into<String>, content: Vec<u8>) -> Result<Self> {
        let filename = filename.into();
        let document = Document::parse(&content)
            .with_context(|| format!("Parsing XML document {filename}"))?;
        let charset = io_utils::declared_charset(&content);
        Ok(Self {
            filename,
            content,
            document,
            charset,
            verify_result: None,
        })
    }

    /// Reads a file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content =
            std::fs::read(path).with_context(|| format!("Opening input file {path:?}"))?;
        Self::from_bytes(filename, content)
    }

    /// The filename with its final extension removed.
    pub fn basename(&self) -> String {
        io_utils::strip_extension(&self.filename)
    }
}
