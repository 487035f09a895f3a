//! File reading and character-encoding resolution.
//!
//! Regulatory XML arrives either in UTF-8 or in windows-1251; the
//! loaders decode by trying UTF-8 first and falling back to cp1251,
//! preserving the origin encoding label for later reporting.

use std::{fs, path::Path};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1251};

/// Decoded file content plus the encoding that produced it.
#[derive(Debug, Clone)]
pub struct DecodedFile {
    pub text: String,
    pub encoding: &'static Encoding,
}

/// Decodes `bytes` by trying UTF-8 first and windows-1251 second.
pub fn decode_auto(bytes: &[u8]) -> Result<DecodedFile> {
    let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
    if !had_errors {
        return Ok(DecodedFile {
            text: text.into_owned(),
            encoding: UTF_8,
        });
    }
    let (text, _, had_errors) = WINDOWS_1251.decode(bytes);
    if had_errors {
        return Err(anyhow!("Input is neither valid UTF-8 nor windows-1251"));
    }
    Ok(DecodedFile {
        text: text.into_owned(),
        encoding: WINDOWS_1251,
    })
}

/// Extracts the encoding label from an XML declaration, if present.
///
/// Only the file prologue is inspected; the document does not have to
/// be parsed for this to work.
pub fn declared_charset(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(128)];
    let (text, _, _) = WINDOWS_1251.decode(head);
    let lowered = text.to_ascii_lowercase();
    let start = lowered.find("encoding=")? + "encoding=".len();
    let rest = &lowered[start..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let tail = &rest[1..];
    let end = tail.find(quote)?;
    Some(tail[..end].to_string())
}

/// Collects every regular file under `root`, depth-first, in sorted
/// order so compendium loads are deterministic.
pub fn walk_files(root: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("Reading directory {dir:?}"))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("Reading directory {dir:?}"))?;
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Strips the final extension from a filename, keeping earlier dots.
pub fn strip_extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((base, _)) => base.to_string(),
        None => filename.to_string(),
    }
}
