//! On-disk layout of a pipeline run and the file moves between its areas.
//!
//! ```text
//! input/               source reports
//! raw/<doc>/           split pages still in play + selection.json
//! error/<doc>/         discarded pages
//! processed/<doc>.json extraction output
//! archived_input/      source reports after selection
//! archived_raw/<doc>/  kept pages after extraction
//! archived_processed/  exported json
//! ```

use crate::error::IngestError;
use crate::models::{Classification, DocumentFingerprint, DocumentName};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const MANIFEST_FILE: &str = "selection.json";

#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    pub input: PathBuf,
    pub raw: PathBuf,
    pub error: PathBuf,
    pub processed: PathBuf,
    pub archived_input: PathBuf,
    pub archived_raw: PathBuf,
    pub archived_processed: PathBuf,
    pub ocr_debug: PathBuf,
}

impl WorkspaceLayout {
    /// Every area under one data directory, e.g. `data/`.
    pub fn under(root: &Path) -> Self {
        Self {
            input: root.join("input"),
            raw: root.join("raw"),
            error: root.join("error"),
            processed: root.join("processed"),
            archived_input: root.join("archived_input"),
            archived_raw: root.join("archived_raw"),
            archived_processed: root.join("archived_processed"),
            ocr_debug: root.join("logs").join("ocr_text"),
        }
    }

    pub fn ensure(&self) -> Result<(), IngestError> {
        for dir in [
            &self.input,
            &self.raw,
            &self.error,
            &self.processed,
            &self.archived_input,
            &self.archived_raw,
            &self.archived_processed,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn raw_dir(&self, document: &DocumentName) -> PathBuf {
        self.raw.join(&document.name)
    }

    pub fn error_dir(&self, document: &DocumentName) -> PathBuf {
        self.error.join(&document.name)
    }

    pub fn ocr_debug_dir(&self, document: &DocumentName) -> PathBuf {
        self.ocr_debug.join(&document.name)
    }

    pub fn processed_file(&self, document: &DocumentName) -> PathBuf {
        self.processed.join(format!("{}.json", document.name))
    }
}

/// Source reports directly inside `folder`, sorted by path.
pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    discover_files(folder, "pdf")
}

pub fn discover_json_files(folder: &Path) -> Vec<PathBuf> {
    discover_files(folder, "json")
}

fn discover_files(folder: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));

        if matches {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Document directories waiting under `raw/`.
pub fn discover_document_dirs(raw_root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(raw_root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.path().to_path_buf())
        .collect();
    dirs.sort_unstable();
    dirs
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Moves `source` into `target_dir`, keeping its file name.
pub fn move_into(source: &Path, target_dir: &Path) -> Result<PathBuf, IngestError> {
    let name = source
        .file_name()
        .ok_or_else(|| IngestError::MissingFileName(source.display().to_string()))?;
    let target = target_dir.join(name);

    let moved = fs::create_dir_all(target_dir).and_then(|_| rename_or_copy(source, &target));
    moved.map_err(|error| IngestError::Relocation {
        from: source.to_path_buf(),
        to: target.clone(),
        reason: error.to_string(),
    })?;

    Ok(target)
}

/// Moves a whole directory to `target`, replacing whatever is there.
pub fn replace_dir(source: &Path, target: &Path) -> Result<(), IngestError> {
    let relocation = |error: std::io::Error| IngestError::Relocation {
        from: source.to_path_buf(),
        to: target.to_path_buf(),
        reason: error.to_string(),
    };

    if target.exists() {
        fs::remove_dir_all(target).map_err(relocation)?;
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(relocation)?;
    }

    if fs::rename(source, target).is_err() {
        copy_dir(source, target).map_err(relocation)?;
        fs::remove_dir_all(source).map_err(relocation)?;
    }
    Ok(())
}

fn rename_or_copy(source: &Path, target: &Path) -> std::io::Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    fs::copy(source, target)?;
    fs::remove_file(source)
}

fn copy_dir(source: &Path, target: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(source).into_iter() {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else {
            fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

/// Verdict and OCR text of one split page, as recorded after selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageRecord {
    pub number: u32,
    pub file_name: String,
    pub classification: Classification,
    pub text: String,
}

/// Written to `raw/<doc>/selection.json` so extraction can reuse the OCR pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionManifest {
    pub fingerprint: DocumentFingerprint,
    pub threshold: usize,
    pub pages: Vec<PageRecord>,
}

impl SelectionManifest {
    pub fn kept(&self) -> usize {
        self.pages
            .iter()
            .filter(|page| page.classification.is_keep())
            .count()
    }

    pub fn discarded(&self) -> usize {
        self.pages.len() - self.kept()
    }
}

pub fn write_manifest(dir: &Path, manifest: &SelectionManifest) -> Result<PathBuf, IngestError> {
    let path = dir.join(MANIFEST_FILE);
    let body = serde_json::to_string_pretty(manifest)?;
    fs::write(&path, body)?;
    Ok(path)
}

pub fn read_manifest(dir: &Path) -> Result<Option<SelectionManifest>, IngestError> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let body = fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&body)?))
}
