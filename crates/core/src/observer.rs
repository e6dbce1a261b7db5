use crate::error::IngestError;
use crate::models::{Classification, DocumentName, PageText, Verdict};
use crate::traits::PageObserver;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

/// Emits one structured event per page verdict.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PageObserver for TracingObserver {
    fn page_classified(&self, document: &DocumentName, page: &PageText, outcome: &Classification) {
        match outcome.verdict {
            Verdict::Keep => info!(
                document = %document.name,
                page = page.number,
                hits = outcome.score.count,
                matched = ?outcome.score.matched,
                "keep page"
            ),
            Verdict::Discard => info!(
                document = %document.name,
                page = page.number,
                hits = outcome.score.count,
                matched = ?outcome.score.matched,
                reason = %outcome.reason.map(|reason| reason.to_string()).unwrap_or_default(),
                "discard page"
            ),
        }
    }

    fn page_unreadable(&self, document: &DocumentName, page_file: &Path, error: &IngestError) {
        warn!(
            document = %document.name,
            page_file = %page_file.display(),
            error = %error,
            "ocr failed, page treated as empty"
        );
    }
}

/// Keeps every verdict in memory; handy for reports and tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    verdicts: Mutex<Vec<(String, u32, Classification)>>,
    unreadable: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn verdicts(&self) -> Vec<(String, u32, Classification)> {
        self.verdicts
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn unreadable(&self) -> Vec<String> {
        self.unreadable
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl PageObserver for RecordingObserver {
    fn page_classified(&self, document: &DocumentName, page: &PageText, outcome: &Classification) {
        if let Ok(mut verdicts) = self.verdicts.lock() {
            verdicts.push((document.name.clone(), page.number, outcome.clone()));
        }
    }

    fn page_unreadable(&self, _document: &DocumentName, page_file: &Path, _error: &IngestError) {
        if let Ok(mut unreadable) = self.unreadable.lock() {
            unreadable.push(page_file.display().to_string());
        }
    }
}
