//! The three batch stages: page selection, record extraction and export.
//!
//! Every unit of work (a document, a page, a processed file) fails on its own:
//! the error is logged and recorded, and its siblings keep going.

use crate::error::{ExportError, IngestError};
use crate::export::FieldCleaner;
use crate::models::{
    ClassifiedPage, DocumentFingerprint, DocumentName, PageText, PipelineOptions, ScoringConfig,
    Segmentation, StormReport,
};
use crate::scoring::classify;
use crate::segments::build_segments;
use crate::splitter::{numbered_page_files, split_pdf_to_pages};
use crate::storage::{
    digest_file, discover_document_dirs, discover_json_files, discover_pdf_files, move_into,
    read_manifest, replace_dir, write_manifest, PageRecord, SelectionManifest, WorkspaceLayout,
};
use crate::traits::{PageObserver, PageOcr, RecordAssembler, SheetSink};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn};

#[derive(Debug, Clone)]
pub struct SkippedItem {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub document: DocumentName,
    pub pages: u32,
    pub kept: usize,
    pub discarded: usize,
    pub relocation_failures: usize,
    pub manifest: PathBuf,
}

#[derive(Debug, Default)]
pub struct SelectionReport {
    pub documents: Vec<SelectionOutcome>,
    pub skipped: Vec<SkippedItem>,
}

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub document: DocumentName,
    pub groups: usize,
    pub events: usize,
    pub error: Option<String>,
    pub output: PathBuf,
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub documents: Vec<ExtractionOutcome>,
    pub skipped: Vec<SkippedItem>,
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub files: usize,
    pub rows: usize,
    pub skipped: Vec<SkippedItem>,
}

/// Splits one source report, classifies every page and moves the rejects to
/// `error/<doc>/`. Kept pages stay in `raw/<doc>/` next to `selection.json`.
pub fn select_document<O>(
    pdf_path: &Path,
    layout: &WorkspaceLayout,
    options: &PipelineOptions,
    ocr: &O,
    observer: &dyn PageObserver,
    run_id: &str,
) -> Result<SelectionOutcome, IngestError>
where
    O: PageOcr + ?Sized,
{
    let document = DocumentName::from_path(pdf_path)
        .ok_or_else(|| IngestError::MissingFileName(pdf_path.display().to_string()))?;
    let _span = info_span!("select", document = %document.name).entered();

    let raw_dir = layout.raw_dir(&document);
    let error_dir = layout.error_dir(&document);
    let total = split_pdf_to_pages(pdf_path, &raw_dir)?;
    if total == 0 {
        return Err(IngestError::InvalidArgument(format!(
            "{} has no pages",
            pdf_path.display()
        )));
    }

    let fingerprint = DocumentFingerprint {
        document: document.clone(),
        source_file: pdf_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string(),
        checksum: digest_file(pdf_path)?,
        run_id: run_id.to_string(),
        selected_at: Utc::now(),
    };

    let mut records = Vec::new();
    let mut relocation_failures = 0;

    for (number, page_file) in numbered_page_files(&raw_dir, "pdf")? {
        let page = PageText {
            number,
            text: recognize_or_empty(ocr, observer, &document, &page_file),
        };
        let classification = classify(&page.text, &options.scoring);
        observer.page_classified(&document, &page, &classification);

        if classification.is_keep() {
            if options.save_ocr_debug_text {
                save_debug_text(layout, &document, &page_file, &page.text);
            }
        } else if let Err(error) = move_into(&page_file, &error_dir) {
            error!(%error, "could not move discarded page");
            relocation_failures += 1;
        }

        records.push(PageRecord {
            number,
            file_name: page_file
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string(),
            classification,
            text: page.text,
        });
    }

    let manifest = SelectionManifest {
        fingerprint,
        threshold: options.scoring.threshold,
        pages: records,
    };
    let manifest_path = write_manifest(&raw_dir, &manifest)?;

    info!(
        pages = total,
        kept = manifest.kept(),
        discarded = manifest.discarded(),
        "selection finished"
    );

    if let Err(error) = move_into(pdf_path, &layout.archived_input) {
        error!(%error, "could not archive source report");
    }

    Ok(SelectionOutcome {
        document,
        pages: total,
        kept: manifest.kept(),
        discarded: manifest.discarded(),
        relocation_failures,
        manifest: manifest_path,
    })
}

fn recognize_or_empty<O>(
    ocr: &O,
    observer: &dyn PageObserver,
    document: &DocumentName,
    page_file: &Path,
) -> String
where
    O: PageOcr + ?Sized,
{
    match ocr.recognize(page_file) {
        Ok(text) => text,
        Err(error) => {
            observer.page_unreadable(document, page_file, &error);
            String::new()
        }
    }
}

fn save_debug_text(layout: &WorkspaceLayout, document: &DocumentName, page_file: &Path, text: &str) {
    let Some(stem) = page_file.file_stem() else {
        return;
    };
    let dir = layout.ocr_debug_dir(document);
    let target = dir.join(stem).with_extension("txt");
    if let Err(error) = fs::create_dir_all(&dir).and_then(|_| fs::write(&target, text)) {
        warn!(path = %target.display(), %error, "could not save ocr text");
    }
}

/// Classified pages of one `raw/<doc>/` directory, in page order. The selection
/// manifest is used when present; otherwise the remaining `_pg<N>` page files
/// are read and scored again. Files without a page index are ignored.
pub fn load_document_pages<O>(
    doc_dir: &Path,
    scoring: &ScoringConfig,
    ocr: &O,
    observer: &dyn PageObserver,
) -> Result<Vec<ClassifiedPage>, IngestError>
where
    O: PageOcr + ?Sized,
{
    if let Some(manifest) = read_manifest(doc_dir)? {
        let mut records = manifest.pages;
        records.sort_by_key(|record| record.number);
        return Ok(records
            .into_iter()
            .map(|record| ClassifiedPage {
                page: PageText {
                    number: record.number,
                    text: record.text,
                },
                classification: record.classification,
            })
            .collect());
    }

    let document = document_for_dir(doc_dir)?;
    let mut pages = Vec::new();
    for (number, page_file) in numbered_page_files(doc_dir, "pdf")? {
        let page = PageText {
            number,
            text: recognize_or_empty(ocr, observer, &document, &page_file),
        };
        let classification = classify(&page.text, scoring);
        observer.page_classified(&document, &page, &classification);
        pages.push(ClassifiedPage {
            page,
            classification,
        });
    }
    Ok(pages)
}

fn document_for_dir(doc_dir: &Path) -> Result<DocumentName, IngestError> {
    doc_dir
        .file_name()
        .and_then(|name| name.to_str())
        .map(DocumentName::new)
        .ok_or_else(|| IngestError::MissingFileName(doc_dir.display().to_string()))
}

/// Loads and segments one document directory.
pub fn segment_document<O>(
    doc_dir: &Path,
    scoring: &ScoringConfig,
    ocr: &O,
    observer: &dyn PageObserver,
) -> Result<(DocumentName, Segmentation), IngestError>
where
    O: PageOcr + ?Sized,
{
    let document = document_for_dir(doc_dir)?;
    let pages = load_document_pages(doc_dir, scoring, ocr, observer)?;
    let segmentation = build_segments(&pages, &scoring.keywords);
    info!(
        document = %document.name,
        pages = segmentation.page_count(),
        groups = segmentation.groups.len(),
        "segmented document"
    );
    Ok((document, segmentation))
}

/// Runs the assembler; a failure becomes a report carrying the error text.
pub async fn assemble_report<A>(
    assembler: &A,
    document: &DocumentName,
    segmentation: &Segmentation,
) -> StormReport
where
    A: RecordAssembler + ?Sized,
{
    let report = match assembler.assemble(document, segmentation).await {
        Ok(report) => report,
        Err(error) => {
            error!(document = %document.name, %error, "record assembly failed");
            StormReport::failed(error.to_string())
        }
    };
    report.stamp(document)
}

/// Writes `processed/<doc>.json` and archives the page directory.
pub fn finish_document(
    doc_dir: &Path,
    layout: &WorkspaceLayout,
    document: &DocumentName,
    report: &StormReport,
) -> Result<PathBuf, IngestError> {
    fs::create_dir_all(&layout.processed)?;
    let output = layout.processed_file(document);
    fs::write(&output, serde_json::to_string_pretty(report)?)?;

    let archive = layout.archived_raw.join(&document.name);
    if let Err(error) = replace_dir(doc_dir, &archive) {
        error!(document = %document.name, %error, "could not archive page directory");
    }
    Ok(output)
}

/// Batch driver over a [`WorkspaceLayout`]. Documents run concurrently, at
/// most `options.jobs` at a time.
pub struct StormPipeline<O>
where
    O: PageOcr,
{
    layout: WorkspaceLayout,
    options: PipelineOptions,
    ocr: Arc<O>,
    observer: Arc<dyn PageObserver>,
}

impl<O> StormPipeline<O>
where
    O: PageOcr + Send + Sync + 'static,
{
    pub fn new(
        layout: WorkspaceLayout,
        options: PipelineOptions,
        ocr: O,
        observer: Arc<dyn PageObserver>,
    ) -> Self {
        Self {
            layout,
            options,
            ocr: Arc::new(ocr),
            observer,
        }
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    fn semaphore(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.options.jobs.max(1)))
    }

    pub async fn select_all(&self) -> Result<SelectionReport, IngestError> {
        self.layout.ensure()?;
        let files = discover_pdf_files(&self.layout.input);
        if files.is_empty() {
            warn!(input = %self.layout.input.display(), "no pdf files to select from");
            return Ok(SelectionReport::default());
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        info!(files = files.len(), %run_id, "starting page selection");

        let mut report = SelectionReport::default();
        let semaphore = self.semaphore();
        let mut handles: Vec<(PathBuf, JoinHandle<Result<SelectionOutcome, IngestError>>)> =
            Vec::new();
        let mut claimed: HashMap<String, PathBuf> = HashMap::new();

        for path in files {
            let Some(document) = DocumentName::from_path(&path) else {
                report.skipped.push(SkippedItem {
                    reason: IngestError::MissingFileName(path.display().to_string()).to_string(),
                    path,
                });
                continue;
            };
            // Two inputs mapping to one name would share raw/<doc>/.
            if let Some(owner) = claimed.get(&document.name) {
                warn!(path = %path.display(), owner = %owner.display(), "document name collides");
                report.skipped.push(SkippedItem {
                    reason: format!(
                        "document name {} collides with {}",
                        document.name,
                        owner.display()
                    ),
                    path,
                });
                continue;
            }
            claimed.insert(document.name, path.clone());

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|error| IngestError::Task(error.to_string()))?;
            let layout = self.layout.clone();
            let options = self.options.clone();
            let ocr = Arc::clone(&self.ocr);
            let observer = Arc::clone(&self.observer);
            let run_id = run_id.clone();
            let source = path.clone();

            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                select_document(&source, &layout, &options, ocr.as_ref(), observer.as_ref(), &run_id)
            });
            handles.push((path, handle));
        }

        for (path, handle) in handles {
            match join_outcome(handle).await {
                Ok(outcome) => report.documents.push(outcome),
                Err(error) => {
                    error!(path = %path.display(), %error, "skipping document");
                    report.skipped.push(SkippedItem {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    pub async fn extract_all<A>(&self, assembler: Arc<A>) -> Result<ExtractionReport, IngestError>
    where
        A: RecordAssembler + Send + Sync + 'static,
    {
        self.layout.ensure()?;
        let dirs = discover_document_dirs(&self.layout.raw);
        if dirs.is_empty() {
            warn!(raw = %self.layout.raw.display(), "no document directories to extract");
            return Ok(ExtractionReport::default());
        }

        let semaphore = self.semaphore();
        let mut handles: Vec<(PathBuf, JoinHandle<Result<ExtractionOutcome, IngestError>>)> =
            Vec::new();

        for dir in dirs {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|error| IngestError::Task(error.to_string()))?;
            let layout = self.layout.clone();
            let scoring = self.options.scoring.clone();
            let ocr = Arc::clone(&self.ocr);
            let observer = Arc::clone(&self.observer);
            let assembler = Arc::clone(&assembler);
            let doc_dir = dir.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let segment_dir = doc_dir.clone();
                let (document, segmentation) = join_outcome(tokio::task::spawn_blocking(move || {
                    segment_document(&segment_dir, &scoring, ocr.as_ref(), observer.as_ref())
                }))
                .await?;

                let report = assemble_report(assembler.as_ref(), &document, &segmentation).await;
                let output = finish_document(&doc_dir, &layout, &document, &report)?;
                info!(
                    document = %document.name,
                    events = report.storm_events.len(),
                    output = %output.display(),
                    "extraction finished"
                );

                Ok::<_, IngestError>(ExtractionOutcome {
                    groups: segmentation.groups.len(),
                    events: report.storm_events.len(),
                    error: report.error.clone(),
                    document,
                    output,
                })
            });
            handles.push((dir, handle));
        }

        let mut report = ExtractionReport::default();
        for (path, handle) in handles {
            match join_outcome(handle).await {
                Ok(outcome) => report.documents.push(outcome),
                Err(error) => {
                    error!(path = %path.display(), %error, "skipping document");
                    report.skipped.push(SkippedItem {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Appends every processed report to `sink`, archiving each file once its
    /// rows are accepted.
    pub async fn export_all<S>(&self, sink: &S) -> Result<ExportReport, ExportError>
    where
        S: SheetSink + ?Sized,
    {
        let cleaner = FieldCleaner::new()?;
        let files = discover_json_files(&self.layout.processed);
        let mut report = ExportReport::default();
        if files.is_empty() {
            warn!(processed = %self.layout.processed.display(), "no processed files to export");
            return Ok(report);
        }

        for path in files {
            let rows = match cleaner.rows_from_report_file(&path) {
                Ok(rows) => rows,
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping processed file");
                    report.skipped.push(SkippedItem {
                        path,
                        reason: error.to_string(),
                    });
                    continue;
                }
            };

            if let Err(error) = sink.append_rows(&rows).await {
                error!(path = %path.display(), %error, "could not append rows");
                report.skipped.push(SkippedItem {
                    path,
                    reason: error.to_string(),
                });
                continue;
            }

            info!(path = %path.display(), rows = rows.len(), "exported rows");
            report.files += 1;
            report.rows += rows.len();

            if let Err(error) = move_into(&path, &self.layout.archived_processed) {
                error!(%error, "could not archive processed file");
            }
        }
        Ok(report)
    }
}

async fn join_outcome<T>(handle: JoinHandle<Result<T, IngestError>>) -> Result<T, IngestError> {
    handle
        .await
        .map_err(|error| IngestError::Task(error.to_string()))?
}
