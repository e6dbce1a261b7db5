pub mod assembler;
pub mod continuation;
pub mod error;
pub mod export;
pub mod models;
pub mod observer;
pub mod ocr;
pub mod pipeline;
pub mod scoring;
pub mod segments;
pub mod splitter;
pub mod storage;
pub mod traits;

pub use assembler::{AssemblerConfig, GeminiAssembler, DEFAULT_MODEL_URL};
pub use continuation::{continuation_signal, is_continuation, ContinuationSignal};
pub use error::{AssemblerError, ExportError, IngestError};
pub use export::{CsvSheet, FieldCleaner, GoogleSheetsSink, SHEET_COLUMNS};
pub use models::{
    ClassifiedPage, Classification, DiscardReason, DocumentFingerprint, DocumentName,
    KeywordScore, PageGroup, PageText, PipelineOptions, ScoringConfig, SegmentMarker,
    Segmentation, StormEvent, StormReport, Verdict, DEFAULT_HEADER_KEYWORDS,
    DEFAULT_PAGE_THRESHOLD,
};
pub use observer::{RecordingObserver, TracingObserver};
pub use ocr::{OcrEndpointConfig, TesseractOcr, DEFAULT_OCR_DPI};
pub use pipeline::{
    assemble_report, finish_document, load_document_pages, segment_document, select_document,
    ExportReport, ExtractionOutcome, ExtractionReport, SelectionOutcome, SelectionReport,
    SkippedItem, StormPipeline,
};
pub use scoring::{classify, normalize_ocr_text, score};
pub use segments::{build_segments, SegmentAccumulator};
pub use splitter::{
    list_page_files, numbered_page_files, page_file_name, page_index_from_path, split_pdf_to_pages,
};
pub use storage::{SelectionManifest, WorkspaceLayout, MANIFEST_FILE};
pub use traits::{PageObserver, PageOcr, RecordAssembler, SheetSink};
