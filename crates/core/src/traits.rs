use crate::error::{AssemblerError, ExportError, IngestError};
use crate::models::{Classification, DocumentName, PageText, Segmentation, StormReport};
use async_trait::async_trait;
use std::path::Path;

/// Turns a single-page PDF into text.
pub trait PageOcr {
    fn recognize(&self, page_pdf: &Path) -> Result<String, IngestError>;
}

/// Structures one document's marker-annotated text into storm events.
#[async_trait]
pub trait RecordAssembler {
    async fn assemble(
        &self,
        document: &DocumentName,
        segmentation: &Segmentation,
    ) -> Result<StormReport, AssemblerError>;
}

/// Destination for flattened storm-event rows.
#[async_trait]
pub trait SheetSink {
    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<(), ExportError>;
}

/// Receives page verdicts from the pipeline. The decision functions never log
/// on their own.
pub trait PageObserver: Send + Sync {
    fn page_classified(&self, document: &DocumentName, page: &PageText, outcome: &Classification);

    fn page_unreadable(&self, document: &DocumentName, page_file: &Path, error: &IngestError);
}
