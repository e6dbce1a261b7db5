use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storm_pages_core::{
    build_segments, classify, numbered_page_files, AssemblerConfig, ClassifiedPage, CsvSheet,
    GeminiAssembler, GoogleSheetsSink, OcrEndpointConfig, PageObserver, PageText,
    PipelineOptions, ScoringConfig, SheetSink, StormPipeline, TesseractOcr, TracingObserver,
    WorkspaceLayout, DEFAULT_MODEL_URL,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "storm-pages", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root of the archive folders (archived_input, archived_raw, archived_processed).
    #[arg(long, env = "ARCHIVE_ROOT", default_value = "data")]
    archive_root: PathBuf,

    /// Folder with the source reports.
    #[arg(long, env = "LOCAL_INPUT_PATH", default_value = "data/input")]
    input: PathBuf,

    /// Folder for kept split pages, one sub-folder per report.
    #[arg(long, env = "LOCAL_RAW_PATH", default_value = "data/raw")]
    raw: PathBuf,

    /// Folder for discarded pages.
    #[arg(long, env = "LOCAL_ERROR_PATH", default_value = "data/error")]
    error: PathBuf,

    /// Folder for extracted JSON reports.
    #[arg(long, env = "LOCAL_PROCESSED_PATH", default_value = "data/processed")]
    processed: PathBuf,

    /// Folder for daily log files and OCR debug text.
    #[arg(long, env = "LOG_PATH", default_value = "data/logs")]
    log_dir: PathBuf,

    /// Minimum number of header keywords for a page to be kept.
    #[arg(long, env = "PAGE_THRESHOLD", default_value = "6")]
    page_threshold: usize,

    /// Save the OCR text of kept pages.
    #[arg(long, env = "SAVE_OCR_DEBUG_TEXT", default_value_t = false)]
    save_ocr_debug_text: bool,

    /// Rasterisation resolution used before tesseract.
    #[arg(long, env = "OCR_DPI", default_value = "200")]
    ocr_dpi: u32,

    /// Multimodal OCR endpoint used when local OCR fails.
    #[arg(long, env = "LLM_OCR_ENDPOINT")]
    llm_ocr_endpoint: Option<String>,

    #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
    llm_ocr_api_key: Option<String>,

    /// Documents processed at the same time.
    #[arg(long, env = "JOBS", default_value = "4")]
    jobs: usize,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL_URL", default_value = DEFAULT_MODEL_URL)]
    gemini_model_url: String,

    /// Run extraction as part of `run`.
    #[arg(long, env = "ENABLE_GEMINI", default_value_t = false)]
    enable_gemini: bool,

    /// Run export as part of `run`.
    #[arg(long, env = "ENABLE_SHEETS_EXPORT", default_value_t = false)]
    enable_sheets_export: bool,

    #[arg(long, env = "GOOGLE_SHEET_ID")]
    google_sheet_id: Option<String>,

    /// OAuth access token for the Sheets API.
    #[arg(long, env = "GOOGLE_SHEETS_TOKEN", hide_env_values = true)]
    google_sheets_token: Option<String>,

    /// CSV file used when no Google sheet is configured.
    #[arg(long, env = "SHEETS_CSV_PATH", default_value = "data/storm_events.csv")]
    sheets_csv_path: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Split, OCR and classify every report in the input folder.
    Select,
    /// Turn selected pages into storm-event JSON with Gemini.
    Extract,
    /// Append processed storm events to the spreadsheet.
    Export,
    /// Select, then extract and export when enabled.
    Run,
    /// Score a single OCR text file.
    Classify {
        file: PathBuf,
    },
    /// Show the segments built from a folder of `<doc>_pg<N>.txt` OCR files.
    Segment {
        dir: PathBuf,
    },
}

impl Cli {
    fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout {
            input: self.input.clone(),
            raw: self.raw.clone(),
            error: self.error.clone(),
            processed: self.processed.clone(),
            ocr_debug: self.log_dir.join("ocr_text"),
            ..WorkspaceLayout::under(&self.archive_root)
        }
    }

    fn scoring(&self) -> ScoringConfig {
        ScoringConfig::with_threshold(self.page_threshold)
    }

    fn pipeline(&self) -> StormPipeline<TesseractOcr> {
        let ocr = TesseractOcr {
            dpi: self.ocr_dpi,
            ..TesseractOcr::default()
        }
        .with_fallback(OcrEndpointConfig::new(
            self.llm_ocr_endpoint.clone(),
            self.llm_ocr_api_key.clone(),
        ));
        let options = PipelineOptions {
            scoring: self.scoring(),
            save_ocr_debug_text: self.save_ocr_debug_text,
            jobs: self.jobs,
        };
        let observer: Arc<dyn PageObserver> = Arc::new(TracingObserver);
        StormPipeline::new(self.layout(), options, ocr, observer)
    }

    fn assembler(&self) -> anyhow::Result<GeminiAssembler> {
        let api_key = self.gemini_api_key.clone().unwrap_or_default();
        let config = AssemblerConfig {
            model_url: self.gemini_model_url.clone(),
            ..AssemblerConfig::new(api_key)
        };
        GeminiAssembler::new(config).context("extraction needs GEMINI_API_KEY")
    }

    fn sheet_sink(&self) -> Box<dyn SheetSink + Send + Sync> {
        match (&self.google_sheet_id, &self.google_sheets_token) {
            (Some(sheet_id), Some(token)) if !sheet_id.is_empty() && !token.is_empty() => {
                info!(sheet_id = %sheet_id, "exporting to google sheets");
                Box::new(GoogleSheetsSink::new(sheet_id, token))
            }
            _ => {
                info!(path = %self.sheets_csv_path.display(), "exporting to csv");
                Box::new(CsvSheet::new(&self.sheets_csv_path))
            }
        }
    }
}

fn init_tracing(log_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log folder {}", log_dir.display()))?;
    let log_file = log_dir.join(format!("{}.log", Utc::now().format("%Y%m%d")));
    let file = File::options()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("opening log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_dir)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "storm-pages boot"
    );

    match &cli.command {
        Command::Select => select(&cli).await?,
        Command::Extract => {
            let assembler = cli.assembler()?;
            extract(&cli, assembler).await?;
        }
        Command::Export => export(&cli).await?,
        Command::Run => {
            let assembler = if cli.enable_gemini {
                Some(cli.assembler()?)
            } else {
                None
            };

            select(&cli).await?;
            match assembler {
                Some(assembler) => {
                    if let Err(error) = extract(&cli, assembler).await {
                        error!(error = %error, "extraction stage failed");
                    }
                }
                None => info!("gemini extraction disabled"),
            }
            if cli.enable_sheets_export {
                if let Err(error) = export(&cli).await {
                    error!(error = %error, "export stage failed");
                }
            } else {
                info!("sheets export disabled");
            }
        }
        Command::Classify { file } => {
            let text = fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))?;
            let outcome = classify(&text, &cli.scoring());
            println!("file: {}", file.display());
            println!("hits: {}", outcome.score.count);
            println!("matched: {}", outcome.score.matched.join(", "));
            match outcome.reason {
                Some(reason) => println!("verdict: {:?} ({reason})", outcome.verdict),
                None => println!("verdict: {:?}", outcome.verdict),
            }
        }
        Command::Segment { dir } => segment(&cli.scoring(), dir)?,
    }

    Ok(())
}

async fn select(cli: &Cli) -> anyhow::Result<()> {
    if !TesseractOcr::is_available() {
        warn!("pdftoppm or tesseract not found; relying on the OCR endpoint if configured");
    }

    let report = cli.pipeline().select_all().await?;
    for skipped in &report.skipped {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped report");
    }
    for outcome in &report.documents {
        println!(
            "{}: pages={} kept={} discarded={}",
            outcome.document.name, outcome.pages, outcome.kept, outcome.discarded
        );
    }
    println!(
        "{} reports selected, {} skipped",
        report.documents.len(),
        report.skipped.len()
    );
    Ok(())
}

async fn extract(cli: &Cli, assembler: GeminiAssembler) -> anyhow::Result<()> {
    let report = cli.pipeline().extract_all(Arc::new(assembler)).await?;
    for skipped in &report.skipped {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
    }
    for outcome in &report.documents {
        match &outcome.error {
            Some(reason) => println!("{}: failed ({reason})", outcome.document.name),
            None => println!(
                "{}: segments={} events={} -> {}",
                outcome.document.name,
                outcome.groups,
                outcome.events,
                outcome.output.display()
            ),
        }
    }
    Ok(())
}

async fn export(cli: &Cli) -> anyhow::Result<()> {
    let sink = cli.sheet_sink();
    let report = cli.pipeline().export_all(sink.as_ref()).await?;
    for skipped in &report.skipped {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped processed file");
    }
    println!(
        "{} rows exported from {} files at {}",
        report.rows,
        report.files,
        Utc::now().to_rfc3339()
    );
    Ok(())
}

fn segment(scoring: &ScoringConfig, dir: &Path) -> anyhow::Result<()> {
    let files = numbered_page_files(dir, "txt")
        .with_context(|| format!("reading {}", dir.display()))?;

    let mut pages = Vec::new();
    for (number, path) in files {
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let page = PageText { number, text };
        let classification = classify(&page.text, scoring);
        pages.push(ClassifiedPage {
            page,
            classification,
        });
    }

    let segmentation = build_segments(&pages, &scoring.keywords);
    for (index, group) in segmentation.groups.iter().enumerate() {
        println!("segment {}: pages {:?}", index + 1, group.page_numbers());
    }
    for marker in &segmentation.markers {
        println!("page {}: {marker}", marker.page());
    }
    println!("{}", segmentation.combined_text);
    Ok(())
}
