use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// Column headers printed on NOAA "Storm Data" table pages.
pub const DEFAULT_HEADER_KEYWORDS: [&str; 15] = [
    "location",
    "place",
    "date",
    "time",
    "path",
    "mile",
    "yard",
    "killed",
    "injured",
    "damage",
    "property",
    "crops",
    "character",
    "character of storm",
    "storm data",
];

pub const DEFAULT_PAGE_THRESHOLD: usize = 6;

/// Keyword vocabulary and cutoff used to decide whether a page is a storm table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoringConfig {
    pub threshold: usize,
    pub keywords: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_PAGE_THRESHOLD,
            keywords: DEFAULT_HEADER_KEYWORDS
                .iter()
                .map(|keyword| keyword.to_string())
                .collect(),
        }
    }
}

impl ScoringConfig {
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }
}

/// Distinct header keywords found on a page, in vocabulary order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordScore {
    pub count: usize,
    pub matched: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Keep,
    Discard,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// OCR produced nothing but whitespace.
    EmptyText,
    /// Fewer header keywords than the threshold.
    LowScore,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::EmptyText => f.write_str("empty_text"),
            DiscardReason::LowScore => f.write_str("low_score"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DiscardReason>,
    pub score: KeywordScore,
}

impl Classification {
    pub fn is_keep(&self) -> bool {
        self.verdict == Verdict::Keep
    }
}

/// OCR text of one page, with its 1-based position in the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPage {
    pub page: PageText,
    pub classification: Classification,
}

/// Boundary annotation placed in front of each kept page in the combined text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentMarker {
    DocumentStart { page: u32 },
    Continued { page: u32 },
    NewSegment { page: u32 },
}

impl SegmentMarker {
    pub fn page(&self) -> u32 {
        match self {
            SegmentMarker::DocumentStart { page }
            | SegmentMarker::Continued { page }
            | SegmentMarker::NewSegment { page } => *page,
        }
    }
}

impl fmt::Display for SegmentMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentMarker::DocumentStart { page } | SegmentMarker::NewSegment { page } => {
                write!(f, "--- PAGE {page} ---")
            }
            SegmentMarker::Continued { .. } => f.write_str("--- CONTINUED FROM PREVIOUS PAGE ---"),
        }
    }
}

/// One logical record block: consecutive kept pages, never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageGroup {
    pages: Vec<PageText>,
}

impl PageGroup {
    pub fn new(first: PageText) -> Self {
        Self { pages: vec![first] }
    }

    pub(crate) fn push(&mut self, page: PageText) {
        self.pages.push(page);
    }

    pub fn pages(&self) -> &[PageText] {
        &self.pages
    }

    pub fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().map(|page| page.number).collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmentation {
    pub groups: Vec<PageGroup>,
    pub markers: Vec<SegmentMarker>,
    pub combined_text: String,
}

impl Segmentation {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.groups.iter().map(PageGroup::len).sum()
    }
}

/// Identity of a storm report, derived from its file name (`jan_1993.pdf`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentName {
    pub name: String,
    pub month: String,
    pub year: String,
}

impl DocumentName {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut parts = name.split('_');
        let month = parts.next().map(capitalize).unwrap_or_default();
        let year = parts.next().unwrap_or_default().to_string();

        Self { name, month, year }
    }

    /// `Jan 1993.pdf` becomes `jan_1993`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?;
        Some(Self::new(stem.replace(' ', "_").to_lowercase()))
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StormEvent {
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub place_or_location: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub time: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub path_length: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub path_width: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub killed: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub injured: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub property_damage_code: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub crop_damage_code: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub character_of_storm: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
}

/// LLM output is loosely typed: numbers and nulls are accepted for text columns.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
    })
}

/// Per-document artifact written to `processed/<name>.json`.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StormReport {
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub storm_events: Vec<StormEvent>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StormReport {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn stamp(mut self, document: &DocumentName) -> Self {
        self.month = document.month.clone();
        self.year = document.year.clone();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document: DocumentName,
    pub source_file: String,
    pub checksum: String,
    pub run_id: String,
    pub selected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub scoring: ScoringConfig,
    pub save_ocr_debug_text: bool,
    pub jobs: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            save_ocr_debug_text: false,
            jobs: 4,
        }
    }
}
