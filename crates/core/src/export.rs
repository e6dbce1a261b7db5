use crate::error::ExportError;
use crate::models::{StormEvent, StormReport};
use crate::traits::SheetSink;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Markers NOAA uses for unknown or unreported values.
const PRESERVED_VALUES: [&str; 3] = ["?", "NR", ""];

pub const SHEET_COLUMNS: [&str; 16] = [
    "month",
    "year",
    "state",
    "place_or_location",
    "date",
    "time",
    "path_length",
    "path_width",
    "killed",
    "injured",
    "property_damage_code",
    "crop_damage_code",
    "character_of_storm",
    "description",
    "file_name",
    "row_index",
];

/// Field-level cleaning applied to numeric-like and date columns at export.
#[derive(Debug, Clone)]
pub struct FieldCleaner {
    digits: Regex,
}

impl FieldCleaner {
    pub fn new() -> Result<Self, ExportError> {
        Ok(Self {
            digits: Regex::new(r"\d+")?,
        })
    }

    fn first_digit_run<'a>(&self, value: &'a str) -> Option<&'a str> {
        let value = value.strip_prefix('\'').unwrap_or(value);
        self.digits.find(value).map(|found| found.as_str())
    }

    /// Keeps the first run of digits of a count or code, e.g. `'12 (est)` → `12`.
    pub fn clean_numeric(&self, value: &str) -> String {
        let value = value.trim();
        if PRESERVED_VALUES.contains(&value) {
            return value.to_string();
        }
        self.first_digit_run(value).unwrap_or_default().to_string()
    }

    /// Keeps the day of month, e.g. `09-12` → `09`.
    pub fn clean_date(&self, value: &str) -> String {
        let value = value.trim();
        if PRESERVED_VALUES.contains(&value) {
            return value.to_string();
        }
        self.first_digit_run(value)
            .map(|digits| digits.chars().take(2).collect())
            .unwrap_or_default()
    }

    /// One sheet row in [`SHEET_COLUMNS`] order; `row_index` is 1-based.
    pub fn flatten_event(
        &self,
        event: &StormEvent,
        month: &str,
        year: &str,
        file_name: &str,
        row_index: usize,
    ) -> Vec<String> {
        vec![
            month.to_string(),
            year.to_string(),
            event.state.clone(),
            event.place_or_location.clone(),
            self.clean_date(&event.date),
            event.time.clone(),
            self.clean_numeric(&event.path_length),
            self.clean_numeric(&event.path_width),
            self.clean_numeric(&event.killed),
            self.clean_numeric(&event.injured),
            self.clean_numeric(&event.property_damage_code),
            self.clean_numeric(&event.crop_damage_code),
            event.character_of_storm.clone(),
            event.description.clone(),
            file_name.to_string(),
            row_index.to_string(),
        ]
    }

    /// Reads a processed report and turns its events into sheet rows.
    pub fn rows_from_report_file(&self, path: &Path) -> Result<Vec<Vec<String>>, ExportError> {
        let body = std::fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&body)?;

        if !value
            .get("storm_events")
            .is_some_and(serde_json::Value::is_array)
        {
            return Err(ExportError::InvalidFile {
                path: path.to_path_buf(),
                details: "missing storm_events list".to_string(),
            });
        }

        let report: StormReport = serde_json::from_value(value)?;
        let (month, year) = month_year_from_file(path);
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();

        Ok(report
            .storm_events
            .iter()
            .enumerate()
            .map(|(index, event)| self.flatten_event(event, &month, &year, file_name, index + 1))
            .collect())
    }
}

/// `jan_1993.json` → (`jan`, `1993`).
pub fn month_year_from_file(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() >= 2 {
        (parts[0].to_string(), parts[1].to_string())
    } else {
        (String::new(), String::new())
    }
}

/// Appends rows to a local CSV file, writing the header when the file is new.
pub struct CsvSheet {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvSheet {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SheetSink for CsvSheet {
    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<(), ExportError> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut buffer = String::new();
        if is_new {
            let header: Vec<String> = SHEET_COLUMNS.iter().map(|column| column.to_string()).collect();
            push_csv_record(&mut buffer, &header);
        }
        for row in rows {
            push_csv_record(&mut buffer, row);
        }

        file.write_all(buffer.as_bytes())?;
        Ok(())
    }
}

fn push_csv_record(buffer: &mut String, fields: &[String]) {
    let encoded: Vec<String> = fields.iter().map(|field| quote_csv_field(field)).collect();
    buffer.push_str(&encoded.join(","));
    buffer.push_str("\r\n");
}

fn quote_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Appends rows to the first sheet of a Google spreadsheet through the
/// Sheets v4 `values:append` endpoint.
pub struct GoogleSheetsSink {
    client: Client,
    endpoint: String,
    sheet_id: String,
    access_token: String,
    range: String,
}

impl GoogleSheetsSink {
    pub fn new(sheet_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: "https://sheets.googleapis.com/v4/spreadsheets".to_string(),
            sheet_id: sheet_id.into(),
            access_token: access_token.into(),
            range: "A1".to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn append_url(&self) -> String {
        format!(
            "{}/{}/values/{}:append?valueInputOption=USER_ENTERED&insertDataOption=INSERT_ROWS",
            self.endpoint.trim_end_matches('/'),
            self.sheet_id,
            self.range
        )
    }
}

#[async_trait]
impl SheetSink for GoogleSheetsSink {
    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<(), ExportError> {
        if rows.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.append_url())
            .bearer_auth(&self.access_token)
            .json(&json!({ "values": rows }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(ExportError::Rejected(format!("{status}: {details}")));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cleaner() -> FieldCleaner {
        FieldCleaner::new().expect("digit pattern compiles")
    }

    #[test]
    fn numeric_cleaning_preserves_unknown_markers() {
        let cleaner = cleaner();
        for marker in ["?", "NR", ""] {
            assert_eq!(cleaner.clean_numeric(marker), marker);
            assert_eq!(cleaner.clean_date(marker), marker);
        }
        assert_eq!(cleaner.clean_numeric("  NR "), "NR");
    }

    #[test]
    fn numeric_cleaning_keeps_first_digit_run() {
        let cleaner = cleaner();
        assert_eq!(cleaner.clean_numeric("'12"), "12");
        assert_eq!(cleaner.clean_numeric("'09-12"), "09");
        assert_eq!(cleaner.clean_numeric("3 miles, then 4"), "3");
        assert_eq!(cleaner.clean_numeric("unknown"), "");
    }

    #[test]
    fn date_cleaning_truncates_to_two_digits() {
        let cleaner = cleaner();
        assert_eq!(cleaner.clean_date("09-12"), "09");
        assert_eq!(cleaner.clean_date("'1993"), "19");
        assert_eq!(cleaner.clean_date("May 7"), "7");
        assert_eq!(cleaner.clean_date("late"), "");
    }

    #[test]
    fn month_and_year_come_from_file_stem() {
        assert_eq!(
            month_year_from_file(Path::new("processed/jan_1993.json")),
            ("jan".to_string(), "1993".to_string())
        );
        assert_eq!(
            month_year_from_file(Path::new("summary.json")),
            (String::new(), String::new())
        );
    }

    #[test]
    fn flattened_row_follows_column_order() {
        let event = StormEvent {
            state: "Kansas".to_string(),
            place_or_location: "Dodge City".to_string(),
            date: "09-12".to_string(),
            time: "1530".to_string(),
            path_length: "'4".to_string(),
            path_width: "100 yds".to_string(),
            killed: "?".to_string(),
            injured: "NR".to_string(),
            property_damage_code: "5".to_string(),
            crop_damage_code: "".to_string(),
            character_of_storm: "Tornado".to_string(),
            description: "Barn destroyed.".to_string(),
        };

        let row = cleaner().flatten_event(&event, "jan", "1993", "jan_1993.json", 3);
        assert_eq!(row.len(), SHEET_COLUMNS.len());
        assert_eq!(
            row,
            vec![
                "jan", "1993", "Kansas", "Dodge City", "09", "1530", "4", "100", "?", "NR", "5",
                "", "Tornado", "Barn destroyed.", "jan_1993.json", "3",
            ]
        );
    }

    #[test]
    fn report_without_event_list_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("jan_1993.json");
        std::fs::write(&path, r#"{"month": "Jan", "storm_events": "none"}"#)?;

        let result = cleaner().rows_from_report_file(&path);
        assert!(matches!(result, Err(ExportError::InvalidFile { .. })));
        Ok(())
    }

    #[test]
    fn report_rows_are_numbered_from_one() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("mar_1972.json");
        std::fs::write(
            &path,
            r#"{"month": "Mar", "year": "1972", "storm_events": [{"state": "Utah"}, {"state": "Idaho", "killed": 2}]}"#,
        )?;

        let rows = cleaner().rows_from_report_file(&path)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "mar");
        assert_eq!(rows[1][2], "Idaho");
        assert_eq!(rows[1][8], "2");
        assert_eq!(rows[1][15], "2");
        Ok(())
    }

    #[tokio::test]
    async fn csv_sheet_writes_header_once_and_quotes_fields() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("out").join("storm_events.csv");
        let sheet = CsvSheet::new(&path);

        sheet
            .append_rows(&[vec!["a".to_string(), "b, c".to_string()]])
            .await?;
        sheet
            .append_rows(&[vec!["say \"hi\"".to_string(), "d".to_string()]])
            .await?;

        let written = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = written.split("\r\n").filter(|line| !line.is_empty()).collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("month,year,state"));
        assert_eq!(lines[1], "a,\"b, c\"");
        assert_eq!(lines[2], "\"say \"\"hi\"\"\",d");
        Ok(())
    }

    #[test]
    fn sheets_append_url_uses_user_entered_values() {
        let sink = GoogleSheetsSink::new("sheet-123", "token").with_endpoint("http://localhost/v4/spreadsheets/");
        assert_eq!(
            sink.append_url(),
            "http://localhost/v4/spreadsheets/sheet-123/values/A1:append?valueInputOption=USER_ENTERED&insertDataOption=INSERT_ROWS"
        );
    }
}
