use crate::error::AssemblerError;
use crate::models::{DocumentName, Segmentation, StormEvent, StormReport};
use crate::traits::RecordAssembler;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_MODEL_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-lite:generateContent";

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub model_url: String,
    pub api_key: String,
    pub attempts: u32,
    pub retry_wait: Duration,
    pub request_timeout: Duration,
    pub temperature: f32,
}

impl AssemblerConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            model_url: DEFAULT_MODEL_URL.to_string(),
            api_key: api_key.into(),
            attempts: 2,
            retry_wait: Duration::from_secs(80),
            request_timeout: Duration::from_secs(180),
            temperature: 0.1,
        }
    }
}

/// Record assembler backed by the Gemini `generateContent` API.
pub struct GeminiAssembler {
    config: AssemblerConfig,
    client: Client,
}

impl GeminiAssembler {
    pub fn new(config: AssemblerConfig) -> Result<Self, AssemblerError> {
        if config.api_key.trim().is_empty() {
            return Err(AssemblerError::MissingCredential(
                "GEMINI_API_KEY is not set".to_string(),
            ));
        }

        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, client })
    }

    async fn request_once(&self, prompt: &str) -> Result<StormReport, AssemblerError> {
        let url = Url::parse_with_params(&self.config.model_url, &[("key", &self.config.api_key)])?;
        let payload = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": self.config.temperature,
            }
        });

        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(AssemblerError::BackendResponse {
                backend: "gemini".to_string(),
                details: format!("{status}: {details}"),
            });
        }

        let body: Value = response.json().await?;
        parse_generate_content(&body)
    }
}

#[async_trait]
impl RecordAssembler for GeminiAssembler {
    async fn assemble(
        &self,
        document: &DocumentName,
        segmentation: &Segmentation,
    ) -> Result<StormReport, AssemblerError> {
        if segmentation.is_empty() {
            info!(document = %document.name, "no kept pages, skipping extraction call");
            return Ok(StormReport::default());
        }

        let prompt = build_prompt(&segmentation.combined_text, &document.name);
        let attempts = self.config.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            info!(document = %document.name, attempt, "calling gemini");
            match self.request_once(&prompt).await {
                Ok(report) => return Ok(report),
                Err(error) => {
                    warn!(document = %document.name, attempt, %error, "gemini call failed");
                    last_error = error.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_wait).await;
                    }
                }
            }
        }

        Err(AssemblerError::RetriesExhausted {
            attempts,
            last_error,
        })
    }
}

pub fn build_prompt(text: &str, document_name: &str) -> String {
    format!(
        r#"You extract structured storm events from scanned NOAA "Storm Data" reports.

Page boundaries are marked in the text below:
- '--- PAGE N ---' starts a new block of table rows.
- '--- CONTINUED FROM PREVIOUS PAGE ---' means the following text belongs to the
  storm event that was open at the end of the previous page. Merge it into that
  event and do NOT create a new entry for it.

Return only JSON in this shape:
{{
  "month": "",
  "year": "",
  "storm_events": [
    {{
      "state": "",
      "place_or_location": "",
      "date": "",
      "time": "",
      "path_length": "",
      "path_width": "",
      "killed": "",
      "injured": "",
      "property_damage_code": "",
      "crop_damage_code": "",
      "character_of_storm": "",
      "description": ""
    }}
  ]
}}

Document name: {document_name}
Document text:
{text}
"#
    )
}

/// Pulls the model's JSON answer out of a `generateContent` response.
pub fn parse_generate_content(body: &Value) -> Result<StormReport, AssemblerError> {
    let text = body
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| AssemblerError::BackendResponse {
            backend: "gemini".to_string(),
            details: "response has no candidate text".to_string(),
        })?;

    parse_report_text(text)
}

/// Accepts a report object, optionally fenced as ```json, or a bare event list.
pub fn parse_report_text(text: &str) -> Result<StormReport, AssemblerError> {
    let trimmed = text.trim();
    let unfenced = trimmed.strip_prefix("```json").unwrap_or(trimmed);
    let unfenced = unfenced.strip_suffix("```").unwrap_or(unfenced).trim();

    match serde_json::from_str::<Value>(unfenced)? {
        Value::Array(events) => Ok(StormReport {
            storm_events: serde_json::from_value::<Vec<StormEvent>>(Value::Array(events))?,
            ..StormReport::default()
        }),
        object @ Value::Object(_) => Ok(serde_json::from_value(object)?),
        other => Err(AssemblerError::BackendResponse {
            backend: "gemini".to_string(),
            details: format!("expected a JSON object, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageText;
    use crate::segments::SegmentAccumulator;
    use crate::DEFAULT_HEADER_KEYWORDS;

    fn unreachable_config() -> AssemblerConfig {
        AssemblerConfig {
            model_url: "http://127.0.0.1:9/v1beta/models/test:generateContent".to_string(),
            retry_wait: Duration::from_millis(0),
            request_timeout: Duration::from_secs(2),
            ..AssemblerConfig::new("test-key")
        }
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let result = GeminiAssembler::new(AssemblerConfig::new("  "));
        assert!(matches!(result, Err(AssemblerError::MissingCredential(_))));
    }

    #[test]
    fn fenced_report_is_parsed() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{
                    "text": "```json\n{\"month\": \"Jan\", \"year\": \"1993\", \"storm_events\": [{\"state\": \"Texas\", \"killed\": 1}]}\n```"
                }]}
            }]
        });

        let report = parse_generate_content(&body).expect("report should parse");
        assert_eq!(report.month, "Jan");
        assert_eq!(report.storm_events.len(), 1);
        assert_eq!(report.storm_events[0].state, "Texas");
        assert_eq!(report.storm_events[0].killed, "1");
        assert!(report.error.is_none());
    }

    #[test]
    fn bare_event_list_is_accepted() {
        let report = parse_report_text(r#"[{"state": "Ohio"}, {"state": "Iowa"}]"#)
            .expect("list should parse");
        assert_eq!(report.storm_events.len(), 2);
        assert_eq!(report.storm_events[1].state, "Iowa");
    }

    #[test]
    fn response_without_candidates_is_an_error() {
        let result = parse_generate_content(&json!({"candidates": []}));
        assert!(matches!(result, Err(AssemblerError::BackendResponse { .. })));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_report_text("storm events: none").is_err());
        assert!(parse_report_text("42").is_err());
    }

    #[test]
    fn prompt_carries_document_and_markers() {
        let prompt = build_prompt("--- PAGE 1 ---\nlocation date", "jan_1993");
        assert!(prompt.contains("Document name: jan_1993"));
        assert!(prompt.contains("--- PAGE 1 ---\nlocation date"));
        assert!(prompt.contains("\"storm_events\": ["));
    }

    #[tokio::test]
    async fn empty_segmentation_returns_no_events_without_calling() {
        let assembler = GeminiAssembler::new(unreachable_config()).expect("config is valid");
        let report = assembler
            .assemble(&DocumentName::new("feb_1971"), &Segmentation::default())
            .await
            .expect("empty input is not an error");

        assert!(report.storm_events.is_empty());
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn unreachable_service_exhausts_retries() {
        let assembler = GeminiAssembler::new(unreachable_config()).expect("config is valid");
        let segmentation = SegmentAccumulator::default()
            .step(
                PageText {
                    number: 1,
                    text: "Location Date Time".to_string(),
                },
                &DEFAULT_HEADER_KEYWORDS,
            )
            .finish();

        let result = assembler
            .assemble(&DocumentName::new("feb_1971"), &segmentation)
            .await;
        assert!(matches!(
            result,
            Err(AssemblerError::RetriesExhausted { attempts: 2, .. })
        ));
    }
}
