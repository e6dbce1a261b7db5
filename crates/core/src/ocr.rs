use crate::error::IngestError;
use crate::traits::PageOcr;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_OCR_DPI: u32 = 200;

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

/// Either a flat `text` field or a list of page texts.
#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    pages: Vec<LlmOcrPage>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    text: Option<String>,
}

/// Multimodal OCR service tried when the local tools fail.
#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    /// `None` when no endpoint is configured.
    pub fn new(endpoint: Option<String>, api_key: Option<String>) -> Option<Self> {
        let endpoint = endpoint?.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = api_key.and_then(|value| {
            let key = value.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some(key)
            }
        });

        Some(Self { endpoint, api_key })
    }
}

/// Rasterises a page with `pdftoppm` and reads it with `tesseract`.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub dpi: u32,
    pub tesseract_args: Vec<String>,
    pub fallback: Option<OcrEndpointConfig>,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_OCR_DPI,
            tesseract_args: Vec::new(),
            fallback: None,
        }
    }
}

impl TesseractOcr {
    /// Table layout settings: LSTM engine, single uniform block of text.
    pub fn table_layout(mut self) -> Self {
        self.tesseract_args = ["--oem", "1", "--psm", "6"]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        self
    }

    pub fn with_fallback(mut self, fallback: Option<OcrEndpointConfig>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn is_available() -> bool {
        ["pdftoppm", "tesseract"].iter().all(|tool| {
            Command::new(tool)
                .arg("-v")
                .output()
                .map(|output| output.status.success() || !output.stderr.is_empty())
                .unwrap_or(false)
        })
    }

    fn recognize_locally(&self, page_pdf: &Path) -> Result<String, IngestError> {
        let workdir = tempfile::tempdir()?;
        let image_base = workdir.path().join("page");

        run_tool(
            Command::new("pdftoppm")
                .arg("-r")
                .arg(self.dpi.to_string())
                .arg("-gray")
                .arg("-singlefile")
                .arg("-png")
                .arg(page_pdf)
                .arg(&image_base),
            "pdftoppm",
        )?;

        let image = image_base.with_extension("png");
        let stdout = run_tool(
            Command::new("tesseract")
                .arg(&image)
                .arg("stdout")
                .args(&self.tesseract_args),
            "tesseract",
        )?;

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

impl PageOcr for TesseractOcr {
    fn recognize(&self, page_pdf: &Path) -> Result<String, IngestError> {
        match self.recognize_locally(page_pdf) {
            Ok(text) => Ok(text),
            Err(local_error) => match &self.fallback {
                Some(fallback) => {
                    debug!(page = %page_pdf.display(), error = %local_error, "trying ocr endpoint");
                    extract_with_llm_ocr(fallback, page_pdf).map_err(|ocr_error| {
                        IngestError::OcrFailed(format!(
                            "{local_error}; multimodal OCR fallback failed: {ocr_error}"
                        ))
                    })
                }
                None => Err(local_error),
            },
        }
    }
}

fn run_tool(command: &mut Command, tool: &str) -> Result<Vec<u8>, IngestError> {
    let output = command.output().map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            IngestError::ToolNotFound {
                tool: tool.to_string(),
            }
        } else {
            IngestError::OcrFailed(format!("{tool} failed to start: {error}"))
        }
    })?;

    if !output.status.success() {
        return Err(IngestError::OcrFailed(format!(
            "{tool} exited with {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(output.stdout)
}

fn extract_with_llm_ocr(cfg: &OcrEndpointConfig, page_pdf: &Path) -> Result<String, IngestError> {
    let pdf = std::fs::read(page_pdf)?;
    let payload = LlmOcrRequest {
        pdf_base64: STANDARD.encode(pdf),
        source_path: page_pdf.to_string_lossy().to_string(),
    };

    let client = Client::builder().timeout(Duration::from_secs(180)).build()?;
    let mut request = client.post(&cfg.endpoint).json(&payload);
    if let Some(api_key) = &cfg.api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request.send()?;
    if !response.status().is_success() {
        return Err(IngestError::OcrFailed(format!(
            "multimodal OCR request to {} returned {}",
            cfg.endpoint,
            response.status()
        )));
    }

    let payload: LlmOcrResponse = response.json()?;
    payload_to_text(payload, page_pdf)
}

/// Text of the single page in a response; an all-blank answer is an error.
fn payload_to_text(payload: LlmOcrResponse, page_pdf: &Path) -> Result<String, IngestError> {
    let text = match payload.text {
        Some(text) if !text.trim().is_empty() => text,
        _ => payload
            .pages
            .into_iter()
            .filter_map(|page| page.text)
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    };

    if text.trim().is_empty() {
        return Err(IngestError::OcrFailed(format!(
            "multimodal OCR response was empty for {}",
            page_pdf.display()
        )));
    }
    Ok(text.trim().to_string())
}
