use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ModelConfig;
use crate::fields::CandidateFields;

/// A document ready for extraction: either raw image pixels or text already
/// extracted upstream.
#[derive(Debug, Clone)]
pub enum DocumentInput {
    Image { media_type: String, data: Vec<u8> },
    Text(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("extraction service unreachable: {0}")]
    Transport(String),
    #[error("extraction service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("malformed extraction response: {0}")]
    MalformedResponse(String),
}

const EXTRACTION_INSTRUCTION: &str = "\
You extract payment fields from Italian bills and invoices. \
Reply with ONLY a JSON object, no prose, with exactly these keys: \
\"ente\" (payee display name, or null), \
\"iban\" (bank account IBAN, or null), \
\"amount\" (the bill's TOTAL DUE as a plain decimal number in the document's currency \
— never a partial amount, a reading or any other figure, or null), \
\"scadenza\" (due date in YYYY-MM-DD form, or null), \
\"descr\" (a short description of what the bill is for, or null). \
Use null for anything you cannot read.";

/// Issues one structured-extraction request per document against an
/// Ollama-style generate endpoint. May fail or return partial/invalid data;
/// the merger re-validates everything it says.
pub struct ModelExtractor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_text_chars: usize,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// The model's amount may arrive as a JSON number or a numeric string.
#[derive(Deserialize)]
struct RawCandidates {
    #[serde(default)]
    ente: Option<String>,
    #[serde(default)]
    iban: Option<String>,
    #[serde(default)]
    amount: Option<serde_json::Value>,
    #[serde(default)]
    scadenza: Option<String>,
    #[serde(default)]
    descr: Option<String>,
}

impl ModelExtractor {
    pub fn new(config: &ModelConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            max_text_chars: config.max_text_chars,
        })
    }

    pub async fn extract(&self, document: &DocumentInput) -> Result<CandidateFields, ExtractError> {
        let (prompt, images) = match document {
            DocumentInput::Image { data, media_type } => {
                log::debug!("sending {} bytes of {} for extraction", data.len(), media_type);
                (
                    "Extract the payment fields from the attached bill.".to_string(),
                    Some(vec![general_purpose::STANDARD.encode(data)]),
                )
            }
            DocumentInput::Text(text) => {
                let bounded = truncate_chars(text, self.max_text_chars);
                (
                    format!("Extract the payment fields from this bill text:\n\n{bounded}"),
                    None,
                )
            }
        };

        let body = GenerateRequest {
            model: &self.model,
            system: EXTRACTION_INSTRUCTION,
            prompt: &prompt,
            stream: false,
            images,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::MalformedResponse(e.to_string()))?;

        parse_model_output(&generated.response)
    }
}

/// Parse the model's reply into candidate fields. Code fences around the
/// JSON are tolerated; anything that still fails to parse is an error the
/// caller degrades on, never a crash.
pub fn parse_model_output(output: &str) -> Result<CandidateFields, ExtractError> {
    let stripped = strip_code_fences(output);
    let raw: RawCandidates = serde_json::from_str(stripped)
        .map_err(|e| ExtractError::MalformedResponse(e.to_string()))?;

    Ok(CandidateFields {
        ente: raw.ente,
        iban: raw.iban,
        amount: raw.amount.and_then(|v| coerce_number(&v)),
        scadenza: raw.scadenza,
        descr: raw.descr,
    })
}

fn coerce_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn strip_code_fences(output: &str) -> &str {
    let trimmed = output.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
