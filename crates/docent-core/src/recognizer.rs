//! Gemini-backed artifact recognizer.
//!
//! One `generateContent` request per capture: system instruction, inline
//! image, a prompt listing the catalog candidates, and a strict JSON
//! response schema. Every failure degrades to a not-found verdict.

use crate::catalog::Catalog;
use crate::types::{EncodedImage, Verdict};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Bounds connection setup only; replies are awaited for as long as they take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response has no text")]
    EmptyResponse,
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Anything that can turn a captured image into a verdict.
///
/// Implementations never fail: errors become [`Verdict::not_found`].
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn identify(&self, image: &EncodedImage) -> Verdict;
}

/// Delivers a serialized request and returns the raw response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &GenerateContentRequest) -> Result<String, RecognizerError>;
}

// --- Wire types (Gemini REST, camelCase) ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub system_instruction: Content,
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData(InlineData),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: &'static str,
    /// Raw base64, no data-URL prefix.
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_mime_type: &'static str,
    pub response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// reqwest transport for the public Gemini endpoint.
pub struct HttpTransport {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(api_base: &str, model: &str, api_key: &str) -> Result<Self, RecognizerError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            url: format!(
                "{}/models/{model}:generateContent",
                api_base.trim_end_matches('/')
            ),
            api_key: api_key.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &GenerateContentRequest) -> Result<String, RecognizerError> {
        let response = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RecognizerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// Recognizer that asks a Gemini model to pick among the catalog artifacts.
pub struct GeminiRecognizer<T = HttpTransport> {
    transport: T,
    catalog: Arc<Catalog>,
    prompt: String,
}

impl<T: Transport> GeminiRecognizer<T> {
    pub fn new(transport: T, catalog: Arc<Catalog>) -> Self {
        let prompt = candidate_prompt(&catalog);
        Self {
            transport,
            catalog,
            prompt,
        }
    }

    /// Build the request for one image.
    pub fn build_request(&self, image: &EncodedImage) -> GenerateContentRequest {
        let text = self.catalog.recognition();
        GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text(text.system_instruction.clone())],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![
                    Part::InlineData(InlineData {
                        mime_type: image.mime.as_str(),
                        data: image.to_base64(),
                    }),
                    Part::Text(self.prompt.clone()),
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: verdict_schema(&text.artifact_id_hint, &text.confidence_hint),
            },
        }
    }

    async fn try_identify(&self, image: &EncodedImage) -> Result<Verdict, RecognizerError> {
        let request = self.build_request(image);
        let body = self.transport.send(&request).await?;
        let raw = parse_verdict(&body)?;
        Ok(resolve_against(raw, &self.catalog))
    }
}

#[async_trait]
impl<T: Transport> Recognizer for GeminiRecognizer<T> {
    async fn identify(&self, image: &EncodedImage) -> Verdict {
        tracing::debug!(mime = image.mime.as_str(), bytes = image.bytes.len(), "identify requested");
        match self.try_identify(image).await {
            Ok(verdict) => {
                tracing::info!(
                    found = verdict.found,
                    artifact = ?verdict.artifact_id,
                    confidence = verdict.confidence,
                    "recognition verdict"
                );
                verdict
            }
            Err(e) => {
                tracing::warn!(error = %e, "recognition failed; treating as not found");
                Verdict::not_found()
            }
        }
    }
}

/// Prompt text enumerating every candidate with its description.
fn candidate_prompt(catalog: &Catalog) -> String {
    let candidates = catalog
        .artifacts()
        .iter()
        .map(|a| format!("{} ({})", a.name, a.description))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} {candidates}?", catalog.recognition().prompt_preamble)
}

fn verdict_schema(id_hint: &str, confidence_hint: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "found": { "type": "BOOLEAN" },
            "artifactId": { "type": "STRING", "description": id_hint },
            "confidence": { "type": "NUMBER", "description": confidence_hint },
        },
        "required": ["found", "confidence"],
    })
}

/// Extract the verdict JSON from a `generateContent` response body.
fn parse_verdict(body: &str) -> Result<Verdict, RecognizerError> {
    let response: GenerateContentResponse = serde_json::from_str(body)?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(RecognizerError::EmptyResponse);
    }
    Ok(serde_json::from_str(&text)?)
}

/// Never surface an identifier the catalog cannot resolve.
fn resolve_against(verdict: Verdict, catalog: &Catalog) -> Verdict {
    let confidence = if verdict.confidence.is_finite() {
        verdict.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    if !verdict.found {
        return Verdict {
            found: false,
            artifact_id: None,
            confidence,
        };
    }

    match verdict.artifact_id {
        Some(id) if catalog.contains(&id) => Verdict {
            found: true,
            artifact_id: Some(id),
            confidence,
        },
        other => {
            tracing::warn!(artifact = ?other, "model reported an artifact outside the catalog");
            Verdict::not_found()
        }
    }
}
