//! Vision oracle client
//!
//! Talks to the external vision-language model for the two oracle calls the
//! pipeline makes: the cheap yes/no specimen classification and the full
//! grading estimate.
//!
//! The oracle is untrusted. Replies arrive as free text that usually
//! contains JSON; the JSON is extracted and strictly validated before
//! anything downstream sees it. A malformed or incomplete reply is an
//! error for the submission — it is never papered over with
//! plausible-looking default scores.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use mvg_common::config::OracleConfig;
use mvg_common::db::Subgrades;
use mvg_common::{Error, Result};
use serde::Deserialize;
use serde_json::json;

/// Result of the specimen classification call
#[derive(Debug, Clone, Deserialize)]
pub struct Classification {
    /// Whether both images show a single cereal specimen
    #[serde(rename = "isCTC")]
    pub is_ctc: bool,
    /// Classifier confidence in [0, 1]
    pub confidence: f64,
    /// Free-text justification
    #[serde(default)]
    pub reason: String,
}

/// Validated grading estimate from the oracle.
///
/// Only produced after every required field passed validation. The numeric
/// grade here is the oracle's own estimate; the authoritative final grade is
/// recomputed deterministically by the grade aggregator.
#[derive(Debug, Clone)]
pub struct GradingVerdict {
    /// Oracle's grade string, e.g. "PSA 9.5 (Gem Mint)"
    pub grade_text: String,
    /// Numeric grade parsed out of the grade string
    pub grade_value: f64,
    /// Curvature percentage estimated from the side view, when provided
    pub curvature: Option<f64>,
    /// All five category subgrades (validated present and in range)
    pub subgrades: Subgrades,
    /// Free-text analysis notes
    pub notes: String,
}

/// Raw grading reply shape, before validation.
///
/// Every field is optional here so validation can name exactly what is
/// missing instead of failing on the first absent key.
#[derive(Debug, Deserialize)]
struct RawGradingReply {
    grade: Option<String>,
    curvature: Option<f64>,
    subgrades: Option<serde_json::Value>,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

const CLASSIFIER_PROMPT: &str = "You are an expert visual classifier. Determine if BOTH images \
show a single Cinnamon Toast Crunch cereal piece. The first image is a front view, the second a \
side/profile view; accept profile views as valid. Respond STRICTLY as JSON: \
{\"isCTC\": boolean, \"confidence\": number, \"reason\": string}. Only reject if clearly not \
cereal (screenshots, UI, paper, hands, or different foods).";

const GRADING_PROMPT: &str = "You are an expert cereal grading specialist. Grade the specimen \
from the front and side views under strict deductive standards: estimate curvature % from the \
side view (height deviation / half-span x 100; 2-5% is the ideal target), score each category \
on the 1.0-10.0 scale, and be strict. Respond STRICTLY as JSON: {\"grade\": \"PSA X.X (label)\", \
\"curvature\": X.X, \"subgrades\": {\"geometry\": X.X, \"corners\": X.X, \"coating\": X.X, \
\"surface\": X.X, \"alignment\": X.X}, \"notes\": \"detailed observations\"}.";

/// Vision oracle client
pub struct VisionOracle {
    http_client: reqwest::Client,
    config: OracleConfig,
}

impl VisionOracle {
    /// Create a new oracle client with the configured timeout
    pub fn new(config: OracleConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent("mvg-grader/0.1.0")
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::OracleUnavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Classify whether the front/side images show a valid specimen.
    ///
    /// Transport failures map to `OracleUnavailable`, unparseable replies to
    /// `OracleMalformedResponse`. Neither ever defaults to a pass.
    pub async fn classify(&self, front: &[u8], side: &[u8]) -> Result<Classification> {
        let content = self
            .chat(
                &self.config.classifier_model,
                CLASSIFIER_PROMPT,
                "Classify these two images.",
                &[front, side],
                0.0,
                200,
            )
            .await?;

        let classification = parse_classification(&content)?;

        tracing::info!(
            is_ctc = classification.is_ctc,
            confidence = classification.confidence,
            "Classifier oracle replied"
        );

        Ok(classification)
    }

    /// Request a full grading estimate for a specimen.
    ///
    /// The reply must contain a parseable grade string and all five
    /// subgrades; anything less is a `Validation` error surfaced to the
    /// caller, never a fabricated default grade.
    pub async fn grade(
        &self,
        specimen_id: &str,
        front: &[u8],
        side: &[u8],
    ) -> Result<GradingVerdict> {
        tracing::info!(specimen_id = %specimen_id, "Requesting grading estimate from oracle");

        let user_text = format!(
            "Grade this specimen (ID: {}). Analyze both the front and side views carefully \
             and estimate curvature % from the side view.",
            specimen_id
        );

        let content = self
            .chat(
                &self.config.grading_model,
                GRADING_PROMPT,
                &user_text,
                &[front, side],
                0.1,
                1000,
            )
            .await?;

        let verdict = parse_grading_reply(&content)?;

        tracing::info!(
            specimen_id = %specimen_id,
            grade = %verdict.grade_text,
            curvature = ?verdict.curvature,
            "Grading oracle replied"
        );

        Ok(verdict)
    }

    /// One chat-completion round trip with inline base64 images
    async fn chat(
        &self,
        model: &str,
        system_prompt: &str,
        user_text: &str,
        images: &[&[u8]],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String> {
        let mut user_content = vec![json!({ "type": "text", "text": user_text })];
        for image in images {
            user_content.push(json!({
                "type": "image_url",
                "image_url": {
                    "url": format!("data:image/jpeg;base64,{}", BASE64.encode(image)),
                    "detail": "high"
                }
            }));
        }

        let body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_content }
            ],
            "temperature": temperature,
            "max_tokens": max_tokens
        });

        let url = format!("{}/chat/completions", self.config.base_url);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::OracleUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::OracleUnavailable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_text.chars().take(200).collect::<String>()
            )));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::OracleMalformedResponse(e.to_string()))?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::OracleMalformedResponse("Reply contained no content".to_string()))
    }
}

/// Extract the JSON object embedded in a free-text reply (first `{` to last `}`)
fn extract_json(content: &str) -> Result<&str> {
    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(&content[s..=e]),
        _ => Err(Error::OracleMalformedResponse(format!(
            "No JSON object in reply: {}",
            content.chars().take(120).collect::<String>()
        ))),
    }
}

/// Parse and validate a classifier reply
fn parse_classification(content: &str) -> Result<Classification> {
    let raw = extract_json(content)?;
    let classification: Classification = serde_json::from_str(raw)
        .map_err(|e| Error::OracleMalformedResponse(format!("Classifier reply: {}", e)))?;

    if !classification.confidence.is_finite()
        || !(0.0..=1.0).contains(&classification.confidence)
    {
        return Err(Error::OracleMalformedResponse(format!(
            "Classifier confidence out of range: {}",
            classification.confidence
        )));
    }

    Ok(classification)
}

/// Parse and validate a grading reply.
///
/// Validation requires a parseable grade string and all five subgrade keys;
/// missing pieces are named in the error rather than defaulted.
fn parse_grading_reply(content: &str) -> Result<GradingVerdict> {
    let raw_json = extract_json(content)?;
    let raw: RawGradingReply = serde_json::from_str(raw_json)
        .map_err(|e| Error::OracleMalformedResponse(format!("Grading reply: {}", e)))?;

    let grade_text = raw
        .grade
        .ok_or_else(|| Error::Validation("Grading reply missing grade".to_string()))?;

    let grade_value = parse_grade_value(&grade_text).ok_or_else(|| {
        Error::Validation(format!("Unparseable grade string: {:?}", grade_text))
    })?;

    let subgrades_value = raw
        .subgrades
        .ok_or_else(|| Error::Validation("Grading reply missing subgrades".to_string()))?;

    let subgrades = validate_subgrades(&subgrades_value)?;

    if let Some(curvature) = raw.curvature {
        if !curvature.is_finite() || curvature < 0.0 {
            return Err(Error::Validation(format!(
                "Curvature out of range: {}",
                curvature
            )));
        }
    }

    Ok(GradingVerdict {
        grade_text,
        grade_value,
        curvature: raw.curvature,
        subgrades,
        notes: raw.notes.unwrap_or_default(),
    })
}

/// Check every required subgrade key is present and numeric before trusting
fn validate_subgrades(value: &serde_json::Value) -> Result<Subgrades> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::Validation("Subgrades is not an object".to_string()))?;

    let mut missing = Vec::new();
    for key in ["geometry", "corners", "coating", "surface", "alignment"] {
        if !map.get(key).map(|v| v.is_number()).unwrap_or(false) {
            missing.push(key);
        }
    }
    if !missing.is_empty() {
        return Err(Error::Validation(format!(
            "Subgrades missing or non-numeric: {}",
            missing.join(", ")
        )));
    }

    let subgrades: Subgrades = serde_json::from_value(value.clone())
        .map_err(|e| Error::Validation(format!("Subgrades: {}", e)))?;
    subgrades.validate().map_err(Error::Validation)?;

    Ok(subgrades)
}

/// Pull the first numeric token out of a grade string, e.g. "PSA 9.5 (Gem Mint)" -> 9.5
fn parse_grade_value(text: &str) -> Option<f64> {
    let mut token = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() || (c == '.' && !token.is_empty()) {
            token.push(c);
        } else if !token.is_empty() {
            break;
        }
    }
    token.trim_end_matches('.').parse::<f64>().ok()
}
