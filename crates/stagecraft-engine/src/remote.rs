use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use stagecraft_contracts::suggestions::{SceneAnalysis, Suggestion};

use crate::normalize::encode_jpeg;
use crate::prompt;

pub const ANALYSIS_MODEL: &str = "gemini-2.5-flash";
pub const IMAGE_MODEL: &str = "gemini-2.5-flash-image";

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// The remote generative service, reduced to the four operations this
/// workflow needs. Implementations must be shareable across the
/// orchestrator's viewpoint workers.
pub trait SceneModelClient: Send + Sync {
    /// One image plus a free-text subject description; exactly three named
    /// scene suggestions back.
    fn analyze(&self, image_jpeg: &[u8], subject_details: &str) -> Result<SceneAnalysis>;

    /// A minor variation of the given creative instruction.
    fn enhance(&self, user_prompt: &str) -> Result<String>;

    /// One staged PNG plus one instruction; one image back. Failures may
    /// carry a content-policy block reason.
    fn generate(&self, staged_png: &[u8], instruction: &str) -> Result<ImageBytes>;

    /// Base + mask + optional subject + instruction; one image back. A
    /// text-only reply is a distinct failure surfaced with the text.
    fn inpaint(
        &self,
        base_png: &[u8],
        mask_png: &[u8],
        subject_jpeg: Option<&[u8]>,
        instruction: &str,
    ) -> Result<ImageBytes>;
}

pub struct GeminiClient {
    api_base: String,
    http: HttpClient,
    request_timeout: Duration,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            http: HttpClient::new(),
            request_timeout: request_timeout_from_env(),
        }
    }

    fn api_key() -> Result<String> {
        non_empty_env("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .context("GEMINI_API_KEY or GOOGLE_API_KEY not set")
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn post(&self, model: &str, payload: &Value) -> Result<Value> {
        let api_key = Self::api_key()?;
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .timeout(self.request_timeout)
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneModelClient for GeminiClient {
    fn analyze(&self, image_jpeg: &[u8], subject_details: &str) -> Result<SceneAnalysis> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt::analysis_instruction(subject_details) },
                    inline_part("image/jpeg", image_jpeg),
                ],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": analysis_response_schema(),
            },
        });
        let response = self.post(ANALYSIS_MODEL, &payload)?;
        let Some(text) = extract_text(&response) else {
            bail!("AI returned non-JSON response for analysis.");
        };
        SceneAnalysis::from_json(&text)
    }

    fn enhance(&self, user_prompt: &str) -> Result<String> {
        let payload = json!({
            "systemInstruction": {
                "parts": [{ "text": prompt::ENHANCE_SYSTEM_INSTRUCTION }],
            },
            "contents": [{
                "role": "user",
                "parts": [{ "text": user_prompt }],
            }],
        });
        let response = self.post(ANALYSIS_MODEL, &payload)?;
        let text = extract_text(&response).context("enhance returned no text")?;
        Ok(text.trim().to_string())
    }

    fn generate(&self, staged_png: &[u8], instruction: &str) -> Result<ImageBytes> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": instruction },
                    inline_part("image/png", staged_png),
                ],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
            },
        });
        let response = self.post(IMAGE_MODEL, &payload)?;
        match extract_inline_image(&response)? {
            Some(image) => Ok(image),
            None => bail!(
                "API failed to generate a valid image. Reason: {}",
                block_reason(&response)
            ),
        }
    }

    fn inpaint(
        &self,
        base_png: &[u8],
        mask_png: &[u8],
        subject_jpeg: Option<&[u8]>,
        instruction: &str,
    ) -> Result<ImageBytes> {
        let mut parts = vec![
            json!({ "text": instruction }),
            inline_part("image/png", base_png),
            inline_part("image/png", mask_png),
        ];
        if let Some(subject) = subject_jpeg {
            parts.push(inline_part("image/jpeg", subject));
        }
        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"],
            },
        });
        let response = self.post(IMAGE_MODEL, &payload)?;
        if let Some(image) = extract_inline_image(&response)? {
            return Ok(image);
        }
        if let Some(text) = extract_text(&response) {
            bail!("AI failed to generate image, responded with text: {text}");
        }
        bail!(
            "API failed to generate a valid image. Reason: {}",
            block_reason(&response)
        );
    }
}

/// Deterministic stand-in for the remote service: solid-color artifacts
/// seeded from the instruction text, canned suggestions. Used by tests and
/// the CLI's offline mode.
#[derive(Debug, Default)]
pub struct OfflineClient;

impl OfflineClient {
    pub fn new() -> Self {
        Self
    }

    fn solid_image(seed: &str) -> Result<ImageBytes> {
        let digest = Sha256::digest(seed.as_bytes());
        let mut image = RgbImage::new(1024, 1024);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([digest[0], digest[1], digest[2]]);
        }
        let bytes = encode_jpeg(&image::DynamicImage::ImageRgb8(image), 95)?;
        Ok(ImageBytes {
            bytes,
            mime_type: Some("image/jpeg".to_string()),
        })
    }
}

impl SceneModelClient for OfflineClient {
    fn analyze(&self, _image_jpeg: &[u8], subject_details: &str) -> Result<SceneAnalysis> {
        let subject = subject_details.trim();
        let suggestion = |scene: &str| Suggestion {
            prompt: format!("{subject}置於{scene}，柔和景深，比例以鄰近參照物錨定"),
            focus: format!("{subject}的質感與輪廓"),
            lighting: "單一主光源，45度側光，輕微補光".to_string(),
        };
        Ok(SceneAnalysis {
            usage_scenario: suggestion("日常使用場景"),
            result_display: suggestion("成果展示檯面"),
            still_life: suggestion("靜物擺設桌面"),
        })
    }

    fn enhance(&self, user_prompt: &str) -> Result<String> {
        Ok(format!("{}，光線再柔和一些", user_prompt.trim()))
    }

    fn generate(&self, _staged_png: &[u8], instruction: &str) -> Result<ImageBytes> {
        Self::solid_image(instruction)
    }

    fn inpaint(
        &self,
        _base_png: &[u8],
        _mask_png: &[u8],
        subject_jpeg: Option<&[u8]>,
        instruction: &str,
    ) -> Result<ImageBytes> {
        let seed = format!("inpaint:{}:{}", subject_jpeg.is_some(), instruction);
        Self::solid_image(&seed)
    }
}

/// Short hex digest of an instruction, for event payloads and offline
/// artifact labels.
pub fn prompt_digest(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..4])
}

fn inline_part(mime_type: &str, bytes: &[u8]) -> Value {
    json!({
        "inlineData": {
            "mimeType": mime_type,
            "data": BASE64.encode(bytes),
        }
    })
}

fn analysis_response_schema() -> Value {
    let suggestion = json!({
        "type": "OBJECT",
        "properties": {
            "prompt": { "type": "STRING" },
            "focus": { "type": "STRING" },
            "lighting": { "type": "STRING" },
        },
    });
    json!({
        "type": "OBJECT",
        "properties": {
            "usage_scenario": suggestion.clone(),
            "result_display": suggestion.clone(),
            "still_life": suggestion,
        },
    })
}

/// First text part of the first candidate, if any.
fn extract_text(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    parts
        .iter()
        .find_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

/// First inline-data part across all candidates, decoded.
fn extract_inline_image(response: &Value) -> Result<Option<ImageBytes>> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64
                .decode(data.as_bytes())
                .context("Gemini image base64 decode failed")?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(Some(ImageBytes { bytes, mime_type }));
        }
    }
    Ok(None)
}

fn block_reason(response: &Value) -> String {
    response
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string()
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn request_timeout_from_env() -> Duration {
    let seconds = non_empty_env("STAGECRAFT_REQUEST_TIMEOUT")
        .and_then(|raw| raw.parse::<f64>().ok())
        .unwrap_or(90.0)
        .clamp(15.0, 300.0);
    Duration::from_secs_f64(seconds)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
