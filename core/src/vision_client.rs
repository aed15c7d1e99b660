//! HTTP client for the vision models behind the verifier.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use serde_json::json;

use crate::capability::CapturedImage;
use crate::error::AutopilotErr;
use crate::error::Result;

/// One round trip to a vision model: prompt plus screenshot in, raw text
/// out. Swappable so the verifier can be exercised without network access.
pub trait VisionModelClient: Send + Sync {
    fn analyze(
        &self,
        model: &str,
        prompt: &str,
        image: &CapturedImage,
    ) -> BoxFuture<'static, Result<String>>;
}

/// Client for the Gemini `generateContent` REST surface.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

impl VisionModelClient for GeminiClient {
    fn analyze(
        &self,
        model: &str,
        prompt: &str,
        image: &CapturedImage,
    ) -> BoxFuture<'static, Result<String>> {
        let url = format!(
            "{}/models/{model}:generateContent?key={}",
            self.base_url, self.api_key
        );
        let body = json!({
            "contents": [{
                "parts": [
                    {"text": prompt},
                    {"inline_data": {
                        "mime_type": "image/jpeg",
                        "data": BASE64.encode(&image.data),
                    }},
                ],
            }],
            "generationConfig": {
                "temperature": 0.3,
                "topP": 0.95,
                "topK": 40,
                "maxOutputTokens": 1024,
            },
        });
        let http = self.http.clone();
        let model = model.to_string();

        async move {
            let response = http.post(url).json(&body).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(AutopilotErr::VerificationFailed(format!(
                    "model `{model}` returned status {status}"
                )));
            }

            let value: Value = response.json().await?;
            extract_text(&value).ok_or_else(|| {
                AutopilotErr::VerificationFailed(format!("model `{model}` returned no text"))
            })
        }
        .boxed()
    }
}

/// Pulls the concatenated text parts out of a `generateContent` response.
fn extract_text(value: &Value) -> Option<String> {
    let parts = value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: Vec<&str> = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}
