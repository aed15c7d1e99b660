//! Visual verification: convert (screenshot, context, expectation) into a
//! structured safe-to-proceed verdict.
//!
//! The verifier is single-shot per call: capture, ask the primary model
//! within a bounded timeout, fall back to the secondary model when the
//! primary fails (transport error, timeout, or unparseable output), and
//! never abort the run by itself: the executor records the verdict and the
//! authoring program decides what to do with it.

// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use autopilot_protocol::protocol::Point;
use autopilot_protocol::protocol::VerificationResult;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::capability::CapturedImage;
use crate::capability::ScreenCapture;
use crate::config::Config;
use crate::vision_client::VisionModelClient;

/// Capture area for one verification: full screen, or `(x, y, w, h)`.
pub type CaptureRegion = Option<(i32, i32, u32, u32)>;

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    fallback_uses: u64,
    errors: u64,
}

/// Snapshot of the verifier's lifetime statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifierStatistics {
    pub total_verifications: u64,
    pub fallback_uses: u64,
    pub errors: u64,
    pub fallback_rate: f64,
    pub error_rate: f64,
    pub primary_model: String,
    pub fallback_model: String,
}

pub struct VisualVerifier {
    screen: Arc<dyn ScreenCapture>,
    client: Arc<dyn VisionModelClient>,
    primary_model: String,
    fallback_model: String,
    timeout: Duration,
    counters: Mutex<Counters>,
}

impl VisualVerifier {
    pub fn new(
        screen: Arc<dyn ScreenCapture>,
        client: Arc<dyn VisionModelClient>,
        config: &Config,
    ) -> Self {
        Self {
            screen,
            client,
            primary_model: config.vision_primary_model.clone(),
            fallback_model: config.vision_fallback_model.clone(),
            timeout: config.vision_timeout,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Captures the screen and asks the vision models whether `expected` is
    /// on it. Confidence below `threshold` overrides `safe_to_proceed` to
    /// false while preserving the raw confidence.
    pub async fn verify(
        &self,
        context: &str,
        expected: &str,
        threshold: f64,
        region: CaptureRegion,
    ) -> VerificationResult {
        self.counters.lock().unwrap().total += 1;
        debug!(context, expected, threshold, "visual verification");

        let capture = match region {
            Some((x, y, width, height)) => self.screen.capture_region(x, y, width, height),
            None => self.screen.capture_full(),
        };
        let image = match capture {
            Ok(image) => image,
            Err(e) => {
                self.counters.lock().unwrap().errors += 1;
                return failure_result(format!("failed to capture screenshot: {e}"));
            }
        };

        let prompt = build_verification_prompt(context, expected, threshold);

        if let Some(result) = self
            .attempt(&self.primary_model, &prompt, &image, threshold)
            .await
        {
            return result;
        }

        warn!(
            model = %self.primary_model,
            "primary vision model failed, trying fallback"
        );
        self.counters.lock().unwrap().fallback_uses += 1;

        if let Some(result) = self
            .attempt(&self.fallback_model, &prompt, &image, threshold)
            .await
        {
            return result;
        }

        self.counters.lock().unwrap().errors += 1;
        failure_result("both primary and fallback vision models failed".to_string())
    }

    async fn attempt(
        &self,
        model: &str,
        prompt: &str,
        image: &CapturedImage,
        threshold: f64,
    ) -> Option<VerificationResult> {
        let call = self.client.analyze(model, prompt, image);
        let reply = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                warn!(model, timeout = ?self.timeout, "vision model timed out");
                return None;
            }
            Ok(Err(e)) => {
                warn!(model, "vision model call failed: {e}");
                return None;
            }
            Ok(Ok(text)) => text,
        };

        match parse_verdict(&reply, model, threshold) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(model, "unparseable vision model output: {e}");
                None
            }
        }
    }

    pub fn statistics(&self) -> VerifierStatistics {
        let counters = self.counters.lock().unwrap();
        let total = counters.total.max(1) as f64;
        VerifierStatistics {
            total_verifications: counters.total,
            fallback_uses: counters.fallback_uses,
            errors: counters.errors,
            fallback_rate: counters.fallback_uses as f64 / total,
            error_rate: counters.errors as f64 / total,
            primary_model: self.primary_model.clone(),
            fallback_model: self.fallback_model.clone(),
        }
    }
}

fn failure_result(analysis: String) -> VerificationResult {
    VerificationResult {
        safe_to_proceed: false,
        confidence: 0.0,
        analysis,
        updated_coordinates: None,
        suggested_actions: None,
        model_used: "none".to_string(),
    }
}

fn build_verification_prompt(context: &str, expected: &str, threshold: f64) -> String {
    format!(
        r#"You are a visual verification AI for desktop automation.

Context: {context}
Expected state: {expected}
Confidence threshold: {threshold}

Analyze this screenshot and determine:
1. Is it safe to proceed? YES only if the expected state is visible and ready for interaction.
2. Your confidence level, from 0.0 to 1.0.
3. The approximate center coordinates of the target element, in pixels from the top-left corner, if you can identify it.
4. A brief analysis of what you see and why it is or is not safe to proceed.
5. Suggested actions to take instead, if it is not safe.

Respond with JSON only:
{{
  "safe_to_proceed": true,
  "confidence": 0.0,
  "analysis": "what you see",
  "coordinates": {{"x": 123, "y": 456}},
  "suggested_actions": ["action"]
}}

Be conservative: when uncertain, set safe_to_proceed to false. Only provide
coordinates when you are confident about the element location."#
    )
}

/// Parses a model reply into a verdict, tolerating markdown code fences
/// around the JSON body.
fn parse_verdict(reply: &str, model: &str, threshold: f64) -> crate::Result<VerificationResult> {
    let cleaned = strip_markdown_fences(reply.trim());
    let data: Value = serde_json::from_str(cleaned)?;

    let confidence = data
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let mut safe_to_proceed = data
        .get("safe_to_proceed")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let analysis = data
        .get("analysis")
        .and_then(Value::as_str)
        .unwrap_or("no analysis provided")
        .to_string();

    let updated_coordinates = data.get("coordinates").and_then(|coords| {
        let x = coords.get("x")?.as_i64()?;
        let y = coords.get("y")?.as_i64()?;
        Some(Point {
            x: x as i32,
            y: y as i32,
        })
    });

    let suggested_actions: Option<Vec<String>> = data
        .get("suggested_actions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect::<Vec<String>>()
        })
        .filter(|items| !items.is_empty());

    if confidence < threshold {
        debug!(confidence, threshold, "confidence below threshold");
        safe_to_proceed = false;
    }

    Ok(VerificationResult {
        safe_to_proceed,
        confidence,
        analysis,
        updated_coordinates,
        suggested_actions,
        model_used: model.to_string(),
    })
}

fn strip_markdown_fences(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let after = &text[start + "```json".len()..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    } else if let Some(start) = text.find("```") {
        let after = &text[start + "```".len()..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use futures::FutureExt;
    use pretty_assertions::assert_eq;

    use crate::error::AutopilotErr;
    use crate::mock::MockSurfaces;

    use super::*;

    /// Test client that pops one scripted reply per call, optionally after
    /// a delay.
    struct ScriptedClient {
        replies: Mutex<VecDeque<crate::Result<String>>>,
        delay: Option<Duration>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<crate::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                delay: None,
            })
        }

        fn slow(replies: Vec<crate::Result<String>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                delay: Some(delay),
            })
        }
    }

    impl VisionModelClient for ScriptedClient {
        fn analyze(
            &self,
            _model: &str,
            _prompt: &str,
            _image: &CapturedImage,
        ) -> futures::future::BoxFuture<'static, crate::Result<String>> {
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AutopilotErr::VerificationFailed("exhausted".into())));
            let delay = self.delay;
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                reply
            }
            .boxed()
        }
    }

    fn verifier(client: Arc<dyn VisionModelClient>) -> (MockSurfaces, VisualVerifier) {
        let surfaces = MockSurfaces::new();
        let mut config = Config::default();
        config.vision_primary_model = "primary".to_string();
        config.vision_fallback_model = "backup".to_string();
        config.vision_timeout = Duration::from_millis(200);
        let verifier = VisualVerifier::new(surfaces.screen_capture(), client, &config);
        (surfaces, verifier)
    }

    #[tokio::test]
    async fn parses_a_fenced_verdict_with_coordinates() {
        let reply = r#"```json
{"safe_to_proceed": true, "confidence": 0.9,
 "analysis": "login button visible",
 "coordinates": {"x": 640, "y": 360}}
```"#;
        let (_surfaces, verifier) = verifier(ScriptedClient::new(vec![Ok(reply.to_string())]));

        let result = verifier.verify("find login", "login button", 0.7, None).await;
        assert!(result.safe_to_proceed);
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.updated_coordinates, Some(Point { x: 640, y: 360 }));
        assert_eq!(result.model_used, "primary");
    }

    #[tokio::test]
    async fn low_confidence_overrides_safe_but_preserves_the_value() {
        let reply = r#"{"safe_to_proceed": true, "confidence": 0.4, "analysis": "blurry"}"#;
        let (_surfaces, verifier) = verifier(ScriptedClient::new(vec![Ok(reply.to_string())]));

        let result = verifier.verify("ctx", "thing", 0.7, None).await;
        assert!(!result.safe_to_proceed);
        assert_eq!(result.confidence, 0.4);
    }

    #[tokio::test]
    async fn confidence_is_clamped_to_unit_range() {
        let reply = r#"{"safe_to_proceed": true, "confidence": 7.5, "analysis": "sure"}"#;
        let (_surfaces, verifier) = verifier(ScriptedClient::new(vec![Ok(reply.to_string())]));

        let result = verifier.verify("ctx", "thing", 0.5, None).await;
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn primary_failure_falls_back_to_the_secondary_model() {
        let replies = vec![
            Err(AutopilotErr::VerificationFailed("primary down".into())),
            Ok(r#"{"safe_to_proceed": true, "confidence": 0.8, "analysis": "ok"}"#.to_string()),
        ];
        let (_surfaces, verifier) = verifier(ScriptedClient::new(replies));

        let result = verifier.verify("ctx", "thing", 0.7, None).await;
        assert!(result.safe_to_proceed);
        assert_eq!(result.model_used, "backup");

        let stats = verifier.statistics();
        assert_eq!(stats.fallback_uses, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn unparseable_output_also_triggers_the_fallback() {
        let replies = vec![
            Ok("I think it looks fine!".to_string()),
            Ok(r#"{"safe_to_proceed": true, "confidence": 0.9, "analysis": "ok"}"#.to_string()),
        ];
        let (_surfaces, verifier) = verifier(ScriptedClient::new(replies));

        let result = verifier.verify("ctx", "thing", 0.7, None).await;
        assert_eq!(result.model_used, "backup");
    }

    #[tokio::test]
    async fn both_models_failing_yields_an_unsafe_verdict() {
        let replies = vec![
            Err(AutopilotErr::VerificationFailed("one".into())),
            Err(AutopilotErr::VerificationFailed("two".into())),
        ];
        let (_surfaces, verifier) = verifier(ScriptedClient::new(replies));

        let result = verifier.verify("ctx", "thing", 0.7, None).await;
        assert!(!result.safe_to_proceed);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.model_used, "none");
        assert_eq!(verifier.statistics().errors, 1);
    }

    #[tokio::test]
    async fn slow_primary_times_out_and_falls_back() {
        let replies = vec![
            Ok(r#"{"safe_to_proceed": true, "confidence": 0.9, "analysis": "late"}"#.to_string()),
            Ok(r#"{"safe_to_proceed": true, "confidence": 0.9, "analysis": "ok"}"#.to_string()),
        ];
        // Every call takes 500ms against a 200ms budget, so the fallback
        // times out as well and the verdict is the terminal failure.
        let (_surfaces, verifier) =
            verifier(ScriptedClient::slow(replies, Duration::from_millis(500)));

        let result = verifier.verify("ctx", "thing", 0.7, None).await;
        assert_eq!(result.model_used, "none");
        assert_eq!(verifier.statistics().fallback_uses, 1);
    }

    #[tokio::test]
    async fn capture_failure_short_circuits() {
        let (surfaces, verifier) = verifier(ScriptedClient::new(vec![]));
        surfaces.fail_on("capture_full", "no display");

        let result = verifier.verify("ctx", "thing", 0.7, None).await;
        assert!(!result.safe_to_proceed);
        assert_eq!(result.model_used, "none");
        assert!(result.analysis.contains("no display"));
    }

    #[tokio::test]
    async fn region_capture_is_used_when_requested() {
        let reply = r#"{"safe_to_proceed": true, "confidence": 0.9, "analysis": "ok"}"#;
        let (surfaces, verifier) = verifier(ScriptedClient::new(vec![Ok(reply.to_string())]));

        verifier
            .verify("ctx", "thing", 0.5, Some((10, 20, 300, 200)))
            .await;
        assert!(
            surfaces
                .log()
                .contains(&"capture_region 10,20 300x200".to_string())
        );
    }
}
