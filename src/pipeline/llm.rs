//! LLM-backed collaborators: a vision detector and a text corrector.
//!
//! Both talk to any `edgequake-llm` provider and share one retry loop.
//! Prompt wording lives in [`crate::prompts`]; this module only builds
//! messages, retries, and parses the answers.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! avoids a thundering herd: with 500 ms base and 3 retries the wait
//! sequence is 500 ms → 1 s → 2 s. An answer that does not parse counts as
//! a failed attempt too.

use crate::error::{CorrectionError, DetectionError, Pdf2DocError};
use crate::pipeline::correct::{
    basic_cleanup, grade_complexity, BatchAnswers, Complexity, CorrectionMode, Corrector,
};
use crate::pipeline::detect::{CoordSpace, Detector, RawBBox, RawDetection};
use crate::pipeline::encode;
use crate::pipeline::postprocess::strip_code_fences;
use crate::pipeline::render::PageImage;
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Retry and sampling knobs shared by both adapters.
#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub max_tokens: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Send `messages`, retrying with exponential backoff, and hand each reply
/// to `parse`. Returns the first successfully parsed reply.
async fn chat_with_retry<T>(
    provider: &Arc<dyn LLMProvider>,
    messages: &[ChatMessage],
    options: &CompletionOptions,
    llm: &LlmOptions,
    label: &str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, String> {
    let start = Instant::now();
    let mut last_err: Option<String> = None;

    for attempt in 0..=llm.max_retries {
        if attempt > 0 {
            let backoff = llm.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                label, attempt, llm.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match provider.chat(messages, Some(options)).await {
            Ok(response) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    label,
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed()
                );
                match parse(&response.content) {
                    Ok(parsed) => return Ok(parsed),
                    Err(e) => {
                        warn!("{}: attempt {} unusable answer: {}", label, attempt + 1, e);
                        last_err = Some(e);
                    }
                }
            }
            Err(e) => {
                let err_msg = format!("{}", e);
                warn!("{}: attempt {} failed: {}", label, attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| "Unknown error".to_string()))
}

// ── Vision detector ──────────────────────────────────────────────────────

/// Region as the detection prompt asks the model to return it.
#[derive(Debug, Deserialize)]
struct VlmRegion {
    label: String,
    bbox: [f64; 4],
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    content: serde_json::Value,
}

/// Name the VLM's detections are tagged with; parses as the layout source.
pub const VLM_DETECTOR_NAME: &str = "layout_vlm";

/// Parse a detection answer into raw detections.
///
/// Boxes are expected as page fractions. Some model families (Qwen-VL)
/// answer on a 0–1000 grid instead; such boxes are rescaled.
fn parse_detections(answer: &str, page: &PageImage) -> Result<Vec<RawDetection>, String> {
    let body = strip_code_fences(answer);
    let regions: Vec<VlmRegion> =
        serde_json::from_str(&body).map_err(|e| format!("not a JSON region array: {e}"))?;
    Ok(regions
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let max = r.bbox.iter().cloned().fold(0.0_f64, f64::max);
            let bbox = if max > 1.0 && max <= 1000.0 {
                r.bbox.map(|v| v / 1000.0)
            } else {
                r.bbox
            };
            RawDetection {
                detector: VLM_DETECTOR_NAME.to_string(),
                label: r.label,
                id: Some(format!("p{}-v{}", page.index, i)),
                parent: None,
                bbox: Some(RawBBox::Rect(bbox)),
                coords: CoordSpace::Fractional,
                confidence: r.confidence,
                content: r.content,
                page_dimensions: page.dimensions,
            }
        })
        .collect())
}

/// Detection source backed by a vision language model.
pub struct VlmDetector {
    provider: Arc<dyn LLMProvider>,
    options: LlmOptions,
    system_prompt: String,
}

impl VlmDetector {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            options: LlmOptions::default(),
            system_prompt: prompts::DETECTION_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_options(mut self, options: LlmOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

#[async_trait]
impl Detector for VlmDetector {
    async fn detect(&self, page: &PageImage) -> Result<Vec<RawDetection>, DetectionError> {
        let page_no = page.index + 1;
        let failed = |detail: String| DetectionError::Failed {
            page: page_no,
            detail,
        };
        let image = page
            .image
            .as_ref()
            .ok_or_else(|| failed("page was not rasterised".into()))?;
        let image_data = encode::encode_page(image).map_err(|e| failed(e.to_string()))?;

        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(prompts::DETECTION_USER_PROMPT, vec![image_data]),
        ];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(self.options.max_tokens),
            ..Default::default()
        };

        let label = format!("Page {}", page_no);
        chat_with_retry(&self.provider, &messages, &options, &self.options, &label, |answer| {
            parse_detections(answer, page)
        })
        .await
        .map_err(failed)
    }
}

// ── LLM corrector ────────────────────────────────────────────────────────

/// Sampling temperature for a mode, or `None` when no model call is needed.
fn temperature_for(mode: CorrectionMode, complexity: Complexity) -> Option<f32> {
    match mode {
        CorrectionMode::Off => None,
        CorrectionMode::Light => Some(0.1),
        CorrectionMode::Aggressive => Some(0.3),
        CorrectionMode::Adaptive => match complexity {
            Complexity::Low => None,
            Complexity::Medium => Some(0.3),
            Complexity::High => Some(0.1),
        },
    }
}

fn parse_single(answer: &str) -> Result<String, String> {
    let text = strip_code_fences(answer);
    if text.is_empty() {
        Err("empty answer".into())
    } else {
        Ok(text)
    }
}

fn parse_batch(answer: &str, expected: usize) -> Result<Vec<String>, String> {
    let texts: Vec<String> = serde_json::from_str(&strip_code_fences(answer))
        .map_err(|e| format!("not a JSON string array: {e}"))?;
    if texts.len() != expected {
        return Err(format!("{} texts for {} inputs", texts.len(), expected));
    }
    Ok(texts)
}

/// Correction function backed by a chat model.
///
/// In `Adaptive` mode each text is graded first: low-complexity text gets
/// [`basic_cleanup`] locally, everything else goes to the model with a
/// temperature matched to its complexity.
pub struct LlmCorrector {
    provider: Arc<dyn LLMProvider>,
    options: LlmOptions,
}

impl LlmCorrector {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            options: LlmOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LlmOptions) -> Self {
        self.options = options;
        self
    }

    fn completion_options(&self, temperature: f32) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(temperature),
            max_tokens: Some(self.options.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Corrector for LlmCorrector {
    async fn correct(&self, text: &str, mode: CorrectionMode) -> Result<String, CorrectionError> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }
        let Some(temperature) = temperature_for(mode, grade_complexity(text)) else {
            return Ok(if mode == CorrectionMode::Off {
                text.to_string()
            } else {
                basic_cleanup(text)
            });
        };
        let system = format!(
            "{}{}",
            prompts::correction_system_prompt(mode),
            prompts::CORRECTION_SINGLE_SUFFIX
        );
        let messages = vec![ChatMessage::system(system.as_str()), ChatMessage::user(text)];
        chat_with_retry(
            &self.provider,
            &messages,
            &self.completion_options(temperature),
            &self.options,
            "Correction",
            parse_single,
        )
        .await
        .map_err(CorrectionError::Failed)
    }

    async fn correct_batch(
        &self,
        texts: &[String],
        mode: CorrectionMode,
    ) -> Result<BatchAnswers, CorrectionError> {
        let mut out: Vec<Option<Result<String, CorrectionError>>> = vec![None; texts.len()];
        let mut pending: Vec<usize> = Vec::new();
        let mut temperature = f32::MAX;
        for (i, text) in texts.iter().enumerate() {
            match temperature_for(mode, grade_complexity(text)) {
                _ if text.trim().is_empty() => out[i] = Some(Ok(text.clone())),
                None if mode == CorrectionMode::Off => out[i] = Some(Ok(text.clone())),
                None => out[i] = Some(Ok(basic_cleanup(text))),
                Some(t) => {
                    temperature = temperature.min(t);
                    pending.push(i);
                }
            }
        }

        match pending.len() {
            0 => {}
            1 => {
                let i = pending[0];
                out[i] = Some(self.correct(&texts[i], mode).await);
            }
            n => {
                let inputs: Vec<&str> = pending.iter().map(|&i| texts[i].as_str()).collect();
                let payload = serde_json::to_string(&inputs)
                    .map_err(|e| CorrectionError::Failed(e.to_string()))?;
                let system = format!(
                    "{}{}",
                    prompts::correction_system_prompt(mode),
                    prompts::correction_batch_suffix(n)
                );
                let messages = vec![
                    ChatMessage::system(system.as_str()),
                    ChatMessage::user(payload.as_str()),
                ];
                let answers = chat_with_retry(
                    &self.provider,
                    &messages,
                    &self.completion_options(temperature),
                    &self.options,
                    "Correction batch",
                    |answer| parse_batch(answer, n),
                )
                .await
                .map_err(CorrectionError::Failed)?;
                for (i, answer) in pending.into_iter().zip(answers) {
                    out[i] = Some(Ok(answer));
                }
            }
        }

        Ok(out
            .into_iter()
            .map(|answer| answer.unwrap_or(Err(CorrectionError::EmptyOutput)))
            .collect())
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Pdf2DocError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2DocError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve an LLM provider, from most-specific to least-specific:
///
/// 1. an explicit provider name (plus model, default `gpt-4.1-nano`)
/// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
/// 3. `OPENAI_API_KEY` present → OpenAI
/// 4. [`ProviderFactory::from_env`] auto-detection
pub fn resolve_provider(
    provider_name: Option<&str>,
    model: Option<&str>,
) -> Result<Arc<dyn LLMProvider>, Pdf2DocError> {
    let model_or_default = model.unwrap_or("gpt-4.1-nano");
    if let Some(name) = provider_name {
        return create_provider(name, model_or_default);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("openai", model_or_default);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2DocError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::render::PageDimensions;

    #[test]
    fn detection_answer_is_parsed_with_fences() {
        let page = PageImage::blank(2, PageDimensions::new(800, 1000));
        let answer = r#"```json
[{"label": "formula", "bbox": [0.1, 0.2, 0.5, 0.3], "confidence": 0.8, "content": "x^2"},
 {"label": "figure", "bbox": [0.1, 0.4, 0.9, 0.8], "content": null}]
```"#;
        let dets = parse_detections(answer, &page).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].detector, VLM_DETECTOR_NAME);
        assert_eq!(dets[0].coords, CoordSpace::Fractional);
        assert_eq!(dets[0].id.as_deref(), Some("p2-v0"));
        assert_eq!(dets[1].confidence, None);
        assert_eq!(dets[1].page_dimensions, PageDimensions::new(800, 1000));
    }

    #[test]
    fn thousand_grid_boxes_are_rescaled() {
        let page = PageImage::blank(0, None);
        let answer = r#"[{"label": "text", "bbox": [100, 200, 500, 300], "content": "a"}]"#;
        let dets = parse_detections(answer, &page).unwrap();
        assert_eq!(dets[0].bbox, Some(RawBBox::Rect([0.1, 0.2, 0.5, 0.3])));
    }

    #[test]
    fn non_json_detection_answer_is_an_error() {
        let page = PageImage::blank(0, None);
        assert!(parse_detections("I see a title and two paragraphs.", &page).is_err());
    }

    #[test]
    fn batch_answer_must_match_input_count() {
        assert_eq!(
            parse_batch("```json\n[\"a\", \"b\"]\n```", 2).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(parse_batch("[\"a\"]", 2).is_err());
        assert!(parse_single("   ").is_err());
    }

    #[test]
    fn adaptive_mode_skips_the_model_for_simple_text() {
        assert_eq!(temperature_for(CorrectionMode::Adaptive, Complexity::Low), None);
        assert_eq!(temperature_for(CorrectionMode::Adaptive, Complexity::High), Some(0.1));
        assert_eq!(temperature_for(CorrectionMode::Off, Complexity::High), None);
        assert_eq!(temperature_for(CorrectionMode::Light, Complexity::Low), Some(0.1));
    }

    #[test]
    fn default_llm_options() {
        let o = LlmOptions::default();
        assert_eq!(o.max_tokens, 4096);
        assert_eq!(o.max_retries, 3);
    }
}
