//! Correction Adapter: best-effort text repair of Text regions.
//!
//! The adapter never corrects anything itself. It picks the eligible
//! regions (Text kind only, so LaTeX, tables and figures never reach a
//! language model), batches them per page, runs the batches concurrently
//! under a timeout, and writes the answers back in one pass after every
//! batch has joined.
//!
//! A failed, timed-out or malformed batch leaves its regions untouched and
//! leaves a [`Warning::Correction`] per region instead. A region whose own
//! answer fails keeps its text without costing its batch siblings theirs.

use crate::error::{CorrectionError, Warning};
use crate::model::{Document, RegionContent, RegionKind};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How much rewriting the correction function may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// No correction; the corrector is never called.
    #[default]
    Off,
    /// Spacing and punctuation only.
    Light,
    /// Effort scaled to how complex each text looks.
    Adaptive,
    /// Also rejoin hyphenated words and fix misread characters.
    Aggressive,
}

impl fmt::Display for CorrectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CorrectionMode::Off => "off",
            CorrectionMode::Light => "light",
            CorrectionMode::Adaptive => "adaptive",
            CorrectionMode::Aggressive => "aggressive",
        };
        f.write_str(s)
    }
}

impl FromStr for CorrectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(CorrectionMode::Off),
            "light" => Ok(CorrectionMode::Light),
            "adaptive" | "auto" => Ok(CorrectionMode::Adaptive),
            "aggressive" => Ok(CorrectionMode::Aggressive),
            other => Err(format!(
                "unknown correction mode '{other}' (expected off, light, adaptive or aggressive)"
            )),
        }
    }
}

/// One answer per input text, in input order.
pub type BatchAnswers = Vec<Result<String, CorrectionError>>;

/// External text-correction function.
#[async_trait]
pub trait Corrector: Send + Sync {
    async fn correct(&self, text: &str, mode: CorrectionMode) -> Result<String, CorrectionError>;

    /// Correct several texts in one call. The outer error fails the whole
    /// batch; otherwise the answer must have one entry per input, in order.
    async fn correct_batch(
        &self,
        texts: &[String],
        mode: CorrectionMode,
    ) -> Result<BatchAnswers, CorrectionError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.correct(text, mode).await);
        }
        Ok(out)
    }
}

/// Scheduling knobs for [`correct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectionOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for CorrectionOptions {
    fn default() -> Self {
        Self {
            batch_size: 8,
            concurrency: 4,
            timeout_secs: 60,
        }
    }
}

/// Position of one eligible region inside the document.
#[derive(Debug, Clone)]
struct Target {
    page_slot: usize,
    region_slot: usize,
    page_index: usize,
    id: String,
    text: String,
}

/// Run `corrector` over every eligible Text region of `document`.
///
/// Returns the per-region warnings. Once `cancel` is set no further batch
/// is started; batches already in flight finish but their answers are
/// dropped.
pub async fn correct(
    document: &mut Document,
    corrector: &Arc<dyn Corrector>,
    mode: CorrectionMode,
    options: &CorrectionOptions,
    cancel: &AtomicBool,
) -> Vec<Warning> {
    if mode == CorrectionMode::Off {
        return Vec::new();
    }

    let mut batches: Vec<Vec<Target>> = Vec::new();
    for (page_slot, page) in document.pages.iter().enumerate() {
        let targets: Vec<Target> = page
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.kind == RegionKind::Text)
            .filter_map(|(region_slot, r)| match &r.content {
                RegionContent::Text { text, .. } if !text.trim().is_empty() => Some(Target {
                    page_slot,
                    region_slot,
                    page_index: page.index,
                    id: r.id.clone(),
                    text: text.clone(),
                }),
                _ => None,
            })
            .collect();
        for chunk in targets.chunks(options.batch_size.max(1)) {
            batches.push(chunk.to_vec());
        }
    }
    if batches.is_empty() {
        return Vec::new();
    }

    let total: usize = batches.iter().map(Vec::len).sum();
    info!(
        "Correcting {} text regions in {} batches (mode: {})",
        total,
        batches.len(),
        mode
    );

    let timeout = Duration::from_secs(options.timeout_secs);
    let mut results: Vec<(Vec<Target>, Option<Result<BatchAnswers, CorrectionError>>)> =
        stream::iter(batches)
            .map(|batch| async move {
                if cancel.load(Ordering::SeqCst) {
                    return (batch, None);
                }
                let texts: Vec<String> = batch.iter().map(|t| t.text.clone()).collect();
                let call = corrector.correct_batch(&texts, mode);
                let outcome = match tokio::time::timeout(timeout, call).await {
                    Ok(res) => res,
                    Err(_) => Err(CorrectionError::Timeout {
                        secs: options.timeout_secs,
                    }),
                };
                (batch, Some(outcome))
            })
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;

    if cancel.load(Ordering::SeqCst) {
        debug!("Correction cancelled; discarding {} batch results", results.len());
        return Vec::new();
    }
    results.sort_by_key(|(batch, _)| batch.first().map(|t| (t.page_slot, t.region_slot)));

    let mut warnings = Vec::new();
    let mut applied = 0usize;
    for (batch, outcome) in results {
        let Some(outcome) = outcome else { continue };
        let answers = outcome.and_then(|answers| {
            if answers.len() == batch.len() {
                Ok(answers)
            } else {
                Err(CorrectionError::BatchMismatch {
                    expected: batch.len(),
                    got: answers.len(),
                })
            }
        });
        match answers {
            Ok(answers) => {
                for (target, answer) in batch.into_iter().zip(answers) {
                    let answer = match answer {
                        Ok(a) if a.trim().is_empty() => Err(CorrectionError::EmptyOutput),
                        other => other,
                    };
                    let answer = match answer {
                        Ok(a) => a,
                        Err(e) => {
                            debug!("Correction of region '{}' failed: {}", target.id, e);
                            warnings.push(region_warning(&target, &e));
                            continue;
                        }
                    };
                    let region = &mut document.pages[target.page_slot].regions[target.region_slot];
                    if let RegionContent::Text { text, .. } = &mut region.content {
                        *text = answer;
                        applied += 1;
                    }
                }
            }
            Err(e) => {
                warn!("Correction batch of {} regions failed: {}", batch.len(), e);
                warnings.extend(batch.iter().map(|t| region_warning(t, &e)));
            }
        }
    }
    info!("Correction applied to {}/{} regions", applied, total);
    warnings
}

fn region_warning(target: &Target, e: &CorrectionError) -> Warning {
    Warning::Correction {
        page: target.page_index + 1,
        region: target.id.clone(),
        detail: e.to_string(),
    }
}

// ── Complexity grading ───────────────────────────────────────────────────

/// How much care a text needs, judged from surface features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Grade `text`: formula markers or a long table are high, mixed
/// Cyrillic/Latin script or a short table is medium, anything else low.
pub fn grade_complexity(text: &str) -> Complexity {
    let has_formulas = ["$$", "\\(", "\\[", "\\begin"].iter().any(|m| text.contains(m));
    let has_tables = text.matches('|').count() > 5;
    let has_cyrillic = text.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c));
    let has_latin = text.chars().any(|c| c.is_ascii_alphabetic());

    if has_formulas || (has_tables && text.chars().count() > 500) {
        Complexity::High
    } else if (has_cyrillic && has_latin) || has_tables {
        Complexity::Medium
    } else {
        Complexity::Low
    }
}

// ── Rule-based corrector ─────────────────────────────────────────────────

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static RE_SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+([,.;:!?)])").unwrap());
static RE_SPACE_AFTER_PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([ \t]+").unwrap());
static RE_HYPHEN_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\w)-[ \t]*\n[ \t]*(\w)").unwrap());
static RE_SOFT_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^\n])\n([^\n])").unwrap());

/// Whitespace and punctuation spacing, no language model involved.
pub fn basic_cleanup(text: &str) -> String {
    let s = RE_SPACES.replace_all(text, " ");
    let s = RE_SPACE_BEFORE_PUNCT.replace_all(&s, "$1");
    let s = RE_SPACE_AFTER_PAREN.replace_all(&s, "(");
    s.trim().to_string()
}

/// Offline corrector built from deterministic rules.
///
/// `Light` and `Adaptive` apply [`basic_cleanup`]. `Aggressive` also rejoins
/// words hyphenated across a line break and unwraps single line breaks
/// inside a paragraph.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedCorrector;

impl RuleBasedCorrector {
    pub fn apply(text: &str, mode: CorrectionMode) -> String {
        match mode {
            CorrectionMode::Off => text.to_string(),
            CorrectionMode::Light | CorrectionMode::Adaptive => basic_cleanup(text),
            CorrectionMode::Aggressive => {
                let s = RE_HYPHEN_BREAK.replace_all(text, "$1$2");
                let s = RE_SOFT_BREAK.replace_all(&s, "$1 $2");
                basic_cleanup(&s)
            }
        }
    }
}

#[async_trait]
impl Corrector for RuleBasedCorrector {
    async fn correct(&self, text: &str, mode: CorrectionMode) -> Result<String, CorrectionError> {
        Ok(Self::apply(text, mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, Page, Region, SourceDetector, TextRole};
    use std::sync::atomic::AtomicUsize;

    /// Uppercases text and counts calls.
    #[derive(Default)]
    struct Upper {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Corrector for Upper {
        async fn correct(&self, text: &str, _mode: CorrectionMode) -> Result<String, CorrectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(text.to_uppercase())
        }
    }

    struct Failing;

    #[async_trait]
    impl Corrector for Failing {
        async fn correct(&self, _text: &str, _mode: CorrectionMode) -> Result<String, CorrectionError> {
            Err(CorrectionError::Failed("model unavailable".into()))
        }
    }

    struct Short;

    #[async_trait]
    impl Corrector for Short {
        async fn correct(&self, text: &str, _mode: CorrectionMode) -> Result<String, CorrectionError> {
            Ok(text.into())
        }

        async fn correct_batch(
            &self,
            _texts: &[String],
            _mode: CorrectionMode,
        ) -> Result<BatchAnswers, CorrectionError> {
            Ok(vec![Ok("only one".into())])
        }
    }

    /// Fails on texts containing "world" only.
    struct Picky;

    #[async_trait]
    impl Corrector for Picky {
        async fn correct(&self, text: &str, _mode: CorrectionMode) -> Result<String, CorrectionError> {
            if text.contains("world") {
                Err(CorrectionError::Failed("refused".into()))
            } else {
                Ok(text.to_uppercase())
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl Corrector for Slow {
        async fn correct(&self, text: &str, _mode: CorrectionMode) -> Result<String, CorrectionError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(text.into())
        }
    }

    fn region(id: &str, kind: RegionKind, content: RegionContent) -> Region {
        Region {
            id: id.into(),
            kind,
            bbox: BBox::new(0.1, 0.1, 0.9, 0.2).unwrap(),
            content,
            confidence: 0.9,
            source: SourceDetector::Ocr,
            page_index: 0,
            order_key: Some(0),
            parent: None,
        }
    }

    fn text(id: &str, t: &str) -> Region {
        region(
            id,
            RegionKind::Text,
            RegionContent::Text {
                text: t.into(),
                role: TextRole::Paragraph,
            },
        )
    }

    fn doc() -> Document {
        let mut page = Page::new(0);
        page.regions = vec![
            text("a", "hello"),
            region(
                "f",
                RegionKind::Formula,
                RegionContent::Formula {
                    latex: "x^2".into(),
                    display: Default::default(),
                },
            ),
            region(
                "c",
                RegionKind::Caption,
                RegionContent::Text {
                    text: "fig".into(),
                    role: TextRole::Paragraph,
                },
            ),
            text("b", "world"),
            text("e", "   "),
        ];
        Document {
            pages: vec![page],
            ..Default::default()
        }
    }

    fn opts(batch_size: usize) -> CorrectionOptions {
        CorrectionOptions {
            batch_size,
            concurrency: 2,
            timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn off_mode_is_a_bitwise_noop() {
        let upper = Arc::new(Upper::default());
        let corrector: Arc<dyn Corrector> = upper.clone();
        let mut d = doc();
        let before = d.clone();
        let warnings = correct(&mut d, &corrector, CorrectionMode::Off, &opts(2), &AtomicBool::new(false)).await;
        assert!(warnings.is_empty());
        assert_eq!(d, before);
        assert_eq!(upper.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn only_text_regions_are_sent() {
        let upper = Arc::new(Upper::default());
        let corrector: Arc<dyn Corrector> = upper.clone();
        let mut d = doc();
        let warnings = correct(&mut d, &corrector, CorrectionMode::Light, &opts(1), &AtomicBool::new(false)).await;
        assert!(warnings.is_empty());
        let texts: Vec<Option<&str>> = d.regions().map(|r| r.content.text()).collect();
        assert_eq!(texts, vec![Some("HELLO"), Some("x^2"), Some("fig"), Some("WORLD"), Some("   ")]);
        assert_eq!(upper.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_keep_original_text_and_warn_per_region() {
        let corrector: Arc<dyn Corrector> = Arc::new(Failing);
        let mut d = doc();
        let before = d.clone();
        let warnings = correct(&mut d, &corrector, CorrectionMode::Adaptive, &opts(8), &AtomicBool::new(false)).await;
        assert_eq!(d, before);
        assert_eq!(warnings.len(), 2);
        assert!(matches!(&warnings[0], Warning::Correction { page: 1, .. }));
    }

    #[tokio::test]
    async fn one_failed_item_spares_its_batch_siblings() {
        let corrector: Arc<dyn Corrector> = Arc::new(Picky);
        let mut d = doc();
        let warnings = correct(&mut d, &corrector, CorrectionMode::Light, &opts(8), &AtomicBool::new(false)).await;
        let texts: Vec<Option<&str>> = d.regions().map(|r| r.content.text()).collect();
        assert_eq!(texts, vec![Some("HELLO"), Some("x^2"), Some("fig"), Some("world"), Some("   ")]);
        assert_eq!(warnings.len(), 1);
        match &warnings[0] {
            Warning::Correction { region, detail, .. } => {
                assert_eq!(region, "b");
                assert!(detail.contains("refused"), "{detail}");
            }
            other => panic!("unexpected warning {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_batch_length_is_rejected() {
        let corrector: Arc<dyn Corrector> = Arc::new(Short);
        let mut d = doc();
        let before = d.clone();
        let warnings = correct(&mut d, &corrector, CorrectionMode::Light, &opts(8), &AtomicBool::new(false)).await;
        assert_eq!(d, before);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].to_string().contains("returned 1 texts for 2 inputs"));
    }

    #[tokio::test]
    async fn timeouts_are_region_failures() {
        let corrector: Arc<dyn Corrector> = Arc::new(Slow);
        let mut d = doc();
        let warnings = correct(&mut d, &corrector, CorrectionMode::Light, &opts(8), &AtomicBool::new(false)).await;
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn cancelled_before_start_changes_nothing() {
        let upper = Arc::new(Upper::default());
        let corrector: Arc<dyn Corrector> = upper.clone();
        let mut d = doc();
        let before = d.clone();
        correct(&mut d, &corrector, CorrectionMode::Light, &opts(1), &AtomicBool::new(true)).await;
        assert_eq!(d, before);
        assert_eq!(upper.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn complexity_grades() {
        assert_eq!(grade_complexity("plain words"), Complexity::Low);
        assert_eq!(grade_complexity("Теорема and theorem"), Complexity::Medium);
        assert_eq!(grade_complexity("see \\[x\\]"), Complexity::High);
        assert_eq!(grade_complexity("|a|b|\n|c|d|"), Complexity::Medium);
    }

    #[test]
    fn basic_cleanup_fixes_spacing() {
        assert_eq!(
            basic_cleanup("Hello  ,  world . ( see  fig. 2 ) :"),
            "Hello, world. (see fig. 2):"
        );
    }

    #[test]
    fn aggressive_rejoins_hyphenation() {
        let out = RuleBasedCorrector::apply("recon-\nstruction of the\ndocument", CorrectionMode::Aggressive);
        assert_eq!(out, "reconstruction of the document");
        let light = RuleBasedCorrector::apply("recon-\nstruction", CorrectionMode::Light);
        assert_eq!(light, "recon-\nstruction");
    }

    #[test]
    fn mode_parses_from_cli_strings() {
        assert_eq!("Adaptive".parse::<CorrectionMode>(), Ok(CorrectionMode::Adaptive));
        assert_eq!("auto".parse::<CorrectionMode>(), Ok(CorrectionMode::Adaptive));
        assert!("max".parse::<CorrectionMode>().is_err());
        assert_eq!(CorrectionMode::Aggressive.to_string(), "aggressive");
    }
}
