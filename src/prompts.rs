//! Prompts for the vision detector and the LLM corrector.
//!
//! Every prompt lives here so a wording change touches one file and unit
//! tests can inspect prompts without a live model.

use crate::pipeline::correct::CorrectionMode;

/// System prompt asking a vision model for page regions as JSON.
pub const DETECTION_SYSTEM_PROMPT: &str = r#"You are a document layout analyser for scientific papers. Look at the page image and list every content region.

Answer with a JSON array and nothing else. One object per region:

{
  "label": one of "title", "heading", "text", "formula", "inline_formula", "table", "figure", "caption",
  "bbox": [x0, y0, x1, y1] as fractions of the page width and height (0.0 to 1.0, origin top-left),
  "confidence": your certainty between 0.0 and 1.0,
  "content": see below
}

Content rules:
- text, title, heading, caption: the exact text, in the original language, without Markdown
- formula, inline_formula: the LaTeX source WITHOUT surrounding $, $$, \( or \[ delimiters
- table: an array of rows, each row an array of cell strings; the first row is the header
- figure: null

Ignore page numbers, running headers and footers.
Do NOT wrap the answer in ``` fences. Do NOT add commentary."#;

/// User turn that accompanies the page image.
pub const DETECTION_USER_PROMPT: &str = "Detect the regions on this page.";

const CORRECTION_LIGHT: &str = r#"You fix OCR errors in text extracted from a scientific paper.
Only fix spacing, punctuation and obviously broken characters. Do not rephrase, do not translate, do not add or remove content.
Keep any LaTeX fragments exactly as they are."#;

const CORRECTION_ADAPTIVE: &str = r#"You fix OCR errors in text extracted from a scientific paper.
Fix typos, broken words and spacing issues. The text may mix languages (for example Russian and English): keep every word in its original language.
Keep LaTeX formulas and table markup unchanged. Do not rephrase sentences that are already correct."#;

const CORRECTION_AGGRESSIVE: &str = r#"You restore text damaged by OCR in a scientific paper.
Rejoin words split by hyphenation or line breaks, fix misrecognised characters (rn/m, 0/O, l/1), repair spacing and punctuation.
Keep the meaning, the language and all LaTeX formulas unchanged. Do not summarise."#;

/// System prompt for a correction mode. `Off` never reaches a model.
pub fn correction_system_prompt(mode: CorrectionMode) -> &'static str {
    match mode {
        CorrectionMode::Off | CorrectionMode::Light => CORRECTION_LIGHT,
        CorrectionMode::Adaptive => CORRECTION_ADAPTIVE,
        CorrectionMode::Aggressive => CORRECTION_AGGRESSIVE,
    }
}

/// Output rule appended for a single text.
pub const CORRECTION_SINGLE_SUFFIX: &str =
    "\n\nAnswer with the corrected text only. No quotes, no fences, no commentary.";

/// Output rule appended when several texts are sent as one JSON array.
pub fn correction_batch_suffix(count: usize) -> String {
    format!(
        "\n\nThe input is a JSON array of {count} independent texts. \
Answer with a JSON array of exactly {count} corrected strings in the same order. \
No fences, no commentary."
    )
}
