//! Post-processing: deterministic cleanup of detector and model output.
//!
//! Detectors and LLMs both leave small artefacts that are harmless to a
//! human reader but break later stages:
//!
//! - CRLF line endings and invisible Unicode (zero-width spaces, BOM, soft
//!   hyphens) inside OCR text
//! - LaTeX returned with its own `$…$` / `\[…\]` delimiters, which the
//!   serializers add again
//! - JSON replies wrapped in ` ```json … ``` ` fences despite the prompt
//! - Tables delivered as a GFM pipe-table string instead of a grid
//!
//! Every rule is a pure `&str → String` function so each one is testable on
//! its own and the order they run in is visible at the call site.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one region's text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 1
/// 5. Trim the whole string
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Code fences ─────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n(.*?)\n?```\s*$").unwrap());

/// Strip one outer ` ``` ` fence (with any language tag) from a model reply.
pub fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

// ── Formula delimiters ──────────────────────────────────────────────────────

/// Remove one pair of outer math delimiters: `$$…$$`, `$…$`, `\[…\]`, `\(…\)`.
///
/// Serializers add the delimiters their format needs, so the model keeps the
/// bare LaTeX body.
pub fn strip_math_delimiters(latex: &str) -> String {
    let s = latex.trim();
    let pairs: [(&str, &str); 4] = [("$$", "$$"), ("\\[", "\\]"), ("\\(", "\\)"), ("$", "$")];
    for (open, close) in pairs {
        if s.len() >= open.len() + close.len() && s.starts_with(open) && s.ends_with(close) {
            let inner = &s[open.len()..s.len() - close.len()];
            // `$a$ + $b$` is two inline formulas, not one delimited one.
            if open == "$" && inner.contains('$') {
                continue;
            }
            return inner.trim().to_string();
        }
    }
    s.to_string()
}

// ── Pipe tables ─────────────────────────────────────────────────────────────

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 1
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

/// Split a GFM pipe table into cell rows.
///
/// Separator rows are dropped and `\|` is unescaped. Returns `None` when no
/// line looks like a table row.
pub fn parse_pipe_table(input: &str) -> Option<Vec<Vec<String>>> {
    let rows: Vec<Vec<String>> = normalise_line_endings(input)
        .lines()
        .filter(|l| is_table_row(l) && !is_separator_row(l))
        .map(split_pipe_row)
        .collect();
    (!rows.is_empty()).then_some(rows)
}

fn split_pipe_row(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = &inner[1..inner.len() - 1];
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "hello\u{200B}world\u{FEFF}foo\u{00AD}bar";
        assert_eq!(remove_invisible_chars(input), "helloworldfoobar");
    }

    #[test]
    fn test_clean_text_full_pipeline() {
        let input = "\u{FEFF}  First line   \r\n\r\n\r\n\r\nSecond\u{200B} line  \n";
        assert_eq!(clean_text(input), "First line\n\nSecond line");
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("```\n[]\n```  "), "[]");
        assert_eq!(strip_code_fences("  [3]  "), "[3]");
    }

    #[test]
    fn test_strip_math_delimiters() {
        assert_eq!(strip_math_delimiters("$$x^2$$"), "x^2");
        assert_eq!(strip_math_delimiters("\\[ a+b \\]"), "a+b");
        assert_eq!(strip_math_delimiters("\\(\\alpha\\)"), "\\alpha");
        assert_eq!(strip_math_delimiters("$y$"), "y");
        assert_eq!(strip_math_delimiters("$a$ + $b$"), "$a$ + $b$");
        assert_eq!(strip_math_delimiters("E=mc^2"), "E=mc^2");
    }

    #[test]
    fn test_parse_pipe_table() {
        let input = "| A | B |\n| --- | :-: |\n| 1 | x \\| y |";
        let rows = parse_pipe_table(input).unwrap();
        assert_eq!(rows, vec![vec!["A", "B"], vec!["1", "x | y"]]);
        assert!(parse_pipe_table("just text").is_none());
    }
}
