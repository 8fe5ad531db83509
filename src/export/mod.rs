//! Format Serializers: one finalized [`Document`] → four output formats.
//!
//! ```text
//!                    ┌─▶ markdown  (.md   + images/*.png)
//! Document ─▶ layout ├─▶ latex     (.tex  + images/*.png)
//!  (shared)  (blocks)├─▶ html      (.html, images inlined)
//!                    └─▶ docx      (.docx, images in word/media)
//! ```
//!
//! Every renderer consumes the same [`PageLayout`] blocks built by
//! [`layout_document`], so paragraph grouping, inline-math attachment and
//! placeholder decisions are made once and every format agrees on them.
//! Renderers are pure functions of `&Document`; they never mutate it and can
//! run concurrently on one `Arc<Document>`.

pub mod docx;
pub mod html;
pub mod latex;
pub mod markdown;
pub mod omml;
mod xml;

use crate::config::PageSeparator;
use crate::error::SerializationError;
use crate::model::{
    BBox, Document, FormulaDisplay, ImageRef, Page, Region, RegionContent, RegionKind, TableGrid,
    TextRole,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

// ── Formats ──────────────────────────────────────────────────────────────

/// A target output format.
///
/// The derived `Ord` is the order in which formats are exported and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    Latex,
    Docx,
    Html,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Markdown,
        OutputFormat::Latex,
        OutputFormat::Docx,
        OutputFormat::Html,
    ];

    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Latex => "tex",
            OutputFormat::Docx => "docx",
            OutputFormat::Html => "html",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "text/markdown",
            OutputFormat::Latex => "application/x-tex",
            OutputFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            OutputFormat::Html => "text/html",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Latex => "latex",
            OutputFormat::Docx => "docx",
            OutputFormat::Html => "html",
        };
        f.write_str(s)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(OutputFormat::Markdown),
            "tex" | "latex" => Ok(OutputFormat::Latex),
            "docx" | "word" => Ok(OutputFormat::Docx),
            "html" | "htm" => Ok(OutputFormat::Html),
            other => Err(format!(
                "unknown output format '{other}' (expected md, tex, docx or html)"
            )),
        }
    }
}

// ── Options / results ────────────────────────────────────────────────────

/// Rendering options shared by all serializers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Separator between pages in Markdown output. Default: none.
    pub page_separator: PageSeparator,
    /// Emit document metadata (YAML front matter, `\title`, `<title>`). Default: true.
    pub include_metadata: bool,
    /// LaTeX `\documentclass`. Default: `article`.
    pub latex_document_class: String,
    /// Use numbered `equation` environments for block formulas. Default: true.
    pub numbered_equations: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            page_separator: PageSeparator::default(),
            include_metadata: true,
            latex_document_class: "article".to_string(),
            numbered_equations: true,
        }
    }
}

/// A side file produced next to the main artifact, e.g. an extracted figure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Path relative to the artifact, always with `/` separators.
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Output of one serializer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub attachments: Vec<Attachment>,
    /// Human-readable notes for every placeholder the renderer had to emit.
    pub degradations: Vec<String>,
}

/// Converts a finalized document into one output format.
pub trait Serializer: Send + Sync {
    fn format(&self) -> OutputFormat;

    fn render(&self, document: &Document) -> Result<Rendered, SerializationError>;
}

/// The serializer for `format`.
pub fn serializer_for(format: OutputFormat, options: &ExportOptions) -> Box<dyn Serializer> {
    match format {
        OutputFormat::Markdown => Box::new(markdown::MarkdownSerializer::new(options.clone())),
        OutputFormat::Latex => Box::new(latex::LatexSerializer::new(options.clone())),
        OutputFormat::Docx => Box::new(docx::DocxSerializer::new(options.clone())),
        OutputFormat::Html => Box::new(html::HtmlSerializer::new(options.clone())),
    }
}

/// Render `document` as `format` in one call.
pub fn render(
    format: OutputFormat,
    document: &Document,
    options: &ExportOptions,
) -> Result<Rendered, SerializationError> {
    serializer_for(format, options).render(document)
}

// ── Shared block layout ──────────────────────────────────────────────────

/// A run inside a paragraph.
#[derive(Debug, Clone, PartialEq)]
pub enum Span {
    Text(String),
    /// Inline LaTeX without delimiters.
    Math(String),
}

/// Format-independent unit of output.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// `level` 1 for titles, 2 for section headings.
    Heading { level: u8, text: String },
    Paragraph(Vec<Span>),
    /// Display formula, LaTeX without delimiters.
    Math(String),
    Table(TableGrid),
    Figure { id: String, image: ImageRef },
    Caption(String),
    /// Content that could not be represented; the text says what was lost.
    Placeholder(String),
}

/// The blocks of one page, or the reason the page was omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    /// 1-indexed page number.
    pub number: usize,
    pub blocks: Vec<Block>,
    pub omitted: Option<String>,
}

impl PageLayout {
    /// Degradation notes for every placeholder on the page.
    pub fn placeholder_notes(&self) -> impl Iterator<Item = String> + '_ {
        self.blocks.iter().filter_map(move |b| match b {
            Block::Placeholder(what) => Some(format!("page {}: {}", self.number, what)),
            _ => None,
        })
    }
}

/// Lay out every page of `document` in index order.
pub fn layout_document(document: &Document) -> Vec<PageLayout> {
    let mut pages: Vec<&Page> = document.pages.iter().collect();
    pages.sort_by_key(|p| p.index);
    pages.into_iter().map(layout_page).collect()
}

/// Group one page's regions into blocks, in `order_key` order.
///
/// An inline formula joins the paragraph before it when their boxes share a
/// line, and text that continues on that line after the formula joins too.
pub fn layout_page(page: &Page) -> PageLayout {
    let number = page.index + 1;
    if let Some(reason) = &page.degraded {
        return PageLayout {
            number,
            blocks: Vec::new(),
            omitted: Some(reason.clone()),
        };
    }

    let mut regions: Vec<&Region> = page.regions.iter().collect();
    regions.sort_by_key(|r| (r.order_key.unwrap_or(u32::MAX), r.id.clone()));

    let mut blocks: Vec<Block> = Vec::new();
    let mut figure_ids: HashSet<String> = HashSet::new();
    // Box of the last region appended to an open paragraph.
    let mut open: Option<BBox> = None;

    for region in regions {
        match &region.content {
            RegionContent::Text { text, role } if region.kind == RegionKind::Text => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                match role {
                    TextRole::Title | TextRole::Heading => {
                        let level = if *role == TextRole::Title { 1 } else { 2 };
                        blocks.push(Block::Heading {
                            level,
                            text: text.to_string(),
                        });
                        open = None;
                    }
                    TextRole::Paragraph => {
                        let joins = open.is_some_and(|b| b.shares_line_with(&region.bbox))
                            && matches!(
                                blocks.last(),
                                Some(Block::Paragraph(spans)) if matches!(spans.last(), Some(Span::Math(_)))
                            );
                        if let (true, Some(Block::Paragraph(spans))) = (joins, blocks.last_mut()) {
                            spans.push(Span::Text(text.to_string()));
                        } else {
                            blocks.push(Block::Paragraph(vec![Span::Text(text.to_string())]));
                        }
                        open = Some(region.bbox);
                    }
                }
            }
            RegionContent::Text { text, .. } => {
                let text = text.trim();
                if !text.is_empty() {
                    blocks.push(Block::Caption(text.to_string()));
                }
                open = None;
            }
            RegionContent::Formula { latex, display } => {
                let latex = latex.trim();
                if latex.is_empty() {
                    continue;
                }
                match display {
                    FormulaDisplay::Inline => {
                        let joins = open.is_some_and(|b| b.shares_line_with(&region.bbox));
                        if let (true, Some(Block::Paragraph(spans))) = (joins, blocks.last_mut()) {
                            spans.push(Span::Math(latex.to_string()));
                        } else {
                            blocks.push(Block::Paragraph(vec![Span::Math(latex.to_string())]));
                        }
                        open = Some(region.bbox);
                    }
                    FormulaDisplay::Block => {
                        blocks.push(Block::Math(latex.to_string()));
                        open = None;
                    }
                }
            }
            RegionContent::Table(grid) => {
                if grid.is_empty() || grid.column_count() == 0 {
                    blocks.push(Block::Placeholder(format!("empty table '{}'", region.id)));
                } else {
                    blocks.push(Block::Table(grid.clone()));
                }
                open = None;
            }
            RegionContent::Image(image) => {
                if image.png.is_some() || image.uri.is_some() {
                    blocks.push(Block::Figure {
                        id: figure_id(number, &region.id, &mut figure_ids),
                        image: image.clone(),
                    });
                } else {
                    blocks.push(Block::Placeholder(format!(
                        "image '{}' has no data",
                        region.id
                    )));
                }
                open = None;
            }
            RegionContent::Cell { row, col, text } => {
                blocks.push(Block::Placeholder(format!(
                    "table cell ({row},{col}) '{}' without table: {}",
                    region.id,
                    text.trim()
                )));
                open = None;
            }
        }
    }

    PageLayout {
        number,
        blocks,
        omitted: None,
    }
}

/// Region id reduced to a safe file name.
pub fn file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "image".to_string()
    } else {
        stem
    }
}

/// Page-qualified figure name, unique within the document: detector ids
/// repeat across pages and may collide once sanitised.
fn figure_id(page: usize, region: &str, taken: &mut HashSet<String>) -> String {
    let base = format!("p{page}-{}", file_stem(region));
    let mut id = base.clone();
    let mut n = 2;
    while !taken.insert(id.clone()) {
        id = format!("{base}-{n}");
        n += 1;
    }
    id
}

/// Text that is safe inside an XML/HTML comment.
pub(crate) fn comment_safe(text: &str) -> String {
    let mut s = text.replace("--", "- -");
    if s.ends_with('-') {
        s.push(' ');
    }
    s
}

/// Whether the document contains Cyrillic text.
pub(crate) fn has_cyrillic(document: &Document) -> bool {
    document
        .metadata
        .scripts
        .contains(&crate::model::Script::Cyrillic)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::model::*;

    pub fn region(id: &str, bbox: (f64, f64, f64, f64), content: RegionContent, order: u32) -> Region {
        let kind = match &content {
            RegionContent::Text { .. } => RegionKind::Text,
            RegionContent::Formula { .. } => RegionKind::Formula,
            RegionContent::Table(_) | RegionContent::Cell { .. } => RegionKind::Table,
            RegionContent::Image(_) => RegionKind::Image,
        };
        Region {
            id: id.into(),
            kind,
            bbox: BBox::new(bbox.0, bbox.1, bbox.2, bbox.3).unwrap(),
            content,
            confidence: 0.9,
            source: SourceDetector::Layout,
            page_index: 0,
            order_key: Some(order),
            parent: None,
        }
    }

    pub fn text(s: &str) -> RegionContent {
        RegionContent::Text {
            text: s.into(),
            role: TextRole::Paragraph,
        }
    }

    pub fn formula(s: &str, display: FormulaDisplay) -> RegionContent {
        RegionContent::Formula {
            latex: s.into(),
            display,
        }
    }

    /// One page: heading, paragraph with inline math, block formula, table,
    /// caption and a cropped figure.
    pub fn sample_document() -> Document {
        let png = {
            let img = image::DynamicImage::new_rgb8(4, 2);
            crate::pipeline::encode::encode_png(&img).unwrap()
        };
        let mut page = Page::new(0);
        page.regions = vec![
            region(
                "h",
                (0.1, 0.05, 0.9, 0.08),
                RegionContent::Text {
                    text: "Введение".into(),
                    role: TextRole::Heading,
                },
                0,
            ),
            region("t1", (0.1, 0.10, 0.4, 0.12), text("Let"), 1),
            region("f1", (0.41, 0.10, 0.5, 0.12), formula("a_1 < b", FormulaDisplay::Inline), 2),
            region("t2", (0.51, 0.10, 0.9, 0.12), text("hold & stay."), 3),
            region("eq", (0.2, 0.2, 0.8, 0.25), formula("x^2+y^2=r^2", FormulaDisplay::Block), 4),
            region(
                "tab",
                (0.1, 0.3, 0.9, 0.5),
                RegionContent::Table(TableGrid::new(vec![
                    vec!["n".into(), "a|b".into()],
                    vec!["1".into(), "2".into()],
                ])),
                5,
            ),
            region(
                "fig",
                (0.1, 0.55, 0.9, 0.8),
                RegionContent::Image(ImageRef {
                    uri: None,
                    png: Some(png),
                    alt: Some("plot".into()),
                }),
                6,
            ),
            region(
                "cap",
                (0.1, 0.81, 0.9, 0.84),
                RegionContent::Text {
                    text: "Figure 1: growth".into(),
                    role: TextRole::Paragraph,
                },
                7,
            ),
        ];
        page.regions[7].kind = RegionKind::Caption;
        let mut doc = Document::new();
        doc.pages.push(page);
        doc.derive_metadata(Some("Circle"));
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::model::*;

    #[test]
    fn output_format_parses_aliases() {
        assert_eq!("md".parse::<OutputFormat>(), Ok(OutputFormat::Markdown));
        assert_eq!("LaTeX".parse::<OutputFormat>(), Ok(OutputFormat::Latex));
        assert_eq!("word".parse::<OutputFormat>(), Ok(OutputFormat::Docx));
        assert_eq!("htm".parse::<OutputFormat>(), Ok(OutputFormat::Html));
        assert!("pdf".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Latex.to_string(), "latex");
        assert_eq!(OutputFormat::Markdown.extension(), "md");
    }

    #[test]
    fn inline_formula_joins_paragraph_on_same_line() {
        let layout = layout_page(&sample_document().pages[0]);
        assert_eq!(
            layout.blocks[1],
            Block::Paragraph(vec![
                Span::Text("Let".into()),
                Span::Math("a_1 < b".into()),
                Span::Text("hold & stay.".into()),
            ])
        );
        assert_eq!(layout.blocks[2], Block::Math("x^2+y^2=r^2".into()));
        assert!(matches!(layout.blocks[5], Block::Caption(_)));
    }

    #[test]
    fn inline_formula_on_another_line_starts_a_paragraph() {
        let mut page = Page::new(0);
        page.regions = vec![
            region("t", (0.1, 0.1, 0.9, 0.12), text("First."), 0),
            region("f", (0.1, 0.3, 0.2, 0.32), formula("k", FormulaDisplay::Inline), 1),
        ];
        let layout = layout_page(&page);
        assert_eq!(layout.blocks.len(), 2);
        assert_eq!(layout.blocks[1], Block::Paragraph(vec![Span::Math("k".into())]));
    }

    #[test]
    fn two_text_regions_on_one_line_stay_separate() {
        let mut page = Page::new(0);
        page.regions = vec![
            region("a", (0.1, 0.1, 0.4, 0.12), text("left"), 0),
            region("b", (0.6, 0.1, 0.9, 0.12), text("right"), 1),
        ];
        assert_eq!(layout_page(&page).blocks.len(), 2);
    }

    #[test]
    fn regions_follow_order_key_not_storage_order() {
        let mut page = Page::new(0);
        page.regions = vec![
            region("b", (0.1, 0.5, 0.9, 0.6), text("second"), 1),
            region("a", (0.1, 0.1, 0.9, 0.2), text("first"), 0),
        ];
        let layout = layout_page(&page);
        assert_eq!(layout.blocks[0], Block::Paragraph(vec![Span::Text("first".into())]));
    }

    #[test]
    fn unsupported_content_becomes_placeholder() {
        let mut page = Page::new(2);
        page.regions = vec![
            region("img", (0.1, 0.1, 0.9, 0.5), RegionContent::Image(ImageRef::default()), 0),
            region(
                "c",
                (0.1, 0.6, 0.3, 0.7),
                RegionContent::Cell {
                    row: 0,
                    col: 1,
                    text: "x".into(),
                },
                1,
            ),
        ];
        let layout = layout_page(&page);
        assert!(layout.blocks.iter().all(|b| matches!(b, Block::Placeholder(_))));
        let notes: Vec<String> = layout.placeholder_notes().collect();
        assert_eq!(notes.len(), 2);
        assert!(notes[0].starts_with("page 3:"), "got {notes:?}");
    }

    #[test]
    fn degraded_page_is_omitted() {
        let layout = layout_page(&Page::degraded(4, "detector down"));
        assert_eq!(layout.number, 5);
        assert_eq!(layout.omitted.as_deref(), Some("detector down"));
        assert!(layout.blocks.is_empty());
    }

    #[test]
    fn file_stem_sanitises_ids() {
        assert_eq!(file_stem("p0-r3"), "p0-r3");
        assert_eq!(file_stem("a/b c"), "a_b_c");
        assert_eq!(file_stem(""), "image");
    }

    #[test]
    fn figure_ids_are_page_qualified_and_unique() {
        let png = vec![0x89, b'P', b'N', b'G'];
        let figure = |id: &str, y: f64, order: u32| {
            region(
                id,
                (0.1, y, 0.9, y + 0.1),
                RegionContent::Image(ImageRef {
                    uri: None,
                    png: Some(png.clone()),
                    alt: None,
                }),
                order,
            )
        };
        let mut page = Page::new(1);
        page.regions = vec![figure("a.b", 0.1, 0), figure("a_b", 0.3, 1)];
        let ids: Vec<String> = layout_page(&page)
            .blocks
            .into_iter()
            .filter_map(|b| match b {
                Block::Figure { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["p2-a_b", "p2-a_b-2"]);
    }

    #[test]
    fn every_serializer_renders_the_sample() {
        let doc = sample_document();
        for format in OutputFormat::ALL {
            let out = render(format, &doc, &ExportOptions::default()).unwrap();
            assert!(!out.bytes.is_empty(), "{format} produced nothing");
            assert!(out.degradations.is_empty(), "{format}: {:?}", out.degradations);
        }
    }
}
