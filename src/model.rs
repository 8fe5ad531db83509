//! The Region Model: the canonical, detector-independent document tree.
//!
//! ```text
//! Document ──▶ Page (index order) ──▶ Region (order_key order)
//!                                       ├─ kind     Text | Formula | Table | Image | Caption
//!                                       ├─ bbox     normalized [0,1] page coordinates
//!                                       ├─ content  tagged payload matching `kind`
//!                                       └─ source   Layout | Formula | Ocr
//! ```
//!
//! Every stage after the normalizer speaks only these types. Detector
//! output in any other shape is converted in [`crate::pipeline::normalize`]
//! and never leaks further down the pipeline.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

// ── Geometry ─────────────────────────────────────────────────────────────

/// Axis-aligned rectangle in normalized page coordinates.
///
/// Origin is the top-left corner of the page; both axes run 0.0–1.0.
/// A `BBox` always satisfies `x0 < x1` and `y0 < y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    /// Build a box, returning `None` if it is empty, inverted or not finite.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Option<Self> {
        let finite = [x0, y0, x1, y1].iter().all(|v| v.is_finite());
        if finite && x0 < x1 && y0 < y1 {
            Some(Self { x0, y0, x1, y1 })
        } else {
            None
        }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Area shared by both boxes (0.0 when disjoint).
    pub fn intersection_area(&self, other: &Self) -> f64 {
        let w = (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0);
        let h = (self.y1.min(other.y1) - self.y0.max(other.y0)).max(0.0);
        w * h
    }

    /// Intersection-over-Union in [0,1].
    pub fn iou(&self, other: &Self) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Whether the vertical extents of the two boxes overlap.
    pub fn shares_line_with(&self, other: &Self) -> bool {
        self.y0 < other.y1 && other.y0 < self.y1
    }

    /// Whether the horizontal extents of the two boxes overlap.
    pub fn overlaps_horizontally(&self, other: &Self) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1
    }
}

// ── Region ───────────────────────────────────────────────────────────────

/// What a region is, independent of how its payload is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Text,
    Formula,
    Table,
    Image,
    Caption,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegionKind::Text => "text",
            RegionKind::Formula => "formula",
            RegionKind::Table => "table",
            RegionKind::Image => "image",
            RegionKind::Caption => "caption",
        };
        f.write_str(s)
    }
}

/// Upstream detector that produced a region.
///
/// The derived `Ord` is the tie-break priority used by Merge & Filter:
/// `Layout` sorts first, then `Formula`, then `Ocr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDetector {
    Layout,
    Formula,
    Ocr,
}

impl SourceDetector {
    /// Parse a free-form detector name such as `"layout_det"` or `"PP-OCRv4"`.
    pub fn parse(name: &str) -> Option<Self> {
        let n = name.trim().to_ascii_lowercase();
        if n.starts_with("layout") {
            Some(SourceDetector::Layout)
        } else if n.starts_with("formula") || n.starts_with("latex") || n.starts_with("equation")
        {
            Some(SourceDetector::Formula)
        } else if n.starts_with("ocr") || n.starts_with("pp-ocr") || n.starts_with("text") {
            Some(SourceDetector::Ocr)
        } else {
            None
        }
    }
}

impl fmt::Display for SourceDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceDetector::Layout => "layout",
            SourceDetector::Formula => "formula",
            SourceDetector::Ocr => "ocr",
        };
        f.write_str(s)
    }
}

/// Structural role of a text region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextRole {
    #[default]
    Paragraph,
    Title,
    Heading,
}

/// Whether a formula sits inside running text or on its own line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaDisplay {
    Inline,
    #[default]
    Block,
}

/// Largest row or column count a table may grow to.
pub const MAX_TABLE_DIM: usize = 1024;

/// Row-major grid of cell strings. Rows may be ragged before rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableGrid {
    pub rows: Vec<Vec<String>>,
}

impl TableGrid {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Number of columns of the widest row.
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|r| r.iter().all(|c| c.trim().is_empty()))
    }

    /// Write `text` into `(row, col)`, growing the grid as needed.
    ///
    /// A cell that already has text keeps it and gets the new text appended,
    /// so two detections of one cell are not lost. Returns `false`, leaving
    /// the grid untouched, when the position lies outside [`MAX_TABLE_DIM`].
    pub fn set_cell(&mut self, row: usize, col: usize, text: &str) -> bool {
        let (Some(rows), Some(cols)) = (row.checked_add(1), col.checked_add(1)) else {
            return false;
        };
        if rows > MAX_TABLE_DIM || cols > MAX_TABLE_DIM {
            return false;
        }
        if self.rows.len() < rows {
            self.rows.resize_with(rows, Vec::new);
        }
        let r = &mut self.rows[row];
        if r.len() < cols {
            r.resize(cols, String::new());
        }
        let cell = &mut r[col];
        if cell.is_empty() {
            cell.push_str(text);
        } else if !text.is_empty() {
            cell.push(' ');
            cell.push_str(text);
        }
        true
    }

    /// Rows padded to a rectangle.
    pub fn padded_rows(&self) -> Vec<Vec<&str>> {
        let cols = self.column_count();
        self.rows
            .iter()
            .map(|r| {
                let mut row: Vec<&str> = r.iter().map(String::as_str).collect();
                row.resize(cols, "");
                row
            })
            .collect()
    }
}

/// Reference to a picture region's pixels.
///
/// `png` holds a crop of the rendered page when the detector did not supply
/// its own URI. Either may be absent; serializers then emit a placeholder.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub png: Option<Vec<u8>>,
    pub alt: Option<String>,
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("uri", &self.uri)
            .field("png", &self.png.as_ref().map(|b| format!("<{} bytes>", b.len())))
            .field("alt", &self.alt)
            .finish()
    }
}

/// Payload of a region. The variant always agrees with [`Region::kind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegionContent {
    /// Running text (kind `Text`) or a caption (kind `Caption`).
    Text { text: String, role: TextRole },
    /// LaTeX source without outer delimiters.
    Formula {
        latex: String,
        display: FormulaDisplay,
    },
    /// Assembled table.
    Table(TableGrid),
    /// Picture.
    Image(ImageRef),
    /// One cell of a table, before assembly into its parent's grid.
    Cell { row: usize, col: usize, text: String },
}

impl RegionContent {
    /// Plain text carried by the payload, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            RegionContent::Text { text, .. } | RegionContent::Cell { text, .. } => Some(text),
            RegionContent::Formula { latex, .. } => Some(latex),
            RegionContent::Table(_) | RegionContent::Image(_) => None,
        }
    }
}

/// One detected content unit on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub kind: RegionKind,
    pub bbox: BBox,
    pub content: RegionContent,
    pub confidence: f64,
    pub source: SourceDetector,
    pub page_index: usize,
    /// Reading position on the page. `None` until Merge & Filter runs.
    pub order_key: Option<u32>,
    /// Id of the table a sub-cell belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Region {
    /// Whether this region is a table sub-cell awaiting assembly.
    pub fn is_cell(&self) -> bool {
        matches!(self.content, RegionContent::Cell { .. })
    }

    /// Characters of text carried by the region (0 for tables and images).
    pub fn text_len(&self) -> usize {
        self.content.text().map(|t| t.chars().count()).unwrap_or(0)
    }

    /// Canonical geometric ordering: top-to-bottom, left-to-right, then
    /// detector priority, kind and id so the order is total.
    pub fn reading_cmp(&self, other: &Self) -> Ordering {
        self.bbox
            .y0
            .total_cmp(&other.bbox.y0)
            .then_with(|| self.bbox.x0.total_cmp(&other.bbox.x0))
            .then_with(|| self.source.cmp(&other.source))
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.id.cmp(&other.id))
    }
}

// ── Page / Document ──────────────────────────────────────────────────────

/// One page of the reconstructed document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Zero-based page number in the source PDF.
    pub index: usize,
    /// Regions in reading order.
    pub regions: Vec<Region>,
    /// Set when the page could not be detected or normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl Page {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    /// A page that failed upstream and carries no regions.
    pub fn degraded(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            regions: Vec::new(),
            degraded: Some(reason.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Writing systems found in the document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    Latin,
    Cyrillic,
    Greek,
    Cjk,
    Arabic,
}

impl Script {
    fn of(c: char) -> Option<Self> {
        match c {
            'a'..='z' | 'A'..='Z' | '\u{00C0}'..='\u{024F}' => Some(Script::Latin),
            '\u{0400}'..='\u{04FF}' => Some(Script::Cyrillic),
            '\u{0370}'..='\u{03FF}' => Some(Script::Greek),
            '\u{3040}'..='\u{30FF}' | '\u{4E00}'..='\u{9FFF}' | '\u{AC00}'..='\u{D7AF}' => {
                Some(Script::Cjk)
            }
            '\u{0600}'..='\u{06FF}' => Some(Script::Arabic),
            _ => None,
        }
    }
}

/// Derived document-level metadata. Never authoritative input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    /// Writing systems seen in Text and Caption regions, sorted.
    pub scripts: Vec<Script>,
    pub source: Option<PathBuf>,
    pub author: Option<String>,
}

/// Root aggregate: all pages of one converted PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub pages: Vec<Page>,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// All regions across pages, in page then reading order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.pages.iter().flat_map(|p| p.regions.iter())
    }

    pub fn region_count(&self) -> usize {
        self.pages.iter().map(|p| p.regions.len()).sum()
    }

    /// Number of pages that made it through normalization.
    pub fn healthy_pages(&self) -> usize {
        self.pages.iter().filter(|p| !p.is_degraded()).count()
    }

    /// Recompute derived metadata from region content.
    ///
    /// An explicit `pdf_title` (from the PDF info dictionary) wins over the
    /// first Title-role region, which wins over the first text region.
    pub fn derive_metadata(&mut self, pdf_title: Option<&str>) {
        let mut scripts: Vec<Script> = Vec::new();
        for region in self.regions() {
            if !matches!(region.kind, RegionKind::Text | RegionKind::Caption) {
                continue;
            }
            if let Some(text) = region.content.text() {
                for s in text.chars().filter_map(Script::of) {
                    if !scripts.contains(&s) {
                        scripts.push(s);
                    }
                }
            }
        }
        scripts.sort();
        self.metadata.scripts = scripts;

        let from_pdf = pdf_title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        self.metadata.title = from_pdf.or_else(|| self.title_candidate());
    }

    fn title_candidate(&self) -> Option<String> {
        fn text_of(r: &Region) -> Option<(&str, TextRole)> {
            match &r.content {
                RegionContent::Text { text, role } if r.kind == RegionKind::Text => {
                    Some((text.as_str(), *role))
                }
                _ => None,
            }
        }
        let titled = self
            .regions()
            .filter_map(text_of)
            .find(|(_, role)| *role == TextRole::Title)
            .map(|(t, _)| t);
        let first = || self.regions().filter_map(text_of).map(|(t, _)| t).next();
        titled.or_else(first).map(|t| {
            let line = t.lines().next().unwrap_or("").trim();
            line.chars().take(120).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_region(id: &str, y0: f64, text: &str, role: TextRole) -> Region {
        Region {
            id: id.into(),
            kind: RegionKind::Text,
            bbox: BBox::new(0.1, y0, 0.9, y0 + 0.05).unwrap(),
            content: RegionContent::Text {
                text: text.into(),
                role,
            },
            confidence: 0.9,
            source: SourceDetector::Ocr,
            page_index: 0,
            order_key: None,
            parent: None,
        }
    }

    #[test]
    fn bbox_rejects_inverted_and_empty() {
        assert!(BBox::new(0.5, 0.1, 0.4, 0.2).is_none());
        assert!(BBox::new(0.1, 0.1, 0.1, 0.2).is_none());
        assert!(BBox::new(f64::NAN, 0.1, 0.4, 0.2).is_none());
        assert!(BBox::new(0.1, 0.1, 0.4, 0.2).is_some());
    }

    #[test]
    fn iou_of_spec_scenario_exceeds_half() {
        let text = BBox::new(0.1, 0.1, 0.5, 0.2).unwrap();
        let formula = BBox::new(0.12, 0.11, 0.48, 0.19).unwrap();
        let iou = text.iou(&formula);
        assert!(iou > 0.5, "iou = {iou}");
        assert!((text.iou(&text) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BBox::new(0.0, 0.0, 0.1, 0.1).unwrap();
        let b = BBox::new(0.5, 0.5, 0.6, 0.6).unwrap();
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn source_detector_priority_and_parsing() {
        assert!(SourceDetector::Layout < SourceDetector::Formula);
        assert!(SourceDetector::Formula < SourceDetector::Ocr);
        assert_eq!(SourceDetector::parse("layout_det"), Some(SourceDetector::Layout));
        assert_eq!(SourceDetector::parse("PP-OCRv4"), Some(SourceDetector::Ocr));
        assert_eq!(SourceDetector::parse("formula_rec"), Some(SourceDetector::Formula));
        assert_eq!(SourceDetector::parse("mystery"), None);
    }

    #[test]
    fn table_grid_grows_and_pads() {
        let mut grid = TableGrid::default();
        assert!(grid.set_cell(1, 2, "x"));
        grid.set_cell(0, 0, "a");
        grid.set_cell(0, 0, "b");
        assert!(!grid.set_cell(usize::MAX, 0, "overflow"));
        assert!(!grid.set_cell(0, MAX_TABLE_DIM, "too wide"));
        assert_eq!(grid.rows.len(), 2);
        assert_eq!(grid.column_count(), 3);
        let rows = grid.padded_rows();
        assert_eq!(rows[0], vec!["a b", "", ""]);
        assert_eq!(rows[1], vec!["", "", "x"]);
    }

    #[test]
    fn derive_metadata_prefers_pdf_title_then_title_role() {
        let mut doc = Document::new();
        let mut page = Page::new(0);
        page.regions.push(text_region("a", 0.1, "Preface text", TextRole::Paragraph));
        page.regions.push(text_region("b", 0.2, "Теорема о сходимости", TextRole::Title));
        doc.pages.push(page);

        doc.derive_metadata(None);
        assert_eq!(doc.metadata.title.as_deref(), Some("Теорема о сходимости"));
        assert_eq!(doc.metadata.scripts, vec![Script::Latin, Script::Cyrillic]);

        doc.derive_metadata(Some("  Real Title "));
        assert_eq!(doc.metadata.title.as_deref(), Some("Real Title"));
    }

    #[test]
    fn document_serialises_round_trip() {
        let mut doc = Document::new();
        let mut page = Page::new(0);
        page.regions.push(text_region("a", 0.1, "hello", TextRole::Paragraph));
        doc.pages.push(page);
        doc.pages.push(Page::degraded(1, "no dimensions"));
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
        assert_eq!(back.healthy_pages(), 1);
    }
}
