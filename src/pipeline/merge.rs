//! Merge & Filter Engine: many detectors' regions → one finalized Document.
//!
//! Per page, in this order:
//!
//! 1. **Filter** by confidence and area. Formulas and table sub-cells are
//!    exempt from the area filter.
//! 2. **Overlap resolution** between detectors: Formula beats Text outright,
//!    otherwise the more confident region wins, then detector priority.
//! 3. **Adjacent-text merge** (opt-in via `text_merge_gap`).
//! 4. **Table cell assembly** into the parent table's grid.
//! 5. **Reading order**: top-to-bottom, left-to-right, `order_key = 0..n`.
//!
//! [`reconcile`] is a pure function: same input and thresholds, same output.

use crate::config::MergeThresholds;
use crate::error::{MergeError, Warning};
use crate::model::{Document, Page, Region, RegionContent, RegionKind, TextRole};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// All normalized regions of one page, or the reason the page has none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRegions {
    pub page_index: usize,
    pub regions: Vec<Region>,
    pub degraded: Option<String>,
}

impl PageRegions {
    pub fn new(page_index: usize, regions: Vec<Region>) -> Self {
        Self {
            page_index,
            regions,
            degraded: None,
        }
    }

    pub fn degraded(page_index: usize, reason: impl Into<String>) -> Self {
        Self {
            page_index,
            regions: Vec::new(),
            degraded: Some(reason.into()),
        }
    }
}

/// The finalized document plus the diagnostics produced while building it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub document: Document,
    pub warnings: Vec<Warning>,
}

/// Merge every page's regions into one ordered [`Document`].
pub fn reconcile(
    mut pages: Vec<PageRegions>,
    thresholds: &MergeThresholds,
) -> Result<Reconciliation, MergeError> {
    thresholds.validate()?;
    if pages.is_empty() {
        return Err(MergeError::NoPages);
    }
    pages.sort_by_key(|p| p.page_index);

    let mut out = Reconciliation::default();
    for page in pages {
        if let Some(r) = page.regions.iter().find(|r| r.page_index != page.page_index) {
            return Err(MergeError::PageMismatch {
                region: r.id.clone(),
                expected: page.page_index,
                found: r.page_index,
            });
        }
        if let Some(reason) = page.degraded {
            out.document.pages.push(Page::degraded(page.page_index, reason));
            continue;
        }
        let regions = reconcile_page(page.page_index, page.regions, thresholds, &mut out.warnings);
        out.document.pages.push(Page {
            index: page.page_index,
            regions,
            degraded: None,
        });
    }
    Ok(out)
}

fn reconcile_page(
    page_index: usize,
    regions: Vec<Region>,
    t: &MergeThresholds,
    warnings: &mut Vec<Warning>,
) -> Vec<Region> {
    let total = regions.len();

    // Stage 1: score / area filter
    let mut kept: Vec<Region> = regions.into_iter().filter(|r| passes_filter(r, t)).collect();
    let filtered = total - kept.len();

    // Stage 2: overlap resolution over a canonical order
    kept.sort_by(Region::reading_cmp);
    let before_overlap = kept.len();
    let mut kept = resolve_overlaps(kept, t.iou_threshold);
    let suppressed = before_overlap - kept.len();

    // Stage 3: adjacent paragraphs
    if let Some(gap) = t.text_merge_gap {
        kept = merge_adjacent_text(kept, gap);
    }

    // Stage 4: table cells
    let (cells, mut kept): (Vec<Region>, Vec<Region>) = kept.into_iter().partition(Region::is_cell);
    assemble_cells(page_index, cells, &mut kept, warnings);

    // Stage 5: reading order
    kept.sort_by(Region::reading_cmp);
    for (i, r) in kept.iter_mut().enumerate() {
        r.order_key = Some(i as u32);
    }

    debug!(
        "Page {}: {} regions in, {} filtered, {} suppressed by overlap, {} out",
        page_index + 1,
        total,
        filtered,
        suppressed,
        kept.len()
    );
    kept
}

fn passes_filter(r: &Region, t: &MergeThresholds) -> bool {
    if r.confidence < t.min_score {
        return false;
    }
    r.kind == RegionKind::Formula
        || r.is_cell()
        || r.bbox.area() >= t.min_area
        || t.min_text_len.is_some_and(|n| r.text_len() >= n)
}

/// Which of two competing regions survives.
fn winner(a: &Region, b: &Region) -> Ordering {
    match (a.kind, b.kind) {
        (RegionKind::Formula, RegionKind::Text) => Ordering::Greater,
        (RegionKind::Text, RegionKind::Formula) => Ordering::Less,
        _ => a
            .confidence
            .total_cmp(&b.confidence)
            // Lower SourceDetector sorts first and has higher priority.
            .then_with(|| b.source.cmp(&a.source)),
    }
}

fn payload_is_empty(content: &RegionContent) -> bool {
    match content {
        RegionContent::Text { text, .. } | RegionContent::Cell { text, .. } => text.trim().is_empty(),
        RegionContent::Formula { latex, .. } => latex.trim().is_empty(),
        RegionContent::Table(grid) => grid.is_empty(),
        RegionContent::Image(img) => img.uri.is_none() && img.png.is_none(),
    }
}

/// Suppress the loser of every cross-detector pair above `iou_threshold`.
///
/// `regions` must already be in canonical order; pairs are visited in that
/// order and a suppressed region takes no further part. A winner of the same
/// kind with an empty payload adopts the loser's payload (a layout box
/// without text beating the OCR line that read it).
fn resolve_overlaps(mut regions: Vec<Region>, iou_threshold: f64) -> Vec<Region> {
    let n = regions.len();
    let mut alive = vec![true; n];
    for i in 0..n {
        for j in (i + 1)..n {
            if !alive[i] {
                break;
            }
            if !alive[j] {
                continue;
            }
            let (a, b) = (&regions[i], &regions[j]);
            if a.source == b.source || a.is_cell() || b.is_cell() {
                continue;
            }
            if a.bbox.iou(&b.bbox) <= iou_threshold {
                continue;
            }
            let (win, lose) = match winner(a, b) {
                Ordering::Less => (j, i),
                _ => (i, j),
            };
            debug!(
                "'{}' ({} {}, {:.2}) suppresses '{}' ({} {}, {:.2})",
                regions[win].id,
                regions[win].source,
                regions[win].kind,
                regions[win].confidence,
                regions[lose].id,
                regions[lose].source,
                regions[lose].kind,
                regions[lose].confidence
            );
            if regions[win].kind == regions[lose].kind
                && payload_is_empty(&regions[win].content)
                && !payload_is_empty(&regions[lose].content)
            {
                regions[win].content = regions[lose].content.clone();
            }
            alive[lose] = false;
        }
    }
    regions
        .into_iter()
        .zip(alive)
        .filter_map(|(r, keep)| keep.then_some(r))
        .collect()
}

fn is_paragraph(r: &Region) -> bool {
    r.kind == RegionKind::Text
        && matches!(
            r.content,
            RegionContent::Text {
                role: TextRole::Paragraph,
                ..
            }
        )
}

/// Join consecutive paragraphs of one detector that sit in the same column
/// less than `gap` apart.
fn merge_adjacent_text(regions: Vec<Region>, gap: f64) -> Vec<Region> {
    let mut out: Vec<Region> = Vec::with_capacity(regions.len());
    for r in regions {
        if let Some(prev) = out.last_mut() {
            let close = r.bbox.y0 - prev.bbox.y1 < gap;
            if is_paragraph(prev)
                && is_paragraph(&r)
                && prev.source == r.source
                && prev.bbox.overlaps_horizontally(&r.bbox)
                && close
            {
                if let (
                    RegionContent::Text { text: into, .. },
                    RegionContent::Text { text: from, .. },
                ) = (&mut prev.content, &r.content)
                {
                    if !from.is_empty() {
                        if !into.is_empty() {
                            into.push(' ');
                        }
                        into.push_str(from);
                    }
                }
                prev.bbox = prev.bbox.union(&r.bbox);
                prev.confidence = prev.confidence.min(r.confidence);
                continue;
            }
        }
        out.push(r);
    }
    out
}

/// Move each sub-cell's text into its parent table's grid.
fn assemble_cells(
    page_index: usize,
    mut cells: Vec<Region>,
    regions: &mut [Region],
    warnings: &mut Vec<Warning>,
) {
    cells.sort_by(Region::reading_cmp);
    for cell in cells {
        let RegionContent::Cell { row, col, text } = &cell.content else {
            continue;
        };
        let parent = cell.parent.as_deref().and_then(|pid| {
            regions
                .iter_mut()
                .find(|r| r.id == pid && matches!(r.content, RegionContent::Table(_)))
        });
        let placed = match parent {
            Some(Region {
                content: RegionContent::Table(grid),
                ..
            }) => grid.set_cell(*row, *col, text),
            _ => false,
        };
        if !placed {
            warn!("Page {}: orphan table cell '{}'", page_index + 1, cell.id);
            warnings.push(Warning::OrphanCell {
                page: page_index + 1,
                region: cell.id.clone(),
            });
        }
    }
}
