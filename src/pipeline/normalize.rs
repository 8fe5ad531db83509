//! Detection Normalizer: raw detector output → Region Model.
//!
//! Per detection:
//!
//! 1. parse the detector name into a [`SourceDetector`]
//! 2. reduce the bbox (rect or polygon) to an ordered extent, rescale it to
//!    [0,1] page units and clamp it
//! 3. map the confidence through the detector's [`crate::config::ConfidenceScale`]
//! 4. classify the label into a [`RegionKind`] and decode the payload
//!
//! Failures that make the page's geometry untrustworthy (no bbox, unknown
//! page size, unknown detector) abort the whole page with a
//! [`NormalizationError`]; the caller marks the page degraded. A box that
//! collapses to nothing after clamping only loses that one detection.

use crate::config::ConfidenceScales;
use crate::error::NormalizationError;
use crate::model::{
    BBox, FormulaDisplay, ImageRef, Region, RegionContent, RegionKind, SourceDetector, TableGrid,
    TextRole, MAX_TABLE_DIM,
};
use crate::pipeline::detect::{CoordSpace, RawDetection};
use crate::pipeline::encode;
use crate::pipeline::postprocess::{clean_text, parse_pipe_table, strip_math_delimiters};
use crate::pipeline::render::PageImage;
use serde_json::Value;
use tracing::{debug, warn};

/// What a detector label turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Text(TextRole),
    Formula(FormulaDisplay),
    Table,
    Cell,
    Image,
    Caption,
    /// Page furniture (headers, footers, page numbers).
    Skip,
}

fn classify(label: &str, source: SourceDetector) -> Class {
    let l = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    match l.as_str() {
        "" => match source {
            SourceDetector::Formula => Class::Formula(FormulaDisplay::Block),
            _ => Class::Text(TextRole::Paragraph),
        },
        "text" | "paragraph" | "plain_text" | "abstract" | "list" | "list_item" | "reference"
        | "footnote" => Class::Text(TextRole::Paragraph),
        "title" | "doc_title" => Class::Text(TextRole::Title),
        "paragraph_title" | "heading" | "section" | "section_header" | "subtitle" => {
            Class::Text(TextRole::Heading)
        }
        "formula" | "equation" | "display_formula" | "isolate_formula" | "interline_equation" => {
            Class::Formula(FormulaDisplay::Block)
        }
        "inline_formula" | "inline_equation" | "embedding" => Class::Formula(FormulaDisplay::Inline),
        "table" => Class::Table,
        "table_cell" | "cell" => Class::Cell,
        "image" | "figure" | "chart" | "picture" => Class::Image,
        "caption" | "figure_title" | "figure_caption" | "table_caption" | "table_title"
        | "formula_caption" => Class::Caption,
        "header" | "footer" | "page_header" | "page_footer" | "page_number" | "number"
        | "abandon" => Class::Skip,
        other => {
            debug!("Unknown label '{}' treated as text", other);
            Class::Text(TextRole::Paragraph)
        }
    }
}

/// Normalize one page of raw detections.
pub fn normalize(
    raw: &[RawDetection],
    page: &PageImage,
    scales: &ConfidenceScales,
) -> Result<Vec<Region>, NormalizationError> {
    let page_no = page.index + 1;
    let mut regions = Vec::with_capacity(raw.len());

    for (i, det) in raw.iter().enumerate() {
        let source =
            SourceDetector::parse(&det.detector).ok_or_else(|| NormalizationError::UnknownDetector {
                page: page_no,
                name: det.detector.clone(),
            })?;

        let missing_bbox = || NormalizationError::MissingBBox {
            page: page_no,
            index: i,
            detector: det.detector.clone(),
        };
        let (x0, y0, x1, y1) = det
            .bbox
            .as_ref()
            .ok_or_else(missing_bbox)?
            .extent()
            .ok_or_else(missing_bbox)?;

        let (sx, sy) = match det.coords {
            CoordSpace::Fractional => (1.0, 1.0),
            CoordSpace::Pixel => {
                let dims = det
                    .page_dimensions
                    .or(page.dimensions)
                    .ok_or(NormalizationError::UnknownPageDimensions { page: page_no })?;
                (dims.width as f64, dims.height as f64)
            }
        };
        let unit = |v: f64, s: f64| (v / s).clamp(0.0, 1.0);
        let Some(bbox) = BBox::new(unit(x0, sx), unit(y0, sy), unit(x1, sx), unit(y1, sy)) else {
            warn!(
                "Page {}: dropping degenerate box from '{}' ({:?})",
                page_no, det.detector, det.bbox
            );
            continue;
        };

        let confidence = det
            .confidence
            .map(|c| scales.get(source).apply(c))
            .unwrap_or(1.0);

        let class = classify(&det.label, source);
        let invalid = |detail: String| NormalizationError::InvalidContent {
            page: page_no,
            index: i,
            label: det.label.clone(),
            detail,
        };

        let (kind, content) = match class {
            Class::Skip => continue,
            Class::Text(role) => {
                let text = payload_text(&det.content).map_err(invalid)?;
                (RegionKind::Text, RegionContent::Text { text: clean_text(&text), role })
            }
            Class::Caption => {
                let text = payload_text(&det.content).map_err(invalid)?;
                (
                    RegionKind::Caption,
                    RegionContent::Text {
                        text: clean_text(&text),
                        role: TextRole::Paragraph,
                    },
                )
            }
            Class::Formula(display) => {
                let latex = payload_text(&det.content).map_err(invalid)?;
                (
                    RegionKind::Formula,
                    RegionContent::Formula {
                        latex: strip_math_delimiters(&latex),
                        display,
                    },
                )
            }
            Class::Table => {
                let grid = payload_grid(&det.content).map_err(invalid)?;
                (RegionKind::Table, RegionContent::Table(grid))
            }
            Class::Cell => {
                let (row, col, text) = payload_cell(&det.content).map_err(invalid)?;
                (
                    RegionKind::Table,
                    RegionContent::Cell {
                        row,
                        col,
                        text: clean_text(&text),
                    },
                )
            }
            Class::Image => {
                let mut image = payload_image(&det.content).map_err(invalid)?;
                if image.uri.is_none() {
                    image.png = crop(page, &bbox);
                }
                (RegionKind::Image, RegionContent::Image(image))
            }
        };

        regions.push(Region {
            id: det
                .id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("p{}-r{}", page.index, i)),
            kind,
            bbox,
            content,
            confidence,
            source,
            page_index: page.index,
            order_key: None,
            parent: det.parent.clone(),
        });
    }

    debug!(
        "Page {}: normalized {} of {} detections",
        page_no,
        regions.len(),
        raw.len()
    );
    Ok(regions)
}

fn crop(page: &PageImage, bbox: &BBox) -> Option<Vec<u8>> {
    let image = page.image.as_ref()?;
    match encode::crop_png(image, bbox) {
        Ok(png) => png,
        Err(e) => {
            warn!("Page {}: figure crop failed: {}", page.index + 1, e);
            None
        }
    }
}

// ── Payload decoding ─────────────────────────────────────────────────────

fn payload_text(value: &Value) -> Result<String, String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(items) => items
            .iter()
            .map(payload_text)
            .collect::<Result<Vec<_>, _>>()
            .map(|lines| lines.join("\n")),
        Value::Object(map) => ["text", "latex", "content"]
            .iter()
            .find_map(|k| map.get(*k))
            .map(payload_text)
            .unwrap_or_else(|| Err("object has no text, latex or content field".into())),
        Value::Bool(_) => Err("expected text, found a boolean".into()),
    }
}

fn cell_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => clean_text(s),
        other => other.to_string(),
    }
}

fn payload_grid(value: &Value) -> Result<TableGrid, String> {
    match value {
        Value::Null => Ok(TableGrid::default()),
        Value::Array(rows) => rows
            .iter()
            .map(|row| match row {
                Value::Array(cells) => Ok(cells.iter().map(cell_string).collect()),
                other => Err(format!("table row is not an array: {other}")),
            })
            .collect::<Result<Vec<Vec<String>>, String>>()
            .map(TableGrid::new),
        Value::String(s) => Ok(TableGrid::new(parse_pipe_table(s).unwrap_or_else(|| {
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| vec![l.to_string()])
                .collect()
        }))),
        Value::Object(map) => match map.get("rows").or_else(|| map.get("cells")) {
            Some(inner) => payload_grid(inner),
            None => Err("table object has no rows field".into()),
        },
        other => Err(format!("expected a table, found {other}")),
    }
}

fn payload_cell(value: &Value) -> Result<(usize, usize, String), String> {
    let map = value
        .as_object()
        .ok_or_else(|| "cell content must be an object with row and col".to_string())?;
    let index = |key: &str| {
        let v = map
            .get(key)
            .and_then(Value::as_u64)
            .ok_or_else(|| format!("cell is missing '{key}'"))?;
        usize::try_from(v)
            .ok()
            .filter(|&i| i < MAX_TABLE_DIM)
            .ok_or_else(|| format!("cell {key} {v} exceeds the {MAX_TABLE_DIM} limit"))
    };
    let text = map.get("text").map(payload_text).transpose()?.unwrap_or_default();
    Ok((index("row")?, index("col")?, text))
}

fn payload_image(value: &Value) -> Result<ImageRef, String> {
    let non_empty = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
    match value {
        Value::Null => Ok(ImageRef::default()),
        Value::String(uri) => Ok(ImageRef {
            uri: non_empty(uri),
            ..Default::default()
        }),
        Value::Object(map) => {
            let get = |k: &str| map.get(k).and_then(Value::as_str).and_then(non_empty);
            Ok(ImageRef {
                uri: get("uri").or_else(|| get("path")).or_else(|| get("url")),
                png: None,
                alt: get("alt").or_else(|| get("description")),
            })
        }
        other => Err(format!("expected an image reference, found {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfidenceScale;
    use crate::pipeline::detect::RawBBox;
    use crate::pipeline::render::PageDimensions;
    use image::{DynamicImage, Rgba, RgbaImage};
    use serde_json::json;

    fn det(detector: &str, label: &str, bbox: [f64; 4], content: Value) -> RawDetection {
        RawDetection {
            detector: detector.into(),
            label: label.into(),
            id: None,
            parent: None,
            bbox: Some(RawBBox::Rect(bbox)),
            coords: CoordSpace::Pixel,
            confidence: Some(0.9),
            content,
            page_dimensions: None,
        }
    }

    fn page_1000x2000() -> PageImage {
        PageImage::blank(3, PageDimensions::new(1000, 2000))
    }

    #[test]
    fn pixel_boxes_are_rescaled_and_tagged() {
        let raw = vec![det("ocr", "text", [100.0, 200.0, 500.0, 400.0], json!("Hello\r\n"))];
        let regions = normalize(&raw, &page_1000x2000(), &ConfidenceScales::default()).unwrap();
        assert_eq!(regions.len(), 1);
        let r = &regions[0];
        assert_eq!(r.bbox, BBox::new(0.1, 0.1, 0.5, 0.2).unwrap());
        assert_eq!(r.source, SourceDetector::Ocr);
        assert_eq!(r.page_index, 3);
        assert_eq!(r.order_key, None);
        assert_eq!(r.id, "p3-r0");
        assert_eq!(r.content.text(), Some("Hello"));
    }

    #[test]
    fn fractional_polygon_is_reduced_to_its_hull() {
        let mut d = det("layout", "figure", [0.0; 4], Value::Null);
        d.coords = CoordSpace::Fractional;
        d.bbox = Some(RawBBox::Polygon(vec![[0.2, 0.3], [0.6, 0.25], [0.55, 0.7]]));
        let regions = normalize(&[d], &PageImage::blank(0, None), &ConfidenceScales::default()).unwrap();
        assert_eq!(regions[0].kind, RegionKind::Image);
        assert_eq!(regions[0].bbox, BBox::new(0.2, 0.25, 0.6, 0.7).unwrap());
    }

    #[test]
    fn confidence_is_rescaled_per_detector() {
        let mut scales = ConfidenceScales::default();
        scales.set(SourceDetector::Ocr, ConfidenceScale::Percent);
        let mut d = det("ocr", "text", [0.0, 0.0, 10.0, 10.0], json!("x"));
        d.confidence = Some(80.0);
        let mut missing = det("layout", "text", [0.0, 0.0, 10.0, 10.0], json!("y"));
        missing.confidence = None;
        let regions = normalize(&[d, missing], &page_1000x2000(), &scales).unwrap();
        assert!((regions[0].confidence - 0.8).abs() < 1e-12);
        assert_eq!(regions[1].confidence, 1.0);
    }

    #[test]
    fn missing_dimensions_fail_the_page() {
        let raw = vec![det("ocr", "text", [0.0, 0.0, 10.0, 10.0], json!("x"))];
        let err = normalize(&raw, &PageImage::blank(0, None), &ConfidenceScales::default()).unwrap_err();
        assert_eq!(err, NormalizationError::UnknownPageDimensions { page: 1 });
    }

    #[test]
    fn missing_bbox_and_unknown_detector_fail_the_page() {
        let mut d = det("ocr", "text", [0.0; 4], json!("x"));
        d.bbox = None;
        let err = normalize(&[d], &page_1000x2000(), &ConfidenceScales::default()).unwrap_err();
        assert!(matches!(err, NormalizationError::MissingBBox { page: 4, index: 0, .. }));

        let d = det("tesseract", "text", [0.0, 0.0, 1.0, 1.0], json!("x"));
        let err = normalize(&[d], &page_1000x2000(), &ConfidenceScales::default()).unwrap_err();
        assert!(matches!(err, NormalizationError::UnknownDetector { .. }));
    }

    #[test]
    fn degenerate_box_is_dropped_not_fatal() {
        let raw = vec![
            det("ocr", "text", [1200.0, 10.0, 1500.0, 50.0], json!("off page")),
            det("ocr", "text", [10.0, 10.0, 50.0, 50.0], json!("kept")),
        ];
        let regions = normalize(&raw, &page_1000x2000(), &ConfidenceScales::default()).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].content.text(), Some("kept"));
    }

    #[test]
    fn labels_map_to_kinds_and_payloads() {
        let raw = vec![
            det("formula", "inline_formula", [0.0, 0.0, 10.0, 10.0], json!("$x_1$")),
            det("layout", "display_formula", [0.0, 0.0, 10.0, 10.0], json!({"latex": "\\[a\\]"})),
            det("layout", "table", [0.0, 0.0, 10.0, 10.0], json!([["a", 1], ["b", null]])),
            det("layout", "table_cell", [0.0, 0.0, 10.0, 10.0], json!({"row": 1, "col": 0, "text": "c"})),
            det("layout", "doc_title", [0.0, 0.0, 10.0, 10.0], json!("T")),
            det("layout", "figure_caption", [0.0, 0.0, 10.0, 10.0], json!("Fig. 1")),
            det("layout", "page_number", [0.0, 0.0, 10.0, 10.0], json!("7")),
        ];
        let r = normalize(&raw, &page_1000x2000(), &ConfidenceScales::default()).unwrap();
        assert_eq!(r.len(), 6);
        assert_eq!(
            r[0].content,
            RegionContent::Formula { latex: "x_1".into(), display: FormulaDisplay::Inline }
        );
        assert_eq!(
            r[1].content,
            RegionContent::Formula { latex: "a".into(), display: FormulaDisplay::Block }
        );
        assert_eq!(
            r[2].content,
            RegionContent::Table(TableGrid::new(vec![
                vec!["a".into(), "1".into()],
                vec!["b".into(), String::new()]
            ]))
        );
        assert!(r[3].is_cell());
        assert_eq!(r[3].kind, RegionKind::Table);
        assert_eq!(r[4].content, RegionContent::Text { text: "T".into(), role: TextRole::Title });
        assert_eq!(r[5].kind, RegionKind::Caption);
    }

    #[test]
    fn oversized_cell_index_is_invalid_content() {
        let huge = det("layout", "cell", [0.0, 0.0, 10.0, 10.0], json!({"row": u64::MAX, "col": 0}));
        let err = normalize(&[huge], &page_1000x2000(), &ConfidenceScales::default()).unwrap_err();
        assert!(
            matches!(err, NormalizationError::InvalidContent { ref detail, .. } if detail.contains("row")),
            "{err}"
        );

        let wide = det("layout", "cell", [0.0, 0.0, 10.0, 10.0], json!({"row": 0, "col": 5000}));
        assert!(normalize(&[wide], &page_1000x2000(), &ConfidenceScales::default()).is_err());
    }

    #[test]
    fn malformed_cell_is_invalid_content() {
        let raw = vec![det("layout", "cell", [0.0, 0.0, 10.0, 10.0], json!("no coordinates"))];
        let err = normalize(&raw, &page_1000x2000(), &ConfidenceScales::default()).unwrap_err();
        assert!(matches!(err, NormalizationError::InvalidContent { .. }));
    }

    #[test]
    fn image_without_uri_is_cropped_from_raster() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(128, 256, Rgba([0, 0, 0, 255])));
        let page = PageImage::from_image(0, img);
        let raw = vec![det("layout", "image", [16.0, 32.0, 80.0, 160.0], Value::Null)];
        let r = normalize(&raw, &page, &ConfidenceScales::default()).unwrap();
        match &r[0].content {
            RegionContent::Image(img) => {
                let png = img.png.as_ref().expect("crop");
                assert_eq!(encode::image_size(png), Some((64, 128)));
            }
            other => panic!("unexpected content {other:?}"),
        }
    }
}
