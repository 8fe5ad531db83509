//! DOCX renderer: an OOXML package written event by event with
//! `quick_xml::Writer`.
//!
//! ```text
//! [Content_Types].xml
//! _rels/.rels
//! docProps/core.xml
//! word/document.xml              body: paragraphs, m:oMath, w:tbl, drawings
//! word/styles.xml
//! word/_rels/document.xml.rels   styles + one relationship per image
//! word/media/imageN.png
//! ```
//!
//! Formulas become native Word equations through [`super::omml`]. When a
//! formula cannot be converted it is written as a red, highlighted
//! `[LaTeX] ...` run so the loss is visible in the document, and the
//! renderer reports a degradation.

use super::omml::Equation;
use super::xml::{empty, end, part, props, start, text_element, Attrs, Props, XmlResult, XmlWriter};
use super::{has_cyrillic, layout_document, Block, ExportOptions, OutputFormat, Rendered, Serializer, Span};
use crate::error::SerializationError;
use crate::model::{Document, ImageRef, TableGrid};
use crate::pipeline::encode::image_size;
use std::io::{Cursor, Write};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const EMU_PER_PX: u64 = 9525;
/// Text width of an A4 page with 1" margins, in EMU.
const MAX_WIDTH_EMU: u64 = 5_486_400;

const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const NS_PIC: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

const DOCUMENT_NS: Attrs<'static> = &[
    ("xmlns:w", NS_W),
    ("xmlns:r", REL_BASE),
    ("xmlns:m", "http://schemas.openxmlformats.org/officeDocument/2006/math"),
    ("xmlns:wp", "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing"),
    ("xmlns:a", "http://schemas.openxmlformats.org/drawingml/2006/main"),
    ("xmlns:pic", NS_PIC),
];

const DEFAULT_TYPES: &[(&str, &str)] = &[
    ("rels", "application/vnd.openxmlformats-package.relationships+xml"),
    ("xml", "application/xml"),
    ("png", "image/png"),
];

const OVERRIDE_TYPES: &[(&str, &str)] = &[
    (
        "/word/document.xml",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml",
    ),
    (
        "/word/styles.xml",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml",
    ),
    (
        "/docProps/core.xml",
        "application/vnd.openxmlformats-package.core-properties+xml",
    ),
];

const BOLD: Props<'static> = &[("w:b", &[])];
const ITALIC: Props<'static> = &[("w:i", &[])];
const FALLBACK: Props<'static> = &[
    ("w:rFonts", &[("w:ascii", "Courier New"), ("w:hAnsi", "Courier New")]),
    ("w:color", &[("w:val", "FF0000")]),
    ("w:highlight", &[("w:val", "yellow")]),
];

/// Paragraph styles derived from `Normal`: id, name, `w:pPr`, `w:rPr`.
const PARAGRAPH_STYLES: &[(&str, &str, Props<'static>, Props<'static>)] = &[
    (
        "Title",
        "Title",
        &[("w:jc", &[("w:val", "center")]), ("w:spacing", &[("w:after", "240")])],
        &[("w:b", &[]), ("w:sz", &[("w:val", "40")])],
    ),
    (
        "Heading1",
        "heading 1",
        &[
            ("w:keepNext", &[]),
            ("w:spacing", &[("w:before", "240"), ("w:after", "120")]),
            ("w:outlineLvl", &[("w:val", "0")]),
        ],
        &[("w:b", &[]), ("w:sz", &[("w:val", "32")])],
    ),
    (
        "Caption",
        "caption",
        &[("w:jc", &[("w:val", "center")])],
        &[("w:i", &[]), ("w:sz", &[("w:val", "18")])],
    ),
];

const BORDER: Attrs<'static> = &[
    ("w:val", "single"),
    ("w:sz", "4"),
    ("w:space", "0"),
    ("w:color", "auto"),
];

fn xml_err(e: quick_xml::Error) -> SerializationError {
    SerializationError::Package {
        format: OutputFormat::Docx,
        detail: e.to_string(),
    }
}

pub struct DocxSerializer {
    options: ExportOptions,
}

impl DocxSerializer {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }
}

/// Mutable state while writing `word/document.xml`.
struct Body {
    w: XmlWriter,
    media: Vec<Vec<u8>>,
    degradations: Vec<String>,
}

impl Body {
    fn new() -> quick_xml::Result<Self> {
        Ok(Self {
            w: part()?,
            media: Vec::new(),
            degradations: Vec::new(),
        })
    }

    fn document(&mut self, document: &Document) -> XmlResult {
        start(&mut self.w, "w:document", DOCUMENT_NS)?;
        start(&mut self.w, "w:body", &[])?;
        for (i, page) in layout_document(document).iter().enumerate() {
            if i > 0 {
                self.page_break()?;
            }
            if let Some(reason) = &page.omitted {
                let note = format!("[page {} omitted: {}]", page.number, reason);
                self.text_paragraph(None, &note, ITALIC)?;
                continue;
            }
            self.degradations.extend(page.placeholder_notes());
            for block in &page.blocks {
                self.block(page.number, block)?;
            }
        }
        section(&mut self.w)?;
        end(&mut self.w, "w:body")?;
        end(&mut self.w, "w:document")
    }

    fn paragraph_start(&mut self, style: Option<&str>) -> XmlResult {
        start(&mut self.w, "w:p", &[])?;
        match style {
            Some(s) => props(&mut self.w, "w:pPr", &[("w:pStyle", &[("w:val", s)])]),
            None => Ok(()),
        }
    }

    fn text_paragraph(&mut self, style: Option<&str>, text: &str, rpr: Props<'_>) -> XmlResult {
        self.paragraph_start(style)?;
        text_runs(&mut self.w, text, rpr)?;
        end(&mut self.w, "w:p")
    }

    fn page_break(&mut self) -> XmlResult {
        start(&mut self.w, "w:p", &[])?;
        start(&mut self.w, "w:r", &[])?;
        empty(&mut self.w, "w:br", &[("w:type", "page")])?;
        end(&mut self.w, "w:r")?;
        end(&mut self.w, "w:p")
    }

    fn math(&mut self, page: usize, latex: &str, display: bool) -> XmlResult {
        match Equation::parse(latex) {
            Ok(eq) => eq.write(&mut self.w, display),
            Err(e) => {
                debug!("OMML conversion failed for '{}': {}", latex, e);
                self.degradations
                    .push(format!("page {page}: formula kept as LaTeX text ({e})"));
                text_runs(&mut self.w, &format!("[LaTeX] {latex}"), FALLBACK)
            }
        }
    }

    fn block(&mut self, page: usize, block: &Block) -> XmlResult {
        match block {
            Block::Heading { level, text } => {
                let style = if *level <= 1 { "Title" } else { "Heading1" };
                self.text_paragraph(Some(style), text, &[])
            }
            Block::Paragraph(spans) => {
                self.paragraph_start(None)?;
                for (i, span) in spans.iter().enumerate() {
                    let sep = if i > 0 { " " } else { "" };
                    match span {
                        Span::Text(t) => text_runs(&mut self.w, &format!("{sep}{t}"), &[])?,
                        Span::Math(m) => {
                            if !sep.is_empty() {
                                text_runs(&mut self.w, sep, &[])?;
                            }
                            self.math(page, m, false)?;
                        }
                    }
                }
                end(&mut self.w, "w:p")
            }
            Block::Math(latex) => {
                self.paragraph_start(None)?;
                self.math(page, latex, true)?;
                end(&mut self.w, "w:p")
            }
            Block::Table(grid) => self.table(grid),
            Block::Figure { id, image } => self.figure(page, id, image),
            Block::Caption(text) => self.text_paragraph(Some("Caption"), text, &[]),
            Block::Placeholder(what) => {
                self.text_paragraph(None, &format!("[omitted: {what}]"), ITALIC)
            }
        }
    }

    fn table(&mut self, grid: &TableGrid) -> XmlResult {
        let w = &mut self.w;
        start(w, "w:tbl", &[])?;
        props(
            w,
            "w:tblPr",
            &[
                ("w:tblStyle", &[("w:val", "TableGrid")]),
                ("w:tblW", &[("w:w", "0"), ("w:type", "auto")]),
            ],
        )?;
        start(w, "w:tblGrid", &[])?;
        for _ in 0..grid.column_count() {
            empty(w, "w:gridCol", &[])?;
        }
        end(w, "w:tblGrid")?;
        for (i, row) in grid.padded_rows().iter().enumerate() {
            start(w, "w:tr", &[])?;
            for cell in row {
                start(w, "w:tc", &[])?;
                props(w, "w:tcPr", &[("w:tcW", &[("w:w", "0"), ("w:type", "auto")])])?;
                start(w, "w:p", &[])?;
                text_runs(w, cell, if i == 0 { BOLD } else { &[] })?;
                end(w, "w:p")?;
                end(w, "w:tc")?;
            }
            end(w, "w:tr")?;
        }
        end(w, "w:tbl")?;
        // Word merges a table with an immediately following one.
        self.paragraph_start(None)?;
        end(&mut self.w, "w:p")
    }

    fn figure(&mut self, page: usize, id: &str, image: &ImageRef) -> XmlResult {
        let Some(png) = &image.png else {
            let uri = image.uri.as_deref().unwrap_or("");
            self.degradations
                .push(format!("page {page}: figure '{id}' references a remote image"));
            return self.text_paragraph(None, &format!("[image: {uri}]"), ITALIC);
        };
        self.media.push(png.clone());
        let n = self.media.len().to_string();
        let (w_px, h_px) = image_size(png).unwrap_or((400, 300));
        let (cx, cy) = fit_emu(w_px, h_px);
        let (cx, cy) = (cx.to_string(), cy.to_string());
        let extent: Attrs<'_> = &[("cx", cx.as_str()), ("cy", cy.as_str())];
        let name = format!("Picture {n}");
        let file = format!("image{n}.png");
        let rid = format!("rIdImg{n}");
        let alt = image.alt.as_deref().unwrap_or("");

        let w = &mut self.w;
        start(w, "w:p", &[])?;
        props(w, "w:pPr", &[("w:jc", &[("w:val", "center")])])?;
        start(w, "w:r", &[])?;
        start(w, "w:drawing", &[])?;
        start(
            w,
            "wp:inline",
            &[("distT", "0"), ("distB", "0"), ("distL", "0"), ("distR", "0")],
        )?;
        empty(w, "wp:extent", extent)?;
        empty(w, "wp:docPr", &[("id", n.as_str()), ("name", name.as_str()), ("descr", alt)])?;
        start(w, "a:graphic", &[])?;
        start(w, "a:graphicData", &[("uri", NS_PIC)])?;
        start(w, "pic:pic", &[])?;

        start(w, "pic:nvPicPr", &[])?;
        empty(w, "pic:cNvPr", &[("id", n.as_str()), ("name", file.as_str())])?;
        empty(w, "pic:cNvPicPr", &[])?;
        end(w, "pic:nvPicPr")?;

        start(w, "pic:blipFill", &[])?;
        empty(w, "a:blip", &[("r:embed", rid.as_str())])?;
        start(w, "a:stretch", &[])?;
        empty(w, "a:fillRect", &[])?;
        end(w, "a:stretch")?;
        end(w, "pic:blipFill")?;

        start(w, "pic:spPr", &[])?;
        start(w, "a:xfrm", &[])?;
        empty(w, "a:off", &[("x", "0"), ("y", "0")])?;
        empty(w, "a:ext", extent)?;
        end(w, "a:xfrm")?;
        start(w, "a:prstGeom", &[("prst", "rect")])?;
        empty(w, "a:avLst", &[])?;
        end(w, "a:prstGeom")?;
        end(w, "pic:spPr")?;

        for tag in ["pic:pic", "a:graphicData", "a:graphic", "wp:inline", "w:drawing", "w:r", "w:p"] {
            end(w, tag)?;
        }
        Ok(())
    }
}

impl Serializer for DocxSerializer {
    fn format(&self) -> OutputFormat {
        OutputFormat::Docx
    }

    fn render(&self, document: &Document) -> Result<Rendered, SerializationError> {
        let mut body = Body::new().map_err(xml_err)?;
        body.document(document).map_err(xml_err)?;
        let Body {
            w,
            media,
            degradations,
        } = body;
        let bytes = self.package(document, w.into_inner(), &media)?;
        Ok(Rendered {
            bytes,
            attachments: Vec::new(),
            degradations,
        })
    }
}

impl DocxSerializer {
    fn package(
        &self,
        document: &Document,
        document_xml: Vec<u8>,
        media: &[Vec<u8>],
    ) -> Result<Vec<u8>, SerializationError> {
        let package_err = |e: zip::result::ZipError| SerializationError::Package {
            format: OutputFormat::Docx,
            detail: e.to_string(),
        };
        let io_err = |e: std::io::Error| SerializationError::Io {
            format: OutputFormat::Docx,
            source: e,
        };

        let images: Vec<(String, String)> = (1..=media.len())
            .map(|n| (format!("rIdImg{n}"), format!("media/image{n}.png")))
            .collect();
        let styles_rel = format!("{REL_BASE}/styles");
        let image_rel = format!("{REL_BASE}/image");
        let mut doc_rels = vec![("rId1", styles_rel.as_str(), "styles.xml")];
        doc_rels.extend(
            images
                .iter()
                .map(|(id, target)| (id.as_str(), image_rel.as_str(), target.as_str())),
        );
        let office_rel = format!("{REL_BASE}/officeDocument");
        let root_rels = [
            ("rId1", office_rel.as_str(), "word/document.xml"),
            (
                "rId2",
                "http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties",
                "docProps/core.xml",
            ),
        ];

        let mut parts: Vec<(String, Vec<u8>)> = vec![
            ("[Content_Types].xml".into(), content_types().map_err(xml_err)?),
            ("_rels/.rels".into(), relationships(&root_rels).map_err(xml_err)?),
            ("docProps/core.xml".into(), self.core_properties(document).map_err(xml_err)?),
            ("word/document.xml".into(), document_xml),
            ("word/styles.xml".into(), styles().map_err(xml_err)?),
            (
                "word/_rels/document.xml.rels".into(),
                relationships(&doc_rels).map_err(xml_err)?,
            ),
        ];
        for (i, png) in media.iter().enumerate() {
            parts.push((format!("word/media/image{}.png", i + 1), png.clone()));
        }

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in parts {
            // PNG is already compressed.
            let method = if name.ends_with(".png") {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            };
            let options = FileOptions::default().compression_method(method);
            writer.start_file(name, options).map_err(package_err)?;
            writer.write_all(&data).map_err(io_err)?;
        }
        let cursor = writer.finish().map_err(package_err)?;
        Ok(cursor.into_inner())
    }

    fn core_properties(&self, document: &Document) -> quick_xml::Result<Vec<u8>> {
        let meta = &document.metadata;
        let mut w = part()?;
        start(
            &mut w,
            "cp:coreProperties",
            &[
                (
                    "xmlns:cp",
                    "http://schemas.openxmlformats.org/package/2006/metadata/core-properties",
                ),
                ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
                ("xmlns:dcterms", "http://purl.org/dc/terms/"),
                ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            ],
        )?;
        if self.options.include_metadata {
            if let Some(t) = &meta.title {
                text_element(&mut w, "dc:title", &[], t)?;
            }
            if let Some(a) = &meta.author {
                text_element(&mut w, "dc:creator", &[], a)?;
            }
        }
        let lang = if has_cyrillic(document) { "ru-RU" } else { "en-US" };
        text_element(&mut w, "dc:language", &[], lang)?;
        end(&mut w, "cp:coreProperties")?;
        Ok(w.into_inner())
    }
}

fn content_types() -> quick_xml::Result<Vec<u8>> {
    let mut w = part()?;
    start(
        &mut w,
        "Types",
        &[("xmlns", "http://schemas.openxmlformats.org/package/2006/content-types")],
    )?;
    for &(ext, content_type) in DEFAULT_TYPES {
        empty(&mut w, "Default", &[("Extension", ext), ("ContentType", content_type)])?;
    }
    for &(name, content_type) in OVERRIDE_TYPES {
        empty(&mut w, "Override", &[("PartName", name), ("ContentType", content_type)])?;
    }
    end(&mut w, "Types")?;
    Ok(w.into_inner())
}

/// A `.rels` part from `(id, type, target)` triples.
fn relationships(rels: &[(&str, &str, &str)]) -> quick_xml::Result<Vec<u8>> {
    let mut w = part()?;
    start(&mut w, "Relationships", &[("xmlns", NS_REL)])?;
    for &(id, kind, target) in rels {
        empty(&mut w, "Relationship", &[("Id", id), ("Type", kind), ("Target", target)])?;
    }
    end(&mut w, "Relationships")?;
    Ok(w.into_inner())
}

fn styles() -> quick_xml::Result<Vec<u8>> {
    let mut doc = part()?;
    let w = &mut doc;
    start(w, "w:styles", &[("xmlns:w", NS_W)])?;

    start(w, "w:docDefaults", &[])?;
    start(w, "w:rPrDefault", &[])?;
    props(
        w,
        "w:rPr",
        &[
            (
                "w:rFonts",
                &[
                    ("w:ascii", "Cambria"),
                    ("w:hAnsi", "Cambria"),
                    ("w:cs", "Cambria"),
                    ("w:eastAsia", "Cambria"),
                ],
            ),
            ("w:sz", &[("w:val", "22")]),
        ],
    )?;
    end(w, "w:rPrDefault")?;
    start(w, "w:pPrDefault", &[])?;
    props(
        w,
        "w:pPr",
        &[(
            "w:spacing",
            &[("w:after", "120"), ("w:line", "276"), ("w:lineRule", "auto")],
        )],
    )?;
    end(w, "w:pPrDefault")?;
    end(w, "w:docDefaults")?;

    start(
        w,
        "w:style",
        &[("w:type", "paragraph"), ("w:default", "1"), ("w:styleId", "Normal")],
    )?;
    empty(w, "w:name", &[("w:val", "Normal")])?;
    empty(w, "w:qFormat", &[])?;
    end(w, "w:style")?;

    for &(id, name, ppr, rpr) in PARAGRAPH_STYLES {
        start(w, "w:style", &[("w:type", "paragraph"), ("w:styleId", id)])?;
        empty(w, "w:name", &[("w:val", name)])?;
        empty(w, "w:basedOn", &[("w:val", "Normal")])?;
        empty(w, "w:next", &[("w:val", "Normal")])?;
        empty(w, "w:qFormat", &[])?;
        props(w, "w:pPr", ppr)?;
        props(w, "w:rPr", rpr)?;
        end(w, "w:style")?;
    }

    start(w, "w:style", &[("w:type", "table"), ("w:styleId", "TableGrid")])?;
    empty(w, "w:name", &[("w:val", "Table Grid")])?;
    start(w, "w:tblPr", &[])?;
    props(
        w,
        "w:tblBorders",
        &[
            ("w:top", BORDER),
            ("w:left", BORDER),
            ("w:bottom", BORDER),
            ("w:right", BORDER),
            ("w:insideH", BORDER),
            ("w:insideV", BORDER),
        ],
    )?;
    end(w, "w:tblPr")?;
    end(w, "w:style")?;

    end(w, "w:styles")?;
    Ok(doc.into_inner())
}

/// A4 portrait with 1" margins.
fn section(w: &mut XmlWriter) -> XmlResult {
    start(w, "w:sectPr", &[])?;
    empty(w, "w:pgSz", &[("w:w", "11906"), ("w:h", "16838")])?;
    empty(
        w,
        "w:pgMar",
        &[
            ("w:top", "1440"),
            ("w:right", "1440"),
            ("w:bottom", "1440"),
            ("w:left", "1440"),
            ("w:header", "708"),
            ("w:footer", "708"),
            ("w:gutter", "0"),
        ],
    )?;
    end(w, "w:sectPr")
}

/// Runs for plain text; newlines become `w:br`.
fn text_runs(w: &mut XmlWriter, text: &str, rpr: Props<'_>) -> XmlResult {
    start(w, "w:r", &[])?;
    props(w, "w:rPr", rpr)?;
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            empty(w, "w:br", &[])?;
        }
        text_element(
            w,
            "w:t",
            &[("xml:space", "preserve")],
            line.trim_end_matches('\r'),
        )?;
    }
    end(w, "w:r")
}

/// Pixel size → EMU extent, shrunk to the text width.
fn fit_emu(w: u32, h: u32) -> (u64, u64) {
    let (cx, cy) = (w.max(1) as u64 * EMU_PER_PX, h.max(1) as u64 * EMU_PER_PX);
    if cx <= MAX_WIDTH_EMU {
        (cx, cy)
    } else {
        (MAX_WIDTH_EMU, cy * MAX_WIDTH_EMU / cx)
    }
}
