//! Markdown renderer.
//!
//! Math uses the `$...$` / `$$...$$` convention understood by Pandoc,
//! GitHub and most static-site generators; LaTeX is copied verbatim.
//! Figures with pixel data are shipped as `images/p<page>-<id>.png` attachments.

use super::{comment_safe, layout_document, Attachment, Block, ExportOptions, OutputFormat, Rendered, Serializer, Span};
use crate::error::SerializationError;
use crate::model::{Document, TableGrid};

pub struct MarkdownSerializer {
    options: ExportOptions,
}

impl MarkdownSerializer {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }
}

impl Serializer for MarkdownSerializer {
    fn format(&self) -> OutputFormat {
        OutputFormat::Markdown
    }

    fn render(&self, document: &Document) -> Result<Rendered, SerializationError> {
        let mut out = Rendered::default();
        let mut text = String::new();

        if self.options.include_metadata {
            text.push_str(&front_matter(document));
        }

        for (i, page) in layout_document(document).iter().enumerate() {
            if i > 0 {
                text.push_str(&self.options.page_separator.render(page.number));
            }
            if let Some(reason) = &page.omitted {
                text.push_str(&format!(
                    "<!-- page {} omitted: {} -->",
                    page.number,
                    comment_safe(reason)
                ));
                continue;
            }
            out.degradations.extend(page.placeholder_notes());

            let parts: Vec<String> = page
                .blocks
                .iter()
                .map(|b| render_block(b, &mut out.attachments))
                .collect();
            text.push_str(&parts.join("\n\n"));
        }

        let mut text = text.trim_end().to_string();
        text.push('\n');
        out.bytes = text.into_bytes();
        Ok(out)
    }
}

fn render_block(block: &Block, attachments: &mut Vec<Attachment>) -> String {
    match block {
        Block::Heading { level, text } => {
            format!("{} {}", "#".repeat(*level as usize), one_line(text))
        }
        Block::Paragraph(spans) => render_spans(spans),
        Block::Math(latex) => format!("$${}$$", latex),
        Block::Table(grid) => render_table(grid),
        Block::Figure { id, image } => {
            let alt = image.alt.as_deref().unwrap_or("").replace(['[', ']'], "");
            if let Some(png) = &image.png {
                let path = format!("images/{id}.png");
                attachments.push(Attachment {
                    path: path.clone(),
                    bytes: png.clone(),
                });
                format!("![{alt}]({path})")
            } else {
                let uri = image.uri.as_deref().unwrap_or("");
                format!("![{alt}](<{uri}>)")
            }
        }
        Block::Caption(text) => format!("*{}*", one_line(text)),
        Block::Placeholder(what) => format!("*[omitted: {what}]*"),
    }
}

fn render_spans(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|s| match s {
            Span::Text(t) => t.clone(),
            Span::Math(m) => format!("${}$", m),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_table(grid: &TableGrid) -> String {
    let rows = grid.padded_rows();
    let mut lines = Vec::with_capacity(rows.len() + 1);
    for (i, row) in rows.iter().enumerate() {
        let cells: Vec<String> = row.iter().map(|c| escape_cell(c)).collect();
        lines.push(format!("| {} |", cells.join(" | ")));
        if i == 0 {
            lines.push(format!("|{}", " --- |".repeat(row.len())));
        }
    }
    lines.join("\n")
}

fn escape_cell(cell: &str) -> String {
    one_line(cell).replace('|', "\\|")
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// YAML front matter. Strings are JSON-quoted, which YAML accepts verbatim.
fn front_matter(document: &Document) -> String {
    let meta = &document.metadata;
    let mut yaml = String::from("---\n");
    let quote = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());
    if let Some(t) = &meta.title {
        yaml.push_str(&format!("title: {}\n", quote(t)));
    }
    if let Some(a) = &meta.author {
        yaml.push_str(&format!("author: {}\n", quote(a)));
    }
    if let Some(src) = &meta.source {
        yaml.push_str(&format!("source: {}\n", quote(&src.to_string_lossy())));
    }
    if !meta.scripts.is_empty() {
        let scripts: Vec<String> = meta
            .scripts
            .iter()
            .filter_map(|s| serde_json::to_string(s).ok())
            .collect();
        yaml.push_str(&format!("scripts: [{}]\n", scripts.join(", ")));
    }
    yaml.push_str(&format!("pages: {}\n", document.pages.len()));
    yaml.push_str("---\n\n");
    yaml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSeparator;
    use crate::export::fixtures::sample_document;
    use crate::model::{Page, RegionContent};

    fn md(doc: &Document, options: ExportOptions) -> (String, Rendered) {
        let out = MarkdownSerializer::new(options).render(doc).unwrap();
        (String::from_utf8(out.bytes.clone()).unwrap(), out)
    }

    #[test]
    fn block_formula_sits_on_its_own_line() {
        let (text, _) = md(&sample_document(), ExportOptions::default());
        assert!(text.lines().any(|l| l == "$$x^2+y^2=r^2$$"), "{text}");
    }

    #[test]
    fn inline_math_and_text_share_a_paragraph() {
        let (text, _) = md(&sample_document(), ExportOptions::default());
        assert!(text.contains("Let $a_1 < b$ hold & stay."), "{text}");
        assert!(text.contains("## Введение"));
    }

    #[test]
    fn tables_escape_pipes() {
        let (text, _) = md(&sample_document(), ExportOptions::default());
        assert!(text.contains("| n | a\\|b |\n| --- | --- |\n| 1 | 2 |"), "{text}");
    }

    #[test]
    fn figures_become_attachments() {
        let (text, out) = md(&sample_document(), ExportOptions::default());
        assert!(text.contains("![plot](images/p1-fig.png)"));
        assert_eq!(out.attachments.len(), 1);
        assert_eq!(out.attachments[0].path, "images/p1-fig.png");
        assert!(text.contains("*Figure 1: growth*"));
    }

    #[test]
    fn figures_on_different_pages_get_distinct_paths() {
        let mut doc = sample_document();
        let mut second = doc.pages[0].clone();
        second.index = 1;
        doc.pages.push(second);
        let (text, out) = md(&doc, ExportOptions::default());
        let paths: Vec<&str> = out.attachments.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["images/p1-fig.png", "images/p2-fig.png"]);
        assert!(text.contains("![plot](images/p2-fig.png)"), "{text}");
    }

    #[test]
    fn front_matter_is_optional() {
        let (with, _) = md(&sample_document(), ExportOptions::default());
        assert!(with.starts_with("---\ntitle: \"Circle\"\n"), "{with}");
        assert!(with.contains("scripts: [\"latin\", \"cyrillic\"]"));

        let options = ExportOptions {
            include_metadata: false,
            ..Default::default()
        };
        let (without, _) = md(&sample_document(), options);
        assert!(without.starts_with("## Введение"));
    }

    #[test]
    fn pages_are_separated_and_degraded_pages_noted() {
        let mut doc = sample_document();
        doc.pages.push(Page::degraded(1, "timeout -- retry"));
        let options = ExportOptions {
            include_metadata: false,
            page_separator: PageSeparator::Comment,
            ..Default::default()
        };
        let (text, _) = md(&doc, options);
        assert!(text.contains("<!-- page 2 -->"));
        assert!(text.contains("<!-- page 2 omitted: timeout - - retry -->"), "{text}");
    }

    #[test]
    fn uri_images_are_referenced_and_empty_images_degrade() {
        let mut doc = sample_document();
        if let RegionContent::Image(img) = &mut doc.pages[0].regions[6].content {
            img.png = None;
            img.uri = Some("https://example.org/f.png".into());
        }
        let (text, out) = md(&doc, ExportOptions::default());
        assert!(text.contains("![plot](<https://example.org/f.png>)"));
        assert!(out.attachments.is_empty());

        if let RegionContent::Image(img) = &mut doc.pages[0].regions[6].content {
            img.uri = None;
        }
        let (text, out) = md(&doc, ExportOptions::default());
        assert!(text.contains("*[omitted: image 'fig' has no data]*"), "{text}");
        assert_eq!(out.degradations.len(), 1);
    }
}
