//! Standalone HTML renderer.
//!
//! Math is left to MathJax 2, which picks up `<script type="math/tex">`
//! elements as-is, so formula source needs no HTML escaping beyond breaking
//! up a literal `</`. Images are inlined as `data:` URIs so the page is a
//! single self-contained file.

use super::{comment_safe, has_cyrillic, layout_document, Block, ExportOptions, OutputFormat, Rendered, Serializer, Span};
use crate::error::SerializationError;
use crate::model::{Document, TableGrid};
use crate::pipeline::encode::png_data_uri;

const MATHJAX_URL: &str =
    "https://cdnjs.cloudflare.com/ajax/libs/mathjax/2.7.9/MathJax.js?config=TeX-AMS_CHTML";

const STYLE: &str = "body{max-width:52rem;margin:2rem auto;padding:0 1rem;font-family:serif;line-height:1.5}\
table{border-collapse:collapse;margin:1rem 0}th,td{border:1px solid #999;padding:.25rem .5rem}\
figure{text-align:center}img{max-width:100%}.caption{font-style:italic;text-align:center}\
.placeholder{color:#a00}";

pub struct HtmlSerializer {
    options: ExportOptions,
}

impl HtmlSerializer {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }
}

impl Serializer for HtmlSerializer {
    fn format(&self) -> OutputFormat {
        OutputFormat::Html
    }

    fn render(&self, document: &Document) -> Result<Rendered, SerializationError> {
        let mut out = Rendered::default();
        let lang = if has_cyrillic(document) { "ru" } else { "en" };
        let title = document
            .metadata
            .title
            .as_deref()
            .filter(|_| self.options.include_metadata)
            .unwrap_or("Document");

        let mut html = String::from("<!DOCTYPE html>\n");
        html.push_str(&format!("<html lang=\"{lang}\">\n<head>\n<meta charset=\"utf-8\">\n"));
        html.push_str(&format!("<title>{}</title>\n", escape(title)));
        if self.options.include_metadata {
            if let Some(a) = &document.metadata.author {
                html.push_str(&format!("<meta name=\"author\" content=\"{}\">\n", escape(a)));
            }
        }
        html.push_str(&format!("<style>{STYLE}</style>\n"));
        html.push_str(&format!("<script src=\"{MATHJAX_URL}\"></script>\n"));
        html.push_str("</head>\n<body>\n");

        for page in layout_document(document) {
            if let Some(reason) = &page.omitted {
                html.push_str(&format!(
                    "<section class=\"page omitted\" data-page=\"{n}\"><!-- page {n} omitted: {} --></section>\n",
                    comment_safe(reason),
                    n = page.number
                ));
                continue;
            }
            out.degradations.extend(page.placeholder_notes());
            html.push_str(&format!("<section class=\"page\" data-page=\"{}\">\n", page.number));
            for block in &page.blocks {
                html.push_str(&render_block(block));
                html.push('\n');
            }
            html.push_str("</section>\n");
        }

        html.push_str("</body>\n</html>\n");
        out.bytes = html.into_bytes();
        Ok(out)
    }
}

fn render_block(block: &Block) -> String {
    match block {
        Block::Heading { level, text } => format!("<h{level}>{}</h{level}>", escape(text)),
        Block::Paragraph(spans) => {
            let inner: Vec<String> = spans
                .iter()
                .map(|s| match s {
                    Span::Text(t) => escape(t),
                    Span::Math(m) => format!("<script type=\"math/tex\">{}</script>", math(m)),
                })
                .collect();
            format!("<p>{}</p>", inner.join(" "))
        }
        Block::Math(latex) => format!(
            "<script type=\"math/tex; mode=display\">{}</script>",
            math(latex)
        ),
        Block::Table(grid) => table(grid),
        Block::Figure { id, image } => {
            let src = match (&image.png, &image.uri) {
                (Some(png), _) => png_data_uri(png),
                (None, Some(uri)) => uri.clone(),
                (None, None) => String::new(),
            };
            let alt = image.alt.as_deref().unwrap_or("");
            format!(
                "<figure id=\"{}\"><img src=\"{}\" alt=\"{}\"></figure>",
                escape(id),
                escape(&src),
                escape(alt)
            )
        }
        Block::Caption(text) => format!("<p class=\"caption\">{}</p>", escape(text)),
        Block::Placeholder(what) => {
            format!("<p class=\"placeholder\">[omitted: {}]</p>", escape(what))
        }
    }
}

fn table(grid: &TableGrid) -> String {
    let rows = grid.padded_rows();
    let mut t = String::from("<table>\n");
    if let Some((head, body)) = rows.split_first() {
        t.push_str("<thead><tr>");
        for c in head {
            t.push_str(&format!("<th>{}</th>", escape(c)));
        }
        t.push_str("</tr></thead>\n<tbody>\n");
        for row in body {
            t.push_str("<tr>");
            for c in row {
                t.push_str(&format!("<td>{}</td>", escape(c)));
            }
            t.push_str("</tr>\n");
        }
        t.push_str("</tbody>\n");
    }
    t.push_str("</table>");
    t
}

/// LaTeX inside a `<script>` element: verbatim except for `</`.
fn math(latex: &str) -> String {
    latex.replace("</", "<\\/")
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
