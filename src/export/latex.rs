//! LaTeX renderer.
//!
//! Produces a standalone document with a minimal preamble. Formula source
//! is passed through untouched; everything else is escaped.

use super::{
    has_cyrillic, layout_document, Attachment, Block, ExportOptions, OutputFormat,
    Rendered, Serializer, Span,
};
use crate::error::SerializationError;
use crate::model::{Document, RegionContent, TableGrid, TextRole};

/// Display environments that must not be wrapped in `equation`.
const STANDALONE_ENVS: [&str; 5] = [
    "\\begin{align",
    "\\begin{gather",
    "\\begin{multline",
    "\\begin{eqnarray",
    "\\begin{equation",
];

pub struct LatexSerializer {
    options: ExportOptions,
}

impl LatexSerializer {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    fn preamble(&self, document: &Document) -> String {
        let mut p = format!("\\documentclass{{{}}}\n", self.options.latex_document_class);
        p.push_str("\\usepackage[utf8]{inputenc}\n");
        if has_cyrillic(document) {
            p.push_str("\\usepackage[T2A,T1]{fontenc}\n");
            p.push_str("\\usepackage[russian,english]{babel}\n");
        } else {
            p.push_str("\\usepackage[T1]{fontenc}\n");
            p.push_str("\\usepackage[english]{babel}\n");
        }
        for pkg in ["amsmath", "amssymb", "graphicx", "booktabs"] {
            p.push_str(&format!("\\usepackage{{{pkg}}}\n"));
        }
        p
    }

    fn block(&self, block: &Block, attachments: &mut Vec<Attachment>, notes: &mut Vec<String>) -> String {
        match block {
            Block::Heading { level, text } => {
                let cmd = if *level <= 1 { "section" } else { "subsection" };
                format!("\\{cmd}{{{}}}", escape(text))
            }
            Block::Paragraph(spans) => spans
                .iter()
                .map(|s| match s {
                    Span::Text(t) => escape(t),
                    Span::Math(m) => format!("\\({m}\\)"),
                })
                .collect::<Vec<_>>()
                .join(" "),
            Block::Math(latex) => self.display_math(latex),
            Block::Table(grid) => table(grid),
            Block::Figure { id, image } => {
                if let Some(png) = &image.png {
                    let path = format!("images/{id}.png");
                    attachments.push(Attachment {
                        path: path.clone(),
                        bytes: png.clone(),
                    });
                    format!(
                        "\\begin{{figure}}[htbp]\n\\centering\n\\includegraphics[width=0.8\\linewidth]{{{path}}}\n\\end{{figure}}"
                    )
                } else {
                    let uri = image.uri.as_deref().unwrap_or("");
                    notes.push(format!("figure '{id}' references a remote image"));
                    format!("% image: {}\n\\emph{{[image omitted: {}]}}", uri, escape(uri))
                }
            }
            Block::Caption(text) => format!("\\begin{{center}}\\small\\emph{{{}}}\\end{{center}}", escape(text)),
            Block::Placeholder(what) => format!("\\emph{{[omitted: {}]}}", escape(what)),
        }
    }

    fn display_math(&self, latex: &str) -> String {
        if STANDALONE_ENVS.iter().any(|env| latex.starts_with(env)) {
            latex.to_string()
        } else if self.options.numbered_equations {
            format!("\\begin{{equation}}\n{latex}\n\\end{{equation}}")
        } else {
            format!("\\[\n{latex}\n\\]")
        }
    }
}

impl Serializer for LatexSerializer {
    fn format(&self) -> OutputFormat {
        OutputFormat::Latex
    }

    fn render(&self, document: &Document) -> Result<Rendered, SerializationError> {
        let mut out = Rendered::default();
        let mut tex = self.preamble(document);

        let title = document.metadata.title.as_deref().filter(|_| self.options.include_metadata);
        // A Title region already prints the title in the body.
        let has_title_region = document.regions().any(|r| {
            matches!(&r.content, RegionContent::Text { role: TextRole::Title, .. })
        });
        if let Some(t) = title {
            tex.push_str(&format!("\\title{{{}}}\n", escape(t)));
            if let Some(a) = &document.metadata.author {
                tex.push_str(&format!("\\author{{{}}}\n", escape(a)));
            }
            tex.push_str("\\date{}\n");
        }
        tex.push_str("\n\\begin{document}\n");
        if title.is_some() && !has_title_region {
            tex.push_str("\\maketitle\n");
        }

        for page in layout_document(document) {
            tex.push_str(&format!("\n% page {}\n", page.number));
            if let Some(reason) = &page.omitted {
                tex.push_str(&format!("% omitted: {}\n", collapse(reason)));
                continue;
            }
            out.degradations.extend(page.placeholder_notes());
            for block in &page.blocks {
                let mut notes = Vec::new();
                tex.push_str(&self.block(block, &mut out.attachments, &mut notes));
                tex.push_str("\n\n");
                out.degradations
                    .extend(notes.into_iter().map(|n| format!("page {}: {}", page.number, n)));
            }
        }

        tex.push_str("\\end{document}\n");
        out.bytes = tex.into_bytes();
        Ok(out)
    }
}

fn table(grid: &TableGrid) -> String {
    let rows = grid.padded_rows();
    let cols = grid.column_count();
    let mut t = format!(
        "\\begin{{center}}\n\\begin{{tabular}}{{{}}}\n\\toprule\n",
        vec!["l"; cols].join(" ")
    );
    for (i, row) in rows.iter().enumerate() {
        let cells: Vec<String> = row.iter().map(|c| escape(&collapse(c))).collect();
        t.push_str(&cells.join(" & "));
        t.push_str(" \\\\\n");
        if i == 0 {
            t.push_str("\\midrule\n");
        }
    }
    t.push_str("\\bottomrule\n\\end{tabular}\n\\end{center}");
    t
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escape LaTeX special characters in running text.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '$' => out.push_str("\\$"),
            '&' => out.push_str("\\&"),
            '#' => out.push_str("\\#"),
            '^' => out.push_str("\\textasciicircum{}"),
            '_' => out.push_str("\\_"),
            '%' => out.push_str("\\%"),
            '~' => out.push_str("\\textasciitilde{}"),
            _ => out.push(c),
        }
    }
    out
}
