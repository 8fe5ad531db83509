//! LaTeX → Office Math Markup Language (OMML) for native Word equations.
//!
//! Covers the subset that dominates recognised formulas: scripts,
//! fractions, roots, `\left…\right` delimiters, Greek letters, common
//! operators and relations, function names and `\text`/`\mathrm` runs.
//! Anything else is an [`OmmlError`] from [`Equation::parse`], before any
//! XML is written; the DOCX writer then falls back to a flagged plain-text
//! run instead of emitting a broken equation.

use super::xml::{empty, end, props, start, text_element, XmlResult, XmlWriter};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OmmlError {
    #[error("unsupported LaTeX construct '{0}'")]
    Unsupported(String),

    #[error("unbalanced braces at offset {0}")]
    Unbalanced(usize),

    #[error("missing argument at offset {0}")]
    MissingArgument(usize),

    #[error("empty formula")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    /// Math-italic characters.
    Run(String),
    /// Upright text such as `\sin` or `\text{...}`.
    Upright(String),
    Group(Vec<Node>),
    Scripts {
        base: Box<Node>,
        sub: Option<Box<Node>>,
        sup: Option<Box<Node>>,
    },
    Frac(Box<Node>, Box<Node>),
    Sqrt {
        degree: Option<Box<Node>>,
        body: Box<Node>,
    },
    Delim {
        open: String,
        close: String,
        body: Vec<Node>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    End,
    Brace,
    Bracket,
    Right,
}

const FUNCTIONS: &[&str] = &[
    "sin", "cos", "tan", "cot", "sec", "csc", "arcsin", "arccos", "arctan", "sinh", "cosh",
    "tanh", "log", "ln", "lg", "exp", "lim", "max", "min", "sup", "inf", "det", "deg", "dim",
    "gcd", "arg", "ker", "Pr",
];

fn symbol(name: &str) -> Option<&'static str> {
    Some(match name {
        "alpha" => "α",
        "beta" => "β",
        "gamma" => "γ",
        "delta" => "δ",
        "epsilon" => "ϵ",
        "varepsilon" => "ε",
        "zeta" => "ζ",
        "eta" => "η",
        "theta" => "θ",
        "vartheta" => "ϑ",
        "iota" => "ι",
        "kappa" => "κ",
        "lambda" => "λ",
        "mu" => "μ",
        "nu" => "ν",
        "xi" => "ξ",
        "pi" => "π",
        "varpi" => "ϖ",
        "rho" => "ρ",
        "varrho" => "ϱ",
        "sigma" => "σ",
        "tau" => "τ",
        "upsilon" => "υ",
        "phi" => "ϕ",
        "varphi" => "φ",
        "chi" => "χ",
        "psi" => "ψ",
        "omega" => "ω",
        "Gamma" => "Γ",
        "Delta" => "Δ",
        "Theta" => "Θ",
        "Lambda" => "Λ",
        "Xi" => "Ξ",
        "Pi" => "Π",
        "Sigma" => "Σ",
        "Upsilon" => "Υ",
        "Phi" => "Φ",
        "Psi" => "Ψ",
        "Omega" => "Ω",
        "cdot" => "·",
        "times" => "×",
        "div" => "÷",
        "pm" => "±",
        "mp" => "∓",
        "ast" => "∗",
        "circ" => "∘",
        "leq" | "le" => "≤",
        "geq" | "ge" => "≥",
        "neq" | "ne" => "≠",
        "approx" => "≈",
        "equiv" => "≡",
        "sim" => "∼",
        "simeq" => "≃",
        "propto" => "∝",
        "ll" => "≪",
        "gg" => "≫",
        "in" => "∈",
        "notin" => "∉",
        "subset" => "⊂",
        "subseteq" => "⊆",
        "supset" => "⊃",
        "cup" => "∪",
        "cap" => "∩",
        "emptyset" | "varnothing" => "∅",
        "forall" => "∀",
        "exists" => "∃",
        "neg" => "¬",
        "wedge" | "land" => "∧",
        "vee" | "lor" => "∨",
        "to" | "rightarrow" => "→",
        "leftarrow" => "←",
        "Rightarrow" | "implies" => "⇒",
        "Leftrightarrow" | "iff" => "⇔",
        "mapsto" => "↦",
        "infty" => "∞",
        "partial" => "∂",
        "nabla" => "∇",
        "sum" => "∑",
        "prod" => "∏",
        "int" => "∫",
        "iint" => "∬",
        "oint" => "∮",
        "ldots" | "dots" | "cdots" => "…",
        "prime" => "′",
        "hbar" => "ℏ",
        "ell" => "ℓ",
        "langle" => "⟨",
        "rangle" => "⟩",
        "mid" => "∣",
        "parallel" => "∥",
        "perp" => "⊥",
        "angle" => "∠",
        "degree" => "°",
        _ => return None,
    })
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(latex: &str) -> Self {
        Self {
            chars: latex.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse_seq(&mut self, stop: Stop) -> Result<Vec<Node>, OmmlError> {
        let mut nodes: Vec<Node> = Vec::new();
        loop {
            self.skip_ws();
            let Some(c) = self.peek() else {
                return if stop == Stop::End {
                    Ok(nodes)
                } else {
                    Err(OmmlError::Unbalanced(self.pos))
                };
            };
            match c {
                '}' => {
                    self.pos += 1;
                    return if stop == Stop::Brace {
                        Ok(nodes)
                    } else {
                        Err(OmmlError::Unbalanced(self.pos - 1))
                    };
                }
                ']' if stop == Stop::Bracket => {
                    self.pos += 1;
                    return Ok(nodes);
                }
                '{' => {
                    self.pos += 1;
                    nodes.push(Node::Group(self.parse_seq(Stop::Brace)?));
                }
                '^' | '_' => {
                    self.pos += 1;
                    let arg = Box::new(self.parse_arg()?);
                    attach_script(&mut nodes, c == '^', arg);
                }
                '&' => return Err(OmmlError::Unsupported("&".into())),
                '\\' => {
                    self.pos += 1;
                    let name = self.command_name()?;
                    if name == "right" {
                        return if stop == Stop::Right {
                            Ok(nodes)
                        } else {
                            Err(OmmlError::Unsupported("\\right".into()))
                        };
                    }
                    if let Some(node) = self.command(&name)? {
                        nodes.push(node);
                    }
                }
                _ => {
                    self.pos += 1;
                    nodes.push(Node::Run(c.to_string()));
                }
            }
        }
    }

    /// One argument of a command or script: a group, a command or a char.
    fn parse_arg(&mut self) -> Result<Node, OmmlError> {
        self.skip_ws();
        match self.peek() {
            None | Some('}') => Err(OmmlError::MissingArgument(self.pos)),
            Some('{') => {
                self.pos += 1;
                Ok(Node::Group(self.parse_seq(Stop::Brace)?))
            }
            Some('\\') => {
                self.pos += 1;
                let name = self.command_name()?;
                self.command(&name)?
                    .ok_or(OmmlError::MissingArgument(self.pos))
            }
            Some(c) => {
                self.pos += 1;
                Ok(Node::Run(c.to_string()))
            }
        }
    }

    fn command_name(&mut self) -> Result<String, OmmlError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        if self.pos == start {
            match self.peek() {
                Some(c) => {
                    self.pos += 1;
                    Ok(c.to_string())
                }
                None => Err(OmmlError::Unsupported("\\".into())),
            }
        } else {
            Ok(self.chars[start..self.pos].iter().collect())
        }
    }

    /// Raw text of a `{...}` argument, for `\text`-like commands.
    fn raw_group(&mut self) -> Result<String, OmmlError> {
        self.skip_ws();
        if self.peek() != Some('{') {
            return Err(OmmlError::MissingArgument(self.pos));
        }
        self.pos += 1;
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(c) = self.peek() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let text: String = self.chars[start..self.pos].iter().collect();
                        self.pos += 1;
                        return Ok(text);
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        Err(OmmlError::Unbalanced(start - 1))
    }

    fn delimiter(&mut self) -> Result<String, OmmlError> {
        self.skip_ws();
        match self.peek() {
            None => Err(OmmlError::MissingArgument(self.pos)),
            Some('.') => {
                self.pos += 1;
                Ok(String::new())
            }
            Some('\\') => {
                self.pos += 1;
                let name = self.command_name()?;
                let d = match name.as_str() {
                    "{" | "lbrace" => "{",
                    "}" | "rbrace" => "}",
                    "|" | "Vert" => "‖",
                    "langle" => "⟨",
                    "rangle" => "⟩",
                    "lvert" | "rvert" => "|",
                    "lfloor" => "⌊",
                    "rfloor" => "⌋",
                    "lceil" => "⌈",
                    "rceil" => "⌉",
                    other => return Err(OmmlError::Unsupported(format!("\\{other}"))),
                };
                Ok(d.to_string())
            }
            Some(c) => {
                self.pos += 1;
                Ok(c.to_string())
            }
        }
    }

    /// Interpret a command. `Ok(None)` means it produces no output.
    fn command(&mut self, name: &str) -> Result<Option<Node>, OmmlError> {
        let node = match name {
            "frac" | "dfrac" | "tfrac" => {
                let num = self.parse_arg()?;
                let den = self.parse_arg()?;
                Node::Frac(Box::new(num), Box::new(den))
            }
            "sqrt" => {
                self.skip_ws();
                let degree = if self.peek() == Some('[') {
                    self.pos += 1;
                    Some(Box::new(Node::Group(self.parse_seq(Stop::Bracket)?)))
                } else {
                    None
                };
                let body = Box::new(self.parse_arg()?);
                Node::Sqrt { degree, body }
            }
            "text" | "textrm" | "mathrm" | "operatorname" | "textit" | "mbox" => {
                Node::Upright(self.raw_group()?)
            }
            "mathbf" | "mathit" | "mathcal" | "mathbb" | "boldsymbol" => self.parse_arg()?,
            "left" => {
                let open = self.delimiter()?;
                let body = self.parse_seq(Stop::Right)?;
                let close = self.delimiter()?;
                Node::Delim { open, close, body }
            }
            "label" | "tag" => {
                self.raw_group()?;
                return Ok(None);
            }
            "," | ";" | ":" | "!" | " " | "displaystyle" | "textstyle" | "limits" | "nolimits" => {
                return Ok(None)
            }
            "quad" | "qquad" => Node::Run(" ".into()),
            "{" | "}" | "%" | "_" | "#" | "$" | "|" => Node::Run(name.to_string()),
            _ if FUNCTIONS.contains(&name) => Node::Upright(name.to_string()),
            _ => match symbol(name) {
                Some(s) => Node::Run(s.to_string()),
                None => return Err(OmmlError::Unsupported(format!("\\{name}"))),
            },
        };
        Ok(Some(node))
    }
}

fn attach_script(nodes: &mut Vec<Node>, is_sup: bool, arg: Box<Node>) {
    let last = nodes.pop();
    let node = match last {
        Some(Node::Scripts { base, sub, sup: None }) if is_sup => Node::Scripts {
            base,
            sub,
            sup: Some(arg),
        },
        Some(Node::Scripts { base, sub: None, sup }) if !is_sup => Node::Scripts {
            base,
            sub: Some(arg),
            sup,
        },
        other => {
            let base = Box::new(other.unwrap_or_else(|| Node::Run(String::new())));
            if is_sup {
                Node::Scripts { base, sub: None, sup: Some(arg) }
            } else {
                Node::Scripts { base, sub: Some(arg), sup: None }
            }
        }
    };
    nodes.push(node);
}

// ── Emission ─────────────────────────────────────────────────────────────

fn run(w: &mut XmlWriter, text: &str, upright: bool) -> XmlResult {
    start(w, "m:r", &[])?;
    if upright {
        props(w, "m:rPr", &[("m:sty", &[("m:val", "p")])])?;
    }
    text_element(w, "m:t", &[("xml:space", "preserve")], text)?;
    end(w, "m:r")
}

fn emit_seq(nodes: &[Node], w: &mut XmlWriter) -> XmlResult {
    let mut pending = String::new();
    for node in nodes {
        if let Node::Run(t) = node {
            pending.push_str(t);
            continue;
        }
        if !pending.is_empty() {
            run(w, &pending, false)?;
            pending.clear();
        }
        emit(node, w)?;
    }
    if !pending.is_empty() {
        run(w, &pending, false)?;
    }
    Ok(())
}

fn emit_in(tag: &str, node: &Node, w: &mut XmlWriter) -> XmlResult {
    start(w, tag, &[])?;
    emit(node, w)?;
    end(w, tag)
}

fn emit(node: &Node, w: &mut XmlWriter) -> XmlResult {
    match node {
        Node::Run(t) if t.is_empty() => Ok(()),
        Node::Run(t) => run(w, t, false),
        Node::Upright(t) => run(w, t, true),
        Node::Group(children) => emit_seq(children, w),
        Node::Scripts { base, sub, sup } => {
            let tag = match (sub, sup) {
                (Some(_), Some(_)) => "m:sSubSup",
                (None, Some(_)) => "m:sSup",
                (Some(_), None) => "m:sSub",
                (None, None) => return emit(base, w),
            };
            start(w, tag, &[])?;
            emit_in("m:e", base, w)?;
            if let Some(sub) = sub {
                emit_in("m:sub", sub, w)?;
            }
            if let Some(sup) = sup {
                emit_in("m:sup", sup, w)?;
            }
            end(w, tag)
        }
        Node::Frac(num, den) => {
            start(w, "m:f", &[])?;
            emit_in("m:num", num, w)?;
            emit_in("m:den", den, w)?;
            end(w, "m:f")
        }
        Node::Sqrt { degree, body } => {
            start(w, "m:rad", &[])?;
            match degree {
                Some(d) => emit_in("m:deg", d, w)?,
                None => {
                    props(w, "m:radPr", &[("m:degHide", &[("m:val", "1")])])?;
                    empty(w, "m:deg", &[])?;
                }
            }
            emit_in("m:e", body, w)?;
            end(w, "m:rad")
        }
        Node::Delim { open, close, body } => {
            start(w, "m:d", &[])?;
            props(
                w,
                "m:dPr",
                &[
                    ("m:begChr", &[("m:val", open.as_str())]),
                    ("m:endChr", &[("m:val", close.as_str())]),
                ],
            )?;
            start(w, "m:e", &[])?;
            emit_seq(body, w)?;
            end(w, "m:e")?;
            end(w, "m:d")
        }
    }
}

fn renders_nothing(nodes: &[Node]) -> bool {
    nodes.iter().all(|n| match n {
        Node::Run(t) => t.is_empty(),
        Node::Group(children) => renders_nothing(children),
        _ => false,
    })
}

/// A parsed formula, ready to be written as a Word equation.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    nodes: Vec<Node>,
}

impl Equation {
    pub fn parse(latex: &str) -> Result<Self, OmmlError> {
        if latex.trim().is_empty() {
            return Err(OmmlError::Empty);
        }
        let nodes = Parser::new(latex).parse_seq(Stop::End)?;
        if renders_nothing(&nodes) {
            return Err(OmmlError::Empty);
        }
        Ok(Self { nodes })
    }

    /// An `m:oMath` element, wrapped in `m:oMathPara` for display math.
    pub fn write(&self, w: &mut XmlWriter, display: bool) -> XmlResult {
        if display {
            start(w, "m:oMathPara", &[])?;
        }
        start(w, "m:oMath", &[])?;
        emit_seq(&self.nodes, w)?;
        end(w, "m:oMath")?;
        if display {
            end(w, "m:oMathPara")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::Writer;

    fn latex_to_omml(latex: &str) -> Result<String, OmmlError> {
        let eq = Equation::parse(latex)?;
        let mut w = Writer::new(Vec::new());
        emit_seq(&eq.nodes, &mut w).unwrap();
        Ok(String::from_utf8(w.into_inner()).unwrap())
    }

    fn written(latex: &str, display: bool) -> String {
        let mut w = Writer::new(Vec::new());
        Equation::parse(latex).unwrap().write(&mut w, display).unwrap();
        String::from_utf8(w.into_inner()).unwrap()
    }

    fn t(s: &str) -> String {
        format!("<m:r><m:t xml:space=\"preserve\">{s}</m:t></m:r>")
    }

    #[test]
    fn pythagoras_becomes_superscripts() {
        let xml = latex_to_omml("x^2+y^2=r^2").unwrap();
        let expected = format!(
            "<m:sSup><m:e>{}</m:e><m:sup>{}</m:sup></m:sSup>{}\
<m:sSup><m:e>{}</m:e><m:sup>{}</m:sup></m:sSup>{}\
<m:sSup><m:e>{}</m:e><m:sup>{}</m:sup></m:sSup>",
            t("x"), t("2"), t("+"), t("y"), t("2"), t("="), t("r"), t("2")
        );
        assert_eq!(xml, expected);
    }

    #[test]
    fn sub_and_sup_combine() {
        let xml = latex_to_omml("a_{i}^{2}").unwrap();
        assert!(xml.starts_with("<m:sSubSup><m:e>"), "{xml}");
        assert!(xml.contains("<m:sub>") && xml.contains("<m:sup>"));
    }

    #[test]
    fn fractions_roots_and_delimiters() {
        let xml = latex_to_omml("\\frac{1}{\\sqrt[3]{x}} + \\left( \\alpha \\right)").unwrap();
        assert!(xml.contains("<m:f><m:num>"));
        assert!(xml.contains("<m:rad><m:deg>"));
        assert!(xml.contains("<m:begChr m:val=\"(\"/>"));
        assert!(xml.contains("α"));

        let plain = latex_to_omml("\\sqrt{2}").unwrap();
        assert!(plain.contains("<m:degHide m:val=\"1\"/>"));
    }

    #[test]
    fn functions_and_text_are_upright() {
        let xml = latex_to_omml("\\sin x + \\text{if } y").unwrap();
        assert!(xml.contains("<m:sty m:val=\"p\"/></m:rPr><m:t xml:space=\"preserve\">sin</m:t>"));
        assert!(xml.contains(">if </m:t>"));
    }

    #[test]
    fn xml_specials_are_escaped() {
        let xml = latex_to_omml("a < b").unwrap();
        assert!(xml.contains("a&lt;b"), "{xml}");
    }

    #[test]
    fn unsupported_constructs_are_errors() {
        assert_eq!(
            latex_to_omml("\\begin{matrix}a\\end{matrix}"),
            Err(OmmlError::Unsupported("\\begin".into()))
        );
        assert!(matches!(latex_to_omml("a & b"), Err(OmmlError::Unsupported(_))));
        assert!(matches!(latex_to_omml("{a"), Err(OmmlError::Unbalanced(_))));
        assert!(matches!(latex_to_omml("x^"), Err(OmmlError::MissingArgument(_))));
        assert_eq!(latex_to_omml("  "), Err(OmmlError::Empty));
        assert_eq!(latex_to_omml("\\, \\quad"), Ok(t(" ")));
        assert_eq!(Equation::parse("\\, \\;"), Err(OmmlError::Empty));
    }

    #[test]
    fn wrappers_add_math_elements() {
        assert_eq!(written("x", false), format!("<m:oMath>{}</m:oMath>", t("x")));
        assert!(written("x", true).starts_with("<m:oMathPara><m:oMath>"));
        assert!(written("x", true).ends_with("</m:oMath></m:oMathPara>"));
    }
}
