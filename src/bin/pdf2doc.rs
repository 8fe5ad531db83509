//! CLI binary for edgequake-pdf2doc.
//!
//! A thin shim over the library crate: maps flags to a `ConversionConfig`
//! and a set of collaborators, submits one job and prints its report.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use edgequake_pdf2doc::{
    resolve_provider, Collaborators, ConversionConfig, ConversionProgressCallback, CorrectionMode,
    Corrector, Detector, FsSink, JobReport, JobStatus, LlmCorrector, MultiDetector, Orchestrator,
    OutputFormat, PageSelection, PageSeparator, PdfiumPageSource, ProgressCallback,
    RuleBasedCorrector, SidecarDetector, VlmDetector,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page. Pages finish out of
/// order because detection runs concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, page_num: usize) -> String {
        let ms = self
            .start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Detecting");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Detecting regions on {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, region_count: usize) {
        let elapsed = self.elapsed(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{region_count:>4} regions")),
            elapsed,
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let elapsed = self.elapsed(page_num);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            elapsed,
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} pages detected",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages detected  ({} omitted)",
                if failed == total_pages { red("✘") } else { yellow("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Rebuild a paper from a detections sidecar file
  pdf2doc paper.pdf --detections paper.detections.json -f docx,latex -o out/

  # Let a vision model find the regions
  pdf2doc paper.pdf --provider openai --model gpt-4.1-mini -f md,html

  # Light correction, first ten pages, stricter filtering
  pdf2doc paper.pdf --detections det.json --correction light \
          --pages 1-10 --min-score 0.6 --min-area 0.002

  # Machine-readable job report
  pdf2doc paper.pdf --detections det.json --json > report.json

OUTPUT FORMATS:
  markdown (md)   GitHub-flavoured Markdown with $…$ / $$…$$ math
  latex (tex)     Standalone article with amsmath and booktabs
  docx (word)     Word package with native equations (OMML)
  html (htm)      Single file, MathJax-rendered math, inlined images

CORRECTION MODES:
  off          leave text untouched (default)
  light        spacing and punctuation only
  adaptive     effort scaled to how complex each paragraph looks
  aggressive   also rejoin hyphenation and fix misread characters

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter, e.g. edgequake_pdf2doc=debug

Artifacts are written to <OUT>/<job id>/document.<ext>, next to a
document.json snapshot of the reconstructed document.
"#;

/// Rebuild scientific PDFs as Markdown, LaTeX, DOCX and HTML.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2doc",
    version,
    about = "Rebuild scientific PDFs as Markdown, LaTeX, DOCX and HTML",
    long_about = "Rebuild scientific PDF papers as editable documents. Page regions \
(text, formulas, tables, figures) come from a detections sidecar file and/or a vision \
language model, are reconciled into one document model and exported in every requested format.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Output formats, comma separated: markdown, latex, docx, html.
    #[arg(short, long, env = "PDF2DOC_FORMATS", value_delimiter = ',', default_value = "markdown")]
    formats: Vec<String>,

    /// Directory receiving one sub-directory per job.
    #[arg(short, long, env = "PDF2DOC_OUT", default_value = "pdf2doc-out")]
    out: PathBuf,

    /// Detections sidecar JSON (per-page raw detections).
    #[arg(long, env = "PDF2DOC_DETECTIONS")]
    detections: Option<PathBuf>,

    /// LLM provider for vision detection: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID used for vision detection and LLM correction.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Correction mode: off, light, adaptive, aggressive.
    #[arg(long, env = "PDF2DOC_CORRECTION", default_value = "off")]
    correction: String,

    /// Correct text with the LLM instead of the built-in rules.
    #[arg(long, env = "PDF2DOC_LLM_CORRECTION")]
    llm_correction: bool,

    /// Minimum region area as a fraction of the page (0–1).
    #[arg(long, env = "PDF2DOC_MIN_AREA")]
    min_area: Option<f64>,

    /// Minimum normalized confidence (0–1).
    #[arg(long, env = "PDF2DOC_MIN_SCORE")]
    min_score: Option<f64>,

    /// IoU above which two regions are treated as duplicates (0–1].
    #[arg(long, env = "PDF2DOC_IOU")]
    iou_threshold: Option<f64>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF2DOC_PAGES", default_value = "all")]
    pages: String,

    /// Markdown page separator: none, hr, comment, or custom string.
    #[arg(long, env = "PDF2DOC_SEPARATOR", default_value = "none")]
    separator: String,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2DOC_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Pages detected concurrently.
    #[arg(short, long, env = "PDF2DOC_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2DOC_PASSWORD")]
    password: Option<String>,

    /// Per-page detection timeout in seconds.
    #[arg(long, env = "PDF2DOC_DETECT_TIMEOUT", default_value_t = 120)]
    detect_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2DOC_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Omit front matter / title metadata from the outputs.
    #[arg(long, env = "PDF2DOC_NO_METADATA")]
    no_metadata: bool,

    /// Print the job report as JSON on stdout.
    #[arg(long, env = "PDF2DOC_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2DOC_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2DOC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2DOC_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config and collaborators ───────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let collab = build_collaborators(&cli)?;

    // ── Run the job ──────────────────────────────────────────────────────
    let orchestrator = Orchestrator::new(config.clone(), collab);
    let id = orchestrator
        .submit(
            cli.input.clone(),
            config.formats.clone(),
            config.correction_mode,
            config.thresholds,
        )
        .context("Failed to submit job")?;
    let report = orchestrator.wait(&id).await.context("Job did not finish")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&report);
    }

    if report.status == JobStatus::Failed {
        anyhow::bail!(
            "Conversion failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_summary(report: &JobReport) {
    let s = &report.stats;
    eprintln!(
        "{}  job {}  {}/{} pages  {} regions  {}ms",
        if report.status == JobStatus::Succeeded {
            green("✔")
        } else {
            red("✘")
        },
        dim(&report.id.to_string()),
        s.processed_pages,
        s.selected_pages,
        s.region_count,
        s.total_duration_ms,
    );
    for (format, path) in &report.artifacts {
        eprintln!("   {:<9} →  {}", format, bold(&path.display().to_string()));
    }
    if !report.warnings.is_empty() {
        eprintln!("   {} warnings:", yellow(&report.warnings.len().to_string()));
        for w in &report.warnings {
            eprintln!("     {} {}", yellow("⚠"), w);
        }
    }
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let formats = cli
        .formats
        .iter()
        .filter(|f| !f.trim().is_empty())
        .map(|f| f.parse::<OutputFormat>().map_err(|e| anyhow!(e)))
        .collect::<Result<Vec<_>>>()?;
    let correction: CorrectionMode = cli
        .correction
        .parse()
        .map_err(|e| anyhow!("Invalid --correction: {e}"))?;

    let mut builder = ConversionConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .pages(parse_pages(&cli.pages)?)
        .formats(formats)
        .correction_mode(correction)
        .page_separator(parse_separator(&cli.separator))
        .include_metadata(!cli.no_metadata)
        .detect_timeout_secs(cli.detect_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(v) = cli.min_area {
        builder = builder.min_area(v);
    }
    if let Some(v) = cli.min_score {
        builder = builder.min_score(v);
    }
    if let Some(v) = cli.iou_threshold {
        builder = builder.iou_threshold(v);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Pick the detection sources and the corrector from the flags.
fn build_collaborators(cli: &Cli) -> Result<Collaborators> {
    let wants_llm = cli.provider.is_some() || cli.model.is_some() || cli.detections.is_none();
    let provider = if wants_llm || cli.llm_correction {
        Some(
            resolve_provider(cli.provider.as_deref(), cli.model.as_deref())
                .context("No detection source: pass --detections or configure an LLM provider")?,
        )
    } else {
        None
    };

    let mut detectors = MultiDetector::new(Vec::new());
    if let Some(ref path) = cli.detections {
        let sidecar = SidecarDetector::from_path(path)
            .with_context(|| format!("Failed to load detections from {}", path.display()))?;
        detectors.push(Arc::new(sidecar));
    }
    if let (true, Some(p)) = (wants_llm, provider.as_ref()) {
        detectors.push(Arc::new(VlmDetector::new(Arc::clone(p))));
    }
    let detector: Arc<dyn Detector> = Arc::new(detectors);

    let corrector: Arc<dyn Corrector> = match (cli.llm_correction, provider) {
        (true, Some(p)) => Arc::new(LlmCorrector::new(p)),
        _ => Arc::new(RuleBasedCorrector),
    };

    Ok(Collaborators {
        pages: Arc::new(PdfiumPageSource),
        detector,
        corrector,
        sink: Arc::new(FsSink::new(cli.out.clone())),
    })
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();
    if s == "all" {
        return Ok(PageSelection::All);
    }

    if s.contains(',') {
        let pages = s
            .split(',')
            .map(|p| {
                let n: usize = p
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))?;
                if n < 1 {
                    anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {n})");
                }
                Ok(n)
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(PageSelection::Set(pages));
    }

    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start.trim().parse().context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;
        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {start})");
        }
        if start > end {
            anyhow::bail!("Invalid page range '{start}-{end}': start must be <= end");
        }
        return Ok(PageSelection::Range(start, end));
    }

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {page})");
    }
    Ok(PageSelection::Single(page))
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_parse() {
        assert!(matches!(parse_pages("all").unwrap(), PageSelection::All));
        assert!(matches!(parse_pages("4").unwrap(), PageSelection::Single(4)));
        assert!(matches!(parse_pages("2-5").unwrap(), PageSelection::Range(2, 5)));
        assert!(matches!(parse_pages("1, 3").unwrap(), PageSelection::Set(ref v) if v == &[1, 3]));
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("5-2").is_err());
    }

    #[test]
    fn separator_keeps_custom_text() {
        assert_eq!(parse_separator("HR"), PageSeparator::HorizontalRule);
        assert_eq!(parse_separator("<<P>>"), PageSeparator::Custom("<<P>>".into()));
    }

    #[test]
    fn cli_maps_to_config() {
        let cli = Cli::parse_from([
            "pdf2doc", "paper.pdf", "-f", "tex,md,docx", "--correction", "light",
            "--min-score", "0.7", "--detections", "det.json",
        ]);
        let config = build_config(&cli, None).unwrap();
        assert_eq!(
            config.formats,
            vec![OutputFormat::Markdown, OutputFormat::Latex, OutputFormat::Docx]
        );
        assert_eq!(config.correction_mode, CorrectionMode::Light);
        assert_eq!(config.thresholds.min_score, 0.7);

        let bad = Cli::parse_from(["pdf2doc", "paper.pdf", "-f", "pdf"]);
        assert!(build_config(&bad, None).is_err());
    }
}
