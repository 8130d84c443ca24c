pub mod loggers;

use crate::loggers::init_logger;
use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rsexp::config::{ExtractorConfig, GapRecoveryPolicy};
use rsexp::converter::TextPageSource;
use rsexp::error::PipelineError;
use rsexp::events::{CancelToken, PipelineObserver, Stage, Warning};
use rsexp::parser::{parse, ExamParser, ExtractionResult};
use rsexp::writer::sink_for_path;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum RecoverGaps {
    /// Only when the primary pass found between 50 and 100 questions
    Band,
    Always,
    Never,
}

impl RecoverGaps {
    fn policy(&self) -> GapRecoveryPolicy {
        match self {
            RecoverGaps::Band => GapRecoveryPolicy::default(),
            RecoverGaps::Always => GapRecoveryPolicy::Always,
            RecoverGaps::Never => GapRecoveryPolicy::Never,
        }
    }
}

#[derive(Parser, Debug)]
#[command(version, about, long_about=None)]
#[command(group(ArgGroup::new("input").required(true).args(["pdf", "text"])))]
struct Args {
    /// PDF path, URL or glob pattern
    #[arg(short, long)]
    pdf: Option<String>,

    /// Plain text file, pages separated by form feeds
    #[arg(short, long)]
    text: Option<PathBuf>,

    #[arg(short = 'k', long, conflicts_with = "answer_key_file")]
    answer_key: Option<String>,

    #[arg(long)]
    answer_key_file: Option<PathBuf>,

    /// Output file (.xlsx, .csv or .json); a directory when several PDFs match
    #[arg(short, long)]
    out: Option<String>,

    /// JSON publisher profile
    #[arg(long)]
    profile: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    force_ocr: bool,

    /// OCR language code
    #[arg(long)]
    lang: Option<String>,

    #[arg(long, value_enum, default_value_t = RecoverGaps::Band)]
    recover_gaps: RecoverGaps,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug, Clone)]
enum Input {
    Pdf(String),
    Text(PathBuf),
}

impl std::fmt::Display for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Input::Pdf(path_or_url) => write!(f, "{}", path_or_url),
            Input::Text(path) => write!(f, "{}", path.display()),
        }
    }
}

impl Input {
    fn stem(&self) -> String {
        let name = match self {
            Input::Pdf(path_or_url) => path_or_url.trim_end_matches('/').rsplit('/').next().unwrap_or("exam"),
            Input::Text(path) => path.file_name().and_then(|n| n.to_str()).unwrap_or("exam"),
        };
        match Path::new(name).file_stem().and_then(|s| s.to_str()) {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => "exam".to_string(),
        }
    }
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn expand_inputs(args: &Args) -> Result<Vec<Input>> {
    if let Some(path) = &args.text {
        if !path.exists() {
            bail!("File not found: {}", path.display());
        }
        return Ok(vec![Input::Text(path.clone())]);
    }
    let Some(pattern) = &args.pdf else {
        bail!("either --pdf or --text is required");
    };
    if is_url(pattern) {
        return Ok(vec![Input::Pdf(pattern.clone())]);
    }
    let mut inputs = Vec::new();
    for entry in glob::glob(pattern).with_context(|| format!("invalid pattern: {}", pattern))? {
        inputs.push(Input::Pdf(entry?.to_string_lossy().to_string()));
    }
    if inputs.is_empty() {
        bail!("File not found: {}", pattern);
    }
    return Ok(inputs);
}

fn output_path(input: &Input, out: Option<&str>, batch: bool) -> PathBuf {
    let default_name = format!("{}-extracted.xlsx", input.stem());
    match out {
        Some(out) if batch => Path::new(out).join(default_name),
        Some(out) => PathBuf::from(out),
        None => PathBuf::from(default_name),
    }
}

fn load_config(args: &Args) -> Result<ExtractorConfig> {
    let mut config = match &args.profile {
        Some(path) => ExtractorConfig::from_json_file(path)?,
        None => ExtractorConfig::new(),
    };
    if args.force_ocr {
        config.ocr.force = true;
    }
    if let Some(lang) = &args.lang {
        config.ocr.language = lang.clone();
    }
    config.gap_recovery = args.recover_gaps.policy();
    return Ok(config);
}

fn load_answer_key(args: &Args) -> Result<String> {
    match (&args.answer_key, &args.answer_key_file) {
        (Some(key), _) => Ok(key.clone()),
        (None, Some(path)) => {
            std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
        }
        (None, None) => {
            tracing::warn!("no answer key given; correct_answer will be empty");
            Ok(String::new())
        }
    }
}

/// Shows the current stage on a spinner and logs warnings above it.
struct ProgressObserver {
    bar: ProgressBar,
    verbose: bool,
}

impl ProgressObserver {
    fn new(input: &Input, verbose: bool) -> ProgressObserver {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("[{elapsed_precise}] {spinner:.green} {prefix} {msg}") {
            bar.set_style(style);
        }
        bar.set_prefix(input.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        ProgressObserver {
            bar: bar,
            verbose: verbose,
        }
    }
}

impl PipelineObserver for ProgressObserver {
    fn on_progress(&self, stage: Stage, detail: &str) {
        self.bar.set_message(format!("{}: {}", stage, detail));
        if self.verbose {
            self.bar.suspend(|| tracing::info!(stage = %stage, "{}", detail));
        }
    }

    fn on_warning(&self, warning: &Warning) {
        self.bar.suspend(|| tracing::warn!(kind = %warning.kind, "{}", warning.context));
    }
}

async fn run_one(
    input: &Input,
    answer_key: &str,
    config: &ExtractorConfig,
    cancel: &CancelToken,
    verbose: bool,
) -> Result<ExtractionResult, PipelineError> {
    let observer = ProgressObserver::new(input, verbose);
    let result = match input {
        Input::Pdf(path_or_url) => parse(path_or_url, answer_key, config, &observer, cancel).await,
        Input::Text(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))
                .map_err(PipelineError::Acquisition)?;
            // a text file has no image layer to recognise
            let mut config = config.clone();
            config.ocr.min_text_len = 0;
            config.ocr.force = false;
            let parser = ExamParser::new(config)?;
            let source = TextPageSource::from_text(&text);
            parser.parse_source(&source, None, answer_key, &observer, cancel).await
        }
    };
    observer.bar.finish_and_clear();
    result
}

fn print_summary(input: &Input, out: &Path, result: &ExtractionResult) {
    let stats = &result.stats;
    println!(
        "{}: {} questions ({} with answers, {} flagged) using '{}' numbering (confidence {:.3}){} -> {}",
        input,
        stats.total,
        stats.with_answer,
        stats.flagged,
        result.format.name,
        result.format.confidence,
        if result.used_ocr { ", OCR" } else { "" },
        out.display()
    );
    if !result.missing_numbers.is_empty() {
        println!(
            "  missing: {}",
            result.missing_numbers.iter().map(|n| n.to_string()).collect::<Vec<String>>().join(", ")
        );
    }
    if !result.warnings.is_empty() {
        println!("  {} warnings", result.warnings.len());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose)?;

    let config = load_config(&args)?;
    let answer_key = load_answer_key(&args)?;
    let inputs = expand_inputs(&args)?;
    let batch = inputs.len() > 1;
    if batch {
        if let Some(out) = &args.out {
            std::fs::create_dir_all(out).with_context(|| format!("cannot create {}", out))?;
        }
    }

    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current stage");
            token.cancel();
        }
    });

    let mut failures = 0;
    for input in inputs.iter() {
        let out = output_path(input, args.out.as_deref(), batch);
        match run_one(input, &answer_key, &config, &cancel, args.verbose).await {
            Ok(result) => {
                sink_for_path(&out).write_table(&result.records, &out)?;
                print_summary(input, &out, &result);
            }
            Err(PipelineError::Cancelled { stage }) => {
                bail!("cancelled during {}, nothing written for {}", stage, input);
            }
            Err(e) => {
                tracing::error!("{}: {}", input, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} documents failed", failures, inputs.len());
    }
    Ok(())
}
