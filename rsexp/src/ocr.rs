use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Optical character recognition over rendered page images.
///
/// A run calls `recognize` for one page at a time, so implementations may
/// hold exclusive model state.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Language codes this engine can recognise.
    async fn available_languages(&self) -> Result<Vec<String>>;

    async fn recognize(&self, image: &Path, language: &str) -> Result<String>;
}

/// Picks `requested` when the engine knows it, `fallback` otherwise.
///
/// # Returns
///
/// The language to use and whether the fallback was taken.
///
/// # Errors
///
/// Fails when the engine has neither language installed.
pub async fn resolve_language(
    engine: &dyn OcrEngine,
    requested: &str,
    fallback: &str,
) -> Result<(String, bool)> {
    let languages = engine.available_languages().await?;
    if languages.iter().any(|l| l == requested) {
        return Ok((requested.to_string(), false));
    }
    tracing::debug!("ocr language '{}' not installed, available: {:?}", requested, languages);
    if languages.iter().any(|l| l == fallback) {
        return Ok((fallback.to_string(), true));
    }
    return Err(anyhow!(
        "neither '{}' nor '{}' is installed (available: {})",
        requested,
        fallback,
        languages.join(", ")
    ));
}

/// The `tesseract` command line engine.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        TesseractOcr::new("tesseract")
    }
}

impl TesseractOcr {
    pub fn new(binary: &str) -> TesseractOcr {
        TesseractOcr {
            binary: binary.to_string(),
        }
    }
}

/// Parses `tesseract --list-langs`: a header line ending in `:` followed by
/// one language code per line.
pub(crate) fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .map(|l| l.to_string())
        .collect()
}

/// Languages from `--list-langs` output. The list goes to stdout; releases
/// before 4.0 print it on stderr, which otherwise only carries warnings.
pub(crate) fn language_listing(stdout: &str, stderr: &str) -> Vec<String> {
    let languages = parse_language_list(stdout);
    if !languages.is_empty() {
        return languages;
    }
    parse_language_list(stderr)
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn available_languages(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.binary)
            .arg("--list-langs")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("cannot run {}", self.binary))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} --list-langs failed: {}",
                self.binary,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        return Ok(language_listing(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ));
    }

    async fn recognize(&self, image: &Path, language: &str) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .args(["-l", language])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("cannot run {}", self.binary))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} failed on {}: {}",
                self.binary,
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
}
