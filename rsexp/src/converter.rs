use anyhow::{anyhow, Context, Error, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use reqwest as request;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::cleaner::reconstruct_page_text;
use crate::config::{PageNumber, PdfWorkspace};
use crate::models::{RawPage, TextFragment, YOrigin};

/// Where page text comes from.
///
/// Pages are 1-indexed. Implementations must tolerate concurrent
/// `page_text` calls for different pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> usize;

    async fn page_text(&self, page: PageNumber) -> Result<RawPage>;

    /// Renders one page to an image file for OCR and returns its path.
    async fn render_page(&self, page: PageNumber, dpi: u32) -> Result<PathBuf>;
}

/// Fetches every page and rebuilds its text, returning pages in page order.
///
/// # Arguments
///
/// * `source` - The page source.
/// * `concurrency` - Pages fetched at the same time (at least 1).
pub async fn acquire_pages(source: &dyn PageSource, concurrency: usize) -> Result<Vec<String>> {
    let pages = stream::iter(1..=source.page_count())
        .map(|page| async move {
            let raw = source
                .page_text(page)
                .await
                .with_context(|| format!("cannot read text of page {}", page))?;
            Ok::<String, Error>(reconstruct_page_text(&raw))
        })
        .buffered(concurrency.max(1))
        .try_collect::<Vec<String>>()
        .await?;
    return Ok(pages);
}

/// Pages already available as text. Form feeds separate pages, as in
/// `pdftotext` output; text without form feeds is a single page.
#[derive(Debug, Clone)]
pub struct TextPageSource {
    pages: Vec<String>,
}

impl TextPageSource {
    pub fn new(pages: Vec<String>) -> TextPageSource {
        TextPageSource { pages: pages }
    }

    pub fn from_text(text: &str) -> TextPageSource {
        let mut pages: Vec<String> = text.split('\u{c}').map(|p| p.to_string()).collect();
        // pdftotext ends the last page with a form feed too
        if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
            pages.pop();
        }
        TextPageSource::new(pages)
    }
}

#[async_trait]
impl PageSource for TextPageSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    async fn page_text(&self, page: PageNumber) -> Result<RawPage> {
        let text = page
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .ok_or_else(|| anyhow!("page {} out of range 1..={}", page, self.pages.len()))?;
        return Ok(RawPage::Text(text.clone()));
    }

    async fn render_page(&self, page: PageNumber, _dpi: u32) -> Result<PathBuf> {
        Err(anyhow!("page {} is plain text and has no image to render", page))
    }
}

/// Copies a local PDF, or downloads a URL, into the workspace.
pub(crate) async fn save_pdf(path_or_url: &str, workspace: &PdfWorkspace) -> Result<()> {
    let save_path = workspace.pdf_path.as_path();
    if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
        let res = request::get(path_or_url).await?.error_for_status()?;
        let bytes = res.bytes().await?;
        tokio::fs::write(save_path, &bytes).await?;
    } else {
        let path = Path::new(path_or_url);
        if !path.exists() {
            return Err(anyhow!("file not found: {}", path_or_url));
        }
        tokio::fs::copy(path, save_path).await?;
    }
    tracing::debug!("saved {} to {}", path_or_url, save_path.display());
    return Ok(());
}

/// Reads the page count with `pdfinfo`.
pub(crate) async fn get_pdf_info(pdf_path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("cannot run pdfinfo (is poppler-utils installed?)")?;
    let text = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() || text.is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("pdf file is broken or not a PDF: {}", stderr.trim()));
    }

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("pages") {
            let pages = value.trim().parse::<usize>()?;
            return Ok(pages);
        }
    }
    Err(anyhow!("pdfinfo reported no page count"))
}

fn parse_attr<T: std::str::FromStr>(element: &scraper::ElementRef, attr: &str, element_type: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    element
        .value()
        .attr(attr)
        .ok_or_else(|| anyhow!("{} element missing '{}' attribute", element_type, attr))?
        .parse::<T>()
        .map_err(|e| anyhow!("Invalid '{}' attribute in {} element: {}", attr, element_type, e))
}

/// Reads words out of `pdftotext -bbox-layout` output.
///
/// Every word takes the `ymin` of its line so words of one line group
/// together; `x` is the word's own `xmin`.
pub(crate) fn parse_bbox_page(html: &str) -> Result<Vec<TextFragment>> {
    let document = scraper::Html::parse_document(html);
    let line_selector = scraper::Selector::parse("line").map_err(|e| anyhow!("{:?}", e))?;
    let word_selector = scraper::Selector::parse("word").map_err(|e| anyhow!("{:?}", e))?;

    let mut fragments = Vec::new();
    for line in document.select(&line_selector) {
        let line_ymin: f32 = parse_attr(&line, "ymin", "line")?;
        for word in line.select(&word_selector) {
            let word_xmin: f32 = parse_attr(&word, "xmin", "word")?;
            let text = word.text().collect::<String>();
            if text.trim().is_empty() {
                continue;
            }
            fragments.push(TextFragment::new(text.trim(), word_xmin, line_ymin));
        }
    }
    return Ok(fragments);
}

/// Pages of a PDF read through the poppler command line tools.
///
/// The document is copied (or downloaded) into a [`PdfWorkspace`]; call
/// [`PopplerPageSource::close`] to remove it once the run is over.
#[derive(Debug)]
pub struct PopplerPageSource {
    workspace: PdfWorkspace,
    pages: usize,
}

impl PopplerPageSource {
    /// Fetches the document and reads its page count.
    ///
    /// # Errors
    ///
    /// Fails when the file is missing, the download fails or poppler does
    /// not recognise the file as a PDF.
    pub async fn open(path_or_url: &str) -> Result<PopplerPageSource> {
        let workspace = PdfWorkspace::new();
        tokio::fs::create_dir_all(&workspace.work_dir).await?;
        let opened = async {
            save_pdf(path_or_url, &workspace).await?;
            get_pdf_info(&workspace.pdf_path).await
        }
        .await;
        match opened {
            Ok(pages) => {
                tracing::info!("opened {} ({} pages)", path_or_url, pages);
                Ok(PopplerPageSource {
                    workspace: workspace,
                    pages: pages,
                })
            }
            Err(e) => {
                let _ = workspace.clean_files();
                Err(e)
            }
        }
    }

    pub fn workspace(&self) -> &PdfWorkspace {
        &self.workspace
    }

    /// Removes the temporary files of this document.
    pub fn close(&self) -> Result<()> {
        self.workspace.clean_files()
    }

    async fn layout_text(&self, page: PageNumber) -> Result<String> {
        let page_arg = page.to_string();
        let output = Command::new("pdftotext")
            .args(["-f", page_arg.as_str(), "-l", page_arg.as_str(), "-layout"])
            .arg(&self.workspace.pdf_path)
            .arg("-")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "pdftotext failed with exit code {:?}: {}",
                output.status.code(),
                stderr
            ));
        }
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
}

#[async_trait]
impl PageSource for PopplerPageSource {
    fn page_count(&self) -> usize {
        self.pages
    }

    async fn page_text(&self, page: PageNumber) -> Result<RawPage> {
        let page_arg = page.to_string();
        let html_path = self.workspace.page_text_path(page);
        let output = Command::new("pdftotext")
            .args(["-f", page_arg.as_str(), "-l", page_arg.as_str(), "-bbox-layout"])
            .arg(&self.workspace.pdf_path)
            .arg(&html_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() && html_path.exists() {
            let html = tokio::fs::read_to_string(&html_path).await?;
            let fragments = parse_bbox_page(&html)?;
            if !fragments.is_empty() {
                return Ok(RawPage::Positioned {
                    fragments: fragments,
                    origin: YOrigin::TopLeft,
                });
            }
        } else {
            tracing::debug!(
                "bbox extraction failed on page {}: {}",
                page,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let text = self.layout_text(page).await?;
        return Ok(RawPage::Text(text));
    }

    async fn render_page(&self, page: PageNumber, dpi: u32) -> Result<PathBuf> {
        let page_arg = page.to_string();
        let dpi_arg = dpi.to_string();
        let output = Command::new("pdftocairo")
            .args(["-png", "-singlefile", "-r", dpi_arg.as_str()])
            .args(["-f", page_arg.as_str(), "-l", page_arg.as_str()])
            .arg(&self.workspace.pdf_path)
            .arg(self.workspace.page_image_prefix(page))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        let image = self.workspace.page_image_path(page);
        if !output.status.success() || !image.exists() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("pdftocairo could not render page {}: {}", page, stderr.trim()));
        }
        return Ok(image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Later pages answer first, so ordering comes from the stream alone.
    struct SlowFirstPages {
        count: usize,
    }

    #[async_trait]
    impl PageSource for SlowFirstPages {
        fn page_count(&self) -> usize {
            self.count
        }

        async fn page_text(&self, page: PageNumber) -> Result<RawPage> {
            let delay = (self.count - page) as u64 * 10;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(RawPage::Text(format!("page {}", page)))
        }

        async fn render_page(&self, _page: PageNumber, _dpi: u32) -> Result<PathBuf> {
            Err(anyhow!("no images"))
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_acquire_pages_keeps_page_order() {
        let source = SlowFirstPages { count: 5 };
        let pages = acquire_pages(&source, 4).await.unwrap();
        assert_eq!(pages, vec!["page 1", "page 2", "page 3", "page 4", "page 5"]);
    }

    #[tokio::test]
    async fn test_text_source_splits_on_form_feed() {
        let source = TextPageSource::from_text("first page\u{c}second page\u{c}");
        assert_eq!(source.page_count(), 2);
        assert_eq!(source.page_text(2).await.unwrap(), RawPage::Text("second page".to_string()));
        assert!(source.page_text(0).await.is_err());
        assert!(source.page_text(3).await.is_err());
        assert!(source.render_page(1, 150).await.is_err());
    }

    #[test]
    fn test_parse_bbox_page() {
        let html = r#"<!DOCTYPE html><html><head></head><body><doc>
            <page width="595.0" height="842.0"><flow><block xMin="56" yMin="70" xMax="300" yMax="110">
            <line xMin="56" yMin="70.1" xMax="300" yMax="80"><word xMin="56" yMin="70.1" xMax="62" yMax="80">1.</word><word xMin="66" yMin="70.3" xMax="120" yMax="80">Which</word></line>
            <line xMin="56" yMin="90" xMax="100" yMax="100"><word xMin="56" yMin="90" xMax="70" yMax="100">(A)</word><word xMin="74" yMin="90" xMax="90" yMax="100">yes</word></line>
            </block></flow></page></doc></body></html>"#;
        let fragments = parse_bbox_page(html).unwrap();
        assert_eq!(fragments.len(), 4);
        assert_eq!(fragments[1], TextFragment::new("Which", 66.0, 70.1));
        let page = RawPage::Positioned {
            fragments: fragments,
            origin: YOrigin::TopLeft,
        };
        assert_eq!(reconstruct_page_text(&page), "1. Which\n(A) yes");
    }

    #[tokio::test]
    async fn test_save_pdf_rejects_missing_file() {
        let workspace = PdfWorkspace::new();
        let res = save_pdf("/nonexistent/exam.pdf", &workspace).await;
        assert!(res.is_err());
        assert!(!workspace.pdf_path.exists());
    }

    #[test_log::test(tokio::test)]
    async fn test_open_rejects_non_pdf() {
        if std::process::Command::new("pdfinfo")
            .arg("-v")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_err()
        {
            tracing::warn!("[skip] missing command: pdfinfo");
            return;
        }
        let workspace = PdfWorkspace::new();
        std::fs::create_dir_all(&workspace.work_dir).unwrap();
        let fake = workspace.work_dir.join("fake.pdf");
        std::fs::write(&fake, "this is not a pdf").unwrap();

        let res = PopplerPageSource::open(fake.to_str().unwrap()).await;
        assert!(res.is_err());
        workspace.clean_files().unwrap();
    }
}
