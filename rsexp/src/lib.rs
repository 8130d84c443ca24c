//! # RuSt Exam Parser (rsexp)
//!
//! The `rsexp` library turns exam documents into a table of questions: number,
//! statement, lettered options, the correct answer from a user-supplied
//! answer key, and a flag for questions that probably depend on a figure.
//!
//! ## Quick Start
//!
//! ### Pre-requirements
//! - Poppler: `sudo apt install poppler-utils`
//! - Tesseract (only for scanned documents): `sudo apt install tesseract-ocr tesseract-ocr-por`
//!
//! ### Installation
//! To start using the `rsexp` library, add it to your project's dependencies in the `Cargo.toml` file:
//!
//! ```bash
//! cargo add rsexp
//! ```
//!
//! ## Examples
//!
//! Extracting questions from text already in memory:
//!
//! ```rust
//! # use rsexp::config::ExtractorConfig;
//! # use rsexp::events::{CancelToken, SilentObserver};
//! # use rsexp::parser::ExamParser;
//! let parser = ExamParser::new(ExtractorConfig::new()).unwrap();
//! let text = "1. What is 2+2?\n(A) 3\n(B) 4\n(C) 5\n2. What color is the sky?\n(A) Red\n(B) Blue\n(C) Green\n";
//! let result = parser
//!     .extract_text(text, "1-B,2-B", &SilentObserver, &CancelToken::new())
//!     .unwrap();
//! assert_eq!(result.records.len(), 2);
//! assert_eq!(result.records[1].options.get(rsexp::models::OptionLetter::B), "Blue");
//! ```
//!
//! Extracting questions from a PDF file or URL:
//!
//! ```rust,no_run
//! # use rsexp::config::ExtractorConfig;
//! # use rsexp::events::{CancelToken, TracingObserver};
//! # use rsexp::parser::parse;
//! # use rsexp::writer::sink_for_path;
//! # async fn try_main() -> anyhow::Result<()> {
//! let config = ExtractorConfig::new();
//! let result = parse("exam.pdf", "1-A, 2-C, 3-B", &config, &TracingObserver, &CancelToken::new()).await?;
//! let out = std::path::Path::new("exam.xlsx");
//! sink_for_path(out).write_table(&result.records, out)?;
//! # Ok(())
//! # }
//! # #[tokio::main]
//! # async fn main() {
//! #    try_main().await.unwrap();
//! # }
//! ```
//!
//! ## Tests
//!
//! The library includes a set of tests to ensure its functionality. To run the tests, use the following command:
//!
//! ```sh
//! cargo test
//! ```

pub mod answer_key;
pub mod assembler;
pub mod cleaner;
pub mod config;
pub mod converter;
pub mod detector;
pub mod error;
pub mod events;
pub mod extracter;
pub mod models;
pub mod ocr;
pub mod parser;
pub mod patterns;
pub mod recovery;
pub mod segmenter;
pub mod test_utils;
pub mod writer;
