//! PDF text extraction and page cleanup.
//!
//! Extraction tries `pdf-extract` first and falls back to `lopdf` when the
//! primary output is too sparse to be usable. Extracted pages then go
//! through repeated header/footer removal before chunking.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use thiserror::Error;

use crate::models::PageText;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("PDF not found: {0}")]
    NotFound(String),

    #[error("Both extractors failed for {path}: primary={primary}, fallback={fallback}")]
    ExtractionFailed {
        path: String,
        primary: String,
        fallback: String,
    },
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Tuning knobs for repeated header/footer removal.
///
/// The ratio and window defaults were tuned empirically on scanned
/// textbooks; treat them as configuration rather than fixed constants.
#[derive(Debug, Clone)]
pub struct ScrubConfig {
    /// Number of leading non-empty lines per page considered header zone.
    pub top_n: usize,
    /// Number of trailing non-empty lines per page considered footer zone.
    pub bottom_n: usize,
    /// Fraction of pages a normalized line must appear on to count as
    /// repeated (subject to an absolute floor of 3 pages).
    pub min_ratio: f64,
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            top_n: 3,
            bottom_n: 3,
            min_ratio: 0.3,
        }
    }
}

/// Extract page texts from a PDF, with fallback.
///
/// The primary extractor's output is rejected as too sparse when the total
/// non-whitespace character count across all pages is under 100; the
/// fallback extractor then gets a try. If both fail, the error carries
/// both failure messages.
pub fn extract_pages(pdf_path: &Path) -> Result<Vec<PageText>> {
    if !pdf_path.exists() {
        return Err(IngestError::NotFound(pdf_path.display().to_string()));
    }

    log::info!("Extracting PDF text with pdf-extract: {}", pdf_path.display());
    let primary_error = match extract_with_pdf_extract(pdf_path) {
        Ok(pages) => {
            let total_chars: usize = pages
                .iter()
                .map(|p| p.text.chars().filter(|c| !c.is_whitespace()).count())
                .sum();
            if total_chars >= 100 {
                return Ok(pages);
            }
            format!("extraction too sparse ({} non-whitespace chars)", total_chars)
        }
        Err(e) => e,
    };
    log::warn!("pdf-extract failed: {}", primary_error);

    log::info!("Trying lopdf fallback for: {}", pdf_path.display());
    match extract_with_lopdf(pdf_path) {
        Ok(pages) => Ok(pages),
        Err(fallback_error) => Err(IngestError::ExtractionFailed {
            path: pdf_path.display().to_string(),
            primary: primary_error,
            fallback: fallback_error,
        }),
    }
}

fn extract_with_pdf_extract(pdf_path: &Path) -> std::result::Result<Vec<PageText>, String> {
    let pages = pdf_extract::extract_text_by_pages(pdf_path).map_err(|e| e.to_string())?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page_num: i as u32 + 1,
            text,
        })
        .collect())
}

fn extract_with_lopdf(pdf_path: &Path) -> std::result::Result<Vec<PageText>, String> {
    let doc = lopdf::Document::load(pdf_path).map_err(|e| e.to_string())?;
    let mut pages = Vec::new();
    for (page_num, _) in doc.get_pages() {
        let text = doc.extract_text(&[page_num]).unwrap_or_default();
        pages.push(PageText { page_num, text });
    }
    Ok(pages)
}

/// Normalize a line for repeat detection: lowercase, digits removed,
/// non-letter runs collapsed to single spaces.
fn normalize_line_for_repeat_detection(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last_was_space = true;
    for ch in line.trim().chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_lowercase() || (!ch.is_ascii() && ch.is_alphabetic()) {
            for lc in ch.to_lowercase() {
                out.push(lc);
            }
            last_was_space = false;
        } else if ch.is_ascii_digit() {
            // Page numbers vary page to page; drop digits entirely.
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out.trim().to_string()
}

/// Remove lines that repeat in the header/footer zones of many pages.
///
/// Running headers ("CHAPTER 3  —  THERMODYNAMICS") and page-number
/// footers otherwise leak into every chunk and pollute lexical scoring.
pub fn scrub_repeated_lines(pages: Vec<PageText>, config: &ScrubConfig) -> Vec<PageText> {
    if pages.is_empty() {
        return pages;
    }

    let mut top_counts: HashMap<String, usize> = HashMap::new();
    let mut bottom_counts: HashMap<String, usize> = HashMap::new();

    for page in &pages {
        let lines: Vec<&str> = page.text.lines().filter(|l| !l.trim().is_empty()).collect();
        for line in lines.iter().take(config.top_n) {
            let norm = normalize_line_for_repeat_detection(line);
            if !norm.is_empty() {
                *top_counts.entry(norm).or_insert(0) += 1;
            }
        }
        let bottom_start = lines.len().saturating_sub(config.bottom_n);
        for line in &lines[bottom_start..] {
            let norm = normalize_line_for_repeat_detection(line);
            if !norm.is_empty() {
                *bottom_counts.entry(norm).or_insert(0) += 1;
            }
        }
    }

    let threshold = std::cmp::max(3, (pages.len() as f64 * config.min_ratio) as usize);
    let repeated_top: Vec<&String> = top_counts
        .iter()
        .filter(|(_, &v)| v >= threshold)
        .map(|(k, _)| k)
        .collect();
    let repeated_bottom: Vec<&String> = bottom_counts
        .iter()
        .filter(|(_, &v)| v >= threshold)
        .map(|(k, _)| k)
        .collect();

    let cleaned: Vec<PageText> = pages
        .into_iter()
        .map(|page| {
            let raw_lines: Vec<&str> = page.text.lines().collect();
            let total = raw_lines.len();
            let kept: Vec<&str> = raw_lines
                .iter()
                .enumerate()
                .filter(|(i, line)| {
                    let norm = normalize_line_for_repeat_detection(line);
                    let in_top_zone = *i < config.top_n;
                    let in_bottom_zone = *i >= total.saturating_sub(config.bottom_n);
                    if in_top_zone && repeated_top.iter().any(|r| **r == norm) {
                        return false;
                    }
                    if in_bottom_zone && repeated_bottom.iter().any(|r| **r == norm) {
                        return false;
                    }
                    true
                })
                .map(|(_, line)| *line)
                .collect();
            PageText {
                page_num: page.page_num,
                text: kept.join("\n").trim().to_string(),
            }
        })
        .collect();

    log::info!(
        "Header/footer cleaning complete. repeated_top={} repeated_bottom={}",
        repeated_top.len(),
        repeated_bottom.len()
    );
    cleaned
}

/// Extract and clean one PDF.
pub fn ingest_pdf(pdf_path: &Path) -> Result<Vec<PageText>> {
    let pages = extract_pages(pdf_path)?;
    Ok(scrub_repeated_lines(pages, &ScrubConfig::default()))
}

/// Word tokenization shared by the lexical index and query scoring:
/// `\b\w+\b` over the lowercased text.
pub fn tokenize(text: &str) -> Vec<String> {
    // Compiled per call; tokenization is nowhere near the hot path.
    let re = Regex::new(r"\b\w+\b").expect("static regex");
    re.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}
