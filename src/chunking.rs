//! Page text segmentation and chunk packing.
//!
//! Pages are first split into semantic units (heading lines vs. greedily
//! joined paragraphs), each tagged with the most recent heading. Units are
//! then packed into overlapping, token-budgeted chunks. Packing never
//! splits inside a unit, so a single oversized paragraph can become a
//! chunk on its own.

use regex::Regex;

use crate::models::{make_chunk_id, Chunk, PageText};

/// Chunk packing parameters.
///
/// `target_min_tokens` is a tuning knob that is currently read but not
/// enforced: trailing chunks below the minimum are emitted regardless.
/// This is a known quirk of the packing loop, kept deliberately; do not
/// add suppression logic without a product decision.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub target_min_tokens: usize,
    pub target_max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_min_tokens: 900,
            target_max_tokens: 1200,
            overlap_tokens: 200,
        }
    }
}

/// A heading line or a paragraph, tagged with the section it falls under.
/// Consumed entirely during chunk assembly.
#[derive(Debug, Clone)]
struct TextUnit {
    text: String,
    page_num: u32,
    section_title: Option<String>,
}

/// Estimate token count as `max(1, chars / 4)`.
///
/// A character-count proxy, not a real tokenizer. Persisted
/// `token_estimate` fields are computed with this exact formula, so it
/// must not change without an index rebuild.
pub fn estimate_tokens(text: &str) -> usize {
    std::cmp::max(1, text.chars().count() / 4)
}

fn is_all_caps_heading(line: &str) -> bool {
    let s = line.trim();
    if s.is_empty() || s.chars().count() > 120 {
        return false;
    }
    let letters = s.chars().filter(|c| c.is_ascii_alphabetic()).count();
    if letters < 3 {
        return false;
    }
    s.to_uppercase() == s
}

fn is_title_case_heading(line: &str, next_line: &str, word_re: &Regex) -> bool {
    let s = line.trim();
    if s.is_empty() || s.chars().count() > 120 {
        return false;
    }
    if !next_line.trim().is_empty() {
        return false;
    }
    let words: Vec<&str> = word_re.find_iter(s).map(|m| m.as_str()).collect();
    if words.is_empty() || words.len() > 14 {
        return false;
    }
    let capitalized = words
        .iter()
        .filter(|w| w.chars().next().is_some_and(|c| c.is_ascii_uppercase()))
        .count();
    capitalized as f64 / words.len() as f64 >= 0.7
}

/// Split pages into heading and paragraph units.
///
/// The current-section accumulator is scoped to this call (one document),
/// carrying across page boundaries but never across documents.
fn collect_units(pages: &[PageText]) -> Vec<TextUnit> {
    let word_re = Regex::new(r"[A-Za-z][A-Za-z'\-]*").expect("static regex");
    let mut units: Vec<TextUnit> = Vec::new();
    let mut current_section: Option<String> = None;

    for page in pages {
        let lines: Vec<&str> = page.text.lines().collect();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i].trim();
            let next_line = if i + 1 < lines.len() { lines[i + 1] } else { "" };
            if line.is_empty() {
                i += 1;
                continue;
            }

            if is_all_caps_heading(line) || is_title_case_heading(line, next_line, &word_re) {
                current_section = Some(line.to_string());
                units.push(TextUnit {
                    text: line.to_string(),
                    page_num: page.page_num,
                    section_title: current_section.clone(),
                });
                i += 1;
                continue;
            }

            // Greedily join consecutive non-blank lines into one paragraph.
            let mut para_lines = vec![line];
            i += 1;
            while i < lines.len() && !lines[i].trim().is_empty() {
                para_lines.push(lines[i].trim());
                i += 1;
            }
            let paragraph = para_lines.join(" ").trim().to_string();
            if !paragraph.is_empty() {
                units.push(TextUnit {
                    text: paragraph,
                    page_num: page.page_num,
                    section_title: current_section.clone(),
                });
            }
        }
    }

    units
}

/// Smallest suffix of `units` whose token estimate reaches
/// `overlap_tokens`; the whole slice if it never does.
fn tail_overlap_units(units: &[TextUnit], overlap_tokens: usize) -> Vec<TextUnit> {
    let mut out_rev: Vec<TextUnit> = Vec::new();
    let mut total = 0;
    for u in units.iter().rev() {
        out_rev.push(u.clone());
        total += estimate_tokens(&u.text);
        if total >= overlap_tokens {
            break;
        }
    }
    out_rev.reverse();
    out_rev
}

fn flush_chunk(chunk_units: &[TextUnit], book_title: &str, next_num: &mut usize) -> Option<Chunk> {
    let text = chunk_units
        .iter()
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string();
    if text.is_empty() {
        return None;
    }

    let page_start = chunk_units.iter().map(|u| u.page_num).min().unwrap_or(0);
    let page_end = chunk_units.iter().map(|u| u.page_num).max().unwrap_or(0);
    // Last non-null heading wins, scanning from the end.
    let section_title = chunk_units
        .iter()
        .rev()
        .find_map(|u| u.section_title.clone());

    let chunk = Chunk {
        chunk_id: make_chunk_id(*next_num),
        book_title: book_title.to_string(),
        source_pdf: String::new(),
        page_start,
        page_end,
        section_title,
        token_estimate: estimate_tokens(&text),
        text,
    };
    *next_num += 1;
    Some(chunk)
}

/// Segment pages and pack the resulting units into chunks.
///
/// Chunk ids assigned here are provisional, local to this document; the
/// index builder renumbers globally after concatenating all documents.
/// Zero extractable units yield zero chunks; the caller treats that as a
/// build failure.
pub fn build_chunks(pages: &[PageText], book_title: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let units = collect_units(pages);
    if units.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<TextUnit> = Vec::new();
    let mut current_tokens = 0usize;
    let mut next_chunk_num = 1usize;
    let mut just_flushed = false;

    for unit in units {
        current_tokens += estimate_tokens(&unit.text);
        current.push(unit);
        just_flushed = false;

        if current_tokens >= config.target_max_tokens {
            if let Some(c) = flush_chunk(&current, book_title, &mut next_chunk_num) {
                chunks.push(c);
            }
            let overlap = tail_overlap_units(&current, config.overlap_tokens);
            current_tokens = overlap.iter().map(|u| estimate_tokens(&u.text)).sum();
            current = overlap;
            just_flushed = true;
        }
    }

    // A buffer left over from the max-token trigger is pure overlap and
    // was already emitted as the tail of the previous chunk.
    if !current.is_empty() && !just_flushed {
        if let Some(c) = flush_chunk(&current, book_title, &mut next_chunk_num) {
            chunks.push(c);
        }
    }

    chunks
}
