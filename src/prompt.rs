//! Prompt composition with enforced citation formatting.
//!
//! The retrieved passages become labeled context blocks under a total
//! character budget. Cleaning and truncation happen here, not in the
//! index: persisted chunk text stays raw so retrieval scoring is not
//! affected by presentation concerns.

use regex::Regex;

use crate::models::{Chunk, RetrievedChunk};

/// Default total character budget for the context section.
pub const DEFAULT_CONTEXT_CHARS: usize = 2000;
/// The budget never shrinks below this.
pub const MIN_CONTEXT_CHARS: usize = 500;
/// Minimum per-chunk allotment (header included).
const MIN_CHUNK_CHARS: usize = 350;

const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

/// Render a citation tag: `[p.12 | chunk_0007]` for a single page,
/// `[p.12–13 | chunk_0007]` (en-dash) for a range.
pub fn citation(page_start: u32, page_end: u32, chunk_id: &str) -> String {
    if page_start == page_end {
        format!("[p.{} | {}]", page_start, chunk_id)
    } else {
        format!("[p.{}\u{2013}{} | {}]", page_start, page_end, chunk_id)
    }
}

/// Citation tag for a chunk.
pub fn format_citation(chunk: &Chunk) -> String {
    citation(chunk.page_start, chunk.page_end, &chunk.chunk_id)
}

/// Clean chunk text for prompt context.
///
/// Front-matter boilerplate (abstract markers, keyword lists, author
/// email addresses) wastes budget and invites the model to cite it.
/// If an "introduction" marker exists, everything before it goes;
/// otherwise a leading abstract marker and a keywords run (up to the next
/// numbered section heading) are stripped. Whitespace runs collapse to
/// single spaces either way.
pub fn clean_context_text(text: &str) -> String {
    let email_re = Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")
        .expect("static regex");
    let intro_re = Regex::new(r"(?i)introduction").expect("static regex");
    let abstract_re = Regex::new(r"(?i)^\s*abstract\.?\s*").expect("static regex");
    let keywords_re = Regex::new(r"(?i)\bkeywords?\s*:").expect("static regex");
    let section_re = Regex::new(r"\b\d+\.?\s").expect("static regex");

    let text = email_re.replace_all(text, "");

    let cleaned = if let Some(m) = intro_re.find(&text) {
        text[m.start()..].to_string()
    } else {
        let mut t = abstract_re.replace(&text, "").to_string();
        if let Some((kw_start, kw_end)) = keywords_re.find(&t).map(|m| (m.start(), m.end())) {
            let cut_end = section_re
                .find(&t[kw_end..])
                .map(|m| kw_end + m.start())
                .unwrap_or(t.len());
            t.replace_range(kw_start..cut_end, "");
        }
        t
    };

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    if budget <= 3 {
        // Too small to fit an ellipsis; hard cut.
        return text.chars().take(budget).collect();
    }
    let mut out: String = text.chars().take(budget - 1).collect();
    out.push('\u{2026}');
    out
}

/// Assemble the generation prompt: instruction preamble, budgeted context
/// blocks in retrieval order, the question, and a final-answer cue.
/// Deterministic for the same inputs and budget.
pub fn build_answer_prompt(
    question: &str,
    retrieved: &[RetrievedChunk],
    context_char_budget: usize,
) -> String {
    let budget = context_char_budget.max(MIN_CONTEXT_CHARS);
    let delim_len = CONTEXT_DELIMITER.chars().count();

    let mut blocks: Vec<String> = Vec::new();
    let mut remaining = budget as i64;
    let mut context_num = 1usize;

    for (i, r) in retrieved.iter().enumerate() {
        if remaining <= 0 {
            break;
        }
        let chunks_remaining = (retrieved.len() - i) as i64;
        let allotment = std::cmp::max(MIN_CHUNK_CHARS as i64, remaining / chunks_remaining);

        let section = r.chunk.section_title.as_deref().unwrap_or("N/A");
        let header = format!(
            "[Context {}] {}\nDocument: {}\nSection: {}\nText:\n",
            context_num,
            format_citation(&r.chunk),
            r.chunk.book_title,
            section
        );
        let text_budget = allotment - header.chars().count() as i64;
        if text_budget <= 0 {
            // Skipped entirely; the slot number is not consumed.
            continue;
        }

        let text = truncate_chars(&clean_context_text(&r.chunk.text), text_budget as usize);
        if text.is_empty() {
            continue;
        }
        let block = format!("{}{}", header, text);
        remaining -= (block.chars().count() + delim_len) as i64;
        blocks.push(block);
        context_num += 1;
    }

    let context = if blocks.is_empty() {
        "(no context retrieved)".to_string()
    } else {
        blocks.join(CONTEXT_DELIMITER)
    };

    format!(
        "You are a careful textbook QA assistant.\n\
         Answer the question using ONLY the provided context.\n\
         If the evidence is insufficient, reply exactly: Not enough evidence in the provided text.\n\
         \n\
         Requirements:\n\
         - Do not use outside knowledge.\n\
         - Keep the answer concise and factual.\n\
         - Add citations at the end of EACH paragraph in this exact style: [p.12\u{2013}13 | chunk_0042]\n\
         - If multiple citations support a paragraph, include multiple citation tags.\n\
         \n\
         Question:\n\
         {}\n\
         \n\
         Context:\n\
         {}\n\
         \n\
         Final answer:\n",
        question, context
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retrieved(id: usize, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                chunk_id: crate::models::make_chunk_id(id),
                book_title: "Physics Vol. 1".to_string(),
                source_pdf: "physics.pdf".to_string(),
                page_start: 10 + id as u32,
                page_end: 10 + id as u32,
                section_title: Some("Heat".to_string()),
                token_estimate: 1,
                text: text.to_string(),
            },
            dense_score: 0.5,
            sparse_score: 0.5,
            hybrid_score: 0.5,
            rank: id,
        }
    }

    #[test]
    fn test_citation_single_page() {
        assert_eq!(citation(12, 12, "chunk_0007"), "[p.12 | chunk_0007]");
    }

    #[test]
    fn test_citation_page_range_uses_en_dash() {
        assert_eq!(citation(12, 13, "chunk_0007"), "[p.12\u{2013}13 | chunk_0007]");
    }

    #[test]
    fn test_clean_strips_emails() {
        let out = clean_context_text("Contact alice.smith@example.edu for data.");
        assert!(!out.contains('@'));
        assert!(out.contains("Contact"));
        assert!(out.contains("for data."));
    }

    #[test]
    fn test_clean_drops_preamble_before_introduction() {
        let out = clean_context_text(
            "Abstract. Results summary here. Keywords: heat, gas. 1 Introduction The study begins.",
        );
        assert!(out.to_lowercase().starts_with("introduction"));
        assert!(out.contains("The study begins."));
        assert!(!out.contains("Results summary"));
    }

    #[test]
    fn test_clean_strips_abstract_and_keywords_without_introduction() {
        let out =
            clean_context_text("Abstract. Keywords: heat, entropy, gas laws 2. Methods We measured things.");
        assert!(!out.to_lowercase().contains("keywords"));
        assert!(!out.to_lowercase().contains("abstract"));
        assert!(out.contains("Methods We measured things."));
    }

    #[test]
    fn test_clean_collapses_whitespace() {
        assert_eq!(clean_context_text("a  b\n\nc\td"), "a b c d");
    }

    #[test]
    fn test_truncate_appends_ellipsis() {
        let out = truncate_chars("abcdefghij", 6);
        assert_eq!(out.chars().count(), 6);
        assert!(out.ends_with('\u{2026}'));
    }

    #[test]
    fn test_truncate_hard_cut_when_tiny() {
        assert_eq!(truncate_chars("abcdefghij", 3), "abc");
        assert_eq!(truncate_chars("abcdefghij", 0), "");
    }

    #[test]
    fn test_truncate_no_op_when_within_budget() {
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_prompt_contains_contract_and_question() {
        let prompt = build_answer_prompt("What is entropy?", &[retrieved(1, "Entropy is disorder.")], 2000);
        assert!(prompt.contains("Not enough evidence in the provided text."));
        assert!(prompt.contains("What is entropy?"));
        assert!(prompt.contains("[Context 1] [p.11 | chunk_0001]"));
        assert!(prompt.contains("Document: Physics Vol. 1"));
        assert!(prompt.contains("Section: Heat"));
        assert!(prompt.ends_with("Final answer:\n"));
    }

    #[test]
    fn test_prompt_no_context_placeholder() {
        let prompt = build_answer_prompt("Anything?", &[], 2000);
        assert!(prompt.contains("(no context retrieved)"));
    }

    #[test]
    fn test_budget_enforcement_drops_tail_chunks() {
        let chunks: Vec<RetrievedChunk> = (1..=5)
            .map(|i| retrieved(i, &"x".repeat(1000)))
            .collect();
        let prompt = build_answer_prompt("Q?", &chunks, 500);

        let context_start = prompt.find("Context:\n").unwrap() + "Context:\n".len();
        let context_end = prompt.rfind("\n\nFinal answer:").unwrap();
        let context = &prompt[context_start..context_end];

        // Every emitted block fits its minimum allotment; the overshoot is
        // bounded by one minimum-sized block.
        assert!(
            context.chars().count() <= 500 + MIN_CHUNK_CHARS,
            "context too large: {}",
            context.chars().count()
        );
        // Later chunks are dropped outright, not truncated to stubs.
        assert!(context.contains("[Context 1]"));
        assert!(!context.contains("[Context 4]"));
        for block in context.split(CONTEXT_DELIMITER) {
            let text = block.split("Text:\n").nth(1).unwrap_or("");
            assert!(!text.is_empty());
        }
    }

    #[test]
    fn test_budget_floor_applies() {
        // A budget below the floor behaves like the floor.
        let chunks = vec![retrieved(1, &"y".repeat(1000))];
        let low = build_answer_prompt("Q?", &chunks, 10);
        let floor = build_answer_prompt("Q?", &chunks, MIN_CONTEXT_CHARS);
        assert_eq!(low, floor);
    }

    #[test]
    fn test_determinism() {
        let chunks = vec![retrieved(1, "alpha"), retrieved(2, "beta")];
        assert_eq!(
            build_answer_prompt("Q?", &chunks, 800),
            build_answer_prompt("Q?", &chunks, 800)
        );
    }
}
