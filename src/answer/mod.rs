//! Turning retrieved chunks into an answer.
//!
//! With an external provider the chunks become the context of a single
//! completion request. Without one, or when the request fails, the answer is
//! a quoted extract of the best chunks. Either way nothing is said that the
//! retrieved text does not support.

#[cfg(test)]
mod tests;

use std::fmt::Write as _;

use tracing::{debug, warn};

use crate::config::AnswerConfig;
use crate::generation::GenerationBackend;
use crate::retrieval::RetrievedChunk;

/// Returned when no retrieved chunk is relevant enough to answer from
pub const NO_ANSWER: &str =
    "I don't know. No relevant information was found in the knowledge base.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using only the \
provided context. If the answer cannot be found in the context, say that you don't know. Cite \
sources as (file, page N) when relevant. Keep answers concise.";

const EXTRACT_HEADER: &str =
    "No generative model was used. Most relevant passages from your documents:";

const SOURCE_EXCERPT_CHARS: usize = 200;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    /// Written by the external provider from the retrieved context
    Generative,
    /// Quoted from the retrieved chunks
    Extractive,
    /// Nothing relevant was retrieved
    NoAnswer,
}

impl AnswerMode {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generative => "generative",
            Self::Extractive => "extractive",
            Self::NoAnswer => "no answer",
        }
    }
}

/// A chunk the answer was drawn from
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub source: String,
    pub page: u32,
    pub excerpt: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposedAnswer {
    pub text: String,
    pub mode: AnswerMode,
    pub sources: Vec<Source>,
}

impl ComposedAnswer {
    fn no_answer() -> Self {
        Self {
            text: NO_ANSWER.to_string(),
            mode: AnswerMode::NoAnswer,
            sources: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct AnswerComposer {
    backend: GenerationBackend,
    config: AnswerConfig,
}

impl AnswerComposer {
    #[inline]
    pub fn new(backend: GenerationBackend, config: AnswerConfig) -> Self {
        Self { backend, config }
    }

    #[inline]
    pub fn backend(&self) -> &GenerationBackend {
        &self.backend
    }

    /// The answer text alone
    #[inline]
    pub async fn answer(&self, query: &str, retrieved: &[RetrievedChunk]) -> String {
        self.compose(query, retrieved).await.text
    }

    /// Answer `query` from `retrieved`, reporting the mode used and the
    /// chunks the answer drew on. Never fails: provider errors fall back to
    /// an extractive answer.
    #[inline]
    pub async fn compose(&self, query: &str, retrieved: &[RetrievedChunk]) -> ComposedAnswer {
        let mut relevant: Vec<&RetrievedChunk> = retrieved
            .iter()
            .filter(|chunk| chunk.score >= self.config.min_relevance)
            .collect();
        relevant.sort_by(|a, b| b.score.total_cmp(&a.score));

        if relevant.is_empty() {
            debug!(
                "None of {} retrieved chunks reached relevance {}",
                retrieved.len(),
                self.config.min_relevance
            );
            return ComposedAnswer::no_answer();
        }

        if let GenerationBackend::External(generator) = &self.backend {
            let (prompt, used) = build_prompt(query, &relevant, self.config.context_char_budget);
            match generator.generate(SYSTEM_PROMPT, &prompt).await {
                Ok(text) if !text.trim().is_empty() => {
                    return ComposedAnswer {
                        text: text.trim().to_string(),
                        mode: AnswerMode::Generative,
                        sources: relevant.iter().take(used).map(|c| to_source(c)).collect(),
                    };
                }
                Ok(_) => warn!("Provider returned an empty answer, falling back to extract"),
                Err(e) => warn!("Generation failed, falling back to extract: {}", e),
            }
        }

        extractive_answer(&relevant, self.config.excerpt_char_budget)
    }
}

fn label(chunk: &RetrievedChunk) -> String {
    format!("{} (page {})", chunk.metadata.source, chunk.metadata.page)
}

/// Context block of labelled chunks within `budget` characters, followed by
/// the question. Returns the prompt and how many chunks it includes.
fn build_prompt(query: &str, relevant: &[&RetrievedChunk], budget: usize) -> (String, usize) {
    let mut context = String::new();
    let mut used_chars = 0;
    let mut used = 0;

    for chunk in relevant {
        let block = format!("[{}]\n{}\n\n", label(chunk), chunk.metadata.text.trim());
        let block_chars = block.chars().count();

        if used_chars + block_chars > budget {
            if used == 0 {
                context.push_str(&truncate_chars(&block, budget));
                context.push_str("\n\n");
                used = 1;
            }
            break;
        }

        context.push_str(&block);
        used_chars += block_chars;
        used += 1;
    }

    let mut prompt = String::with_capacity(context.len() + query.len() + 32);
    prompt.push_str("Context:\n\n");
    prompt.push_str(&context);
    let _ = write!(prompt, "Question: {}\nAnswer:", query.trim());
    (prompt, used)
}

/// Quote the best chunks, up to `budget` characters of chunk text. The
/// first chunk is always quoted, truncated if it alone exceeds the budget.
fn extractive_answer(relevant: &[&RetrievedChunk], budget: usize) -> ComposedAnswer {
    let mut text = String::from(EXTRACT_HEADER);
    let mut sources = Vec::new();
    let mut remaining = budget;

    for chunk in relevant {
        let passage = collapse_whitespace(&chunk.metadata.text);
        let passage_chars = passage.chars().count();

        let quoted = if sources.is_empty() && passage_chars > remaining {
            remaining = 0;
            truncate_chars(&passage, budget)
        } else if passage_chars > remaining {
            break;
        } else {
            remaining -= passage_chars;
            passage
        };

        let _ = write!(text, "\n\n\"{}\"\n({})", quoted, label(chunk));
        sources.push(to_source(chunk));
    }

    ComposedAnswer {
        text,
        mode: AnswerMode::Extractive,
        sources,
    }
}

fn to_source(chunk: &RetrievedChunk) -> Source {
    Source {
        source: chunk.metadata.source.clone(),
        page: chunk.metadata.page,
        excerpt: truncate_chars(&collapse_whitespace(&chunk.metadata.text), SOURCE_EXCERPT_CHARS),
        score: chunk.score,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.chars().count());
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push_str(ELLIPSIS);
    truncated
}
