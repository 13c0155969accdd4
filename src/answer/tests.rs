use super::*;
use crate::generation::TextGenerator;
use crate::test_support::metadata;
use crate::{RagError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Records every prompt and answers with a fixed reply
#[derive(Debug)]
struct ScriptedGenerator {
    reply: Result<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: Err(RagError::Provider("rate limited".to_string())),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock should not be poisoned").clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        assert!(system.contains("only the provided context"));
        self.prompts
            .lock()
            .expect("lock should not be poisoned")
            .push(prompt.to_string());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(e) => Err(RagError::Provider(e.to_string())),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn chunk(source: &str, page: u32, text: &str, score: f32) -> RetrievedChunk {
    RetrievedChunk {
        metadata: metadata(source, page, text),
        score,
    }
}

fn warranty_chunks() -> Vec<RetrievedChunk> {
    vec![
        chunk(
            "manual.pdf",
            1,
            "The warranty period is 24 months from purchase date.",
            0.82,
        ),
        chunk(
            "manual.pdf",
            4,
            "Warranty claims require the original receipt.",
            0.55,
        ),
        chunk("recipes.pdf", 2, "Sift the flour twice.", 0.05),
    ]
}

fn extractive_composer() -> AnswerComposer {
    AnswerComposer::new(GenerationBackend::None, AnswerConfig::default())
}

fn generative_composer(generator: Arc<ScriptedGenerator>) -> AnswerComposer {
    AnswerComposer::new(
        GenerationBackend::External(generator),
        AnswerConfig::default(),
    )
}

#[tokio::test]
async fn nothing_retrieved_means_no_answer() {
    let generator = ScriptedGenerator::replying("made up");
    let composer = generative_composer(Arc::clone(&generator));

    let answer = composer.compose("What is the warranty?", &[]).await;
    assert_eq!(answer.text, NO_ANSWER);
    assert_eq!(answer.mode, AnswerMode::NoAnswer);
    assert!(answer.sources.is_empty());
    assert!(generator.prompts().is_empty());
}

#[tokio::test]
async fn irrelevant_chunks_mean_no_answer() {
    let composer = extractive_composer();
    let retrieved = vec![
        chunk("recipes.pdf", 2, "Sift the flour twice.", 0.05),
        chunk("manual.pdf", 9, "Battery care.", 0.19),
    ];

    assert_eq!(composer.answer("What is the warranty?", &retrieved).await, NO_ANSWER);
}

#[tokio::test]
async fn extractive_answer_quotes_best_chunks() {
    let composer = extractive_composer();
    let answer = composer
        .compose("What is the warranty period?", &warranty_chunks())
        .await;

    assert_eq!(answer.mode, AnswerMode::Extractive);
    assert!(answer.text.starts_with(EXTRACT_HEADER));
    assert!(answer.text.contains("24 months"));
    assert!(answer.text.contains("(manual.pdf (page 1))"));
    assert!(answer.text.contains("original receipt"));
    assert!(!answer.text.contains("flour"));

    let pages: Vec<u32> = answer.sources.iter().map(|s| s.page).collect();
    assert_eq!(pages, vec![1, 4]);
}

#[tokio::test]
async fn extractive_answer_respects_budget() {
    let config = AnswerConfig {
        excerpt_char_budget: 60,
        ..AnswerConfig::default()
    };
    let composer = AnswerComposer::new(GenerationBackend::None, config);

    let answer = composer
        .compose("warranty?", &warranty_chunks())
        .await;
    assert!(answer.text.contains("24 months"));
    assert!(!answer.text.contains("original receipt"));
    assert_eq!(answer.sources.len(), 1);
}

#[tokio::test]
async fn oversized_first_chunk_is_truncated() {
    let config = AnswerConfig {
        excerpt_char_budget: 22,
        ..AnswerConfig::default()
    };
    let composer = AnswerComposer::new(GenerationBackend::None, config);

    let answer = composer
        .compose("warranty?", &warranty_chunks())
        .await;
    assert!(answer.text.contains("\"The warranty period...\""), "{}", answer.text);
    assert_eq!(answer.sources.len(), 1);
}

#[tokio::test]
async fn chunks_are_ranked_before_use() {
    let composer = extractive_composer();
    let mut retrieved = warranty_chunks();
    retrieved.reverse();

    let answer = composer.compose("warranty?", &retrieved).await;
    assert_eq!(answer.sources[0].page, 1);
}

#[tokio::test]
async fn generative_answer_uses_provider_text() {
    let generator = ScriptedGenerator::replying("  The warranty lasts 24 months (manual.pdf, page 1).\n");
    let composer = generative_composer(Arc::clone(&generator));

    let answer = composer
        .compose("What is the warranty period?", &warranty_chunks())
        .await;
    assert_eq!(answer.mode, AnswerMode::Generative);
    assert_eq!(
        answer.text,
        "The warranty lasts 24 months (manual.pdf, page 1)."
    );
    assert_eq!(answer.sources.len(), 2);

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    let prompt = &prompts[0];
    let first = prompt
        .find("[manual.pdf (page 1)]")
        .expect("best chunk should be in the prompt");
    let second = prompt
        .find("[manual.pdf (page 4)]")
        .expect("second chunk should be in the prompt");
    assert!(first < second);
    assert!(!prompt.contains("flour"));
    assert!(prompt.ends_with("Question: What is the warranty period?\nAnswer:"));
}

#[tokio::test]
async fn prompt_context_respects_budget() {
    let generator = ScriptedGenerator::replying("answer");
    let config = AnswerConfig {
        context_char_budget: 100,
        ..AnswerConfig::default()
    };
    let composer = AnswerComposer::new(
        GenerationBackend::External(Arc::clone(&generator) as Arc<dyn TextGenerator>),
        config,
    );

    let answer = composer.compose("warranty?", &warranty_chunks()).await;
    assert_eq!(answer.sources.len(), 1);
    let prompt = &generator.prompts()[0];
    assert!(prompt.contains("24 months"));
    assert!(!prompt.contains("original receipt"));
}

#[tokio::test]
async fn provider_failure_falls_back_to_extract() {
    let generator = ScriptedGenerator::failing();
    let composer = generative_composer(Arc::clone(&generator));

    let answer = composer
        .compose("What is the warranty period?", &warranty_chunks())
        .await;
    assert_eq!(answer.mode, AnswerMode::Extractive);
    assert!(answer.text.contains("24 months"));
    assert_eq!(generator.prompts().len(), 1);
}

#[tokio::test]
async fn blank_provider_reply_falls_back_to_extract() {
    let composer = generative_composer(ScriptedGenerator::replying("   \n"));

    let answer = composer.compose("warranty?", &warranty_chunks()).await;
    assert_eq!(answer.mode, AnswerMode::Extractive);
}

#[test]
fn source_excerpts_are_bounded() {
    let long_text = "word ".repeat(100);
    let source = to_source(&chunk("long.pdf", 3, &long_text, 0.9));

    assert!(source.excerpt.chars().count() <= SOURCE_EXCERPT_CHARS);
    assert!(source.excerpt.ends_with("..."));
    assert_eq!(source.page, 3);
}

#[test]
fn truncate_chars_handles_multibyte_text() {
    assert_eq!(truncate_chars("short", 10), "short");
    let truncated = truncate_chars(&"日本語".repeat(10), 8);
    assert_eq!(truncated.chars().count(), 8);
    assert!(truncated.ends_with("..."));
}

#[test]
fn answer_modes_have_labels() {
    assert_eq!(AnswerMode::Generative.as_str(), "generative");
    assert_eq!(AnswerMode::Extractive.as_str(), "extractive");
    assert_eq!(AnswerMode::NoAnswer.as_str(), "no answer");
}

#[test]
fn truncate_chars_never_exceeds_the_limit() {
    assert_eq!(truncate_chars("abcdefghij", 5), "ab...");

    let text = "Garantie über 24 Monate – ab Kaufdatum gültig";
    for max_chars in 3..text.chars().count() {
        let truncated = truncate_chars(text, max_chars);
        assert!(
            truncated.chars().count() <= max_chars,
            "{max_chars}: {truncated:?}"
        );
        assert!(truncated.ends_with("..."));
    }
}
