// Shared helpers for the integration tests: a keyword embedder that needs no
// model server, PDF fixtures and a configuration rooted in a temp directory

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use tempfile::TempDir;

use pdf_qa::Result;
use pdf_qa::config::Config;
use pdf_qa::embeddings::{Embedder, normalize};
use pdf_qa::generation::GenerationBackend;
use pdf_qa::pipeline::RagContext;

const KEYWORDS: &[&str] = &[
    "warranty", "months", "battery", "charge", "flour", "oven", "shipping", "refund",
];

/// Counts keyword occurrences, with one constant dimension so no text maps to
/// the zero vector
#[derive(Debug, Default)]
pub struct KeywordEmbedder;

impl KeywordEmbedder {
    pub fn dimension() -> usize {
        KEYWORDS.len() + 1
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = KEYWORDS
            .iter()
            .map(|keyword| lower.matches(keyword).count() as f32)
            .collect();
        vector.push(0.1);
        normalize(&mut vector).expect("keyword vectors are never zero");
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| Self::vector_for(text)).collect())
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config {
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    config.embedding.embedding_dimension =
        u32::try_from(KeywordEmbedder::dimension()).expect("small dimension");
    config.generation.enabled = false;
    config
}

pub async fn context_with(dir: &TempDir, backend: GenerationBackend) -> RagContext {
    RagContext::with_components(test_config(dir), Arc::new(KeywordEmbedder), backend)
        .await
        .expect("should build context")
}

pub async fn extractive_context(dir: &TempDir) -> RagContext {
    context_with(dir, GenerationBackend::None).await
}

/// Write `name` into `dir` as a PDF with one page per entry
pub fn pdf_in(dir: &TempDir, name: &str, pages: &[&[&str]]) -> PathBuf {
    let path = dir.path().join(name);
    write_pdf(&path, pages);
    path
}

pub fn write_pdf(path: &Path, pages: &[&[&str]]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for lines in pages {
        let operations: Vec<Operation> = lines
            .iter()
            .enumerate()
            .flat_map(|(row, line)| {
                let y = 750 - 20 * i64::try_from(row).expect("row fits in i64");
                [
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![50.into(), y.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*line)]),
                    Operation::new("ET", vec![]),
                ]
            })
            .collect();
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("content should encode"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    let count = i64::try_from(kids.len()).expect("page count fits in i64");
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("should save test PDF");
}
