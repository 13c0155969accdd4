//! Deterministic stand-ins for the embedding model, and PDF fixtures, for unit tests

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary, encryption};

use crate::database::ChunkMetadata;
use crate::embeddings::{Embedder, normalize};
use crate::{RagError, Result};

pub(crate) const KEYWORDS: &[&str] = &[
    "warranty", "months", "battery", "charge", "flour", "oven", "shipping", "refund",
];

/// One dimension per keyword counting its occurrences, plus a constant
/// dimension so no text maps to the zero vector
#[derive(Debug, Default)]
pub(crate) struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub(crate) fn dimension() -> usize {
        KEYWORDS.len() + 1
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn vector_for(text: &str) -> Vec<f32> {
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
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| Self::vector_for(text)).collect())
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }
}

/// Embedder whose model can never be loaded
#[derive(Debug, Default)]
pub(crate) struct UnavailableEmbedder;

#[async_trait]
impl Embedder for UnavailableEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::ModelUnavailable(
            "test model is not installed".to_string(),
        ))
    }

    fn model_name(&self) -> &str {
        "unavailable-test"
    }
}

pub(crate) fn metadata(source: &str, page: u32, text: &str) -> ChunkMetadata {
    ChunkMetadata {
        chunk_id: 0,
        source: source.to_string(),
        source_path: format!("/docs/{source}"),
        page,
        chunk_index: 0,
        text: text.to_string(),
        created_at: "2024-01-01T00:00:00+00:00".to_string(),
    }
}

/// Write a PDF with one page per entry, each page drawing its lines of text
pub(crate) fn write_pdf(path: &Path, pages: &[&[&str]]) {
    build_pdf(pages)
        .save(path)
        .expect("should save test PDF");
}

fn build_pdf(pages: &[&[&str]]) -> Document {
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
        let mut operations = Vec::new();
        for (row, line) in lines.iter().enumerate() {
            let y = 750 - 20 * i64::try_from(row).expect("row fits in i64");
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
            operations.push(Operation::new("Td", vec![50.into(), y.into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
            operations.push(Operation::new("ET", vec![]));
        }
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
    doc
}

/// Padding string of the standard security handler
const PASSWORD_PAD: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Write a PDF encrypted with 40-bit RC4 (revision 2) that opens with
/// `user_password`. An empty user password gives a file restricted only by
/// its owner password.
pub(crate) fn write_encrypted_pdf(path: &Path, pages: &[&[&str]], user_password: &str) {
    let mut doc = build_pdf(pages);
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "Length" => 40,
        "O" => Object::string_literal(vec![0x5A_u8; 32]),
        // Printing and copying denied
        "P" => -3904,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    let file_id = Object::string_literal(b"pdf-qa-test-file".to_vec());
    doc.trailer.set("ID", vec![file_id.clone(), file_id]);

    let key = encryption::get_encryption_key(&doc, user_password, false)
        .expect("should derive encryption key");
    doc.get_object_mut(encrypt_id)
        .and_then(Object::as_dict_mut)
        .expect("encryption dictionary exists")
        .set("U", Object::string_literal(rc4(&key, &PASSWORD_PAD)));

    let ids: Vec<ObjectId> = doc
        .objects
        .keys()
        .copied()
        .filter(|id| *id != encrypt_id)
        .collect();
    for id in ids {
        let object = doc.objects.get_mut(&id).expect("object exists");
        // RC4 is symmetric: the per-object decryption of plaintext encrypts it
        let Ok(content) = encryption::decrypt_object(&key, id, object) else {
            continue;
        };
        match object {
            Object::Stream(stream) => stream.set_content(content),
            Object::String(bytes, _) => *bytes = content,
            _ => {}
        }
    }

    doc.save(path).expect("should save encrypted test PDF");
}

fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut state: Vec<u8> = (0..=255).collect();
    let mut j = 0u8;
    for i in 0..256 {
        j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
        state.swap(i, usize::from(j));
    }

    let (mut i, mut j) = (0u8, 0u8);
    data.iter()
        .map(|byte| {
            i = i.wrapping_add(1);
            j = j.wrapping_add(state[usize::from(i)]);
            state.swap(usize::from(i), usize::from(j));
            let index = state[usize::from(i)].wrapping_add(state[usize::from(j)]);
            byte ^ state[usize::from(index)]
        })
        .collect()
}
