// Embedding content preparation.
//
// Splits page text into bounded, overlapping segments and hashes each one,
// so resubmitting identical content dedupes naturally against the store's
// upsert-by-hash semantics. Everything here is deterministic: the same
// input always yields the same segments and the same hashes.

use crate::config::ChunkingConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One page of extracted document text, as handed over by the (external)
/// extraction step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

/// One bounded segment of a page, ready to embed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub page: u32,
    /// Position of this segment within its page.
    pub index: usize,
    pub text: String,
    /// Hex SHA-256 of `text`; the store's idempotency key. Opaque to the
    /// rest of the protocol.
    pub content_hash: String,
}

/// Hex SHA-256 of a segment's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Split `text` into windows of at most `max_chars` characters, each
/// overlapping the previous by `overlap_chars`, trimmed, empties dropped.
///
/// Windows are measured in chars, not bytes, so multi-byte text never
/// splits inside a code point.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let max = config.max_chars.max(1);
    let overlap = config.overlap_chars.min(max - 1);
    let step = max - overlap;

    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + max).min(chars.len());
        let segment: String = chars[start..end].iter().collect();
        let trimmed = segment.trim();
        if !trimmed.is_empty() {
            segments.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }

    segments
}

/// Chunk every page, attaching per-segment hashes.
pub fn prepare_pages(pages: &[PageText], config: &ChunkingConfig) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|page| {
            split_text(&page.text, config)
                .into_iter()
                .enumerate()
                .map(|(index, text)| {
                    let content_hash = content_hash(&text);
                    Chunk {
                        page: page.page,
                        index,
                        text,
                        content_hash,
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Payload for an `embed` job.
pub fn embedding_payload(document_id: &str, chunks: &[Chunk]) -> serde_json::Value {
    serde_json::json!({
        "document_id": document_id,
        "chunks": chunks,
    })
}
