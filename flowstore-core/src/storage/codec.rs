//! Chunk codec
//!
//! Splits block content into ordered, size-bounded chunks:
//! - Text: plain UTF-8 byte windows of exactly `chunk_size` (last may be shorter)
//! - Structured arrays: one compact JSON record per line (JSON Lines), packed
//!   greedily so that no record is ever split across chunks
//! - Structured non-array values: a single one-line chunk
//!
//! Encoding is deterministic: identical input always yields byte-identical
//! chunks with identical names. Orphan reconciliation relies on this.

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::storage::types::ContentType;

pub const TEXT_MIME: &str = "text/plain";
pub const JSONL_MIME: &str = "application/jsonl";
pub const JSON_MIME: &str = "application/json";

/// One encoded chunk, ready for upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedChunk {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub index: usize,
}

impl EncodedChunk {
    fn new(index: usize, ext: &str, mime_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: chunk_name(index, ext),
            mime_type: mime_type.to_string(),
            bytes,
            index,
        }
    }
}

/// `chunk_{index:06}.{ext}`
pub fn chunk_name(index: usize, ext: &str) -> String {
    format!("chunk_{:06}.{}", index, ext)
}

/// Encode `content` into chunks. Never fails: structured content that is not
/// valid JSON is chunked as text. A `chunk_size` of zero is treated as one.
pub fn encode(content: &str, content_type: ContentType, chunk_size: usize) -> Vec<EncodedChunk> {
    let chunk_size = chunk_size.max(1);

    match content_type {
        ContentType::Text => encode_text(content, chunk_size),
        ContentType::Structured => match serde_json::from_str::<Value>(content) {
            Ok(Value::Array(records)) => encode_records(&records, chunk_size),
            Ok(value) => {
                let mut line = value.to_string().into_bytes();
                line.push(b'\n');
                vec![EncodedChunk::new(0, "json", JSON_MIME, line)]
            }
            Err(e) => {
                tracing::debug!("Structured content is not valid JSON ({}), chunking as text", e);
                encode_text(content, chunk_size)
            }
        },
    }
}

fn encode_text(content: &str, chunk_size: usize) -> Vec<EncodedChunk> {
    content
        .as_bytes()
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, window)| EncodedChunk::new(index, "txt", TEXT_MIME, window.to_vec()))
        .collect()
}

fn encode_records(records: &[Value], chunk_size: usize) -> Vec<EncodedChunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<u8> = Vec::new();

    for record in records {
        let mut line = record.to_string().into_bytes();
        line.push(b'\n');

        // Close the current chunk if this record would overflow it. A record
        // that alone exceeds the limit still lands in a chunk of its own.
        if !current.is_empty() && current.len() + line.len() > chunk_size {
            let index = chunks.len();
            chunks.push(EncodedChunk::new(index, "jsonl", JSONL_MIME, std::mem::take(&mut current)));
        }
        current.extend_from_slice(&line);
    }

    // An empty array still needs one chunk to decode back to `[]`
    if !current.is_empty() || chunks.is_empty() {
        let index = chunks.len();
        chunks.push(EncodedChunk::new(index, "jsonl", JSONL_MIME, current));
    }

    chunks
}

/// Reassemble content from chunks (any order; sorted by index here).
///
/// Text chunks are concatenated before UTF-8 decoding, so multi-byte
/// characters split across windows are restored. JSON Lines chunks are
/// reassembled into a compact JSON array.
pub fn decode(chunks: &[EncodedChunk]) -> Result<String> {
    let mut ordered: Vec<&EncodedChunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.index);

    let Some(first) = ordered.first() else {
        return Ok(String::new());
    };
    let mime = first.mime_type.clone();
    if ordered.iter().any(|c| c.mime_type != mime) {
        return Err(anyhow!("Cannot decode chunks with mixed mime types"));
    }

    let bytes: Vec<u8> = ordered.iter().flat_map(|c| c.bytes.iter().copied()).collect();
    let text = String::from_utf8(bytes).context("Chunk data is not valid UTF-8")?;

    match mime.as_str() {
        TEXT_MIME => Ok(text),
        JSON_MIME => {
            let value: Value = serde_json::from_str(text.trim_end())?;
            Ok(value.to_string())
        }
        JSONL_MIME => {
            let records = split_records(&text)?;
            Ok(Value::Array(records).to_string())
        }
        other => Err(anyhow!("Unsupported chunk mime type: {}", other)),
    }
}

/// Parse a JSON Lines payload into its records
pub fn split_records(text: &str) -> Result<Vec<Value>> {
    text.lines()
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str::<Value>(line).with_context(|| format!("Invalid record line: {}", line)))
        .collect()
}
