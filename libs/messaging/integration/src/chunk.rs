//! Chunking and reassembly
//!
//! Large payloads are split into records that share an `x-message-id` and
//! carry their position in `x-chunk-id` / `x-chunks-count`. On the consumer
//! side a [`ChunkBuffer`] joins them back together.
//!
//! The buffer is aligned with the consumer's commit boundaries: entries
//! completed in a batch are dropped on commit, every entry touched by a batch
//! is dropped on rollback so redelivery rebuilds it from scratch.

use crate::message::{header_names, MessageHeaders, Offset};
use crate::{IntegrationError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One part of a chunked message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    pub message_id: String,
    pub index: usize,
    pub count: usize,
    pub content: Vec<u8>,
}

impl MessageChunk {
    /// Read chunk metadata from the headers.
    ///
    /// Returns `Ok(None)` when the record is not a chunk.
    pub fn from_headers(headers: &MessageHeaders, payload: Option<&[u8]>) -> Result<Option<Self>> {
        let Some(index) = headers.get(header_names::CHUNK_ID) else {
            return Ok(None);
        };

        let message_id = headers
            .get(header_names::MESSAGE_ID)
            .ok_or_else(|| {
                IntegrationError::invalid_chunk(format!(
                    "'{}' header is missing",
                    header_names::MESSAGE_ID
                ))
            })?
            .to_string();

        let index: usize = index.parse().map_err(|_| {
            IntegrationError::invalid_chunk(format!("invalid chunk index '{}'", index))
        })?;

        let count: usize = match headers.get_parsed(header_names::CHUNKS_COUNT) {
            Some(Ok(count)) => count,
            _ => {
                return Err(IntegrationError::invalid_chunk(format!(
                    "'{}' header is missing or invalid for message {}",
                    header_names::CHUNKS_COUNT,
                    message_id
                )))
            }
        };

        if index >= count {
            return Err(IntegrationError::invalid_chunk(format!(
                "chunk {} out of range for message {} with {} chunks",
                index, message_id, count
            )));
        }

        let content = payload
            .ok_or_else(|| {
                IntegrationError::invalid_chunk(format!(
                    "chunk {} of message {} has no payload",
                    index, message_id
                ))
            })?
            .to_vec();

        Ok(Some(Self {
            message_id,
            index,
            count,
            content,
        }))
    }

    /// Write chunk metadata to the headers
    pub fn write_headers(&self, headers: &mut MessageHeaders) {
        headers.set(header_names::MESSAGE_ID, &self.message_id);
        headers.set(header_names::CHUNK_ID, self.index);
        headers.set(header_names::CHUNKS_COUNT, self.count);
    }

    /// Split a payload into chunks of at most `size` bytes
    pub fn split(message_id: &str, payload: &[u8], size: usize) -> Vec<MessageChunk> {
        let parts: Vec<&[u8]> = payload.chunks(size.max(1)).collect();
        let count = parts.len();
        parts
            .into_iter()
            .enumerate()
            .map(|(index, part)| MessageChunk {
                message_id: message_id.to_string(),
                index,
                count,
                content: part.to_vec(),
            })
            .collect()
    }
}

/// Remove chunk metadata, leaving the headers of the joined message
pub fn strip_chunk_headers(headers: &mut MessageHeaders) {
    headers.remove(header_names::MESSAGE_ID);
    headers.remove(header_names::CHUNK_ID);
    headers.remove(header_names::CHUNKS_COUNT);
}

#[derive(Debug)]
struct ReassemblyEntry {
    count: usize,
    parts: BTreeMap<usize, Vec<u8>>,
    offsets: Vec<Offset>,
    created_at: Instant,
}

impl ReassemblyEntry {
    fn new(count: usize) -> Self {
        Self {
            count,
            parts: BTreeMap::new(),
            offsets: Vec::new(),
            created_at: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        (0..self.count).all(|index| self.parts.contains_key(&index))
    }

    fn join(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.parts.values().map(Vec::len).sum());
        for part in self.parts.values() {
            payload.extend_from_slice(part);
        }
        payload
    }
}

/// A fully reassembled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedMessage {
    pub message_id: String,
    pub payload: Vec<u8>,
    /// Offsets of every record that carried a chunk
    pub offsets: Vec<Offset>,
}

/// Per-consumer reassembly buffer
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    entries: HashMap<String, ReassemblyEntry>,
    completed: HashSet<String>,
    touched: HashSet<String>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a chunk and return the joined message once every part is present.
    ///
    /// A redelivered index replaces the bytes stored for it. Chunks whose
    /// index is outside `0..count` are ignored.
    pub fn join_if_complete(
        &mut self,
        chunk: &MessageChunk,
        offset: Option<&Offset>,
    ) -> Option<JoinedMessage> {
        if chunk.index >= chunk.count {
            warn!(
                "Ignoring chunk {} of message {} with {} chunks",
                chunk.index, chunk.message_id, chunk.count
            );
            return None;
        }

        let entry = self
            .entries
            .entry(chunk.message_id.clone())
            .or_insert_with(|| ReassemblyEntry::new(chunk.count));

        if entry.count != chunk.count {
            warn!(
                "Chunk count of message {} changed from {} to {}, restarting reassembly",
                chunk.message_id, entry.count, chunk.count
            );
            let stale = std::mem::replace(entry, ReassemblyEntry::new(chunk.count));
            entry.offsets = stale.offsets;
        }

        entry.parts.insert(chunk.index, chunk.content.clone());
        if let Some(offset) = offset {
            if !entry.offsets.contains(offset) {
                entry.offsets.push(offset.clone());
            }
        }
        self.touched.insert(chunk.message_id.clone());

        if !entry.is_complete() {
            debug!(
                "Chunk {}/{} of message {} buffered",
                chunk.index + 1,
                chunk.count,
                chunk.message_id
            );
            return None;
        }

        debug!(
            "Message {} joined from {} chunks",
            chunk.message_id, chunk.count
        );
        self.completed.insert(chunk.message_id.clone());
        Some(JoinedMessage {
            message_id: chunk.message_id.clone(),
            payload: entry.join(),
            offsets: entry.offsets.clone(),
        })
    }

    /// Drop the entries completed since the last boundary
    pub fn commit(&mut self) {
        for message_id in self.completed.drain() {
            self.entries.remove(&message_id);
        }
        self.touched.clear();
    }

    /// Drop every entry touched since the last boundary and return the
    /// offsets of the records that carried its chunks
    pub fn rollback(&mut self) -> Vec<Offset> {
        let mut offsets = Vec::new();
        for message_id in self.touched.drain() {
            if let Some(entry) = self.entries.remove(&message_id) {
                offsets.extend(entry.offsets);
            }
        }
        self.completed.clear();
        offsets
    }

    /// Number of incomplete entries
    pub fn pending_entries(&self) -> usize {
        self.entries.values().filter(|e| !e.is_complete()).count()
    }

    /// Age of the oldest incomplete entry
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.entries
            .values()
            .filter(|e| !e.is_complete())
            .map(|e| e.created_at)
            .min()
            .map(|created_at| created_at.elapsed())
    }
}
