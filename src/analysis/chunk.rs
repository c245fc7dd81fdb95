//! Fixed-size pagination over large transcript text.
//!
//! Chunks are char-addressed contiguous slices, so boundaries never split a
//! code point and concatenating every chunk reconstructs the text exactly.
//! The pager itself is pure — session state lives in [`ChunkCursor`], owned
//! by the caller.

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk index {index} out of range for {total} chunks")]
    OutOfRange { index: usize, total: usize },
}

/// Number of chunks for `text` under `chunk_size` chars per chunk.
pub fn chunk_count(text: &str, chunk_size: usize) -> usize {
    assert!(chunk_size > 0, "chunk_size must be positive");
    let chars = text.chars().count();
    chars.div_ceil(chunk_size)
}

/// The `index`-th contiguous slice of `text`.
pub fn get_chunk(text: &str, chunk_size: usize, index: usize) -> Result<String, ChunkError> {
    let total = chunk_count(text, chunk_size);
    if index >= total {
        return Err(ChunkError::OutOfRange { index, total });
    }
    Ok(text
        .chars()
        .skip(index * chunk_size)
        .take(chunk_size)
        .collect())
}

/// Where one conversation stands in its paged reading of one document.
/// Ephemeral and derived — always recomputable from the text, the configured
/// chunk size, and the last index seen in the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCursor {
    pub document_id: String,
    pub conversation_id: String,
    pub index: usize,
    pub total: usize,
}

impl ChunkCursor {
    pub fn new(document_id: &str, conversation_id: &str, index: usize, total: usize) -> Self {
        Self {
            document_id: document_id.to_string(),
            conversation_id: conversation_id.to_string(),
            index,
            total,
        }
    }

    /// The next chunk to read, if the document is not yet exhausted.
    pub fn next_index(&self) -> Option<usize> {
        if self.index + 1 < self.total {
            Some(self.index + 1)
        } else {
            None
        }
    }

    pub fn exhausted(&self) -> bool {
        self.next_index().is_none()
    }
}
