use crate::config::Config;
use crate::document::Document;
use std::collections::VecDeque;

/// Boundaries tried in order: paragraph, line, word, character
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// The actual text content of this chunk
    pub text: String,
    /// Estimated token count for this chunk
    pub token_count: usize,
    /// Name of the file this chunk was cut from
    pub source: String,
    /// Page, row or sheet index inherited from the document
    pub page: Option<usize>,
    /// Position of this chunk among the chunks of its document
    pub chunk_index: usize,
    /// Byte offset of this chunk in the document text
    pub start_position: usize,
}

/// Splits text into overlapping windows along the largest boundary that fits.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// Sizes are in characters. Overlap is clamped below the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        TextSplitter {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.chunk_chars(), config.overlap_chars())
    }

    /// Split every document, propagating source metadata to its chunks
    pub fn split_documents(&self, documents: &[Document]) -> Vec<TextChunk> {
        let mut chunks = Vec::new();

        for document in documents {
            let mut search_from = 0;
            for (chunk_index, text) in self.split_text(&document.text).into_iter().enumerate() {
                let start_position = document.text[search_from..]
                    .find(&text)
                    .map(|offset| offset + search_from)
                    .unwrap_or(search_from);
                search_from = start_position
                    + text.chars().next().map(char::len_utf8).unwrap_or(0);

                chunks.push(TextChunk {
                    token_count: estimate_token_count(&text),
                    text,
                    source: document.source.clone(),
                    page: document.page,
                    chunk_index,
                    start_position,
                });
            }
        }

        chunks
    }

    /// Split a single text into trimmed, non-empty chunks
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Use the first separator present in the text; "" always matches
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (idx, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                finer = &[];
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                finer = &separators[idx + 1..];
                break;
            }
        }

        let mut final_chunks = Vec::new();
        let mut fitting: Vec<String> = Vec::new();

        for piece in split_keep_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                final_chunks.extend(self.merge_splits(&fitting));
                fitting.clear();
            }
            if finer.is_empty() {
                final_chunks.push(piece);
            } else {
                final_chunks.extend(self.split_recursive(&piece, finer));
            }
        }

        if !fitting.is_empty() {
            final_chunks.extend(self.merge_splits(&fitting));
        }

        final_chunks
    }

    /// Greedily pack pieces into chunks, carrying a tail of up to
    /// `chunk_overlap` characters into the next chunk.
    fn merge_splits(&self, pieces: &[String]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !current.is_empty() {
                push_joined(&current, &mut chunks);

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }

            current.push_back(piece);
            total += len;
        }

        push_joined(&current, &mut chunks);
        chunks
    }
}

/// Split on `separator`, keeping it at the start of the following piece
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut last = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > last {
            pieces.push(text[last..idx].to_string());
        }
        last = idx;
    }
    if last < text.len() {
        pieces.push(text[last..].to_string());
    }
    pieces
}

fn push_joined(pieces: &VecDeque<&str>, chunks: &mut Vec<String>) {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Calculate approximate token count for a text
/// This is a very simple estimation - words plus punctuation
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}
