//! Text chunking for the semantic index.
//!
//! Splits generated scripts into overlapping chunks, preferring paragraph
//! breaks, then line breaks, then word boundaries, before cutting mid-word.

/// Default chunk size in bytes.
pub const CHUNK_SIZE: usize = 1000;

/// Default overlap between consecutive chunks in bytes.
pub const CHUNK_OVERLAP: usize = 200;

/// Split text into chunks of at most `chunk_size` bytes with roughly
/// `overlap` bytes shared between consecutive chunks.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    debug_assert!(overlap < chunk_size);

    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let remaining = &text[start..];
        if remaining.len() <= chunk_size {
            let tail = remaining.trim();
            if !tail.is_empty() {
                chunks.push(tail.to_string());
            }
            break;
        }

        let window_end = floor_char_boundary(remaining, chunk_size);
        let window = &remaining[..window_end];

        // Prefer the latest natural break inside the window.
        let cut = window
            .rfind("\n\n")
            .or_else(|| window.rfind('\n'))
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window_end);

        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        let end = start + cut;
        // Step back by the overlap, but always make forward progress.
        let mut next = end.saturating_sub(overlap).max(start + 1);
        while !text.is_char_boundary(next) {
            next += 1;
        }
        start = next;
    }

    chunks
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
