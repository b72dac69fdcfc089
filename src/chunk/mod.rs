//! Text chunking with structure awareness
//!
//! This module splits parsed document text into retrieval-sized chunks while:
//! - Respecting markdown heading sections when present
//! - Splitting recursively on configured (or auto-detected) separators
//! - Falling back to paragraph/line/raw splitting with an overlap tail
//! - Covering the input losslessly: every chunk records its source span and
//!   the number of leading characters copied from its predecessor

mod boundaries;
mod separators;

pub use boundaries::{char_len, heading_sections, size_units};
pub use separators::{detect_separators, parse_separators, Separator};

use tracing::debug;

/// Chunk size used when a caller passes zero
pub const FALLBACK_CHUNK_SIZE: usize = 1000;

/// A byte range of the source text
///
/// `body_end` excludes a trailing literal separator run; size checks use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub start: usize,
    pub end: usize,
    pub body_end: usize,
}

impl Piece {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            body_end: end,
        }
    }

    pub fn with_body(start: usize, body_end: usize, end: usize) -> Self {
        Self {
            start,
            end,
            body_end,
        }
    }

    fn body(self) -> Piece {
        Piece::new(self.start, self.body_end.max(self.start))
    }
}

/// Options for [`split_text`]
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Target maximum chunk length in characters
    pub chunk_size: usize,

    /// Characters carried from the end of one chunk into the next
    pub overlap_size: usize,

    /// Separators tried in order; empty means auto-detect
    pub separators: Vec<Separator>,
}

impl ChunkOptions {
    pub fn new(chunk_size: usize, overlap_size: usize) -> Self {
        Self {
            chunk_size,
            overlap_size,
            separators: Vec::new(),
        }
    }

    pub fn with_separators(mut self, separators: Vec<Separator>) -> Self {
        self.separators = separators;
        self
    }
}

/// A text chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Overlap prefix followed by `source[start..end]`
    pub text: String,

    /// Byte offset of the chunk's own content in the source
    pub start: usize,

    /// Byte offset one past the content
    pub end: usize,

    /// Leading characters of `text` copied from the previous chunk
    pub overlap: usize,
}

impl Chunk {
    /// Text without the overlap prefix
    pub fn content(&self) -> &str {
        let skip = self
            .text
            .char_indices()
            .nth(self.overlap)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len());
        &self.text[skip..]
    }

    /// Length in characters, overlap included
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Split `text` into ordered chunks
///
/// `file_name` is only consulted for separator auto-detection (tabular
/// files split on newlines).
pub fn split_text(file_name: &str, text: &str, options: &ChunkOptions) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chunk_size = if options.chunk_size == 0 {
        FALLBACK_CHUNK_SIZE
    } else {
        options.chunk_size
    };

    let separators = if options.separators.is_empty() {
        detect_separators(file_name, text)
    } else {
        options.separators.clone()
    };

    debug!(
        file = file_name,
        chunk_size,
        overlap = options.overlap_size,
        separators = separators.len(),
        "Splitting text"
    );

    let mut splitter = Splitter {
        text,
        chunk_size,
        overlap_size: options.overlap_size,
        chunks: Vec::new(),
    };

    let whole = Piece::new(0, text.len());
    match heading_sections(text, whole) {
        Some(sections) => {
            for section in sections {
                splitter.split(section, &separators);
            }
        }
        None => splitter.split(whole, &separators),
    }

    splitter.chunks
}

struct Splitter<'a> {
    text: &'a str,
    chunk_size: usize,
    overlap_size: usize,
    chunks: Vec<Chunk>,
}

impl<'a> Splitter<'a> {
    fn split(&mut self, piece: Piece, separators: &[Separator]) {
        if char_len(self.text, piece.body()) <= self.chunk_size {
            self.emit(piece, 0);
            return;
        }

        match separators.split_first() {
            Some((sep, rest)) => {
                let parts = sep.split(self.text, piece);
                if parts.len() <= 1 {
                    self.split(piece, rest);
                    return;
                }
                for part in parts {
                    self.split(part, rest);
                }
            }
            None => self.split_by_size(piece),
        }
    }

    fn split_by_size(&mut self, piece: Piece) {
        let overlap = if self.overlap_size < self.chunk_size {
            self.overlap_size
        } else {
            0
        };
        let units = size_units(self.text, piece, self.chunk_size - overlap);

        let mut current: Option<Piece> = None;
        let mut current_len = 0;
        let mut carry = 0;

        for unit in units {
            let unit_len = char_len(self.text, unit);
            if let Some(pending) = current {
                if carry + current_len + unit_len > self.chunk_size {
                    carry = self.flush(pending, carry, overlap);
                    current = None;
                    current_len = 0;
                }
            }
            current = Some(match current {
                Some(pending) => Piece::new(pending.start, unit.end),
                None => unit,
            });
            current_len += unit_len;
        }

        if let Some(pending) = current {
            self.flush(pending, carry, overlap);
        }
    }

    /// Emit a size-split chunk; returns the overlap to carry into the next one
    fn flush(&mut self, piece: Piece, carry: usize, overlap: usize) -> usize {
        self.emit(piece, carry);
        match self.chunks.last() {
            Some(last) if overlap > 0 && last.char_len() >= overlap => overlap,
            _ => 0,
        }
    }

    fn emit(&mut self, piece: Piece, carry: usize) {
        let content = &self.text[piece.start..piece.end];
        if content.is_empty() {
            return;
        }
        if content.trim().is_empty() {
            self.emit_blank(piece);
            return;
        }

        let prefix = match (carry, self.chunks.last()) {
            (0, _) | (_, None) => String::new(),
            (n, Some(prev)) => tail_chars(&prev.text, n).to_string(),
        };
        let overlap = prefix.chars().count();

        // A trailing blank chunk is absorbed by the next real one when both fit
        if overlap == 0 {
            let content_len = char_len(self.text, piece);
            let absorb = self
                .chunks
                .last()
                .is_some_and(|last| last.is_blank() && last.char_len() + content_len <= self.chunk_size);
            if absorb {
                if let Some(mut last) = self.chunks.pop() {
                    last.text.push_str(content);
                    last.end = piece.end;
                    self.chunks.push(last);
                    return;
                }
            }
        }

        let mut text = prefix;
        text.push_str(content);
        self.chunks.push(Chunk {
            text,
            start: piece.start,
            end: piece.end,
            overlap,
        });
    }

    /// Fold whitespace into the previous chunk up to `chunk_size`; what does
    /// not fit becomes whitespace-only chunks of at most `chunk_size` chars
    fn emit_blank(&mut self, piece: Piece) {
        let mut start = piece.start;

        if let Some(last) = self.chunks.last_mut() {
            let room = self.chunk_size.saturating_sub(last.char_len());
            let split = advance_chars(self.text, start, piece.end, room);
            if split > start {
                last.text.push_str(&self.text[start..split]);
                last.end = split;
                start = split;
            }
        }

        while start < piece.end {
            let split = advance_chars(self.text, start, piece.end, self.chunk_size);
            self.chunks.push(Chunk {
                text: self.text[start..split].to_string(),
                start,
                end: split,
                overlap: 0,
            });
            start = split;
        }
    }
}

/// Byte offset `n` chars after `start`, capped at `end`
fn advance_chars(text: &str, start: usize, end: usize, n: usize) -> usize {
    text[start..end]
        .char_indices()
        .nth(n)
        .map(|(i, _)| start + i)
        .unwrap_or(end)
}

/// Last `n` chars of `s`
fn tail_chars(s: &str, n: usize) -> &str {
    let total = s.chars().count();
    if n >= total {
        return s;
    }
    let skip = s
        .char_indices()
        .nth(total - n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &s[skip..]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Strip overlaps and concatenate
    fn reconstruct(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.content()).collect()
    }

    fn prose_paragraph(len: usize, seed: &str) -> String {
        let mut s = String::new();
        while s.chars().count() < len {
            s.push_str(seed);
            s.push(' ');
        }
        s.chars().take(len).collect()
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        let opts = ChunkOptions::new(100, 10);
        assert!(split_text("a.md", "", &opts).is_empty());
        assert!(split_text("a.md", "  \n\t\n ", &opts).is_empty());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let opts = ChunkOptions::new(100, 10);
        let chunks = split_text("a.md", "hello world", &opts);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].overlap, 0);
    }

    #[test]
    fn test_paragraph_split_with_overlap() {
        // Paragraph breaks close out at offsets 900 and 1800
        let p1 = format!("{}\n\n", prose_paragraph(898, "lorem ipsum dolor"));
        let p2 = format!("{}\n\n", prose_paragraph(898, "sit amet consectetur"));
        let p3 = prose_paragraph(700, "adipiscing elit sed");
        let text = format!("{}{}{}", p1, p2, p3);
        assert_eq!(text.chars().count(), 2500);

        let chunks = split_text("notes.txt", &text, &ChunkOptions::new(1000, 100));
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.char_len() <= 1000, "chunk too long: {}", chunk.char_len());
        }
        for pair in chunks.windows(2) {
            let tail = tail_chars(&pair[0].text, 100);
            assert!(pair[1].text.starts_with(tail));
            assert_eq!(pair[1].overlap, 100);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_zero_overlap_shares_nothing() {
        let text = (0..40)
            .map(|i| format!("line number {} of the file", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_text("plain.txt", &text, &ChunkOptions::new(120, 0));
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.overlap == 0));
        assert_eq!(reconstruct(&chunks), text);
        let total: usize = chunks.iter().map(|c| c.char_len()).sum();
        assert_eq!(total, text.chars().count());
    }

    #[test]
    fn test_small_chunks_receive_no_overlap() {
        let text = format!("tiny\n\n{}", prose_paragraph(60, "word"));
        let mut splitter = Splitter {
            text: &text,
            chunk_size: 200,
            overlap_size: 50,
            chunks: Vec::new(),
        };

        // Shorter than the overlap: nothing is carried
        let carry = splitter.flush(Piece::new(0, 6), 0, 50);
        assert_eq!(carry, 0);

        let carry = splitter.flush(Piece::new(6, text.len()), carry, 50);
        assert_eq!(splitter.chunks[1].overlap, 0);
        assert_eq!(carry, 50);
        assert_eq!(reconstruct(&splitter.chunks), text);
    }

    #[test]
    fn test_overlap_property_holds_between_size_chunks() {
        let text = prose_paragraph(5000, "the quick brown fox jumps");
        let chunks = split_text("x.txt", &text, &ChunkOptions::new(300, 40));
        for pair in chunks.windows(2) {
            if pair[0].char_len() >= 40 && pair[1].char_len() >= 40 {
                let tail: String = tail_chars(&pair[0].text, 40).to_string();
                let head: String = pair[1].text.chars().take(40).collect();
                assert_eq!(tail, head);
            }
        }
        assert!(chunks.iter().all(|c| c.char_len() <= 300));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_headings_split_sections_first() {
        let text = "# Intro\nshort intro\n\n# Details\nmore details here\n";
        let chunks = split_text("doc.md", text, &ChunkOptions::new(1000, 100));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("# Intro"));
        assert!(chunks[1].text.starts_with("# Details"));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_literal_separator_recursion() {
        let opts = ChunkOptions::new(12, 0).with_separators(vec![
            Separator::Literal("|".to_string()),
            Separator::Literal(",".to_string()),
        ]);
        let text = "alpha,beta|gamma,delta,epsilon|zeta";
        let chunks = split_text("t.txt", text, &opts);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha,beta|", "gamma,", "delta,", "epsilon|", "zeta"]);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_length_bound_allows_one_separator() {
        let opts = ChunkOptions::new(5, 0).with_separators(vec![Separator::Literal(
            "--".to_string(),
        )]);
        let text = "abcde--fghij--k";
        let chunks = split_text("t.txt", text, &opts);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcde--", "fghij--", "k"]);
    }

    #[test]
    fn test_regex_separator_pieces_begin_with_match() {
        let opts = ChunkOptions::new(20, 0)
            .with_separators(vec![Separator::parse("/Article \\d+/").unwrap()]);
        let text = "Preamble. Article 1 first rule. Article 2 second rule.";
        let chunks = split_text("law.txt", text, &opts);
        assert!(chunks.len() >= 3);
        assert!(chunks[1].text.starts_with("Article 1"));
        assert!(chunks.iter().any(|c| c.text.starts_with("Article 2")));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_separator_without_matches_falls_through_to_size() {
        let opts = ChunkOptions::new(50, 0)
            .with_separators(vec![Separator::Literal("§".to_string())]);
        let text = prose_paragraph(160, "no section markers");
        let chunks = split_text("x.txt", &text, &opts);
        assert!(chunks.len() >= 4);
        assert!(chunks.iter().all(|c| c.char_len() <= 50));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_overlap_not_smaller_than_chunk_size_is_disabled() {
        let text = prose_paragraph(500, "abc def");
        let chunks = split_text("x.txt", &text, &ChunkOptions::new(100, 100));
        assert!(chunks.iter().all(|c| c.overlap == 0));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_multibyte_text_is_split_on_char_boundaries() {
        let text = "知识库检索".repeat(100);
        let chunks = split_text("cn.txt", &text, &ChunkOptions::new(64, 8));
        assert!(chunks.iter().all(|c| c.char_len() <= 64));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_long_blank_run_respects_chunk_size() {
        let text = format!("{}{}{}", "a".repeat(90), "\n".repeat(50), "b".repeat(90));
        let chunks = split_text("x.txt", &text, &ChunkOptions::new(100, 0));
        assert!(
            chunks.iter().all(|c| c.char_len() <= 100),
            "lens: {:?}",
            chunks.iter().map(Chunk::char_len).collect::<Vec<_>>()
        );
        assert_eq!(reconstruct(&chunks), text);
        assert!(chunks[0].text.starts_with(&"a".repeat(90)));
        assert!(chunks.last().unwrap().text.ends_with(&"b".repeat(90)));
    }

    #[test]
    fn test_blank_run_longer_than_chunk_size() {
        let text = format!("head{}tail", " \n".repeat(300));
        let chunks = split_text("x.txt", &text, &ChunkOptions::new(64, 8));
        assert!(chunks.iter().all(|c| c.char_len() <= 64));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_short_blank_run_still_folds_into_previous() {
        let text = format!("{}\n\n\n\n{}", "a".repeat(40), "b".repeat(90));
        let chunks = split_text("x.txt", &text, &ChunkOptions::new(100, 0));
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !c.is_blank()));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_csv_splits_rows() {
        let text = "name,age\nalice,30\nbob,41\n";
        let chunks = split_text("people.csv", text, &ChunkOptions::new(10, 0));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["name,age\n", "alice,30\n", "bob,41\n"]);
    }
}
