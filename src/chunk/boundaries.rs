//! Structural boundaries: markdown headings and size-bounded units

use super::Piece;
use super::separators::fold_blank_parts;
use regex::Regex;
use std::sync::OnceLock;

/// Minimum number of heading lines before sections are used
const MIN_HEADINGS: usize = 2;

static HEADING_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn heading_regex() -> Option<&'static Regex> {
    HEADING_RE
        .get_or_init(|| Regex::new(r"(?m)^#{1,6}[ \t]+\S.*$").ok())
        .as_ref()
}

/// Count characters in a byte range
pub fn char_len(text: &str, piece: Piece) -> usize {
    text[piece.start..piece.end].chars().count()
}

/// Split `piece` into heading-bounded sections
///
/// Returns `None` when fewer than two heading lines exist. Text before the
/// first heading forms its own section.
pub fn heading_sections(text: &str, piece: Piece) -> Option<Vec<Piece>> {
    let re = heading_regex()?;
    let slice = &text[piece.start..piece.end];
    let starts: Vec<usize> = re
        .find_iter(slice)
        .map(|m| piece.start + m.start())
        .collect();

    if starts.len() < MIN_HEADINGS {
        return None;
    }

    let mut sections = Vec::with_capacity(starts.len() + 1);
    let mut start = piece.start;
    for cut in starts.into_iter().filter(|&s| s > piece.start) {
        sections.push(Piece::new(start, cut));
        start = cut;
    }
    sections.push(Piece::new(start, piece.end));

    Some(fold_blank_parts(text, sections))
}

/// Break `piece` into units of at most `limit` chars
///
/// Paragraphs (blank-line delimited) are preferred, then lines, and a line
/// still over the limit is sliced raw. Units keep their trailing newlines.
pub fn size_units(text: &str, piece: Piece, limit: usize) -> Vec<Piece> {
    let limit = limit.max(1);
    let mut units = Vec::new();

    for para in split_after_newlines(text, piece, 2) {
        if char_len(text, para) <= limit {
            units.push(para);
            continue;
        }
        for line in split_after_newlines(text, para, 1) {
            if char_len(text, line) <= limit {
                units.push(line);
            } else {
                units.extend(slice_chars(text, line, limit));
            }
        }
    }

    units
}

/// Split after every run of at least `min_newlines` newlines, keeping the run
/// on the preceding unit
fn split_after_newlines(text: &str, piece: Piece, min_newlines: usize) -> Vec<Piece> {
    let bytes = text[piece.start..piece.end].as_bytes();
    let mut units = Vec::new();
    let mut unit_start = piece.start;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\n' {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < bytes.len() && bytes[i] == b'\n' {
            i += 1;
        }
        if i - run_start >= min_newlines {
            units.push(Piece::new(unit_start, piece.start + i));
            unit_start = piece.start + i;
        }
    }

    if unit_start < piece.end {
        units.push(Piece::new(unit_start, piece.end));
    }
    units
}

/// Slice raw into pieces of `limit` chars, never splitting a char
fn slice_chars(text: &str, piece: Piece, limit: usize) -> Vec<Piece> {
    let slice = &text[piece.start..piece.end];
    let mut pieces = Vec::new();
    let mut start = piece.start;
    let mut count = 0;

    for (offset, _) in slice.char_indices() {
        if count == limit {
            let at = piece.start + offset;
            pieces.push(Piece::new(start, at));
            start = at;
            count = 0;
        }
        count += 1;
    }

    if start < piece.end {
        pieces.push(Piece::new(start, piece.end));
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whole(text: &str) -> Piece {
        Piece::new(0, text.len())
    }

    #[test]
    fn test_heading_sections_need_two_headings() {
        let one = "# Title\n\nbody text";
        assert!(heading_sections(one, whole(one)).is_none());

        let two = "preface\n# One\nfirst\n## Two\nsecond\n";
        let sections = heading_sections(two, whole(two)).unwrap();
        let texts: Vec<&str> = sections.iter().map(|p| &two[p.start..p.end]).collect();
        assert_eq!(texts, vec!["preface\n", "# One\nfirst\n", "## Two\nsecond\n"]);
    }

    #[test]
    fn test_hash_without_space_is_not_heading() {
        let text = "#tag one\n#tag two\n";
        assert!(heading_sections(text, whole(text)).is_none());
    }

    #[test]
    fn test_size_units_prefer_paragraphs() {
        let text = "aaaa\n\nbbbb\n\n\ncccc";
        let units = size_units(text, whole(text), 10);
        let texts: Vec<&str> = units.iter().map(|p| &text[p.start..p.end]).collect();
        assert_eq!(texts, vec!["aaaa\n\n", "bbbb\n\n\n", "cccc"]);
    }

    #[test]
    fn test_size_units_fall_back_to_lines_and_raw() {
        let text = "short\nthis line is far too long\n";
        let units = size_units(text, whole(text), 8);
        assert!(units.iter().all(|u| char_len(text, *u) <= 8));
        let joined: String = units.iter().map(|p| &text[p.start..p.end]).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_slice_chars_respects_multibyte() {
        let text = "日本語のテキスト";
        let pieces = slice_chars(text, whole(text), 3);
        let texts: Vec<&str> = pieces.iter().map(|p| &text[p.start..p.end]).collect();
        assert_eq!(texts, vec!["日本語", "のテキ", "スト"]);
    }
}
