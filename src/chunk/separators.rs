//! Separator kinds and structure auto-detection

use super::Piece;
use crate::error::{Error, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Structured-section markers tried in order when a base configures no separators
const SECTION_PATTERNS: &[&str] = &[
    r"(第.{1,10}章[\s:.：])",
    r"(第.{1,10}条[\s:.：])",
    r"(第.{1,10}节[\s:.：])",
    r"(第.{1,10}款[\s:.：])",
    r"(\s[一二三四五六七八九十]{1,5}[\s:.：、])",
    r"(\s\([一二三四五六七八九十]{1,5}\)[\s:.：、])",
    r"(Slide\s+\d+)",
    r"(\s\d{1,4}\.\d{1,4}[\s:.：、])",
    r"(\s\(\d{1,4}\)[\s:.：、])",
];

/// A pattern must match more often than this to be adopted
const DETECTION_MIN_MATCHES: usize = 3;

static SECTION_REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();

fn section_regexes() -> &'static [Regex] {
    SECTION_REGEXES.get_or_init(|| {
        SECTION_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Where the text is split
#[derive(Debug, Clone)]
pub enum Separator {
    /// Split after each occurrence; the delimiter stays on the preceding piece
    Literal(String),
    /// Split before each match; the match starts the following piece
    Pattern(Regex),
}

impl Separator {
    /// Parse a configured separator string
    ///
    /// `/expr/` and `/expr/g` denote a regular expression, anything else is literal.
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(expr) = regex_body(raw) {
            let expr = if expr.starts_with('(') && expr.ends_with(')') {
                expr.to_string()
            } else {
                format!("({})", expr)
            };
            return Ok(Separator::Pattern(Regex::new(&expr)?));
        }
        Ok(Separator::Literal(unescape(raw)))
    }

    /// Render back into the configured string form
    pub fn to_config_string(&self) -> String {
        match self {
            Separator::Literal(s) => s.replace('\n', "\\n").replace('\t', "\\t"),
            Separator::Pattern(re) => format!("/{}/", re.as_str()),
        }
    }

    /// Split `piece` into consecutive sub-pieces covering it exactly
    pub(crate) fn split(&self, text: &str, piece: Piece) -> Vec<Piece> {
        let parts = match self {
            Separator::Literal(lit) => split_literal(text, piece, lit),
            Separator::Pattern(re) => split_pattern(text, piece, re),
        };
        fold_blank_parts(text, parts)
    }
}

impl PartialEq for Separator {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Separator::Literal(a), Separator::Literal(b)) => a == b,
            (Separator::Pattern(a), Separator::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl std::fmt::Display for Separator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_config_string())
    }
}

/// Parse every configured separator, failing on the first invalid regex
pub fn parse_separators(raw: &[String]) -> Result<Vec<Separator>> {
    raw.iter()
        .map(|s| {
            Separator::parse(s)
                .map_err(|e| Error::Config(format!("Invalid separator '{}': {}", s, e)))
        })
        .collect()
}

/// Pick separators for a document that has none configured
pub fn detect_separators(file_name: &str, text: &str) -> Vec<Separator> {
    if is_tabular(file_name) {
        return vec![Separator::Literal("\n".to_string())];
    }

    section_regexes()
        .iter()
        .find(|re| re.find_iter(text).take(DETECTION_MIN_MATCHES + 1).count() > DETECTION_MIN_MATCHES)
        .map(|re| vec![Separator::Pattern(re.clone())])
        .unwrap_or_default()
}

fn is_tabular(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_lowercase().as_str(), "csv" | "xls" | "xlsx"))
        .unwrap_or(false)
}

fn regex_body(raw: &str) -> Option<&str> {
    if raw.len() <= 3 || !raw.starts_with('/') {
        return None;
    }
    raw.strip_suffix("/g")
        .or_else(|| raw.strip_suffix('/'))
        .map(|rest| &rest[1..])
        .filter(|body| !body.is_empty())
}

/// Config files write newlines and tabs escaped
fn unescape(raw: &str) -> String {
    raw.replace("\\n", "\n").replace("\\t", "\t")
}

fn split_literal(text: &str, piece: Piece, lit: &str) -> Vec<Piece> {
    if lit.is_empty() {
        return vec![piece];
    }

    let slice = &text[piece.start..piece.end];
    let mut parts = Vec::new();
    let mut part_start = piece.start;
    let mut run: Option<(usize, usize)> = None;

    for (offset, _) in slice.match_indices(lit) {
        let at = piece.start + offset;
        match run {
            Some((run_start, run_end)) if run_end == at => run = Some((run_start, at + lit.len())),
            Some((run_start, run_end)) => {
                parts.push(Piece::with_body(part_start, run_start, run_end));
                part_start = run_end;
                run = Some((at, at + lit.len()));
            }
            None => run = Some((at, at + lit.len())),
        }
    }

    match run {
        Some((run_start, run_end)) => {
            parts.push(Piece::with_body(part_start, run_start, run_end));
            if run_end < piece.end {
                parts.push(Piece::new(run_end, piece.end));
            }
        }
        None => parts.push(piece),
    }

    parts.retain(|p| p.end > p.start);
    parts
}

fn split_pattern(text: &str, piece: Piece, re: &Regex) -> Vec<Piece> {
    let slice = &text[piece.start..piece.end];
    let mut cuts: Vec<usize> = re
        .find_iter(slice)
        .filter(|m| m.start() > 0 && m.end() > m.start())
        .map(|m| piece.start + m.start())
        .collect();
    cuts.dedup();

    let mut parts = Vec::with_capacity(cuts.len() + 1);
    let mut start = piece.start;
    for cut in cuts {
        parts.push(Piece::new(start, cut));
        start = cut;
    }
    parts.push(Piece::new(start, piece.end));
    parts
}

/// Merge whitespace-only parts into a neighbour so none is emitted alone
pub(crate) fn fold_blank_parts(text: &str, parts: Vec<Piece>) -> Vec<Piece> {
    let mut folded: Vec<Piece> = Vec::with_capacity(parts.len());
    let mut pending: Option<Piece> = None;

    for mut part in parts {
        if text[part.start..part.end].trim().is_empty() {
            match folded.last_mut() {
                // The folded blank counts toward the size of its host
                Some(prev) => {
                    prev.end = part.end;
                    prev.body_end = part.body_end;
                }
                None => {
                    let blank = pending.get_or_insert(part);
                    blank.end = part.end;
                }
            }
            continue;
        }

        if let Some(blank) = pending.take() {
            part.start = blank.start;
        }
        folded.push(part);
    }

    // Every part was blank
    if let Some(blank) = pending {
        folded.push(Piece::new(blank.start, blank.end));
    }

    folded
}
