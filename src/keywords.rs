//! Keyword extraction for chunks, documents, and queries
//!
//! Words come from Unicode word segmentation. Runs of CJK ideographs carry
//! no word boundaries, so they are expanded into overlapping bigrams.

use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

/// Keywords stored per chunk and per document
pub const DEFAULT_KEYWORD_COUNT: usize = 5;

/// Characters kept in a document abstract
pub const ABSTRACT_CHARS: usize = 100;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "if", "in", "into", "is", "it", "its", "may", "more", "most", "no",
    "not", "of", "on", "or", "other", "our", "she", "should", "so", "some", "such", "than",
    "that", "the", "their", "them", "then", "there", "these", "they", "this", "those", "to",
    "was", "we", "were", "what", "when", "where", "which", "while", "who", "will", "with",
    "would", "you", "your",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2A6DF)
}

/// Split text into lowercase search tokens, in order of appearance
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cjk_run: Vec<char> = Vec::new();

    for word in text.unicode_words() {
        let mut chars = word.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if is_cjk(c) {
                cjk_run.push(c);
                continue;
            }
        }
        flush_cjk(&mut cjk_run, &mut tokens);

        let lower = word.to_lowercase();
        if lower.chars().count() >= 2 && !is_stopword(&lower) {
            tokens.push(lower);
        }
    }
    flush_cjk(&mut cjk_run, &mut tokens);

    tokens
}

fn flush_cjk(run: &mut Vec<char>, tokens: &mut Vec<String>) {
    if run.len() >= 2 {
        tokens.extend(run.windows(2).map(|pair| pair.iter().collect::<String>()));
    }
    run.clear();
}

/// The `n` most frequent tokens; ties keep first-occurrence order
pub fn extract_keywords(text: &str, n: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, token) in tokenize(text).into_iter().enumerate() {
        counts.entry(token).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(n).map(|(token, _)| token).collect()
}

/// Distinct search keywords of a query, in order
pub fn query_keywords(query: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Leading excerpt used as a document abstract
pub fn make_abstract(text: &str) -> String {
    let trimmed = text.trim();
    let mut excerpt: String = trimmed.chars().take(ABSTRACT_CHARS).collect();
    if trimmed.chars().count() > ABSTRACT_CHARS {
        excerpt.push_str("...");
    }
    excerpt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwords_sorted_for_binary_search() {
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort();
        assert_eq!(sorted, STOPWORDS);
    }

    #[test]
    fn test_tokenize_drops_stopwords_and_short_words() {
        let tokens = tokenize("The Rust compiler is a program, x.");
        assert_eq!(tokens, vec!["rust", "compiler", "program"]);
    }

    #[test]
    fn test_tokenize_cjk_bigrams() {
        let tokens = tokenize("向量检索");
        assert_eq!(tokens, vec!["向量", "量检", "检索"]);
    }

    #[test]
    fn test_extract_keywords_by_frequency() {
        let text = "index index index vector vector chunk sweep";
        let keywords = extract_keywords(text, 3);
        assert_eq!(keywords, vec!["index", "vector", "chunk"]);
    }

    #[test]
    fn test_query_keywords_are_distinct() {
        assert_eq!(
            query_keywords("Hybrid search and hybrid ranking"),
            vec!["hybrid", "search", "ranking"]
        );
    }

    #[test]
    fn test_make_abstract() {
        assert_eq!(make_abstract("  short text "), "short text");
        let long = "x".repeat(150);
        let summary = make_abstract(&long);
        assert_eq!(summary.chars().count(), ABSTRACT_CHARS + 3);
        assert!(summary.ends_with("..."));
    }
}
