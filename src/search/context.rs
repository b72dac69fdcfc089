//! Prompt context assembly from search hits

use super::SearchHit;
use crate::config::SearchConfig;

/// Supplier name treated as local, with the smaller context window
const LOCAL_SUPPLIER: &str = "ollama";

const PASSAGE_SEPARATOR: &str = "\n\n";

/// Character budget for passages sent to `supplier`
pub fn context_budget(config: &SearchConfig, supplier: &str) -> usize {
    if supplier == LOCAL_SUPPLIER {
        config.local_context_chars
    } else {
        config.remote_context_chars
    }
}

/// Join passages in rank order until the budget is spent
///
/// Empty passages are skipped. The passage that crosses the budget is cut
/// at a char boundary and everything after it is dropped.
pub fn build_context(hits: &[SearchHit], budget: usize) -> String {
    let mut context = String::new();
    let mut used = 0;

    for hit in hits {
        let passage = hit.doc.trim();
        if passage.is_empty() {
            continue;
        }

        let separator = if context.is_empty() { 0 } else { PASSAGE_SEPARATOR.len() };
        if used + separator >= budget {
            break;
        }
        if separator > 0 {
            context.push_str(PASSAGE_SEPARATOR);
            used += separator;
        }

        let remaining = budget - used;
        let len = passage.chars().count();
        if len <= remaining {
            context.push_str(passage);
            used += len;
        } else {
            context.extend(passage.chars().take(remaining));
            break;
        }
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc: &str) -> SearchHit {
        SearchHit {
            id: "id".to_string(),
            doc: doc.to_string(),
            doc_id: "d".to_string(),
            doc_name: "n".to_string(),
            doc_file: "f".to_string(),
            base: "b".to_string(),
            score: 1.0,
            vector_score: Some(1.0),
            keyword_score: None,
        }
    }

    #[test]
    fn test_budget_by_supplier() {
        let config = SearchConfig::default();
        assert_eq!(context_budget(&config, "ollama"), 6144);
        assert_eq!(context_budget(&config, "openai"), 49152);
    }

    #[test]
    fn test_build_context_cuts_and_drops() {
        let hits = vec![hit("abcdef"), hit("   "), hit("ghijkl"), hit("mnop")];
        assert_eq!(build_context(&hits, 100), "abcdef\n\nghijkl\n\nmnop");
        assert_eq!(build_context(&hits, 11), "abcdef\n\nghi");
        assert_eq!(build_context(&hits, 4), "abcd");
        assert_eq!(build_context(&hits, 7), "abcdef");
        assert_eq!(build_context(&[], 10), "");
    }

    #[test]
    fn test_build_context_char_safe() {
        assert_eq!(build_context(&[hit("第一章内容")], 3), "第一章");
    }
}
