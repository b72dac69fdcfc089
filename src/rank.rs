//! Ranking maths for hybrid retrieval
//!
//! Everything here is pure: weight normalization, keyword scoring, fusion of
//! vector and keyword sub-results, ordering, and whole-document consolidation.

use std::collections::{HashMap, HashSet};

/// Share of the keyword score given to the matched-keyword ratio
pub const KEYWORD_MATCH_WEIGHT: f32 = 0.8;

/// Share of the keyword score given to the position bonus
pub const POSITION_WEIGHT: f32 = 0.2;

/// Offset (chars) at which the position bonus reaches zero
pub const POSITION_WINDOW: usize = 100;

/// Vector and keyword weights of one base
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub vector: f32,
    pub keyword: f32,
}

impl Weights {
    /// Neither sub-search contributes
    pub fn is_empty(&self) -> bool {
        self.vector <= 0.0 && self.keyword <= 0.0
    }
}

/// Clamp both weights into `[0, 1]`; when both are positive, rescale them to sum to 1
pub fn normalize_weights(vector: f32, keyword: f32) -> Weights {
    let clamp = |w: f32| if w.is_nan() { 0.0 } else { w.clamp(0.0, 1.0) };
    let (vector, keyword) = (clamp(vector), clamp(keyword));

    if vector > 0.0 && keyword > 0.0 {
        let sum = vector + keyword;
        Weights {
            vector: vector / sum,
            keyword: keyword / sum,
        }
    } else {
        Weights { vector, keyword }
    }
}

/// Similarity from a store distance, floored at zero
pub fn similarity(distance: f32) -> f32 {
    (1.0 - distance).max(0.0)
}

/// Linear decay from 1 at offset 0 to 0 at [`POSITION_WINDOW`]
pub fn position_bonus(offset: usize) -> f32 {
    (1.0 - offset as f32 / POSITION_WINDOW as f32).max(0.0)
}

/// Score a chunk against the supplied keywords
///
/// `0.8 * matched / total + 0.2 * position_bonus(earliest match)`, with
/// case-insensitive substring matching.
pub fn keyword_score(text: &str, keywords: &[String]) -> f32 {
    if keywords.is_empty() {
        return 0.0;
    }

    let lower = text.to_lowercase();
    let mut matched = 0usize;
    let mut earliest: Option<usize> = None;

    for keyword in keywords {
        let needle = keyword.to_lowercase();
        if needle.is_empty() {
            continue;
        }
        if let Some(at) = lower.find(&needle) {
            matched += 1;
            let offset = lower[..at].chars().count();
            earliest = Some(earliest.map_or(offset, |e| e.min(offset)));
        }
    }

    let ratio = matched as f32 / keywords.len() as f32;
    let bonus = earliest.map(position_bonus).unwrap_or(0.0);
    KEYWORD_MATCH_WEIGHT * ratio + POSITION_WEIGHT * bonus
}

/// One sub-search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub id: String,
    pub doc: String,
    pub doc_id: String,
    pub score: f32,
}

/// A fused candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub doc: String,
    pub doc_id: String,
    pub vector_score: Option<f32>,
    pub keyword_score: Option<f32>,
    pub score: f32,
}

pub fn fused_score(vector: Option<f32>, keyword: Option<f32>, weights: Weights) -> f32 {
    match (vector, keyword) {
        (Some(v), Some(k)) => v * (1.0 - weights.keyword) + k * weights.keyword,
        (Some(v), None) => v * weights.vector,
        (None, Some(k)) => k * weights.keyword,
        (None, None) => 0.0,
    }
}

/// Merge vector and keyword hits by chunk id
///
/// Output keeps vector-hit order, followed by keyword-only hits.
pub fn fuse(
    vector_hits: Vec<ScoredChunk>,
    keyword_hits: Vec<ScoredChunk>,
    weights: Weights,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::with_capacity(vector_hits.len() + keyword_hits.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for hit in vector_hits {
        if positions.contains_key(&hit.id) {
            continue;
        }
        positions.insert(hit.id.clone(), candidates.len());
        candidates.push(Candidate {
            id: hit.id,
            doc: hit.doc,
            doc_id: hit.doc_id,
            vector_score: Some(hit.score),
            keyword_score: None,
            score: 0.0,
        });
    }

    for hit in keyword_hits {
        match positions.get(&hit.id) {
            Some(&i) => candidates[i].keyword_score = Some(hit.score),
            None => {
                positions.insert(hit.id.clone(), candidates.len());
                candidates.push(Candidate {
                    id: hit.id,
                    doc: hit.doc,
                    doc_id: hit.doc_id,
                    vector_score: None,
                    keyword_score: Some(hit.score),
                    score: 0.0,
                });
            }
        }
    }

    for candidate in &mut candidates {
        candidate.score = fused_score(candidate.vector_score, candidate.keyword_score, weights);
    }
    candidates
}

/// Sort by fused score, descending and stable, then keep the top `limit`
pub fn rank(mut candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(limit);
    candidates
}

/// Replace mostly-recalled documents with their full text
///
/// A document whose retained chunks add up to at least half of its full
/// length is returned once, as a single entry holding the full text. The
/// entry takes the place, scores and id slot of the document's best chunk,
/// with the document id as its id.
pub fn consolidate_documents(
    ranked: Vec<Candidate>,
    full_texts: &HashMap<String, String>,
) -> Vec<Candidate> {
    let mut retained: HashMap<&str, usize> = HashMap::new();
    for candidate in &ranked {
        *retained.entry(candidate.doc_id.as_str()).or_default() += candidate.doc.chars().count();
    }

    let whole: HashSet<String> = retained
        .into_iter()
        .filter(|(doc_id, kept)| {
            full_texts
                .get(*doc_id)
                .map(|text| text.chars().count())
                .is_some_and(|full| full > 0 && kept * 2 >= full)
        })
        .map(|(doc_id, _)| doc_id.to_string())
        .collect();

    if whole.is_empty() {
        return ranked;
    }

    let mut emitted: HashSet<String> = HashSet::new();
    let mut consolidated = Vec::with_capacity(ranked.len());
    for mut candidate in ranked {
        if !whole.contains(&candidate.doc_id) {
            consolidated.push(candidate);
            continue;
        }
        if !emitted.insert(candidate.doc_id.clone()) {
            continue;
        }
        if let Some(text) = full_texts.get(&candidate.doc_id) {
            candidate.doc = text.clone();
        }
        candidate.id = candidate.doc_id.clone();
        consolidated.push(candidate);
    }
    consolidated
}
