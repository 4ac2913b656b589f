//! Two-phase rerank and context assembly.
//!
//! Vector distance alone can rank a loosely related passage above one that
//! uses the exact terminology of the query. Uppercase abbreviations carry
//! most of that precision in technical text, so candidates are accepted in
//! two passes over the same distance-ordered list:
//!
//! 1. **Abbreviation phase**: candidates at or above the similarity
//!    threshold that contain at least one of the query's abbreviations.
//! 2. **Similarity phase**: if fewer than `k` were accepted, the remaining
//!    candidates at or above the threshold, in distance order.
//!
//! Accepted items are deduplicated by content and keep their acceptance
//! order, so abbreviation matches always come first.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::chunk::extract_abbreviations;
use crate::index::SearchHit;
use crate::models::Metadata;
use crate::store::DocumentStore;

/// Separator placed between items in the assembled context string.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankParams {
    /// Maximum number of items to accept.
    pub k: usize,
    /// Minimum similarity (`1 - distance / 2`) for a candidate to be accepted.
    pub threshold: f32,
}

/// Which rerank pass accepted an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Abbreviation,
    Similarity,
}

/// One accepted chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextItem {
    pub ordinal: usize,
    pub content: String,
    pub slot: String,
    pub metadata: Metadata,
    pub similarity: f32,
    pub phase: Phase,
    /// Query abbreviations found in this chunk.
    pub matched: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reranked {
    pub items: Vec<ContextItem>,
    /// Query abbreviations that no accepted item contains.
    pub unmatched_abbreviations: BTreeSet<String>,
}

/// Rerank distance-ordered `hits` against `store`.
///
/// Hits whose ordinal is not in the store, or whose chunk is outside
/// `slot` when one is given, are ignored.
pub fn rerank(
    query_abbreviations: &BTreeSet<String>,
    hits: &[SearchHit],
    store: &DocumentStore,
    slot: Option<&str>,
    params: &RerankParams,
) -> Reranked {
    let candidates: Vec<(&SearchHit, f32)> = hits
        .iter()
        .filter(|hit| {
            store
                .get(hit.ordinal)
                .is_some_and(|c| slot.map_or(true, |s| c.slot == s))
        })
        .map(|hit| (hit, hit.similarity()))
        .filter(|(_, sim)| *sim >= params.threshold)
        .collect();

    let mut items: Vec<ContextItem> = Vec::new();
    let mut accepted: HashSet<usize> = HashSet::new();
    let mut seen_content: HashSet<&str> = HashSet::new();
    let mut matched_overall: BTreeSet<String> = BTreeSet::new();

    if !query_abbreviations.is_empty() {
        for (hit, similarity) in &candidates {
            if items.len() >= params.k {
                break;
            }
            let Some(chunk) = store.get(hit.ordinal) else {
                continue;
            };
            let matched: Vec<String> = extract_abbreviations(&chunk.content)
                .intersection(query_abbreviations)
                .cloned()
                .collect();
            if matched.is_empty() || !seen_content.insert(chunk.content.as_str()) {
                continue;
            }
            accepted.insert(hit.ordinal);
            matched_overall.extend(matched.iter().cloned());
            items.push(ContextItem {
                ordinal: hit.ordinal,
                content: chunk.content.clone(),
                slot: chunk.slot.clone(),
                metadata: chunk.metadata.clone(),
                similarity: *similarity,
                phase: Phase::Abbreviation,
                matched,
            });
        }
    }

    for (hit, similarity) in &candidates {
        if items.len() >= params.k {
            break;
        }
        if accepted.contains(&hit.ordinal) {
            continue;
        }
        let Some(chunk) = store.get(hit.ordinal) else {
            continue;
        };
        if !seen_content.insert(chunk.content.as_str()) {
            continue;
        }
        items.push(ContextItem {
            ordinal: hit.ordinal,
            content: chunk.content.clone(),
            slot: chunk.slot.clone(),
            metadata: chunk.metadata.clone(),
            similarity: *similarity,
            phase: Phase::Similarity,
            matched: Vec::new(),
        });
    }

    Reranked {
        unmatched_abbreviations: query_abbreviations
            .difference(&matched_overall)
            .cloned()
            .collect(),
        items,
    }
}

/// Render items as `"[Relevance NN%]\n<content>"` blocks joined by
/// [`CONTEXT_SEPARATOR`]. No items yields an empty string.
pub fn format_context(items: &[ContextItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "[Relevance {:.0}%]\n{}",
                item.similarity * 100.0,
                item.content
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn store_of(contents: &[(&str, &str)]) -> DocumentStore {
        let mut store = DocumentStore::new();
        for (content, slot) in contents {
            store.append(Chunk::new(*content, Metadata::new(), *slot));
        }
        store
    }

    /// A hit whose similarity comes out as `similarity`.
    fn hit(ordinal: usize, similarity: f32) -> SearchHit {
        SearchHit {
            ordinal,
            distance: 2.0 * (1.0 - similarity),
        }
    }

    fn abbrs(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn params(k: usize, threshold: f32) -> RerankParams {
        RerankParams { k, threshold }
    }

    #[test]
    fn test_abbreviation_match_promoted_over_closer_hit() {
        let store = store_of(&[
            ("Restart the router to fix the issue", "general"),
            ("The API returns an HTTP 404 error", "general"),
        ]);
        let hits = [hit(0, 0.9), hit(1, 0.5)];
        let out = rerank(&abbrs(&["API"]), &hits, &store, None, &params(5, 0.2));

        assert_eq!(out.items.len(), 2);
        assert_eq!(out.items[0].ordinal, 1);
        assert_eq!(out.items[0].phase, Phase::Abbreviation);
        assert_eq!(out.items[0].matched, vec!["API".to_string()]);
        assert_eq!(out.items[1].ordinal, 0);
        assert_eq!(out.items[1].phase, Phase::Similarity);
        assert!(out.unmatched_abbreviations.is_empty());
    }

    #[test]
    fn test_threshold_applies_to_both_phases() {
        let store = store_of(&[("VPN setup guide", "general"), ("unrelated", "general")]);
        let hits = [hit(0, 0.1), hit(1, 0.15)];
        let out = rerank(&abbrs(&["VPN"]), &hits, &store, None, &params(5, 0.2));
        assert!(out.items.is_empty());
        assert_eq!(out.unmatched_abbreviations, abbrs(&["VPN"]));
    }

    #[test]
    fn test_stops_at_k() {
        let store = store_of(&[("a", "general"), ("b", "general"), ("c", "general")]);
        let hits = [hit(0, 0.9), hit(1, 0.8), hit(2, 0.7)];
        let out = rerank(&BTreeSet::new(), &hits, &store, None, &params(2, 0.2));
        assert_eq!(
            out.items.iter().map(|i| i.ordinal).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn test_dedup_by_content() {
        let store = store_of(&[("same text", "general"), ("same text", "support")]);
        let hits = [hit(0, 0.9), hit(1, 0.9)];
        let out = rerank(&BTreeSet::new(), &hits, &store, None, &params(5, 0.2));
        assert_eq!(out.items.len(), 1);
    }

    #[test]
    fn test_slot_filter() {
        let store = store_of(&[("alpha", "general"), ("beta", "support")]);
        let hits = [hit(0, 0.9), hit(1, 0.8)];
        let out = rerank(
            &BTreeSet::new(),
            &hits,
            &store,
            Some("support"),
            &params(5, 0.2),
        );
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].slot, "support");
    }

    #[test]
    fn test_abbreviation_match_is_whole_token() {
        let store = store_of(&[("The APIS are down", "general")]);
        let hits = [hit(0, 0.9)];
        let out = rerank(&abbrs(&["API"]), &hits, &store, None, &params(5, 0.2));
        assert_eq!(out.items[0].phase, Phase::Similarity);
    }

    #[test]
    fn test_format_context() {
        let store = store_of(&[("first", "general"), ("second", "general")]);
        let hits = [hit(0, 0.874), hit(1, 0.5)];
        let out = rerank(&BTreeSet::new(), &hits, &store, None, &params(5, 0.2));
        assert_eq!(
            format_context(&out.items),
            "[Relevance 87%]\nfirst\n\n---\n\n[Relevance 50%]\nsecond"
        );
        assert_eq!(format_context(&[]), "");
    }
}
