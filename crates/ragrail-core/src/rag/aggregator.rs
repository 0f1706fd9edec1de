//! Content aggregation with Reciprocal Rank Fusion and optional re-ranking

use super::{Content, Query, TextSegment};
use crate::error::{RagRailError, Result};
use crate::llm::ScoringModel;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// RRF constant (standard value)
pub const RRF_K: f64 = 60.0;

/// Retrieved lists grouped by the query that produced them
pub type QueryContents = Vec<(Query, Vec<Vec<Content>>)>;

/// Merges the contents of every retriever for every query into one list
#[async_trait]
pub trait ContentAggregator: Send + Sync {
    async fn aggregate(&self, contents: QueryContents) -> Result<Vec<Content>>;
}

/// Reciprocal Rank Fusion
///
/// Each content scores `Σ 1 / (k + rank)` over the lists it appears in, with
/// `rank` starting at 1. Contents with the same segment are merged, keeping
/// the first occurrence. Equal scores keep first-seen order.
pub fn reciprocal_rank_fuse(lists: &[Vec<Content>], k: f64) -> Vec<Content> {
    let mut positions: HashMap<&TextSegment, usize> = HashMap::new();
    let mut fused: Vec<(f64, &Content)> = Vec::new();

    for list in lists {
        for (rank, content) in list.iter().enumerate() {
            let rrf_score = 1.0 / (k + (rank + 1) as f64);
            match positions.get(&content.segment) {
                Some(&idx) => fused[idx].0 += rrf_score,
                None => {
                    positions.insert(&content.segment, fused.len());
                    fused.push((rrf_score, content));
                }
            }
        }
    }

    // sort_by is stable, so ties stay in first-seen order
    fused.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    fused.into_iter().map(|(_, c)| c.clone()).collect()
}

/// Fuses per query, then across queries
fn fuse_all(contents: &QueryContents) -> Vec<Content> {
    let per_query: Vec<Vec<Content>> = contents
        .iter()
        .map(|(_, lists)| reciprocal_rank_fuse(lists, RRF_K))
        .collect();
    reciprocal_rank_fuse(&per_query, RRF_K)
}

/// RRF over every list, keeping the retrievers' own scores on each content
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContentAggregator;

#[async_trait]
impl ContentAggregator for DefaultContentAggregator {
    async fn aggregate(&self, contents: QueryContents) -> Result<Vec<Content>> {
        Ok(fuse_all(&contents))
    }
}

/// Picks the query candidates are scored against
pub type QuerySelector = Arc<dyn Fn(&[Query]) -> Result<Query> + Send + Sync>;

/// Selector that accepts exactly one query
pub fn single_query_selector() -> QuerySelector {
    Arc::new(|queries: &[Query]| match queries {
        [query] => Ok(query.clone()),
        _ => Err(RagRailError::InvalidInput(format!(
            "re-ranking needs a query selector when there are {} queries",
            queries.len()
        ))),
    })
}

/// Selector that scores against the user's original message
///
/// Falls back to the first query when none carries the original message.
pub fn user_message_selector() -> QuerySelector {
    Arc::new(|queries: &[Query]| {
        let first = queries.first().ok_or_else(|| {
            RagRailError::InvalidInput("re-ranking needs at least one query".to_string())
        })?;
        let original = first
            .metadata
            .as_ref()
            .map(|m| m.user_message.content.clone())
            .unwrap_or_else(|| first.text.clone());
        Ok(first.derive(original))
    })
}

/// Fuses candidates, then scores them against one query with a scoring model
pub struct ReRankingContentAggregator {
    scoring_model: Arc<dyn ScoringModel>,
    min_score: f64,
    max_results: Option<usize>,
    selector: QuerySelector,
}

impl ReRankingContentAggregator {
    pub fn new(scoring_model: Arc<dyn ScoringModel>) -> Self {
        Self {
            scoring_model,
            min_score: 0.0,
            max_results: None,
            selector: single_query_selector(),
        }
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_selector(mut self, selector: QuerySelector) -> Self {
        self.selector = selector;
        self
    }
}

#[async_trait]
impl ContentAggregator for ReRankingContentAggregator {
    async fn aggregate(&self, contents: QueryContents) -> Result<Vec<Content>> {
        if contents.is_empty() {
            return Ok(Vec::new());
        }

        let queries: Vec<Query> = contents.iter().map(|(q, _)| q.clone()).collect();
        let query = (self.selector)(&queries)?;

        let candidates = fuse_all(&contents);
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let texts: Vec<String> = candidates.iter().map(|c| c.text().to_string()).collect();
        let scores = self.scoring_model.score_all(&query.text, &texts).await?;
        if scores.len() != candidates.len() {
            return Err(RagRailError::Retrieval(format!(
                "scoring model {} returned {} scores for {} candidates",
                self.scoring_model.model_name(),
                scores.len(),
                candidates.len()
            )));
        }

        let ranked = rank_by_score(candidates, scores, self.min_score, self.max_results);
        tracing::debug!(
            "Re-ranked {} candidates against '{}', kept {}",
            texts.len(),
            query.text,
            ranked.len()
        );
        Ok(ranked)
    }
}

/// Keep contents scoring at least `min_score`, highest first, ties in input order
pub fn rank_by_score(
    contents: Vec<Content>,
    scores: Vec<f64>,
    min_score: f64,
    max_results: Option<usize>,
) -> Vec<Content> {
    let mut scored: Vec<(f64, Content)> = scores
        .into_iter()
        .zip(contents)
        .filter(|(score, _)| *score >= min_score)
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    if let Some(max) = max_results {
        scored.truncate(max);
    }

    scored
        .into_iter()
        .map(|(score, content)| content.with_score(score))
        .collect()
}
