use crate::error::Result;
use crate::model::{PostingList, SearchResult};
use crate::store::{IndexStore, RetryPolicy};
use crate::tokenizer::{EnglishNormalizer, TextNormalizer};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// One page of ranked results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    /// Matching documents before paging.
    pub total_hits: usize,
    pub results: Vec<SearchResult>,
}

struct Hit<'a> {
    score: f64,
    title: &'a str,
    position: f64,
}

/// Answers phrase queries against a built unigram index.
pub struct QueryEngine {
    normalizer: Arc<dyn TextNormalizer>,
    retry: RetryPolicy,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(Arc::new(EnglishNormalizer))
    }
}

impl QueryEngine {
    pub fn new(normalizer: Arc<dyn TextNormalizer>) -> Self {
        Self { normalizer, retry: RetryPolicy::default() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn search(&self, index: &dyn IndexStore, query: &str, offset: usize, limit: usize) -> Result<Vec<SearchResult>> {
        Ok(self.search_page(index, query, offset, limit)?.results)
    }

    /// Rank documents by the summed score of their postings over every query term.
    ///
    /// A term repeated in the query counts once per occurrence but is looked up once.
    /// Title and position come from the last posting seen for a document. Equal
    /// scores rank by ascending docid.
    pub fn search_page(&self, index: &dyn IndexStore, query: &str, offset: usize, limit: usize) -> Result<SearchPage> {
        let terms = self.normalizer.normalize(query)?;
        if terms.is_empty() {
            return Ok(SearchPage::default());
        }

        let mut lists: HashMap<&str, Option<PostingList>> = HashMap::new();
        for term in &terms {
            if !lists.contains_key(term.as_str()) {
                let list = self.retry.run("get_postings", || index.get(term))?;
                lists.insert(term.as_str(), list);
            }
        }

        let mut hits: HashMap<&str, Hit<'_>> = HashMap::new();
        for term in &terms {
            let Some(Some(list)) = lists.get(term.as_str()) else { continue };
            for posting in list {
                let hit = hits.entry(posting.docid.as_str()).or_insert(Hit { score: 0.0, title: "", position: 0.0 });
                hit.score += posting.score;
                hit.title = posting.title.as_str();
                hit.position = posting.position;
            }
        }
        tracing::debug!(query, terms = terms.len(), hits = hits.len(), "aggregated postings");

        let total_hits = hits.len();
        let mut ranked: Vec<(&str, Hit<'_>)> = hits.into_iter().collect();
        ranked.sort_by(|a, b| match b.1.score.total_cmp(&a.1.score) {
            Ordering::Equal => a.0.cmp(b.0),
            other => other,
        });
        let results = ranked
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(docid, hit)| SearchResult {
                docid: docid.to_string(),
                title: hit.title.to_string(),
                score: hit.score,
                position: hit.position,
            })
            .collect();
        Ok(SearchPage { total_hits, results })
    }
}
