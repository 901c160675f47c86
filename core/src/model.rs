use serde::{Deserialize, Serialize};

/// Weight of the term frequency in a posting score.
pub const W_TF: f64 = 0.3;
/// Weight of the position feature in a posting score.
pub const W_POS: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub body: String,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into(), body: body.into() }
    }

    /// Title and body joined by a single space; the text that gets indexed.
    pub fn content(&self) -> String {
        format!("{} {}", self.title, self.body)
    }
}

/// Occurrence statistics of one term within one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub docid: String,
    pub title: String,
    pub term_freq: u32,
    /// `(doclen - ordinal) / doclen` at the term's first occurrence; never updated afterwards.
    pub position: f64,
    pub score: f64,
}

impl Posting {
    pub fn first_occurrence(docid: &str, title: &str, position: f64) -> Self {
        Self { docid: docid.to_string(), title: title.to_string(), term_freq: 1, position, score: 0.0 }
    }

    pub fn compute_score(&self) -> f64 {
        W_TF * self.term_freq as f64 + W_POS * self.position
    }
}

/// Postings for a single term, sorted descending by score once built.
pub type PostingList = Vec<Posting>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "_id")]
    pub docid: String,
    pub title: String,
    pub score: f64,
    pub position: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub term_count: usize,
    pub document_count: usize,
    /// Documents with no indexable content.
    pub skipped_documents: usize,
}

/// Written once a build has persisted every term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub version: u64,
    pub created_at: String,
    pub term_count: usize,
    pub document_count: usize,
}
