use crate::error::{Error, Result};
use crate::model::{BuildStats, Document, IndexMeta, Posting, PostingList};
use crate::store::{DocumentStore, IndexStore, RetryPolicy};
use crate::tokenizer::{EnglishNormalizer, TextNormalizer};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;

/// Cancellation handle for a running build. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct BuildControl {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl BuildControl {
    pub fn new() -> Self { Self::default() }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { cancelled: Arc::default(), deadline: Some(deadline) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// Posting lists accumulated by a single `build` call.
#[derive(Default)]
struct BuildContext {
    postings: BTreeMap<String, PostingList>,
    document_count: usize,
    skipped_documents: usize,
}

impl BuildContext {
    fn add_document(&mut self, doc: &Document, content: &str, terms: Vec<String>) {
        let doclen = content.chars().count() as f64;
        // index of this document's posting within each term's list
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (i, term) in terms.into_iter().enumerate() {
            let wcount = (i + 1) as f64;
            let list = self.postings.entry(term.clone()).or_default();
            match seen.get(&term) {
                Some(&slot) => list[slot].term_freq += 1,
                None => {
                    let position = (doclen - wcount) / doclen;
                    list.push(Posting::first_occurrence(&doc.id, &doc.title, position));
                    seen.insert(term, list.len() - 1);
                }
            }
        }
    }

    /// Score every posting and order each list by descending score.
    /// The sort is stable, so equal scores keep scan order.
    fn finish(&mut self) {
        for list in self.postings.values_mut() {
            for posting in list.iter_mut() {
                posting.score = posting.compute_score();
            }
            list.sort_by(|a, b| b.score.total_cmp(&a.score));
        }
    }
}

/// Rebuilds the unigram index from every document in a store.
pub struct IndexBuilder {
    normalizer: Arc<dyn TextNormalizer>,
    retry: RetryPolicy,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new(Arc::new(EnglishNormalizer))
    }
}

impl IndexBuilder {
    pub fn new(normalizer: Arc<dyn TextNormalizer>) -> Self {
        Self { normalizer, retry: RetryPolicy::default() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Scan `docs` once and overwrite each term's posting list in `index`.
    ///
    /// Terms are persisted one by one. If the build fails or is cancelled part way
    /// through, the lists already written stay in place.
    pub fn build(&self, docs: &dyn DocumentStore, index: &dyn IndexStore, control: &BuildControl) -> Result<BuildStats> {
        let mut ctx = BuildContext::default();
        for doc in docs.scan() {
            control.check()?;
            let doc = doc?;
            ctx.document_count += 1;
            let content = doc.content();
            if content.trim().is_empty() {
                tracing::warn!(docid = %doc.id, "skipping document with no content");
                ctx.skipped_documents += 1;
                continue;
            }
            let terms = self.normalizer.normalize(&content)?;
            ctx.add_document(&doc, &content, terms);
        }
        ctx.finish();
        tracing::info!(terms = ctx.postings.len(), documents = ctx.document_count, "scanned documents");

        for (term, postings) in &ctx.postings {
            control.check()?;
            self.retry.run("put_postings", || index.put(term, postings))?;
        }

        let stats = BuildStats {
            term_count: ctx.postings.len(),
            document_count: ctx.document_count,
            skipped_documents: ctx.skipped_documents,
        };
        let previous = self.retry.run("get_meta", || index.meta())?;
        let meta = IndexMeta {
            version: previous.map_or(1, |m| m.version + 1),
            created_at: time::OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .map_err(|e| Error::store(format!("index timestamp: {e}")))?,
            term_count: stats.term_count,
            document_count: stats.document_count,
        };
        self.retry.run("put_meta", || index.put_meta(&meta))?;
        tracing::info!(
            term_count = stats.term_count,
            document_count = stats.document_count,
            skipped = stats.skipped_documents,
            version = meta.version,
            "index build complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store_with(docs: &[Document]) -> MemoryStore {
        let store = MemoryStore::new();
        for d in docs {
            store.upsert(d).unwrap();
        }
        store
    }

    fn postings(store: &MemoryStore, term: &str) -> PostingList {
        IndexStore::get(store, term).unwrap().unwrap_or_default()
    }

    #[test]
    fn counts_terms_and_documents() {
        let store = store_with(&[
            Document::new("a", "Apple Pie", "A delicious treat of apples and pastry"),
            Document::new("b", "Banana Bread", "Sweet bread made of bananas"),
        ]);
        let stats = IndexBuilder::default().build(&store, &store, &BuildControl::new()).unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.term_count, store.terms().len());
        assert_eq!(stats.skipped_documents, 0);
    }

    #[test]
    fn position_is_fixed_at_first_occurrence() {
        let doc = Document::new("a", "Apple Pie", "A delicious treat of apples and pastry");
        let store = store_with(&[doc.clone()]);
        IndexBuilder::default().build(&store, &store, &BuildControl::new()).unwrap();

        let doclen = doc.content().chars().count() as f64;
        let list = postings(&store, "appl");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].term_freq, 2);
        assert_eq!(list[0].position, (doclen - 1.0) / doclen);
        assert_eq!(list[0].score, 0.3 * 2.0 + 0.7 * list[0].position);

        // appl, pie, delici, treat, appl, pastri
        let pastry = postings(&store, "pastri");
        assert_eq!(pastry[0].position, (doclen - 6.0) / doclen);
    }

    #[test]
    fn position_can_go_negative_for_dense_documents() {
        // 3 characters, 4 one-letter tokens after stopword removal
        let store = store_with(&[Document::new("x", "b", "c")]);
        let normalizer = Arc::new(Repeat(vec!["z".into(); 4]));
        IndexBuilder::new(normalizer).build(&store, &store, &BuildControl::new()).unwrap();
        let list = postings(&store, "z");
        assert_eq!(list[0].term_freq, 4);
        assert_eq!(list[0].position, (3.0 - 1.0) / 3.0);

        let store = store_with(&[Document::new("y", "b", "c")]);
        let normalizer = Arc::new(Repeat(vec!["p".into(), "q".into(), "r".into(), "s".into()]));
        IndexBuilder::new(normalizer).build(&store, &store, &BuildControl::new()).unwrap();
        assert_eq!(postings(&store, "s")[0].position, (3.0 - 4.0) / 3.0);
    }

    #[test]
    fn lists_are_sorted_by_descending_score() {
        let store = store_with(&[
            Document::new("1", "intro", "a long opening paragraph before we finally mention rust"),
            Document::new("2", "rust", "rust rust rust"),
            Document::new("3", "notes", "rust"),
        ]);
        IndexBuilder::default().build(&store, &store, &BuildControl::new()).unwrap();
        for term in store.terms() {
            let list = postings(&store, &term);
            assert!(list.windows(2).all(|w| w[0].score >= w[1].score), "{term} not sorted");
        }
        assert_eq!(postings(&store, "rust")[0].docid, "2");
    }

    #[test]
    fn equal_scores_keep_scan_order() {
        let store = store_with(&[
            Document::new("1", "same", "words"),
            Document::new("2", "same", "words"),
        ]);
        IndexBuilder::default().build(&store, &store, &BuildControl::new()).unwrap();
        let ids: Vec<_> = postings(&store, "word").into_iter().map(|p| p.docid).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn empty_and_stopword_documents_add_no_postings() {
        let store = store_with(&[
            Document::new("empty", "", ""),
            Document::new("stop", "The", "and of the"),
        ]);
        let stats = IndexBuilder::default().build(&store, &store, &BuildControl::new()).unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.skipped_documents, 1);
        assert_eq!(stats.term_count, 0);
    }

    #[test]
    fn rebuild_is_idempotent_and_bumps_version() {
        let store = store_with(&[
            Document::new("a", "Apple Pie", "A delicious treat of apples and pastry"),
            Document::new("b", "Banana Bread", "Sweet bread made of bananas"),
        ]);
        let builder = IndexBuilder::default();
        builder.build(&store, &store, &BuildControl::new()).unwrap();
        let first: Vec<_> = store.terms().iter().map(|t| postings(&store, t)).collect();
        builder.build(&store, &store, &BuildControl::new()).unwrap();
        let second: Vec<_> = store.terms().iter().map(|t| postings(&store, t)).collect();
        assert_eq!(first, second);
        assert_eq!(store.meta().unwrap().unwrap().version, 2);
    }

    #[test]
    fn cancelled_build_writes_nothing() {
        let store = store_with(&[Document::new("a", "Apple", "pie")]);
        let control = BuildControl::new();
        control.cancel();
        let err = IndexBuilder::default().build(&store, &store, &control).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(store.terms().is_empty());
        assert!(store.meta().unwrap().is_none());
    }

    #[test]
    fn expired_deadline_aborts() {
        let store = store_with(&[Document::new("a", "Apple", "pie")]);
        let control = BuildControl::with_deadline(Instant::now());
        let err = IndexBuilder::default().build(&store, &store, &control).unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
    }

    #[test]
    fn normalization_failure_aborts_build() {
        let store = store_with(&[Document::new("a", "Apple", "pie")]);
        let err = IndexBuilder::new(Arc::new(Broken)).build(&store, &store, &BuildControl::new()).unwrap_err();
        assert!(matches!(err, Error::Normalization(_)));
    }

    #[test]
    fn meta_records_build_time() {
        let store = store_with(&[Document::new("a", "Apple", "pie")]);
        IndexBuilder::default().build(&store, &store, &BuildControl::new()).unwrap();
        let meta = store.meta().unwrap().unwrap();
        assert!(meta.created_at.ends_with('Z'), "{}", meta.created_at);
        assert_eq!(meta.term_count, 2);
    }

    fn pie_store() -> MemoryStore {
        // terms in write order: appl, delici, pastri, pie, treat
        store_with(&[Document::new("a", "Apple Pie", "A delicious treat of apples and pastry")])
    }

    #[test]
    fn failed_put_keeps_earlier_terms_and_skips_meta() {
        let docs = pie_store();
        let index = FlakyIndex::failing_on(3);
        let err = IndexBuilder::default()
            .with_retry(RetryPolicy::none())
            .build(&docs, &index, &BuildControl::new())
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(index.inner.terms(), vec!["appl", "delici"]);
        assert!(index.inner.meta().unwrap().is_none());
    }

    #[test]
    fn cancel_mid_build_keeps_earlier_terms_and_skips_meta() {
        let docs = pie_store();
        let control = BuildControl::new();
        let index = FlakyIndex::cancelling_after(2, control.clone());
        let err = IndexBuilder::default().build(&docs, &index, &control).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(index.inner.terms(), vec!["appl", "delici"]);
        assert!(index.inner.meta().unwrap().is_none());
    }

    /// Index that fails, or cancels its build, once a number of puts is reached.
    struct FlakyIndex {
        inner: MemoryStore,
        puts: parking_lot::Mutex<usize>,
        fail_on: Option<usize>,
        cancel_after: Option<(usize, BuildControl)>,
    }

    impl FlakyIndex {
        fn failing_on(n: usize) -> Self {
            Self { inner: MemoryStore::new(), puts: Default::default(), fail_on: Some(n), cancel_after: None }
        }

        fn cancelling_after(n: usize, control: BuildControl) -> Self {
            Self { inner: MemoryStore::new(), puts: Default::default(), fail_on: None, cancel_after: Some((n, control)) }
        }
    }

    impl IndexStore for FlakyIndex {
        fn get(&self, term: &str) -> Result<Option<PostingList>> {
            IndexStore::get(&self.inner, term)
        }

        fn put(&self, term: &str, postings: &PostingList) -> Result<()> {
            let mut puts = self.puts.lock();
            *puts += 1;
            if self.fail_on == Some(*puts) {
                return Err(Error::store("down"));
            }
            self.inner.put(term, postings)?;
            if let Some((n, control)) = &self.cancel_after {
                if *puts == *n {
                    control.cancel();
                }
            }
            Ok(())
        }

        fn meta(&self) -> Result<Option<IndexMeta>> {
            self.inner.meta()
        }

        fn put_meta(&self, meta: &IndexMeta) -> Result<()> {
            self.inner.put_meta(meta)
        }
    }

    struct Repeat(Vec<String>);

    impl TextNormalizer for Repeat {
        fn normalize(&self, _text: &str) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl TextNormalizer for Broken {
        fn normalize(&self, _text: &str) -> Result<Vec<String>> {
            Err(Error::Normalization("corrupt input".into()))
        }
    }
}
