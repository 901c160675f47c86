use crate::error::{Error, Result};
use crate::model::{Document, IndexMeta, PostingList};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::Duration;

pub type DocumentScan<'a> = Box<dyn Iterator<Item = Result<Document>> + 'a>;

/// Documents keyed by id.
pub trait DocumentStore: Send + Sync {
    /// Insert, or replace the document with the same id.
    fn upsert(&self, doc: &Document) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<Document>>;
    /// Every stored document, in store-defined order.
    fn scan(&self) -> DocumentScan<'_>;
    fn len(&self) -> Result<usize>;
}

/// Posting lists keyed by normalized term.
///
/// Terms are written one at a time; readers running during a rebuild may see
/// a mix of old and new lists. `meta` only changes once a build has finished.
pub trait IndexStore: Send + Sync {
    fn get(&self, term: &str) -> Result<Option<PostingList>>;
    /// Replace the whole list for `term`.
    fn put(&self, term: &str, postings: &PostingList) -> Result<()>;
    fn meta(&self) -> Result<Option<IndexMeta>>;
    fn put_meta(&self, meta: &IndexMeta) -> Result<()>;
}

/// Bounded retry with exponential backoff for transient store failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    pub fn run<T>(&self, op: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match f() {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(op, attempt, error = %e, "store call failed, retrying");
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.max_backoff);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// In-process store holding both documents and posting lists.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, Document>>,
    terms: RwLock<BTreeMap<String, PostingList>>,
    meta: RwLock<Option<IndexMeta>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn terms(&self) -> Vec<String> {
        self.terms.read().keys().cloned().collect()
    }
}

impl DocumentStore for MemoryStore {
    fn upsert(&self, doc: &Document) -> Result<()> {
        self.docs.write().insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().get(id).cloned())
    }

    fn scan(&self) -> DocumentScan<'_> {
        let snapshot: Vec<Document> = self.docs.read().values().cloned().collect();
        Box::new(snapshot.into_iter().map(Ok::<_, Error>))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.docs.read().len())
    }
}

impl IndexStore for MemoryStore {
    fn get(&self, term: &str) -> Result<Option<PostingList>> {
        Ok(self.terms.read().get(term).cloned())
    }

    fn put(&self, term: &str, postings: &PostingList) -> Result<()> {
        self.terms.write().insert(term.to_string(), postings.clone());
        Ok(())
    }

    fn meta(&self) -> Result<Option<IndexMeta>> {
        Ok(self.meta.read().clone())
    }

    fn put_meta(&self, meta: &IndexMeta) -> Result<()> {
        *self.meta.write() = Some(meta.clone());
        Ok(())
    }
}

const META_KEY: &[u8] = b"index";

/// On-disk store backed by sled: one tree for documents, one for unigrams.
pub struct SledStore {
    db: sled::Db,
    documents: sled::Tree,
    unigrams: sled::Tree,
    meta: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Open with an explicit background flush interval. `None` runs no flusher
    /// thread, so the directory lock is released as soon as the store is dropped;
    /// callers must `flush` themselves.
    pub fn open_with<P: AsRef<Path>>(path: P, flush_every_ms: Option<u64>) -> Result<Self> {
        let db = sled::Config::new().path(path).flush_every_ms(flush_every_ms).open()?;
        Self::from_db(db)
    }

    /// A store that is deleted when dropped.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let documents = db.open_tree("documents")?;
        let unigrams = db.open_tree("unigrams")?;
        let meta = db.open_tree("meta")?;
        Ok(Self { db, documents, unigrams, meta })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn term_count(&self) -> usize {
        self.unigrams.len()
    }
}

impl DocumentStore for SledStore {
    fn upsert(&self, doc: &Document) -> Result<()> {
        let bytes = bincode::serialize(doc)?;
        self.documents.insert(doc.id.as_bytes(), bytes)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Document>> {
        match self.documents.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan(&self) -> DocumentScan<'_> {
        Box::new(self.documents.iter().map(|entry| -> Result<Document> {
            let (_, bytes) = entry?;
            Ok(bincode::deserialize(&bytes)?)
        }))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.documents.len())
    }
}

impl IndexStore for SledStore {
    fn get(&self, term: &str) -> Result<Option<PostingList>> {
        match self.unigrams.get(term.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, term: &str, postings: &PostingList) -> Result<()> {
        let bytes = bincode::serialize(postings)?;
        self.unigrams.insert(term.as_bytes(), bytes)?;
        Ok(())
    }

    fn meta(&self) -> Result<Option<IndexMeta>> {
        match self.meta.get(META_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_meta(&self, meta: &IndexMeta) -> Result<()> {
        let json = serde_json::to_vec_pretty(meta)?;
        self.meta.insert(META_KEY, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Posting;
    use std::cell::Cell;

    #[test]
    fn sled_roundtrips_documents_and_postings() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open_with(dir.path(), None).unwrap();
            store.upsert(&Document::new("1", "Title", "old")).unwrap();
            store.upsert(&Document::new("1", "Title", "new")).unwrap();
            let list = vec![Posting::first_occurrence("1", "Title", 0.5)];
            store.put("titl", &list).unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open_with(dir.path(), None).unwrap();
        assert_eq!(DocumentStore::len(&store).unwrap(), 1);
        assert_eq!(DocumentStore::get(&store, "1").unwrap().unwrap().body, "new");
        let list = IndexStore::get(&store, "titl").unwrap().unwrap();
        assert_eq!(list[0].docid, "1");
        assert!(IndexStore::get(&store, "missing").unwrap().is_none());
    }

    #[test]
    fn sled_meta_is_absent_until_written() {
        let store = SledStore::temporary().unwrap();
        assert!(store.meta().unwrap().is_none());
        let meta = IndexMeta { version: 1, created_at: "2024-01-01T00:00:00Z".into(), term_count: 2, document_count: 1 };
        store.put_meta(&meta).unwrap();
        assert_eq!(store.meta().unwrap(), Some(meta));
    }

    #[test]
    fn retry_recovers_from_transient_failures() {
        let calls = Cell::new(0);
        let policy = RetryPolicy { initial_backoff: Duration::from_millis(1), ..RetryPolicy::default() };
        let out = policy.run("flaky", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(Error::store("busy")) } else { Ok(7) }
        });
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let policy = RetryPolicy { initial_backoff: Duration::from_millis(1), ..RetryPolicy::default() };
        let out: Result<()> = policy.run("down", || {
            calls.set(calls.get() + 1);
            Err(Error::store("down"))
        });
        assert!(out.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_does_not_repeat_permanent_errors() {
        let calls = Cell::new(0);
        let out: Result<()> = RetryPolicy::default().run("normalize", || {
            calls.set(calls.get() + 1);
            Err(Error::Normalization("bad".into()))
        });
        assert!(out.is_err());
        assert_eq!(calls.get(), 1);
    }
}
