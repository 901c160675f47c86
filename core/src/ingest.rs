use crate::error::{Error, Result};
use crate::model::Document;
use crate::store::DocumentStore;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Titles longer than this many characters are cut down to `MAX_TITLE_WORDS` words.
const TITLE_TRUNCATE_CHARS: usize = 10;
const MAX_TITLE_WORDS: usize = 10;

/// Parse one `docid,content` row. Title and body are separated by the first
/// double space in `content`.
pub fn parse_line(line: &str) -> Option<Document> {
    let (docid, content) = line.split_once(',')?;
    let (title, body) = content.trim().split_once("  ")?;

    let title = title.strip_prefix('"').map_or(title, str::trim_start);
    let body = body.strip_suffix('"').map_or(body, str::trim_end);
    let title = if title.chars().count() > TITLE_TRUNCATE_CHARS {
        title.split(' ').take(MAX_TITLE_WORDS).collect::<Vec<_>>().join(" ")
    } else {
        title.to_string()
    };
    Some(Document::new(docid.trim(), title, body))
}

/// Load every row of a delimited data file into `store`, replacing documents
/// with the same id. Returns the number of rows stored.
pub fn upload<P: AsRef<Path>>(store: &dyn DocumentStore, path: P) -> Result<usize> {
    let path = path.as_ref();
    let f = File::open(path).map_err(|e| Error::Ingest(format!("{}: {e}", path.display())))?;
    let reader = BufReader::new(f);
    let mut count = 0;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| Error::Ingest(format!("{}:{}: {e}", path.display(), lineno + 1)))?;
        if line.trim().is_empty() { continue; }
        match parse_line(&line) {
            Some(doc) => {
                store.upsert(&doc)?;
                count += 1;
            }
            None => tracing::warn!(line = lineno + 1, "skipping malformed row"),
        }
    }
    tracing::info!(count, path = %path.display(), "uploaded documents");
    Ok(count)
}
