use crate::error::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref RE: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{N}_']*").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "just","let's","me","more","most","mustn't","my","myself",
            "no","nor","not","now","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","will","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// Turns raw text into the ordered terms that are indexed and searched.
///
/// Index builds and queries must share one implementation, otherwise query
/// terms will not line up with the stored posting lists.
pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, text: &str) -> Result<Vec<String>>;

    /// Normalize raw bytes, rejecting anything that is not UTF-8.
    fn normalize_bytes(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::Normalization(format!("input is not valid UTF-8: {e}")))?;
        self.normalize(text)
    }
}

/// NFKC normalization, lowercasing, English stopword removal and Snowball stemming.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnglishNormalizer;

impl TextNormalizer for EnglishNormalizer {
    fn normalize(&self, text: &str) -> Result<Vec<String>> {
        Ok(tokenize(text))
    }
}

pub fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Tokenize text into stemmed terms, in document order, with stopwords dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    RE.find_iter(&normalized)
        .map(|mat| mat.as_str())
        .filter(|token| !is_stopword(token))
        .map(|token| STEMMER.stem(token).into_owned())
        .collect()
}
