pub mod builder;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod model;
pub mod store;
pub mod tokenizer;

pub use builder::{BuildControl, IndexBuilder};
pub use engine::{QueryEngine, SearchPage};
pub use error::{Error, Result};
pub use model::*;
pub use store::{DocumentStore, IndexStore, MemoryStore, RetryPolicy, SledStore};
pub use tokenizer::{EnglishNormalizer, TextNormalizer};
