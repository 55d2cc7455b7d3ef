//! Retrieval pipeline for catalog items.
//!
//! A query takes one of two paths: semantic (embed the query, rank stored
//! embeddings by cosine similarity) or keyword (substring match over the
//! textual fields). The orchestrator picks the path and guarantees a uniform
//! response shape either way: a degraded provider downgrades the search, it
//! never breaks it.
//!
//! - `ranker`: pure cosine-similarity ranking
//! - `cursor`: opaque pagination cursors
//! - `orchestrator`: path selection, filtering, pagination

mod cursor;
mod orchestrator;
mod ranker;

pub use cursor::CursorError;
pub use orchestrator::{
    SearchError, SearchItem, SearchQuery, SearchResponse, SearchService, SearchType,
};
pub use ranker::{rank, RankError, RankOutcome, Ranked};

/// Default similarity threshold; results must score strictly above it
pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// Default page size
pub const DEFAULT_LIMIT: usize = 20;

/// Hard cap on the page size; larger requests are clamped
pub const MAX_LIMIT: usize = 100;
