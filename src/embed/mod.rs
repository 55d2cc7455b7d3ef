//! Embedding generation for catalog items.
//!
//! - `provider`: the external embedding API behind a trait
//! - `compose`: turns an item's fields into the text that gets embedded
//! - `enrich`: background queue that embeds items after create/edit

pub mod compose;
pub mod enrich;
pub mod provider;

pub use compose::{compose_description, content_hash};
pub use enrich::{Enricher, QueueDump};
pub use provider::{EmbeddingProvider, HttpEmbeddings, ProviderError};

/// Default embedding model, matching the hosted provider's small text model
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Dimensionality of the default model
pub const DEFAULT_DIMENSIONS: usize = 1536;

/// Query-time embedding timeout; search is latency-sensitive
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
