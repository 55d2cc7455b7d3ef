//! Integration-style tests for the retrieval pipeline.
//!
//! Each test builds an isolated app in a temp directory with a scripted
//! embedding provider, so no network or model is involved.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::app::App;
use crate::config::Config;
use crate::embed::{EmbeddingProvider, ProviderError};
use crate::items::BackendCsv;

mod web;

/// Embedding dimensionality used across tests; small enough to write
/// vectors by hand.
pub const TEST_DIMS: usize = 3;

type EmbedFn = Box<dyn Fn(&str) -> Result<Vec<f32>, ProviderError> + Send + Sync>;

/// Scripted embedding provider with a call counter.
pub struct MockProvider {
    dims: usize,
    embed_fn: EmbedFn,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn returning(
        embed_fn: impl Fn(&str) -> Result<Vec<f32>, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            dims: TEST_DIMS,
            embed_fn: Box::new(embed_fn),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always returns the same vector.
    pub fn fixed(vector: Vec<f32>) -> Self {
        Self::returning(move |_| Ok(vector.clone()))
    }

    /// Deterministically fails every call.
    pub fn failing() -> Self {
        Self::returning(|_| Err(ProviderError::Timeout))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for MockProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.embed_fn)(text)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.dimensions = TEST_DIMS;
    config
}

/// Creates an isolated app in a unique temp directory, so parallel tests
/// never collide and no real data is touched.
pub fn create_app(
    provider: Arc<MockProvider>,
) -> (App, Arc<BackendCsv>, tempfile::TempDir) {
    create_app_with_config(provider, test_config())
}

pub fn create_app_with_config(
    provider: Arc<MockProvider>,
    config: Config,
) -> (App, Arc<BackendCsv>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");

    let store = Arc::new(
        BackendCsv::open(tmp.path(), config.embedding.dimensions)
            .expect("failed to open catalog"),
    );
    let config = Arc::new(RwLock::new(config));

    let app = App::with_parts(store.clone(), provider, config, tmp.path());
    (app, store, tmp)
}
