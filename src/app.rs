//! Application core: wires the catalog store, the embedding provider, the
//! search service and the enrichment queue together. The web and CLI layers
//! call into this and nothing else.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::embed::enrich::{self, Enricher};
use crate::embed::{EmbeddingProvider, HttpEmbeddings};
use crate::items::{BackendCsv, CatalogStore, Item, ItemCreate, ItemId, ItemUpdate};
use crate::search::{SearchError, SearchQuery, SearchResponse, SearchService};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("item not found")]
    NotFound,

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

pub struct App {
    store: Arc<dyn CatalogStore>,
    provider: Arc<dyn EmbeddingProvider>,
    search: SearchService,
    enricher: Option<Enricher>,
    config: Arc<RwLock<Config>>,
    base_path: PathBuf,
}

impl App {
    pub fn new(config: Arc<RwLock<Config>>, base_path: &Path) -> anyhow::Result<App> {
        let (dimensions, embedding_config) = {
            let config = config.read().unwrap();
            (config.embedding.dimensions, config.embedding.clone())
        };

        let store: Arc<dyn CatalogStore> = Arc::new(BackendCsv::open(base_path, dimensions)?);
        let provider: Arc<dyn EmbeddingProvider> =
            Arc::new(HttpEmbeddings::new(&embedding_config).map_err(anyhow::Error::new)?);

        Ok(Self::with_parts(store, provider, config, base_path))
    }

    /// Assemble an app from explicit parts. Lets tests substitute the store
    /// or provider.
    pub fn with_parts(
        store: Arc<dyn CatalogStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: Arc<RwLock<Config>>,
        base_path: &Path,
    ) -> App {
        let search = SearchService::new(store.clone(), provider.clone(), config.clone());

        App {
            store,
            provider,
            search,
            enricher: None,
            config,
            base_path: base_path.to_path_buf(),
        }
    }

    /// Start the background enrichment queue. Without it, writes still work
    /// and enrichment waits for a `reembed`.
    pub fn run_queue(&mut self) {
        self.enricher = Some(Enricher::start(
            self.store.clone(),
            self.provider.clone(),
            self.config.clone(),
            self.base_path.clone(),
        ));
    }

    /// Stop the queue, waiting for in-flight enrichments to finish.
    pub fn shutdown(&mut self) {
        if let Some(mut enricher) = self.enricher.take() {
            enricher.shutdown();
        }
    }

    pub fn config(&self) -> Arc<RwLock<Config>> {
        self.config.clone()
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn enqueue_enrich(&self, item: &Item) {
        match &self.enricher {
            Some(enricher) => enricher.enqueue(item.id.clone(), &item.owner_id),
            None => log::debug!(
                "enrichment queue is not running, item {} stays unembedded",
                item.id
            ),
        }
    }

    /// Create an item. Returns as soon as the row is written; embedding
    /// generation happens in the background.
    pub fn create(&self, owner: &str, create: ItemCreate) -> Result<Item, AppError> {
        if create.img_url.trim().is_empty() {
            return Err(AppError::Invalid("img_url must not be empty".to_string()));
        }

        let item = self.store.create(owner, create)?;
        self.enqueue_enrich(&item);

        Ok(item)
    }

    /// Update an item. An edit that changes the embedding source drops the
    /// stored embedding and queues a fresh enrichment.
    pub fn update(&self, owner: &str, id: &ItemId, update: ItemUpdate) -> Result<Item, AppError> {
        let stale = update.touches_embedding_source();

        let item = self.store.update(owner, id, update)?.ok_or(AppError::NotFound)?;

        if stale {
            self.store.clear_embedding(id)?;
            self.enqueue_enrich(&item);
        }

        Ok(item)
    }

    pub fn delete(&self, owner: &str, id: &ItemId) -> Result<(), AppError> {
        if self.store.delete(owner, id)? {
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }

    pub fn search(&self, query: &SearchQuery) -> Result<SearchResponse, AppError> {
        Ok(self.search.search(query)?)
    }

    /// Queue (or, without a running queue, run inline) enrichment for every
    /// item of an owner that has no embedding yet.
    pub fn reembed(&self, owner: &str) -> Result<usize, AppError> {
        let missing = self.store.missing_embeddings(owner)?;
        let count = missing.len();

        for id in missing {
            match &self.enricher {
                Some(enricher) => enricher.enqueue(id, owner),
                None => {
                    let status =
                        enrich::run_enrich(self.store.as_ref(), self.provider.as_ref(), owner, &id);
                    log::info!("enriched item {id}: {status:?}");
                }
            }
        }

        Ok(count)
    }

    /// Best-effort inline enrichment, used by the one-shot CLI where no
    /// queue is running. Failure leaves the item unembedded, never fails the
    /// caller.
    pub fn enrich_now(&self, owner: &str, id: &ItemId) {
        let status = enrich::run_enrich(self.store.as_ref(), self.provider.as_ref(), owner, id);
        log::debug!("inline enrichment for item {id}: {status:?}");
    }
}
