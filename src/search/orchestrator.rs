//! Search orchestration.
//!
//! Single entry point for every read of the catalog: browse, keyword search
//! and semantic search all come through `SearchService::search` and return
//! the same response shape, tagged with the path that produced it.

use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::config::Config;
use crate::embed::EmbeddingProvider;
use crate::items::{CatalogStore, Item, ItemFilters, PageToken};

use super::cursor;
use super::ranker::rank;

/// Which path produced a result. Carried to the caller so the degraded
/// (fallback) path is observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Semantic,
    Keyword,
}

/// One search request. `semantic: false` forces the keyword path even when
/// embeddings exist.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub owner_id: String,
    pub text: Option<String>,
    pub filters: ItemFilters,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub semantic: bool,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            owner_id: String::new(),
            text: None,
            filters: ItemFilters::default(),
            limit: None,
            cursor: None,
            semantic: true,
        }
    }
}

/// An item in a result page; `score` is present on the semantic path only.
#[derive(Debug, Clone, Serialize)]
pub struct SearchItem {
    #[serde(flatten)]
    pub item: Item,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub items: Vec<SearchItem>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(rename = "searchType")]
    pub search_type: SearchType,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("storage unavailable: {0}")]
    Storage(#[from] anyhow::Error),
}

pub struct SearchService {
    store: Arc<dyn CatalogStore>,
    provider: Arc<dyn EmbeddingProvider>,
    config: Arc<RwLock<Config>>,
}

impl SearchService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Run a search.
    ///
    /// Blank text browses newest-first. Non-blank text attempts the semantic
    /// path and falls back to keyword matching when the provider fails or
    /// nothing clears the threshold, so the caller sees a result list either
    /// way. Filters are validated before anything touches the network or
    /// storage, and apply identically on every path.
    pub fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchError> {
        query
            .filters
            .validate()
            .map_err(SearchError::InvalidFilter)?;

        let (semantic_enabled, threshold, default_limit, max_limit, dimensions) = {
            let config = self.config.read().unwrap();
            (
                config.search.semantic_enabled,
                config.search.threshold,
                config.search.default_limit,
                config.search.max_limit,
                config.embedding.dimensions,
            )
        };

        let limit = query.limit.unwrap_or(default_limit).clamp(1, max_limit);
        let after = match &query.cursor {
            Some(raw) => Some(cursor::decode(raw).map_err(|_| SearchError::InvalidCursor)?),
            None => None,
        };

        let text = query.text.as_deref().unwrap_or("").trim().to_string();

        // Paging always continues on the keyword ordering; the semantic path
        // serves the first page of a fresh query only, so concatenating
        // pages walks one stable ordering.
        if !text.is_empty() && query.semantic && semantic_enabled && after.is_none() {
            if let Some(response) =
                self.semantic_page(query, &text, dimensions, threshold, limit)?
            {
                return Ok(response);
            }
        }

        self.keyword_page(query, &text, after, limit)
    }

    /// Attempt the semantic path. `Ok(None)` means "fall back to keyword":
    /// the provider failed, the embedding was unusable, or nothing cleared
    /// the threshold.
    fn semantic_page(
        &self,
        query: &SearchQuery,
        text: &str,
        dimensions: usize,
        threshold: f32,
        limit: usize,
    ) -> Result<Option<SearchResponse>, SearchError> {
        let embedding = match self.provider.embed(text) {
            Ok(embedding) => embedding,
            Err(err) => {
                log::warn!("query embedding failed, falling back to keyword search: {err}");
                return Ok(None);
            }
        };

        let candidates = self
            .store
            .embedded_candidates(&query.owner_id, &query.filters)?;

        let outcome = match rank(&embedding, dimensions, &candidates, threshold, limit) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("ranking failed, falling back to keyword search: {err}");
                return Ok(None);
            }
        };

        if outcome.skipped > 0 {
            log::warn!(
                "skipped {} candidates with corrupt embeddings for owner {}",
                outcome.skipped,
                query.owner_id
            );
        }

        if outcome.ranked.is_empty() {
            return Ok(None);
        }

        let mut items = Vec::with_capacity(outcome.ranked.len());
        for ranked in outcome.ranked {
            if let Some(item) = self.store.get(&query.owner_id, &ranked.id)? {
                items.push(SearchItem {
                    item,
                    score: Some(ranked.score),
                });
            }
        }

        Ok(Some(SearchResponse {
            items,
            next_cursor: None,
            search_type: SearchType::Semantic,
        }))
    }

    fn keyword_page(
        &self,
        query: &SearchQuery,
        text: &str,
        after: Option<PageToken>,
        limit: usize,
    ) -> Result<SearchResponse, SearchError> {
        let keyword = if text.is_empty() { None } else { Some(text) };

        let page = self.store.list_page(
            &query.owner_id,
            &query.filters,
            keyword,
            after.as_ref(),
            limit,
        )?;

        let next_cursor = if page.len() == limit {
            page.last().map(|item| {
                cursor::encode(&PageToken {
                    created_at: item.created_at,
                    id: item.id.clone(),
                })
            })
        } else {
            None
        };

        Ok(SearchResponse {
            items: page
                .into_iter()
                .map(|item| SearchItem { item, score: None })
                .collect(),
            next_cursor,
            search_type: SearchType::Keyword,
        })
    }
}
