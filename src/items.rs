use std::cmp::Reverse;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::vectors::{VectorFile, VectorFileError, VectorIndex};

/// Item identifier: a ULID string.
///
/// ULIDs are lexicographically ordered by creation time, which the cursor
/// tie-break relies on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    #[inline]
    pub fn new() -> ItemId {
        ItemId(rusty_ulid::generate_ulid_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Binary form for the vectors.bin sidecar. Non-ULID ids (which can only
    /// come from hand-edited files) collapse to zero and are never persisted.
    pub fn to_u128(&self) -> u128 {
        rusty_ulid::Ulid::from_str(&self.0)
            .map(u128::from)
            .unwrap_or(0)
    }

    pub fn from_u128(value: u128) -> ItemId {
        ItemId(rusty_ulid::Ulid::from(value).to_string())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        ItemId(s)
    }
}

/// A captured catalog entry.
///
/// The embedding is not part of the row; it lives in the vector sidecar and
/// is absent until the enricher has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub owner_id: String,

    pub img_url: String,
    pub src_url: Option<String>,

    pub title: Option<String>,
    pub vendor: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub material: Option<String>,
    pub colour_hex: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ItemCreate {
    pub img_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colour_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ItemUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colour_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl ItemUpdate {
    /// True when the update touches any field that feeds the composed
    /// embedding text, i.e. when the stored embedding goes stale.
    pub fn touches_embedding_source(&self) -> bool {
        self.title.is_some()
            || self.vendor.is_some()
            || self.description.is_some()
            || self.category.is_some()
            || self.material.is_some()
            || self.colour_hex.is_some()
            || self.price.is_some()
            || self.currency.is_some()
    }
}

static HEX_COLOUR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#?[0-9a-fA-F]{3,8}$").expect("hex colour regex is valid")
});

/// Structured search constraints, combined with AND.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ItemFilters {
    pub category: Option<String>,
    pub vendor: Option<String>,
    pub colour_hex: Option<String>,
    pub price_max: Option<f64>,
}

impl ItemFilters {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.vendor.is_none()
            && self.colour_hex.is_none()
            && self.price_max.is_none()
    }

    /// Reject malformed filter values before any storage or network call.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(price_max) = self.price_max {
            if !price_max.is_finite() || price_max < 0.0 {
                return Err(format!("price_max must be a non-negative number, got {price_max}"));
            }
        }
        if let Some(colour) = &self.colour_hex {
            if !HEX_COLOUR.is_match(colour.trim()) {
                return Err(format!("colour must be a hex colour code, got {colour:?}"));
            }
        }
        Ok(())
    }

    pub fn matches(&self, item: &Item) -> bool {
        if let Some(category) = &self.category {
            if !contains_insensitive(item.category.as_deref(), category) {
                return false;
            }
        }
        if let Some(vendor) = &self.vendor {
            if !contains_insensitive(item.vendor.as_deref(), vendor) {
                return false;
            }
        }
        if let Some(colour) = &self.colour_hex {
            let wanted = colour.trim().trim_start_matches('#');
            let got = item.colour_hex.as_deref().unwrap_or("").trim_start_matches('#');
            if !got.to_lowercase().contains(&wanted.to_lowercase()) {
                return false;
            }
        }
        if let Some(price_max) = self.price_max {
            // unpriced items cannot satisfy a price ceiling
            match item.price {
                Some(price) if price <= price_max => {}
                _ => return false,
            }
        }
        true
    }
}

fn contains_insensitive(field: Option<&str>, needle: &str) -> bool {
    field
        .map(|value| value.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

/// True when every whitespace-split token of `text` appears in at least one
/// of the item's textual fields, case-insensitively.
pub fn keyword_matches(item: &Item, text: &str) -> bool {
    let fields = [
        item.title.as_deref(),
        item.vendor.as_deref(),
        item.description.as_deref(),
        item.category.as_deref(),
        item.material.as_deref(),
    ];

    text.split_whitespace().all(|token| {
        let token = token.to_lowercase();
        fields
            .iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&token))
    })
}

/// Position in the `created_at` desc, id desc ordering. The page after a
/// token contains only items strictly older than it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken {
    pub created_at: DateTime<Utc>,
    pub id: ItemId,
}

/// A candidate for similarity ranking: id, recency, stored embedding.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: ItemId,
    pub created_at: DateTime<Utc>,
    pub embedding: Vec<f32>,
}

/// Catalog persistence. Every read is scoped by owner; embedding writes go
/// through the dedicated slot methods and never rewrite the row.
pub trait CatalogStore: Send + Sync {
    fn create(&self, owner: &str, create: ItemCreate) -> anyhow::Result<Item>;
    fn get(&self, owner: &str, id: &ItemId) -> anyhow::Result<Option<Item>>;
    fn update(&self, owner: &str, id: &ItemId, update: ItemUpdate)
        -> anyhow::Result<Option<Item>>;
    fn delete(&self, owner: &str, id: &ItemId) -> anyhow::Result<bool>;

    /// One page of items for an owner: filters plus optional keyword match,
    /// ordered `created_at` desc (id desc tie-break), starting strictly
    /// after `after`.
    fn list_page(
        &self,
        owner: &str,
        filters: &ItemFilters,
        keyword: Option<&str>,
        after: Option<&PageToken>,
        limit: usize,
    ) -> anyhow::Result<Vec<Item>>;

    /// All of an owner's filter-matching items that have an embedding.
    fn embedded_candidates(
        &self,
        owner: &str,
        filters: &ItemFilters,
    ) -> anyhow::Result<Vec<Candidate>>;

    /// Atomically replace the embedding slot for an item. Rejects vectors of
    /// the wrong dimensionality.
    fn update_embedding(
        &self,
        id: &ItemId,
        content_hash: u64,
        embedding: Vec<f32>,
    ) -> anyhow::Result<()>;

    /// Drop the stored embedding (stale after a textual edit).
    fn clear_embedding(&self, id: &ItemId) -> anyhow::Result<()>;

    /// Content hash the stored embedding was derived from, if present.
    fn embedding_hash(&self, id: &ItemId) -> anyhow::Result<Option<u64>>;

    /// Ids of an owner's items that have no embedding yet.
    fn missing_embeddings(&self, owner: &str) -> anyhow::Result<Vec<ItemId>>;
}

const CSV_HEADERS: [&str; 13] = [
    "id",
    "owner_id",
    "img_url",
    "src_url",
    "title",
    "vendor",
    "description",
    "category",
    "material",
    "colour_hex",
    "price",
    "currency",
    "created_at",
];

/// CSV-backed catalog: items.csv plus the vectors.bin embedding sidecar.
pub struct BackendCsv {
    list: Arc<RwLock<Vec<Item>>>,
    vectors: Arc<RwLock<VectorIndex>>,
    vector_file: VectorFile,
    csv_path: PathBuf,
}

impl BackendCsv {
    /// Open (or create) the catalog in `base_dir`.
    pub fn open(base_dir: &Path, dimensions: usize) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        let csv_path = base_dir.join("items.csv");

        if let Err(err) = std::fs::metadata(&csv_path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("creating new catalog at {}", csv_path.display());
                    let mut csv_wrt = csv::Writer::from_path(&csv_path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let mut items = vec![];
        let mut csv_reader = csv::Reader::from_path(&csv_path)?;
        for record in csv_reader.records() {
            items.push(parse_record(&record?)?);
        }

        let vector_file = VectorFile::new(base_dir.join("vectors.bin"));
        let vectors = if vector_file.exists() {
            match vector_file.load(dimensions) {
                Ok(index) => {
                    log::info!("loaded {} embeddings from {}", index.len(), vector_file.path().display());
                    index
                }
                Err(VectorFileError::Io(err)) => Err(err)?,
                Err(err) => {
                    // stale or corrupt sidecar: enrichment rebuilds it
                    log::warn!("discarding embedding sidecar: {err}");
                    VectorIndex::new(dimensions)
                }
            }
        } else {
            VectorIndex::new(dimensions)
        };

        Ok(BackendCsv {
            list: Arc::new(RwLock::new(items)),
            vectors: Arc::new(RwLock::new(vectors)),
            vector_file,
            csv_path,
        })
    }

    fn save(&self, items: &[Item]) -> anyhow::Result<()> {
        let temp_path = self.csv_path.with_extension("csv-tmp");
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for item in items {
            csv_wrt.write_record([
                item.id.as_str(),
                &item.owner_id,
                &item.img_url,
                item.src_url.as_deref().unwrap_or(""),
                item.title.as_deref().unwrap_or(""),
                item.vendor.as_deref().unwrap_or(""),
                item.description.as_deref().unwrap_or(""),
                item.category.as_deref().unwrap_or(""),
                item.material.as_deref().unwrap_or(""),
                item.colour_hex.as_deref().unwrap_or(""),
                &item.price.map(|p| p.to_string()).unwrap_or_default(),
                item.currency.as_deref().unwrap_or(""),
                &item.created_at.to_rfc3339(),
            ])?;
        }
        csv_wrt.flush()?;
        std::fs::rename(&temp_path, &self.csv_path)?;
        Ok(())
    }

    fn save_vectors(&self, index: &VectorIndex) -> anyhow::Result<()> {
        self.vector_file.save(index)?;
        Ok(())
    }
}

fn parse_record(record: &csv::StringRecord) -> anyhow::Result<Item> {
    let field = |idx: usize, name: &str| -> anyhow::Result<String> {
        Ok(record
            .get(idx)
            .ok_or_else(|| anyhow!("missing column {name}"))?
            .to_string())
    };
    let optional = |idx: usize, name: &str| -> anyhow::Result<Option<String>> {
        let value = field(idx, name)?;
        Ok(if value.is_empty() { None } else { Some(value) })
    };

    let price = match field(10, "price")?.as_str() {
        "" => None,
        raw => Some(raw.parse::<f64>()?),
    };
    let created_at = DateTime::parse_from_rfc3339(&field(12, "created_at")?)?.with_timezone(&Utc);

    Ok(Item {
        id: ItemId::from(field(0, "id")?),
        owner_id: field(1, "owner_id")?,
        img_url: field(2, "img_url")?,
        src_url: optional(3, "src_url")?,
        title: optional(4, "title")?,
        vendor: optional(5, "vendor")?,
        description: optional(6, "description")?,
        category: optional(7, "category")?,
        material: optional(8, "material")?,
        colour_hex: optional(9, "colour_hex")?,
        price,
        currency: optional(11, "currency")?,
        created_at,
    })
}

impl CatalogStore for BackendCsv {
    fn create(&self, owner: &str, create: ItemCreate) -> anyhow::Result<Item> {
        let item = Item {
            id: ItemId::new(),
            owner_id: owner.to_string(),
            img_url: create.img_url,
            src_url: create.src_url,
            title: create.title,
            vendor: create.vendor,
            description: create.description,
            category: create.category,
            material: create.material,
            colour_hex: create.colour_hex,
            price: create.price,
            currency: create.currency,
            created_at: Utc::now(),
        };

        let mut items = self.list.write().unwrap();
        items.push(item.clone());
        self.save(&items)?;

        Ok(item)
    }

    fn get(&self, owner: &str, id: &ItemId) -> anyhow::Result<Option<Item>> {
        let items = self.list.read().unwrap();
        Ok(items
            .iter()
            .find(|item| item.owner_id == owner && &item.id == id)
            .cloned())
    }

    fn update(
        &self,
        owner: &str,
        id: &ItemId,
        update: ItemUpdate,
    ) -> anyhow::Result<Option<Item>> {
        let mut items = self.list.write().unwrap();

        let Some(item) = items
            .iter_mut()
            .find(|item| item.owner_id == owner && &item.id == id)
        else {
            return Ok(None);
        };

        if let Some(img_url) = update.img_url {
            item.img_url = img_url;
        }
        if let Some(src_url) = update.src_url {
            item.src_url = Some(src_url);
        }
        if let Some(title) = update.title {
            item.title = Some(title);
        }
        if let Some(vendor) = update.vendor {
            item.vendor = Some(vendor);
        }
        if let Some(description) = update.description {
            item.description = Some(description);
        }
        if let Some(category) = update.category {
            item.category = Some(category);
        }
        if let Some(material) = update.material {
            item.material = Some(material);
        }
        if let Some(colour_hex) = update.colour_hex {
            item.colour_hex = Some(colour_hex);
        }
        if let Some(price) = update.price {
            item.price = Some(price);
        }
        if let Some(currency) = update.currency {
            item.currency = Some(currency);
        }

        let result = item.clone();
        self.save(&items)?;

        Ok(Some(result))
    }

    fn delete(&self, owner: &str, id: &ItemId) -> anyhow::Result<bool> {
        let mut items = self.list.write().unwrap();
        let before = items.len();
        items.retain(|item| !(item.owner_id == owner && &item.id == id));
        if items.len() == before {
            return Ok(false);
        }
        self.save(&items)?;
        drop(items);

        let mut vectors = self.vectors.write().unwrap();
        if vectors.remove(id).is_some() {
            self.save_vectors(&vectors)?;
        }

        Ok(true)
    }

    fn list_page(
        &self,
        owner: &str,
        filters: &ItemFilters,
        keyword: Option<&str>,
        after: Option<&PageToken>,
        limit: usize,
    ) -> anyhow::Result<Vec<Item>> {
        let items = self.list.read().unwrap();

        let mut matched: Vec<&Item> = items
            .iter()
            .filter(|item| item.owner_id == owner)
            .filter(|item| filters.matches(item))
            .filter(|item| keyword.map(|text| keyword_matches(item, text)).unwrap_or(true))
            .filter(|item| match after {
                Some(token) => {
                    item.created_at < token.created_at
                        || (item.created_at == token.created_at && item.id < token.id)
                }
                None => true,
            })
            .collect();

        matched.sort_by_key(|item| Reverse((item.created_at, item.id.clone())));
        matched.truncate(limit);

        Ok(matched.into_iter().cloned().collect())
    }

    fn embedded_candidates(
        &self,
        owner: &str,
        filters: &ItemFilters,
    ) -> anyhow::Result<Vec<Candidate>> {
        let items = self.list.read().unwrap();
        let vectors = self.vectors.read().unwrap();

        Ok(items
            .iter()
            .filter(|item| item.owner_id == owner)
            .filter(|item| filters.matches(item))
            .filter_map(|item| {
                vectors.get(&item.id).map(|stored| Candidate {
                    id: item.id.clone(),
                    created_at: item.created_at,
                    embedding: stored.embedding.clone(),
                })
            })
            .collect())
    }

    fn update_embedding(
        &self,
        id: &ItemId,
        content_hash: u64,
        embedding: Vec<f32>,
    ) -> anyhow::Result<()> {
        let mut vectors = self.vectors.write().unwrap();
        vectors.insert(id.clone(), content_hash, embedding)?;
        self.save_vectors(&vectors)
    }

    fn clear_embedding(&self, id: &ItemId) -> anyhow::Result<()> {
        let mut vectors = self.vectors.write().unwrap();
        if vectors.remove(id).is_some() {
            self.save_vectors(&vectors)?;
        }
        Ok(())
    }

    fn embedding_hash(&self, id: &ItemId) -> anyhow::Result<Option<u64>> {
        let vectors = self.vectors.read().unwrap();
        Ok(vectors.get(id).map(|stored| stored.content_hash))
    }

    fn missing_embeddings(&self, owner: &str) -> anyhow::Result<Vec<ItemId>> {
        let items = self.list.read().unwrap();
        let vectors = self.vectors.read().unwrap();

        Ok(items
            .iter()
            .filter(|item| item.owner_id == owner)
            .filter(|item| !vectors.contains(&item.id))
            .map(|item| item.id.clone())
            .collect())
    }
}
