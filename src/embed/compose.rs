//! Composes the text that gets embedded for an item.
//!
//! The field order is fixed: title, vendor, category, material, description,
//! colour, price. Reordering would change the embedding for unchanged items,
//! so the order is part of the storage contract.

use crate::items::Item;

/// Maximum length of the composed description (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 1024;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Build the embedding input for an item.
///
/// Returns `None` when no field carries content; such items are never
/// embedded.
pub fn compose_description(item: &Item) -> Option<String> {
    let mut parts: Vec<String> = vec![];

    let mut push = |label: &str, value: Option<&str>| {
        if let Some(value) = value {
            let value = value.trim();
            if !value.is_empty() {
                parts.push(format!("{label}: {value}"));
            }
        }
    };

    push("Product", item.title.as_deref());
    push("Brand", item.vendor.as_deref());
    push("Category", item.category.as_deref());
    push("Material", item.material.as_deref());
    push("Description", item.description.as_deref());
    push("Color", item.colour_hex.as_deref());

    if let (Some(price), Some(currency)) = (item.price, item.currency.as_deref()) {
        let currency = currency.trim();
        if !currency.is_empty() {
            parts.push(format!("Price: {price} {currency}"));
        }
    }

    if parts.is_empty() {
        return None;
    }

    Some(truncate_content(&parts.join(" | ")))
}

fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }

    let max_chars = MAX_CONTENT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}

/// Hash of the composed description, stored next to the embedding so a
/// stale vector can be detected after an edit.
pub fn content_hash(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
