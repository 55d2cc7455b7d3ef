//! Opaque pagination cursors.
//!
//! A cursor encodes the `(created_at, id)` position of the last item on a
//! page. The next page contains only items strictly after that position in
//! the `created_at` desc, id desc ordering, so concatenated pages never
//! repeat or skip an item of a stable collection.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};

use crate::items::{ItemId, PageToken};

#[derive(Debug, thiserror::Error)]
#[error("malformed cursor")]
pub struct CursorError;

pub fn encode(token: &PageToken) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}|{}", token.created_at.to_rfc3339(), token.id))
}

pub fn decode(raw: &str) -> Result<PageToken, CursorError> {
    let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|_| CursorError)?;
    let text = String::from_utf8(bytes).map_err(|_| CursorError)?;

    let (timestamp, id) = text.split_once('|').ok_or(CursorError)?;
    if id.is_empty() {
        return Err(CursorError);
    }

    let created_at = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| CursorError)?
        .with_timezone(&Utc);

    Ok(PageToken {
        created_at,
        id: ItemId::from(id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let token = PageToken {
            created_at: Utc::now(),
            id: ItemId::new(),
        };

        let decoded = decode(&encode(&token)).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode("not base64 ***").is_err());

        let no_separator = URL_SAFE_NO_PAD.encode("2024-01-01T00:00:00Z");
        assert!(decode(&no_separator).is_err());

        let bad_timestamp = URL_SAFE_NO_PAD.encode("yesterday|01ARZ3");
        assert!(decode(&bad_timestamp).is_err());

        let empty_id = URL_SAFE_NO_PAD.encode("2024-01-01T00:00:00Z|");
        assert!(decode(&empty_id).is_err());
    }
}
