//! Bearer token authentication.
//!
//! Token issuance lives outside this service; a request arrives with a
//! bearer token and this module resolves it to the owner it authenticates
//! as. Comparison is constant-time.

use crate::config::OwnerToken;

/// Validates a provided token against the expected token using constant-time
/// comparison.
///
/// Returns `false` if either token is empty.
pub fn validate_token(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    if provided.is_empty() || expected.is_empty() {
        return false;
    }

    let len_match = provided.len() == expected.len();

    // XOR accumulator: if any byte differs, result will be non-zero
    let mut diff: u8 = 0;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }

    len_match && diff == 0
}

/// Extracts the bearer token from an Authorization header value.
///
/// Expected format: "Bearer <token>", case-insensitive per RFC 6750.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();

    if header.len() < 7 {
        return None;
    }

    let (prefix, token) = header.split_at(7);
    if prefix.eq_ignore_ascii_case("Bearer ") {
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    } else {
        None
    }
}

/// Resolve an Authorization header to an owner id.
///
/// Every configured token is compared so the lookup cost does not depend on
/// which token matched.
pub fn resolve_owner(header: Option<&str>, tokens: &[OwnerToken]) -> Option<String> {
    let bearer = extract_bearer_token(header?)?;

    let mut owner = None;
    for entry in tokens {
        if validate_token(bearer, &entry.token) {
            owner = Some(entry.owner.clone());
        }
    }
    owner
}
