//! Opaque pagination tokens and the shared pagination helper.
//!
//! A token encodes `{process nonce}:{scope}:{offset}` in URL-safe base64.
//! The nonce is drawn at process start, so a forged token or one minted
//! by another process fails decoding and surfaces as the service's
//! invalid-token error. The scope string pins a token to the backend and
//! listing that issued it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use once_cell::sync::Lazy;
use rand::Rng;

use crate::error::ServiceError;

static PROCESS_NONCE: Lazy<u64> = Lazy::new(|| rand::thread_rng().gen());

/// Mint a continuation token for the given scope and offset.
pub fn issue(scope: &str, offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("{:016x}:{scope}:{offset}", *PROCESS_NONCE))
}

/// Redeem a token, returning the offset it encodes.
///
/// `error_code` is the service's wire code for a bad token
/// (`InvalidNextToken`, `InvalidToken`, ...).
pub fn redeem(token: &str, scope: &str, error_code: &str) -> Result<usize, ServiceError> {
    let invalid =
        || ServiceError::invalid_token(error_code, "The provided pagination token is invalid");

    let decoded = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    let text = String::from_utf8(decoded).map_err(|_| invalid())?;

    let mut parts = text.splitn(3, ':');
    let nonce = parts.next().ok_or_else(invalid)?;
    let token_scope = parts.next().ok_or_else(invalid)?;
    let offset = parts.next().ok_or_else(invalid)?;

    if u64::from_str_radix(nonce, 16) != Ok(*PROCESS_NONCE) || token_scope != scope {
        return Err(invalid());
    }
    offset.parse().map_err(|_| invalid())
}

/// One page of a stable, creation-ordered listing.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// Slice `items` according to `max_results` and an optional continuation
/// token. The caller supplies the full set in its stable order; the
/// returned token encodes the absolute offset of the next page.
pub fn paginate<T: Clone>(
    items: &[T],
    max_results: Option<usize>,
    token: Option<&str>,
    scope: &str,
    error_code: &str,
) -> Result<Page<T>, ServiceError> {
    let start = match token {
        Some(t) => redeem(t, scope, error_code)?,
        None => 0,
    };
    let start = start.min(items.len());
    let end = match max_results {
        Some(max) => (start + max.max(1)).min(items.len()),
        None => items.len(),
    };
    let next_token = if end < items.len() {
        Some(issue(scope, end))
    } else {
        None
    };
    Ok(Page {
        items: items[start..end].to_vec(),
        next_token,
    })
}
