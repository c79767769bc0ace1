use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use crate::config::ProxyConfig;
use crate::keys::KeyList;

use super::error::RelayError;

/// Header a caller can use to supply its own comma-separated upstream key
/// list, overriding the configured default.
pub const KEY_OVERRIDE_HEADER: &str = "x-google-api-key";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, AUTHORIZATION.as_str())?.strip_prefix("Bearer ")
}

/// Gatekeeping and key-list selection for one request.
///
/// Pure: no upstream call happens here, and a rejection guarantees none
/// will. When a master credential is configured, the bearer token must
/// match it exactly; otherwise the relay runs in open mode.
pub(super) fn resolve_key_list(
    cfg: &ProxyConfig,
    headers: &HeaderMap,
) -> Result<KeyList, RelayError> {
    if let Some(master) = cfg.master_key.as_deref()
        && bearer_token(headers) != Some(master)
    {
        return Err(RelayError::AuthRejected);
    }

    let override_source = header_str(headers, KEY_OVERRIDE_HEADER)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let Some(source) = override_source.or(cfg.default_api_keys.as_deref()) else {
        return Err(RelayError::MissingKeys);
    };

    KeyList::parse(source).ok_or(RelayError::EmptyKeys)
}
