//! Push endpoint derivation from the HTTP API base URL.

use url::Url;

use crate::error::{RealtimeError, RealtimeResult};

/// Query parameter carrying the bearer token at connect time.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Derive the WebSocket endpoint for `api_base_url`.
///
/// `http` maps to `ws` and `https` to `wss`; `ws`/`wss` pass through. The
/// path is replaced with `path` and the token, when present, is appended as a
/// query parameter.
pub fn resolve_ws_url(api_base_url: &str, path: &str, token: Option<&str>) -> RealtimeResult<Url> {
    let base = Url::parse(api_base_url.trim())?;

    if base.host_str().is_none() {
        return Err(RealtimeError::config("API base URL must include a host"));
    }
    if !base.username().is_empty() || base.password().is_some() {
        return Err(RealtimeError::config(
            "API base URL must not include username/password credentials",
        ));
    }

    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeError::config(format!(
                "Unsupported API base URL scheme '{other}'; expected http(s) or ws(s)"
            )));
        }
    };

    let mut ws_url = base.clone();
    ws_url
        .set_scheme(ws_scheme)
        .map_err(|_| RealtimeError::config("Failed to set WebSocket URL scheme"))?;
    ws_url.set_fragment(None);
    ws_url.set_path(path);
    ws_url.set_query(None);

    if let Some(token) = token {
        ws_url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
    }

    Ok(ws_url)
}

/// Render a URL for logs with the token redacted.
pub fn redacted(url: &Url) -> String {
    if !url.query_pairs().any(|(key, _)| key == TOKEN_QUERY_PARAM) {
        return url.to_string();
    }

    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == TOKEN_QUERY_PARAM {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}
