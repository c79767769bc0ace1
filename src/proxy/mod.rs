use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::Router;
use axum::body::{Body, Bytes, to_bytes};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::any;
use reqwest::Client;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

mod classify;
pub mod error;
mod resolve;

use crate::config::ProxyConfig;
use crate::keys::KeyList;
use crate::rotation::RotationStore;

use self::classify::{AttemptClass, classify_status};
use self::error::{RelayError, json_error};
use self::resolve::{KEY_OVERRIDE_HEADER, resolve_key_list};

/// Header carrying the selected upstream key on the outbound request.
pub const UPSTREAM_KEY_HEADER: &str = "x-goog-api-key";

/// Inbound bodies are read once so the retry loop can replay them per key;
/// this caps how much a single request may hold in memory. Upstream
/// response bodies are never buffered.
const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct ProxyService {
    pub client: Client,
    config: Arc<ProxyConfig>,
    rotation: Arc<dyn RotationStore>,
}

impl ProxyService {
    pub fn new(client: Client, config: Arc<ProxyConfig>, rotation: Arc<dyn RotationStore>) -> Self {
        Self {
            client,
            config,
            rotation,
        }
    }

    /// Inbound path and query land verbatim on the configured upstream host.
    fn build_target(&self, uri: &Uri) -> Result<reqwest::Url> {
        let base = self.config.upstream_url.trim_end_matches('/');
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let full = format!("{base}{path_and_query}");
        reqwest::Url::parse(&full).map_err(|e| anyhow!("invalid upstream url {full}: {e}"))
    }
}

pub fn router(proxy: ProxyService) -> Router {
    let p0 = proxy.clone();
    let p1 = proxy;
    Router::new()
        .route("/", any(move |req| handle_proxy(p0.clone(), req)))
        .route("/{*path}", any(move |req| handle_proxy(p1.clone(), req)))
}

#[instrument(
    name = "relay",
    skip_all,
    fields(trace_id = %Uuid::new_v4(), method = %req.method(), path = req.uri().path())
)]
pub async fn handle_proxy(proxy: ProxyService, req: Request<Body>) -> Response<Body> {
    // Preflight fast path: answered before auth or key handling so browser
    // clients can probe the relay without credentials.
    if req.method() == Method::OPTIONS {
        return preflight_response();
    }

    let (parts, body) = req.into_parts();

    let key_list = match resolve_key_list(&proxy.config, &parts.headers) {
        Ok(list) => list,
        Err(err) => {
            debug!("request rejected: {err}");
            return err.into_response();
        }
    };

    let body = match to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            warn!("failed to read client body: {e}");
            return json_error(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {e}"),
            );
        }
    };

    forward(&proxy, parts.method, parts.uri, parts.headers, body, &key_list).await
}

/// The rotating forwarder: try keys in rotation order until one is
/// accepted, a terminal upstream failure short-circuits, or the list is
/// exhausted.
async fn forward(
    proxy: &ProxyService,
    method: Method,
    uri: Uri,
    client_headers: HeaderMap,
    body: Bytes,
    keys: &KeyList,
) -> Response<Body> {
    let identity = keys.identity();
    let total = keys.len();
    // Stored index may predate a differently-sized list with the same
    // identity; normalize before indexing.
    let start = proxy.rotation.start_index(&identity) % total;

    let target = match proxy.build_target(&uri) {
        Ok(url) => url,
        Err(e) => {
            warn!("cannot build upstream target: {e}");
            return json_error(StatusCode::BAD_GATEWAY, &e.to_string());
        }
    };
    let base_headers = outbound_headers(&client_headers);

    for attempt in 0..total {
        let key_index = (start + attempt) % total;
        let key = keys.key(key_index);

        let mut headers = base_headers.clone();
        match HeaderValue::from_str(key) {
            Ok(v) => {
                headers.insert(UPSTREAM_KEY_HEADER, v);
            }
            Err(_) => {
                warn!(key_index, "skipping key that is not a valid header value");
                continue;
            }
        }

        debug!(key_index, attempt, total, list = %identity, "forwarding to upstream");

        let resp = match proxy
            .client
            .request(method.clone(), target.clone())
            .headers(headers)
            .body(body.clone())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(key_index, "upstream transport error, trying next key: {e}");
                continue;
            }
        };

        let status = resp.status();
        match classify_status(status) {
            AttemptClass::Ok => {
                proxy
                    .rotation
                    .set_start_index(&identity, (key_index + 1) % total);
                debug!(key_index, %status, list = %identity, "upstream accepted, rotation advanced");
                return passthrough_response(resp);
            }
            AttemptClass::BadKey => {
                debug!(key_index, %status, "upstream rejected key, trying next");
            }
            AttemptClass::Terminal => {
                warn!(key_index, %status, "upstream failure, not retrying with other keys");
                return passthrough_response(resp);
            }
        }
    }

    warn!(total, list = %identity, "all keys failed, rotation reset");
    proxy.rotation.set_start_index(&identity, 0);
    RelayError::AllKeysFailed.into_response()
}

/// Relay an upstream response verbatim, streaming the body through without
/// buffering it. Dropping the returned body (client disconnect) aborts the
/// upstream transfer.
fn passthrough_response(resp: reqwest::Response) -> Response<Body> {
    let status = resp.status();
    let headers = filter_response_headers(resp.headers());
    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    builder = builder.header(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    builder.body(Body::from_stream(resp.bytes_stream())).unwrap()
}

fn preflight_response() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(ACCESS_CONTROL_ALLOW_METHODS, "POST, GET, OPTIONS")
        .header(
            ACCESS_CONTROL_ALLOW_HEADERS,
            "Content-Type, Authorization, x-google-api-key",
        )
        .body(Body::empty())
        .unwrap()
}

fn is_hop_by_hop_header(name_lower: &str) -> bool {
    matches!(
        name_lower,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn hop_by_hop_connection_tokens(headers: &HeaderMap) -> Vec<String> {
    let mut out = Vec::new();
    for value in headers.get_all("connection").iter() {
        let Ok(s) = value.to_str() else {
            continue;
        };
        for token in s.split(',').map(|t| t.trim()).filter(|t| !t.is_empty()) {
            out.push(token.to_ascii_lowercase());
        }
    }
    out
}

/// Headers for the outbound request: everything the client sent, minus
/// host/content-length/hop-by-hop, minus the relay's own credentials.
/// The upstream key header is set afterwards per attempt.
fn outbound_headers(src: &HeaderMap) -> HeaderMap {
    let extra = hop_by_hop_connection_tokens(src);
    let mut out = HeaderMap::new();
    for (name, value) in src.iter() {
        let name_lower = name.as_str().to_ascii_lowercase();
        if name_lower == "host"
            || name_lower == "content-length"
            || is_hop_by_hop_header(&name_lower)
        {
            continue;
        }
        // The relay's own credentials never travel upstream.
        if name_lower == "authorization" || name_lower == KEY_OVERRIDE_HEADER {
            continue;
        }
        if extra.iter().any(|t| t == &name_lower) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// The body is relayed untouched, so entity headers (content-length,
/// content-encoding) stay valid and pass through; only hop-by-hop headers
/// and the upstream's own allow-origin (replaced with ours) are dropped.
fn filter_response_headers(src: &HeaderMap) -> HeaderMap {
    let extra = hop_by_hop_connection_tokens(src);
    let mut out = HeaderMap::new();
    for (name, value) in src.iter() {
        let name_lower = name.as_str().to_ascii_lowercase();
        if is_hop_by_hop_header(&name_lower) || name_lower == "access-control-allow-origin" {
            continue;
        }
        if extra.iter().any(|t| t == &name_lower) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
