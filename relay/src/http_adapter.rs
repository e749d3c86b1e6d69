//! The public HTTP surface: host-based and path-based entry points that
//! turn an inbound request into a `TunnelRequest`, forward it through the
//! registry, and turn the `TunnelResponse` back into an `http::Response`.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;
use tunnel_shared::{Error, ForwardError, TunnelRequest};
use uuid::Uuid;

use crate::headers;
use crate::registry::DEFAULT_REQUEST_TIMEOUT;
use crate::AppState;

/// `/t/{subdomain}/{*rest}`
pub async fn path_handler(
    State(state): State<AppState>,
    Path((subdomain, rest)): Path<(String, String)>,
    req: Request<Body>,
) -> Response {
    let path = forwarded_path(&rest);
    forward(&state, &subdomain, &path, req).await
}

/// An empty `rest` capture (a request to exactly `/t/{subdomain}`) forwards
/// as `/`, never as an empty string; any other `rest` forwards with its
/// leading slash restored (axum's wildcard capture strips it).
fn forwarded_path(rest: &str) -> String {
    if rest.is_empty() {
        "/".to_string()
    } else {
        format!("/{rest}")
    }
}

/// `/t/{subdomain}`, with no trailing path segment.
pub async fn path_handler_root(
    State(state): State<AppState>,
    Path(subdomain): Path<String>,
    req: Request<Body>,
) -> Response {
    forward(&state, &subdomain, "/", req).await
}

/// `/t` and `/t/`, with no subdomain segment at all.
pub async fn path_handler_missing_subdomain() -> Response {
    error_response(Error::SubdomainMissing)
}

/// Everything not matched by a more specific route: resolves the
/// subdomain from the `Host` header, or falls back to the landing page /
/// 404 if there is none.
pub async fn host_fallback_handler(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Response {
    let host = req
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    match crate::subdomain::extract(&host, &state.config.domain) {
        Some(subdomain) => {
            let path_and_query = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
            forward(&state, &subdomain, &path_and_query, req).await
        }
        None if req.uri().path() == "/" && req.method() == axum::http::Method::GET => {
            crate::landing::page(&state).into_response()
        }
        None => not_found_response(&state),
    }
}

fn not_found_response(state: &AppState) -> Response {
    let body = serde_json::json!({
        "error": "Not Found",
        "message": "no tunnel or route matches this request",
        "domain": state.config.domain,
    });
    (StatusCode::NOT_FOUND, axum::Json(body)).into_response()
}

async fn forward(state: &AppState, subdomain: &str, path: &str, req: Request<Body>) -> Response {
    // Look up before buffering the body, so a request bound for a subdomain
    // nobody holds fails fast.
    if state.registry.get(subdomain).is_none() {
        return forward_error_response(ForwardError::NotFound, subdomain);
    }

    let method = req.method().to_string();
    let mut flattened = headers::flatten(req.headers());
    headers::remove(&mut flattened, "host");

    let body_bytes = match axum::body::to_bytes(req.into_body(), tunnel_shared::MAX_BODY_BYTES)
        .await
    {
        Ok(b) => b,
        Err(err) => {
            warn!(%err, "failed to read request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let tunnel_request = TunnelRequest {
        id: Uuid::new_v4(),
        method,
        path: path.to_string(),
        headers: flattened,
        body: None,
    }
    .with_body_bytes(&body_bytes);

    match state
        .registry
        .forward(subdomain, tunnel_request, DEFAULT_REQUEST_TIMEOUT)
        .await
    {
        Ok(response) => build_response(subdomain, response),
        Err(err) => {
            warn!(%subdomain, %err, "forward failed");
            forward_error_response(err, subdomain)
        }
    }
}

fn build_response(subdomain: &str, tunnel_response: tunnel_shared::TunnelResponse) -> Response {
    let status = StatusCode::from_u16(tunnel_response.status_code).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);

    if let Some(headers_mut) = builder.headers_mut() {
        for (name, value) in &tunnel_response.headers {
            if headers::is_hop_by_hop(name) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers_mut.append(name, value);
            }
        }
        headers_mut.insert("X-Powered-By", HeaderValue::from_static("LocalHosted"));
        if let Ok(value) = HeaderValue::from_str(subdomain) {
            headers_mut.insert("X-Tunnel-Subdomain", value);
        }
    }

    let body = match tunnel_response.body_bytes() {
        Ok(bytes) => bytes.unwrap_or_default(),
        Err(err) => {
            warn!(%err, "failed to decode response body");
            return error_response(Error::Protocol("invalid response body encoding".into()));
        }
    };

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response build error").into_response())
}

/// Error bodies for the two entry points that can fail before there is even
/// a subdomain to forward against.
fn error_response(err: Error) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    let label = match &err {
        Error::SubdomainMissing => "missing-subdomain",
        Error::Forward(_) => unreachable!("forward errors go through forward_error_response"),
        Error::Protocol(_) | Error::Io(_) => "Bad Gateway",
    };
    let body = serde_json::json!({
        "error": label,
        "message": err.to_string(),
    });
    (status, axum::Json(body)).into_response()
}

/// Error bodies for a failed `Registry::forward`, carrying the subdomain
/// that was being forwarded to and the literal `error` string this spec's
/// surface table calls for per kind.
fn forward_error_response(err: ForwardError, subdomain: &str) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    let label = match err {
        ForwardError::NotFound => "Tunnel Not Found",
        ForwardError::Timeout => "Gateway Timeout",
        ForwardError::NotOpen | ForwardError::Disconnected => "Bad Gateway",
    };
    let body = serde_json::json!({
        "error": label,
        "subdomain": subdomain,
        "message": err.to_string(),
    });
    (status, axum::Json(body)).into_response()
}

/// Used for tests that only need the error-kind -> status mapping, without
/// constructing a full axum request.
pub fn status_for(err: ForwardError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY)
}
