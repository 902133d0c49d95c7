use crate::{
    app::AppState,
    constants::{API_ERROR_BAD_AUTH_HEADER, API_ERROR_UNAUTHORIZED_ACCESS, HEADER_JSON},
    error::RegistryError,
    models::{Identity, WebRequestContext},
    storage::Store,
};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method, Response, StatusCode, header},
};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

#[instrument(skip(state, req), fields(method = %req.method(), path = req.uri().path()))]
pub async fn dispatch(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Response<Body>, RegistryError> {
    let method = req.method().clone();
    let raw_path = req.uri().path().to_string();
    let Some(path) = normalize_incoming_path(&raw_path, &state.url_prefix) else {
        warn!(
            raw_path,
            url_prefix = state.url_prefix.as_str(),
            "request path did not match configured url_prefix"
        );
        return Err(RegistryError::http(StatusCode::NOT_FOUND, "not found"));
    };
    let headers = req.headers().clone();
    debug!("dispatching request");

    if method == Method::GET && path == "/-/ping" {
        return Ok(json_response(StatusCode::OK, json!({})));
    }

    if method == Method::GET && path == "/-/web/packages" {
        if !state.web_enabled {
            return Err(RegistryError::http(StatusCode::NOT_FOUND, "not found"));
        }
        let identity = resolve_identity(&state.store, &headers).await?;
        return handle_list_packages(&state, &headers, &identity).await;
    }

    warn!(path, method = %method, "route not found");
    Err(RegistryError::http(StatusCode::NOT_FOUND, "not found"))
}

async fn handle_list_packages(
    state: &AppState,
    headers: &HeaderMap,
    identity: &Identity,
) -> Result<Response<Body>, RegistryError> {
    // a delivered enumeration error is fatal; no partial listing is attempted
    let packages = state.store.get_local_database().await?;
    let request = web_request_context(headers, state.trust_proxy);
    debug!(
        login_enabled = state.web_login_enabled,
        total = packages.len(),
        "listing local packages"
    );

    let views = state.pipeline.list(packages, identity, &request).await?;
    Ok(json_response(StatusCode::OK, serde_json::to_value(views)?))
}

async fn resolve_identity(store: &Store, headers: &HeaderMap) -> Result<Identity, RegistryError> {
    let Some(raw) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        return Ok(Identity::anonymous());
    };

    match raw.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            match store.identity_for_token(token.trim()).await? {
                Some(identity) => {
                    debug!(user = identity.name.as_deref(), "authenticated request");
                    Ok(identity)
                }
                None => {
                    warn!("authorization token rejected");
                    Err(RegistryError::http(
                        StatusCode::UNAUTHORIZED,
                        API_ERROR_UNAUTHORIZED_ACCESS,
                    ))
                }
            }
        }
        _ => {
            warn!("malformed authorization header (expected 'Bearer <token>')");
            Err(RegistryError::http(
                StatusCode::UNAUTHORIZED,
                API_ERROR_BAD_AUTH_HEADER,
            ))
        }
    }
}

fn web_request_context(headers: &HeaderMap, trust_proxy: bool) -> WebRequestContext {
    let protocol = if trust_proxy {
        headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("http")
    } else {
        "http"
    };

    let host = if trust_proxy {
        headers
            .get("x-forwarded-host")
            .or_else(|| headers.get(header::HOST))
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost:4873")
    } else {
        headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost:4873")
    };

    WebRequestContext {
        protocol: protocol.to_string(),
        host: host.to_string(),
    }
}

fn normalize_incoming_path(path: &str, url_prefix: &str) -> Option<String> {
    if url_prefix == "/" {
        return Some(path.to_string());
    }

    if path == url_prefix {
        return Some("/".to_string());
    }

    let prefix_with_slash = format!("{url_prefix}/");
    if let Some(stripped) = path.strip_prefix(&prefix_with_slash) {
        return Some(format!("/{stripped}"));
    }

    None
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, HEADER_JSON)
        .body(Body::from(bytes))
        .unwrap_or_else(|_| Response::new(Body::from(String::new())))
}
