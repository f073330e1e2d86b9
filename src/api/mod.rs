use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::auth::secret;
use crate::errors::AppError;
use crate::models::token::AccountId;
use crate::AppState;

pub mod handlers;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Account resolved by `require_token`, available to protected handlers.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub account: AccountId,
}

/// Build the full HTTP surface.
///
/// Token-protected routes live under `/api/v1`; token administration under
/// `/api/v1/admin` requires `X-Admin-Key` instead.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/me", get(handlers::whoami))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let admin = Router::new()
        .route(
            "/tokens",
            get(handlers::list_tokens).post(handlers::create_token),
        )
        .route("/tokens/:id", delete(handlers::revoke_token))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(handlers::readiness))
        .nest("/api/v1", protected.nest("/admin", admin))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

/// Middleware: resolves `Authorization: Bearer <token>` to an account.
/// Fails closed when the token store is unreachable.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = extract_bearer_token(req.headers()).ok_or_else(|| {
        tracing::debug!("missing bearer credential");
        AppError::Unauthorized
    })?;

    let account = state.verifier.verify(&presented).await?;
    req.extensions_mut().insert(Authenticated { account });

    Ok(next.run(req).await)
}

/// Middleware: validates `X-Admin-Key` against the configured admin key.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.admin_key.as_deref() else {
        tracing::error!("admin API called but VIGIL_ADMIN_KEY is not set");
        return Err(AppError::AdminUnauthorized);
    };

    let provided = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        // hash both sides so neither content nor length short-circuits
        Some(k) if secret::digests_match(&secret::digest(k), &secret::digest(expected)) => {
            Ok(next.run(req).await)
        }
        Some(_) => {
            tracing::warn!("admin API: invalid key");
            Err(AppError::AdminUnauthorized)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(AppError::AdminUnauthorized)
        }
    }
}

/// The single credential convention: `Authorization: Bearer <token>`.
/// The scheme is matched case-insensitively; an empty token is absent.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = auth.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "request",
        req_id = %req_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    let mut resp = next.run(req).instrument(span).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    resp
}

/// Middleware: security headers on every response. Token responses must
/// never be cached.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.remove(header::SERVER);

    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn bearer_token_is_extracted() {
        assert_eq!(
            extract_bearer_token(&headers_with("Bearer vgl_abc")).as_deref(),
            Some("vgl_abc")
        );
        assert_eq!(
            extract_bearer_token(&headers_with("bearer  vgl_abc ")).as_deref(),
            Some("vgl_abc")
        );
    }

    #[test]
    fn other_schemes_and_blanks_are_ignored() {
        assert!(extract_bearer_token(&HeaderMap::new()).is_none());
        assert!(extract_bearer_token(&headers_with("Token vgl_abc")).is_none());
        assert!(extract_bearer_token(&headers_with("Basic dXNlcjpwYXNz")).is_none());
        assert!(extract_bearer_token(&headers_with("Bearer")).is_none());
        assert!(extract_bearer_token(&headers_with("Bearer   ")).is_none());
    }
}
