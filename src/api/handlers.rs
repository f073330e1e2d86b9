use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Authenticated;
use crate::auth::IssueOptions;
use crate::errors::AppError;
use crate::models::token::Token;
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateTokenRequest {
    pub account: String,
    #[serde(default)]
    pub rotate: bool,
}

#[derive(Serialize)]
pub struct CreateTokenResponse {
    pub id: Uuid,
    pub token: String,
    pub account: String,
    pub prefix: String,
    pub created_at: DateTime<Utc>,
    pub rotated: usize,
}

#[derive(Deserialize)]
pub struct ListTokensParams {
    pub account: String,
}

#[derive(Serialize)]
pub struct RevokeResponse {
    pub id: Uuid,
    pub revoked: bool,
}

/// GET /api/v1/me: the account behind the presented token
pub async fn whoami(Extension(auth): Extension<Authenticated>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "account": auth.account }))
}

/// POST /api/v1/admin/tokens: issue a token; the secret appears only here
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<CreateTokenResponse>), AppError> {
    let issued = state
        .issuer
        .issue(
            &payload.account,
            IssueOptions {
                revoke_existing: payload.rotate,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            id: issued.token.id,
            token: issued.secret().to_string(),
            account: issued.account().to_string(),
            prefix: issued.token.prefix.clone(),
            created_at: issued.token.created_at,
            rotated: issued.rotated,
        }),
    ))
}

/// GET /api/v1/admin/tokens?account=...: token metadata, never secrets
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTokensParams>,
) -> Result<Json<Vec<Token>>, AppError> {
    let tokens = state.issuer.list_for_account(&params.account).await?;
    Ok(Json(tokens))
}

/// DELETE /api/v1/admin/tokens/:id: revoke a token
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<Json<RevokeResponse>, AppError> {
    let id = Uuid::parse_str(&id_str).map_err(|_| {
        tracing::warn!("revoke_token: invalid UUID: {}", id_str);
        AppError::BadRequest(format!("invalid token id: {}", id_str))
    })?;

    let revoked = state.issuer.revoke(id).await?;
    Ok(Json(RevokeResponse { id, revoked }))
}

/// GET /readyz: succeeds only when the token store answers
pub async fn readiness(State(state): State<Arc<AppState>>) -> Result<&'static str, AppError> {
    state.tokens.ping().await?;
    Ok("ok")
}
