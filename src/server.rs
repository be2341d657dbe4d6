use axum::{
    Json, Router,
    routing::{get, post},
    response::{IntoResponse, Response},
    extract::{ConnectInfo, Path, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::{Context, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cards::{Card, CardStore};
use crate::error::{LootBoxError, StoreError};
use crate::lootbox::{LootBox, LootBoxService, LootBoxType};
use crate::ratelimit::RateLimiter;

const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub lootboxes: Arc<LootBoxService>,
    pub cards: Arc<dyn CardStore>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLootBoxRequest {
    #[serde(rename = "type")]
    pub kind: LootBoxType,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub minted_cards: Vec<Card>,
}

pub struct ApiError(StatusCode, ErrorBody);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

impl From<LootBoxError> for ApiError {
    fn from(err: LootBoxError) -> Self {
        let status = match &err {
            LootBoxError::NotFound(_) => StatusCode::NOT_FOUND,
            LootBoxError::NotOwner { .. } => StatusCode::FORBIDDEN,
            LootBoxError::AlreadyOpening(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(
            status,
            ErrorBody { error: err.to_string(), minted_cards: err.minted_cards().to_vec() },
        )
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, ErrorBody { error: err.to_string(), minted_cards: Vec::new() })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/users/:user_id/lootboxes", post(create_lootbox).get(list_lootboxes))
        .route("/users/:user_id/lootboxes/:lootbox_id/open", post(open_lootbox))
        .route("/users/:user_id/cards", get(list_cards))
        .route("/users/:user_id/cards/:card_id", get(get_card).delete(delete_card))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
                .layer(middleware::from_fn_with_state(state.clone(), rate_limit)),
        )
        .with_state(state)
}

pub async fn run(bind_addr: &str, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let app = router(state);

    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address: {}", bind_addr))?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;

    Ok(())
}

async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let ip = addr.ip().to_string();
    let now = Instant::now();
    if !state.limiter.is_allowed(&ip, now) {
        warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "Too many requests").into_response();
    }
    let remaining = state.limiter.remaining(&ip, now);

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
    response
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "tracked_keys": state.limiter.len(),
    }))
}

async fn create_lootbox(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<CreateLootBoxRequest>,
) -> Result<(StatusCode, Json<LootBox>), ApiError> {
    let lootbox = state.lootboxes.create(user_id, body.kind).await?;
    Ok((StatusCode::CREATED, Json(lootbox)))
}

async fn list_lootboxes(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<LootBox>>, ApiError> {
    Ok(Json(state.lootboxes.list(user_id).await?))
}

async fn open_lootbox(
    State(state): State<AppState>,
    Path((user_id, lootbox_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<Card>>, ApiError> {
    let cards = state.lootboxes.open_by_id(user_id, lootbox_id).await?;
    Ok(Json(cards))
}

async fn list_cards(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Card>>, ApiError> {
    let cards = state.cards.list().await?;
    Ok(Json(cards.into_iter().filter(|c| c.user_id == user_id).collect()))
}

async fn owned_card(state: &AppState, user_id: Uuid, card_id: Uuid) -> Result<Card, ApiError> {
    let card = state.cards.get(card_id).await?;
    if card.user_id != user_id {
        return Err(ApiError(
            StatusCode::FORBIDDEN,
            ErrorBody { error: format!("Card {} does not belong to user {}", card_id, user_id), minted_cards: Vec::new() },
        ));
    }
    Ok(card)
}

async fn get_card(
    State(state): State<AppState>,
    Path((user_id, card_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Card>, ApiError> {
    Ok(Json(owned_card(&state, user_id, card_id).await?))
}

async fn delete_card(
    State(state): State<AppState>,
    Path((user_id, card_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    owned_card(&state, user_id, card_id).await?;
    state.cards.delete(card_id).await?;
    info!(user_id = %user_id, card_id = %card_id, "Card deleted");
    Ok(StatusCode::NO_CONTENT)
}
