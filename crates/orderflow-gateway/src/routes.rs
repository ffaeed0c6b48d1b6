//! HTTP route handlers (§6).

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use uuid::Uuid;

use orderflow_auth::{IdentityValidator, TRUSTED_USER_HEADER};
use orderflow_events::OrderNotification;
use orderflow_runtime::{Publisher, Store};
use orderflow_store_core::{OrderRepository, StoreError};
use orderflow_types::{DomainError, LineItem, Order, PaymentMethod};

use crate::error::ApiError;
use crate::state::AppState;

async fn identify<S: Store, P: Publisher>(state: &AppState<S, P>, headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let raw = headers.get(TRUSTED_USER_HEADER).and_then(|v| v.to_str().ok()).unwrap_or("");
    let identity = state.runtime.identity_validator.validate(raw).await?;
    Ok(identity.user_id)
}

/// Collapses a storage error down to the [`DomainError`] the resilience
/// envelope's closures need to return, same mapping [`ApiError`] applies.
fn domain_err(err: StoreError) -> DomainError {
    match err {
        StoreError::Domain(domain) => domain,
        StoreError::Backend(err) => DomainError::ServiceUnavailable(err.to_string()),
    }
}

//─────────────────────────────
//  POST /orders
//─────────────────────────────

/// One requested line item. Price is supplied by the caller rather than
/// looked up from a menu/store service — no such service exists in this
/// workspace (§1 scope), so the captured-at-order-time price (§9) is the
/// caller's responsibility to supply correctly.
#[derive(Debug, Deserialize)]
pub struct LineItemRequest {
    pub menu_id: Uuid,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub store_id: Uuid,
    pub items: Vec<LineItemRequest>,
    pub delivery_address: String,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CreateOrderResponse {
    Created(Order),
    Queued(QueueStatusResponse),
}

pub async fn create_order<S: Store + 'static, P: Publisher + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    let user_id = identify(&state, &headers).await?;
    state.runtime.check_rate_limit(user_id).await?;

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(key) = &idempotency_key {
        let store = state.runtime.store.clone();
        let existing = state
            .runtime
            .store_envelope
            .call_idempotent(|| {
                let store = store.clone();
                let key = key.clone();
                async move { store.find_by_idempotency_key(&key).await.map_err(domain_err) }
            })
            .await?;
        if existing.is_some() {
            return Err(DomainError::DuplicateRequest(key.clone()).into());
        }
    }

    let now = Utc::now();
    let items: Vec<LineItem> = req
        .items
        .into_iter()
        .map(|i| LineItem { menu_id: i.menu_id, quantity: i.quantity, unit_price_cents: i.unit_price_cents })
        .collect();
    let order = Order::new(user_id, req.store_id, items, req.delivery_address, req.payment_method, idempotency_key, now)?;
    let order_id = order.id;

    state.runtime.saga.start_saga(Uuid::new_v4(), Uuid::new_v4(), order, now).await?;

    if let Some(status) = state.runtime.admission_queue.accept(order_id, now).await {
        info!(order_id = %order_id, rank = status.rank, "order accepted into admission queue");
        return Ok((StatusCode::OK, Json(CreateOrderResponse::Queued(status.into()))));
    }

    let store = state.runtime.store.clone();
    let order = state
        .runtime
        .store_envelope
        .call(|| {
            let store = store.clone();
            async move { store.get(order_id).await.map_err(domain_err) }
        })
        .await?;
    Ok((StatusCode::CREATED, Json(CreateOrderResponse::Created(order))))
}

//─────────────────────────────
//  GET /orders/{id}
//─────────────────────────────

pub async fn get_order<S: Store + 'static, P: Publisher + 'static>(
    State(state): State<AppState<S, P>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let cache_key = format!("order:{id}");
    let store = state.runtime.store.clone();
    let envelope = state.runtime.store_envelope.clone();
    let ttl = state.runtime.cache_default_ttl;
    let order = orderflow_cache::read_through(&state.runtime.cache, &cache_key, ttl, Utc::now(), move || {
        let store = store.clone();
        async move {
            envelope
                .call(|| {
                    let store = store.clone();
                    async move { store.get(id).await.map_err(domain_err) }
                })
                .await
                .map_err(anyhow::Error::from)
        }
    })
    .await?;
    Ok(Json(order))
}

//─────────────────────────────
//  POST /orders/{id}/cancel
//─────────────────────────────

pub async fn cancel_order<S: Store + 'static, P: Publisher + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let user_id = identify(&state, &headers).await?;
    state.runtime.check_rate_limit(user_id).await?;

    let envelope = &state.runtime.store_envelope;
    let store = state.runtime.store.clone();
    let order = envelope
        .call(|| {
            let store = store.clone();
            async move { store.get(id).await.map_err(domain_err) }
        })
        .await?;
    if order.user_id != user_id {
        return Err(DomainError::EntityNotFound { entity: "order".to_string(), id: id.to_string() }.into());
    }
    let store = state.runtime.store.clone();
    let version = order.version;
    let now = Utc::now();
    let cancelled = envelope
        .call(|| {
            let store = store.clone();
            async move { store.cancel(id, version, now).await.map_err(domain_err) }
        })
        .await?;
    state.runtime.notifier.notify_status_changed(cancelled.id, cancelled.status);
    Ok(Json(cancelled))
}

//─────────────────────────────
//  GET /orders/queue/status
//─────────────────────────────

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub rank: Option<usize>,
    pub queue_size: usize,
    pub estimated_wait_ms: u64,
}

impl From<orderflow_admission::QueueStatus> for QueueStatusResponse {
    fn from(status: orderflow_admission::QueueStatus) -> Self {
        Self {
            rank: Some(status.rank),
            queue_size: status.queue_size,
            estimated_wait_ms: status.estimated_wait.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueueStatusQuery {
    #[serde(rename = "orderId")]
    pub order_id: Uuid,
}

pub async fn queue_status<S: Store + 'static, P: Publisher + 'static>(
    State(state): State<AppState<S, P>>,
    Query(query): Query<QueueStatusQuery>,
) -> Json<QueueStatusResponse> {
    match state.runtime.admission_queue.status_of(query.order_id).await {
        Some(status) => Json(status.into()),
        None => Json(QueueStatusResponse {
            rank: None,
            queue_size: state.runtime.admission_queue.queue_size().await,
            estimated_wait_ms: 0,
        }),
    }
}

//─────────────────────────────
//  GET /healthz
//─────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

//─────────────────────────────
//  GET /orders/{id}/stream
//─────────────────────────────

pub async fn order_stream<S: Store + 'static, P: Publisher + 'static>(
    State(state): State<AppState<S, P>>,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.runtime.notifier.subscribe();
    let stream = stream::unfold((rx, id), |(mut rx, id)| async move {
        loop {
            match rx.recv().await {
                Ok(notification) if notification.order_id() == id => {
                    let payload = serialize_notification(&notification);
                    return Some((Ok(Event::default().data(payload)), (rx, id)));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn serialize_notification(notification: &OrderNotification) -> String {
    serde_json::to_string(notification).unwrap_or_else(|_| "{}".to_string())
}

pub async fn fallback_not_found() -> impl IntoResponse {
    ApiError(DomainError::EntityNotFound { entity: "route".to_string(), id: "unknown".to_string() })
}
