use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::*;
use crate::{
    error::AppResult,
    settlement::{
        adjustments::{AdjustmentInput, AdjustmentOutcome, AdjustmentPatch},
        builder::CreateBundle,
        lifecycle::{TransitionRequest, UpdateBundleInfo},
        models::{Actor, Bundle, BundleDetail, WaitingOrder},
        store::{BundleFilter, Page, WaitingOrderFilter},
        SettlementEngine,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
}

impl AppState {
    pub fn new(engine: SettlementEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.engine.store();
    let status = match store.ping().await {
        Ok(()) => "healthy",
        Err(e) => {
            warn!("⚠️ Store health check failed: {}", e);
            "degraded"
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        store: store.name().to_string(),
        timestamp: Utc::now(),
    })
}

// ========== QUERY HANDLERS ==========

/// GET /orders/waiting?side=sales
pub async fn list_waiting_orders(
    State(state): State<AppState>,
    filter: Result<Query<WaitingOrderFilter>, QueryRejection>,
    page: Result<Query<PageParams>, QueryRejection>,
) -> AppResult<Json<Page<WaitingOrder>>> {
    let Query(filter) = filter?;
    let Query(page) = page?;

    let result = state
        .engine
        .list_waiting_orders(filter, page.page, page.page_size)
        .await?;
    Ok(Json(result))
}

/// GET /bundles
pub async fn list_bundles(
    State(state): State<AppState>,
    filter: Result<Query<BundleFilter>, QueryRejection>,
    page: Result<Query<PageParams>, QueryRejection>,
) -> AppResult<Json<Page<Bundle>>> {
    let Query(filter) = filter?;
    let Query(page) = page?;

    let result = state
        .engine
        .list_bundles(filter, page.page, page.page_size)
        .await?;
    Ok(Json(result))
}

/// GET /bundles/summary
pub async fn bundle_summary(
    State(state): State<AppState>,
    filter: Result<Query<BundleFilter>, QueryRejection>,
) -> AppResult<Json<SummaryResponse>> {
    let Query(filter) = filter?;
    let statuses = state.engine.bundle_summary(filter).await?;
    Ok(Json(SummaryResponse::from(statuses)))
}

/// GET /bundles/:id
pub async fn get_bundle(
    State(state): State<AppState>,
    Path(bundle_id): Path<Uuid>,
) -> AppResult<Json<BundleDetail>> {
    Ok(Json(state.engine.get_bundle(bundle_id).await?))
}

// ========== BUNDLE HANDLERS ==========

/// POST /bundles
pub async fn create_bundle(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<CreateBundle>, JsonRejection>,
) -> AppResult<(StatusCode, Json<BundleDetail>)> {
    let Json(cmd) = body?;
    info!(
        "📦 Create bundle request: {} side, {} orders, actor {}",
        cmd.side,
        cmd.items.len(),
        actor.id
    );

    let detail = state.engine.create_bundle(cmd, &actor).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// PATCH /bundles/:id
pub async fn update_bundle(
    State(state): State<AppState>,
    Path(bundle_id): Path<Uuid>,
    actor: Actor,
    body: Result<Json<UpdateBundleInfo>, JsonRejection>,
) -> AppResult<Json<BundleDetail>> {
    let Json(update) = body?;
    Ok(Json(state.engine.update_bundle_info(bundle_id, update, &actor).await?))
}

/// POST /bundles/:id/transition
pub async fn transition_bundle(
    State(state): State<AppState>,
    Path(bundle_id): Path<Uuid>,
    actor: Actor,
    body: Result<Json<TransitionRequest>, JsonRejection>,
) -> AppResult<Json<BundleDetail>> {
    let Json(req) = body?;
    info!("🔁 Transition request: bundle {} -> {}", bundle_id, req.target);

    Ok(Json(state.engine.transition(bundle_id, req, &actor).await?))
}

/// POST /bundles/:id/recalculate
pub async fn recalculate_bundle(
    State(state): State<AppState>,
    Path(bundle_id): Path<Uuid>,
    actor: Actor,
) -> AppResult<Json<BundleDetail>> {
    Ok(Json(state.engine.recalculate_bundle(bundle_id, &actor).await?))
}

// ========== ADJUSTMENT HANDLERS ==========

/// POST /bundles/:id/adjustments
pub async fn add_bundle_adjustment(
    State(state): State<AppState>,
    Path(bundle_id): Path<Uuid>,
    actor: Actor,
    body: Result<Json<AdjustmentInput>, JsonRejection>,
) -> AppResult<(StatusCode, Json<AdjustmentOutcome>)> {
    let Json(input) = body?;
    let outcome = state
        .engine
        .add_bundle_adjustment(bundle_id, input, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// PATCH /bundles/:id/adjustments/:adj_id
pub async fn edit_bundle_adjustment(
    State(state): State<AppState>,
    Path((bundle_id, adjustment_id)): Path<(Uuid, Uuid)>,
    actor: Actor,
    body: Result<Json<AdjustmentPatch>, JsonRejection>,
) -> AppResult<Json<AdjustmentOutcome>> {
    let Json(patch) = body?;
    let outcome = state
        .engine
        .edit_bundle_adjustment(bundle_id, adjustment_id, patch, &actor)
        .await?;
    Ok(Json(outcome))
}

/// DELETE /bundles/:id/adjustments/:adj_id
pub async fn remove_bundle_adjustment(
    State(state): State<AppState>,
    Path((bundle_id, adjustment_id)): Path<(Uuid, Uuid)>,
    actor: Actor,
) -> AppResult<Json<AdjustmentOutcome>> {
    let outcome = state
        .engine
        .remove_bundle_adjustment(bundle_id, adjustment_id, &actor)
        .await?;
    Ok(Json(outcome))
}

/// POST /bundles/:id/items/:item_id/adjustments
pub async fn add_item_adjustment(
    State(state): State<AppState>,
    Path((bundle_id, item_id)): Path<(Uuid, Uuid)>,
    actor: Actor,
    body: Result<Json<AdjustmentInput>, JsonRejection>,
) -> AppResult<(StatusCode, Json<AdjustmentOutcome>)> {
    let Json(input) = body?;
    let outcome = state
        .engine
        .add_item_adjustment(bundle_id, item_id, input, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// PATCH /bundles/:id/items/:item_id/adjustments/:adj_id
pub async fn edit_item_adjustment(
    State(state): State<AppState>,
    Path((bundle_id, item_id, adjustment_id)): Path<(Uuid, Uuid, Uuid)>,
    actor: Actor,
    body: Result<Json<AdjustmentPatch>, JsonRejection>,
) -> AppResult<Json<AdjustmentOutcome>> {
    let Json(patch) = body?;
    let outcome = state
        .engine
        .edit_item_adjustment(bundle_id, item_id, adjustment_id, patch, &actor)
        .await?;
    Ok(Json(outcome))
}

/// DELETE /bundles/:id/items/:item_id/adjustments/:adj_id
pub async fn remove_item_adjustment(
    State(state): State<AppState>,
    Path((bundle_id, item_id, adjustment_id)): Path<(Uuid, Uuid, Uuid)>,
    actor: Actor,
) -> AppResult<Json<AdjustmentOutcome>> {
    let outcome = state
        .engine
        .remove_item_adjustment(bundle_id, item_id, adjustment_id, &actor)
        .await?;
    Ok(Json(outcome))
}
