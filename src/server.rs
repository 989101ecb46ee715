use axum::{
    routing::{get, patch, post},
    Router,
};
use std::time::Duration;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{
        add_bundle_adjustment, add_item_adjustment, bundle_summary, create_bundle,
        edit_bundle_adjustment, edit_item_adjustment, get_bundle, health_check,
        list_bundles, list_waiting_orders, recalculate_bundle, remove_bundle_adjustment,
        remove_item_adjustment, transition_bundle, update_bundle, AppState,
    },
    middleware::create_cors_layer,
};

pub async fn create_app(state: AppState, request_timeout: Duration, cors_origins: &[String]) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Ledger
                .route("/orders/waiting", get(list_waiting_orders))
                // Bundles
                .route("/bundles", get(list_bundles).post(create_bundle))
                .route("/bundles/summary", get(bundle_summary))
                .route("/bundles/:id", get(get_bundle).patch(update_bundle))
                .route("/bundles/:id/transition", post(transition_bundle))
                .route("/bundles/:id/recalculate", post(recalculate_bundle))
                // Adjustments
                .route("/bundles/:id/adjustments", post(add_bundle_adjustment))
                .route(
                    "/bundles/:id/adjustments/:adj_id",
                    patch(edit_bundle_adjustment).delete(remove_bundle_adjustment),
                )
                .route(
                    "/bundles/:id/items/:item_id/adjustments",
                    post(add_item_adjustment),
                )
                .route(
                    "/bundles/:id/items/:item_id/adjustments/:adj_id",
                    patch(edit_item_adjustment).delete(remove_item_adjustment),
                ),
        )
        .layer(CompressionLayer::new())
        .layer(create_cors_layer(cors_origins))
        .layer(TimeoutLayer::new(request_timeout))
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
