use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::actor::{ACTOR_ACCESS_LEVEL, ACTOR_EMAIL, ACTOR_ID, ACTOR_NAME};

/// Restricts to `origins` when given, any origin otherwise
pub fn create_cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
            HeaderName::from_static(ACTOR_ID),
            HeaderName::from_static(ACTOR_NAME),
            HeaderName::from_static(ACTOR_EMAIL),
            HeaderName::from_static(ACTOR_ACCESS_LEVEL),
        ])
        .max_age(std::time::Duration::from_secs(60 * 60)) // 1 hour
}
