use axum::Router;
use tower_http::cors::{Any, CorsLayer};

/// Permissive CORS for browser front ends calling the judge directly.
pub fn with_cors(router: Router) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors)
}
