use std::net::SocketAddr;

use axum::{http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use features_api::backend::FeatureBackend;
use features_api::error::ApiError;
use features_api::handlers::features;

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up FEATURES_CONFIG etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // A config file path on the command line wins over the environment.
    if let Some(path) = std::env::args().nth(1) {
        std::env::set_var("FEATURES_CONFIG", path);
    }

    let config = features_api::config::config();
    let users = features_api::backend::registry();
    tracing::info!("configured {} user(s)", users.len());

    let app = app();

    // Allow tests or deployments to override port via env
    let port = std::env::var("FEATURES_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(config.port);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    println!("Ready to handle requests on http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server");
}

fn app() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route(
            "/:user/:table",
            get(features::get_table).post(features::post_table),
        )
        .route(
            "/:user/:table/:fid",
            get(features::get_feature)
                .patch(features::patch_feature)
                .delete(features::delete_feature),
        )
        .fallback(not_found)
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": "features-api",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "table": "/:user/:table (GET list, POST insert)",
            "feature": "/:user/:table/:fid (unimplemented)",
        }
    }))
}

async fn health() -> impl axum::response::IntoResponse {
    let mut users = serde_json::Map::new();
    let mut healthy = true;

    for (name, backend) in features_api::backend::registry() {
        let ok = backend.ping().await.is_ok();
        healthy &= ok;
        users.insert(
            name.clone(),
            Value::String(if ok { "ok" } else { "unavailable" }.to_string()),
        );
    }

    let (status, label) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(json!({
            "status": label,
            "timestamp": chrono::Utc::now(),
            "users": users
        })),
    )
}

async fn not_found() -> ApiError {
    ApiError::not_found("does not exist")
}
