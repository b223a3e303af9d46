use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::Parser;
use rentrec::services::recommendation::RefreshSummary;
use rentrec::{init_tracing, AppState, Config, RecError, RecommendationRequest, RecommendationResponse};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Deserialize)]
struct RecommendationQuery {
    n: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }
}

fn status_for(error: &anyhow::Error) -> StatusCode {
    match error.downcast_ref::<RecError>() {
        Some(RecError::InvalidConfig(_)) => StatusCode::BAD_REQUEST,
        Some(RecError::DegenerateIndex(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Some(RecError::UnknownProduct(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HashMap<String, String>>> {
    let mut status = HashMap::new();
    status.insert("status".to_string(), "healthy".to_string());
    status.insert("service".to_string(), "rentrec".to_string());
    status.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
    status.insert(
        "index_generation".to_string(),
        state.recommendation_service.generation().to_string(),
    );

    Json(ApiResponse::success(status))
}

async fn get_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<RecommendationQuery>,
) -> Result<Json<ApiResponse<RecommendationResponse>>, StatusCode> {
    let request = RecommendationRequest {
        user_id,
        num_recommendations: params.n.unwrap_or(state.config.retrieval.top_n),
    };

    match state.recommendation_service.get_recommendations(&request).await {
        Ok(response) => Ok(Json(ApiResponse::success(response))),
        Err(e) => {
            tracing::error!("Failed to get recommendations for {}: {}", request.user_id, e);
            Err(status_for(&e))
        }
    }
}

async fn similar_products(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Query(params): Query<RecommendationQuery>,
) -> Result<Json<ApiResponse<Vec<(String, f32)>>>, StatusCode> {
    let n = params.n.unwrap_or(state.config.retrieval.top_n);
    match state.recommendation_service.similar_products(&product_id, n).await {
        Ok(similar) => Ok(Json(ApiResponse::success(similar))),
        Err(e) => {
            tracing::error!("Failed to get products similar to {}: {}", product_id, e);
            Err(status_for(&e))
        }
    }
}

async fn refresh_index(State(state): State<AppState>) -> Result<Json<ApiResponse<RefreshSummary>>, StatusCode> {
    match state.recommendation_service.refresh().await {
        Ok(summary) => Ok(Json(ApiResponse::success(summary))),
        Err(e) => {
            tracing::error!("Failed to refresh index: {}", e);
            Err(status_for(&e))
        }
    }
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/recommendations/:user_id", get(get_recommendations))
        .route("/products/:product_id/similar", get(similar_products))
        .route("/index/refresh", post(refresh_index))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };
    info!("Starting rentrec recommendation server with config: {:?}", config.server);

    let runtime = config.server.build_runtime()?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    let addr = config.server.socket_addr()?;
    let state = AppState::new(config).await?;
    if let Err(e) = state.recommendation_service.refresh().await {
        warn!("Initial index build failed, serving after POST /index/refresh: {}", e);
    }

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
