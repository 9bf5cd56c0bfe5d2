//! Brandsmith Web 服务
//!
//! 启动: cargo run --bin brandsmith-web --features web
//! - POST /api/generate/stream        NDJSON 事件流（响应头 x-generation-id）
//! - POST /api/generate/:id/cancel    取消进行中的生成
//! - GET  /api/generate/:id           生成状态
//! - GET  /health

#![cfg(feature = "web")]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use brandsmith::config::{load_config, PipelineConfig};
use brandsmith::core::{GenerationRegistry, GenerationSnapshot, GenerationStatus};
use brandsmith::llm::create_llm_from_config;
use brandsmith::pipeline::{GenerationRequest, LlmHandlers, Orchestrator};

struct AppState {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<GenerationRegistry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(flatten)]
    request: GenerationRequest,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    id: String,
    cancelled: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    brandsmith::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });
    let llm = create_llm_from_config(&cfg);
    let pipeline_cfg = PipelineConfig::from(&cfg);
    let handlers = Arc::new(LlmHandlers::new(
        Arc::clone(&llm),
        pipeline_cfg.model.clone(),
        Duration::from_secs(cfg.llm.request_timeout_secs),
        pipeline_cfg.agentic_max_steps,
    ));
    let orchestrator = Arc::new(Orchestrator::new(llm, handlers, pipeline_cfg));

    let registry = Arc::new(GenerationRegistry::new(Duration::from_secs(
        cfg.server.registry_ttl_secs,
    )));
    let shutdown = CancellationToken::new();
    let sweeper = registry.spawn_sweeper(
        Duration::from_secs(cfg.server.sweep_interval_secs.max(1)),
        shutdown.clone(),
    );

    let state = Arc::new(AppState {
        orchestrator,
        registry,
    });

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/generate/stream", post(api_generate_stream))
        .route("/api/generate/:id", get(api_generation_status))
        .route("/api/generate/:id/cancel", post(api_generation_cancel))
        .with_state(Arc::clone(&state));

    tracing::info!("Brandsmith Web: http://{}", cfg.server.bind);
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind).await?;
    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            serve_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    Ok(())
}

/// 流式生成：每行一个事件帧，终止帧（done / error）后流结束
async fn api_generate_stream(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateBody>,
) -> Result<Response, (StatusCode, String)> {
    if body.request.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }
    let session_id = body
        .session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (generation_id, cancel) = state.registry.register(&session_id).await;
    tracing::info!(generation_id = %generation_id, session_id = %session_id, "Generation started");

    let (event_rx, handle) = state.orchestrator.spawn(body.request, cancel);

    // 生成结束后更新登记表
    let registry = Arc::clone(&state.registry);
    let finished_id = generation_id.clone();
    tokio::spawn(async move {
        let status = match handle.await {
            Ok(Ok(_)) => GenerationStatus::Completed,
            Ok(Err(e)) if e.is_cancelled() => GenerationStatus::Cancelled,
            Ok(Err(_)) => GenerationStatus::Failed,
            Err(e) => {
                tracing::error!("Generation task panicked: {}", e);
                GenerationStatus::Failed
            }
        };
        registry.finish(&finished_id, status).await;
    });

    type BoxErr = Box<dyn std::error::Error + Send + Sync>;
    let stream = stream::unfold(event_rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|ev| (Ok::<Bytes, BoxErr>(Bytes::from(ev.to_ndjson_line())), rx))
    });
    let mut res = Response::new(Body::from_stream(stream));
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(&generation_id) {
        res.headers_mut().insert("x-generation-id", value);
    }
    Ok(res)
}

async fn api_generation_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<GenerationSnapshot>, (StatusCode, String)> {
    state
        .registry
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "generation not found".to_string()))
}

async fn api_generation_cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, (StatusCode, String)> {
    if state.registry.get(&id).await.is_none() {
        return Err((StatusCode::NOT_FOUND, "generation not found".to_string()));
    }
    let cancelled = state.registry.cancel(&id).await;
    Ok(Json(CancelResponse { id, cancelled }))
}
