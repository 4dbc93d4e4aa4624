//! Axum-based gateway for the festival-customs QA core. Config-driven via CoreConfig.

mod cli;
mod handlers;
mod sessions;

use axum::extract::{Json, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use nianqa_core::{CoreConfig, KnowledgeBase, LlmConfig, LlmConfigUpdate, Orchestrator};
use serde_json::json;
use sessions::SessionStore;
use std::path::Path as StdPath;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn run_verify() -> Result<(), String> {
    let config = CoreConfig::load().map_err(|e| format!("Config load failed: {}", e))?;

    // 1. Knowledge base snapshot
    print!("Checking knowledge base at {}... ", config.knowledge_base_path);
    let kb = KnowledgeBase::load_path(&config.knowledge_base_path)
        .map_err(|e| format!("knowledge base unusable: {}", e))?;
    println!("OK ({} entries)", kb.len());

    // 2. LLM options (missing credentials only disable the fallback)
    print!("Checking LLM config at {}... ", config.llm_config_path);
    let llm = LlmConfig::load(StdPath::new(&config.llm_config_path))
        .map_err(|e| format!("LLM config invalid: {}", e))?;
    if llm.api_key.is_some() {
        println!("OK (model {}, fallback enabled)", llm.model);
    } else {
        println!("OK (no API key, fallback disabled)");
    }

    // 3. Port availability
    let addr = format!("{}:{}", config.host, config.port);
    print!("Checking {}... ", addr);
    match std::net::TcpListener::bind(&addr) {
        Ok(listener) => {
            drop(listener);
            println!("OK (available)");
        }
        Err(e) => {
            return Err(format!("{} BLOCKED: {}", addr, e));
        }
    }

    println!("\n✅ SUCCESS: All systems GO. Ready to start gateway.");
    Ok(())
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[nianqa-gateway] .env not loaded: {} (using system environment)", e);
    }

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--verify") {
        match run_verify() {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("❌ PRE-FLIGHT FAILED: {}", e);
                std::process::exit(1);
            }
        }
    }
    let interactive = args.iter().any(|a| a == "--cli");

    // The terminal session keeps stdout for the dialogue.
    let default_filter = if interactive { "warn" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(CoreConfig::load().expect("load CoreConfig"));
    let orchestrator = Arc::new(Orchestrator::from_config(&config).expect("load knowledge base"));

    if interactive {
        if let Err(e) = cli::run(orchestrator, config.max_history_length).await {
            eprintln!("[nianqa-gateway] terminal session ended: {}", e);
        }
        return;
    }

    let app = build_app(AppState::new(Arc::clone(&config), orchestrator));

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(target: "nianqa::gateway", "{} listening on {}", config.app_name, addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr).await.expect("bind gateway address"),
        app,
    )
    .await
    .expect("serve gateway");
}

fn build_app(state: AppState) -> Router {
    // CORS: local browser front-ends only.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &axum::http::HeaderValue, _| {
            let s = origin.to_str().unwrap_or("");
            let host = s
                .split("://")
                .nth(1)
                .and_then(|rest| rest.split(':').next())
                .unwrap_or("");
            host == "localhost" || host == "127.0.0.1"
        }))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .expose_headers(tower_http::cors::Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(handlers::chat::chat))
        .route(
            "/api/history/:session_id",
            get(handlers::chat::get_history).delete(handlers::chat::clear_history),
        )
        .route("/api/sessions", get(handlers::chat::list_sessions))
        .route("/api/knowledge/reload", post(reload_knowledge))
        .route("/api/stats", get(stats))
        .route("/api/llm/config", get(llm_config).put(update_llm_config))
        .with_state(state)
        .layer(cors)
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<CoreConfig>,
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) sessions: Arc<SessionStore>,
}

impl AppState {
    pub(crate) fn new(config: Arc<CoreConfig>, orchestrator: Arc<Orchestrator>) -> Self {
        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&orchestrator),
            config.max_history_length,
        ));
        Self {
            config,
            orchestrator,
            sessions,
        }
    }
}

/// GET /api/health – liveness check for UI and scripts.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": state.config.app_name,
        "llm_enabled": state.orchestrator.llm_enabled(),
        "entries": state.orchestrator.knowledge_entries(),
    }))
}

/// POST /api/knowledge/reload – swap in the knowledge-base file as it is now on disk.
async fn reload_knowledge(State(state): State<AppState>) -> Response {
    match state.orchestrator.reload_knowledge_base() {
        Ok(entries) => {
            tracing::info!(target: "nianqa::gateway", entries, "knowledge base reloaded");
            Json(json!({ "status": "ok", "entries": entries })).into_response()
        }
        Err(e) => {
            tracing::error!(target: "nianqa::gateway", error = %e, "knowledge base reload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /api/stats – LLM usage counters.
async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.orchestrator.llm() {
        Some(llm) => {
            let stats = llm.get_monitoring_stats();
            Json(json!({
                "llm_enabled": true,
                "total_calls": stats.total_calls,
                "total_tokens": stats.total_tokens,
                "total_cost": stats.total_cost,
                "avg_response_time": stats.avg_response_time,
            }))
        }
        None => Json(json!({ "llm_enabled": false })),
    }
}

fn llm_disabled() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "LLM backend is not configured" })),
    )
        .into_response()
}

/// GET /api/llm/config – current model options, without credentials.
async fn llm_config(State(state): State<AppState>) -> Response {
    let Some(llm) = state.orchestrator.llm() else {
        return llm_disabled();
    };
    let mut config = llm.config();
    config.api_key = None;
    Json(config).into_response()
}

/// PUT /api/llm/config – change model options and persist them.
async fn update_llm_config(
    State(state): State<AppState>,
    Json(update): Json<LlmConfigUpdate>,
) -> Response {
    let Some(llm) = state.orchestrator.llm() else {
        return llm_disabled();
    };
    match llm.update_config(update) {
        Ok(mut config) => {
            config.api_key = None;
            Json(config).into_response()
        }
        Err(e) => {
            tracing::error!(target: "nianqa::gateway", error = %e, "LLM config update failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use nianqa_core::{
        ChatModel, ChatRequest, Completion, Delta, DeltaStream, KnowledgeRetriever, LlmBackend,
        LlmError, APOLOGY, NO_ANSWER,
    };
    use tower::ServiceExt;

    /// Model stub that streams fixed fragments.
    struct Canned(Vec<&'static str>);

    #[async_trait::async_trait]
    impl ChatModel for Canned {
        async fn complete(&self, _: &ChatRequest) -> Result<Completion, LlmError> {
            Ok(Completion {
                text: self.0.concat(),
                total_tokens: 5,
            })
        }

        async fn stream(&self, _: &ChatRequest) -> Result<DeltaStream, LlmError> {
            let items: Vec<Result<Delta, LlmError>> = self
                .0
                .iter()
                .map(|s| {
                    Ok(Delta {
                        text: Some(s.to_string()),
                        total_tokens: None,
                    })
                })
                .collect();
            Ok(Box::pin(futures_util::stream::iter(items)))
        }
    }

    /// Model stub whose stream never starts.
    struct Unreachable;

    #[async_trait::async_trait]
    impl ChatModel for Unreachable {
        async fn complete(&self, _: &ChatRequest) -> Result<Completion, LlmError> {
            Err(LlmError::InvalidResponse("offline".into()))
        }

        async fn stream(&self, _: &ChatRequest) -> Result<DeltaStream, LlmError> {
            Err(LlmError::InvalidResponse("offline".into()))
        }
    }

    fn test_config() -> CoreConfig {
        CoreConfig {
            app_name: "Test Gateway".to_string(),
            ..CoreConfig::default()
        }
    }

    fn test_app(llm: Option<LlmBackend>) -> Router {
        let kb = KnowledgeBase::from_json_str(
            r#"{"data":[{"id":"fu-character","title":"倒贴福","description":"因为福到了，所以倒贴",
                "keywords":["福字"],"scenarios":[],"related":[]}]}"#,
        )
        .unwrap();
        let orchestrator = Orchestrator::new(KnowledgeRetriever::from_snapshot(kb), llm);
        build_app(AppState::new(Arc::new(test_config()), Arc::new(orchestrator)))
    }

    fn canned_llm(parts: Vec<&'static str>) -> LlmBackend {
        LlmBackend::with_model(Arc::new(Canned(parts)), LlmConfig::default())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_identity_and_llm_state() {
        let res = test_app(None).oneshot(get("/api/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "Test Gateway");
        assert_eq!(json["llm_enabled"], false);
        assert_eq!(json["entries"], 1);
    }

    #[tokio::test]
    async fn test_chat_answers_from_knowledge_base_and_keeps_session() {
        let app = test_app(None);
        let res = app
            .clone()
            .oneshot(post_json("/api/chat", json!({ "message": "为啥要倒贴福？", "session_id": "s1" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["source"], "knowledge_base");
        assert_eq!(json["session_id"], "s1");
        assert!(json["response"].as_str().unwrap().contains("因为"));

        let history = body_json(app.clone().oneshot(get("/api/history/s1")).await.unwrap()).await;
        assert_eq!(history["history"].as_array().unwrap().len(), 2);
        assert_eq!(history["history"][0]["role"], "user");

        let sessions = body_json(app.oneshot(get("/api/sessions")).await.unwrap()).await;
        assert_eq!(sessions["count"], 1);
        assert_eq!(sessions["sessions"][0], "s1");
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_message() {
        let res = test_app(None)
            .oneshot(post_json("/api/chat", json!({ "message": "   " })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_miss_without_llm_is_fallback() {
        let res = test_app(None)
            .oneshot(post_json("/api/chat", json!({ "message": "圣诞节吃火鸡" })))
            .await
            .unwrap();
        let json = body_json(res).await;
        assert_eq!(json["source"], "fallback");
        assert_eq!(json["response"], NO_ANSWER);
        assert_eq!(json["session_id"].as_str().unwrap().len(), 36);
    }

    #[tokio::test]
    async fn test_streamed_llm_answer_is_filtered_and_recorded() {
        let app = test_app(Some(canned_llm(vec!["<th", "ink>想一想</think>感恩节", "吃火鸡。"])));
        let res = app
            .clone()
            .oneshot(post_json(
                "/api/chat",
                json!({ "message": "感恩节吃什么", "session_id": "s2", "stream": true }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-answer-source"], "llm");
        assert_eq!(res.headers()["x-session-id"], "s2");
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), "感恩节吃火鸡。");

        let history = body_json(app.clone().oneshot(get("/api/history/s2")).await.unwrap()).await;
        assert_eq!(history["history"][1]["content"], "感恩节吃火鸡呢。");

        let stats = body_json(app.oneshot(get("/api/stats")).await.unwrap()).await;
        assert_eq!(stats["llm_enabled"], true);
        assert_eq!(stats["total_calls"], 1);
    }

    #[tokio::test]
    async fn test_failed_stream_records_the_apology_it_showed() {
        let llm = LlmBackend::with_model(Arc::new(Unreachable), LlmConfig::default());
        let app = test_app(Some(llm));
        let res = app
            .clone()
            .oneshot(post_json(
                "/api/chat",
                json!({ "message": "感恩节吃什么", "session_id": "s3", "stream": true }),
            ))
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), APOLOGY);

        let history = body_json(app.oneshot(get("/api/history/s3")).await.unwrap()).await;
        assert_eq!(history["history"][1]["content"], APOLOGY);
    }

    #[tokio::test]
    async fn test_streamed_knowledge_answer_is_one_chunk() {
        let res = test_app(None)
            .oneshot(post_json("/api/chat", json!({ "message": "为啥要倒贴福？", "stream": true })))
            .await
            .unwrap();
        assert_eq!(res.headers()["x-answer-source"], "knowledge_base");
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(std::str::from_utf8(&bytes).unwrap().contains("因为"));
    }

    #[tokio::test]
    async fn test_delete_history_removes_session() {
        let app = test_app(None);
        app.clone()
            .oneshot(post_json("/api/chat", json!({ "message": "春节", "session_id": "gone" })))
            .await
            .unwrap();
        let delete = Request::builder()
            .method("DELETE")
            .uri("/api/history/gone")
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let history = body_json(app.clone().oneshot(get("/api/history/gone")).await.unwrap()).await;
        assert!(history["history"].as_array().unwrap().is_empty());

        let again = Request::builder()
            .method("DELETE")
            .uri("/api/history/gone")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(again).await.unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reload_and_llm_config_routes() {
        let res = test_app(None)
            .oneshot(post_json("/api/knowledge/reload", json!({})))
            .await
            .unwrap();
        let json = body_json(res).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["entries"], 1);

        let res = test_app(None).oneshot(get("/api/llm/config")).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        let update = Request::builder()
            .method("PUT")
            .uri("/api/llm/config")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "max_tokens": 256 }).to_string()))
            .unwrap();
        let res = test_app(Some(canned_llm(vec!["好"]))).oneshot(update).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["max_tokens"], 256);
        assert!(json.get("api_key").is_none());
    }
}
