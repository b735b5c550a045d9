use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use isaqe::config::Config;
use isaqe::services::llm::{LlmReasoner, PromptResources, ResponseSynthesizer, build_llm_client};
use isaqe::services::{
    AuditLogger, CacheClient, GuardrailEngine, PipelineComponents, QueryExecutor, QueryPipeline,
    RateLimiter, SchemaExtractor, SchemaRanker, SqlGenerator, SqlValidator,
};
use isaqe::services::schema_ranker::EmbeddingStore;
use isaqe::{AppState, db, handlers, models, observability};

#[derive(OpenApi)]
#[openapi(
    paths(handlers::query::run_query),
    components(schemas(
        models::QueryRequest,
        models::QueryResponse,
        models::ExecutionMetadata,
    )),
    tags((name = "Query", description = "Natural-language query endpoint"))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    let mut _appender_guard = None;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("isaqe.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _appender_guard = Some(guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("ISAQE starting up");

    let pool = db::create_pool(&config.postgres).await?;
    tracing::info!("Database pool created successfully");

    let cache = Arc::new(CacheClient::new(config.redis.clone()));
    let audit = Arc::new(AuditLogger::new(&config.observability)?);
    let prompts = Arc::new(PromptResources::load(&config.prompts)?);

    let api_key = std::env::var("LLM_API_KEY").unwrap_or_default();
    let llm_client = build_llm_client(&config.llm, &api_key)?;
    tracing::info!("LLM client initialized (provider: {})", config.llm.provider);

    let schema_ranker = match &config.schema.embedding_store_path {
        Some(path) => {
            let store = EmbeddingStore::load(path)?;
            tracing::info!("Precomputed embedding store loaded from {}", path);
            Arc::new(SchemaRanker::with_store(config.schema.clone(), store))
        },
        None => Arc::new(SchemaRanker::new(config.schema.clone())),
    };

    let parts = PipelineComponents {
        schema_extractor: Arc::new(SchemaExtractor::new(config.schema.clone())),
        schema_ranker,
        reasoner: Arc::new(LlmReasoner::new(Arc::clone(&llm_client), Arc::clone(&prompts))),
        sql_generator: Arc::new(SqlGenerator::new(config.postgres.clone())),
        sql_validator: Arc::new(SqlValidator::new(&config.postgres, &config.sql_guardrails)),
        guardrail_engine: Arc::new(GuardrailEngine::new(config.sql_guardrails.clone())),
        executor: Arc::new(QueryExecutor::new(config.postgres.clone())),
        synthesizer: Arc::new(ResponseSynthesizer::new(llm_client, prompts)),
        cache,
        audit,
        rate_limiter: Arc::new(RateLimiter::new(config.security.clone())),
    };
    let pipeline = Arc::new(QueryPipeline::new(config.schema.clone(), parts));

    let app_state = Arc::new(AppState { db: pool, pipeline });

    let query_routes = Router::new()
        .route("/query", post(handlers::query::run_query))
        .with_state(app_state);

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(query_routes)
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/metrics", get(observability::metrics_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);
    tracing::info!("ISAQE is ready to serve requests");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ready_check() -> &'static str {
    "READY"
}
