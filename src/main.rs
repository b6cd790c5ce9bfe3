use clap::Parser; // for cli
use nano_gateway::config::Args;
use nano_gateway::gemini::GeminiClient;
use nano_gateway::state::AppState;
use nano_gateway::store::{SqliteStore, resolve_db_path};
use nano_gateway::{build_router, telemetry};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env is optional
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let _log_guard = telemetry::init_tracing(&args.log_dir)?;

    let api_key = args.api_key()?;

    let db_path = resolve_db_path(&args.db_path);
    let store = SqliteStore::open(db_path).await?;

    let model = Arc::new(GeminiClient::new(api_key, &args.upstream_url));
    let throttle = args.throttle();
    let state = Arc::new(AppState::new(
        model,
        throttle.clone(),
        args.default_model.clone(),
        store,
        args.public_dir.clone(),
        args.max_upload_bytes(),
    ));

    let origins = args.origins();
    let app = build_router(state, &origins);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Gateway running on http://localhost:{}", args.port);
    info!("Default model: {} via {}", args.default_model, args.upstream_url);
    info!(
        "Upstream throttle: {} concurrent, {:?} min interval, {} retries from {:?} backoff",
        throttle.max_concurrent, throttle.min_interval, throttle.max_retries, throttle.backoff_base
    );
    info!("CORS origins: {:?}", origins);
    axum::serve(listener, app).await?;
    Ok(())
}
