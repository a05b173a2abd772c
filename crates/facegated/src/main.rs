use anyhow::{Context, Result};
use facegate_core::FacePipeline;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod routes;

use config::Config;
use routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::from_env()?;
    tracing::info!(
        bind = %config.bind,
        model_dir = %config.model_dir.display(),
        allowed_origin = ?config.allowed_origin,
        max_body_bytes = config.max_body_bytes,
        max_image_dim = config.max_image_dim,
        "configuration loaded"
    );

    // Models load once, before the listener binds.
    let pipeline = FacePipeline::load(&config.model_dir).with_context(|| {
        format!(
            "failed to load face models from {}",
            config.model_dir.display()
        )
    })?;
    tracing::info!(dim = pipeline.embedding_dim(), "face models loaded");

    let engine = engine::spawn_engine(Box::new(pipeline), config.engine_queue)?;
    let state = AppState {
        engine,
        limits: config.decode_limits(),
    };
    let app = routes::router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %config.bind, "facegated ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("facegated shutting down");
        })
        .await?;

    Ok(())
}
