use embers::{app, db, metrics::Metrics, reaper, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_pool = db::connect(dotenv::var("DATABASE_URL")?.as_str()).await?;
    let metrics = Metrics::new();

    let app = app(AppState {
        db_pool: db_pool.clone(),
        metrics,
    });

    tokio::spawn(reaper::run(db_pool, reaper::REAP_PERIOD));

    let port = dotenv::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(3000);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("listening on port {port}");
    axum::serve(listener, app).await?;

    Ok(())
}
