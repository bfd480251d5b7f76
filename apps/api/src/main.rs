mod auth_routes;
mod chat_routes;
mod library_routes;
mod queue_routes;
mod routes;
mod state;

use dm_core::AppConfig;
use dotenv::dotenv;
use state::{AppState, Services};
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let cfg = AppConfig::load(None)?;
    let services = Services::from_config(&cfg)?;
    let state = AppState::start(services, cfg.chat.history_window, cfg.upload.max_bytes).await?;
    let app = routes::build_router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    tracing::info!(%addr, "documind-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}
