use dotenvy::dotenv;
use mimalloc::MiMalloc;
use panel_api::{
    config::{init_tracing, Settings},
    routes,
    states::GlobalState,
};
use std::error::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    init_tracing();

    let settings = Settings::from_env()?;
    let bind = settings.bind;
    if settings.api_key.is_none() {
        warn!("no PANEL_API_KEY configured, api authentication is disabled");
    }

    let state = GlobalState::new(settings);
    state.engine.events().spawn_logger();

    if let Err(e) = state.engine.rearm_trials().await {
        error!(error = %e, "failed to re-arm trial timers");
    }

    let listener = TcpListener::bind(bind).await?;
    info!(%bind, "panel api listening");

    axum::serve(listener, routes::routes(state))
        .with_graceful_shutdown(shutdown())
        .await?;

    Ok(())
}

async fn shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutting down");
}
