use std::{net::SocketAddr, sync::Arc};

use callmix::{
    audio::background::load_background,
    common::{logger, types::AnyResult},
    configs::Config,
    server::{self, AppState},
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(&config);

    let source = &config.mixer.background_audio_source;
    let mut background = match load_background(source, config.mixer.sample_rate) {
        Ok(track) => track,
        Err(e) => {
            error!("Cannot start without background audio: {}", e);
            return Err(e.into());
        }
    };
    info!(
        "Background bed ready: {} ({:.1}s at {}Hz)",
        source,
        background.len() as f64 / config.mixer.sample_rate as f64,
        config.mixer.sample_rate
    );

    let address: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = Arc::new(AppState::new(config, background.samples().clone()));
    let app = server::router(state.clone());

    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Call mixer listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    background.close();
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
