use checksync::{Config, ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::from_env()?;
    log::info!(
        "starting checksync: {} cells, {}ms diff window, bind {}",
        config.num_of_checkboxes,
        config.broadcast_diff_window_ms,
        config.bind_addr
    );

    let server = SyncServer::new(ServerConfig::from(config));
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("ctrl-c received, shutting down");
            shutdown.shutdown();
        }
    });

    server.run().await
}
