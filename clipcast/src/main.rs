mod server;

use anyhow::Result;
use tracing::info;

use clipcast_core::bootstrap::{init_database, init_services, init_storage, load_config};
use clipcast_core::logging;

use server::ClipcastServer;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (load_config already calls validate())
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Clipcast server starting...");
    info!("Listen address: {}", config.listen_address());

    // 3. Initialize database
    let pool = init_database(&config).await?;

    // 4. Initialize clip storage
    let store = init_storage(&config)?;

    // 5. Build catalog and clip service
    let (catalog, clips) = init_services(pool, store, &config);

    // 6. Run the server until a shutdown signal arrives
    let server = ClipcastServer::new(config, catalog, clips);
    server.run().await
}
