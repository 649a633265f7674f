mod server;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use roomcast_api::AppState;
use roomcast_cluster::{Broker, BrokerConfig};
use roomcast_core::{
    bootstrap::load_config,
    logging,
    service::{InMemoryMessageStore, InMemoryRoomDirectory},
};

use server::RoomcastServer;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load and validate configuration
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Roomcast server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Collaborators
    let rooms = Arc::new(InMemoryRoomDirectory::from_seeds(&config.rooms));
    info!("Room directory loaded with {} room(s)", rooms.room_count());
    let messages = Arc::new(InMemoryMessageStore::new());

    // 4. Backplane (starts the Redis relay when configured)
    let broker_config = BrokerConfig::from_config(&config);
    info!(node_id = %broker_config.node_id, "Initializing broker");
    let broker = Arc::new(Broker::new(broker_config)?);
    if broker.relay_enabled() {
        info!("Cross-node relay: enabled");
    } else {
        info!("Cross-node relay: disabled (single-node mode)");
    }

    // 5. Serve until a shutdown signal arrives
    let state = AppState::new(broker.clone(), rooms, messages, &config);
    RoomcastServer::new(config, broker, state).start().await
}
