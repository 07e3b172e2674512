//! Simulation server
//!
//! Boots a world from JSON content and config and runs it until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};

use aisim_server::content::{ContentStore, WorldContent};
use aisim_server::services::{Broadcaster, ChannelBroadcaster, InMemoryInventory, SessionTable};
use aisim_server::{Collaborators, SimConfig, Simulation};

/// Tunables file, optional
const CONFIG_PATH: &str = "sim_config.json";

/// World content export, optional
const CONTENT_PATH: &str = "content.json";

/// Channel server this process simulates
const SERVER_ID: u16 = 1;

/// How often to log partition statistics (in seconds)
const STATS_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting simulation server...");

    let config = match SimConfig::load(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            info!("{}; using default config", e);
            SimConfig::default()
        }
    };

    let content = match ContentStore::load(CONTENT_PATH) {
        Ok(content) => content,
        Err(e) => {
            info!("{}; using built-in content", e);
            ContentStore::with_defaults()
        }
    };
    let content = Arc::new(content);

    // Stand-in for the network layer: casts are encoded and logged
    let (broadcaster, mut casts) = ChannelBroadcaster::new(4096);
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(broadcaster);
    tokio::spawn(async move {
        while let Some((scope, message)) = casts.recv().await {
            match message.serialize() {
                Ok(bytes) => debug!("{:?} <- {:?} ({} bytes)", scope, message, bytes.len()),
                Err(e) => error!("Failed to encode {:?}: {}", message, e),
            }
        }
    });

    let sessions = Arc::new(SessionTable::new());
    let inventory = Arc::new(InMemoryInventory::new(
        broadcaster.clone(),
        config.world_drop_claim(),
        config.world_drop_open(),
    ));

    let sim = Simulation::new(config, Collaborators {
        content: content.clone(),
        sessions,
        broadcaster,
        inventory: inventory.clone(),
    });
    sim.populate(SERVER_ID, None);

    info!("Server started successfully!");

    let mut stats = tokio::time::interval(Duration::from_secs(STATS_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = stats.tick() => {
                let mut maps: Vec<u32> = content.spawn_templates().iter().map(|s| s.map_id).collect();
                maps.sort_unstable();
                maps.dedup();
                for map in maps {
                    let monsters = sim.registry().monsters_in(SERVER_ID, map);
                    let alive = monsters.iter().filter(|m| !m.is_dead()).count();
                    info!("Map {}: {}/{} monsters alive", map, alive, monsters.len());
                }
                info!("{} items on the ground", inventory.world_items().len());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }
}
