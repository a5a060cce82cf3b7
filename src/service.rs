//! Wiring for a whole bridge process.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use log::{info, warn};
use serde_json::{Value, json};

use crate::cache::{FileStore, RegistryCache};
use crate::client::BulbClient;
use crate::discovery::discover_bulbs;
use crate::errors::Error;
use crate::health::{Health, HealthMonitor, HealthReport};
use crate::mesh::{MeshEvent, MeshStack};
use crate::options::BridgeOptions;
use crate::pacer::TransmitPacer;
use crate::push::{self, PushListener};
use crate::registry::BridgeRegistry;

type Result<T> = std::result::Result<T, Error>;

/// Discovery, persistence, every light bridge, push routing and health
/// monitoring, started together and stopped together.
///
/// ```ignore
/// let options = BridgeOptions::from_json(&std::fs::read_to_string("bridge.json")?)?;
/// let service = BridgeService::start(&options, mesh_stack).await?;
/// // The mesh stack hands decoded events to `service.dispatch(endpoint, event)`.
/// ```
pub struct BridgeService {
    options: BridgeOptions,
    client: Arc<BulbClient>,
    cache: Arc<RegistryCache>,
    health: Arc<Health>,
    registry: BridgeRegistry<BulbClient>,
    push: Option<PushListener>,
    monitor: HealthMonitor,
    phone_mac: String,
}

impl BridgeService {
    pub async fn start(options: &BridgeOptions, mesh: Arc<dyn MeshStack>) -> Result<Self> {
        let timings = &options.timings;
        let health = Arc::new(Health::new(options.failure_threshold));
        let pacer = Arc::new(TransmitPacer::new(timings.send_spacing));
        let client = Arc::new(
            BulbClient::new(timings.clone(), pacer, Arc::clone(&health))
                .with_port(options.bulb_port),
        );
        let cache = Arc::new(RegistryCache::new(
            Arc::new(FileStore::new(&options.store_dir)),
            timings.store_lock_budget,
        ));

        let records = cache
            .discover_or_load(|| discover_bulbs(&client, options.broadcast))
            .await?;

        let mut registry = BridgeRegistry::new(
            Arc::clone(&client),
            Arc::clone(&mesh),
            Arc::clone(&cache),
            timings.clone(),
            options.first_endpoint,
        );
        registry.setup(&records).await;

        let listener = match PushListener::start(
            &format!("0.0.0.0:{}", options.push_port),
            registry.routes(),
            timings.tick,
        )
        .await
        {
            Ok(started) => Some(started),
            Err(e) => {
                warn!("Bulb pushes disabled: {e}");
                None
            }
        };

        let monitor = HealthMonitor::start(
            mesh,
            Arc::clone(&health),
            timings.mesh_check_interval,
            timings.tick,
        );

        info!("Bridge started with {} light(s)", registry.len());
        Ok(BridgeService {
            options: options.clone(),
            client,
            cache,
            health,
            registry,
            push: listener,
            monitor,
            phone_mac: push::generate_phone_mac(),
        })
    }

    /// Route a mesh event to its light.
    pub fn dispatch(&self, endpoint: u8, event: MeshEvent) -> bool {
        self.registry.dispatch(endpoint, event)
    }

    pub fn registry(&self) -> &BridgeRegistry<BulbClient> {
        &self.registry
    }

    pub fn client(&self) -> &BulbClient {
        &self.client
    }

    pub fn health(&self) -> HealthReport {
        self.health.report()
    }

    /// Ask every bridged bulb to push its state changes to `local_ip`.
    ///
    /// Returns how many registrations went out.
    pub async fn register_pushes(&self, local_ip: Ipv4Addr) -> usize {
        let message = push::registration_message(local_ip, &self.phone_mac);
        let mut sent = 0;
        for endpoint in self.registry.endpoints() {
            let Some(bridge) = self.registry.get(endpoint) else {
                continue;
            };
            let Ok(ip) = bridge.record().ipv4() else {
                continue;
            };
            let target = SocketAddr::from((ip, self.options.bulb_port));
            match push::register_bulb(target, &message, self.client.pacer()).await {
                Ok(()) => sent += 1,
                Err(e) => warn!("Push registration with {ip} failed: {e}"),
            }
        }
        sent
    }

    /// Forget every known bulb and saved setting.
    ///
    /// The running bridges are stopped; the next start rediscovers.
    pub async fn clear_cache(&mut self) -> Result<usize> {
        self.registry.teardown().await;
        self.cache.clear().await
    }

    pub async fn diagnostics(&self) -> Value {
        json!({
            "health": self.health.report(),
            "push": self.push.as_ref().map(|p| p.diagnostics()),
            "lights": self.registry.diagnostics().await,
        })
    }

    pub async fn shutdown(mut self) {
        self.registry.teardown().await;
        if let Some(mut listener) = self.push.take() {
            listener.stop().await;
        }
        self.monitor.stop().await;
        info!("Bridge stopped");
    }
}
