//! Endpoint numbering and the lifecycle of every light bridge.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};
use serde_json::Value;

use crate::bridge::LightBridge;
use crate::cache::RegistryCache;
use crate::client::BulbApi;
use crate::device::DeviceRecord;
use crate::mesh::{EndpointSpec, MeshEvent, MeshStack};
use crate::options::Timings;
use crate::push::PushRoutes;
use crate::status::DeviceState;

/// Owns one [`LightBridge`] per bridged bulb, keyed by mesh endpoint.
pub struct BridgeRegistry<B: BulbApi> {
    api: Arc<B>,
    mesh: Arc<dyn MeshStack>,
    cache: Arc<RegistryCache>,
    routes: PushRoutes,
    timings: Timings,
    first_endpoint: u8,
    bridges: BTreeMap<u8, LightBridge<B>>,
}

impl<B: BulbApi> BridgeRegistry<B> {
    pub fn new(
        api: Arc<B>,
        mesh: Arc<dyn MeshStack>,
        cache: Arc<RegistryCache>,
        timings: Timings,
        first_endpoint: u8,
    ) -> Self {
        BridgeRegistry {
            api,
            mesh,
            cache,
            routes: PushRoutes::new(),
            timings,
            first_endpoint,
            bridges: BTreeMap::new(),
        }
    }

    /// The MAC table a [`crate::push::PushListener`] should route through.
    pub fn routes(&self) -> PushRoutes {
        self.routes.clone()
    }

    /// Create a bridge for every valid record, replacing any existing ones.
    ///
    /// Valid records are numbered in ascending MAC order starting at the
    /// first endpoint, so the same set of bulbs always gets the same
    /// endpoints. Returns the number of bridges started.
    pub async fn setup(&mut self, records: &[DeviceRecord]) -> usize {
        self.teardown().await;

        let mut valid: Vec<&DeviceRecord> = records.iter().filter(|r| r.is_valid).collect();
        valid.sort_by(|a, b| a.mac.cmp(&b.mac));
        let skipped = records.len() - valid.len();
        if skipped > 0 {
            info!("Skipping {skipped} light(s) without capabilities");
        }

        for (offset, record) in valid.into_iter().enumerate() {
            let Some(endpoint) = u8::try_from(offset)
                .ok()
                .and_then(|o| self.first_endpoint.checked_add(o))
            else {
                warn!("Out of mesh endpoints, not bridging {}", record.mac);
                break;
            };

            let spec = EndpointSpec::for_record(endpoint, record);
            let mesh_endpoint = match self.mesh.register_light(&spec) {
                Ok(mesh_endpoint) => mesh_endpoint,
                Err(e) => {
                    warn!("Cannot register endpoint {endpoint} for {}: {e}", record.mac);
                    continue;
                }
            };

            match LightBridge::start(
                endpoint,
                record.clone(),
                Arc::clone(&self.api),
                mesh_endpoint,
                Arc::clone(&self.cache),
                &self.timings,
            )
            .await
            {
                Ok(bridge) => {
                    self.routes.insert(&record.mac, bridge.inbox());
                    self.bridges.insert(endpoint, bridge);
                }
                Err(e) => warn!("Cannot bridge {}: {e}", record.mac),
            }
        }

        info!("{} light(s) bridged", self.bridges.len());
        self.bridges.len()
    }

    /// Route a mesh event to the bridge on `endpoint`.
    pub fn dispatch(&self, endpoint: u8, event: MeshEvent) -> bool {
        match self.bridges.get(&endpoint) {
            Some(bridge) => bridge.handle_mesh_event(event),
            None => {
                warn!("Event for unknown endpoint {endpoint}");
                false
            }
        }
    }

    /// Route a pushed bulb state by MAC.
    pub fn route_push(&self, mac: &str, state: DeviceState) -> bool {
        self.routes.deliver(mac, state)
    }

    pub fn get(&self, endpoint: u8) -> Option<&LightBridge<B>> {
        self.bridges.get(&endpoint)
    }

    pub fn endpoints(&self) -> Vec<u8> {
        self.bridges.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub async fn diagnostics(&self) -> Value {
        let mut lights = Vec::with_capacity(self.bridges.len());
        for bridge in self.bridges.values() {
            lights.push(bridge.diagnostics().await);
        }
        Value::Array(lights)
    }

    /// Stop and drop every bridge.
    pub async fn teardown(&mut self) {
        self.routes.clear();
        let bridges = std::mem::take(&mut self.bridges);
        for (_, mut bridge) in bridges {
            bridge.stop().await;
        }
    }
}
