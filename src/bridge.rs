//! One mesh light backed by one bulb.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use log::{debug, info, warn};
use serde_json::{Value, json};

use crate::cache::RegistryCache;
use crate::client::BulbApi;
use crate::device::DeviceRecord;
use crate::errors::Error;
use crate::mesh::{MeshEndpoint, MeshEvent};
use crate::options::Timings;
use crate::reconcile::{LeaderMode, MirrorState, Reconciler};
use crate::runtime::{self, Instant, JoinHandle, Mutex};
use crate::status::DeviceState;

type Result<T> = std::result::Result<T, Error>;

/// Something that happened to a light, queued for its inbound task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Mesh(MeshEvent),
    /// State the bulb pushed with `syncPilot`.
    BulbPush(DeviceState),
}

/// Cloneable sending side of a bridge's event queue.
///
/// Sending never blocks, so the mesh stack and the push listener can hand
/// events over from any context.
#[derive(Debug, Clone)]
pub struct BridgeInbox {
    sender: UnboundedSender<BridgeEvent>,
}

impl BridgeInbox {
    pub(crate) fn new(sender: UnboundedSender<BridgeEvent>) -> Self {
        BridgeInbox { sender }
    }

    /// Queue an event, returning `false` once the bridge has stopped.
    pub fn send(&self, event: BridgeEvent) -> bool {
        self.sender.unbounded_send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

struct Shared<B: BulbApi> {
    endpoint: u8,
    ip: Ipv4Addr,
    record: DeviceRecord,
    api: Arc<B>,
    mesh: Arc<dyn MeshEndpoint>,
    cache: Arc<RegistryCache>,
    state: Mutex<Reconciler>,
    lock_budget: Duration,
}

impl<B: BulbApi> Shared<B> {
    /// Take the state lock, giving up after the lock budget.
    async fn try_state(&self) -> Option<runtime::MutexGuard<'_, Reconciler>> {
        runtime::timeout(self.lock_budget, self.state.lock()).await.ok()
    }

    async fn handle(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Mesh(MeshEvent::Identify { time }) => {
                debug!("Identify for {time}s on endpoint {}", self.endpoint);
            }
            BridgeEvent::Mesh(MeshEvent::LightChange(change)) => {
                let Some(mut state) = self.try_state().await else {
                    warn!("Light {} busy, dropping mesh command", self.record.mac);
                    return;
                };
                debug!("Endpoint {} command: {change:?}", self.endpoint);
                state.apply_light_change(&change, Instant::now());
            }
            BridgeEvent::BulbPush(pushed) => {
                let attrs = {
                    let Some(mut state) = self.try_state().await else {
                        warn!("Light {} busy, dropping bulb push", self.record.mac);
                        return;
                    };
                    state.apply_bulb_push(&pushed, Instant::now())
                };
                if let Some(attrs) = attrs {
                    self.mesh.push_attributes(&attrs);
                }
            }
        }
    }

    /// One worker tick. Network I/O happens with the state lock released.
    async fn tick(&self) {
        let plan = {
            let Some(mut state) = self.try_state().await else {
                debug!("Light {} busy, skipping tick", self.record.mac);
                return;
            };
            state.poll(Instant::now())
        };

        if let Some(desired) = plan.write
            && !self.api.set_state(&self.record, &desired).await
        {
            warn!("Failed to send state to {}", self.ip);
        }

        if plan.read {
            let read = self.api.get_state(self.ip).await;
            // The sync has to end even if commands are queued on the lock.
            let attrs = self.state.lock().await.finish_sync(&read, Instant::now());
            match attrs {
                Some(attrs) => self.mesh.push_attributes(&attrs),
                None => warn!(
                    "Failed to read {}: {}",
                    self.ip,
                    read.error_message.as_deref().unwrap_or("invalid state")
                ),
            }
        }

        if let Some((settings, revision)) = plan.save {
            match self.cache.save_settings(&self.record.mac, &settings).await {
                Ok(true) => {
                    if let Some(mut state) = self.try_state().await {
                        state.settings_saved(revision, Instant::now());
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to save settings for {}: {e}", self.record.mac);
                    if let Some(mut state) = self.try_state().await {
                        state.save_failed(Instant::now());
                    }
                }
            }
        }
    }
}

/// Mirrors one bulb onto one mesh endpoint.
///
/// Owns two tasks: an inbound task applying queued [`BridgeEvent`]s in
/// arrival order, and a worker that runs the [`Reconciler`] every tick.
pub struct LightBridge<B: BulbApi> {
    shared: Arc<Shared<B>>,
    inbox: BridgeInbox,
    running: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<B: BulbApi> LightBridge<B> {
    /// Seed the mirror and start both tasks.
    ///
    /// Persisted settings win over the live bulb. Without settings the bulb
    /// is read once; if that fails too the light starts off and unknown.
    pub async fn start(
        endpoint: u8,
        record: DeviceRecord,
        api: Arc<B>,
        mesh: Arc<dyn MeshEndpoint>,
        cache: Arc<RegistryCache>,
        timings: &Timings,
    ) -> Result<Self> {
        let ip = record.ipv4()?;
        let mut reconciler = Reconciler::new(record.features, timings);

        let settings = cache.load_settings(&record.mac).await.unwrap_or_else(|e| {
            warn!("Ignoring settings of {}: {e}", record.mac);
            None
        });
        let initial = match settings {
            Some(settings) => {
                debug!("Restoring {} from saved settings", record.mac);
                Some(reconciler.restore(&settings, Instant::now()))
            }
            None => {
                let read = api.get_state(ip).await;
                if read.is_valid {
                    info!("Initial state of {ip}: {}", if read.state { "on" } else { "off" });
                    Some(reconciler.seed(&read, Instant::now()))
                } else {
                    warn!("No initial state for {ip}");
                    None
                }
            }
        };
        if let Some(attrs) = initial {
            mesh.push_attributes(&attrs);
        }

        let shared = Arc::new(Shared {
            endpoint,
            ip,
            record,
            api,
            mesh,
            cache,
            state: Mutex::new(reconciler),
            lock_budget: timings.state_lock_budget,
        });

        let (sender, receiver) = mpsc::unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let tasks = vec![
            runtime::spawn(Self::inbound(Arc::clone(&shared), receiver)),
            runtime::spawn(Self::worker(
                Arc::clone(&shared),
                Arc::clone(&running),
                timings.tick,
            )),
        ];

        info!("Bridging {} ({}) on endpoint {endpoint}", shared.ip, shared.record.mac);
        Ok(LightBridge {
            shared,
            inbox: BridgeInbox::new(sender),
            running,
            tasks,
        })
    }

    async fn inbound(shared: Arc<Shared<B>>, mut events: UnboundedReceiver<BridgeEvent>) {
        while let Some(event) = events.next().await {
            shared.handle(event).await;
        }
    }

    async fn worker(shared: Arc<Shared<B>>, running: Arc<AtomicBool>, tick: Duration) {
        while running.load(Ordering::SeqCst) {
            shared.tick().await;
            runtime::sleep(tick).await;
        }
        debug!("Worker for endpoint {} stopped", shared.endpoint);
    }

    pub fn endpoint(&self) -> u8 {
        self.shared.endpoint
    }

    pub fn record(&self) -> &DeviceRecord {
        &self.shared.record
    }

    pub fn inbox(&self) -> BridgeInbox {
        self.inbox.clone()
    }

    /// Queue an event from the mesh stack.
    pub fn handle_mesh_event(&self, event: MeshEvent) -> bool {
        self.inbox.send(BridgeEvent::Mesh(event))
    }

    /// Queue a state the bulb pushed.
    pub fn handle_bulb_push(&self, state: DeviceState) -> bool {
        self.inbox.send(BridgeEvent::BulbPush(state))
    }

    pub async fn mode(&self) -> LeaderMode {
        self.shared.state.lock().await.mode()
    }

    pub async fn mirror(&self) -> MirrorState {
        *self.shared.state.lock().await.mirror()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// A JSON snapshot of the light for troubleshooting.
    pub async fn diagnostics(&self) -> Value {
        let record = &self.shared.record;
        let mut diag = json!({
            "endpoint": self.shared.endpoint,
            "running": self.is_running(),
            "device": {
                "ip": record.ip,
                "mac": record.mac,
                "module_name": record.module_name,
                "class": record.bulb_class.to_string(),
                "fw_version": record.fw_version,
                "features": record.features,
            },
        });

        // Never wait on a worker that is mid-tick.
        if let Some(state) = self.shared.try_state().await {
            diag["leader_mode"] = json!(state.mode().to_string());
            diag["mirror"] = serde_json::to_value(state.mirror()).unwrap_or(Value::Null);
            diag["pending_send"] = json!(state.pending_send());
            diag["pending_save"] = json!(state.pending_save());
        }

        diag
    }

    /// Stop both tasks and wait for them to finish.
    ///
    /// The worker finishes its current tick first; queued events are still
    /// applied.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.inbox.sender.close_channel();
        for task in self.tasks.drain(..) {
            task.await;
        }
        info!("Stopped bridge on endpoint {}", self.shared.endpoint);
    }
}

impl<B: BulbApi> Drop for LightBridge<B> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.inbox.sender.close_channel();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// A bulb that lives in memory.
    #[derive(Debug, Default)]
    pub struct FakeApi {
        pub state: Mutex<DeviceState>,
        pub writes: Mutex<Vec<DeviceState>>,
        pub reads: AtomicUsize,
        pub unreachable: AtomicBool,
    }

    impl FakeApi {
        pub fn with_state(state: serde_json::Value) -> Self {
            let api = FakeApi::default();
            *api.state.lock().unwrap() = DeviceState::from_result(state).unwrap();
            api
        }

        pub fn read_count(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        pub fn last_write(&self) -> Option<DeviceState> {
            self.writes.lock().unwrap().last().cloned()
        }
    }

    impl BulbApi for FakeApi {
        async fn get_system_config(&self, ip: Ipv4Addr) -> DeviceRecord {
            DeviceRecord::invalid(ip, &Error::timeout(&ip, "getSystemConfig"))
        }

        async fn get_state(&self, ip: Ipv4Addr) -> DeviceState {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.unreachable.load(Ordering::SeqCst) {
                return DeviceState::invalid(&Error::timeout(&ip, "getPilot"));
            }
            self.state.lock().unwrap().clone()
        }

        async fn set_state(&self, _record: &DeviceRecord, desired: &DeviceState) -> bool {
            self.writes.lock().unwrap().push(desired.clone());
            true
        }
    }

    pub fn bridge_timings() -> Timings {
        Timings {
            tick: Duration::from_millis(10),
            leader_timeout: Duration::from_millis(300),
            read_interval: Duration::from_millis(150),
            save_interval: Duration::from_millis(20),
            state_lock_budget: Duration::from_millis(50),
            store_lock_budget: Duration::from_millis(20),
            ..Timings::default()
        }
    }

    pub fn rgb_record(mac: &str, ip: &str) -> DeviceRecord {
        let config: crate::config::SystemConfig = serde_json::from_value(
            serde_json::json!({"mac": mac, "moduleName": "ESP01_SHRGB1C_31"}),
        )
        .unwrap();
        DeviceRecord::from_config(ip.parse().unwrap(), &config)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::cache::LightSettings;
    use crate::cache::testing::MemoryStore;
    use crate::mesh::fake::RecordingEndpoint;
    use crate::mesh::{ColorMode, LightChange};
    use crate::types::Color;

    struct Harness {
        api: Arc<FakeApi>,
        endpoint: Arc<RecordingEndpoint>,
        store: Arc<MemoryStore>,
        cache: Arc<RegistryCache>,
    }

    impl Harness {
        fn new(api: FakeApi) -> Self {
            let store = Arc::new(MemoryStore::default());
            let timings = bridge_timings();
            Harness {
                api: Arc::new(api),
                endpoint: Arc::new(RecordingEndpoint {
                    endpoint: 10,
                    ..Default::default()
                }),
                cache: Arc::new(RegistryCache::new(store.clone(), timings.store_lock_budget)),
                store,
            }
        }

        async fn start(&self) -> LightBridge<FakeApi> {
            LightBridge::start(
                10,
                rgb_record("a8:bb:50:06:ab:cd", "127.0.0.1"),
                Arc::clone(&self.api),
                self.endpoint.clone(),
                Arc::clone(&self.cache),
                &bridge_timings(),
            )
            .await
            .unwrap()
        }
    }

    fn rgb_command() -> MeshEvent {
        MeshEvent::LightChange(LightChange {
            on: true,
            color: Color::rgb(10, 20, 30),
            level: 128,
            mireds: 0,
            color_mode: Some(ColorMode::Xy),
        })
    }

    #[tokio::test]
    async fn test_start_seeds_from_bulb() {
        let harness = Harness::new(FakeApi::with_state(
            serde_json::json!({"state": true, "temp": 2700, "dimming": 100}),
        ));
        let mut bridge = harness.start().await;

        assert_eq!(harness.api.read_count(), 1);
        let first = harness.endpoint.pushes.lock().unwrap()[0];
        assert!(first.on);
        assert_eq!(first.level, Some(255));
        assert_eq!(first.mireds.map(|m| m.mireds()), Some(370));
        assert_eq!(first.color_mode, Some(ColorMode::Temperature));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_mesh_command_is_written_to_bulb() {
        let harness = Harness::new(FakeApi::with_state(serde_json::json!({"state": false})));
        let mut bridge = harness.start().await;

        assert!(bridge.handle_mesh_event(rgb_command()));
        runtime::sleep(Duration::from_millis(100)).await;

        assert_eq!(bridge.mode().await, LeaderMode::HueLeader);
        let mirror = bridge.mirror().await;
        assert_eq!(mirror.color, Some(Color::rgb(10, 20, 30)));
        assert_eq!(mirror.mireds, None);

        let write = harness.api.last_write().unwrap();
        assert!(write.state);
        assert_eq!((write.r, write.g, write.b), (Some(10), Some(20), Some(30)));
        assert_eq!(write.dimming, Some(50));
        assert_eq!(write.temp, None);

        // Leadership lapses and the bulb is read again.
        runtime::sleep(Duration::from_millis(500)).await;
        assert_ne!(bridge.mode().await, LeaderMode::HueLeader);
        assert!(harness.api.read_count() >= 2);

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_settings_are_persisted_and_restored() {
        let harness = Harness::new(FakeApi::with_state(serde_json::json!({"state": false})));
        let mut bridge = harness.start().await;
        bridge.handle_mesh_event(rgb_command());
        runtime::sleep(Duration::from_millis(100)).await;
        bridge.stop().await;

        let saved: LightSettings =
            serde_json::from_str(&harness.store.get("light_a8_bb_50_06_ab_cd.json").unwrap())
                .unwrap();
        assert!(saved.state);
        assert_eq!((saved.r, saved.g, saved.b), (Some(10), Some(20), Some(30)));
        assert_eq!(saved.level, 128);

        let restarted = Harness {
            api: Arc::new(FakeApi::with_state(
                serde_json::json!({"state": false, "temp": 2700}),
            )),
            endpoint: Arc::new(RecordingEndpoint::default()),
            store: harness.store.clone(),
            cache: Arc::clone(&harness.cache),
        };
        let mut bridge = restarted.start().await;
        let first = restarted.endpoint.pushes.lock().unwrap()[0];
        assert_eq!(first.color, Some(Color::rgb(10, 20, 30)));
        assert_eq!(first.level, Some(128));

        // A few ticks later the restored state still holds and reached the bulb.
        runtime::sleep(Duration::from_millis(40)).await;
        assert_eq!(restarted.api.read_count(), 0);
        let mirror = bridge.mirror().await;
        assert!(mirror.on);
        assert_eq!(mirror.color, Some(Color::rgb(10, 20, 30)));
        let write = restarted.api.last_write().unwrap();
        assert_eq!((write.r, write.g, write.b), (Some(10), Some(20), Some(30)));
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_failing_store_retries_on_save_interval() {
        let harness = Harness::new(FakeApi::with_state(serde_json::json!({"state": false})));
        harness.store.failing.store(true, Ordering::SeqCst);
        let timings = Timings {
            save_interval: Duration::from_secs(5),
            ..bridge_timings()
        };
        let mut bridge = LightBridge::start(
            10,
            rgb_record("a8:bb:50:06:ab:cd", "127.0.0.1"),
            Arc::clone(&harness.api),
            harness.endpoint.clone(),
            Arc::clone(&harness.cache),
            &timings,
        )
        .await
        .unwrap();

        bridge.handle_mesh_event(rgb_command());
        runtime::sleep(Duration::from_millis(150)).await;

        assert_eq!(harness.store.write_count(), 1);
        assert!(bridge.mirror().await.color.is_some());
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_bulb_push_reaches_mesh() {
        let harness = Harness::new(FakeApi::with_state(serde_json::json!({"state": false})));
        let mut bridge = harness.start().await;
        let before = harness.endpoint.count();

        let pushed = DeviceState::from_result(serde_json::json!({"state": true, "dimming": 40})).unwrap();
        assert!(bridge.handle_bulb_push(pushed));
        runtime::sleep(Duration::from_millis(50)).await;

        assert!(harness.endpoint.count() > before);
        let mirror = bridge.mirror().await;
        assert!(mirror.on);
        assert_eq!(mirror.level, 102);
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_bulb_still_bridges() {
        let api = FakeApi::default();
        api.unreachable.store(true, Ordering::SeqCst);
        let harness = Harness::new(api);
        let mut bridge = harness.start().await;

        assert_eq!(harness.endpoint.count(), 0);
        let diag = bridge.diagnostics().await;
        assert_eq!(diag["endpoint"], 10);
        assert_eq!(diag["device"]["class"], "RGB");
        assert!(diag.get("leader_mode").is_some());

        bridge.stop().await;
        assert!(!bridge.is_running());
        assert!(!bridge.handle_mesh_event(MeshEvent::Identify { time: 3 }));
    }
}
