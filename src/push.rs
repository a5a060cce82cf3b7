//! Push notifications: bulbs report their own state changes via `syncPilot`.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::bridge::{BridgeEvent, BridgeInbox};
use crate::errors::Error;
use crate::pacer::TransmitPacer;
use crate::runtime::{self, AsyncUdpSocket, Instant, JoinHandle, UdpSocket};
use crate::status::DeviceState;

type Result<T> = std::result::Result<T, Error>;

pub const LISTEN_PORT: u16 = 38900;

fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(char::is_ascii_hexdigit)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// MAC → bridge lookup shared by the push listener and the bridge registry.
#[derive(Debug, Clone, Default)]
pub struct PushRoutes {
    inner: Arc<RwLock<HashMap<String, BridgeInbox>>>,
}

impl PushRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, mac: &str, inbox: BridgeInbox) {
        self.write().insert(normalize_mac(mac), inbox);
    }

    pub fn remove(&self, mac: &str) {
        self.write().remove(&normalize_mac(mac));
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand a pushed state to the bridge for `mac`.
    ///
    /// MACs match regardless of case and separators.
    pub fn deliver(&self, mac: &str, state: DeviceState) -> bool {
        match self.read().get(&normalize_mac(mac)) {
            Some(inbox) => inbox.send(BridgeEvent::BulbPush(state)),
            None => false,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, BridgeInbox>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, BridgeInbox>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Diagnostics for the push listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushDiagnostics {
    pub running: bool,
    pub route_count: usize,
    pub received: u64,
    pub delivered: u64,
    pub time_since_last_push: Option<f64>,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    delivered: AtomicU64,
    last_push: std::sync::Mutex<Option<Instant>>,
}

/// Listens for `syncPilot` datagrams and routes them by MAC.
pub struct PushListener {
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    routes: PushRoutes,
    counters: Arc<Counters>,
    task: Option<JoinHandle<()>>,
}

impl PushListener {
    /// Bind `addr` and start routing pushes.
    ///
    /// The listener checks for shutdown every `poll`.
    pub async fn start(addr: &str, routes: PushRoutes, poll: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::socket("bind push socket", e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| Error::socket("local_addr", e))?;

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let flag = Arc::clone(&running);
        let table = routes.clone();
        let stats = Arc::clone(&counters);
        let task = runtime::spawn(async move {
            let mut buffer = [0u8; 4096];
            while flag.load(Ordering::SeqCst) {
                match runtime::timeout(poll, socket.recv_from(&mut buffer)).await {
                    Ok(Ok((len, source))) => {
                        stats.received.fetch_add(1, Ordering::SeqCst);
                        *stats.last_push.lock().unwrap_or_else(|e| e.into_inner()) =
                            Some(Instant::now());
                        if route(&table, &buffer[..len], source) {
                            stats.delivered.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    Ok(Err(e)) => warn!("Push socket error: {e}"),
                    Err(_) => {}
                }
            }
        });

        info!("Listening for bulb pushes on {local_addr}");
        Ok(PushListener {
            running,
            local_addr,
            routes,
            counters,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn diagnostics(&self) -> PushDiagnostics {
        let last_push = *self
            .counters
            .last_push
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        PushDiagnostics {
            running: self.is_running(),
            route_count: self.routes.len(),
            received: self.counters.received.load(Ordering::SeqCst),
            delivered: self.counters.delivered.load(Ordering::SeqCst),
            time_since_last_push: last_push.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.await;
        }
    }
}

impl Drop for PushListener {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn route(routes: &PushRoutes, datagram: &[u8], source: SocketAddr) -> bool {
    let Ok(msg) = serde_json::from_slice::<Value>(datagram) else {
        debug!("Ignoring non-JSON push from {source}");
        return false;
    };
    let method = msg.get("method").and_then(Value::as_str);
    let Some(params) = msg.get("params") else {
        debug!("Push from {source} without params");
        return false;
    };
    let Some(mac) = params.get("mac").and_then(Value::as_str) else {
        debug!("Push from {source} without mac");
        return false;
    };

    match method {
        Some("syncPilot") => match DeviceState::from_result(params.clone()) {
            Ok(state) => {
                let delivered = routes.deliver(mac, state);
                if !delivered {
                    debug!("No bridge for pushed state of {mac}");
                }
                delivered
            }
            Err(e) => {
                debug!("Bad syncPilot from {source}: {e}");
                false
            }
        },
        other => {
            debug!("Unhandled push method {other:?} from {mac}");
            false
        }
    }
}

/// A random locally administered MAC to register with.
pub fn generate_phone_mac() -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    // Locally administered, unicast.
    let first = (bytes[0] | 0x02) & 0xfe;
    format!(
        "{first:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

/// The message that asks a bulb to push its state to `local_ip`.
///
/// # Examples
///
/// ```
/// use std::net::Ipv4Addr;
/// use wiz_hue_bridge::push::registration_message;
///
/// let msg = registration_message(Ipv4Addr::new(192, 168, 1, 2), "02AABBCCDDEE");
/// assert_eq!(msg["method"], "registration");
/// assert_eq!(msg["params"]["phoneIp"], "192.168.1.2");
/// assert_eq!(msg["params"]["register"], true);
/// ```
pub fn registration_message(local_ip: Ipv4Addr, phone_mac: &str) -> Value {
    json!({
        "method": "registration",
        "params": {
            "phoneIp": local_ip.to_string(),
            "register": true,
            "phoneMac": phone_mac,
        }
    })
}

/// Send a registration message to one bulb.
///
/// Bulbs forget registrations after a while, so callers repeat this.
pub async fn register_bulb(
    bulb: SocketAddr,
    message: &Value,
    pacer: &TransmitPacer,
) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| Error::socket("bind", e))?;
    let bytes = serde_json::to_vec(message).map_err(Error::JsonDump)?;
    pacer.pace().await;
    socket
        .send_to(&bytes, bulb)
        .await
        .map_err(|e| Error::socket("send_to", e))?;
    debug!("Registered for pushes from {bulb}");
    Ok(())
}
