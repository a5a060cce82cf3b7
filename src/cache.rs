//! Persisted registry of known bulbs and per-light settings.
//!
//! The registry lives in `lights.json` as `{"lights": [...]}`. Each light
//! bridge keeps its last mirrored state in `light_<mac>.json`. Both go
//! through one [`Store`] and one lock, so they are never written at the
//! same time.

use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::device::DeviceRecord;
use crate::errors::Error;
use crate::runtime::{self, Mutex};

type Result<T> = std::result::Result<T, Error>;

pub const REGISTRY_FILE: &str = "lights.json";

/// Name of the settings file for the bulb with this MAC.
///
/// # Examples
///
/// ```
/// use wiz_hue_bridge::settings_file_name;
///
/// assert_eq!(settings_file_name("a8:bb:50:06:ab:cd"), "light_a8_bb_50_06_ab_cd.json");
/// assert_eq!(settings_file_name("a8bb5006abcd"), "light_a8bb5006abcd.json");
/// ```
pub fn settings_file_name(mac: &str) -> String {
    format!("light_{}.json", mac.replace(':', "_"))
}

fn is_settings_file(name: &str) -> bool {
    name.starts_with("light_") && name.ends_with(".json")
}

/// A flat namespace of small text files.
pub trait Store: Send + Sync {
    /// Contents of `name`, or `None` if it does not exist.
    fn read(&self, name: &str) -> Result<Option<String>>;

    /// Replace `name` with `contents`.
    fn write(&self, name: &str, contents: &str) -> Result<()>;

    /// Delete `name`, returning whether it existed.
    fn remove(&self, name: &str) -> Result<bool>;

    fn list(&self) -> Result<Vec<String>>;
}

/// A [`Store`] backed by one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Store for FileStore {
    fn read(&self, name: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.dir.join(name)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::store("read", name, e)),
        }
    }

    fn write(&self, name: &str, contents: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::store("create", name, e))?;
        // Write then rename, so a crash never leaves half a file behind.
        let partial = self.dir.join(format!("{name}.partial"));
        fs::write(&partial, contents).map_err(|e| Error::store("write", name, e))?;
        fs::rename(&partial, self.dir.join(name)).map_err(|e| Error::store("rename", name, e))
    }

    fn remove(&self, name: &str) -> Result<bool> {
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::store("remove", name, e)),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::store("list", &self.dir.to_string_lossy(), e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::store("list", &self.dir.to_string_lossy(), e))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    lights: Vec<DeviceRecord>,
}

/// The last mirrored state of one light bridge.
///
/// Unknown color and temperature are stored as `-1`.
///
/// # Examples
///
/// ```
/// use wiz_hue_bridge::LightSettings;
///
/// let settings = LightSettings { state: true, level: 200, temperature: Some(370), ..Default::default() };
/// let json = serde_json::to_value(settings).unwrap();
/// assert_eq!(json["r"], -1);
/// assert_eq!(json["temperature"], 370);
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightSettings {
    #[serde(default)]
    pub state: bool,
    #[serde(default, with = "sentinel")]
    pub r: Option<u8>,
    #[serde(default, with = "sentinel")]
    pub g: Option<u8>,
    #[serde(default, with = "sentinel")]
    pub b: Option<u8>,
    #[serde(default)]
    pub level: u8,
    /// Color temperature in mireds.
    #[serde(default, with = "sentinel")]
    pub temperature: Option<u16>,
}

mod sentinel {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Into<i64> + Copy,
    {
        serializer.serialize_i64(value.map_or(-1, Into::into))
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<i64>,
    {
        let raw = i64::deserialize(deserializer)?;
        Ok(T::try_from(raw).ok())
    }
}

/// Registry and settings persistence shared by every bridge.
pub struct RegistryCache {
    store: Arc<dyn Store>,
    lock: Mutex<()>,
    lock_budget: Duration,
}

impl RegistryCache {
    /// `lock_budget` bounds how long a settings save waits for the store.
    pub fn new(store: Arc<dyn Store>, lock_budget: Duration) -> Self {
        RegistryCache {
            store,
            lock: Mutex::new(()),
            lock_budget,
        }
    }

    /// Run a store operation off the async executor.
    async fn with_store<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        runtime::spawn_blocking(move || op(store.as_ref())).await
    }

    /// The persisted registry, empty if there is none yet.
    pub async fn load(&self) -> Result<Vec<DeviceRecord>> {
        let _guard = self.lock.lock().await;
        let Some(contents) = self.with_store(|store| store.read(REGISTRY_FILE)).await? else {
            return Ok(Vec::new());
        };
        let file: RegistryFile = serde_json::from_str(&contents).map_err(Error::JsonLoad)?;
        debug!("Loaded {} cached light(s)", file.lights.len());
        Ok(file.lights)
    }

    pub async fn save(&self, records: &[DeviceRecord]) -> Result<()> {
        let file = RegistryFile {
            lights: records.to_vec(),
        };
        let contents = serde_json::to_string(&file).map_err(Error::JsonDump)?;
        let _guard = self.lock.lock().await;
        self.with_store(move |store| store.write(REGISTRY_FILE, &contents))
            .await?;
        info!("Saved {} light(s) to {REGISTRY_FILE}", records.len());
        Ok(())
    }

    /// Move cached records to the addresses they were just discovered at.
    ///
    /// Records are matched by MAC; nothing but the address is touched.
    /// Returns whether any record changed.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::{DeviceRecord, RegistryCache, SystemConfig};
    ///
    /// let config: SystemConfig = serde_json::from_str(r#"{"mac":"aa","moduleName":"ESP01_SHRGB1C_31"}"#).unwrap();
    /// let mut cached = vec![DeviceRecord::from_config("10.0.0.2".parse().unwrap(), &config)];
    /// let found = vec![DeviceRecord::from_config("10.0.0.7".parse().unwrap(), &config)];
    /// assert!(RegistryCache::reconcile(&mut cached, &found));
    /// assert_eq!(cached[0].ip, "10.0.0.7");
    /// assert!(!RegistryCache::reconcile(&mut cached, &found));
    /// ```
    pub fn reconcile(cached: &mut [DeviceRecord], discovered: &[DeviceRecord]) -> bool {
        let mut changed = false;
        for found in discovered.iter().filter(|d| !d.mac.is_empty()) {
            let Some(record) = cached.iter_mut().find(|c| c.mac == found.mac) else {
                continue;
            };
            if record.ip != found.ip {
                info!("Light {} moved from {} to {}", record.mac, record.ip, found.ip);
                record.ip = found.ip.clone();
                changed = true;
            }
        }
        changed
    }

    /// Produce the device list to bridge.
    ///
    /// Discovery always runs. With a cached registry, discovery only
    /// corrects addresses and the registry is written once if any moved.
    /// Without one, the discovery result is persisted as the new registry.
    pub async fn discover_or_load<F, Fut>(&self, discover: F) -> Result<Vec<DeviceRecord>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<DeviceRecord>>>,
    {
        let mut cached = self.load().await.unwrap_or_else(|e| {
            warn!("Ignoring unreadable {REGISTRY_FILE}: {e}");
            Vec::new()
        });

        let discovered = match discover().await {
            Ok(discovered) => discovered,
            Err(e) if !cached.is_empty() => {
                warn!("Discovery failed, using cached lights: {e}");
                return Ok(cached);
            }
            Err(e) => return Err(e),
        };

        if cached.is_empty() {
            if discovered.is_empty() {
                warn!("No lights discovered and none cached");
            } else {
                self.save(&discovered).await?;
            }
            return Ok(discovered);
        }

        if discovered.is_empty() {
            info!("Discovery found nothing, using {} cached light(s)", cached.len());
            return Ok(cached);
        }

        if Self::reconcile(&mut cached, &discovered) {
            self.save(&cached).await?;
        }
        Ok(cached)
    }

    pub async fn load_settings(&self, mac: &str) -> Result<Option<LightSettings>> {
        let name = settings_file_name(mac);
        let _guard = self.lock.lock().await;
        match self.with_store(move |store| store.read(&name)).await? {
            Some(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(Error::JsonLoad),
            None => Ok(None),
        }
    }

    /// Persist a bridge's settings if the store is free.
    ///
    /// Returns `Ok(false)` when the store stayed busy for the whole lock
    /// budget; the caller keeps its pending flag and tries again later.
    pub async fn save_settings(&self, mac: &str, settings: &LightSettings) -> Result<bool> {
        let contents = serde_json::to_string(settings).map_err(Error::JsonDump)?;
        let Ok(_guard) = runtime::timeout(self.lock_budget, self.lock.lock()).await else {
            debug!("Store busy, deferring settings for {mac}");
            return Ok(false);
        };
        let name = settings_file_name(mac);
        self.with_store(move |store| store.write(&name, &contents))
            .await?;
        Ok(true)
    }

    /// Remove the registry and every settings file.
    ///
    /// Returns the number of files removed.
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let removed = self
            .with_store(|store| {
                let mut removed = usize::from(store.remove(REGISTRY_FILE)?);
                for name in store.list()?.iter().filter(|n| is_settings_file(n)) {
                    if store.remove(name)? {
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await?;
        info!("Cleared {removed} cached file(s)");
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// In-memory store that counts writes.
    ///
    /// With `failing` set every write is counted and then rejected.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        pub files: Mutex<BTreeMap<String, String>>,
        pub writes: AtomicUsize,
        pub failing: AtomicBool,
    }

    impl MemoryStore {
        pub fn write_count(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        pub fn get(&self, name: &str) -> Option<String> {
            self.files.lock().unwrap().get(name).cloned()
        }
    }

    impl Store for MemoryStore {
        fn read(&self, name: &str) -> Result<Option<String>> {
            Ok(self.get(name))
        }

        fn write(&self, name: &str, contents: &str) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::store(
                    "write",
                    name,
                    std::io::Error::other("store offline"),
                ));
            }
            self.files
                .lock()
                .unwrap()
                .insert(name.to_string(), contents.to_string());
            Ok(())
        }

        fn remove(&self, name: &str) -> Result<bool> {
            Ok(self.files.lock().unwrap().remove(name).is_some())
        }

        fn list(&self) -> Result<Vec<String>> {
            Ok(self.files.lock().unwrap().keys().cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::testing::MemoryStore;
    use super::*;
    use crate::config::SystemConfig;

    fn record(mac: &str, ip: &str, module: &str) -> DeviceRecord {
        let config: SystemConfig =
            serde_json::from_value(serde_json::json!({"mac": mac, "moduleName": module})).unwrap();
        DeviceRecord::from_config(ip.parse().unwrap(), &config)
    }

    fn cache_with(store: &Arc<MemoryStore>) -> RegistryCache {
        RegistryCache::new(store.clone(), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_address_change_is_persisted_once() {
        let store = Arc::new(MemoryStore::default());
        let cache = cache_with(&store);
        cache
            .save(&[
                record("a8bb5006aaaa", "192.168.1.20", "ESP01_SHRGB1C_31"),
                record("a8bb5006bbbb", "192.168.1.21", "ESP01_SHTW1C_31"),
            ])
            .await
            .unwrap();
        assert_eq!(store.write_count(), 1);

        let moved = || async {
            Ok(vec![record("a8bb5006aaaa", "192.168.1.35", "ESP01_SHRGB1C_31")])
        };

        let lights = cache.discover_or_load(moved).await.unwrap();
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[0].ip, "192.168.1.35");
        assert_eq!(lights[1].ip, "192.168.1.21");
        assert_eq!(store.write_count(), 2);
        assert_eq!(cache.load().await.unwrap(), lights);

        let again = cache.discover_or_load(moved).await.unwrap();
        assert_eq!(again, lights);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_first_run_persists_discovery_verbatim() {
        let store = Arc::new(MemoryStore::default());
        let cache = cache_with(&store);
        let ip = Ipv4Addr::new(192, 168, 1, 40);
        let found = vec![
            record("a8bb5006aaaa", "192.168.1.20", "ESP01_SHRGB1C_31"),
            DeviceRecord::invalid(ip, &Error::timeout(&ip, "getSystemConfig")),
        ];

        let lights = cache
            .discover_or_load(|| async { Ok(found.clone()) })
            .await
            .unwrap();
        assert_eq!(lights, found);
        assert_eq!(store.write_count(), 1);

        let persisted: serde_json::Value =
            serde_json::from_str(&store.get(REGISTRY_FILE).unwrap()).unwrap();
        assert_eq!(persisted["lights"].as_array().unwrap().len(), 2);
        assert_eq!(persisted["lights"][1]["isValid"], false);
    }

    #[tokio::test]
    async fn test_empty_discovery_keeps_cache() {
        let store = Arc::new(MemoryStore::default());
        let cache = cache_with(&store);
        let cached = vec![record("a8bb5006aaaa", "192.168.1.20", "ESP01_SHRGB1C_31")];
        cache.save(&cached).await.unwrap();

        let lights = cache
            .discover_or_load(|| async { Ok(Vec::new()) })
            .await
            .unwrap();
        assert_eq!(lights, cached);

        let failed = cache
            .discover_or_load(|| async {
                Err(Error::socket("bind", std::io::Error::other("no network")))
            })
            .await
            .unwrap();
        assert_eq!(failed, cached);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_reconcile_ignores_unknown_and_macless_records() {
        let mut cached = vec![record("a8bb5006aaaa", "192.168.1.20", "ESP01_SHRGB1C_31")];
        let ip = Ipv4Addr::new(192, 168, 1, 99);
        let discovered = vec![
            record("a8bb5006cccc", "192.168.1.50", "ESP01_SHRGB1C_31"),
            DeviceRecord::invalid(ip, &Error::timeout(&ip, "getSystemConfig")),
        ];
        assert!(!RegistryCache::reconcile(&mut cached, &discovered));
        assert_eq!(cached[0].ip, "192.168.1.20");
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let store = Arc::new(MemoryStore::default());
        let cache = cache_with(&store);
        let settings = LightSettings {
            state: true,
            r: Some(255),
            g: Some(0),
            b: Some(0),
            level: 128,
            temperature: None,
        };

        assert_eq!(cache.load_settings("a8:bb:50").await.unwrap(), None);
        assert!(cache.save_settings("a8:bb:50", &settings).await.unwrap());
        assert_eq!(cache.load_settings("a8:bb:50").await.unwrap(), Some(settings));

        let raw: serde_json::Value =
            serde_json::from_str(&store.get("light_a8_bb_50.json").unwrap()).unwrap();
        assert_eq!(raw["temperature"], -1);
        assert_eq!(raw["level"], 128);
    }

    #[tokio::test]
    async fn test_busy_store_defers_settings() {
        let store = Arc::new(MemoryStore::default());
        let cache = cache_with(&store);

        let guard = cache.lock.lock().await;
        let saved = cache
            .save_settings("aa", &LightSettings::default())
            .await
            .unwrap();
        assert!(!saved);
        drop(guard);

        assert_eq!(store.write_count(), 0);
        assert!(cache.save_settings("aa", &LightSettings::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_removes_registry_and_settings() {
        let store = Arc::new(MemoryStore::default());
        let cache = cache_with(&store);
        cache.save(&[]).await.unwrap();
        cache.save_settings("aa", &LightSettings::default()).await.unwrap();
        cache.save_settings("bb", &LightSettings::default()).await.unwrap();
        store.write("options.json", "{}").unwrap();

        assert_eq!(cache.clear().await.unwrap(), 3);
        assert_eq!(store.list().unwrap(), vec!["options.json".to_string()]);
        assert!(cache.load().await.unwrap().is_empty());
    }

    #[test]
    fn test_file_store() {
        let dir = std::env::temp_dir().join(format!("wiz-hue-bridge-{}", uuid::Uuid::new_v4()));
        let store = FileStore::new(&dir);

        assert_eq!(store.read("lights.json").unwrap(), None);
        assert!(store.list().unwrap().is_empty());
        store.write("lights.json", r#"{"lights":[]}"#).unwrap();
        store.write("light_aa.json", "{}").unwrap();
        assert_eq!(
            store.read("lights.json").unwrap().as_deref(),
            Some(r#"{"lights":[]}"#)
        );
        assert_eq!(store.list().unwrap(), vec!["light_aa.json", "lights.json"]);
        assert!(store.remove("light_aa.json").unwrap());
        assert!(!store.remove("light_aa.json").unwrap());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_cache_on_disk() {
        let dir = std::env::temp_dir().join(format!("wiz-hue-bridge-{}", uuid::Uuid::new_v4()));
        let cache = RegistryCache::new(Arc::new(FileStore::new(&dir)), Duration::from_millis(50));
        let records = vec![record("a8bb5006abcd", "10.0.0.2", "ESP01_SHRGB1C_31")];

        cache.save(&records).await.unwrap();
        assert_eq!(cache.load().await.unwrap(), records);

        let settings = LightSettings {
            state: true,
            level: 10,
            temperature: Some(250),
            ..Default::default()
        };
        assert!(cache.save_settings("a8:bb:50:06:ab:cd", &settings).await.unwrap());
        assert_eq!(
            cache.load_settings("a8:bb:50:06:ab:cd").await.unwrap(),
            Some(settings)
        );
        assert!(dir.join("light_a8_bb_50_06_ab_cd.json").exists());

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.load().await.unwrap().is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }
}
