//! Request/response operations against a single bulb.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{Value, json};

use crate::config::SystemConfig;
use crate::device::DeviceRecord;
use crate::errors::Error;
use crate::health::Health;
use crate::options::Timings;
use crate::pacer::TransmitPacer;
use crate::payload::Payload;
use crate::runtime::{self, AsyncUdpSocket, Instant, UdpSocket};
use crate::status::DeviceState;

type Result<T> = std::result::Result<T, Error>;

/// The bulb operations a light bridge depends on.
///
/// None of these fail with an error. A query that cannot be answered comes
/// back as an invalid record or state, and a write reports whether the bulb
/// confirmed it.
pub trait BulbApi: Send + Sync + 'static {
    /// Query a bulb's identity and capabilities (`getSystemConfig`).
    fn get_system_config(&self, ip: Ipv4Addr) -> impl Future<Output = DeviceRecord> + Send;

    /// Read a bulb's live state (`getPilot`).
    fn get_state(&self, ip: Ipv4Addr) -> impl Future<Output = DeviceState> + Send;

    /// Write the fields of `desired` the bulb supports (`setPilot`).
    fn set_state(
        &self,
        record: &DeviceRecord,
        desired: &DeviceState,
    ) -> impl Future<Output = bool> + Send;
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    timeout: Duration,
    delay: Duration,
}

/// UDP client for the bulb protocol.
///
/// Every request goes out from a fresh ephemeral socket, so concurrent
/// requests to different bulbs never read each other's replies. All sends
/// share the same [`TransmitPacer`].
#[derive(Debug, Clone)]
pub struct BulbClient {
    port: u16,
    timings: Timings,
    pacer: Arc<TransmitPacer>,
    health: Arc<Health>,
}

impl BulbClient {
    pub const PORT: u16 = 38899;

    pub fn new(timings: Timings, pacer: Arc<TransmitPacer>, health: Arc<Health>) -> Self {
        BulbClient {
            port: Self::PORT,
            timings,
            pacer,
            health,
        }
    }

    /// Talk to bulbs on a port other than the standard one.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn pacer(&self) -> &Arc<TransmitPacer> {
        &self.pacer
    }

    pub fn health(&self) -> &Arc<Health> {
        &self.health
    }

    fn config_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.timings.config_attempts,
            timeout: self.timings.config_timeout,
            delay: self.timings.config_retry_delay,
        }
    }

    fn read_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.timings.read_attempts,
            timeout: self.timings.read_timeout,
            delay: self.timings.read_retry_delay,
        }
    }

    fn write_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.timings.write_attempts,
            timeout: self.timings.write_timeout,
            delay: self.timings.write_retry_delay,
        }
    }

    /// Send `method` until a reply's `result` parses, the bulb answers with
    /// an explicit error, or the attempts run out.
    async fn call<T>(
        &self,
        ip: Ipv4Addr,
        method: &str,
        params: Value,
        policy: RetryPolicy,
        parse: impl Fn(Value) -> Result<T>,
    ) -> Result<T> {
        let msg = serde_json::to_string(&json!({"method": method, "params": params}))
            .map_err(Error::JsonDump)?;
        let mut last_error = Error::timeout(&ip, method);

        for attempt in 1..=policy.attempts {
            match self.exchange(ip, method, &msg, policy.timeout).await {
                Ok(mut response) => {
                    if let Some(err) = response.get("error") {
                        let message = err
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error");
                        return Err(Error::rejected(&ip, method, message));
                    }
                    match response.get_mut("result").map(Value::take) {
                        Some(result) => match parse(result) {
                            Ok(value) => return Ok(value),
                            Err(e) => last_error = e,
                        },
                        None => last_error = Error::missing_result(method),
                    }
                }
                Err(e) => last_error = e,
            }

            debug!(
                "{method} to {ip} failed (attempt {attempt}/{}): {last_error}",
                policy.attempts
            );
            if attempt < policy.attempts {
                runtime::sleep(policy.delay).await;
            }
        }

        Err(last_error)
    }

    /// One datagram out, one reply back from the same bulb.
    async fn exchange(
        &self,
        ip: Ipv4Addr,
        method: &str,
        msg: &str,
        timeout: Duration,
    ) -> Result<Value> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::socket("bind", e))?;

        self.pacer.pace().await;
        socket
            .send_to(msg.as_bytes(), SocketAddr::from((ip, self.port)))
            .await
            .map_err(|e| Error::socket("send", e))?;

        let deadline = Instant::now() + timeout;
        let mut buffer = [0u8; 4096];

        loop {
            let remaining = deadline.duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(&ip, method));
            }

            let (len, source) = runtime::timeout(remaining, socket.recv_from(&mut buffer))
                .await
                .map_err(|_| Error::timeout(&ip, method))?
                .map_err(|e| Error::socket("receive", e))?;

            if source.ip() != IpAddr::V4(ip) {
                debug!("Ignoring reply from {source} while waiting for {ip}");
                continue;
            }

            let response = String::from_utf8(buffer[..len].to_vec()).map_err(Error::Utf8Decode)?;
            return serde_json::from_str(&response).map_err(Error::JsonLoad);
        }
    }

    async fn write_pilot(&self, record: &DeviceRecord, desired: &DeviceState) -> Result<()> {
        let ip = record.ipv4()?;
        let payload = Payload::for_device(&record.features, desired);
        let params = serde_json::to_value(&payload).map_err(Error::JsonDump)?;
        debug!("setPilot {ip}: {params}");

        self.call(ip, "setPilot", params, self.write_policy(), |r| {
            if r.get("success").and_then(Value::as_bool) == Some(true) {
                Ok(())
            } else {
                Err(Error::unconfirmed(&ip, "setPilot"))
            }
        })
        .await
    }
}

impl BulbApi for BulbClient {
    async fn get_system_config(&self, ip: Ipv4Addr) -> DeviceRecord {
        let parsed = self
            .call(ip, "getSystemConfig", json!({}), self.config_policy(), |r| {
                serde_json::from_value::<SystemConfig>(r).map_err(Error::JsonLoad)
            })
            .await;

        match parsed {
            Ok(config) => {
                let record = DeviceRecord::from_config(ip, &config);
                info!(
                    "Bulb {ip}: {} ({}), mac {}",
                    record.module_name, record.bulb_class, record.mac
                );
                record
            }
            Err(e) => {
                warn!("Capability query to {ip} failed: {e}");
                DeviceRecord::invalid(ip, &e)
            }
        }
    }

    async fn get_state(&self, ip: Ipv4Addr) -> DeviceState {
        let state = self
            .call(
                ip,
                "getPilot",
                json!({}),
                self.read_policy(),
                DeviceState::from_result,
            )
            .await;

        state.unwrap_or_else(|e| {
            warn!("State read from {ip} failed: {e}");
            DeviceState::invalid(&e)
        })
    }

    async fn set_state(&self, record: &DeviceRecord, desired: &DeviceState) -> bool {
        match self.write_pilot(record, desired).await {
            Ok(()) => {
                self.health.record_write_success();
                true
            }
            Err(e) => {
                let failures = self.health.record_write_failure();
                warn!("setPilot to {} failed ({failures} in a row): {e}", record.ip);
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::{DeviceClass, classify};

    fn silent() -> Reply {
        Box::new(|_, _| None)
    }

    fn record_for(bulb: &FakeBulb, module: &str) -> DeviceRecord {
        let (bulb_class, features) = classify(module);
        DeviceRecord {
            ip: bulb.ip().to_string(),
            mac: "a8bb5006abcd".into(),
            module_name: module.into(),
            fw_version: String::new(),
            rssi: 0,
            home_id: None,
            room_id: None,
            src: String::new(),
            bulb_class,
            features,
            is_valid: true,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_capability_query_builds_record() {
        let bulb = FakeBulb::start(Box::new(|_, _| Some(SHRGB_CONFIG.into()))).await;
        let client = client_for(&bulb, Arc::new(Health::new(10)));

        let record = client.get_system_config(bulb.ip()).await;
        assert!(record.is_valid);
        assert_eq!(record.bulb_class, DeviceClass::Rgb);
        assert_eq!(record.mac, "a8bb5006abcd");
        assert_eq!(record.home_id, Some(1234));
        assert_eq!(bulb.requests()[0]["method"], "getSystemConfig");
    }

    #[tokio::test]
    async fn test_capability_query_exhaustion_is_an_invalid_record() {
        let bulb = FakeBulb::start(silent()).await;
        let client = client_for(&bulb, Arc::new(Health::new(10)));

        let record = client.get_system_config(bulb.ip()).await;
        assert!(!record.is_valid);
        assert!(record.error_message.unwrap().contains("timeout"));
        assert_eq!(bulb.request_count(), 3);
    }

    #[tokio::test]
    async fn test_malformed_reply_consumes_an_attempt() {
        let bulb = FakeBulb::start(Box::new(|_, i| {
            Some(if i == 0 {
                "{not json".into()
            } else {
                r#"{"method":"getPilot","result":{"mac":"a8bb5006abcd","state":true,"temp":2700,"dimming":35}}"#.into()
            })
        }))
        .await;
        let client = client_for(&bulb, Arc::new(Health::new(10)));

        let state = client.get_state(bulb.ip()).await;
        assert!(state.is_valid);
        assert_eq!(state.temp, Some(2700));
        assert_eq!(bulb.request_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_result_is_an_invalid_state() {
        let bulb = FakeBulb::start(Box::new(|_, _| Some(r#"{"method":"getPilot"}"#.into()))).await;
        let client = client_for(&bulb, Arc::new(Health::new(10)));

        let state = client.get_state(bulb.ip()).await;
        assert!(!state.is_valid);
        assert!(state.error_message.unwrap().contains("no result"));
    }

    #[tokio::test]
    async fn test_write_is_filtered_and_confirmed() {
        let bulb = FakeBulb::start(Box::new(|_, _| {
            Some(r#"{"method":"setPilot","result":{"success":true}}"#.into())
        }))
        .await;
        let health = Arc::new(Health::new(10));
        health.record_write_failure();
        let client = client_for(&bulb, Arc::clone(&health));

        let mut desired = DeviceState {
            state: true,
            temp: Some(3000),
            ..DeviceState::default()
        };
        desired.set_color(Some(crate::Color::rgb(255, 0, 0)));

        let ok = client
            .set_state(&record_for(&bulb, "ESP01_SHTW1C_31"), &desired)
            .await;
        assert!(ok);
        assert_eq!(health.write_failures(), 0);

        let params = &bulb.requests()[0]["params"];
        assert_eq!(params, &json!({"state": true, "temp": 3000}));
    }

    #[tokio::test]
    async fn test_explicit_error_stops_retrying() {
        let bulb = FakeBulb::start(Box::new(|_, _| {
            Some(r#"{"method":"setPilot","error":{"code":-32600,"message":"Invalid Request"}}"#.into())
        }))
        .await;
        let health = Arc::new(Health::new(10));
        let client = client_for(&bulb, Arc::clone(&health));

        let desired = DeviceState {
            state: false,
            ..DeviceState::default()
        };
        let ok = client
            .set_state(&record_for(&bulb, "ESP01_SHRGB1C_31"), &desired)
            .await;
        assert!(!ok);
        assert_eq!(bulb.request_count(), 1);
        assert_eq!(health.write_failures(), 1);
    }

    #[tokio::test]
    async fn test_unsendable_write_counts_as_failure() {
        let bulb = FakeBulb::start(Box::new(|_, _| None)).await;
        let health = Arc::new(Health::new(10));
        let client = client_for(&bulb, Arc::clone(&health));

        let mut record = record_for(&bulb, "ESP01_SHRGB1C_31");
        record.ip = "not-an-address".into();
        assert!(!client.set_state(&record, &DeviceState::default()).await);
        assert!(!client.set_state(&record, &DeviceState::default()).await);
        assert_eq!(health.write_failures(), 2);
        assert_eq!(bulb.request_count(), 0);
    }

    #[tokio::test]
    async fn test_unconfirmed_write_retries_then_fails() {
        let bulb = FakeBulb::start(Box::new(|_, _| {
            Some(r#"{"method":"setPilot","result":{"success":false}}"#.into())
        }))
        .await;
        let health = Arc::new(Health::new(10));
        let client = client_for(&bulb, Arc::clone(&health));

        let desired = DeviceState::default();
        let ok = client
            .set_state(&record_for(&bulb, "ESP01_SHRGB1C_31"), &desired)
            .await;
        assert!(!ok);
        assert_eq!(bulb.request_count(), 3);
        assert_eq!(health.write_failures(), 1);
    }
}
