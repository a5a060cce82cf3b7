//! Device discovery via UDP broadcast.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use log::{debug, info, warn};
use serde_json::{Value, json};

use crate::client::{BulbApi, BulbClient};
use crate::device::DeviceRecord;
use crate::errors::Error;
use crate::options::Timings;
use crate::pacer::TransmitPacer;
use crate::runtime::{self, AsyncUdpSocket, Instant, UdpSocket};

type Result<T> = std::result::Result<T, Error>;

/// Find the addresses of bulbs answering a broadcast `getPilot`.
///
/// The probe is broadcast `discovery_broadcasts` times, then replies are
/// collected for `discovery_window`. Whenever a receive times out and no
/// probe went out for `discovery_rebroadcast_after`, one more probe is
/// sent. Each address is reported once, in the order it first answered.
pub async fn discover_addresses(
    broadcast: Ipv4Addr,
    port: u16,
    timings: &Timings,
    pacer: &TransmitPacer,
) -> Result<Vec<Ipv4Addr>> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| Error::socket("bind", e))?;
    socket
        .set_broadcast(true)
        .map_err(|e| Error::socket("set_broadcast", e))?;

    let probe = serde_json::to_vec(&json!({"method": "getPilot", "params": {}}))
        .map_err(Error::JsonDump)?;
    let target = SocketAddr::from((broadcast, port));

    info!("Broadcasting discovery to {target}");
    for attempt in 1..=timings.discovery_broadcasts {
        send_probe(&socket, &probe, target, pacer).await;
        if attempt < timings.discovery_broadcasts {
            runtime::sleep(timings.discovery_broadcast_spacing).await;
        }
    }

    let start = Instant::now();
    let mut last_probe = Instant::now();
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut buffer = [0u8; 4096];

    while start.elapsed() < timings.discovery_window {
        match runtime::timeout(
            timings.discovery_receive_timeout,
            socket.recv_from(&mut buffer),
        )
        .await
        {
            Ok(Ok((len, source))) => {
                let IpAddr::V4(ip) = source.ip() else {
                    continue;
                };
                if !is_pilot_reply(&buffer[..len]) {
                    debug!("Ignoring non-pilot reply from {ip}");
                    continue;
                }
                if seen.insert(ip) {
                    debug!("Discovery reply from {ip} ({len} bytes)");
                    found.push(ip);
                } else {
                    debug!("Duplicate discovery reply from {ip}, skipping");
                }
            }
            Ok(Err(e)) => debug!("Discovery receive failed: {e}"),
            Err(_) => {
                if last_probe.elapsed() >= timings.discovery_rebroadcast_after {
                    debug!("No replies for a while, probing again");
                    send_probe(&socket, &probe, target, pacer).await;
                    last_probe = Instant::now();
                }
            }
        }
    }

    info!("Discovery found {} address(es)", found.len());
    Ok(found)
}

/// Only a decodable reply carrying a `result` object comes from a bulb.
fn is_pilot_reply(datagram: &[u8]) -> bool {
    serde_json::from_slice::<Value>(datagram)
        .is_ok_and(|reply| reply.get("result").is_some_and(Value::is_object))
}

async fn send_probe(socket: &UdpSocket, probe: &[u8], target: SocketAddr, pacer: &TransmitPacer) {
    pacer.pace().await;
    if let Err(e) = socket.send_to(probe, target).await {
        warn!("Discovery probe to {target} failed: {e}");
    }
}

/// Query every address for its capabilities.
///
/// Addresses that do not answer still produce a record, marked invalid and
/// carrying the error, so nothing silently disappears from the result.
pub async fn scan<B: BulbApi>(
    api: &B,
    addresses: &[Ipv4Addr],
    timings: &Timings,
) -> Vec<DeviceRecord> {
    let mut records = Vec::with_capacity(addresses.len());
    for (i, ip) in addresses.iter().enumerate() {
        let record = api.get_system_config(*ip).await;
        if !record.is_valid {
            warn!(
                "Keeping {ip} without capabilities: {}",
                record.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        records.push(record);
        if i + 1 < addresses.len() {
            runtime::sleep(timings.config_retry_delay).await;
        }
    }
    records
}

/// Broadcast discovery followed by a capability query of every responder.
///
/// # Examples
///
/// ```ignore
/// let records = discover_bulbs(&client, Ipv4Addr::new(192, 168, 1, 255)).await?;
/// for r in records.iter().filter(|r| r.is_valid) {
///     println!("{} {} {}", r.ip, r.mac, r.bulb_class);
/// }
/// ```
pub async fn discover_bulbs(client: &BulbClient, broadcast: Ipv4Addr) -> Result<Vec<DeviceRecord>> {
    let addresses =
        discover_addresses(broadcast, client.port(), client.timings(), client.pacer()).await?;
    Ok(scan(client, &addresses, client.timings()).await)
}
