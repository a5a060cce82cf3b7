//! Command-line tool for poking at bulbs and running a bridge.
//!
//! The `run` command bridges every discovered bulb onto a mesh stack that
//! only prints what it would publish, which is handy for watching the
//! leadership rules at work.
//!
//! Run with: cargo run --example bridge_cli -- --help

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use wiz_hue_bridge::{
    BridgeOptions, BridgeService, BulbApi, BulbClient, DeviceState, EndpointSpec, Error, FileStore,
    Health, MeshAttributes, MeshEndpoint, MeshStack, RegistryCache, Timings, TransmitPacer,
    discover_bulbs,
};

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Discover Wiz bulbs and bridge them onto a mesh network", long_about = None)]
struct Cli {
    /// IP address of the bulb (for config, status and set)
    #[arg(short, long, global = true)]
    ip: Option<Ipv4Addr>,

    /// Directory holding lights.json and the per-light settings
    #[arg(short, long, global = true, default_value = ".")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Broadcast for bulbs and query each one
    Discover {
        #[arg(short, long, default_value = "255.255.255.255")]
        broadcast: Ipv4Addr,
    },

    /// Show a bulb's identity and capabilities
    Config,

    /// Read a bulb's current state
    Status,

    /// Write state to a bulb; fields it does not support are left out
    Set {
        #[arg(long)]
        on: bool,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        dimming: Option<u8>,
        /// Color as r,g,b
        #[arg(long)]
        rgb: Option<wiz_hue_bridge::Color>,
        #[arg(long)]
        temp: Option<u16>,
    },

    /// Show the cached registry
    Registry,

    /// Remove the cached registry and every saved light setting
    Clear,

    /// Bridge every bulb onto a mesh stack that prints what it receives
    Run {
        #[arg(short, long, default_value = "255.255.255.255")]
        broadcast: Ipv4Addr,

        /// Address of this machine, for push registration
        #[arg(short, long)]
        local_ip: Option<Ipv4Addr>,
    },
}

struct PrintEndpoint(u8);

impl MeshEndpoint for PrintEndpoint {
    fn endpoint(&self) -> u8 {
        self.0
    }

    fn push_attributes(&self, attrs: &MeshAttributes) {
        match attrs.xy() {
            Some(xy) => println!("[endpoint {}] {attrs:?} xy=({}, {})", self.0, xy.x(), xy.y()),
            None => println!("[endpoint {}] {attrs:?}", self.0),
        }
    }
}

struct PrintMesh;

impl MeshStack for PrintMesh {
    fn register_light(&self, spec: &EndpointSpec) -> Result<Arc<dyn MeshEndpoint>, Error> {
        println!(
            "Registered endpoint {} as {:?} ({})",
            spec.endpoint, spec.device_type, spec.model
        );
        Ok(Arc::new(PrintEndpoint(spec.endpoint)))
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn client() -> BulbClient {
    let timings = Timings::default();
    let pacer = Arc::new(TransmitPacer::new(timings.send_spacing));
    BulbClient::new(timings, pacer, Arc::new(Health::new(10)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Discover { broadcast } => {
            println!("Discovering Wiz lights via {broadcast}...");
            let records = discover_bulbs(&client(), broadcast).await?;
            if records.is_empty() {
                println!("No lights found on the network.");
            }
            for r in records {
                if r.is_valid {
                    println!(
                        "  IP: {:15}  MAC: {}  {} ({})",
                        r.ip, r.mac, r.module_name, r.bulb_class
                    );
                } else {
                    println!(
                        "  IP: {:15}  unavailable: {}",
                        r.ip,
                        r.error_message.unwrap_or_default()
                    );
                }
            }
        }

        Commands::Config => {
            let ip = cli.ip.ok_or("IP address is required for this command. Use --ip <IP>")?;
            let record = client().get_system_config(ip).await;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Status => {
            let ip = cli.ip.ok_or("IP address is required for this command. Use --ip <IP>")?;
            let state = client().get_state(ip).await;
            if state.is_valid {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                eprintln!("Error: {}", state.error_message.unwrap_or_default());
            }
        }

        Commands::Set {
            on,
            dimming,
            rgb,
            temp,
        } => {
            let ip = cli.ip.ok_or("IP address is required for this command. Use --ip <IP>")?;
            let client = client();
            let record = client.get_system_config(ip).await;
            if !record.is_valid {
                return Err(record.error_message.unwrap_or_default().into());
            }
            let mut desired = DeviceState {
                state: on,
                dimming,
                temp,
                ..DeviceState::default()
            };
            desired.set_color(rgb);
            if client.set_state(&record, &desired).await {
                println!("State set on {ip}");
            } else {
                eprintln!("{ip} did not confirm the new state");
            }
        }

        Commands::Registry => {
            let cache = RegistryCache::new(
                Arc::new(FileStore::new(&cli.store)),
                Duration::from_millis(50),
            );
            let lights = cache.load().await?;
            println!("{} cached light(s)", lights.len());
            for r in lights {
                println!(
                    "  {:15}  {}  {:7}  valid: {}",
                    r.ip,
                    r.mac,
                    r.bulb_class.to_string(),
                    r.is_valid
                );
            }
        }

        Commands::Clear => {
            let cache = RegistryCache::new(
                Arc::new(FileStore::new(&cli.store)),
                Duration::from_millis(50),
            );
            println!("Removed {} file(s)", cache.clear().await?);
        }

        Commands::Run {
            broadcast,
            local_ip,
        } => {
            let options = BridgeOptions {
                store_dir: cli.store,
                broadcast,
                ..BridgeOptions::default()
            };
            let service = BridgeService::start(&options, Arc::new(PrintMesh)).await?;
            println!("Bridging {} light(s)", service.registry().len());

            loop {
                if let Some(local_ip) = local_ip {
                    service.register_pushes(local_ip).await;
                }
                println!("{}", serde_json::to_string(&service.health())?);
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        }
    }

    Ok(())
}
