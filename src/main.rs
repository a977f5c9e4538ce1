//! ==============================================================================
//! main.rs - garden telemetry entry point
//! ==============================================================================
//!
//! purpose:
//!     one binary, four roles. `cluster.role` in host.toml (or `--role`)
//!     decides what this process runs:
//!
//!     - gateway:    radio -> ACK burst -> duplicate filter -> HTTP collector
//!     - node:       sample, send-with-retry, sleep, forever
//!     - irrigation: the /pump HTTP API and the water-check task
//!     - simulate:   a gateway plus N nodes over an in-process lossy link
//!
//! architecture (simulate role):
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                    this process                              │
//!     │  ┌───────────┐  ┌───────────┐         ┌──────────────────┐   │
//!     │  │ node 7    │  │ node 8    │   ...   │ gateway          │   │
//!     │  │ (blocking │  │ (blocking │         │ (tokio task)     │   │
//!     │  │  thread)  │  │  thread)  │         │                  │   │
//!     │  └─────┬─────┘  └─────┬─────┘         └────────┬─────────┘   │
//!     │        └──────────────┼────────────────────────┘             │
//!     │                ┌──────┴────────┐                             │
//!     │                │ SimulatedEther│ <- radio/sim.rs             │
//!     │                └───────────────┘                             │
//!     └──────────────────────────────────────────────┬───────────────┘
//!                                                    │ HTTP POST
//!                                             ┌──────┴──────┐
//!                                             │  collector  │
//!                                             └─────────────┘
//!
//! hardware:
//!     built with `--features hardware`, the radio is an nRF24L01+ and the
//!     probes/relays are real Pi pins. without it every device is simulated.
//!
//! ==============================================================================

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use garden_telemetry::config::{HostConfig, Role};
use garden_telemetry::forward::{Forwarder, HttpForwarder, LogForwarder};
use garden_telemetry::gateway::{self, Gateway};
use garden_telemetry::hal::sim::SimulatedBoard;
use garden_telemetry::hal::{PumpDriver, SensorBoard, SystemClock, WaterSensor};
use garden_telemetry::irrigation::{web, Irrigation, IrrigationSettings};
use garden_telemetry::node::{NodeSettings, SensorNode};
use garden_telemetry::radio::sim::SimulatedEther;
use garden_telemetry::radio::Radio;

#[derive(Parser, Debug)]
#[command(name = "garden-telemetry", version, about = "Garden sensor network: nodes, gateway and pump controller")]
struct Cli {
    /// Path to host.toml (default: config/host.toml, then ../config/host.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override cluster.role from the config file
    #[arg(short, long, value_enum)]
    role: Option<Role>,
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    println!("===========================================================");
    println!("  Garden Telemetry");
    println!("  \"Lose a reading, never the battery\"");
    println!("===========================================================");

    let cli = Cli::parse();

    // step 1: load configuration
    let mut config = HostConfig::load_or_default(cli.config.as_deref());
    if let Some(role) = cli.role {
        config.cluster.role = role;
    }
    config.validate().context("invalid configuration")?;
    config.print_summary();

    // step 2: logging (RUST_LOG wins over logging.level)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // step 3: run the role
    match config.cluster.role {
        Role::Gateway => run_gateway(&config).await,
        Role::Node => run_node(&config).await,
        Role::Irrigation => run_irrigation(&config).await,
        Role::Simulate => run_simulation(&config).await,
    }
}

// ==============================================================================
// roles
// ==============================================================================

async fn run_gateway(config: &HostConfig) -> Result<()> {
    let mut gw = Gateway::new(open_radio(config)?, open_forwarder(config)?, config.gateway.ack_burst)
        .show_sensor_data(config.logging.show_sensor_data);
    gw.init_radio(&config.radio.settings);

    if !config.gateway.dry_run {
        gateway::require_uplink(
            &config.gateway.collector_url,
            Duration::from_millis(config.gateway.uplink_timeout_ms),
            Duration::from_millis(config.gateway.reboot_delay_ms),
        )
        .await?;
    }

    println!("[STARTUP] ✓ Gateway relaying to {}", config.gateway.collector_url);
    gw.run().await;
    Ok(())
}

async fn run_node(config: &HostConfig) -> Result<()> {
    let radio = open_radio(config)?;
    let board = open_board(config)?;
    let settings = NodeSettings::from_config(config.cluster.node_id, &config.node);
    let radio_settings = config.radio.settings;

    println!("[STARTUP] ✓ Node {} starting its wake cycle", config.cluster.node_id);
    // the cycle busy-waits on the radio, keep it off the async workers
    tokio::task::spawn_blocking(move || {
        SensorNode::boot(radio, SystemClock::new(), board, settings, &radio_settings).run_forever()
    })
    .await?;
    Ok(())
}

async fn run_irrigation(config: &HostConfig) -> Result<()> {
    let (pump, water) = open_irrigation_devices(config)?;
    let irrigation = Irrigation::new(pump, water, IrrigationSettings::from_config(&config.irrigation));
    irrigation.start().await?;
    let status = irrigation.status().await;
    println!("[STARTUP] ✓ Pump off, water {}", if status.water_present { "present" } else { "ABSENT" });
    let watch = irrigation.spawn_water_watch();

    let listener = tokio::net::TcpListener::bind(&config.irrigation.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.irrigation.bind))?;
    println!("[STARTUP] ✓ Irrigation API live at http://{}", config.irrigation.bind);

    axum::serve(listener, web::router(irrigation.clone())).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::warn!("shutting down, turning the pump off");
    watch.abort();
    irrigation.pump_off().await;
    Ok(())
}

async fn run_simulation(config: &HostConfig) -> Result<()> {
    let sim = &config.simulation;
    let ether = SimulatedEther::new(sim.loss_rate, sim.seed);
    let radio_settings = config.radio.settings;

    let mut node_config = config.node.clone();
    node_config.sleep_quantum_ms = sim.sleep_quantum_ms;
    node_config.sleep_quanta = sim.sleep_quanta;

    for i in 0..sim.nodes {
        let node_id = config.cluster.node_id.wrapping_add(i);
        let radio = ether.attach();
        // every other node carries a temperature probe
        let board = SimulatedBoard::new(sim.seed.wrapping_add(u64::from(node_id)), i % 2 == 0);
        let settings = NodeSettings::from_config(node_id, &node_config);
        tokio::task::spawn_blocking(move || {
            SensorNode::boot(radio, SystemClock::new(), board, settings, &radio_settings).run_forever()
        });
    }

    let mut gw = Gateway::new(ether.attach(), open_forwarder(config)?, config.gateway.ack_burst)
        .show_sensor_data(config.logging.show_sensor_data);
    gw.init_radio(&radio_settings);
    if !config.gateway.dry_run {
        gateway::require_uplink(
            &config.gateway.collector_url,
            Duration::from_millis(config.gateway.uplink_timeout_ms),
            Duration::from_millis(config.gateway.reboot_delay_ms),
        )
        .await?;
    }

    println!(
        "[STARTUP] ✓ Simulating {} node(s) at {:.0}% frame loss",
        sim.nodes,
        sim.loss_rate * 100.0
    );
    tokio::select! {
        _ = gw.run() => {}
        _ = shutdown_signal() => tracing::info!("simulation stopped"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!(signal = "SIGINT", "shutdown requested"),
        _ = terminate => tracing::warn!(signal = "SIGTERM", "shutdown requested"),
    }
}

// ==============================================================================
// device factories
// ==============================================================================

fn open_forwarder(config: &HostConfig) -> Result<Box<dyn Forwarder + Sync>> {
    if config.gateway.dry_run {
        println!("[STARTUP] ⚠ Dry run: readings are logged, not posted");
        return Ok(Box::new(LogForwarder));
    }
    let fwd = HttpForwarder::new(
        &config.gateway.collector_url,
        &config.gateway.access_token,
        Duration::from_millis(config.gateway.request_timeout_ms),
    )?;
    Ok(Box::new(fwd))
}

#[cfg(feature = "hardware")]
fn open_radio(config: &HostConfig) -> Result<impl Radio + Send + 'static> {
    use garden_telemetry::radio::nrf24::Nrf24;
    Nrf24::open(config.radio.spi_bus, config.radio.spi_slave, config.radio.ce_pin).context("failed to open nRF24L01+")
}

#[cfg(not(feature = "hardware"))]
fn open_radio(config: &HostConfig) -> Result<impl Radio + Send + 'static> {
    println!("[STARTUP] ⚠ Built without the \"hardware\" feature: radio is an unconnected simulated link");
    Ok(SimulatedEther::new(0.0, config.simulation.seed).attach())
}

#[cfg(feature = "hardware")]
fn open_board(config: &HostConfig) -> Result<impl SensorBoard + Send + 'static> {
    use garden_telemetry::hal::pi::PiBoard;
    let b = &config.board;
    PiBoard::open(b.adc_spi_slave, b.moisture_power_pin, b.moisture_channel, b.temperature_power_pin, b.entropy_channel)
}

#[cfg(not(feature = "hardware"))]
fn open_board(config: &HostConfig) -> Result<impl SensorBoard + Send + 'static> {
    Ok(SimulatedBoard::new(config.simulation.seed.wrapping_add(u64::from(config.cluster.node_id)), true))
}

#[cfg(feature = "hardware")]
fn open_irrigation_devices(config: &HostConfig) -> Result<(Box<dyn PumpDriver>, Box<dyn WaterSensor>)> {
    use garden_telemetry::hal::pi::{PiWaterSensor, RelayPump};
    let c = &config.irrigation;
    let pump = RelayPump::open(c.pump_pin, c.pump_active_low)?;
    let water = PiWaterSensor::open(c.adc_spi_slave, c.water_power_pin, c.water_channel)?;
    Ok((Box::new(pump), Box::new(water)))
}

#[cfg(not(feature = "hardware"))]
fn open_irrigation_devices(_config: &HostConfig) -> Result<(Box<dyn PumpDriver>, Box<dyn WaterSensor>)> {
    use garden_telemetry::hal::sim::{SimulatedPump, SimulatedWaterSensor};
    let (pump, _) = SimulatedPump::new();
    // a full tank, so the API can be exercised
    let (water, _) = SimulatedWaterSensor::new(1023);
    Ok((Box::new(pump), Box::new(water)))
}
