//! Modbus master demo
//!
//! Reads and writes the demo register map of a slave over Modbus TCP.
//!
//! Environment:
//! - `SLAVE_IP`: slave address, default `127.0.0.1`
//! - `SLAVE_TCP_PORT`: slave port, default 502
//! - `SLAVE_ADDRESS`: unit id, default 1

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

use modbus2chain::{console_logger, ModbusMaster, TcpMasterConfig, TcpTransport};

const TEMPERATURE_HREG: u16 = 93;
const HUMIDITY_HREG: u16 = 94;
const MOVEMENT_HANDLE_COIL: u16 = 91;
const UPTIME_IREG: u16 = 11;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value.parse().with_context(|| format!("invalid {}", name)),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let ip: IpAddr = env_or("SLAVE_IP", IpAddr::from([127, 0, 0, 1]))?;
    let port: u16 = env_or("SLAVE_TCP_PORT", 502)?;
    let unit: u8 = env_or("SLAVE_ADDRESS", 1)?;

    let config = TcpMasterConfig {
        address: SocketAddr::new(ip, port),
        timeout: Duration::from_secs(30),
        packet_logging: true,
    };
    info!("🔗 Connecting to Modbus TCP slave {} (unit {})", config.address, unit);

    let transport = TcpTransport::connect(config).await?;
    let mut master = ModbusMaster::with_logger(transport, console_logger!());

    let temperature = master.read_holding_registers(unit, TEMPERATURE_HREG, 1).await?;
    info!("🌡️ TEMPERATURE_HREG: {:?}", temperature);

    let next = temperature[0].wrapping_add(5);
    if master.write_single_register(unit, TEMPERATURE_HREG, next).await? {
        info!("✅ TEMPERATURE_HREG set to {}", next);
    } else {
        warn!("❌ TEMPERATURE_HREG write not acknowledged");
    }

    let readings = master.read_holding_registers(unit, TEMPERATURE_HREG, 2).await?;
    info!("TEMPERATURE_HREG, HUMIDITY_HREG: {:?}", readings);
    master.write_multiple_registers(unit, HUMIDITY_HREG, &[55]).await?;

    let handle = master.read_coils(unit, MOVEMENT_HANDLE_COIL, 1).await?;
    master.write_single_coil(unit, MOVEMENT_HANDLE_COIL, !handle[0]).await?;

    match master.read_input_registers(unit, UPTIME_IREG, 1).await {
        Ok(uptime) => info!("⏱️ slave uptime: {} min", uptime[0]),
        Err(e) => warn!("uptime not available: {}", e),
    }

    // unconfigured address, expect Illegal Data Address
    if let Err(e) = master.read_holding_registers(unit, 500, 1).await {
        info!("HREG 500: {}", e);
    }

    let stats = master.get_stats();
    info!(
        "📊 requests: {}, responses: {}, errors: {}, timeouts: {}",
        stats.requests_sent, stats.responses_received, stats.errors, stats.timeouts
    );
    master.close().await?;
    Ok(())
}
