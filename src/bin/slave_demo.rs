//! Modbus slave demo
//!
//! Serves the register map in `demos/registers.yaml` (or the file given as
//! the first argument) over Modbus TCP, or over RTU when
//! `MODBUS_TRANSPORT=rtu`.
//!
//! Environment:
//! - `SLAVE_BIND`: TCP bind address, default `0.0.0.0:502`
//! - `SLAVE_ADDRESS`: unit id answered, default 1
//! - `MODBUS_SERIAL_PORT`, `MODBUS_BAUD`: RTU line settings
//! - `RUST_LOG`: log filter, default `info`

use std::env;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{error, info};
use tokio::signal;

use modbus2chain::{
    CallbackRegistry, ModbusSlave, RegisterDefinitions, RegisterTable, RegisterValues, RtuConfig,
    SlaveTransport, TcpSlaveConfig,
};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value.parse().with_context(|| format!("invalid {}", name)),
        Err(_) => Ok(default),
    }
}

fn callbacks() -> CallbackRegistry {
    let started = Instant::now();

    CallbackRegistry::new()
        .on_set(RegisterTable::HoldingRegister, "TEMPERATURE_HREG", |_, _, address, values| {
            info!("TEMPERATURE_HREG {} written: {:?}", address, values);
        })
        .on_set(RegisterTable::Coil, "MOVEMENT_HANDLE", |_, _, address, values| {
            if let RegisterValues::Bits(bits) = values {
                info!("MOVEMENT_HANDLE {} switched {}", address, if bits[0] { "on" } else { "off" });
            }
        })
        .on_get(RegisterTable::InputRegister, "UPTIME_IREG", move |store, _, address, _| {
            let minutes = (started.elapsed().as_secs() / 60).min(u16::MAX as u64) as u16;
            store.set_ireg(address, minutes);
        })
}

async fn serve<T: SlaveTransport>(mut slave: ModbusSlave<T>) -> Result<()> {
    let mut last_report = Instant::now();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("🛑 Received interrupt signal, stopping slave");
                break;
            }
            served = slave.process() => {
                if let Err(e) = served {
                    error!("request failed: {}", e);
                }
            }
        }

        for (address, change) in slave.store_mut().take_changed_hregs() {
            info!("HREG {} changed to {} at {}", address, change.value, change.timestamp);
        }
        for (address, change) in slave.store_mut().take_changed_coils() {
            info!("COIL {} changed to {} at {}", address, change.value, change.timestamp);
        }

        if last_report.elapsed() >= Duration::from_secs(60) {
            let stats = slave.get_stats();
            info!(
                "📊 requests: {}, responses: {}, dropped: {}, errors: {}",
                stats.requests_received, stats.responses_sent, stats.frames_dropped, stats.errors
            );
            last_report = Instant::now();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("{}", modbus2chain::info());

    let path = env::args().nth(1).unwrap_or_else(|| "demos/registers.yaml".to_string());
    let definitions = RegisterDefinitions::from_file(&path)
        .with_context(|| format!("loading register definitions from {}", path))?;
    let unit_address: u8 = env_or("SLAVE_ADDRESS", 1)?;

    if env::var("MODBUS_TRANSPORT").as_deref() == Ok("rtu") {
        let config = RtuConfig {
            port: env_or("MODBUS_SERIAL_PORT", RtuConfig::default().port)?,
            baud_rate: env_or("MODBUS_BAUD", 9600)?,
            ..RtuConfig::default()
        };
        info!("🚀 Modbus RTU slave {} on {}", unit_address, config.port);

        let mut slave = ModbusSlave::open_rtu(config, unit_address)?;
        slave.setup_registers(&definitions, &callbacks(), false)?;
        serve(slave).await
    } else {
        let config = TcpSlaveConfig {
            bind_address: env_or("SLAVE_BIND", TcpSlaveConfig::default().bind_address)?,
            unit_ids: Some(vec![unit_address]),
            ..TcpSlaveConfig::default()
        };

        let mut slave = ModbusSlave::bind_tcp(config).await?;
        slave.setup_registers(&definitions, &callbacks(), false)?;
        serve(slave).await
    }
}
