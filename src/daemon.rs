use anyhow::{anyhow, Context, Result};
use armbms_lib::{
    decoder::FrameDecoder,
    ingest::{self, Ingest},
    oid::{Oid, OidMapper},
    registers::RegisterMapper,
    serialport::SerialSource,
    server::{ModbusServer, SnmpServer},
    snmp::SnmpAgent,
    store::TelemetryStore,
};
use log::info;
use std::{io::Read, path::Path, sync::Arc, thread::JoinHandle, time::Duration};

use crate::{commandline::parse_hex, config::GatewayConfig};

type Listener = JoinHandle<Result<(), armbms_lib::Error>>;

/// Fresh store with the configured slave counts applied.
fn prepare_store(config: &GatewayConfig) -> Arc<TelemetryStore> {
    let store = Arc::new(TelemetryStore::new());
    store.clear();
    store.set_arm_slave_counts(config.initial_slave_counts);
    store
}

fn start_listeners(config: &GatewayConfig, store: &Arc<TelemetryStore>) -> Result<Vec<Listener>> {
    let prefix: Oid = config
        .oid_prefix
        .parse()
        .with_context(|| format!("Invalid OID prefix '{}'", config.oid_prefix))?;

    let modbus = ModbusServer::bind(&config.modbus_bind, RegisterMapper::new(store.clone()))
        .with_context(|| format!("Cannot bind Modbus TCP to {}", config.modbus_bind))?;
    let agent = SnmpAgent::new(
        OidMapper::new(prefix, store.clone()),
        config.community.clone(),
        config.max_bulk_repetitions,
    );
    let snmp = SnmpServer::bind(&config.snmp_bind, agent)
        .with_context(|| format!("Cannot bind SNMP to {}", config.snmp_bind))?;

    Ok(vec![
        modbus.spawn().context("Cannot start Modbus listener")?,
        snmp.spawn().context("Cannot start SNMP agent")?,
    ])
}

fn wait_for(listeners: Vec<Listener>) -> Result<()> {
    for listener in listeners {
        let name = listener.thread().name().unwrap_or("listener").to_string();
        listener
            .join()
            .map_err(|_| anyhow!("Thread '{name}' panicked"))?
            .with_context(|| format!("Thread '{name}' failed"))?;
    }
    Ok(())
}

fn serve<R>(source: R, config: &GatewayConfig, keep_serving: bool) -> Result<()>
where
    R: Read + Send + 'static,
{
    info!("Starting gateway: {config:?}");
    let store = prepare_store(config);
    let listeners = start_listeners(config, &store)?;

    let ingest = Ingest::spawn(source, FrameDecoder::new(store.clone()))
        .context("Cannot start ingestion threads")?;
    let frames = ingest.join().context("Serial ingestion failed")?;
    info!(
        "Byte source finished after {frames} frames, {} readings stored",
        store.snapshot().entry_count()
    );

    if keep_serving {
        info!("Still serving the last known readings");
        wait_for(listeners)
    } else {
        Err(anyhow!("Serial source closed"))
    }
}

pub fn run(device: &str, baud: u32, timeout: Duration, config: &GatewayConfig) -> Result<()> {
    let source = SerialSource::open(device, baud, timeout)
        .with_context(|| format!("Cannot open serial port '{device}'"))?;
    serve(source, config, false)
}

pub fn replay(file: &Path, config: &GatewayConfig) -> Result<()> {
    let source = std::fs::File::open(file)
        .with_context(|| format!("Cannot open capture file {file:?}"))?;
    serve(source, config, true)
}

/// Concatenates the hex arguments and runs them through the assembler.
fn apply_hex(decoder: &FrameDecoder, frames: &[String]) -> Result<()> {
    let mut bytes = Vec::new();
    for text in frames {
        bytes.extend(parse_hex(text).map_err(|e| anyhow!(e))?);
    }
    let applied = ingest::run(bytes.as_slice(), decoder).context("Cannot decode frames")?;
    info!("{applied} frames applied");
    Ok(())
}

pub fn decode(frames: &[String], config: &GatewayConfig) -> Result<()> {
    let decoder = FrameDecoder::new(prepare_store(config));
    apply_hex(&decoder, frames)?;
    let snapshot = decoder.store().snapshot();
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Cannot serialize snapshot")?
    );
    Ok(())
}

pub fn registers(start: u16, quantity: u16, frames: &[String], config: &GatewayConfig) -> Result<()> {
    let decoder = FrameDecoder::new(prepare_store(config));
    apply_hex(&decoder, frames)?;
    let mapper = RegisterMapper::new(decoder.store().clone());
    for (address, register) in (u32::from(start)..).zip(mapper.read(start, quantity)) {
        println!("{address:5}: {:<28} {}", register.name, register.value);
    }
    Ok(())
}
