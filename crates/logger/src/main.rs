//! # Sensor Logger
//!
//! Lê frames de telemetria do Arduino via serial (Master com failover
//! para Backup), classifica cada leitura contra os thresholds e grava as
//! tabelas Readings/Errors de cada fonte.
//!
//! ## Uso
//! ```bash
//! sensor_logger                          # config.toml ao lado do executável
//! sensor_logger --config /etc/sensor.toml
//! ```

mod archive;
mod ingest;
mod sink;
mod store;
mod transport;

use archive::RawArchive;
use ingest::{ExitReason, IngestContext};
use sensor_core::config::AppConfig;
use sensor_core::Transport;
use sink::SinkWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use store::CsvTableStore;
use tracing::{error, info, warn};
use transport::{SerialPortOpener, TransportSelector};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = config_path_from_args().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for p in &problems {
            error!("Config inválida: {p}");
        }
        return ExitCode::FAILURE;
    }

    // ── Ctrl+C / SIGTERM ──
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&stop)) {
            warn!("Não foi possível registrar o sinal {signal}: {e}");
        }
    }

    // ── Datasets ──
    let storage = &config.storage;
    let sink = SinkWriter::open(
        CsvTableStore::new(&storage.dir, storage.dataset_for(Transport::Master)),
        CsvTableStore::new(&storage.dir, storage.dataset_for(Transport::Backup)),
    );

    let archive = if config.archive.enabled {
        RawArchive::new(&config.archive.path)
    } else {
        RawArchive::disabled()
    };

    // ── Banner ──
    let t = &config.transport;
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ SENSOR LOGGER – SERIAL (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  Master:    {} @ {} baud", t.master_port, t.baud_rate);
    println!("  Backup:    {} (failover após {:.1}s)", t.backup_port, t.liveness_timeout_secs);
    println!(
        "  Limites:   {:.2} V | {:.1} °C",
        config.thresholds.voltage, config.thresholds.temperature
    );
    println!("  Master →   {}", sink.destination(Transport::Master).display());
    println!("  Backup →   {}", sink.destination(Transport::Backup).display());
    match archive.path() {
        Some(path) => println!("  Bruto →    {}", path.display()),
        None => println!("  Bruto →    (desligado)"),
    }
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal ──
    let selector = TransportSelector::new(SerialPortOpener, config.transport.clone());
    let mut ctx = IngestContext::new(
        selector,
        sink,
        archive,
        config.thresholds,
        config.transport.idle_poll(),
    );
    let reason = ctx.run(&stop);

    let stats = ctx.stats();
    info!(
        "Frames: {} | Leituras: {} | Fora do normal: {} | Malformadas: {} | Ignoradas: {} | Falhas de gravação: {} | Failovers: {} (pós-failover: {})",
        stats.frames,
        stats.readings,
        stats.errors,
        stats.malformed,
        stats.ignored,
        stats.persist_failures,
        stats.failovers,
        stats.backup_readings
    );

    for owner in [Transport::Master, Transport::Backup] {
        let table = ctx.sink().table(owner);
        info!(
            "{owner}: {} leituras, {} erros em {}",
            table.readings().len(),
            table.errors().len(),
            ctx.sink().destination(owner).display()
        );
    }

    match reason {
        ExitReason::Interrupted => {
            info!("Parou de escutar. Porta serial fechada.");
            ExitCode::SUCCESS
        }
        ExitReason::TransportLost => {
            error!("Nenhum transporte disponível. Porta serial fechada.");
            ExitCode::FAILURE
        }
    }
}

/// `--config <caminho>` ou `--config=<caminho>`.
fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}
