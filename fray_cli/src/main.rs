use fray_core::config::FrayConfig;
use fray_core::correlator::Correlator;
use fray_core::diag::{CommandChannel, DiagnosticChannel, device_ip};
use fray_core::history::{AnomalyRecord, History, PacketRecord};
use fray_core::link::UdpLinkSender;
use fray_core::monitor::HealthMonitor;
use fray_core::mutator::RandomBitFlipMutator;
use fray_core::transmitter::Transmitter;
use fray_core::worker::{self, WorkerHandle};

use clap::Parser;
use log::{info, warn};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// How long to fuzz before shutting the pipeline down.
    #[clap(short, long, default_value_t = 60)]
    duration_secs: u64,
    /// RNG seed for reproducible mutation streams; omitted means a fresh
    /// seed per run.
    #[clap(long)]
    seed: Option<u64>,
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match cli.config_file {
        Some(config_path) => {
            info!("loading configuration from specified path: {config_path:?}");
            FrayConfig::load_from_file(&config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("fray.toml");
            if default_config_path.exists() {
                info!("no config file specified via CLI, loading default: {default_config_path:?}");
                FrayConfig::load_from_file(&default_config_path)?
            } else {
                info!("no config file specified and default 'fray.toml' not found, using built-in defaults");
                FrayConfig::default()
            }
        }
    };

    let packets: History<PacketRecord> = History::with_capacity(config.history.packet_capacity);
    let anomalies: History<AnomalyRecord> =
        History::with_capacity(config.history.anomaly_capacity);

    // Quick device probe over its own short-lived channel, so the main
    // monitor channel stays untouched.
    let mut probe = CommandChannel::new(config.monitor.base_command.clone());
    match probe.open() {
        Ok(()) => {
            info!("target device IP: {}", device_ip(&mut probe));
            probe.close();
        }
        Err(e) => warn!("device probe failed, continuing without health data: {e}"),
    }

    let collector: SocketAddr = config
        .transmitter
        .collector_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid collector-addr: {e}"))?;
    let seed = cli.seed.unwrap_or_else(|| {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    });
    info!("mutation rng seed: {seed}");
    let mut seed_bytes = [0u8; 32];
    seed_bytes[..8].copy_from_slice(&seed.to_le_bytes());
    let rng = ChaCha8Rng::from_seed(seed_bytes);

    let transmitter = Transmitter::new(
        config.transmitter.template(),
        Box::new(RandomBitFlipMutator::new(config.transmitter.mutation_rate)),
        Box::new(UdpLinkSender::new(collector)?),
        config.transmitter.interface.clone(),
        config.transmitter.cycle_delay(),
        packets.clone(),
        rng,
    );

    let monitor = HealthMonitor::new(
        Box::new(CommandChannel::new(config.monitor.base_command.clone())),
        anomalies.clone(),
        &config.monitor,
    );

    let correlator = Correlator::new(packets.clone(), anomalies.clone(), &config.correlator)?;

    let handles: Vec<WorkerHandle> = vec![
        worker::spawn(transmitter)?,
        worker::spawn(monitor)?,
        worker::spawn(correlator)?,
    ];

    info!(
        "pipeline running for {}s (reports in {:?})",
        cli.duration_secs, config.correlator.report_dir
    );
    let started = Instant::now();
    let deadline = started + Duration::from_secs(cli.duration_secs);
    let mut last_stats = Instant::now();
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(200));
        if last_stats.elapsed() >= Duration::from_secs(5) {
            info!(
                "{} frames tracked, {} anomalies observed",
                packets.total_appended(),
                anomalies.total_appended()
            );
            last_stats = Instant::now();
            for handle in &handles {
                if handle.is_finished() {
                    warn!("{} stopped early, running degraded", handle.name());
                }
            }
        }
    }

    for handle in &handles {
        handle.request_cancel();
    }
    for handle in handles {
        handle.join();
    }

    info!(
        "run complete after {:.1?}: {} frames tracked, {} anomalies observed",
        started.elapsed(),
        packets.total_appended(),
        anomalies.total_appended()
    );
    Ok(())
}
