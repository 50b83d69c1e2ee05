mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use time::UtcOffset;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use seven_link::sim::{Emulator, LoopbackConnector};
use seven_link::{doctor as link_doctor, ConnectionManager, Connector, RfcommConnector, TcpConnector};
use seven_poll::{LocalClock, PollLoop};
use seven_proto::UiSnapshot;
use seven_telemetry::{doctor as telemetry_doctor, gnss, TelemetryStore};

use config::{load_config, Config, DeviceCfg, GnssCfg};

#[derive(Debug, Parser)]
#[command(name = "bikeseven", version, about = "BikeSeven - ride telemetry for the seven-segment display unit")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check configuration, adapter and bindings.
    Doctor,
    /// Keep the display updated until interrupted.
    Run {
        /// One JSON object per cycle instead of the status text.
        #[arg(long)]
        json: bool,
    },
    /// Connect once, run one cycle and print what came back.
    Probe {
        #[arg(long)]
        json: bool,
    },
    /// Serve an emulated display unit over TCP.
    Simulate {
        #[arg(long, default_value = "127.0.0.1:7070")]
        listen: String,
        #[arg(long, default_value_t = 72)]
        temperature_f: i32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.log.level.as_deref().unwrap_or("info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // only sound while this is the sole thread
    let offset = UtcOffset::current_local_offset().unwrap_or_else(|e| {
        warn!("local time offset unavailable ({}), display shows UTC", e);
        UtcOffset::UTC
    });
    let clock = LocalClock::new(offset);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    rt.block_on(async {
        match cli.cmd {
            Command::Doctor => doctor(&cfg),
            Command::Run { json } => run(&cfg, clock, json).await,
            Command::Probe { json } => probe(&cfg, clock, json).await,
            Command::Simulate { listen, temperature_f } => simulate(&listen, temperature_f).await,
        }
    })
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    let address = cfg.device.resolve();
    link_doctor::check_address(address.as_deref())?;
    link_doctor::check_link(&cfg.link)?;

    if cfg.link.transport == "rfcomm" {
        let conn = RfcommConnector::new(cfg.link.adapter.as_str(), cfg.link.baud);
        if let Some(address) = &address {
            // the binding can be created after the daemon starts
            link_doctor::check_rfcomm(&conn, address).or_else(|e| {
                warn!("rfcomm not ready: {:#}", e);
                Ok::<(), anyhow::Error>(())
            })?;
        }
    }

    telemetry_doctor::check_gnss_source(
        &cfg.gnss.source,
        cfg.gnss.nmea_device.as_deref(),
        cfg.gnss.nmea_file.as_deref(),
    )?;
    anyhow::ensure!(
        cfg.poll.period().as_millis() >= 100,
        "poll.period_ms too small; set >= 100"
    );

    info!("doctor: OK");
    Ok(())
}

async fn run(cfg: &Config, clock: LocalClock, json: bool) -> Result<()> {
    match cfg.link.transport.as_str() {
        "rfcomm" => drive(cfg, RfcommConnector::new(cfg.link.adapter.as_str(), cfg.link.baud), clock, json).await,
        "tcp" => drive(cfg, TcpConnector::new(tcp_endpoint(cfg)?), clock, json).await,
        "loopback" => drive(cfg, loopback(cfg), clock, json).await,
        other => anyhow::bail!("unknown link.transport: {}", other),
    }
}

async fn probe(cfg: &Config, clock: LocalClock, json: bool) -> Result<()> {
    match cfg.link.transport.as_str() {
        "rfcomm" => probe_once(cfg, RfcommConnector::new(cfg.link.adapter.as_str(), cfg.link.baud), clock, json).await,
        "tcp" => probe_once(cfg, TcpConnector::new(tcp_endpoint(cfg)?), clock, json).await,
        "loopback" => probe_once(cfg, loopback(cfg), clock, json).await,
        other => anyhow::bail!("unknown link.transport: {}", other),
    }
}

fn tcp_endpoint(cfg: &Config) -> Result<String> {
    cfg.link
        .endpoint
        .clone()
        .context("link.endpoint missing (transport = tcp)")
}

fn loopback(cfg: &Config) -> LoopbackConnector {
    LoopbackConnector::new(Emulator::new(cfg.link.loopback_temperature_f.unwrap_or(72)))
}

fn open_gnss(cfg: &GnssCfg) -> Result<Option<gnss::GnssSource>> {
    match cfg.source.as_str() {
        "none" => Ok(None),
        "nmea-serial" => {
            let dev = cfg.nmea_device.as_deref().context("gnss.nmea_device missing")?;
            Ok(Some(gnss::GnssSource::serial(dev, cfg.baud)?))
        }
        "nmea-file" => {
            let path = cfg.nmea_file.as_deref().context("gnss.nmea_file missing")?;
            Ok(Some(gnss::GnssSource::file(path)?))
        }
        other => anyhow::bail!("unknown gnss.source: {}", other),
    }
}

async fn drive<C: Connector>(cfg: &Config, connector: C, clock: LocalClock, json: bool) -> Result<()> {
    info!("run: starting ({} transport)", cfg.link.transport);

    let store = TelemetryStore::new();
    let (stop_tx, stop_rx) = watch::channel(false);
    let (address_tx, address_rx) = watch::channel(cfg.device.resolve());
    let (ui_tx, mut ui_rx) = watch::channel(UiSnapshot::default());

    let mut gnss_task = match open_gnss(&cfg.gnss)? {
        Some(src) => Some(tokio::spawn(gnss::feed(src, store.clone(), stop_rx.clone()))),
        None => {
            warn!("run: no gnss source, speed and distance stay at zero");
            None
        }
    };

    let conn = ConnectionManager::new(connector, &cfg.link);
    let mut poll = PollLoop::new(conn, store, address_rx, clock, ui_tx).with_period(cfg.poll.period());
    let poll_task = tokio::spawn(async move { poll.run(stop_rx).await });

    reload_on_hangup(cfg.device.clone(), address_tx)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut feeding = gnss_task.is_some();
    let mut outcome = Ok(());
    loop {
        tokio::select! {
            r = &mut ctrl_c => {
                r.context("listen for ctrl-c")?;
                info!("run: interrupted");
                break;
            }
            exited = feed_exit(&mut gnss_task), if feeding => {
                feeding = false;
                // speed and distance would freeze on the display
                outcome = exited.and_then(|()| Err(anyhow::anyhow!("gnss feed ended")));
                break;
            }
            changed = ui_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = ui_rx.borrow_and_update().clone();
                report(&snapshot, json)?;
            }
        }
    }

    stop_tx.send_replace(true);
    poll_task.await.context("poll task")?;
    if feeding {
        feed_exit(&mut gnss_task).await?;
    }
    info!("run: stopped");
    outcome
}

/// Resolves when the fix feed task finishes; never, if there is none.
async fn feed_exit(task: &mut Option<JoinHandle<Result<()>>>) -> Result<()> {
    match task {
        Some(task) => task.await.context("gnss task")?,
        None => std::future::pending().await,
    }
}

async fn probe_once<C: Connector>(cfg: &Config, connector: C, clock: LocalClock, json: bool) -> Result<()> {
    let address = cfg.device.resolve().context("device address not set")?;

    let mut conn = ConnectionManager::new(connector, &cfg.link);
    conn.connect(&address)
        .await
        .with_context(|| format!("connect to {}", address))?;

    let (_address_tx, address_rx) = watch::channel(Some(address));
    let (ui_tx, _ui_rx) = watch::channel(UiSnapshot::default());
    let mut poll = PollLoop::new(conn, TelemetryStore::new(), address_rx, clock, ui_tx);

    let snapshot = poll.cycle().await;
    poll.shutdown().await;
    anyhow::ensure!(snapshot.connected, "device stopped answering during the cycle");
    report(&snapshot, json)
}

fn report(snapshot: &UiSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot).context("encode snapshot")?);
    } else {
        println!("{}\n", snapshot);
    }
    Ok(())
}

/// SIGHUP re-reads the device address, e.g. after the address file changed.
#[cfg(unix)]
fn reload_on_hangup(device: DeviceCfg, address: watch::Sender<Option<String>>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hup = signal(SignalKind::hangup()).context("listen for SIGHUP")?;
    tokio::spawn(async move {
        while hup.recv().await.is_some() {
            let a = device.resolve();
            info!("run: device address reloaded: {:?}", a);
            address.send_replace(a);
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn reload_on_hangup(_device: DeviceCfg, _address: watch::Sender<Option<String>>) -> Result<()> {
    Ok(())
}

async fn simulate(listen: &str, temperature_f: i32) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("bind {}", listen))?;
    info!("simulate: listening on {} ({} F)", listen, temperature_f);

    let emulator = Emulator::new(temperature_f);
    loop {
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r.context("listen for ctrl-c")?;
                info!("simulate: stopped");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("accept")?;
                info!("simulate: session from {}", peer);
                let emulator = emulator.clone();
                tokio::spawn(async move {
                    match emulator.serve(stream).await {
                        Ok(n) => info!("simulate: {} left after {} commands, display {:?}", peer, n, emulator.display()),
                        Err(e) => warn!("simulate: {} session error: {}", peer, e),
                    }
                });
            }
        }
    }
}
