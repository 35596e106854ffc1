//! `pnet` - ARP discovery and blocking from the command line.
//!
//! Records go to stdout, one per line. Diagnostics go to stderr through
//! `tracing`, so piping the output never mixes the two.

use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use arpblock::block::{BlockConfig, BlockSession};
use arpblock::config::Config;
use arpblock::network::interfaces::{self, interface_for_target, with_usable_gateway};
use arpblock::network::{PnetCapture, PnetSender, find_interface};
use arpblock::output::{Emitter, OutputFormat, Record};
use arpblock::scan::{ScanOptions, Scanner};
use arpblock::session::SessionRegistry;

/// Environment variable naming the config file when `--config` is absent.
const CONFIG_ENV: &str = "PNET_CONFIG";

#[derive(Debug, Parser)]
#[command(name = "pnet", version, about = "ARP discovery and per-host blocking")]
struct Cli {
    /// TOML configuration file (defaults to $PNET_CONFIG, then built-in values)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List interfaces with an IPv4 address and a default gateway
    Interfaces {
        /// Also list interfaces without a gateway
        #[arg(long)]
        all: bool,
    },
    /// Discover live hosts on an interface's subnet
    Arpscan {
        interface: String,
        /// Override the discovery window
        #[arg(long)]
        window_ms: Option<u64>,
    },
    /// Cut hosts off their gateway until interrupted
    Arpblock {
        #[arg(required = true)]
        targets: Vec<Ipv4Addr>,
        /// Interface to block on (defaults to the one whose subnet holds the target)
        #[arg(long)]
        interface: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    match path {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn list_interfaces<W: Write>(all: bool, out: &mut Emitter<W>) -> Result<()> {
    let descriptors = interfaces::enumerate();
    let descriptors = if all {
        descriptors
    } else {
        with_usable_gateway(descriptors)
    };

    for descriptor in &descriptors {
        out.emit(&Record::from(descriptor))?;
    }
    Ok(())
}

async fn arpscan<W: Write>(
    mut config: Config,
    name: &str,
    window_ms: Option<u64>,
    out: &mut Emitter<W>,
) -> Result<()> {
    if let Some(window_ms) = window_ms {
        config.scan.window_ms = window_ms;
    }
    config.validate().context("Invalid scan settings")?;

    let interface = find_interface(name).context("Failed to find network interface")?;
    let descriptor = interfaces::describe(&interface).context("Failed to get interface info")?;
    info!("Scanning {} on {}", descriptor.network, descriptor.name);

    let (capture, sender) = PnetCapture::open(&interface, config.scan.poll_interval())
        .with_context(|| format!("Failed to open raw socket on {name}"))?;

    let scanner = Scanner::new(descriptor, sender, capture, ScanOptions::from(&config.scan));
    let report = tokio::task::spawn_blocking(move || scanner.scan())
        .await
        .context("Scan task failed")?
        .context("Scan failed")?;

    info!(
        "{} hosts answered {} requests",
        report.len(),
        report.requests_sent()
    );
    for host in report.hosts() {
        out.emit(&Record::from(host))?;
    }
    Ok(())
}

/// Open a channel for `target`, resolve its peers and return the session.
async fn prepare_block(
    config: &Config,
    target: Ipv4Addr,
    interface: Option<&str>,
) -> Result<BlockSession<PnetSender>> {
    let interface = match interface {
        Some(name) => find_interface(name).context("Failed to find network interface")?,
        None => interface_for_target(target)
            .with_context(|| format!("No interface can reach {target}"))?,
    };
    let descriptor = interfaces::describe(&interface).context("Failed to get interface info")?;

    if target == descriptor.ipv4() {
        bail!("Refusing to block {target}: it is this host's own address");
    }
    if descriptor.gateway == Some(target) {
        bail!("Refusing to block {target}: it is the gateway of {}", descriptor.name);
    }

    let (mut capture, sender) = PnetCapture::open(&interface, config.scan.poll_interval())
        .with_context(|| format!("Failed to open raw socket on {}", descriptor.name))?;

    let mut session =
        BlockSession::new(&descriptor, target, BlockConfig::from(&config.block), sender)
            .with_context(|| format!("Cannot block {target}"))?;

    let session = tokio::task::spawn_blocking(move || {
        session.resolve(&mut capture)?;
        Ok::<_, arpblock::Error>(session)
    })
    .await
    .context("Resolver task failed")?
    .with_context(|| format!("Failed to resolve peers of {target}"))?;

    Ok(session)
}

async fn start_blocking<W: Write>(
    config: &Config,
    registry: &SessionRegistry,
    targets: &[Ipv4Addr],
    interface: Option<&str>,
    out: &mut Emitter<W>,
) -> Result<()> {
    for &target in targets {
        if registry.is_blocking(target) {
            warn!("{target} given more than once, ignoring the duplicate");
            continue;
        }

        let session = prepare_block(config, target, interface).await?;
        let target_mac = session
            .target_mac()
            .with_context(|| format!("{target} resolved without a MAC"))?;
        let record = Record::blocking(target, target_mac, session.interface());
        registry.start(session)?;
        out.emit(&record)?;
    }
    Ok(())
}

async fn arpblock<W: Write>(
    config: &Config,
    targets: &[Ipv4Addr],
    interface: Option<&str>,
    out: &mut Emitter<W>,
) -> Result<()> {
    let registry = SessionRegistry::new();

    if let Err(err) = start_blocking(config, &registry, targets, interface, out).await {
        registry.stop_all().await;
        return Err(err);
    }

    wait_for_shutdown().await;

    let blocked = registry.targets();
    registry.stop_all().await;
    for target in blocked {
        out.emit(&Record::Released { target })?;
    }

    info!("Shutdown complete.");
    Ok(())
}

/// Wait for SIGINT, or SIGTERM on unix.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(err) = result {
                            warn!("Failed to listen for Ctrl-C: {err}");
                        }
                        info!("Ctrl-C received, shutting down...");
                    }
                    _ = terminate.recv() => info!("SIGTERM received, shutting down..."),
                }
                return;
            }
            Err(err) => warn!("Failed to install SIGTERM handler: {err}"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {err}");
    }
    info!("Ctrl-C received, shutting down...");
}

/// Run one command. The config is only read by the commands that use it, so
/// `interfaces` works whatever state the config file is in.
async fn run<W: Write>(cli: Cli, out: &mut Emitter<W>) -> Result<()> {
    match cli.command {
        Command::Interfaces { all } => list_interfaces(all, out),
        Command::Arpscan {
            interface,
            window_ms,
        } => {
            let config = load_config(cli.config.as_deref())?;
            arpscan(config, &interface, window_ms, out).await
        }
        Command::Arpblock { targets, interface } => {
            let config = load_config(cli.config.as_deref())?;
            arpblock(&config, &targets, interface.as_deref(), out).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut out = Emitter::new(io::stdout(), cli.format);
    run(cli, &mut out).await
}
