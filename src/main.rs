use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// busylightd: drive a Kuando Busylight from team status channels
#[derive(Parser)]
#[command(name = "busylightd", version, about)]
struct Cli {
    /// Path to the config file (TOML).
    #[arg(short, long, default_value = "/etc/busylightd/config.toml")]
    config: PathBuf,

    /// Enable JSON log output (for journald).
    #[arg(long)]
    json: bool,

    /// Validate config and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("busylightd=info"));

    if cli.json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }

    info!("busylightd v{}", env!("CARGO_PKG_VERSION"));

    let config_path = cli
        .config
        .canonicalize()
        .unwrap_or_else(|_| cli.config.clone());
    let config = busylightd::config::load(&config_path)?;

    if cli.check {
        println!(
            "config OK: user {}, {} status channels, {} known users",
            config.user.username,
            config.user.status_groups().len(),
            config.user.known_users.len(),
        );
        return Ok(());
    }

    info!(
        "loaded config: bus {}:{}, groups {:?}",
        config.bus.host,
        config.bus.port,
        config.user.status_groups()
    );

    busylightd::daemon::run(config, config_path).await?;

    Ok(())
}
