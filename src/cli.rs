use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "studio-exporter")]
#[command(version)]
#[command(about = "Exports live production-engine statistics as scrapeable metrics")]
pub struct Args {
    /// TOML config file (defaults are used for anything it omits)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Address the /metrics endpoint listens on
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Metric name prefix
    #[arg(long)]
    pub namespace: Option<String>,

    /// Log filter directive (e.g. "info", "studio_exporter=debug")
    #[arg(long)]
    pub log_level: Option<String>,

    /// Track a fixed number of audio channels per source instead of asking the engine
    #[arg(long)]
    pub fixed_audio_channels: Option<usize>,

    /// Meter push interval of the simulated engine, in milliseconds
    #[arg(long)]
    pub meter_interval_ms: Option<u64>,

    /// Mirror log events into the engine log
    #[arg(long)]
    pub forward_logs: bool,
}
