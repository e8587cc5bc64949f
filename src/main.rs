use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use studio_exporter::cli::Args;
use studio_exporter::config::Config;
use studio_exporter::logging::{self, HostLogSink};
use studio_exporter::server;
use studio_exporter::sim::SimulatedEngine;
use studio_exporter::MetricBridge;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        // logging may not be up yet
        eprintln!("studio-exporter: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> studio_exporter::error::Result<()> {
    let config = Config::resolve(&args)?;

    let engine = Arc::new(SimulatedEngine::new());
    let host_sink: Option<Arc<dyn HostLogSink>> = if config.log.forward_to_engine {
        Some(engine.clone())
    } else {
        None
    };
    logging::init(&config.log.level, host_sink)?;

    let bridge = Arc::new(MetricBridge::new(engine.clone(), config.bridge.clone()));
    let pump = engine.start_meter_pump(config.sim.meter_interval());
    info!(
        namespace = %config.bridge.namespace,
        capacity = config.bridge.sampler_capacity,
        "metric bridge ready"
    );

    let listener = server::bind(config.server.listen).await?;
    let result = server::serve(listener, Arc::clone(&bridge), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await;

    pump.stop();
    bridge.shutdown();
    result
}
