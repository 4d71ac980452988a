use tracing::{error, info, warn};

use xserver_config::ServerConfig;
use xserver_core::Worker;

const DEFAULT_CONFIG: &str = "config/x-server.conf";

fn main() -> anyhow::Result<()> {
    utils::init_tracing();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.into());
    let cfg = match ServerConfig::from_file(&config_path) {
        Ok(cfg) => {
            info!(target: "xserver", file = %config_path, "Configuration loaded");
            cfg
        }
        Err(err) => {
            warn!(
                target: "xserver",
                file = %config_path,
                error = %err,
                "Configuration unavailable; using defaults"
            );
            ServerConfig::default()
        }
    };

    let report = cfg.validate();
    for warning in report.warnings() {
        warn!(target: "xserver", "config: {warning}");
    }
    if report.has_errors() {
        for e in report.errors() {
            error!(target: "xserver", "config: {e}");
        }
        anyhow::bail!("invalid configuration in '{config_path}'");
    }

    // One runtime thread per configured worker; each connection task is a
    // cooperatively scheduled unit on top of them.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.workers.max(1) as usize)
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        info!(
            target: "xserver",
            port = cfg.listen_port,
            workers = cfg.workers,
            "Starting x-server"
        );
        Worker::new(cfg).run().await
    })
}
