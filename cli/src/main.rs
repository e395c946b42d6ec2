use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use framerelay::{
    DisplayHandle, FrameRelayClient, ImageDirSource, RelayConfig, RelayError, RelayStats,
    SocketIoConnector,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("capture source {0} has no .jpg or .jpeg images")]
    NoImages(PathBuf),
}

#[derive(Parser, Debug)]
#[command(
    name = "framerelay",
    about = "Stream JPEG frames to a processing service and save what comes back"
)]
struct Cli {
    /// JPEG file, or directory of JPEG files cycled in name order.
    #[arg(long)]
    source: PathBuf,

    /// Processing service address (overrides FRAMERELAY_ENDPOINT).
    #[arg(long)]
    endpoint: Option<String>,

    /// Socket.IO namespace (overrides FRAMERELAY_NAMESPACE).
    #[arg(long)]
    namespace: Option<String>,

    /// Sampling period in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Write each new processed frame, decoded, to this file.
    #[arg(long, env = "FRAMERELAY_OUTPUT")]
    output: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Give up after the first lost connection.
    #[arg(long)]
    no_reconnect: bool,
}

impl Cli {
    fn relay_config(&self) -> RelayConfig {
        let mut config = RelayConfig::from_env();
        if let Some(endpoint) = &self.endpoint {
            config.endpoint.clone_from(endpoint);
        }
        if let Some(namespace) = &self.namespace {
            config.namespace.clone_from(namespace);
        }
        if let Some(ms) = self.interval_ms.filter(|ms| *ms > 0) {
            config.sample_interval = Duration::from_millis(ms);
        }
        if self.no_reconnect {
            config.reconnect.enabled = false;
        }
        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = cli.relay_config();
    let source = ImageDirSource::open(&cli.source)?;
    if source.is_empty() {
        return Err(CliError::NoImages(cli.source));
    }
    info!(frames = source.len(), source = %cli.source.display(), "capture source ready");

    let mut client = FrameRelayClient::new(config, source);
    let writer = cli
        .output
        .clone()
        .map(|path| tokio::spawn(write_frames(client.subscribe(), path)));

    client.mount(&SocketIoConnector);
    client
        .run_until(shutdown_signal(cli.duration_secs.map(Duration::from_secs)))
        .await;
    client.unmount();

    let stats = client.stats();
    drop(client);

    let written = join_writer(writer).await;
    print_summary(stats, written, cli.output.as_deref());
    Ok(())
}

/// Resolve on Ctrl-C, or once `limit` elapses when one is given.
async fn shutdown_signal(limit: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    match limit {
        Some(limit) => {
            tokio::select! {
                () = ctrl_c => {}
                () = tokio::time::sleep(limit) => debug!("run duration elapsed"),
            }
        }
        None => ctrl_c.await,
    }
    info!("shutting down frame relay");
}

/// Save every processed frame to `path` until the display goes away.
async fn write_frames(mut display: DisplayHandle, path: PathBuf) -> u64 {
    let mut written: u64 = 0;
    while display.changed().await {
        let Some(frame) = display.latest() else {
            continue;
        };
        let bytes = match frame.decode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "skipping undecodable processed frame");
                continue;
            }
        };
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => {
                written = written.saturating_add(1);
                debug!(path = %path.display(), bytes = bytes.len(), "processed frame written");
            }
            Err(e) => warn!(error = %e, path = %path.display(), "failed to write processed frame"),
        }
    }
    written
}

/// Wait for the output writer, if any, and report how many frames it saved.
async fn join_writer(writer: Option<JoinHandle<u64>>) -> u64 {
    let Some(task) = writer else {
        return 0;
    };
    match task.await {
        Ok(written) => written,
        Err(e) => {
            warn!(error = %e, "output writer task failed");
            0
        }
    }
}

fn print_summary(stats: RelayStats, written: u64, output: Option<&Path>) {
    eprintln!(
        "frame relay stopped: ticks={} sent={} skipped={} dropped={} received={} rejected={}",
        stats.ticks,
        stats.frames_sent,
        stats.frames_skipped,
        stats.frames_dropped,
        stats.frames_received,
        stats.frames_rejected,
    );
    if let Some(path) = output {
        eprintln!("wrote {written} processed frames to {}", path.display());
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
