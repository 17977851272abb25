// Start the sidecar.
use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

use splicer::Manager;

/// Renders Envoy xDS configmaps, with SMI TrafficSplit weights spliced in,
/// onto the proxy filesystem.
#[derive(Debug, Parser)]
#[command(name = "splicer", version)]
struct Options {
    /// The namespace holding the configmaps and trafficsplits to process.
    #[arg(long, env = "NS")]
    namespace: Option<String>,

    /// Path to the serviceaccount bearer token file.
    #[arg(long, default_value = "/var/run/secrets/kubernetes.io/serviceaccount/token")]
    token_file: String,

    /// Base URL of the Kubernetes api server.
    #[arg(long, default_value = "https://kubernetes")]
    apiserver: String,

    /// Root of the rendered xDS tree; an empty value means /srv/runtime.
    #[arg(long, default_value = "")]
    output_dir: String,

    /// A template configmap to process; repeatable.
    #[arg(long = "configmap")]
    configmaps: Vec<String>,

    /// A trafficsplit to merge; repeatable. Presence implies --smi.
    #[arg(long = "trafficsplit")]
    trafficsplits: Vec<String>,

    /// Merge SMI trafficsplit weights into the rendered configmaps.
    #[arg(long)]
    smi: bool,

    /// Process everything without writing to the cluster.
    #[arg(long)]
    dry_run: bool,

    /// Reconcile every configured resource once and exit.
    #[arg(long)]
    onetime: bool,

    /// Skip TLS server verification.
    #[arg(long)]
    insecure: bool,

    /// Watch for changes in addition to polling.
    #[arg(long)]
    watch: bool,

    /// The time between full re-syncs.
    #[arg(long, default_value = "60s")]
    sync_interval: humantime::Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "splicer=info".to_owned());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let namespace = options
        .namespace
        .or_else(|| std::env::var("POD_NAMESPACE").ok())
        .context("--namespace, $NS, or $POD_NAMESPACE must be set")?;

    let manager = Manager {
        namespace,
        server: options.apiserver,
        token_file: options.token_file,
        insecure: options.insecure,
        smi: options.smi || !options.trafficsplits.is_empty(),
        watch: options.watch,
        dry_run: options.dry_run,
        onetime: options.onetime,
        sync_interval: options.sync_interval.into(),
        output_dir: options.output_dir,
        configmaps: options.configmaps,
        trafficsplits: options.trafficsplits,
    };

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(token.clone()));

    manager.run(token).await?;
    Ok(())
}

async fn cancel_on_shutdown_signal(token: CancellationToken) {
    let mut sigint = signal(SignalKind::interrupt()).expect("sigint handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
    token.cancel();
}
