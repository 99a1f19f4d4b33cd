//! Main binary of the consensus node. It reads the configuration, recovers the
//! consensus state from the WAL and runs the node until it is interrupted.
use anyhow::Context as _;
use clap::Parser;
use keel_bft as bft;
use keel_concurrency::{ctx, time};
use keel_roles::validator;
use keel_tools::{ConfigPaths, HashChainApp};
use std::{fs, io::IsTerminal as _, net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{prelude::*, Registry};
use vise_exporter::MetricsExporter;

/// Number of blocks after which the node stops in CI mode.
const CI_MODE_BLOCKS: u64 = 100;

/// Command-line application launching a consensus node.
#[derive(Debug, Parser)]
struct Args {
    /// Verify configuration instead of launching a node.
    #[arg(long, conflicts_with_all = ["ci_mode"])]
    verify_config: bool,
    /// Exit after committing 100 blocks.
    #[arg(long)]
    ci_mode: bool,
    /// Path to a validator key file.
    #[arg(long, default_value = "validator_key")]
    validator_key: PathBuf,
    /// Path to a JSON file with node configuration.
    #[arg(long, default_value = "config.json")]
    config_file: PathBuf,
    /// Directory of the debug log file.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

impl Args {
    /// Extracts configuration paths from these args.
    fn config_paths(&self) -> ConfigPaths<'_> {
        ConfigPaths {
            config: &self.config_file,
            validator_key: &self.validator_key,
        }
    }
}

/// Logs INFO and above to stdout, in a human-readable form, and DEBUG and
/// above to `<log_dir>/output.log`.
fn init_logging(log_dir: &std::path::Path) -> anyhow::Result<()> {
    fs::create_dir_all(log_dir).with_context(|| log_dir.display().to_string())?;
    let log_file = fs::File::create(log_dir.join("output.log")).context("output.log")?;

    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_ansi(std::env::var("NO_COLOR").is_err() && std::io::stdout().is_terminal())
        .with_file(false)
        .with_line_number(false)
        .with_filter(LevelFilter::INFO);

    let file_log = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(LevelFilter::DEBUG);

    let subscriber = Registry::default().with(stdout_log).with(file_log);
    tracing::subscriber::set_global_default(subscriber).context("set_global_default()")?;
    Ok(())
}

/// Serves metrics for scraping until `ctx` is canceled.
async fn run_metrics(ctx: &ctx::Ctx, addr: Option<SocketAddr>) -> anyhow::Result<()> {
    let Some(addr) = addr else {
        ctx.canceled().await;
        return Ok(());
    };
    tracing::info!(%addr, "serving metrics");
    MetricsExporter::default()
        .with_graceful_shutdown(ctx.canceled())
        .start(addr)
        .await?;
    Ok(())
}

/// This node is the only one on its network: everything it broadcasts it
/// has already processed itself.
async fn broadcast(
    ctx: &ctx::Ctx,
    mut outbound: ctx::channel::UnboundedReceiver<bft::OutboundMessage>,
) -> anyhow::Result<()> {
    loop {
        let msg = outbound.recv(ctx).await?;
        tracing::trace!(
            msg = msg.label(),
            height = %msg.height(),
            round = %msg.round(),
            "broadcast"
        );
    }
}

/// In CI mode, returns once `CI_MODE_BLOCKS` blocks are committed.
async fn ci_mode(ctx: &ctx::Ctx, handle: &bft::Handle, enabled: bool) -> anyhow::Result<()> {
    if !enabled {
        ctx.canceled().await;
        return Ok(());
    }
    handle
        .wait_for_block(ctx, validator::Height(CI_MODE_BLOCKS))
        .await?;
    tracing::info!(blocks = CI_MODE_BLOCKS, "CI mode: blocks committed, stopping");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();
    let ctx = &ctx::root();

    if !args.verify_config {
        init_logging(&args.log_dir)?;
        tracing::info!("Starting node.");
    }

    tracing::debug!("Loading config files.");
    let configs = args.config_paths().read().context("configs.read()")?;

    if args.verify_config {
        tracing::info!("Configuration verified.");
        return Ok(());
    }

    let app = Arc::new(HashChainApp::default());
    let cfg = configs.bft_config(app.clone()).context("bft_config()")?;
    let (outbound_send, outbound_recv) = ctx::channel::unbounded();
    let (handle, runner) = cfg.recover(ctx, outbound_send).context("recover()")?;
    tracing::info!(
        state = %handle.round_state(),
        last_block = ?app.last_height(),
        "node recovered"
    );

    let started = ctx.now();
    let res = tokio::select! {
        res = runner.run(ctx) => res.context("consensus"),
        res = run_metrics(ctx, configs.app.metrics_server_addr) => res.context("metrics exporter"),
        res = broadcast(ctx, outbound_recv) => res.context("broadcast"),
        res = ci_mode(ctx, &handle, args.ci_mode) => res,
        res = tokio::signal::ctrl_c() => res.context("ctrl_c()"),
    };
    ctx.cancel();
    let uptime: time::Duration = ctx.now() - started;
    tracing::info!(
        state = %handle.round_state(),
        last_block = ?app.last_height(),
        uptime_s = uptime.whole_seconds(),
        "node stopped"
    );
    res
}
