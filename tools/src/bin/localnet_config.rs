//! This tool writes the config files of a single-validator chain, ready to be
//! run by the `node` binary.
use anyhow::Context as _;
use clap::Parser;
use keel_crypto::TextFmt as _;
use keel_tools::AppConfig;
use std::{
    fs::{self, Permissions},
    net::{Ipv4Addr, SocketAddr},
    os::unix::fs::PermissionsExt,
    path::PathBuf,
};

/// Command line arguments.
#[derive(Debug, Parser)]
struct Args {
    /// Chain id of the new chain.
    #[arg(long, default_value = "keel-localnet")]
    chain_id: String,
    /// TCP port to serve metrics for scraping.
    #[arg(long)]
    metrics_server_port: Option<u16>,
    /// Directory in which `config.json`, `validator_key` and the node state
    /// are created.
    #[arg(long)]
    output_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let dir = &args.output_dir;
    fs::create_dir_all(dir).with_context(|| dir.display().to_string())?;

    let (mut cfg, key) = AppConfig::default_for(&args.chain_id, dir)?;
    cfg.metrics_server_addr = args
        .metrics_server_port
        .map(|port| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port));

    fs::write(dir.join("config.json"), cfg.encode()?).context("fs::write(config.json)")?;
    let key_path = dir.join("validator_key");
    fs::write(&key_path, key.encode()).context("fs::write(validator_key)")?;
    fs::set_permissions(&key_path, Permissions::from_mode(0o600))
        .context("fs::set_permissions()")?;
    Ok(())
}
