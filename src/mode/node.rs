use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use quacktor_distributed::Node;
use quacktor_process::Environment;

use quacktor::config::QuacktorConfig;

#[derive(Parser, Debug)]
pub(crate) struct Args {
    /// Name the system is registered under with qpmd
    #[arg(long, value_name = "NAME")]
    pub system: String,

    /// Machine id, a random UUID if not set
    #[arg(long, value_name = "ID")]
    machine_id: Option<String>,

    /// Address other machines use to reach this one, overrides the config
    #[arg(long, value_name = "HOST")]
    advertise_host: Option<String>,

    /// Path to a quacktor.toml file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub(crate) async fn start(args: Args, config: QuacktorConfig) -> Result<()> {
    let mut node_config = config.node_config();
    if let Some(host) = args.advertise_host {
        node_config.advertise_host = host;
    }
    let env = match args.machine_id {
        Some(machine_id) => Environment::with_machine_id(machine_id),
        None => Environment::new(),
    };
    let node = Node::start_with_encoder(env, node_config, config.encoder.encoder()).await?;
    let system = node.new_system(&args.system).await?;
    log::info!(
        "Machine {} serves system {}",
        node.env().machine_id(),
        system.name()
    );

    let ctrlc = async_ctrlc::CtrlC::new()?;
    tokio::select! {
        _ = ctrlc => log::info!("Shutting down node"),
        _ = system.closed() => log::warn!("System {} was closed", system.name()),
    }
    system.close();
    node.shutdown();
    Ok(())
}
