use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use quacktor_distributed::qpmd::QpmdServer;
use tokio::net::TcpListener;

use quacktor::config::QuacktorConfig;

#[derive(Parser, Debug)]
pub(crate) struct Args {
    /// Address to listen on, defaults to `<bind_host>:<qpmd_port>` of the config
    #[arg(long, value_name = "ADDRESS")]
    bind: Option<SocketAddr>,

    /// Path to a quacktor.toml file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub(crate) async fn start(args: Args, config: QuacktorConfig) -> Result<()> {
    let listener = match args.bind {
        Some(address) => TcpListener::bind(address).await,
        None => TcpListener::bind((config.bind_host.as_str(), config.qpmd_port)).await,
    }
    .context("Could not bind qpmd")?;
    log::info!("qpmd listening on {}", listener.local_addr()?);

    let ctrlc = async_ctrlc::CtrlC::new()?;
    tokio::select! {
        served = QpmdServer::new().serve(listener) => served,
        _ = ctrlc => {
            log::info!("Shutting down qpmd");
            Ok(())
        }
    }
}
