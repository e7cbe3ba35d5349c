use anyhow::{anyhow, Result};
use quacktor_process::MachineDescriptor;

use crate::connection::Connection;

use super::message::{Request, Response};

/// A connection to qpmd.
///
/// Requests are answered in order, the client must not be shared between concurrent callers.
pub struct QpmdClient {
    conn: Connection,
}

impl QpmdClient {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let conn = Connection::connect((host, port)).await?;
        Ok(Self { conn })
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let kind = request.kind();
        match self.conn.request(&request).await? {
            Response::Error(error) => Err(anyhow!("qpmd refused {kind}: {error}")),
            response => Ok(response),
        }
    }

    /// Announces the machine.
    pub async fn hello(&self, machine: &MachineDescriptor) -> Result<()> {
        self.call(Request::Hello {
            machine_id: machine.machine_id.clone(),
            message_gateway_port: machine.message_gateway_port,
            general_purpose_port: machine.general_purpose_port,
        })
        .await?;
        Ok(())
    }

    /// Publishes a system of an announced machine. It stays registered while this client lives.
    pub async fn register(&self, system: &str, port: u16, machine_id: &str) -> Result<()> {
        self.call(Request::Register {
            system: system.to_string(),
            port,
            machine_id: machine_id.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.call(Request::Heartbeat).await?;
        Ok(())
    }

    /// Returns the machine hosting `system` and the port of the system server.
    pub async fn lookup(&self, system: &str) -> Result<(MachineDescriptor, u16)> {
        match self
            .call(Request::Lookup {
                system: system.to_string(),
            })
            .await?
        {
            Response::Lookup { machine, port } => Ok((machine, port)),
            other => Err(anyhow!("Unexpected answer to lookup: {other:?}")),
        }
    }
}
