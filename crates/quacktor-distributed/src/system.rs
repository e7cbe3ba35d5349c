//! Named systems make local actors discoverable by other machines.
//!
//! A system registers its name with qpmd and answers `lookup` requests for the handlers exposed
//! through [`System::handle_remote`]. Other machines reach it with a connection string of the form
//! `<system>@<host>`, see [`Node::connect`](crate::node::Node::connect).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use quacktor_process::{MachineDescriptor, Pid};
use regex::Regex;
use tokio::{net::TcpListener, sync::watch};

use crate::{
    connection::Connection,
    message::{Request, Response},
    qpmd::QpmdClient,
};

const CONNECTION_STRING: &str = r"^(\w+)@(.+)$";

/// Splits `<system>@<host>`.
pub fn parse_connection_string(connection_string: &str) -> Result<(&str, &str)> {
    let pattern = Regex::new(CONNECTION_STRING)?;
    let captures = pattern
        .captures(connection_string)
        .ok_or_else(|| anyhow!("Invalid connection string `{connection_string}`"))?;
    match (captures.get(1), captures.get(2)) {
        (Some(system), Some(host)) => Ok((system.as_str(), host.as_str())),
        _ => bail!("Invalid connection string `{connection_string}`"),
    }
}

#[derive(Clone)]
pub struct System {
    inner: Arc<InnerSystem>,
}

struct InnerSystem {
    name: String,
    port: u16,
    handlers: DashMap<String, Pid>,
    closed: watch::Sender<bool>,
}

impl System {
    pub(crate) fn new(name: &str, port: u16) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(InnerSystem {
                name: name.to_string(),
                port,
                handlers: DashMap::new(),
                closed,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Exposes `pid` to other machines under `handler`.
    pub fn handle_remote(&self, handler: impl Into<String>, pid: Pid) {
        self.inner.handlers.insert(handler.into(), pid);
    }

    pub fn handler(&self, handler: &str) -> Option<Pid> {
        self.inner.handlers.get(handler).map(|x| x.clone())
    }

    /// Stops answering lookups and drops the qpmd registration.
    pub fn close(&self) {
        self.inner.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once the system was closed, e.g. because qpmd stopped answering heartbeats.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                return;
            }
        }
    }

    fn handle(&self, request: Request) -> Response {
        match request {
            Request::Hello { .. } => Response::Ok,
            Request::Lookup { handler } => match self.handler(&handler) {
                Some(pid) => Response::Pid(pid),
                None => Response::Error(format!("Unknown handler `{handler}`")),
            },
            request => Response::Error(format!("Unexpected {} request", request.kind())),
        }
    }
}

pub(crate) async fn serve(system: System, listener: TcpListener) {
    let mut closed = system.inner.closed.subscribe();
    if system.is_closed() {
        return;
    }
    loop {
        tokio::select! {
            _ = closed.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("New connection {addr} to system {}", system.name());
                    match Connection::new(stream) {
                        Ok(conn) => { tokio::spawn(handle_connection(system.clone(), conn)); }
                        Err(error) => warn!("Dropping connection {addr}: {error}"),
                    }
                }
                Err(error) => warn!("System {} failed to accept: {error}", system.name()),
            }
        }
    }
    info!("System {} closed", system.name());
}

async fn handle_connection(system: System, conn: Connection) {
    let mut closed = system.inner.closed.subscribe();
    loop {
        let request = tokio::select! {
            _ = closed.changed() => break,
            request = conn.receive::<Request>() => request,
        };
        let Ok(request) = request else { break };
        if conn.send(&system.handle(request)).await.is_err() {
            break;
        }
    }
}

/// Keeps the qpmd registration alive. The system is closed as soon as a heartbeat fails.
pub(crate) async fn heartbeat(system: System, client: QpmdClient, interval: Duration) {
    let mut closed = system.inner.closed.subscribe();
    if system.is_closed() {
        return;
    }
    loop {
        tokio::select! {
            _ = closed.changed() => break,
            _ = tokio::time::sleep(interval) => {
                if let Err(error) = client.heartbeat().await {
                    error!("qpmd heartbeat failed, closing system {}: {error:#}", system.name());
                    system.close();
                    break;
                }
            }
        }
    }
}

/// A system living on another machine.
#[derive(Clone, Debug)]
pub struct RemoteSystem {
    name: String,
    machine: MachineDescriptor,
    port: u16,
}

impl RemoteSystem {
    pub(crate) fn new(name: &str, machine: MachineDescriptor, port: u16) -> Self {
        Self {
            name: name.to_string(),
            machine,
            port,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn machine(&self) -> &MachineDescriptor {
        &self.machine
    }

    async fn request(&self, request: &Request) -> Result<Response> {
        let conn = Connection::connect((self.machine.address.as_str(), self.port)).await?;
        conn.request(request).await
    }

    pub(crate) async fn hello(&self, local: &MachineDescriptor) -> Result<()> {
        let hello = Request::Hello {
            machine_id: local.machine_id.clone(),
            message_gateway_port: local.message_gateway_port,
            general_purpose_port: local.general_purpose_port,
        };
        match self.request(&hello).await? {
            Response::Ok => Ok(()),
            other => bail!("System {} refused hello: {other:?}", self.name),
        }
    }

    /// Resolves the pid exposed under `handler`.
    pub async fn remote(&self, handler: &str) -> Result<Pid> {
        let lookup = Request::Lookup {
            handler: handler.to_string(),
        };
        match self.request(&lookup).await? {
            Response::Pid(pid) => Ok(pid),
            Response::Error(error) => bail!("Lookup of {handler} on {} failed: {error}", self.name),
            other => bail!("Unexpected answer to lookup: {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_strings() {
        assert_eq!(
            parse_connection_string("printer@127.0.0.1").unwrap(),
            ("printer", "127.0.0.1")
        );
        assert_eq!(
            parse_connection_string("a_b@host.example:1").unwrap(),
            ("a_b", "host.example:1")
        );
        assert!(parse_connection_string("no-at-sign").is_err());
        assert!(parse_connection_string("@host").is_err());
        assert!(parse_connection_string("bad name@host").is_err());
    }

    #[test]
    fn lookups_answer_with_registered_handlers() {
        let system = System::new("test", 0);
        let pid = Pid::new("machine", "1");
        system.handle_remote("printer", pid.clone());
        assert_eq!(
            system.handle(Request::Lookup {
                handler: "printer".into()
            }),
            Response::Pid(pid)
        );
        assert!(matches!(
            system.handle(Request::Lookup {
                handler: "missing".into()
            }),
            Response::Error(_)
        ));
        assert!(matches!(
            system.handle(Request::Quit { pid_id: "1".into() }),
            Response::Error(_)
        ));
    }
}
