use std::sync::{
    atomic::{self, AtomicU64},
    Arc,
};

use anyhow::Result;
use dashmap::{mapref::entry::Entry, DashMap};
use log::{debug, info, warn};
use quacktor_process::MachineDescriptor;
use tokio::net::TcpListener;

use crate::connection::Connection;

use super::message::{Request, Response};

#[derive(Clone, Debug)]
struct Registration {
    machine_id: String,
    port: u16,
    connection: u64,
}

#[derive(Clone, Default)]
pub struct QpmdServer {
    inner: Arc<InnerServer>,
}

#[derive(Default)]
struct InnerServer {
    next_connection_id: AtomicU64,
    machines: DashMap<String, MachineDescriptor>,
    systems: DashMap<String, Registration>,
}

impl QpmdServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_connection_id(&self) -> u64 {
        self.inner
            .next_connection_id
            .fetch_add(1, atomic::Ordering::Relaxed)
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            info!("New connection {addr}");
            match Connection::new(stream) {
                Ok(conn) => {
                    tokio::spawn(self.clone().handle_connection(conn));
                }
                Err(error) => warn!("Dropping connection {addr}: {error}"),
            }
        }
    }

    async fn handle_connection(self, conn: Connection) {
        let id = self.next_connection_id();
        while let Ok(request) = conn.receive::<Request>().await {
            debug!("{} request from {}", request.kind(), conn.peer_addr());
            let response = self.handle(id, &conn, request);
            if conn.send(&response).await.is_err() {
                break;
            }
        }
        // Systems live as long as the connection that registered them.
        self.inner.systems.retain(|system, registration| {
            let keep = registration.connection != id;
            if !keep {
                info!("System {system} unregistered");
            }
            keep
        });
    }

    fn handle(&self, connection: u64, conn: &Connection, request: Request) -> Response {
        match request {
            Request::Hello {
                machine_id,
                message_gateway_port,
                general_purpose_port,
            } => {
                let machine = MachineDescriptor {
                    machine_id: machine_id.clone(),
                    address: conn.peer_addr().ip().to_string(),
                    message_gateway_port,
                    general_purpose_port,
                };
                self.inner.machines.insert(machine_id, machine);
                Response::Ok
            }
            Request::Register {
                system,
                port,
                machine_id,
            } => {
                if !self.inner.machines.contains_key(&machine_id) {
                    return Response::Error(format!("Unknown machine {machine_id}"));
                }
                match self.inner.systems.entry(system) {
                    Entry::Occupied(entry) if entry.get().connection != connection => {
                        Response::Error(format!("System {} is already registered", entry.key()))
                    }
                    entry => {
                        info!("System {} registered by machine {machine_id}", entry.key());
                        entry.insert(Registration {
                            machine_id,
                            port,
                            connection,
                        });
                        Response::Ok
                    }
                }
            }
            Request::Heartbeat => Response::Ok,
            Request::Lookup { system } => {
                let Some(registration) = self.inner.systems.get(&system).map(|x| x.clone()) else {
                    return Response::Error(format!("Unknown system {system}"));
                };
                match self.inner.machines.get(&registration.machine_id) {
                    Some(machine) => Response::Lookup {
                        machine: machine.clone(),
                        port: registration.port,
                    },
                    None => Response::Error(format!("Unknown machine {}", registration.machine_id)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::QpmdServer;
    use crate::qpmd::QpmdClient;
    use quacktor_process::MachineDescriptor;

    #[tokio::test]
    async fn systems_live_as_long_as_their_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(QpmdServer::new().serve(listener));

        let machine = MachineDescriptor {
            machine_id: "machine-a".into(),
            address: "127.0.0.1".into(),
            message_gateway_port: 1,
            general_purpose_port: 2,
        };
        let owner = QpmdClient::connect("127.0.0.1", port).await.unwrap();
        owner.hello(&machine).await.unwrap();
        owner.register("printer", 3, "machine-a").await.unwrap();
        owner.heartbeat().await.unwrap();

        let other = QpmdClient::connect("127.0.0.1", port).await.unwrap();
        let (found, system_port) = other.lookup("printer").await.unwrap();
        assert_eq!(found, machine);
        assert_eq!(system_port, 3);
        assert!(other.register("printer", 4, "machine-a").await.is_err());
        assert!(other.register("scanner", 4, "machine-b").await.is_err());

        drop(owner);
        let mut gone = false;
        for _ in 0..100 {
            if other.lookup("printer").await.is_err() {
                gone = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(gone, "system outlived its connection");
    }
}
