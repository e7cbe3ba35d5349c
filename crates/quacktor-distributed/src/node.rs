use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use log::{debug, info, trace, warn};
use quacktor_process::{Abortable, Environment, Machine, MachineDescriptor, Message, Pid};
use tokio::{net::TcpListener, sync::watch};

use crate::{
    connection::Connection,
    encoding::{MessageEncoder, MsgpackEncoder},
    machine::RemoteMachine,
    message::{MessageFrame, Request, Response},
    qpmd::{self, QpmdClient},
    system::{parse_connection_string, RemoteSystem, System},
};

#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Interface the gateways and system servers listen on.
    pub bind_host: String,
    /// Address other machines should use to reach this one.
    pub advertise_host: String,
    /// `0` lets the OS pick a port.
    pub message_gateway_port: u16,
    pub general_purpose_port: u16,
    pub qpmd_host: String,
    pub qpmd_port: u16,
    pub heartbeat_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            advertise_host: "127.0.0.1".to_string(),
            message_gateway_port: 0,
            general_purpose_port: 0,
            qpmd_host: "127.0.0.1".to_string(),
            qpmd_port: qpmd::DEFAULT_PORT,
            heartbeat_interval: Duration::from_secs(25),
        }
    }
}

/// Makes the actors of an environment reachable from other machines and vice versa.
///
/// A node runs two gateways. The message gateway accepts [`MessageFrame`]s and delivers them to
/// local actors. The general-purpose gateway accepts [`Request`]s: after a `hello` it connects back
/// to the caller and introduces it to every other machine it knows, so that all machines end up
/// connected to each other.
#[derive(Clone)]
pub struct Node {
    inner: Arc<InnerNode>,
}

struct InnerNode {
    env: Environment,
    config: NodeConfig,
    encoder: Arc<dyn MessageEncoder>,
    descriptor: MachineDescriptor,
    shutdown: watch::Sender<bool>,
}

impl Node {
    pub async fn start(env: Environment, config: NodeConfig) -> Result<Self> {
        Self::start_with_encoder(env, config, Arc::new(MsgpackEncoder)).await
    }

    pub async fn start_with_encoder(
        env: Environment,
        config: NodeConfig,
        encoder: Arc<dyn MessageEncoder>,
    ) -> Result<Self> {
        let message_listener =
            TcpListener::bind((config.bind_host.as_str(), config.message_gateway_port))
                .await
                .context("Could not bind the message gateway")?;
        let gp_listener =
            TcpListener::bind((config.bind_host.as_str(), config.general_purpose_port))
                .await
                .context("Could not bind the general-purpose gateway")?;
        let descriptor = MachineDescriptor {
            machine_id: env.machine_id().to_string(),
            address: config.advertise_host.clone(),
            message_gateway_port: message_listener.local_addr()?.port(),
            general_purpose_port: gp_listener.local_addr()?.port(),
        };
        info!(
            "Machine {} listening for messages on {} and requests on {}",
            descriptor.machine_id, descriptor.message_gateway_port, descriptor.general_purpose_port
        );
        let (shutdown, _) = watch::channel(false);
        let node = Node {
            inner: Arc::new(InnerNode {
                env,
                config,
                encoder,
                descriptor,
                shutdown,
            }),
        };
        tokio::spawn(message_gateway(node.clone(), message_listener));
        tokio::spawn(gp_gateway(node.clone(), gp_listener));
        Ok(node)
    }

    pub fn env(&self) -> &Environment {
        &self.inner.env
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// How other machines reach this one.
    pub fn descriptor(&self) -> &MachineDescriptor {
        &self.inner.descriptor
    }

    pub(crate) fn stop_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Connects to a machine, unless it's already known.
    ///
    /// The machine is registered with the environment before dialing, so concurrent attempts to
    /// reach the same machine share one pair of connections.
    pub async fn connect_machine(&self, descriptor: MachineDescriptor) -> Result<Arc<dyn Machine>> {
        let env = self.env();
        if descriptor.machine_id == env.machine_id() {
            bail!("Machine {} is the local machine", descriptor.machine_id);
        }
        if let Some(existing) = env.machine(&descriptor.machine_id) {
            return Ok(existing);
        }
        let machine = RemoteMachine::new(
            descriptor.clone(),
            env.clone(),
            self.inner.encoder.clone(),
        );
        if let Err(existing) = env.try_register_machine(machine.clone()) {
            return Ok(existing);
        }
        let connected = self
            .dial(&descriptor)
            .await
            .and_then(|(messages, requests)| machine.start(messages, requests));
        match connected {
            Ok(()) => {
                info!(
                    "Connected to machine {} at {}",
                    descriptor.machine_id, descriptor.address
                );
                #[cfg(feature = "metrics")]
                metrics::increment_counter!("quacktor.machine.connected");
                Ok(machine as Arc<dyn Machine>)
            }
            Err(error) => {
                machine.teardown();
                Err(error.context(format!(
                    "Could not connect to machine {} at {}",
                    descriptor.machine_id, descriptor.address
                )))
            }
        }
    }

    async fn dial(&self, descriptor: &MachineDescriptor) -> Result<(Connection, Connection)> {
        let address = descriptor.address.as_str();
        let messages = Connection::connect((address, descriptor.message_gateway_port)).await?;
        let requests = Connection::connect((address, descriptor.general_purpose_port)).await?;
        let local = self.descriptor();
        let hello = Request::Hello {
            machine_id: local.machine_id.clone(),
            message_gateway_port: local.message_gateway_port,
            general_purpose_port: local.general_purpose_port,
        };
        match requests.request::<_, Response>(&hello).await? {
            Response::Ok => Ok((messages, requests)),
            other => Err(anyhow!("hello was refused: {other:?}")),
        }
    }

    /// Connects to a machine that just introduced itself, and introduces it to everyone else.
    async fn propagate(&self, descriptor: MachineDescriptor) {
        let env = self.env();
        if descriptor.machine_id == env.machine_id() || env.machine(&descriptor.machine_id).is_some()
        {
            return;
        }
        match self.connect_machine(descriptor.clone()).await {
            Ok(_) => {
                for other in env.machines() {
                    if other.machine_id() != descriptor.machine_id {
                        other.introduce(&descriptor);
                    }
                }
            }
            Err(error) => warn!("{error:#}"),
        }
    }

    /// Decodes a frame of the message gateway and delivers it locally.
    fn deliver(&self, frame: MessageFrame) -> Result<()> {
        let env = self.env();
        let wire = self.inner.encoder.decode(&frame.message)?;
        let message = env.types().decode(wire)?;
        #[cfg(feature = "metrics")]
        metrics::increment_counter!("quacktor.message.remote_received");
        let to = Pid::new(env.machine_id(), frame.to);
        if frame.monitor {
            let Message::Down { who } = &message else {
                bail!("Monitor frame for {to} carries a {}", message.type_name());
            };
            let retired = env
                .machine(who.machine_id())
                .map(|machine| machine.retire_monitor(&to, who))
                .unwrap_or(false);
            if !retired {
                trace!("Dropping down message of {who} for {to}, the monitor is gone");
                return Ok(());
            }
        }
        env.send(&to, message);
        Ok(())
    }

    fn handle_request(&self, request: Request, monitors: &mut PeerMonitors) {
        let env = self.env();
        match request {
            Request::Quit { pid_id } => env.kill(&Pid::new(env.machine_id(), pid_id)),
            Request::Monitor { from, to } if to.is_local_to(env.machine_id()) => {
                let monitor = env.monitor(&from, &to);
                monitors.insert(env, from, to, monitor);
            }
            Request::Demonitor { from, to } if to.is_local_to(env.machine_id()) => {
                monitors.remove(&from, &to);
                env.demonitor(&to, &from)
            }
            Request::NewConnection { machine } => {
                let node = self.clone();
                tokio::spawn(async move { node.propagate(machine).await });
            }
            request => warn!("Ignoring unexpected {} request", request.kind()),
        }
    }

    /// Registers a named system with qpmd, see [`System`].
    pub async fn new_system(&self, name: &str) -> Result<System> {
        let config = self.config();
        let listener = TcpListener::bind((config.bind_host.as_str(), 0)).await?;
        let port = listener.local_addr()?.port();
        let client = QpmdClient::connect(&config.qpmd_host, config.qpmd_port).await?;
        client.hello(self.descriptor()).await?;
        client
            .register(name, port, self.env().machine_id())
            .await
            .with_context(|| format!("Could not register system {name}"))?;
        info!("System {name} registered on port {port}");
        let system = System::new(name, port);
        tokio::spawn(crate::system::serve(system.clone(), listener));
        tokio::spawn(crate::system::heartbeat(
            system.clone(),
            client,
            config.heartbeat_interval,
        ));
        Ok(system)
    }

    /// Connects to the system named by `connection_string` (`<system>@<host>`).
    pub async fn connect(&self, connection_string: &str) -> Result<RemoteSystem> {
        let (system, host) = parse_connection_string(connection_string)?;
        let client = QpmdClient::connect(host, self.config().qpmd_port)
            .await
            .with_context(|| format!("Could not reach qpmd at {host}"))?;
        let (mut machine, port) = client.lookup(system).await?;
        machine.address = host.to_string();
        if machine.machine_id != self.env().machine_id() {
            self.connect_machine(machine.clone()).await?;
        }
        let remote = RemoteSystem::new(system, machine, port);
        remote.hello(self.descriptor()).await?;
        Ok(remote)
    }

    /// Stops both gateways and disconnects from every machine.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        for machine in self.env().machines() {
            machine.disconnect();
        }
    }
}

/// Monitors a peer holds on local actors, released together with the peer's connection.
#[derive(Default)]
struct PeerMonitors {
    monitors: HashMap<(Pid, Pid), Box<dyn Abortable>>,
    prune_at: usize,
}

impl PeerMonitors {
    const MIN_PRUNE: usize = 64;

    fn insert(&mut self, env: &Environment, from: Pid, to: Pid, monitor: Box<dyn Abortable>) {
        // Monitors of dead actors already fired.
        if self.monitors.len() >= self.prune_at.max(Self::MIN_PRUNE) {
            self.monitors.retain(|(_, to), _| env.is_alive(to));
            self.prune_at = self.monitors.len() * 2;
        }
        self.monitors.insert((from, to), monitor);
    }

    fn remove(&mut self, from: &Pid, to: &Pid) {
        self.monitors.remove(&(from.clone(), to.clone()));
    }

    fn len(&self) -> usize {
        self.monitors.len()
    }

    fn release(&mut self) {
        for (_, monitor) in self.monitors.drain() {
            monitor.abort();
        }
    }
}

async fn message_gateway(node: Node, listener: TcpListener) {
    let mut stop = node.stop_signal();
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New message connection {addr}");
                    match Connection::new(stream) {
                        Ok(conn) => { tokio::spawn(handle_message_connection(node.clone(), conn)); }
                        Err(error) => warn!("Dropping message connection {addr}: {error}"),
                    }
                }
                Err(error) => warn!("Message gateway failed to accept: {error}"),
            }
        }
    }
}

async fn handle_message_connection(node: Node, conn: Connection) {
    let mut stop = node.stop_signal();
    loop {
        let frame = tokio::select! {
            _ = stop.changed() => break,
            frame = conn.receive::<MessageFrame>() => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                debug!("Message connection {} closed: {error}", conn.peer_addr());
                break;
            }
        };
        // A frame that can't be decoded leaves the stream in an unknown state.
        if let Err(error) = node.deliver(frame) {
            warn!(
                "Closing message connection {}: {error:#}",
                conn.peer_addr()
            );
            break;
        }
    }
}

async fn gp_gateway(node: Node, listener: TcpListener) {
    let mut stop = node.stop_signal();
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection {addr}");
                    match Connection::new(stream) {
                        Ok(conn) => { tokio::spawn(handle_gp_connection(node.clone(), conn)); }
                        Err(error) => warn!("Dropping connection {addr}: {error}"),
                    }
                }
                Err(error) => warn!("General-purpose gateway failed to accept: {error}"),
            }
        }
    }
}

async fn handle_gp_connection(node: Node, conn: Connection) {
    let mut stop = node.stop_signal();
    let hello = tokio::select! {
        _ = stop.changed() => return,
        hello = conn.receive::<Request>() => hello,
    };
    let descriptor = match hello {
        Ok(Request::Hello {
            machine_id,
            message_gateway_port,
            general_purpose_port,
        }) => MachineDescriptor {
            machine_id,
            address: conn.peer_addr().ip().to_string(),
            message_gateway_port,
            general_purpose_port,
        },
        Ok(request) => {
            let reason = format!("expected hello, got {}", request.kind());
            let _ = conn.send(&Response::Error(reason)).await;
            return;
        }
        Err(error) => {
            debug!("Connection {} closed before hello: {error}", conn.peer_addr());
            return;
        }
    };
    if conn.send(&Response::Ok).await.is_err() {
        return;
    }
    node.propagate(descriptor.clone()).await;

    let mut monitors = PeerMonitors::default();
    loop {
        let request = tokio::select! {
            _ = stop.changed() => break,
            request = conn.receive::<Request>() => request,
        };
        match request {
            Ok(request) => node.handle_request(request, &mut monitors),
            Err(error) => {
                debug!(
                    "Connection of machine {} closed: {error}",
                    descriptor.machine_id
                );
                break;
            }
        }
    }
    debug!(
        "Releasing {} monitors of machine {}",
        monitors.len(),
        descriptor.machine_id
    );
    monitors.release();
    // The peer stopped talking to us, stop talking to it as well.
    if let Some(machine) = node.env().machine(&descriptor.machine_id) {
        machine.disconnect();
    }
}
