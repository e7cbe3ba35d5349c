use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, Weak,
};

use anyhow::{anyhow, bail, Result};
use log::{debug, info, warn};
use quacktor_process::{Abortable, Environment, Machine, MachineDescriptor, Message, Pid};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::{
    connection::{serialize_frame, Connection},
    encoding::MessageEncoder,
    message::{MessageFrame, Request},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Connecting,
    Connected,
    Down,
}

/// Bookkeeping that is touched by actors and by the connection tasks, always under one lock.
struct MachineState {
    status: Status,
    /// Actors waiting for a disconnect message.
    watchers: HashSet<Pid>,
    /// `(from, to)`: local actor `from` monitors actor `to` hosted on this machine.
    links: HashSet<(Pid, Pid)>,
    tasks: Vec<JoinHandle<()>>,
}

struct Queues {
    /// Serialized [`MessageFrame`]s.
    messages: UnboundedReceiver<Vec<u8>>,
    requests: UnboundedReceiver<Request>,
}

/// A machine reached over a message connection and a general-purpose connection.
///
/// Both connections are owned by a writer task each. The tasks also watch their socket and tear
/// the machine down as soon as one of them fails. Teardown happens once: the machine is removed
/// from the environment, every watcher gets a disconnect message and every monitor still waiting
/// on an actor of this machine gets a down message.
pub struct RemoteMachine {
    descriptor: MachineDescriptor,
    env: Environment,
    encoder: Arc<dyn MessageEncoder>,
    this: Weak<RemoteMachine>,
    state: Mutex<MachineState>,
    messages: UnboundedSender<Vec<u8>>,
    requests: UnboundedSender<Request>,
    queues: Mutex<Option<Queues>>,
}

impl RemoteMachine {
    pub(crate) fn new(
        descriptor: MachineDescriptor,
        env: Environment,
        encoder: Arc<dyn MessageEncoder>,
    ) -> Arc<Self> {
        let (messages, message_queue) = unbounded_channel();
        let (requests, request_queue) = unbounded_channel();
        Arc::new_cyclic(|this| RemoteMachine {
            descriptor,
            env,
            encoder,
            this: this.clone(),
            state: Mutex::new(MachineState {
                status: Status::Connecting,
                watchers: HashSet::new(),
                links: HashSet::new(),
                tasks: Vec::new(),
            }),
            messages,
            requests,
            queues: Mutex::new(Some(Queues {
                messages: message_queue,
                requests: request_queue,
            })),
        })
    }

    fn state(&self) -> MutexGuard<'_, MachineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands both established connections to their writer tasks.
    pub(crate) fn start(self: &Arc<Self>, messages: Connection, requests: Connection) -> Result<()> {
        let queues = self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| anyhow!("Machine {} was already started", self.machine_id()))?;
        let mut state = self.state();
        if state.status == Status::Down {
            bail!("Machine {} went down while connecting", self.machine_id());
        }
        state.status = Status::Connected;
        state.tasks.push(tokio::spawn(write_messages(
            self.clone(),
            messages,
            queues.messages,
        )));
        state.tasks.push(tokio::spawn(write_requests(
            self.clone(),
            requests,
            queues.requests,
        )));
        Ok(())
    }

    fn encode(&self, to: &Pid, message: &Message, monitor: bool) -> Result<Vec<u8>> {
        let wire = message.to_wire()?;
        serialize_frame(&MessageFrame {
            to: to.id().to_string(),
            message: self.encoder.encode(&wire)?,
            monitor,
        })
    }

    /// Encodes on the calling task, a message that can't be encoded is dropped on its own.
    fn queue_message(&self, to: &Pid, message: &Message, monitor: bool) -> bool {
        if self.state().status == Status::Down {
            return false;
        }
        match self.encode(to, message, monitor) {
            Ok(frame) => self.messages.send(frame).is_ok(),
            Err(error) => {
                warn!(
                    "Dropping {} message for {to}, it can't be encoded: {error:#}",
                    message.type_name()
                );
                false
            }
        }
    }

    fn abort_monitor(&self, from: &Pid, to: &Pid) {
        let mut state = self.state();
        if state.links.remove(&(from.clone(), to.clone())) {
            let _ = self.requests.send(Request::Demonitor {
                from: from.clone(),
                to: to.clone(),
            });
        }
    }

    fn abort_connection_monitor(&self, watcher: &Pid) {
        self.state().watchers.remove(watcher);
    }

    pub(crate) fn teardown(&self) {
        let (watchers, links, tasks) = {
            let mut state = self.state();
            if state.status == Status::Down {
                return;
            }
            state.status = Status::Down;
            (
                std::mem::take(&mut state.watchers),
                std::mem::take(&mut state.links),
                std::mem::take(&mut state.tasks),
            )
        };
        self.env.deregister_machine(self);
        info!(
            "Machine {} at {} disconnected, notifying: {} watchers, {} monitors",
            self.descriptor.machine_id,
            self.descriptor.address,
            watchers.len(),
            links.len()
        );
        #[cfg(feature = "metrics")]
        metrics::increment_counter!("quacktor.machine.disconnected");

        for task in tasks {
            task.abort();
        }
        for watcher in watchers {
            self.env.send(
                &watcher,
                Message::Disconnect {
                    machine_id: self.descriptor.machine_id.clone(),
                    address: self.descriptor.address.clone(),
                },
            );
        }
        for (from, to) in links {
            self.env.send(&from, Message::down(to));
        }
    }
}

impl Machine for RemoteMachine {
    fn descriptor(&self) -> &MachineDescriptor {
        &self.descriptor
    }

    fn is_connected(&self) -> bool {
        self.state().status == Status::Connected
    }

    fn send(&self, to: &Pid, message: Message) -> bool {
        self.queue_message(to, &message, false)
    }

    fn notify_down(&self, watcher: &Pid, target: &Pid) -> bool {
        self.queue_message(watcher, &Message::down(target.clone()), true)
    }

    fn kill(&self, pid: &Pid) {
        if self.state().status != Status::Down {
            let _ = self.requests.send(Request::Quit {
                pid_id: pid.id().to_string(),
            });
        }
    }

    fn monitor(&self, from: &Pid, to: &Pid) -> Option<Box<dyn Abortable>> {
        let mut state = self.state();
        if state.status == Status::Down {
            return None;
        }
        if state.links.insert((from.clone(), to.clone())) {
            let _ = self.requests.send(Request::Monitor {
                from: from.clone(),
                to: to.clone(),
            });
        }
        Some(Box::new(RemoteMonitorAbortable {
            machine: self.this.clone(),
            from: from.clone(),
            to: to.clone(),
            aborted: AtomicBool::new(false),
        }))
    }

    fn monitor_connection(&self, watcher: &Pid) -> Option<Box<dyn Abortable>> {
        let mut state = self.state();
        if state.status == Status::Down {
            return None;
        }
        state.watchers.insert(watcher.clone());
        Some(Box::new(ConnectionMonitorAbortable {
            machine: self.this.clone(),
            watcher: watcher.clone(),
            aborted: AtomicBool::new(false),
        }))
    }

    fn retire_monitor(&self, from: &Pid, to: &Pid) -> bool {
        self.state().links.remove(&(from.clone(), to.clone()))
    }

    fn introduce(&self, other: &MachineDescriptor) {
        if self.state().status != Status::Down {
            let _ = self.requests.send(Request::NewConnection {
                machine: other.clone(),
            });
        }
    }

    fn disconnect(&self) {
        self.teardown();
    }
}

/// Removes a monitor on an actor of another machine.
///
/// The link is forgotten right away, a down message that is already on its way is dropped by the
/// gateway because it can't retire the link anymore.
pub struct RemoteMonitorAbortable {
    machine: Weak<RemoteMachine>,
    from: Pid,
    to: Pid,
    aborted: AtomicBool,
}

impl Abortable for RemoteMonitorAbortable {
    fn abort(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(machine) = self.machine.upgrade() {
            machine.abort_monitor(&self.from, &self.to);
        }
    }
}

pub struct ConnectionMonitorAbortable {
    machine: Weak<RemoteMachine>,
    watcher: Pid,
    aborted: AtomicBool,
}

impl Abortable for ConnectionMonitorAbortable {
    fn abort(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(machine) = self.machine.upgrade() {
            machine.abort_connection_monitor(&self.watcher);
        }
    }
}

async fn write_messages(
    machine: Arc<RemoteMachine>,
    conn: Connection,
    mut queue: UnboundedReceiver<Vec<u8>>,
) {
    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(frame) = next else { break };
                if let Err(error) = conn.send_frame(&frame).await {
                    debug!("Message connection to {} failed: {error}", conn.peer_addr());
                    break;
                }
            }
            _ = conn.closed() => break,
        }
    }
    machine.teardown();
}

async fn write_requests(
    machine: Arc<RemoteMachine>,
    conn: Connection,
    mut queue: UnboundedReceiver<Request>,
) {
    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(request) = next else { break };
                if let Err(error) = conn.send(&request).await {
                    debug!(
                        "Sending {} request to {} failed: {error}",
                        request.kind(),
                        conn.peer_addr()
                    );
                    break;
                }
            }
            _ = conn.closed() => break,
        }
    }
    machine.teardown();
}
