use serde::{Deserialize, Serialize};

use crate::{abortable::Abortable, message::Message, pid::Pid};

/// Everything needed to reach a machine over the network.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineDescriptor {
    pub machine_id: String,
    pub address: String,
    pub message_gateway_port: u16,
    pub general_purpose_port: u16,
}

/// A remote runtime instance known to an [`Environment`](crate::env::Environment).
///
/// All operations are non-blocking. They enqueue work for the connections to the machine and
/// report whether the machine was still connected when the work was queued.
pub trait Machine: Send + Sync {
    fn descriptor(&self) -> &MachineDescriptor;

    fn machine_id(&self) -> &str {
        &self.descriptor().machine_id
    }

    fn is_connected(&self) -> bool;

    /// Queues a message for the actor `to` living on this machine.
    fn send(&self, to: &Pid, message: Message) -> bool;

    /// Queues the down message a monitor of the actor `watcher` living on this machine owes it.
    ///
    /// Unlike a down message passed to [`send`](Machine::send), the receiving machine uses it to
    /// resolve the monitor.
    fn notify_down(&self, watcher: &Pid, target: &Pid) -> bool;

    /// Asks the machine to terminate the actor `pid`.
    fn kill(&self, pid: &Pid);

    /// Makes local actor `from` monitor the remote actor `to`.
    ///
    /// Returns `None` if the machine is not connected anymore, in which case the caller is
    /// responsible for the down notification.
    fn monitor(&self, from: &Pid, to: &Pid) -> Option<Box<dyn Abortable>>;

    /// Registers `watcher` to receive a disconnect message when the connection is lost.
    ///
    /// Returns `None` if the connection is already lost.
    fn monitor_connection(&self, watcher: &Pid) -> Option<Box<dyn Abortable>>;

    /// Forgets the monitor of `from` on `to`, because the remote side reported its death.
    ///
    /// Returns `false` if the monitor was aborted or already resolved.
    fn retire_monitor(&self, from: &Pid, to: &Pid) -> bool;

    /// Tells the machine about another machine of the mesh.
    fn introduce(&self, other: &MachineDescriptor);

    /// Closes both connections and tears the machine down.
    fn disconnect(&self);
}
