use std::sync::Arc;

use anyhow::Result;
use dashmap::{mapref::entry::Entry, DashMap};
use log::trace;
use tokio::sync::{mpsc::unbounded_channel, Notify};

use crate::{
    abortable::{Abortable, MonitorAbortable, NoopAbortable},
    actor::{Actor, FnActor},
    context::Context,
    contain,
    machine::Machine,
    mailbox::Mailbox,
    message::{Message, MessageType, MessageTypes},
    pid::{new_id, Pid},
    register::Register,
    ActorProcess, Exit, Signal,
};

/// A runtime instance: every actor it hosts and every remote machine it knows about.
///
/// Environments are cheap to clone, all clones refer to the same instance. Several independent
/// environments can live inside of one OS process, each with its own machine id.
#[derive(Clone)]
pub struct Environment {
    machine_id: Arc<str>,
    processes: Arc<DashMap<String, ActorProcess>>,
    machines: Arc<DashMap<String, Arc<dyn Machine>>>,
    types: Arc<MessageTypes>,
    register: Arc<Register>,
    idle: Arc<Notify>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::with_machine_id(new_id())
    }

    pub fn with_machine_id(machine_id: impl Into<String>) -> Self {
        let machine_id: String = machine_id.into();
        Self {
            machine_id: machine_id.into(),
            processes: Arc::new(DashMap::new()),
            machines: Arc::new(DashMap::new()),
            types: Arc::new(MessageTypes::default()),
            register: Arc::new(Register::default()),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn types(&self) -> &MessageTypes {
        &self.types
    }

    /// Shorthand for `types().register::<T>()`.
    pub fn register_type<T: MessageType>(&self) {
        self.types.register::<T>();
    }

    /// Names of actors, see [`Register`].
    pub fn register(&self) -> &Register {
        &self.register
    }

    /// A context for code running outside of any actor.
    ///
    /// Its pid is never registered, messages sent to it are dropped.
    pub fn root_context(&self) -> Context {
        Context::new(self.clone(), Pid::new(self.machine_id(), new_id()))
    }

    /// Spawns an actor.
    ///
    /// The actor is reachable under the returned pid before its `init` hook runs on the calling
    /// task. Its message loop runs on a new tokio task, this needs to be called from inside of a
    /// tokio runtime.
    pub fn spawn<A: Actor>(&self, actor: A) -> Pid {
        self.spawn_boxed(Box::new(actor))
    }

    pub fn spawn_boxed(&self, mut actor: Box<dyn Actor>) -> Pid {
        let pid = Pid::new(self.machine_id(), new_id());
        let (signal_sender, signal_mailbox) = unbounded_channel::<Signal>();
        let message_mailbox = Mailbox::default();
        self.processes.insert(
            pid.id().to_string(),
            ActorProcess::new(pid.clone(), message_mailbox.clone(), signal_sender),
        );
        trace!("Actor {pid} spawned");
        #[cfg(feature = "metrics")]
        metrics::increment_counter!("quacktor.actor.spawned");

        let mut ctx = Context::new(self.clone(), pid.clone());
        let exit = match contain(|| actor.init(&mut ctx)) {
            Ok(()) if ctx.is_quitting() => Some(Exit::Quit),
            Ok(()) => None,
            Err(error) => Some(Exit::Failed(error.context("init failed"))),
        };
        tokio::spawn(crate::run(actor, ctx, exit, signal_mailbox, message_mailbox));
        pid
    }

    /// Spawns an actor that handles every message with `run`.
    pub fn spawn_fn<R>(&self, run: R) -> Pid
    where
        R: FnMut(&mut Context, Message) -> Result<()> + Send + 'static,
    {
        self.spawn(FnActor::new(run))
    }

    pub fn spawn_with_init<I, R>(&self, init: I, run: R) -> Pid
    where
        I: FnMut(&mut Context) -> Result<()> + Send + 'static,
        R: FnMut(&mut Context, Message) -> Result<()> + Send + 'static,
    {
        self.spawn(FnActor::with_init(init, run))
    }

    pub fn get_process(&self, id: &str) -> Option<ActorProcess> {
        self.processes.get(id).map(|x| x.clone())
    }

    pub(crate) fn remove_process(&self, id: &str) {
        self.processes.remove(id);
        if self.processes.is_empty() {
            self.idle.notify_waiters();
        }
    }

    /// Returns `true` if `pid` refers to an actor of this environment that is still running.
    pub fn is_alive(&self, pid: &Pid) -> bool {
        pid.is_local_to(self.machine_id()) && self.processes.contains_key(pid.id())
    }

    /// Number of running actors.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Waits until no actor of this environment is running anymore.
    pub async fn wait(&self) {
        loop {
            let notified = self.idle.notified();
            if self.processes.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Delivers `message` to `to`, wherever it lives.
    ///
    /// Returns after the message was put into the local mailbox or the outgoing queue of the
    /// remote machine. Messages to unknown actors or disconnected machines are dropped.
    ///
    /// # Panics
    ///
    /// If a custom message is sent to another machine without its type being registered.
    pub fn send(&self, to: &Pid, message: Message) {
        if !to.is_local_to(self.machine_id()) {
            self.send_remote(to, message);
            return;
        }
        let delivered = self
            .get_process(to.id())
            .map(|process| process.send(Signal::Message(message)))
            .unwrap_or(false);
        if delivered {
            #[cfg(feature = "metrics")]
            metrics::increment_counter!("quacktor.message.local_sent");
        } else {
            unhandled(to);
        }
    }

    fn send_remote(&self, to: &Pid, message: Message) {
        if let Message::Custom(custom) = &message {
            if !self.types.contains(custom.type_name()) {
                panic!(
                    "message type `{}` must be registered before it's sent to another machine",
                    custom.type_name()
                );
            }
        }
        let queued = self
            .machine(to.machine_id())
            .map(|machine| machine.send(to, message))
            .unwrap_or(false);
        if queued {
            #[cfg(feature = "metrics")]
            metrics::increment_counter!("quacktor.message.remote_sent");
        } else {
            unhandled(to);
        }
    }

    /// Sends the down message of a monitor on `target` to `watcher`.
    pub(crate) fn notify_down(&self, watcher: &Pid, target: Pid) {
        if watcher.is_local_to(self.machine_id()) {
            self.send(watcher, Message::down(target));
            return;
        }
        let queued = self
            .machine(watcher.machine_id())
            .map(|machine| machine.notify_down(watcher, &target))
            .unwrap_or(false);
        if !queued {
            unhandled(watcher);
        }
    }

    /// Asks the actor to stop. It terminates as soon as it's done with the current message.
    pub fn kill(&self, pid: &Pid) {
        if pid.is_local_to(self.machine_id()) {
            if let Some(process) = self.get_process(pid.id()) {
                process.send(Signal::Quit);
            }
        } else if let Some(machine) = self.machine(pid.machine_id()) {
            machine.kill(pid);
        }
    }

    /// Makes `watcher` receive a down message once `target` is gone.
    ///
    /// If `target` is already gone, or lives on a machine that is not connected, the down message
    /// is sent right away.
    pub fn monitor(&self, watcher: &Pid, target: &Pid) -> Box<dyn Abortable> {
        if !target.is_local_to(self.machine_id()) {
            if let Some(machine) = self.machine(target.machine_id()) {
                if let Some(abortable) = machine.monitor(watcher, target) {
                    return abortable;
                }
            }
            self.notify_down(watcher, target.clone());
            return Box::new(NoopAbortable);
        }

        let armed = self
            .get_process(target.id())
            .map(|process| process.send(Signal::Monitor(watcher.clone())))
            .unwrap_or(false);
        if armed {
            Box::new(MonitorAbortable::new(
                self.clone(),
                target.clone(),
                watcher.clone(),
            ))
        } else {
            self.notify_down(watcher, target.clone());
            Box::new(NoopAbortable)
        }
    }

    /// Removes the monitor of `watcher` from the local actor `target`.
    pub fn demonitor(&self, target: &Pid, watcher: &Pid) {
        if let Some(process) = self.get_process(target.id()) {
            process.send(Signal::Demonitor(watcher.clone()));
        }
    }

    /// Makes `watcher` receive a disconnect message once the connection to the machine is lost.
    pub fn monitor_machine(&self, watcher: &Pid, machine_id: &str) -> Box<dyn Abortable> {
        let machine = self.machine(machine_id);
        if let Some(machine) = &machine {
            if let Some(abortable) = machine.monitor_connection(watcher) {
                return abortable;
            }
        }
        let address = machine
            .map(|machine| machine.descriptor().address.clone())
            .unwrap_or_default();
        self.send(
            watcher,
            Message::Disconnect {
                machine_id: machine_id.to_string(),
                address,
            },
        );
        Box::new(NoopAbortable)
    }

    /// Adds a machine unless one with the same id is known already.
    ///
    /// The machine that is registered under the id afterwards is returned as error if it isn't
    /// `machine`.
    pub fn try_register_machine(
        &self,
        machine: Arc<dyn Machine>,
    ) -> std::result::Result<(), Arc<dyn Machine>> {
        match self.machines.entry(machine.machine_id().to_string()) {
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(machine);
                Ok(())
            }
        }
    }

    /// Removes `machine`, but only if it's still the one registered under its id.
    pub fn deregister_machine(&self, machine: &dyn Machine) -> bool {
        self.machines
            .remove_if(machine.machine_id(), |_, registered| {
                std::ptr::addr_eq(Arc::as_ptr(registered), machine)
            })
            .is_some()
    }

    pub fn machine(&self, machine_id: &str) -> Option<Arc<dyn Machine>> {
        self.machines.get(machine_id).map(|x| x.clone())
    }

    pub fn machines(&self) -> Vec<Arc<dyn Machine>> {
        self.machines.iter().map(|x| x.value().clone()).collect()
    }
}

fn unhandled(to: &Pid) {
    trace!("Message to {to} could not be delivered");
    #[cfg(feature = "metrics")]
    metrics::increment_counter!("quacktor.message.unhandled");
}
