use std::time::Duration;

use crate::{
    abortable::{Abortable, SendAfterAbortable},
    actor::Actor,
    env::Environment,
    message::Message,
    pid::Pid,
};

pub(crate) type Deferred = Box<dyn FnOnce(&Context) + Send>;

/// Capabilities of a single actor.
///
/// Every hook of an [`Actor`] receives the context of the actor it is running in. Sends issued
/// through the same context reach each target in the order they were made.
pub struct Context {
    env: Environment,
    pid: Pid,
    quit: bool,
    deferred: Vec<Deferred>,
}

impl Context {
    pub(crate) fn new(env: Environment, pid: Pid) -> Self {
        Self {
            env,
            pid,
            quit: false,
            deferred: Vec::new(),
        }
    }

    pub fn self_pid(&self) -> &Pid {
        &self.pid
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Returns once the message is queued at the target (or dropped because the target is gone).
    pub fn send(&self, to: &Pid, message: Message) {
        self.env.send(to, message);
    }

    /// Sends `message` to `to` once `delay` elapsed, unless aborted before.
    pub fn send_after(&self, to: &Pid, message: Message, delay: Duration) -> Box<dyn Abortable> {
        let env = self.env.clone();
        let to = to.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            env.send(&to, message);
        });
        Box::new(SendAfterAbortable::new(handle))
    }

    /// Delivers a down message to this actor once `pid` is gone.
    pub fn monitor(&self, pid: &Pid) -> Box<dyn Abortable> {
        self.env.monitor(&self.pid, pid)
    }

    /// Delivers a disconnect message to this actor once the connection to the machine is lost.
    pub fn monitor_machine(&self, machine_id: &str) -> Box<dyn Abortable> {
        self.env.monitor_machine(&self.pid, machine_id)
    }

    pub fn kill(&self, pid: &Pid) {
        self.env.kill(pid);
    }

    /// Stops the actor after the currently running hook returns.
    pub fn quit(&mut self) {
        self.quit = true;
    }

    pub fn is_quitting(&self) -> bool {
        self.quit
    }

    /// Registers an action that runs after the actor stopped.
    ///
    /// Actions run in registration order. A panicking action doesn't prevent the others.
    pub fn defer<F>(&mut self, action: F)
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        self.deferred.push(Box::new(action));
    }

    pub fn spawn<A: Actor>(&self, actor: A) -> Pid {
        self.env.spawn(actor)
    }

    pub fn spawn_fn<R>(&self, run: R) -> Pid
    where
        R: FnMut(&mut Context, Message) -> anyhow::Result<()> + Send + 'static,
    {
        self.env.spawn_fn(run)
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<Deferred> {
        std::mem::take(&mut self.deferred)
    }
}
