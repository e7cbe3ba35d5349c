pub mod abortable;
pub mod actor;
pub mod context;
pub mod env;
pub mod machine;
pub mod mailbox;
pub mod message;
pub mod pid;
pub mod register;

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::{anyhow, Result};
use log::{debug, trace, warn};
use tokio::sync::{
    mpsc::{UnboundedReceiver, UnboundedSender},
    oneshot,
};

pub use crate::abortable::Abortable;
pub use crate::actor::{template, Actor, ActorTemplate, FnActor};
pub use crate::context::Context;
pub use crate::env::Environment;
pub use crate::machine::{Machine, MachineDescriptor};
pub use crate::mailbox::Mailbox;
pub use crate::message::{Message, MessageType};
pub use crate::pid::Pid;

/// Signals can be sent to actors to interact with them.
pub enum Signal {
    // Messages end up in the mailbox and are handed to the actor's `run` hook.
    Message(Message),
    // When received, the actor should stop immediately.
    Quit,
    // The contained pid wants a down message once this actor is gone.
    Monitor(Pid),
    // The contained pid is not interested in the down message anymore.
    Demonitor(Pid),
}

impl Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => write!(f, "Message({})", message.type_name()),
            Self::Quit => write!(f, "Quit"),
            Self::Monitor(pid) => write!(f, "Monitor({pid})"),
            Self::Demonitor(pid) => write!(f, "Demonitor({pid})"),
        }
    }
}

/// The part of a running actor that other tasks hold on to.
///
/// Messages are pushed straight into the mailbox. All other signals go through an unbounded queue
/// that the actor's engine drains before it takes the next message.
#[derive(Clone)]
pub struct ActorProcess {
    pid: Pid,
    mailbox: Mailbox,
    signal_mailbox: UnboundedSender<Signal>,
}

impl ActorProcess {
    pub(crate) fn new(pid: Pid, mailbox: Mailbox, signal_mailbox: UnboundedSender<Signal>) -> Self {
        Self {
            pid,
            mailbox,
            signal_mailbox,
        }
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Returns `false` if the actor is already shutting down and the signal was dropped.
    pub fn send(&self, signal: Signal) -> bool {
        match signal {
            Signal::Message(message) => self.mailbox.push(message).is_ok(),
            signal => self.signal_mailbox.send(signal).is_ok(),
        }
    }
}

/// The reason an actor stopped.
pub(crate) enum Exit {
    /// The actor asked for it through its context.
    Quit,
    PoisonPill,
    /// A quit signal was received.
    Killed,
    Failed(anyhow::Error),
}

/// Runs `f`, turning a panic into an error.
pub(crate) fn contain<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(anyhow!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown cause"
    }
}

/// Down notifications owed to the monitors of one actor.
///
/// Each armed monitor is backed by a small task waiting for either the actor's death or the
/// monitor's removal, whichever comes first.
struct Monitors {
    env: Environment,
    target: Pid,
    scheduled: HashMap<Pid, Notifier>,
}

struct Notifier {
    fire: oneshot::Sender<()>,
    abort: oneshot::Sender<()>,
}

impl Monitors {
    fn new(env: Environment, target: Pid) -> Self {
        Self {
            env,
            target,
            scheduled: HashMap::new(),
        }
    }

    fn arm(&mut self, watcher: Pid) {
        // A second monitor from the same watcher shares the existing notifier.
        if self.scheduled.contains_key(&watcher) {
            return;
        }
        let (fire, fired) = oneshot::channel();
        let (abort, aborted) = oneshot::channel();
        let env = self.env.clone();
        let target = self.target.clone();
        let notified = watcher.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                Ok(()) = fired => env.notify_down(&notified, target),
                Ok(()) = aborted => {}
                else => {}
            }
        });
        self.scheduled.insert(watcher, Notifier { fire, abort });
    }

    fn disarm(&mut self, watcher: &Pid) {
        if let Some(notifier) = self.scheduled.remove(watcher) {
            let _ = notifier.abort.send(());
        }
    }

    fn fire_all(&mut self) {
        for (_, notifier) in self.scheduled.drain() {
            let _ = notifier.fire.send(());
        }
    }
}

/// The execution loop of an actor.
///
/// 1. Pending signals are handled first. A quit signal ends the loop.
/// 2. Otherwise the next message is taken from the mailbox and handed to the actor's `run` hook.
///    A `PoisonPill` ends the loop without reaching the actor.
///
/// Once the loop ended the actor is removed from the environment, every monitor still armed is
/// notified, and the actor's cleanup code runs. Messages left in the mailbox are dropped.
///
/// `exit` is already set if the actor stopped during its `init` hook.
pub(crate) async fn run(
    mut actor: Box<dyn Actor>,
    mut ctx: Context,
    exit: Option<Exit>,
    mut signal_mailbox: UnboundedReceiver<Signal>,
    message_mailbox: Mailbox,
) {
    let pid = ctx.self_pid().clone();
    let env = ctx.env().clone();
    let mut monitors = Monitors::new(env.clone(), pid.clone());

    let exit = match exit {
        Some(exit) => exit,
        None => loop {
            tokio::select! {
                biased;
                // Handle signals first
                signal = signal_mailbox.recv() => {
                    match signal {
                        Some(Signal::Message(message)) => { let _ = message_mailbox.push(message); },
                        Some(Signal::Monitor(watcher)) => monitors.arm(watcher),
                        Some(Signal::Demonitor(watcher)) => monitors.disarm(&watcher),
                        Some(Signal::Quit) => break Exit::Killed,
                        // The environment dropped its handle, nobody can reach this actor anymore.
                        None => break Exit::Killed,
                    }
                }
                message = message_mailbox.pop() => {
                    match message {
                        Some(Message::PoisonPill) => break Exit::PoisonPill,
                        Some(message) => match contain(|| actor.run(&mut ctx, message)) {
                            Ok(()) if ctx.is_quitting() => break Exit::Quit,
                            Ok(()) => {}
                            Err(error) => break Exit::Failed(error),
                        },
                        None => break Exit::Killed,
                    }
                }
            }
        },
    };

    env.remove_process(pid.id());
    // Monitor requests that were queued before the close still get their notification.
    signal_mailbox.close();
    while let Ok(signal) = signal_mailbox.try_recv() {
        match signal {
            Signal::Monitor(watcher) => monitors.arm(watcher),
            Signal::Demonitor(watcher) => monitors.disarm(&watcher),
            Signal::Message(_) | Signal::Quit => {}
        }
    }

    match &exit {
        Exit::Quit | Exit::PoisonPill => debug!(
            "Actor {pid} quit, notifying: {} monitors",
            monitors.scheduled.len()
        ),
        Exit::Killed => debug!(
            "Actor {pid} was killed, notifying: {} monitors",
            monitors.scheduled.len()
        ),
        Exit::Failed(error) => warn!(
            "Actor {pid} failed, notifying: {} monitors: {error:#}",
            monitors.scheduled.len()
        ),
    }
    monitors.fire_all();

    let dropped = message_mailbox.close();
    if dropped > 0 {
        debug!("Actor {pid} dropped {dropped} unhandled messages");
        #[cfg(feature = "metrics")]
        metrics::counter!("quacktor.actor.dropped_messages", dropped as u64);
    }

    if let Err(error) = contain(|| {
        actor.terminate(&ctx);
        Ok(())
    }) {
        warn!("Actor {pid} failed during termination: {error:#}");
    }
    for action in ctx.take_deferred() {
        if let Err(error) = contain(|| {
            action(&ctx);
            Ok(())
        }) {
            warn!("Deferred action of actor {pid} failed: {error:#}");
        }
    }

    trace!("Actor {pid} terminated");
    #[cfg(feature = "metrics")]
    metrics::increment_counter!("quacktor.actor.died");
}
