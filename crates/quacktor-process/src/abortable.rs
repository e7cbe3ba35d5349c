use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;

use crate::{env::Environment, pid::Pid};

/// Cancels an effect that was scheduled to happen in the future.
///
/// Calling `abort()` more than once, or after the effect already happened, does nothing.
pub trait Abortable: Send + Sync {
    fn abort(&self);
}

/// Returned when there is nothing left to cancel, e.g. the down notification was already sent.
pub struct NoopAbortable;

impl Abortable for NoopAbortable {
    fn abort(&self) {}
}

/// Removes a monitor from a local actor.
///
/// The demonitor request travels through the same signal queue as the monitor request and the
/// quit signal, so the target either handles it before dying (no notification) or after its
/// teardown already fired the notification (abort is ignored).
pub struct MonitorAbortable {
    env: Environment,
    target: Pid,
    watcher: Pid,
    aborted: AtomicBool,
}

impl MonitorAbortable {
    pub(crate) fn new(env: Environment, target: Pid, watcher: Pid) -> Self {
        Self {
            env,
            target,
            watcher,
            aborted: AtomicBool::new(false),
        }
    }
}

impl Abortable for MonitorAbortable {
    fn abort(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.env.demonitor(&self.target, &self.watcher);
    }
}

/// Cancels a delayed send.
pub struct SendAfterAbortable {
    handle: JoinHandle<()>,
}

impl SendAfterAbortable {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }
}

impl Abortable for SendAfterAbortable {
    fn abort(&self) {
        self.handle.abort();
    }
}
