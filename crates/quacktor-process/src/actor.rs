use std::sync::Arc;

use anyhow::Result;

use crate::{context::Context, message::Message};

/// Behaviour of an actor.
///
/// The hooks are called from the actor's own task, one at a time. They should not block for long,
/// a slow hook only delays the actor's own mailbox.
///
/// Returning an error from `init` or `run`, or panicking inside of them, terminates the actor. So
/// does calling [`Context::quit`]. Monitors are notified the same way in every case.
pub trait Actor: Send + 'static {
    /// Runs before the actor handles its first message, on the task that spawned it.
    fn init(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut Context, message: Message) -> Result<()>;

    /// Runs once the actor stopped, before the deferred actions registered through the context.
    fn terminate(&mut self, _ctx: &Context) {}
}

impl Actor for Box<dyn Actor> {
    fn init(&mut self, ctx: &mut Context) -> Result<()> {
        (**self).init(ctx)
    }

    fn run(&mut self, ctx: &mut Context, message: Message) -> Result<()> {
        (**self).run(ctx, message)
    }

    fn terminate(&mut self, ctx: &Context) {
        (**self).terminate(ctx)
    }
}

/// Creates fresh actor instances, e.g. for restarts.
pub type ActorTemplate = Arc<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

pub fn template<A, F>(factory: F) -> ActorTemplate
where
    A: Actor,
    F: Fn() -> A + Send + Sync + 'static,
{
    Arc::new(move || Box::new(factory()) as Box<dyn Actor>)
}

type InitFn = Box<dyn FnMut(&mut Context) -> Result<()> + Send>;
type RunFn = Box<dyn FnMut(&mut Context, Message) -> Result<()> + Send>;

/// An actor without state of its own, built from closures.
pub struct FnActor {
    init: Option<InitFn>,
    run: RunFn,
}

impl FnActor {
    pub fn new<R>(run: R) -> Self
    where
        R: FnMut(&mut Context, Message) -> Result<()> + Send + 'static,
    {
        Self {
            init: None,
            run: Box::new(run),
        }
    }

    pub fn with_init<I, R>(init: I, run: R) -> Self
    where
        I: FnMut(&mut Context) -> Result<()> + Send + 'static,
        R: FnMut(&mut Context, Message) -> Result<()> + Send + 'static,
    {
        Self {
            init: Some(Box::new(init)),
            run: Box::new(run),
        }
    }
}

impl Actor for FnActor {
    fn init(&mut self, ctx: &mut Context) -> Result<()> {
        match self.init.as_mut() {
            Some(init) => init(ctx),
            None => Ok(()),
        }
    }

    fn run(&mut self, ctx: &mut Context, message: Message) -> Result<()> {
        (self.run)(ctx, message)
    }
}
