use anyhow::Result;
use quacktor_process::{Actor, ActorTemplate, Context, Environment, Message, Pid};
use uuid::Uuid;

use super::{
    relay::Relay,
    supervisor::{Strategy, Supervisor},
};

/// A [`Supervisor`] whose children are reached through stable pids.
///
/// Every child is registered under a generated name and fronted by a [`Relay`]. The relays are
/// spawned right away and keep their pids across restarts of the children behind them. Messages
/// sent to a relay before the supervisor is spawned are dropped. A dynamic supervisor that is
/// dropped without being spawned kills its relays.
///
/// ```ignore
/// let supervisor = DynamicSupervisor::new(&env, Strategy::OneForOne, vec![worker]);
/// let workers = supervisor.relays().to_vec();
/// env.spawn(supervisor);
/// ```
pub struct DynamicSupervisor {
    env: Environment,
    supervisor: Supervisor,
    relays: Vec<Pid>,
    started: bool,
}

impl DynamicSupervisor {
    pub fn new<I>(env: &Environment, strategy: Strategy, templates: I) -> Self
    where
        I: IntoIterator<Item = ActorTemplate>,
    {
        let mut supervisor = Supervisor::new(strategy);
        let mut relays = Vec::new();
        for template in templates {
            let name = Uuid::new_v4().to_string();
            relays.push(env.spawn(Relay::new(name.clone())));
            supervisor = supervisor.child(name, template);
        }
        Self {
            env: env.clone(),
            supervisor,
            relays,
            started: false,
        }
    }

    /// One relay per child, in the order the templates were given.
    pub fn relays(&self) -> &[Pid] {
        &self.relays
    }
}

impl Actor for DynamicSupervisor {
    fn init(&mut self, ctx: &mut Context) -> Result<()> {
        self.started = true;
        self.supervisor.init(ctx)
    }

    fn run(&mut self, ctx: &mut Context, message: Message) -> Result<()> {
        self.supervisor.run(ctx, message)
    }

    fn terminate(&mut self, ctx: &Context) {
        self.supervisor.terminate(ctx);
        for relay in &self.relays {
            ctx.kill(relay);
        }
    }
}

impl Drop for DynamicSupervisor {
    fn drop(&mut self) {
        // Spawned ones kill their relays on termination.
        if !self.started {
            for relay in &self.relays {
                self.env.kill(relay);
            }
        }
    }
}
