use anyhow::Result;
use log::{debug, info};
use quacktor_process::{Abortable, Actor, ActorTemplate, Context, Environment, Message, Pid};

/// What a [`Supervisor`] does once one of its children is gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Restart the child that stopped.
    OneForOne,
    /// Stop every other child and restart all of them.
    AllForOne,
    /// Stop every other child and the supervisor itself.
    FailAll,
}

struct Running {
    pid: Pid,
    monitor: Box<dyn Abortable>,
}

struct Child {
    name: String,
    template: ActorTemplate,
    running: Option<Running>,
}

/// Keeps a fixed set of named children alive.
///
/// Each child is spawned from its template, monitored and registered in the environment's name
/// register, so other actors can reach the current instance by name (see
/// [`Relay`](super::Relay)). Sending [`Message::Kill`] to the supervisor shuts it down gracefully.
/// However it stops, it takes its children down with it.
pub struct Supervisor {
    strategy: Strategy,
    children: Vec<Child>,
}

impl Supervisor {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            children: Vec::new(),
        }
    }

    pub fn with_children<I, S>(strategy: Strategy, children: I) -> Self
    where
        I: IntoIterator<Item = (S, ActorTemplate)>,
        S: Into<String>,
    {
        children
            .into_iter()
            .fold(Self::new(strategy), |supervisor, (name, template)| {
                supervisor.child(name, template)
            })
    }

    /// Adds a child. Children are started in the order they were added.
    pub fn child(mut self, name: impl Into<String>, template: ActorTemplate) -> Self {
        self.children.push(Child {
            name: name.into(),
            template,
            running: None,
        });
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Names of the children, in start order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|child| child.name.as_str())
    }

    fn start(ctx: &Context, child: &mut Child) {
        let pid = ctx.env().spawn_boxed((child.template)());
        let monitor = ctx.monitor(&pid);
        ctx.env().register().set(child.name.clone(), pid.clone());
        debug!("Supervisor {} started {} as {pid}", ctx.self_pid(), child.name);
        child.running = Some(Running { pid, monitor });
    }

    /// Stops a child without being notified about it.
    fn stop(ctx: &Context, child: &mut Child) {
        if let Some(running) = child.running.take() {
            running.monitor.abort();
            ctx.kill(&running.pid);
            release_name(ctx.env(), &child.name, &running.pid);
        }
    }

    fn position(&self, who: &Pid) -> Option<usize> {
        self.children.iter().position(|child| {
            child
                .running
                .as_ref()
                .map(|running| &running.pid == who)
                .unwrap_or(false)
        })
    }

    fn child_down(&mut self, ctx: &mut Context, who: &Pid) {
        let Some(failed) = self.position(who) else {
            // A child that was already replaced.
            return;
        };
        // The monitor fired, there is nothing left to abort.
        self.children[failed].running = None;
        info!(
            "Child {} of supervisor {} stopped, strategy {:?}",
            self.children[failed].name,
            ctx.self_pid(),
            self.strategy
        );

        match self.strategy {
            Strategy::OneForOne => Self::start(ctx, &mut self.children[failed]),
            Strategy::AllForOne => {
                for child in self.children.iter_mut() {
                    Self::stop(ctx, child);
                }
                for child in self.children.iter_mut() {
                    Self::start(ctx, child);
                }
            }
            Strategy::FailAll => {
                release_name(ctx.env(), &self.children[failed].name, who);
                for child in self.children.iter_mut() {
                    Self::stop(ctx, child);
                }
                ctx.quit();
            }
        }
    }
}

/// Drops the name of a stopped child, unless it was rebound in the meantime.
fn release_name(env: &Environment, name: &str, pid: &Pid) {
    env.register().update(name, |current| match current {
        Some(current) if current != pid => Some(current.clone()),
        _ => None,
    });
}

impl Actor for Supervisor {
    fn init(&mut self, ctx: &mut Context) -> Result<()> {
        for child in self.children.iter_mut() {
            Self::start(ctx, child);
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut Context, message: Message) -> Result<()> {
        match message {
            Message::Down { who } => self.child_down(ctx, &who),
            Message::Kill => {
                info!("Shutting down supervisor {}", ctx.self_pid());
                // Queued behind everything that already arrived.
                ctx.send(ctx.self_pid(), Message::PoisonPill);
            }
            _ => {}
        }
        Ok(())
    }

    fn terminate(&mut self, ctx: &Context) {
        for child in self.children.iter_mut() {
            Self::stop(ctx, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::time::Duration;

    use anyhow::Result;
    use quacktor_process::{template, Actor, Context, Environment, Message, Pid};

    use super::{Strategy, Supervisor};

    struct Counted(Arc<AtomicUsize>);

    impl Actor for Counted {
        fn init(&mut self, _: &mut Context) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn run(&mut self, _: &mut Context, _: Message) -> Result<()> {
            Ok(())
        }
    }

    const NAMES: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

    fn supervisor(strategy: Strategy) -> (Supervisor, HashMap<&'static str, Arc<AtomicUsize>>) {
        let mut counters = HashMap::new();
        let mut supervisor = Supervisor::new(strategy);
        for name in NAMES {
            let inits = Arc::new(AtomicUsize::new(0));
            counters.insert(name, inits.clone());
            supervisor = supervisor.child(name, template(move || Counted(inits.clone())));
        }
        (supervisor, counters)
    }

    fn inits(counters: &HashMap<&'static str, Arc<AtomicUsize>>) -> Vec<usize> {
        NAMES
            .iter()
            .map(|name| counters[name].load(Ordering::SeqCst))
            .collect()
    }

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition was not reached in time");
    }

    fn registered(env: &Environment, name: &str) -> Pid {
        env.register().get(name).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn one_for_one_restarts_only_the_failed_child() {
        let env = Environment::new();
        let (supervisor, counters) = supervisor(Strategy::OneForOne);
        env.spawn(supervisor);
        assert_eq!(inits(&counters), vec![1, 1, 1, 1]);

        let mut expected = vec![1, 1, 1, 1];
        for (i, name) in NAMES.iter().enumerate() {
            let old = registered(&env, name);
            env.kill(&old);
            expected[i] = 2;
            eventually(|| inits(&counters) == expected).await;
            eventually(|| registered(&env, name) != old).await;
            assert!(env.is_alive(&registered(&env, name)));
        }
        // No late restarts.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(inits(&counters), vec![2, 2, 2, 2]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn all_for_one_restarts_every_child() {
        let env = Environment::new();
        let (supervisor, counters) = supervisor(Strategy::AllForOne);
        env.spawn(supervisor);
        let before: Vec<Pid> = NAMES.iter().map(|name| registered(&env, name)).collect();

        env.kill(&before[2]);
        eventually(|| inits(&counters) == vec![2, 2, 2, 2]).await;
        for old in &before {
            eventually(|| !env.is_alive(old)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(inits(&counters), vec![2, 2, 2, 2]);
        for name in NAMES {
            assert!(env.is_alive(&registered(&env, name)));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fail_all_takes_everyone_down() {
        let env = Environment::new();
        let (supervisor, counters) = supervisor(Strategy::FailAll);
        let supervisor = env.spawn(supervisor);
        let children: Vec<Pid> = NAMES.iter().map(|name| registered(&env, name)).collect();

        env.kill(&children[0]);
        eventually(|| !env.is_alive(&supervisor)).await;
        for child in &children {
            eventually(|| !env.is_alive(child)).await;
        }
        assert_eq!(inits(&counters), vec![1, 1, 1, 1]);
        assert!(env.register().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn kill_message_shuts_the_supervisor_down() {
        let env = Environment::new();
        let (supervisor, counters) = supervisor(Strategy::OneForOne);
        let supervisor = env.spawn(supervisor);
        let children: Vec<Pid> = NAMES.iter().map(|name| registered(&env, name)).collect();

        env.send(&supervisor, Message::Kill);
        eventually(|| !env.is_alive(&supervisor)).await;
        for child in &children {
            eventually(|| !env.is_alive(child)).await;
        }
        assert_eq!(inits(&counters), vec![1, 1, 1, 1]);
    }
}
