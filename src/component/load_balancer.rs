use anyhow::Result;
use log::debug;
use quacktor_process::{Abortable, Actor, ActorTemplate, Context, Message, Pid};

struct Instance {
    pid: Pid,
    /// Messages routed to this instance so far.
    routed: u64,
    monitor: Box<dyn Abortable>,
}

/// Scales a pool of identical actors with the load reported by a usage function.
///
/// Every message the load balancer receives is routed to the pooled instance that got the fewest
/// messages so far. Before routing, the pool is resized to
/// `max(1, round((usage - threshold / 2) / threshold) + 1)` instances: new instances are spawned
/// from the template, surplus ones get a [`Message::PoisonPill`], newest first. An instance that
/// stops is replaced right away if the pool is below its size.
///
/// When the load balancer stops, it kills every instance in its pool.
pub struct LoadBalancer {
    threshold: u16,
    template: ActorTemplate,
    usage: Box<dyn Fn() -> u16 + Send>,
    pool: Vec<Instance>,
}

impl LoadBalancer {
    /// A threshold of 0 is treated as 1.
    pub fn new<F>(threshold: u16, template: ActorTemplate, usage: F) -> Self
    where
        F: Fn() -> u16 + Send + 'static,
    {
        Self {
            threshold: threshold.max(1),
            template,
            usage: Box::new(usage),
            pool: Vec::new(),
        }
    }

    /// Pool size for a usage value.
    pub fn required_instances(threshold: u16, usage: u16) -> usize {
        let threshold = f64::from(threshold.max(1));
        let usage = f64::from(usage);
        let required = ((usage - threshold / 2.0) / threshold).round() + 1.0;
        required.max(1.0) as usize
    }

    pub fn pool(&self) -> impl Iterator<Item = &Pid> {
        self.pool.iter().map(|instance| &instance.pid)
    }

    fn scale(&mut self, ctx: &Context) {
        let required = Self::required_instances(self.threshold, (self.usage)());
        let current = self.pool.len();
        if current < required {
            debug!("Load balancer {} grows to {required}", ctx.self_pid());
            for _ in current..required {
                let pid = ctx.env().spawn_boxed((self.template)());
                let monitor = ctx.monitor(&pid);
                self.pool.push(Instance {
                    pid,
                    routed: 0,
                    monitor,
                });
            }
        } else if current > required {
            debug!("Load balancer {} shrinks to {required}", ctx.self_pid());
            for instance in self.pool.drain(required..) {
                instance.monitor.abort();
                ctx.send(&instance.pid, Message::PoisonPill);
            }
        }
    }
}

impl Actor for LoadBalancer {
    fn init(&mut self, ctx: &mut Context) -> Result<()> {
        self.scale(ctx);
        Ok(())
    }

    fn run(&mut self, ctx: &mut Context, message: Message) -> Result<()> {
        if let Message::Down { who } = &message {
            if let Some(index) = self.pool.iter().position(|instance| &instance.pid == who) {
                self.pool.remove(index);
                self.scale(ctx);
                return Ok(());
            }
        }

        self.scale(ctx);
        if let Some(instance) = self.pool.iter_mut().min_by_key(|instance| instance.routed) {
            ctx.send(&instance.pid, message);
            instance.routed += 1;
        }
        Ok(())
    }

    fn terminate(&mut self, ctx: &Context) {
        for instance in self.pool.drain(..) {
            instance.monitor.abort();
            ctx.kill(&instance.pid);
        }
    }
}
