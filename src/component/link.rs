use anyhow::Result;
use log::debug;
use quacktor_process::{Abortable, Actor, Context, Message, Pid};

/// Ties the lifetimes of two actors together.
///
/// Once either of them stops, the link kills the other one and stops as well.
pub struct Link {
    first: Pid,
    second: Pid,
    monitors: Option<(Box<dyn Abortable>, Box<dyn Abortable>)>,
}

impl Link {
    pub fn new(first: Pid, second: Pid) -> Self {
        Self {
            first,
            second,
            monitors: None,
        }
    }
}

impl Actor for Link {
    fn init(&mut self, ctx: &mut Context) -> Result<()> {
        self.monitors = Some((ctx.monitor(&self.first), ctx.monitor(&self.second)));
        Ok(())
    }

    fn run(&mut self, ctx: &mut Context, message: Message) -> Result<()> {
        let Message::Down { who } = message else {
            return Ok(());
        };
        let Some((first_monitor, second_monitor)) = self.monitors.take() else {
            return Ok(());
        };
        let survivor = if who == self.first {
            second_monitor.abort();
            &self.second
        } else if who == self.second {
            first_monitor.abort();
            &self.first
        } else {
            self.monitors = Some((first_monitor, second_monitor));
            return Ok(());
        };
        debug!("{who} stopped, link {} kills {survivor}", ctx.self_pid());
        ctx.kill(survivor);
        ctx.quit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quacktor_process::{Environment, Message};

    use super::Link;

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition was not reached in time");
    }

    #[tokio::test]
    async fn either_side_takes_the_other_down() {
        let env = Environment::new();
        for kill_first in [true, false] {
            let a = env.spawn_fn(|_, _| Ok(()));
            let b = env.spawn_fn(|_, _| Ok(()));
            let link = env.spawn(Link::new(a.clone(), b.clone()));
            let (dead, survivor) = if kill_first { (&a, &b) } else { (&b, &a) };

            // Unrelated messages don't matter.
            env.send(&link, Message::Empty);
            env.send(&link, Message::down(env.root_context().self_pid().clone()));

            env.kill(dead);
            eventually(|| !env.is_alive(survivor)).await;
            eventually(|| !env.is_alive(&link)).await;
        }
        assert!(env.is_empty());
    }

    #[tokio::test]
    async fn linking_a_dead_actor_is_immediate() {
        let env = Environment::new();
        let dead = env.spawn_with_init(
            |ctx| {
                ctx.quit();
                Ok(())
            },
            |_, _| Ok(()),
        );
        eventually(|| !env.is_alive(&dead)).await;
        let alive = env.spawn_fn(|_, _| Ok(()));
        let link = env.spawn(Link::new(dead, alive.clone()));
        eventually(|| !env.is_alive(&alive) && !env.is_alive(&link)).await;
    }
}
