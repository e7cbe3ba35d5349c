use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Result};
use pretty_assertions::assert_eq;
use quacktor::{Actor, Context, Environment, Message, Pid};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

async fn recv<T>(received: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

async fn nothing_more<T: std::fmt::Debug>(received: &mut UnboundedReceiver<T>) {
    let late = tokio::time::timeout(Duration::from_millis(100), received.recv()).await;
    assert!(late.is_err(), "unexpected message {late:?}");
}

/// Forwards every message it receives.
fn forwarder(env: &Environment) -> (Pid, UnboundedReceiver<Message>) {
    let (seen, received) = unbounded_channel();
    let pid = env.spawn_fn(move |_, message| {
        let _ = seen.send(message);
        Ok(())
    });
    (pid, received)
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_from_one_sender_keep_their_order() {
    let env = Environment::new();
    let (seen, mut received) = unbounded_channel();
    let mut expected = ["Hello", "Foo", "Bar"].into_iter().cycle();
    let mut violations = 0usize;
    let mut count = 0usize;
    let target = env.spawn_fn(move |ctx, message| {
        let Message::Generic(value) = message else {
            bail!("unexpected message {}", message.type_name());
        };
        if value != expected.next().unwrap_or_default() {
            violations += 1;
        }
        count += 1;
        if count == 30_000 {
            let _ = seen.send(violations);
            ctx.quit();
        }
        Ok(())
    });

    let ctx = env.root_context();
    for _ in 0..10_000 {
        ctx.send(&target, Message::generic("Hello"));
        ctx.send(&target, Message::generic("Foo"));
        ctx.send(&target, Message::generic("Bar"));
    }
    assert_eq!(recv(&mut received).await, 0);
}

#[tokio::test]
async fn killed_actor_notifies_its_monitor_once() {
    let env = Environment::new();
    let target = env.spawn_fn(|_, _| Ok(()));
    let (watcher, mut received) = forwarder(&env);
    let _monitor = env.monitor(&watcher, &target);
    // A second monitor from the same watcher collapses into the first one.
    let _again = env.monitor(&watcher, &target);

    env.kill(&target);
    match recv(&mut received).await {
        Message::Down { who } => assert_eq!(who, target),
        other => panic!("expected a down message, got {other:?}"),
    }
    nothing_more(&mut received).await;
}

#[tokio::test]
async fn aborted_monitor_stays_silent() {
    let env = Environment::new();
    let target = env.spawn_fn(|_, _| Ok(()));
    let (watcher, mut received) = forwarder(&env);
    env.monitor(&watcher, &target).abort();
    env.kill(&target);
    nothing_more(&mut received).await;
    assert!(!env.is_alive(&target));
}

#[tokio::test]
async fn monitoring_a_dead_actor_answers_right_away() {
    let env = Environment::new();
    let target = env.spawn_fn(|ctx, _| {
        ctx.quit();
        Ok(())
    });
    env.send(&target, Message::Empty);
    tokio::time::timeout(Duration::from_secs(5), async {
        while env.is_alive(&target) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let (watcher, mut received) = forwarder(&env);
    let _monitor = env.monitor(&watcher, &target);
    assert!(matches!(recv(&mut received).await, Message::Down { who } if who == target));
}

#[tokio::test(flavor = "multi_thread")]
async fn monitor_during_teardown_still_notifies() {
    let env = Environment::new();
    let (watcher, mut received) = forwarder(&env);
    let targets: Vec<Pid> = (0..200)
        .map(|_| {
            env.spawn_fn(|ctx, _| {
                ctx.quit();
                Ok(())
            })
        })
        .collect();

    // Each monitor races the target's teardown: it lands before, during or after it.
    for (i, target) in targets.iter().enumerate() {
        env.send(target, Message::Empty);
        if i % 3 == 0 {
            tokio::task::yield_now().await;
        }
        let _monitor = env.monitor(&watcher, target);
    }

    let mut downs: HashMap<Pid, usize> = HashMap::new();
    for _ in 0..targets.len() {
        match recv(&mut received).await {
            Message::Down { who } => *downs.entry(who).or_default() += 1,
            other => panic!("expected a down message, got {other:?}"),
        }
    }
    nothing_more(&mut received).await;
    assert_eq!(downs.len(), targets.len());
    assert!(downs.values().all(|&count| count == 1));
}

struct Counting {
    runs: Arc<AtomicUsize>,
    stopped: UnboundedSender<()>,
}

impl Actor for Counting {
    fn run(&mut self, _: &mut Context, _: Message) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&mut self, _: &Context) {
        let _ = self.stopped.send(());
    }
}

#[tokio::test]
async fn kill_message_is_delivered_but_poison_pill_is_not() {
    let env = Environment::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let (stopped, mut terminated) = unbounded_channel();
    let pid = env.spawn(Counting {
        runs: runs.clone(),
        stopped,
    });

    env.send(&pid, Message::Kill);
    env.send(&pid, Message::Empty);
    env.send(&pid, Message::PoisonPill);
    env.send(&pid, Message::Empty);
    recv(&mut terminated).await;

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(!env.is_alive(&pid));
}

#[tokio::test]
async fn environment_waits_for_every_actor() {
    let env = Environment::new();
    let ctx = env.root_context();
    for _ in 0..10 {
        let pid = env.spawn_fn(|ctx, _| {
            ctx.quit();
            Ok(())
        });
        ctx.send_after(&pid, Message::Empty, Duration::from_millis(20));
    }
    tokio::time::timeout(Duration::from_secs(5), env.wait())
        .await
        .unwrap();
    assert!(env.is_empty());
}
