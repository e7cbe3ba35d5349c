use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use quacktor::{Environment, Message};
use tokio::sync::oneshot;

fn criterion_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let env = Environment::new();

    c.bench_function("spawn actor", |b| {
        b.to_async(&rt).iter(|| async {
            let pid = env.spawn_fn(|ctx, _| {
                ctx.quit();
                Ok(())
            });
            env.send(&pid, Message::Empty);
        });
    });
    // Let the spawned actors drain before the next benchmark.
    rt.block_on(async {
        let _ = tokio::time::timeout(Duration::from_secs(10), env.wait()).await;
    });

    c.bench_function("send 1000 local messages", |b| {
        b.to_async(&rt).iter(|| async {
            let (done, finished) = oneshot::channel();
            let mut done = Some(done);
            let mut remaining = 1000;
            let pid = env.spawn_fn(move |ctx, _| {
                remaining -= 1;
                if remaining == 0 {
                    if let Some(done) = done.take() {
                        let _ = done.send(());
                    }
                    ctx.quit();
                }
                Ok(())
            });
            for i in 0..1000 {
                env.send(&pid, Message::generic(i));
            }
            let _ = finished.await;
        });
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
