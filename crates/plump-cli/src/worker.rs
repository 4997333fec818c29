//! Worker mode: serve RPC calls on stdin, broadcast events on stdout.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use plump_core::{BroadcastQueue, Connection, Kwargs, RpcWorker, SerializerKind, StopReason, Value};

/// State shared by the worker's command handlers.
struct WorkerContext {
    bus: BroadcastQueue,
    processed: AtomicU64,
    started: Instant,
}

impl WorkerContext {
    fn tick(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }
}

fn context(ctx: Option<&WorkerContext>) -> anyhow::Result<&WorkerContext> {
    ctx.context("worker context not installed")
}

/// Sum of all integer positional arguments.
fn add(ctx: Option<&WorkerContext>, args: &[Value], _kwargs: &Kwargs) -> anyhow::Result<Value> {
    context(ctx)?.tick();

    let mut total: i64 = 0;
    for (i, arg) in args.iter().enumerate() {
        let n = arg
            .as_i64()
            .with_context(|| format!("argument {} is {}, expected int", i, arg.kind()))?;
        total = total.checked_add(n).context("integer overflow")?;
    }
    Ok(Value::from(total))
}

fn greet(ctx: Option<&WorkerContext>, args: &[Value], kwargs: &Kwargs) -> anyhow::Result<Value> {
    context(ctx)?.tick();

    let name = kwargs
        .get("name")
        .or_else(|| args.first())
        .and_then(Value::as_str)
        .unwrap_or("world");
    Ok(Value::from(format!("Hello, {}!", name)))
}

/// Broadcast one progress event per step, then return the step count.
fn count_to(ctx: Option<&WorkerContext>, args: &[Value], kwargs: &Kwargs) -> anyhow::Result<Value> {
    let ctx = context(ctx)?;
    ctx.tick();

    let total = args
        .first()
        .or_else(|| kwargs.get("n"))
        .and_then(Value::as_i64)
        .context("count_to expects a step count")?;
    anyhow::ensure!(total >= 0, "step count must not be negative, got {}", total);

    let delay = kwargs
        .get("delay_ms")
        .and_then(Value::as_i64)
        .map(|ms| Duration::from_millis(ms.max(0) as u64));

    for step in 1..=total {
        let event: Value = [
            ("event", Value::from("progress")),
            ("step", Value::from(step)),
            ("total", Value::from(total)),
        ]
        .into_iter()
        .collect();
        ctx.bus
            .broadcast(event)
            .with_context(|| format!("broadcasting step {}", step))?;

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }

    Ok(Value::from(total))
}

fn fail(_ctx: Option<&WorkerContext>, args: &[Value], _kwargs: &Kwargs) -> anyhow::Result<Value> {
    let reason = args.first().and_then(Value::as_str).unwrap_or("requested failure");
    Err(anyhow::anyhow!("{}", reason).context("fail command"))
}

fn stats(ctx: Option<&WorkerContext>, _args: &[Value], _kwargs: &Kwargs) -> anyhow::Result<Value> {
    let ctx = context(ctx)?;
    Ok([
        ("processed", Value::from(ctx.processed.load(Ordering::Relaxed) as i64)),
        ("uptime_ms", Value::from(ctx.started.elapsed().as_millis() as i64)),
        ("pid", Value::from(std::process::id() as i64)),
    ]
    .into_iter()
    .collect())
}

/// Run the worker loop until shutdown or until the parent goes away.
pub fn execute(serializer: SerializerKind) -> anyhow::Result<()> {
    let serializer = serializer.build();

    let rpc = Connection::from_stdin().context("Failed to open RPC endpoint on stdin")?;
    let bus = BroadcastQueue::new(Arc::clone(&serializer));
    bus.set_producer(Connection::from_stdout().context("Failed to open event endpoint on stdout")?);

    let mut worker = RpcWorker::new(rpc, serializer);
    worker
        .command_fn(add)?
        .command_fn(greet)?
        .command_fn(count_to)?
        .command_fn(fail)?
        .command_fn(stats)?;
    worker.set_context(WorkerContext {
        bus,
        processed: AtomicU64::new(0),
        started: Instant::now(),
    });

    tracing::debug!("Worker {} serving {:?}", std::process::id(), worker.registry().names());

    match worker.run()? {
        StopReason::Shutdown => tracing::info!("Worker received shutdown"),
        StopReason::PeerClosed => tracing::warn!("Parent closed the RPC channel"),
    }

    Ok(())
}
