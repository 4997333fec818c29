//! Demo driver: spawn a worker, call it, and print what it broadcasts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use plump_core::{BroadcastQueue, Error, ItemHandler, Kwargs, RpcClient, SerializerKind, Value};
use tokio::sync::mpsc;

use crate::process::WorkerProcess;

/// How long to wait for broadcast events before giving up.
const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the worker gets to exit after the shutdown signal.
const EXIT_GRACE: Duration = Duration::from_secs(5);

pub async fn execute(serializer: SerializerKind, events: u32, verbose: bool) -> anyhow::Result<()> {
    let (process, endpoints) = WorkerProcess::spawn(serializer, verbose)?;
    tracing::info!("Worker {} started ({} serializer)", process.pid(), serializer);

    let client = RpcClient::new(endpoints.rpc, serializer.build());
    let bus = Arc::new(BroadcastQueue::new(serializer.build()));
    bus.set_consumer(endpoints.events);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = bus.setup_async_listener(ItemHandler::task(move |item| {
        let tx = tx.clone();
        async move {
            tx.send(item).context("event receiver dropped")?;
            Ok(())
        }
    }))?;

    let sum = client
        .acall("add", vec![2.into(), 3.into(), 4.into()], Kwargs::new())
        .await?;
    println!("add(2, 3, 4) = {}", sum);

    let mut kwargs = Kwargs::new();
    kwargs.insert("name".to_string(), Value::from("plump"));
    let greeting = client.acall("greet", vec![], kwargs).await?;
    println!("{}", greeting.as_str().unwrap_or_default());

    let counted = client
        .acall("count_to", vec![Value::from(events)], Kwargs::new())
        .await?;
    let expected = counted.as_i64().unwrap_or_default() as usize;

    // The async listener hands items off as independent tasks; restore order
    // by step before printing.
    let mut progress = Vec::with_capacity(expected);
    while progress.len() < expected {
        let event = tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .context("Timed out waiting for progress events")?
            .context("Event listener stopped early")?;
        progress.push(event);
    }
    progress.sort_by_key(|event| event.get("step").and_then(Value::as_i64).unwrap_or_default());
    for event in &progress {
        println!("{}", event);
    }
    println!("progress events: {}", progress.len());

    match client.acall("fail", vec![], Kwargs::new()).await {
        Err(Error::Worker(message)) => {
            println!("worker error: {}", message.lines().next().unwrap_or_default());
        }
        Ok(value) => anyhow::bail!("fail command unexpectedly returned {}", value),
        Err(e) => return Err(e.into()),
    }

    let stats = client.acall("stats", vec![], Kwargs::new()).await?;
    tracing::info!("Worker stats: {}", stats);

    client.stop_worker();
    let status = tokio::task::spawn_blocking(move || process.finish(EXIT_GRACE)).await??;

    // The worker's exit closes its producer end, which ends the listener.
    tokio::time::timeout(EVENT_TIMEOUT, listener.join())
        .await
        .context("Event listener did not stop after worker exit")??;

    println!("worker exited: {}", status);
    Ok(())
}
