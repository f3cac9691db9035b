//! Polling worker
//!
//! One tokio task per polling connection. Each cycle:
//!
//! ```text
//!   stop requested? ──yes──▶ exit
//!        │ no
//!   lock polled set ──timeout──▶ escalate LockTimeout, exit
//!        │
//!   read every polled tag through the adapter
//!        │
//!   unlock, submit batch to the sink
//!        │
//!   sleep until cycle start + pollrate (woken early by a stop request)
//! ```
//!
//! Stopping is cooperative: a read in progress is never interrupted. The
//! worker only holds a weak reference, so dropping the connection also ends
//! it at the next boundary.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::time::Instant;

use super::handle::Connection;
use super::status::FaultKind;
use crate::sink::{Batch, Sample};

pub(super) async fn run(
    connection: Weak<Connection>,
    generation: u64,
    mut stop: watch::Receiver<bool>,
    previous: Option<watch::Receiver<bool>>,
    exited: watch::Sender<bool>,
) {
    if let Some(mut previous) = previous {
        let _ = previous.wait_for(|done| *done).await;
    }

    poll_loop(&connection, generation, &mut stop).await;
    let _ = exited.send(true);
}

async fn poll_loop(connection: &Weak<Connection>, generation: u64, stop: &mut watch::Receiver<bool>) {
    if *stop.borrow() {
        return;
    }
    let Some(adapter) = connection.upgrade().map(|c| Arc::clone(&c.adapter)) else {
        return;
    };

    if let Err(e) = adapter.connect().await {
        if let Some(conn) = connection.upgrade() {
            conn.escalate(generation, FaultKind::AdapterConnect(e.to_string())).await;
        }
        return;
    }

    if let Some(conn) = connection.upgrade() {
        tracing::info!(
            connection_id = %conn.id(),
            pollrate = ?conn.pollrate(),
            "Polling worker started"
        );
    }

    loop {
        if *stop.borrow_and_update() {
            break;
        }
        let Some(conn) = connection.upgrade() else {
            break;
        };

        let started = Instant::now();
        if let Err(fault) = poll_cycle(&conn).await {
            conn.escalate(generation, fault).await;
            break;
        }

        let deadline = started + conn.pollrate();
        if Instant::now() > deadline {
            tracing::warn!(
                connection_id = %conn.id(),
                elapsed = ?started.elapsed(),
                "Polling cycle overran pollrate"
            );
        }
        drop(conn);

        // A deadline already in the past completes immediately
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    adapter.disconnect().await;
    if let Some(conn) = connection.upgrade() {
        tracing::info!(connection_id = %conn.id(), "Polling worker stopped");
    }
}

/// Read every polled tag once and hand the batch to the sink
async fn poll_cycle(conn: &Connection) -> Result<(), FaultKind> {
    let cycle_start = chrono::Utc::now();
    let polled = conn
        .lock_polled()
        .await
        .map_err(|_| FaultKind::LockTimeout)?;

    let targets: Vec<_> = {
        let tags = conn.tags.read().await;
        polled
            .iter()
            .map(|id| (id.clone(), tags.get(id).cloned()))
            .collect()
    };

    let mut samples = HashMap::with_capacity(targets.len());
    for (tag_id, tag) in targets {
        let tag_samples = match tag {
            Some(tag) => conn.adapter.read_samples(tag.as_ref(), cycle_start).await,
            None => vec![Sample::failed("tag is not configured", cycle_start)],
        };
        samples.insert(tag_id, tag_samples);
    }
    drop(polled);

    if samples.is_empty() {
        return Ok(());
    }

    let batch = Batch {
        connection_id: conn.id().to_string(),
        cycle_start,
        samples,
    };
    conn.record_batch(&batch).await;

    tracing::debug!(
        connection_id = %batch.connection_id,
        tags = batch.samples.len(),
        failed = batch.failed_count(),
        "Batch submitted"
    );
    conn.sink.submit_batch(batch);
    Ok(())
}
