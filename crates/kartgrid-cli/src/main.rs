//! kartgrid-sim
//!
//! Mounts a grid over the in-memory store and replays a short session:
//! a few drops, a drag that changes its mind mid-air, and a rejected move
//! that is retried. Grid and performance events are printed as JSON lines.
//!
//! Environment:
//!   KARTGRID_COLUMNS, KARTGRID_ROWS, KARTGRID_DEBOUNCE_MS, KARTGRID_COLORS
//!   RUST_LOG  Filter for log output (default: kartgrid=info)

use kartgrid_core::{
    GridConfig, GridEvent, GridSession, InMemoryStore, KartNumber, Performance, RecordId,
};
use std::sync::Arc;
use tokio::sync::mpsc;

const LINEUP: [(i64, Performance); 6] = [
    (7, Performance::VeryGood),
    (12, Performance::Average),
    (21, Performance::Good),
    (3, Performance::Poor),
    (44, Performance::VeryPoor),
    (9, Performance::Unknown),
];

fn print_event(event: &GridEvent) {
    match event {
        GridEvent::GridChanged(grid) => {
            let columns: Vec<Vec<String>> = grid
                .columns
                .iter()
                .map(|c| {
                    c.records
                        .iter()
                        .map(|r| {
                            let mark = if r.is_optimistic() { "*" } else { "" };
                            format!("#{}{}{}", r.number(), r.base.performance, mark)
                        })
                        .collect()
                })
                .collect();
            println!("{}", serde_json::json!({ "grid": columns }));
        }
        GridEvent::PerformanceChanged(signal) => {
            println!("{}", serde_json::json!({ "performance": signal }));
        }
        GridEvent::MoveAcknowledged { kart_id, to_column } => {
            println!("{}", serde_json::json!({ "ack": kart_id.as_str(), "to": to_column }));
        }
        GridEvent::MoveConfirmed { kart_id, to_column } => {
            println!("{}", serde_json::json!({ "confirmed": kart_id.as_str(), "to": to_column }));
        }
        GridEvent::MoveFailed { kart_id, error, .. } => {
            println!(
                "{}",
                serde_json::json!({ "failed": kart_id.as_str(), "error": error.to_string() })
            );
        }
        GridEvent::PersistenceFailed { operation, error } => {
            println!(
                "{}",
                serde_json::json!({ "operation": format!("{operation:?}"), "error": error.to_string() })
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    kartgrid_logging::init(kartgrid_logging::DEFAULT_DIRECTIVE);

    let config = GridConfig::from_env()?;
    tracing::info!(columns = config.columns, rows = config.rows_limit, "starting simulation");

    let store = Arc::new(InMemoryStore::new(config.columns, config.rows_limit));
    let mut karts: Vec<(RecordId, usize, KartNumber, Performance)> = Vec::new();
    for (i, (number, performance)) in LINEUP.iter().enumerate() {
        let column = i % config.columns;
        let number = KartNumber::new(*number)?;
        karts.push((store.seed(column, number, *performance), column, number, *performance));
    }

    let (mut session, handle) = GridSession::mount(Arc::clone(&store), config.clone())?;

    let (failures_tx, mut failures) = mpsc::unbounded_channel();
    session.observers_mut().subscribe(move |event| {
        print_event(event);
        if let GridEvent::MoveFailed { retry, .. } = event {
            let _ = failures_tx.send(retry.clone());
        }
    });

    let runner = tokio::spawn(session.run());
    let settle = config.debounce * 4;
    tokio::time::sleep(settle).await;

    if config.columns > 1 {
        let (id, from, number, performance) = karts[0].clone();
        let target = (from + 1) % config.columns;
        handle.drop_kart(id.clone(), from, target, number, performance)?;
        tokio::time::sleep(settle).await;

        // Drag changes its mind within the debounce window.
        let (id, from, number, performance) = karts[1].clone();
        let first = (from + 1) % config.columns;
        let second = (from + config.columns - 1) % config.columns;
        handle.drop_kart(id.clone(), from, first, number, performance)?;
        if second != first && second != from {
            handle.drop_kart(id, first, second, number, performance)?;
        }
        tokio::time::sleep(settle).await;

        // Rejected once, then retried.
        store.fail_next_moves(1);
        let (id, from, number, performance) = karts[2].clone();
        handle.drop_kart(id, from, (from + 1) % config.columns, number, performance)?;
        tokio::time::sleep(settle).await;

        if let Ok(Some(retry)) = tokio::time::timeout(settle, failures.recv()).await {
            tracing::info!(kart = %retry.kart_id, "retrying rejected move");
            handle.retry(retry)?;
            tokio::time::sleep(settle).await;
        }
    }

    let calls = store.move_calls().len();
    handle.teardown()?;
    runner.await?;

    tracing::info!(move_calls = calls, "simulation finished");
    Ok(())
}
