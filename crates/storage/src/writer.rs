//! Background consumer of scheduler history events.
//!
//! The scheduler critical section never touches disk; it pushes events onto
//! a bounded channel that this task drains. Failed writes are retried with
//! backoff; a persistently failing store is logged and skipped so the
//! scheduler keeps running.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use workgate_models::HistoryEvent;

use crate::HistoryStore;

const WRITE_ATTEMPTS: u32 = 3;

pub struct HistoryWriter {
    store: HistoryStore,
    rx: mpsc::Receiver<HistoryEvent>,
}

impl HistoryWriter {
    pub fn new(store: HistoryStore, rx: mpsc::Receiver<HistoryEvent>) -> Self {
        Self { store, rx }
    }

    pub async fn run(mut self, token: CancellationToken) {
        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.write(event).await,
                        None => break,
                    }
                }
                _ = token.cancelled() => {
                    // Flush whatever the scheduler managed to enqueue.
                    while let Ok(event) = self.rx.try_recv() {
                        self.write(event).await;
                    }
                    break;
                }
            }
        }
        info!("history writer stopped");
    }

    async fn write(&self, event: HistoryEvent) {
        for attempt in 1..=WRITE_ATTEMPTS {
            let result = match &event {
                HistoryEvent::Job(record) => self.store.upsert_job(record).await,
                HistoryEvent::Audit(audit) => self.store.append_event(audit).await,
            };
            match result {
                Ok(()) => return,
                Err(err) if attempt < WRITE_ATTEMPTS => {
                    warn!(error = %err, attempt, "history write failed, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(attempt))).await;
                }
                Err(err) => {
                    warn!(error = %err, "history write failed, dropping event");
                }
            }
        }
    }
}
