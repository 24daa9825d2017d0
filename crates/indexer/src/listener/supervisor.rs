//! Indexer supervisor: historical catch-up and live polling.
//!
//! The supervisor owns a single task that pulls contract events in block
//! ranges, dispatches them to the [`EventHandlers`] in chain order and only
//! then advances the persisted cursor. A failing event is logged and dropped;
//! a failing RPC call is logged and retried on the next poll.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{IndexedEvent, Ledger};
use crate::config::SyncConfig;
use crate::handlers::{EventHandlers, HandlerOutcome};
use crate::storage::{JournalRecord, Storage};

/// Where the cursor stands after one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// More confirmed blocks remain; poll again immediately.
    Behind,
    /// The cursor reached the confirmed head.
    CaughtUp,
}

/// Per-range dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeSummary {
    /// Events that changed the projection
    pub applied: usize,
    /// Events already reflected (duplicates, replays, stale vendor events)
    pub skipped: usize,
    /// Events dropped by a handler error
    pub dropped: usize,
}

/// Owned event subscription with an explicit start/stop lifecycle.
pub struct IndexerSupervisor<L: Ledger + ?Sized + 'static> {
    ledger: Arc<L>,
    storage: Storage,
    handlers: EventHandlers<L>,
    config: SyncConfig,
    chain_id: u64,
}

/// Handle to a running supervisor.
pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Signal the supervisor and wait for the in-flight range to finish.
    pub async fn stop(self) -> Result<()> {
        // The receiver is gone only if the task already exited
        let _ = self.shutdown.send(true);
        self.task.await.context("Indexer supervisor task panicked")
    }

    /// Wait for the supervisor task to exit on its own.
    ///
    /// The polling loop only ends after `stop`, so this resolving means the
    /// task died. Do not call `stop` afterwards.
    pub async fn join(&mut self) -> Result<()> {
        (&mut self.task)
            .await
            .context("Indexer supervisor task panicked")?;
        anyhow::bail!("Indexer supervisor exited unexpectedly")
    }
}

impl<L: Ledger + ?Sized + 'static> IndexerSupervisor<L> {
    /// Create a new supervisor.
    pub fn new(ledger: Arc<L>, storage: Storage, config: SyncConfig, chain_id: u64) -> Self {
        let handlers = EventHandlers::new(Arc::clone(&ledger), storage.clone());
        Self {
            ledger,
            storage,
            handlers,
            config,
            chain_id,
        }
    }

    /// Spawn the polling loop.
    pub fn start(self) -> SupervisorHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        SupervisorHandle { shutdown, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            chain_id = self.chain_id,
            confirmations = self.config.confirmations,
            batch_size = self.config.batch_size,
            "Indexer supervisor starting"
        );
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.poll_once().await {
                Ok(PollStatus::Behind) => Duration::ZERO,
                Ok(PollStatus::CaughtUp) => poll_interval,
                Err(e) => {
                    warn!("Sync poll failed, retrying in {:?}: {:#}", poll_interval, e);
                    poll_interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("Indexer supervisor stopped");
    }

    /// Process at most one `batch_size` range of confirmed blocks.
    pub async fn poll_once(&self) -> Result<PollStatus> {
        let sync_state = self.storage.get_sync_state().await?;
        let current_block = self.ledger.latest_block().await?;
        let safe_block = current_block.saturating_sub(self.config.confirmations);
        let last_synced = sync_state.last_block_number;

        debug!(
            "Sync status: last={}, current={}, safe={}",
            last_synced, current_block, safe_block
        );

        if safe_block <= last_synced {
            return Ok(PollStatus::CaughtUp);
        }

        self.check_reorg(last_synced, sync_state.last_block_hash)
            .await;

        let batch_end = last_synced.saturating_add(self.config.batch_size).min(safe_block);
        self.process_range(last_synced + 1, batch_end).await?;

        if batch_end < safe_block {
            Ok(PollStatus::Behind)
        } else {
            Ok(PollStatus::CaughtUp)
        }
    }

    /// Fetch, order and dispatch every event in `[from, to]`, then move the
    /// cursor to `to`.
    pub async fn process_range(&self, from: u64, to: u64) -> Result<RangeSummary> {
        let mut events = self
            .ledger
            .events(from, to)
            .await
            .with_context(|| format!("Failed to fetch logs for blocks {} to {}", from, to))?;

        events.sort_by_key(|event| event.meta.coordinates());

        let mut summary = RangeSummary::default();
        for event in &events {
            match self.dispatch(event).await {
                Some(HandlerOutcome::Applied) => summary.applied += 1,
                Some(_) => summary.skipped += 1,
                None => summary.dropped += 1,
            }
        }

        let header = self
            .ledger
            .block_header(to)
            .await
            .with_context(|| format!("Failed to fetch header of block {}", to))?;
        self.storage
            .advance_sync_cursor(to, header.hash)
            .await
            .context("Failed to advance sync cursor")?;

        if events.is_empty() {
            debug!("Blocks {} to {}: no events", from, to);
        } else {
            info!(
                "Blocks {} to {}: {} events ({} applied, {} skipped, {} dropped)",
                from,
                to,
                events.len(),
                summary.applied,
                summary.skipped,
                summary.dropped
            );
        }

        Ok(summary)
    }

    /// Journal and apply one event. Never fails: errors are logged here.
    async fn dispatch(&self, event: &IndexedEvent) -> Option<HandlerOutcome> {
        let journal = JournalRecord {
            chain_id: self.chain_id,
            event_type: event.event.name().to_string(),
            entity_id: event.event.entity_id(),
            payload_json: event.payload_json(),
            coordinates: event.meta.coordinates(),
            tx_hash: event.meta.tx_hash,
        };

        let journal_id = match self.storage.append_ledger_event(&journal).await {
            Ok((id, fresh)) => {
                if !fresh {
                    debug!(
                        event_type = %journal.event_type,
                        entity = %journal.entity_id,
                        block = event.meta.block_number,
                        "Replayed ledger event"
                    );
                }
                Some(id)
            }
            Err(e) => {
                warn!(
                    event_type = %journal.event_type,
                    entity = %journal.entity_id,
                    block = event.meta.block_number,
                    "Failed to journal ledger event: {:#}",
                    e
                );
                None
            }
        };

        let (result, label) = match self.handlers.apply(event).await {
            Ok(outcome) => (Some(outcome), outcome.as_str()),
            Err(e) => {
                warn!(
                    event_type = %journal.event_type,
                    entity = %journal.entity_id,
                    block = event.meta.block_number,
                    log_index = event.meta.log_index,
                    "Dropped ledger event: {}",
                    e
                );
                (None, e.kind())
            }
        };

        if let Some(id) = journal_id {
            if let Err(e) = self.storage.record_ledger_event_outcome(id, label).await {
                warn!("Failed to record outcome of ledger event {}: {:#}", id, e);
            }
        }

        result
    }

    /// Warn when the stored hash of the last processed block no longer
    /// matches the chain.
    async fn check_reorg(&self, last_synced: u64, stored_hash: B256) {
        if last_synced == 0 || stored_hash == B256::ZERO {
            return;
        }

        match self.ledger.block_header(last_synced).await {
            Ok(header) if header.hash != stored_hash => {
                warn!(
                    block = last_synced,
                    stored = %stored_hash,
                    canonical = %header.hash,
                    "Block hash mismatch, possible reorg below the confirmation depth"
                );
            }
            Ok(_) => {}
            Err(e) => debug!("Reorg check skipped: {:#}", e),
        }
    }
}
