//! Periodic reconciliation of `Issued` benefits against the ledger.
//!
//! Repairs the gaps of the event-driven projection:
//! - journaled events whose handler failed (ledger read-back or store errors,
//!   redemptions that arrived before their issuance) are re-applied in chain
//!   order
//! - expirations, which the contract records without emitting an event
//! - redemptions whose event was dropped and never journaled

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use civitas_core::{address_key, BenefitStatus};
use tracing::{debug, info, warn};

use crate::error::IndexerError;
use crate::handlers::{EventHandlers, HandlerOutcome};
use crate::listener::{IndexedEvent, Ledger};
use crate::storage::{BenefitRecord, Storage, TransitionOutcome};

/// Counters of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Issued benefits compared against the ledger
    pub checked: usize,
    /// Benefits moved to Expired
    pub expired: usize,
    /// Benefits moved to Redeemed from re-scanned logs
    pub redeemed: usize,
    /// Benefits whose projection disagrees with the ledger
    pub diverged: usize,
    /// Benefits that could not be checked (ledger or store error)
    pub failed: usize,
    /// Previously failed journal events that now applied
    pub replayed: usize,
    /// Previously failed journal events that failed again
    pub unresolved: usize,
}

/// Reconciles the projection with on-chain benefit records.
pub struct Reconciler<L: Ledger + ?Sized> {
    ledger: Arc<L>,
    storage: Storage,
    handlers: EventHandlers<L>,
    interval: Duration,
}

impl<L: Ledger + ?Sized> Reconciler<L> {
    /// Create a new reconciler running every `interval`.
    pub fn new(ledger: Arc<L>, storage: Storage, interval: Duration) -> Self {
        let handlers = EventHandlers::new(Arc::clone(&ledger), storage.clone());
        Self {
            ledger,
            storage,
            handlers,
            interval,
        }
    }

    /// Run the reconciliation loop forever.
    pub async fn run(&self) -> Result<()> {
        info!("Reconciler starting with interval: {:?}", self.interval);

        let mut interval = tokio::time::interval(self.interval);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            match self.run_once().await {
                Ok(report) => info!(
                    checked = report.checked,
                    expired = report.expired,
                    redeemed = report.redeemed,
                    diverged = report.diverged,
                    failed = report.failed,
                    replayed = report.replayed,
                    unresolved = report.unresolved,
                    "Reconciliation pass complete"
                ),
                Err(e) => warn!("Reconciliation pass failed: {:#}", e),
            }
        }
    }

    /// Re-apply failed journal events, then compare every `Issued` benefit
    /// with the ledger as of the last synced block.
    pub async fn run_once(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let synced_to = self.storage.get_sync_state().await?.last_block_number;
        if synced_to == 0 {
            return Ok(report);
        }

        self.redrive_failed_events(&mut report).await?;

        let benefits = self
            .storage
            .list_benefits_by_status(BenefitStatus::Issued)
            .await
            .context("Failed to list issued benefits")?;

        for benefit in &benefits {
            report.checked += 1;
            if let Err(e) = self.reconcile_benefit(benefit, synced_to, &mut report).await {
                warn!(benefit_id = %benefit.benefit_id, "Reconciliation failed: {:#}", e);
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Re-apply journaled events whose handler failed, in chain order, so a
    /// recovered issuance lands before the redemptions that depend on it.
    async fn redrive_failed_events(&self, report: &mut ReconcileReport) -> Result<()> {
        let entries = self
            .storage
            .ledger_events_with_outcomes(&IndexerError::KINDS)
            .await
            .context("Failed to list failed ledger events")?;

        for entry in &entries {
            let result = match IndexedEvent::from_journal(entry) {
                Ok(event) => self.handlers.apply(&event).await,
                Err(e) => Err(e),
            };

            let label = match &result {
                Ok(outcome) => outcome.as_str(),
                Err(e) => e.kind(),
            };
            match result {
                Ok(outcome) => {
                    if outcome == HandlerOutcome::Applied {
                        info!(
                            event_type = %entry.event_type,
                            block = entry.coordinates.block_number,
                            previous = %entry.outcome,
                            "Recovered failed ledger event"
                        );
                        report.replayed += 1;
                    }
                }
                Err(e) => {
                    debug!(
                        event_type = %entry.event_type,
                        block = entry.coordinates.block_number,
                        "Ledger event still failing: {}",
                        e
                    );
                    report.unresolved += 1;
                }
            }

            if label != entry.outcome {
                self.storage
                    .set_ledger_event_outcome(entry.id, label)
                    .await?;
            }
        }

        Ok(())
    }

    async fn reconcile_benefit(
        &self,
        benefit: &BenefitRecord,
        synced_to: u64,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let on_chain = self
            .ledger
            .benefit_at(&benefit.benefit_id, Some(synced_to))
            .await?;

        if !on_chain.exists() {
            warn!(benefit_id = %benefit.benefit_id, "Projected benefit has no on-chain record");
            report.diverged += 1;
            return Ok(());
        }

        if on_chain.recipient != benefit.recipient || on_chain.value != benefit.value {
            warn!(
                benefit_id = %benefit.benefit_id,
                projected_recipient = %address_key(&benefit.recipient),
                chain_recipient = %address_key(&on_chain.recipient),
                projected_value = %benefit.value,
                chain_value = %on_chain.value,
                "Projection diverges from on-chain record"
            );
            report.diverged += 1;
        }

        match on_chain.status() {
            Some(BenefitStatus::Issued) => {}
            Some(BenefitStatus::Expired) => {
                if self.storage.mark_benefit_expired(&benefit.benefit_id).await?
                    == TransitionOutcome::Applied
                {
                    info!(benefit_id = %benefit.benefit_id, "Benefit expired on chain");
                    report.expired += 1;
                }
            }
            Some(BenefitStatus::Redeemed) => {
                let events = self
                    .ledger
                    .redemption_events(&benefit.benefit_id, benefit.issued_block, synced_to)
                    .await?;

                if events.is_empty() {
                    warn!(
                        benefit_id = %benefit.benefit_id,
                        "Redeemed on chain but no BenefitRedeemed log found"
                    );
                    report.diverged += 1;
                }

                for event in &events {
                    match self.handlers.apply(event).await {
                        Ok(HandlerOutcome::Applied) => {
                            info!(
                                benefit_id = %benefit.benefit_id,
                                block = event.meta.block_number,
                                "Recovered dropped redemption"
                            );
                            report.redeemed += 1;
                        }
                        Ok(_) => {}
                        Err(e) => warn!(
                            benefit_id = %benefit.benefit_id,
                            block = event.meta.block_number,
                            "Failed to apply recovered redemption: {}",
                            e
                        ),
                    }
                }
            }
            None => {
                warn!(
                    benefit_id = %benefit.benefit_id,
                    status = on_chain.status,
                    "Unknown on-chain benefit status"
                );
                report.diverged += 1;
            }
        }

        Ok(())
    }
}
