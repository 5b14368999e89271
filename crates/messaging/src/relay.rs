//! Outbox relay: moves committed envelopes to the transport.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use outbox::{CommitSignal, EnvelopeId, EventEnvelope, OutboxStore};
use tokio::sync::watch;

use crate::error::{RelayConfigError, TransportError};
use crate::retry::RetryPolicy;
use crate::transport::Transport;

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Most envelopes claimed per tick.
    pub batch_size: usize,
    /// Sleep between ticks when no commit signal arrives.
    pub poll_interval: Duration,
    /// Bound on a single publish.
    pub publish_timeout: Duration,
    /// Claims not renewed for this long are considered abandoned by a
    /// crashed relay. Must exceed twice `publish_timeout`.
    pub stale_after: Duration,
    pub retry: RetryPolicy,
}

impl RelayConfig {
    /// Checks that a live relay's claims can never look stale.
    ///
    /// A claim is renewed once it is `stale_after / 2` old, right before a
    /// publish that may take up to `publish_timeout`.
    pub fn validate(&self) -> Result<(), RelayConfigError> {
        if self.stale_after <= self.publish_timeout * 2 {
            return Err(RelayConfigError::StaleAfterTooShort {
                stale_after: self.stale_after,
                publish_timeout: self.publish_timeout,
            });
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(5),
            stale_after: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub published: usize,
    pub retried: usize,
    pub failed: usize,
    /// Claimed but skipped because the claim was recovered by another relay
    /// before this one got to it.
    pub lost: usize,
    pub recovered: usize,
    pub archived: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0 && self.recovered == 0 && self.archived == 0
    }

    /// True if some envelope left the outbox's pending set for good.
    pub fn made_progress(&self) -> bool {
        self.published + self.failed > 0
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// The envelopes of one batch that this relay still holds.
struct BatchClaim {
    stamp: DateTime<Utc>,
    held: HashSet<EnvelopeId>,
}

/// Publishes outbox envelopes with at-least-once delivery.
///
/// Several relays may run against one store; claiming is atomic so an
/// envelope is in flight in at most one of them. Within an aggregate,
/// envelopes are published in id order.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    transport: Arc<dyn Transport>,
    signal: CommitSignal,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        transport: Arc<dyn Transport>,
        signal: CommitSignal,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            transport,
            signal,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Runs one relay pass: recover abandoned claims, archive expired
    /// envelopes, then claim a batch and publish it serially.
    ///
    /// Only the recovery sweep, archiving and the claim itself fail the
    /// tick. An envelope whose outcome cannot be recorded is logged and left
    /// `Publishing` for stale recovery.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn tick(&self) -> outbox::Result<TickReport> {
        let now = Utc::now();
        let mut report = TickReport {
            recovered: self
                .store
                .recover_stale(now - to_chrono(self.config.stale_after))
                .await?,
            archived: self.store.archive_expired(now).await?,
            ..TickReport::default()
        };
        if report.recovered > 0 {
            tracing::warn!(count = report.recovered, "recovered stale claims");
        }
        if report.archived > 0 {
            tracing::info!(count = report.archived, "archived expired envelopes");
        }

        let batch = self.store.claim_pending(self.config.batch_size, now).await?;
        report.claimed = batch.len();

        let mut claim = BatchClaim {
            stamp: now,
            held: batch.iter().map(|e| e.id).collect(),
        };
        for envelope in batch {
            if !self.still_held(&mut claim, envelope.id).await {
                report.lost += 1;
                tracing::warn!(
                    envelope_id = %envelope.id,
                    event_type = %envelope.event_type,
                    "claim lost to stale recovery, skipping"
                );
                continue;
            }

            match self.publish(&envelope).await {
                Ok(()) => match self.store.mark_published(envelope.id).await {
                    Ok(()) => {
                        report.published += 1;
                        metrics::counter!("outbox_envelopes_published_total").increment(1);
                        tracing::debug!(
                            envelope_id = %envelope.id,
                            event_type = %envelope.event_type,
                            "envelope published"
                        );
                    }
                    Err(err) => Self::unrecorded(&envelope, "published", &err),
                },
                Err(err) => match self.fail_attempt(&envelope, &err).await {
                    Ok(true) => report.retried += 1,
                    Ok(false) => report.failed += 1,
                    Err(store_err) => Self::unrecorded(&envelope, "failed attempt", &store_err),
                },
            }
        }

        Ok(report)
    }

    /// Renews the batch claim once it is half way to stale, and reports
    /// whether `id` is still held. The envelope is no longer tracked after.
    async fn still_held(&self, claim: &mut BatchClaim, id: EnvelopeId) -> bool {
        let now = Utc::now();
        if !claim.held.is_empty() && now - claim.stamp >= to_chrono(self.config.stale_after / 2) {
            let ids: Vec<EnvelopeId> = claim.held.iter().copied().collect();
            match self.store.renew_claims(&ids, claim.stamp, now).await {
                Ok(held) => {
                    claim.held = held.into_iter().collect();
                    claim.stamp = now;
                }
                Err(err) => tracing::warn!(error = %err, "could not renew claims"),
            }
        }
        claim.held.remove(&id)
    }

    fn unrecorded(envelope: &EventEnvelope, outcome: &str, err: &outbox::OutboxError) {
        metrics::counter!("outbox_unrecorded_outcomes_total").increment(1);
        tracing::error!(
            envelope_id = %envelope.id,
            event_type = %envelope.event_type,
            outcome,
            error = %err,
            "could not record publish outcome, leaving envelope for stale recovery"
        );
    }

    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
        let timeout = self.config.publish_timeout;
        match tokio::time::timeout(timeout, self.transport.publish(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    /// Records a failed attempt. Returns true if the envelope will be
    /// retried, false if it is now failed.
    async fn fail_attempt(&self, envelope: &EventEnvelope, err: &TransportError) -> outbox::Result<bool> {
        let attempts = envelope.retry_count + 1;
        let policy = &self.config.retry;

        if err.is_retryable() && !policy.is_exhausted(attempts) {
            let delay = policy.delay_for(envelope.retry_count);
            self.store
                .mark_retry(envelope.id, Utc::now() + to_chrono(delay), &err.to_string())
                .await?;
            metrics::counter!("outbox_publish_retries_total").increment(1);
            tracing::warn!(
                envelope_id = %envelope.id,
                event_type = %envelope.event_type,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "publish failed, will retry"
            );
            return Ok(true);
        }

        self.store.mark_failed(envelope.id, &err.to_string()).await?;
        metrics::counter!("outbox_envelopes_failed_total").increment(1);
        tracing::error!(
            envelope_id = %envelope.id,
            event_type = %envelope.event_type,
            aggregate_id = %envelope.aggregate_id,
            attempts,
            retryable = err.is_retryable(),
            error = %err,
            "envelope failed permanently"
        );
        Ok(false)
    }

    /// Ticks until `shutdown` turns true or its sender is dropped.
    ///
    /// Sleeps `poll_interval` between ticks unless a commit signal arrives
    /// first. A tick that made progress is followed by another straight
    /// away, since the next envelope of each aggregate may now be claimable.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "outbox relay started"
        );

        while !*shutdown.borrow() {
            match self.tick().await {
                Ok(report) if report.made_progress() => {
                    tracing::debug!(?report, "relay tick");
                    continue;
                }
                Ok(report) if !report.is_idle() => tracing::debug!(?report, "relay tick"),
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "relay tick failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.signal.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox relay stopped");
    }
}
