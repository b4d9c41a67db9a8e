//! Periodic SLA sweep and its scheduler loop.
//!
//! A sweep run pulls at most `sweep_batch_limit` unhandled learner messages
//! older than the window and evaluates each one independently: reply check,
//! mute check, address resolution, notification, then the conditional flag
//! and audit append. One candidate failing or timing out never affects the
//! others.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use mentorline_push::MulticastReport;
use mentorline_store::ConversationReader;
use mentorline_types::{Message, PartyKind};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::notifications::{breach_alert_for_mentor, still_waiting_for_learner};
use crate::{
    resolve_delivery_addresses, BreachLedgerWriter, ConversationParties, LedgerOutcome,
    MutePolicyResolver, NotificationDispatcher, ReplyDetector, SlaConfig, SlaError, SlaResult,
    SweepCadence,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOutcome {
    Breached,
    AlreadyHandled,
    Replied,
    Muted,
    Malformed,
    ConversationMissing,
    MessageMissing,
    Failed,
    TimedOut,
    DeadlineSkipped,
}

impl CandidateOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Breached => "breached",
            Self::AlreadyHandled => "already_handled",
            Self::Replied => "replied",
            Self::Muted => "muted",
            Self::Malformed => "malformed",
            Self::ConversationMissing => "conversation_missing",
            Self::MessageMissing => "message_missing",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::DeadlineSkipped => "deadline_skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CandidateResult {
    outcome: CandidateOutcome,
    multicasts: usize,
    delivered: usize,
    undelivered: usize,
}

impl CandidateResult {
    fn outcome(outcome: CandidateOutcome) -> Self {
        Self {
            outcome,
            multicasts: 0,
            delivered: 0,
            undelivered: 0,
        }
    }

    fn add_delivery(&mut self, report: &MulticastReport) {
        if report.attempted() == 0 {
            return;
        }
        self.multicasts += 1;
        self.delivered += report.success_count;
        self.undelivered += report.failure_count;
    }
}

/// Counters for one sweep run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub breached: usize,
    pub already_handled: usize,
    pub replied: usize,
    pub muted: usize,
    pub malformed: usize,
    pub conversation_missing: usize,
    pub message_missing: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub deadline_skipped: usize,
    pub multicasts_sent: usize,
    pub addresses_delivered: usize,
    pub addresses_failed: usize,
}

impl SweepReport {
    fn record(&mut self, result: CandidateResult) {
        let counter = match result.outcome {
            CandidateOutcome::Breached => &mut self.breached,
            CandidateOutcome::AlreadyHandled => &mut self.already_handled,
            CandidateOutcome::Replied => &mut self.replied,
            CandidateOutcome::Muted => &mut self.muted,
            CandidateOutcome::Malformed => &mut self.malformed,
            CandidateOutcome::ConversationMissing => &mut self.conversation_missing,
            CandidateOutcome::MessageMissing => &mut self.message_missing,
            CandidateOutcome::Failed => &mut self.failed,
            CandidateOutcome::TimedOut => &mut self.timed_out,
            CandidateOutcome::DeadlineSkipped => &mut self.deadline_skipped,
        };
        *counter += 1;
        self.multicasts_sent += result.multicasts;
        self.addresses_delivered += result.delivered;
        self.addresses_failed += result.undelivered;
    }
}

/// Batch breach detector; the only path that writes SLA state.
#[derive(Clone)]
pub struct SlaSweep {
    reader: Arc<dyn ConversationReader>,
    replies: ReplyDetector,
    mutes: MutePolicyResolver,
    dispatcher: NotificationDispatcher,
    ledger: BreachLedgerWriter,
    config: SlaConfig,
    /// Shared by every sweep built from one context; at most one run holds it.
    run_gate: Arc<Mutex<()>>,
}

impl SlaSweep {
    pub fn new(
        reader: Arc<dyn ConversationReader>,
        replies: ReplyDetector,
        mutes: MutePolicyResolver,
        dispatcher: NotificationDispatcher,
        ledger: BreachLedgerWriter,
        config: SlaConfig,
        run_gate: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            reader,
            replies,
            mutes,
            dispatcher,
            ledger,
            config,
            run_gate,
        }
    }

    /// Runs one sweep evaluated at `now`.
    ///
    /// Fails with [`SlaError::SweepInProgress`] while another run sharing the
    /// same gate is active, and on a failed candidate query. Candidate
    /// failures are counted in the report, never returned.
    #[tracing::instrument(name = "sla_sweep", skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> SlaResult<SweepReport> {
        let Ok(_running) = self.run_gate.try_lock() else {
            tracing::warn!("sla sweep already running; run skipped");
            return Err(SlaError::SweepInProgress);
        };
        let cutoff = now.checked_sub_signed(self.config.window).ok_or_else(|| {
            SlaError::InvalidConfig("sla window reaches before the calendar start".to_string())
        })?;
        let candidates = self
            .reader
            .query_sla_candidates(cutoff, self.config.sweep_batch_limit)
            .await?;
        let mut report = SweepReport {
            scanned: candidates.len(),
            ..SweepReport::default()
        };

        let deadline = Instant::now() + self.config.batch_timeout;
        let results: Vec<CandidateResult> = stream::iter(candidates)
            .map(|message| async move { self.guarded_candidate(message, now, deadline).await })
            .buffer_unordered(self.config.sweep_concurrency)
            .collect()
            .await;
        for result in results {
            report.record(result);
        }

        tracing::info!(
            cutoff = %cutoff,
            scanned = report.scanned,
            breached = report.breached,
            replied = report.replied,
            muted = report.muted,
            skipped = report.malformed + report.conversation_missing + report.message_missing,
            failed = report.failed + report.timed_out + report.deadline_skipped,
            "sla sweep complete"
        );
        Ok(report)
    }

    async fn guarded_candidate(
        &self,
        message: Message,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> CandidateResult {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::warn!(
                conversation_id = %message.conversation_id,
                message_id = %message.message_id,
                "sla sweep batch deadline reached; candidate left for next run"
            );
            return CandidateResult::outcome(CandidateOutcome::DeadlineSkipped);
        }

        // The budget covers evaluation and delivery only; the ledger write
        // below is never cut short once the flag may have been applied.
        let budget = self.config.candidate_timeout.min(remaining);
        let evaluated = match tokio::time::timeout(budget, self.evaluate_candidate(&message)).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                tracing::error!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.message_id,
                    error = %error,
                    "sla candidate failed"
                );
                return CandidateResult::outcome(CandidateOutcome::Failed);
            }
            Err(_) => {
                tracing::warn!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.message_id,
                    timeout_ms = budget.as_millis() as u64,
                    "sla candidate timed out"
                );
                return CandidateResult::outcome(CandidateOutcome::TimedOut);
            }
        };
        if evaluated.outcome != CandidateOutcome::Breached {
            return evaluated;
        }
        self.commit_breach(message, now, evaluated).await
    }

    /// Reply check, mute check, address resolution and delivery. A
    /// `Breached` result means both parties were notified and the ledger
    /// write is still pending.
    #[tracing::instrument(
        name = "sla_candidate",
        skip_all,
        fields(
            conversation_id = %message.conversation_id,
            message_id = %message.message_id,
        )
    )]
    async fn evaluate_candidate(&self, message: &Message) -> SlaResult<CandidateResult> {
        let Some(fields) = message.sla_fields() else {
            tracing::debug!("candidate lacks timestamp or participant ids");
            return Ok(CandidateResult::outcome(CandidateOutcome::Malformed));
        };
        let conversation_id = message.conversation_id.as_str();

        if self
            .replies
            .mentor_replied_after(conversation_id, fields.mentor_id, fields.timestamp)
            .await?
        {
            tracing::debug!(outcome = "replied", "mentor replied in time");
            return Ok(CandidateResult::outcome(CandidateOutcome::Replied));
        }

        let Some(mutes) = self
            .mutes
            .resolve(conversation_id, fields.mentor_id, fields.learner_id)
            .await?
        else {
            tracing::debug!(outcome = "conversation_missing", "conversation not found");
            return Ok(CandidateResult::outcome(
                CandidateOutcome::ConversationMissing,
            ));
        };
        if mutes.either_muted() {
            tracing::debug!(outcome = "muted", "conversation muted; left pending");
            return Ok(CandidateResult::outcome(CandidateOutcome::Muted));
        }

        let mentor_profile = self
            .reader
            .get_profile(PartyKind::Mentor, fields.mentor_id)
            .await?;
        let learner_profile = self
            .reader
            .get_profile(PartyKind::Learner, fields.learner_id)
            .await?;
        let parties = ConversationParties::new(
            conversation_id,
            &message.message_id,
            fields.mentor_id,
            fields.learner_id,
            mentor_profile.as_ref(),
            learner_profile.as_ref(),
        );

        let mut result = CandidateResult::outcome(CandidateOutcome::Breached);
        if let Some(profile) = &mentor_profile {
            let addresses = resolve_delivery_addresses(profile);
            let payload = breach_alert_for_mentor(
                &parties,
                message.text.as_deref(),
                self.config.window_hours(),
                self.config.preview_max_chars,
            );
            result.add_delivery(&self.dispatcher.dispatch(&addresses, payload).await);
        }
        if let Some(profile) = &learner_profile {
            let addresses = resolve_delivery_addresses(profile);
            let payload = still_waiting_for_learner(&parties, self.config.window_hours());
            result.add_delivery(&self.dispatcher.dispatch(&addresses, payload).await);
        }
        Ok(result)
    }

    /// Flag and audit append on a detached task so that dropping the sweep
    /// cannot leave a flagged message without its record.
    async fn commit_breach(
        &self,
        message: Message,
        now: DateTime<Utc>,
        mut result: CandidateResult,
    ) -> CandidateResult {
        let ledger = self.ledger.clone();
        let conversation_id = message.conversation_id.clone();
        let message_id = message.message_id.clone();
        let write = tokio::spawn(async move { ledger.record_breach(&message, now).await });

        result.outcome = match write.await {
            Ok(Ok(LedgerOutcome::Recorded)) => CandidateOutcome::Breached,
            Ok(Ok(LedgerOutcome::AlreadyHandled)) => CandidateOutcome::AlreadyHandled,
            Ok(Ok(LedgerOutcome::MessageMissing)) => CandidateOutcome::MessageMissing,
            Ok(Err(error)) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    message_id = %message_id,
                    error = %error,
                    "breach ledger write failed"
                );
                CandidateOutcome::Failed
            }
            Err(error) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    message_id = %message_id,
                    error = %error,
                    "breach ledger task aborted"
                );
                CandidateOutcome::Failed
            }
        };
        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            outcome = result.outcome.as_str(),
            multicasts = result.multicasts,
            delivered = result.delivered,
            undelivered = result.undelivered,
            "sla breach evaluated"
        );
        result
    }
}

/// Repeats [`SlaSweep::run_once`] on a cadence until shutdown.
pub struct SweepScheduler {
    sweep: SlaSweep,
    cadence: SweepCadence,
}

impl SweepScheduler {
    pub fn new(sweep: SlaSweep, cadence: SweepCadence) -> SlaResult<Self> {
        cadence.validate()?;
        Ok(Self { sweep, cadence })
    }

    /// Runs until ctrl-c.
    pub async fn run(&self) -> SlaResult<()> {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Sweeps immediately, then on every cadence tick until `shutdown`
    /// completes. A failed run is logged and the loop continues.
    pub async fn run_until<F>(&self, shutdown: F) -> SlaResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            match self.sweep.run_once(Utc::now()).await {
                Ok(_) => {}
                Err(SlaError::SweepInProgress) => {
                    tracing::debug!("previous sla sweep still running; tick skipped");
                }
                Err(error) => tracing::error!(error = %error, "sla sweep run failed"),
            }

            let next = self.cadence.next_run_after(Utc::now())?;
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(next_run = %next, "sla sweep scheduled");
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("sla sweep scheduler shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
