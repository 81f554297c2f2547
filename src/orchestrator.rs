//! Reply orchestration loop.
//!
//! One task, strictly sequential:
//!
//! ```text
//! Idle → Polling → (per candidate: Filtering → Generating → Sending → Recording)
//!      → Sleeping → Polling … → Stopped
//! ```
//!
//! Shutdown is observed at the start of each iteration and on every sleep
//! tick. A candidate that has started processing always finishes its
//! send + record before the next checkpoint.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};

use crate::channels::{MailGateway, MessageHandle};
use crate::config::LoopConfig;
use crate::error::OrchestratorError;
use crate::ledger::ReplyLedger;
use crate::personas::PersonaStore;
use crate::reply::{ReplyGenerator, reply_subject, sign};
use crate::shutdown::ShutdownHandle;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Filtering,
    Generating,
    Sending,
    Recording,
    Sleeping,
    Stopped,
}

/// Collaborators owned by the loop.
pub struct LoopDeps {
    pub gateway: Arc<dyn MailGateway>,
    pub ledger: Arc<dyn ReplyLedger>,
    pub personas: PersonaStore,
    pub generator: ReplyGenerator,
    pub fallback_message: String,
}

/// Why a candidate was dropped before generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    FetchFailed,
    NoSender,
    SelfMessage,
    AlreadyReplied,
}

/// A reply that went out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReply {
    pub sender: String,
    pub persona: String,
    pub used_fallback: bool,
}

/// Outcome of one polling pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub candidates: usize,
    pub sent: Vec<SentReply>,
    pub skipped: Vec<(String, SkipReason)>,
    pub send_failures: usize,
    /// The inbox query failed; treated as an empty pass.
    pub poll_failed: bool,
}

/// Totals across a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub iterations: u64,
    pub replies_sent: u64,
    pub fallbacks_used: u64,
    pub send_failures: u64,
    pub iteration_errors: u64,
}

/// The reply orchestration state machine.
pub struct OrchestrationLoop<R = StdRng> {
    deps: LoopDeps,
    config: LoopConfig,
    start_timestamp: DateTime<Utc>,
    shutdown: ShutdownHandle,
    rng: R,
    state: LoopState,
    summary: LoopSummary,
}

impl<R: Rng + Send> OrchestrationLoop<R> {
    /// `start_timestamp` bounds which unread mail is considered; anything
    /// received at or before it is ignored.
    pub fn new(
        deps: LoopDeps,
        config: LoopConfig,
        start_timestamp: DateTime<Utc>,
        shutdown: ShutdownHandle,
        rng: R,
    ) -> Self {
        Self {
            deps,
            config,
            start_timestamp,
            shutdown,
            rng,
            state: LoopState::Idle,
            summary: LoopSummary::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn summary(&self) -> &LoopSummary {
        &self.summary
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Loop state");
            self.state = next;
        }
    }

    /// Run until shutdown is requested.
    pub async fn run(&mut self) -> LoopSummary {
        info!(
            reply_once = self.config.reply_once,
            interval_secs = self.config.poll_interval.as_secs(),
            personas = self.deps.personas.len(),
            "Reply loop started"
        );

        loop {
            self.transition(LoopState::Idle);
            if self.shutdown.is_requested() {
                break;
            }

            let outcome = AssertUnwindSafe(self.run_iteration())
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(OrchestratorError::Panicked(panic_message(&*payload))));

            match outcome {
                Ok(report) => {
                    if !report.sent.is_empty() || report.send_failures > 0 {
                        info!(
                            sent = report.sent.len(),
                            send_failures = report.send_failures,
                            skipped = report.skipped.len(),
                            "Iteration finished"
                        );
                    }
                    self.transition(LoopState::Sleeping);
                    self.shutdown
                        .sleep(self.config.poll_interval, self.config.tick)
                        .await;
                }
                Err(e) => {
                    self.summary.iteration_errors += 1;
                    error!("Runtime error: {e}");
                    self.transition(LoopState::Sleeping);
                    self.shutdown
                        .sleep(self.config.error_backoff, self.config.tick)
                        .await;
                }
            }
        }

        self.transition(LoopState::Stopped);
        info!(
            iterations = self.summary.iterations,
            replies = self.summary.replies_sent,
            "Bot stopped gracefully."
        );
        println!("Bot stopped gracefully.");
        self.summary.clone()
    }

    /// One polling pass over every current candidate. `run` also catches
    /// panics raised in here and treats them as iteration errors.
    pub async fn run_iteration(&mut self) -> Result<IterationReport, OrchestratorError> {
        self.summary.iterations += 1;
        self.transition(LoopState::Polling);

        let mut report = IterationReport::default();
        let handles = match self.deps.gateway.list_unread(self.start_timestamp).await {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "Inbox poll failed, treating as no new mail");
                report.poll_failed = true;
                return Ok(report);
            }
        };

        report.candidates = handles.len();
        if !handles.is_empty() {
            debug!(count = handles.len(), "Found unread messages");
        }

        for handle in &handles {
            self.process_candidate(handle, &mut report).await?;
        }
        Ok(report)
    }

    async fn process_candidate(
        &mut self,
        handle: &MessageHandle,
        report: &mut IterationReport,
    ) -> Result<(), OrchestratorError> {
        self.transition(LoopState::Filtering);

        let message = match self.deps.gateway.fetch(handle).await {
            Ok(m) => m,
            Err(e) => {
                warn!(id = %handle.id, error = %e, "Failed to fetch message, skipping");
                report.skipped.push((handle.id.clone(), SkipReason::FetchFailed));
                return Ok(());
            }
        };

        let Some(sender) = message.sender.as_deref() else {
            debug!(id = %handle.id, "No resolvable sender, skipping");
            report.skipped.push((handle.id.clone(), SkipReason::NoSender));
            return Ok(());
        };

        if sender.eq_ignore_ascii_case(self.deps.gateway.self_address()) {
            debug!(sender = %sender, "Skipping self-sent email");
            report.skipped.push((sender.to_string(), SkipReason::SelfMessage));
            return Ok(());
        }

        if self.config.reply_once && self.deps.ledger.contains(sender).await {
            debug!(sender = %sender, "Already replied, skipping");
            report.skipped.push((sender.to_string(), SkipReason::AlreadyReplied));
            return Ok(());
        }

        self.transition(LoopState::Generating);
        let persona = self.deps.personas.choose(&mut self.rng).clone();
        let (body, used_fallback) = match self
            .deps
            .generator
            .generate(&persona, &self.deps.fallback_message)
            .await
        {
            Ok(text) => (text, false),
            Err(e) => {
                warn!(sender = %sender, persona = %persona.name, error = %e, "Generation failed, using fallback");
                (self.deps.fallback_message.clone(), true)
            }
        };

        self.transition(LoopState::Sending);
        let subject = reply_subject(message.subject.as_deref());
        let signed = sign(&body, &persona.name);
        if let Err(e) = self.deps.gateway.send(sender, &subject, &signed).await {
            error!(sender = %sender, error = %e, "Failed to send reply");
            report.send_failures += 1;
            self.summary.send_failures += 1;
            return Ok(());
        }

        self.transition(LoopState::Recording);
        let recorded = self
            .deps
            .ledger
            .record(sender, &persona.name, used_fallback)
            .await;

        info!(
            sender = %sender,
            persona = %persona.name,
            fallback = used_fallback,
            "Replied"
        );
        println!(
            "✔ Replied to {sender} ({}){}",
            persona.name,
            if used_fallback { " [fallback]" } else { "" }
        );

        self.summary.replies_sent += 1;
        if used_fallback {
            self.summary.fallbacks_used += 1;
        }
        report.sent.push(SentReply {
            sender: sender.to_string(),
            persona: persona.name,
            used_fallback,
        });

        if let Err(e) = recorded {
            error!(sender = %sender, error = %e, "Reply sent but ledger write failed");
            return Err(e.into());
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
