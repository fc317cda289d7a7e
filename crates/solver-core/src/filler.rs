//! Per-protocol intent execution.
//!
//! The Filler drives each intent through
//! `Seen -> Validating -> Accepted -> Filling -> Filled -> Settling -> Settled`,
//! persisting the record after every transition so a restarted process resumes
//! where the previous one stopped. A submitted fill or settlement is only
//! replaced by a new submission once its receipt shows it reverted.

use crate::error::FillerError;
use crate::SolverContext;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use solver_delivery::DeliveryError;
use solver_order::{OrderInterface, RuleContext, RuleEngine};
use solver_settlement::SettlementService;
use solver_types::{
	current_timestamp, Intent, IntentRecord, IntentStatus, Rejection, RulesConfig, SolverEvent,
	TransactionHash, TransactionReceipt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct FillerConfig {
	/// Attempts per fill or settle phase before the intent is failed.
	pub max_attempts: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
	/// Bound on waiting for a fill to become settleable.
	pub settlement_timeout: Duration,
	/// Intents processed concurrently.
	pub max_concurrent: usize,
	/// Time given to in-flight intents once the Filler stops.
	pub shutdown_timeout: Duration,
}

impl Default for FillerConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_backoff: Duration::from_millis(500),
			max_backoff: Duration::from_secs(30),
			settlement_timeout: Duration::from_secs(1800),
			max_concurrent: 8,
			shutdown_timeout: Duration::from_secs(30),
		}
	}
}

/// How a call to [`Filler::process`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
	/// Another task is processing the same order.
	InFlight,
	AlreadyProcessed,
	AlreadySettled,
	/// Rejected earlier under the current rule configuration.
	AlreadyRejected,
	Rejected(Rejection),
	Settled(TransactionReceipt),
	/// Retries exhausted or a non-retryable error; the record is `Failed`.
	Failed(String),
}

/// Removes the order from the in-flight set when dropped.
struct InFlightGuard<'a> {
	in_flight: &'a DashMap<String, ()>,
	key: String,
}

impl Drop for InFlightGuard<'_> {
	fn drop(&mut self) {
		self.in_flight.remove(&self.key);
	}
}

fn advance(record: &mut IntentRecord, next: IntentStatus) -> Result<(), FillerError> {
	if record.status == next {
		return Ok(());
	}
	record.transition(next).map_err(FillerError::InvalidState)
}

pub struct Filler {
	protocol: String,
	rules: RuleEngine,
	rules_config: Arc<RulesConfig>,
	fingerprint: String,
	order: Arc<dyn OrderInterface>,
	settlement: Arc<SettlementService>,
	context: SolverContext,
	config: FillerConfig,
	in_flight: DashMap<String, ()>,
}

impl Filler {
	pub fn new(
		protocol: impl Into<String>,
		rules_config: RulesConfig,
		order: Arc<dyn OrderInterface>,
		settlement: Arc<SettlementService>,
		context: SolverContext,
		config: FillerConfig,
	) -> Result<Self, FillerError> {
		let rules = RuleEngine::from_config(&rules_config)?;
		Ok(Self {
			protocol: protocol.into(),
			rules,
			fingerprint: rules_config.fingerprint(),
			rules_config: Arc::new(rules_config),
			order,
			settlement,
			context,
			config,
			in_flight: DashMap::new(),
		})
	}

	/// Replaces the rule pipeline built from configuration.
	pub fn with_rules(mut self, rules: RuleEngine) -> Self {
		self.rules = rules;
		self
	}

	pub fn protocol(&self) -> &str {
		&self.protocol
	}

	fn acquire(&self, key: &str) -> Option<InFlightGuard<'_>> {
		match self.in_flight.entry(key.to_string()) {
			Entry::Occupied(_) => None,
			Entry::Vacant(slot) => {
				slot.insert(());
				Some(InFlightGuard {
					in_flight: &self.in_flight,
					key: key.to_string(),
				})
			}
		}
	}

	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			current_interval: self.config.initial_backoff,
			initial_interval: self.config.initial_backoff,
			max_interval: self.config.max_backoff,
			max_elapsed_time: None,
			..Default::default()
		}
	}

	async fn save(&self, record: &IntentRecord) -> Result<(), FillerError> {
		Ok(self.context.intents.save(record).await?)
	}

	fn publish(&self, event: SolverEvent) {
		self.context.events.publish(event);
	}

	async fn is_processed(&self, intent: &Intent) -> Result<bool, FillerError> {
		Ok(self
			.context
			.checkpoints
			.is_processed(&self.protocol, &intent.order_id)
			.await?)
	}

	/// Drives one intent as far as it can go.
	///
	/// Safe to call any number of times for the same intent, concurrently or
	/// after a restart: at most one settlement is ever submitted per order.
	#[instrument(skip_all, fields(protocol = %self.protocol, order_id = %intent.order_id))]
	pub async fn process(&self, intent: Intent) -> Result<ProcessOutcome, FillerError> {
		let key = intent.key();
		let Some(_guard) = self.acquire(&key) else {
			tracing::debug!("Intent already in flight");
			return Ok(ProcessOutcome::InFlight);
		};

		if self.is_processed(&intent).await? {
			return Ok(ProcessOutcome::AlreadyProcessed);
		}

		let mut record = match self.context.intents.get(&key).await? {
			Some(record) => record,
			None => {
				let record = IntentRecord::seen(intent);
				self.save(&record).await?;
				record
			}
		};

		match record.status {
			IntentStatus::Settled => return Ok(ProcessOutcome::AlreadySettled),
			IntentStatus::Rejected
				if record.rules_fingerprint.as_deref() == Some(self.fingerprint.as_str()) =>
			{
				return Ok(ProcessOutcome::AlreadyRejected);
			}
			IntentStatus::Rejected => {
				tracing::info!("Rule configuration changed, re-evaluating rejected intent");
				record = IntentRecord::seen(record.intent);
				self.save(&record).await?;
			}
			_ => {}
		}

		let result = self.execute(&mut record).await;
		// An unresolved fill may still spend the held outputs.
		if record.fill_receipt.is_some() || record.pending_fill.is_none() {
			self.context.reservations.release(&key).await;
		}
		match result {
			Err(FillerError::PermanentFailure { cause, .. }) => Ok(ProcessOutcome::Failed(cause)),
			other => other,
		}
	}

	async fn execute(&self, record: &mut IntentRecord) -> Result<ProcessOutcome, FillerError> {
		if record.settle_receipt.is_none() {
			if record.fill_receipt.is_none() {
				if record.pending_fill.is_some() {
					// Accepted before a restart; the stored fill decides the outcome.
					tracing::info!("Resuming submitted fill");
				} else {
					if let Some(rejection) = self.validate(record).await? {
						return Ok(ProcessOutcome::Rejected(rejection));
					}
					// Redelivery may have raced with a settlement that finished meanwhile.
					if self.is_processed(&record.intent).await? {
						return Ok(ProcessOutcome::AlreadyProcessed);
					}
				}
				self.fill(record).await?;
			}
			self.settle(record).await?;
		}
		self.finish(record).await
	}

	/// Runs the rule pipeline. Returns the rejection if the intent is refused.
	async fn validate(&self, record: &mut IntentRecord) -> Result<Option<Rejection>, FillerError> {
		if matches!(record.status, IntentStatus::Accepted | IntentStatus::Filling) {
			// Interrupted before any fill was submitted.
			record.failure = Some("interrupted".to_string());
			advance(record, IntentStatus::Failed)?;
		}
		advance(record, IntentStatus::Validating)?;
		self.save(record).await?;

		let ctx = RuleContext::new(
			self.protocol.clone(),
			self.rules_config.clone(),
			self.context.chains.clone(),
			self.context.checkpoints.clone(),
			self.context.reservations.clone(),
			self.context.delivery.account().clone(),
			current_timestamp(),
		);

		match self.rules.evaluate(&record.intent, &ctx).await {
			Err(rejection) => {
				advance(record, IntentStatus::Rejected)?;
				record.rejection = Some(rejection.clone());
				record.rules_fingerprint = Some(self.fingerprint.clone());
				self.save(record).await?;
				tracing::warn!(rule = %rejection.rule, reason = %rejection.reason, "Intent rejected");
				self.publish(SolverEvent::Rejected {
					key: record.intent.key(),
					rejection: rejection.clone(),
				});
				Ok(Some(rejection))
			}
			Ok(()) => {
				advance(record, IntentStatus::Accepted)?;
				record.failure = None;
				self.save(record).await?;
				tracing::info!("Intent accepted");
				self.publish(SolverEvent::Accepted {
					key: record.intent.key(),
				});
				Ok(None)
			}
		}
	}

	async fn fill(&self, record: &mut IntentRecord) -> Result<(), FillerError> {
		let mut backoff = self.backoff();
		let mut attempt = 0;
		loop {
			attempt += 1;
			record.attempts += 1;
			advance(record, IntentStatus::Filling)?;
			self.save(record).await?;

			let result = match record.pending_fill.clone() {
				Some(hash) => self.confirm_fill(record, &hash).await,
				None => self.submit_fill(record).await,
			};
			match result {
				Ok(receipt) => return self.record_fill(record, receipt).await,
				Err(e) => self.on_failure(record, "fill", attempt, e, &mut backoff).await?,
			}
		}
	}

	async fn submit_fill(&self, record: &mut IntentRecord) -> Result<TransactionReceipt, FillerError> {
		let delivery = &self.context.delivery;
		let mut transactions = self
			.order
			.generate_fill_transactions(&record.intent, delivery.account())
			.await?;
		let fill = transactions
			.pop()
			.ok_or_else(|| FillerError::InvalidState("no fill transaction generated".to_string()))?;

		for approval in transactions {
			delivery.deliver(approval).await?;
		}

		let hash = delivery.submit(fill).await?;
		record.pending_fill = Some(hash.clone());
		record.fill_submissions.push(hash.clone());
		self.save(record).await?;

		self.confirm_fill(record, &hash).await
	}

	/// Waits for the stored fill. A revert clears it so the next attempt may
	/// submit a new one; any other error leaves it pending.
	async fn confirm_fill(
		&self,
		record: &mut IntentRecord,
		hash: &TransactionHash,
	) -> Result<TransactionReceipt, FillerError> {
		let chain_id = record.intent.destination_chain_id;
		match self.context.delivery.wait_for_confirmation(chain_id, hash).await {
			Ok(receipt) => {
				self.settlement.validate_fill(&record.intent, &receipt).await?;
				Ok(receipt)
			}
			Err(e @ DeliveryError::Reverted(_)) => {
				record.pending_fill = None;
				self.save(record).await?;
				Err(e.into())
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn record_fill(
		&self,
		record: &mut IntentRecord,
		receipt: TransactionReceipt,
	) -> Result<(), FillerError> {
		advance(record, IntentStatus::Filled)?;
		record.fill_receipt = Some(receipt.clone());
		record.failure = None;
		self.save(record).await?;
		// The spent outputs now show in the balance itself.
		self.context.reservations.release(&record.intent.key()).await;
		tracing::info!(tx_hash = %receipt.hash, block = receipt.block_number, "Intent filled");
		self.publish(SolverEvent::Filled {
			key: record.intent.key(),
			receipt,
		});
		Ok(())
	}

	async fn settle(&self, record: &mut IntentRecord) -> Result<(), FillerError> {
		let fill = record
			.fill_receipt
			.clone()
			.ok_or_else(|| FillerError::InvalidState("settling without a fill receipt".to_string()))?;
		let mut backoff = self.backoff();

		if record.pending_settle.is_none() {
			if let Err(e) = self
				.settlement
				.wait_until_settleable(&record.intent, &fill, self.config.settlement_timeout)
				.await
			{
				// The readiness wait is already bounded by the settlement timeout.
				let attempts = self.config.max_attempts;
				self.on_failure(record, "settlement", attempts, e.into(), &mut backoff)
					.await?;
			}
		}

		let mut attempt = 0;
		loop {
			attempt += 1;
			record.attempts += 1;
			advance(record, IntentStatus::Settling)?;
			self.save(record).await?;

			let result = match record.pending_settle.clone() {
				Some(hash) => self.confirm_settle(record, &hash).await,
				None => self.submit_settle(record, &fill).await,
			};
			match result {
				Ok(receipt) => {
					tracing::info!(tx_hash = %receipt.hash, "Settlement confirmed");
					record.settle_receipt = Some(receipt);
					return self.save(record).await;
				}
				Err(e) => self.on_failure(record, "settle", attempt, e, &mut backoff).await?,
			}
		}
	}

	async fn submit_settle(
		&self,
		record: &mut IntentRecord,
		fill: &TransactionReceipt,
	) -> Result<TransactionReceipt, FillerError> {
		let delivery = &self.context.delivery;
		let tx = self
			.order
			.generate_settle_transaction(&record.intent, fill, delivery.account())
			.await?;
		let hash = delivery.submit(tx).await?;
		record.pending_settle = Some(hash.clone());
		self.save(record).await?;

		self.confirm_settle(record, &hash).await
	}

	async fn confirm_settle(
		&self,
		record: &mut IntentRecord,
		hash: &TransactionHash,
	) -> Result<TransactionReceipt, FillerError> {
		let chain_id = record.intent.origin_chain_id;
		match self.context.delivery.wait_for_confirmation(chain_id, hash).await {
			Ok(receipt) => Ok(receipt),
			Err(e @ DeliveryError::Reverted(_)) => {
				record.pending_settle = None;
				self.save(record).await?;
				Err(e.into())
			}
			Err(e) => Err(e.into()),
		}
	}

	/// Marks the order processed and the record settled.
	async fn finish(&self, record: &mut IntentRecord) -> Result<ProcessOutcome, FillerError> {
		let receipt = record
			.settle_receipt
			.clone()
			.ok_or_else(|| FillerError::InvalidState("finishing without a settle receipt".to_string()))?;

		self.mark_processed(&record.intent).await?;

		advance(record, IntentStatus::Settling)?;
		advance(record, IntentStatus::Settled)?;
		record.failure = None;
		self.save(record).await?;
		tracing::info!(tx_hash = %receipt.hash, "Intent settled");
		self.publish(SolverEvent::Settled {
			key: record.intent.key(),
			receipt: receipt.clone(),
		});
		Ok(ProcessOutcome::Settled(receipt))
	}

	/// The processed marker is what prevents a second settlement, so the
	/// write is retried rather than skipped.
	async fn mark_processed(&self, intent: &Intent) -> Result<(), FillerError> {
		let mut backoff = self.backoff();
		let mut attempt = 0;
		loop {
			attempt += 1;
			match self
				.context
				.checkpoints
				.mark_processed(&self.protocol, &intent.order_id)
				.await
			{
				Ok(()) => return Ok(()),
				Err(e) if attempt < self.config.max_attempts => {
					let delay = backoff.next_backoff().unwrap_or(self.config.max_backoff);
					tracing::warn!(attempt, error = %e, retry_in = ?delay, "Failed to mark order processed");
					tokio::time::sleep(delay).await;
				}
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Records a failed attempt. Returns `Ok` after the backoff delay when the
	/// phase should be retried, and `PermanentFailure` otherwise.
	async fn on_failure(
		&self,
		record: &mut IntentRecord,
		phase: &'static str,
		attempt: u32,
		error: FillerError,
		backoff: &mut ExponentialBackoff,
	) -> Result<(), FillerError> {
		if matches!(error, FillerError::Storage(_)) {
			return Err(error);
		}

		let cause = error.to_string();
		record.failure = Some(format!("{}: {}", phase, cause));
		advance(record, IntentStatus::Failed)?;
		self.save(record).await?;
		self.publish(SolverEvent::Failed {
			key: record.intent.key(),
			error: cause.clone(),
			attempt,
		});

		if !error.is_retryable() || attempt >= self.config.max_attempts {
			tracing::error!(
				phase,
				attempt,
				chain_id = record.intent.destination_chain_id,
				error = %cause,
				"Intent permanently failed"
			);
			return Err(FillerError::PermanentFailure {
				phase,
				attempts: attempt,
				cause,
			});
		}

		let delay = backoff.next_backoff().unwrap_or(self.config.max_backoff);
		tracing::warn!(phase, attempt, error = %cause, retry_in = ?delay, "Attempt failed, retrying");
		tokio::time::sleep(delay).await;
		Ok(())
	}

	async fn process_logged(&self, intent: Intent) {
		let key = intent.key();
		match self.process(intent).await {
			Ok(outcome) => tracing::debug!(key = %key, ?outcome, "Finished processing intent"),
			Err(e) => tracing::error!(key = %key, error = %e, "Intent processing aborted"),
		}
	}

	/// Consumes intents until the channel closes or `cancel` fires, then
	/// drains in-flight work for at most the shutdown timeout.
	pub async fn run(self: Arc<Self>, mut intents: mpsc::Receiver<Intent>, cancel: CancellationToken) {
		tracing::info!(protocol = %self.protocol, "Filler started");
		let permits = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
		let mut tasks = JoinSet::new();

		loop {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
					if let Err(e) = joined {
						tracing::error!(protocol = %self.protocol, error = %e, "Filler task panicked");
					}
				}
				received = intents.recv() => {
					let Some(intent) = received else { break };
					let permit = tokio::select! {
						biased;
						_ = cancel.cancelled() => break,
						permit = permits.clone().acquire_owned() => permit,
					};
					let Ok(permit) = permit else { break };
					let filler = self.clone();
					tasks.spawn(async move {
						let _permit = permit;
						filler.process_logged(intent).await;
					});
				}
			}
		}

		let in_flight = tasks.len();
		if in_flight > 0 {
			tracing::info!(protocol = %self.protocol, in_flight, "Draining in-flight intents");
		}
		let drain = async {
			while let Some(joined) = tasks.join_next().await {
				if let Err(e) = joined {
					tracing::error!(protocol = %self.protocol, error = %e, "Filler task panicked");
				}
			}
		};
		if tokio::time::timeout(self.config.shutdown_timeout, drain)
			.await
			.is_err()
		{
			tracing::warn!(protocol = %self.protocol, "Shutdown timeout elapsed, aborting in-flight intents");
			tasks.abort_all();
		}
		tracing::info!(protocol = %self.protocol, "Filler stopped");
	}
}
