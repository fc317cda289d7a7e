//! Lifecycle events broadcast by the solver.
//!
//! Subscribers observe intents as they move through the Filler. Publishing
//! never blocks and never fails the caller when nobody is listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{Rejection, TransactionReceipt};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SolverEvent {
	/// A Listener persisted a newly discovered intent and handed it off.
	Seen { key: String, block_number: u64 },
	Rejected { key: String, rejection: Rejection },
	Accepted { key: String },
	Filled { key: String, receipt: TransactionReceipt },
	Settled { key: String, receipt: TransactionReceipt },
	Failed { key: String, error: String, attempt: u32 },
}

impl SolverEvent {
	/// Intent key the event refers to.
	pub fn key(&self) -> &str {
		match self {
			Self::Seen { key, .. }
			| Self::Rejected { key, .. }
			| Self::Accepted { key }
			| Self::Filled { key, .. }
			| Self::Settled { key, .. }
			| Self::Failed { key, .. } => key,
		}
	}
}

#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<SolverEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SolverEvent> {
		self.sender.subscribe()
	}

	/// Broadcasts an event. Returns the number of subscribers that received it.
	pub fn publish(&self, event: SolverEvent) -> usize {
		self.sender.send(event).unwrap_or(0)
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1000)
	}
}
