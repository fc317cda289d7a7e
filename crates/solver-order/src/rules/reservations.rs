use alloy_primitives::U256;
use solver_types::Address;
use std::collections::HashMap;
use tokio::sync::Mutex;

type Asset = (u64, Address);

#[derive(Default)]
struct Ledger {
	totals: HashMap<Asset, U256>,
	held: HashMap<String, Vec<(Asset, U256)>>,
}

impl Ledger {
	fn release(&mut self, key: &str) {
		for (asset, amount) in self.held.remove(key).unwrap_or_default() {
			if let Some(total) = self.totals.get_mut(&asset) {
				*total = total.saturating_sub(amount);
				if total.is_zero() {
					self.totals.remove(&asset);
				}
			}
		}
	}
}

/// Solver funds committed to accepted intents whose fills have not landed yet.
///
/// Shared by every Filler of a process, since they spend from the same account.
#[derive(Default)]
pub struct Reservations {
	ledger: Mutex<Ledger>,
}

/// A request to hold `needed` of an asset whose current balance is `balance`.
pub struct Hold {
	pub chain_id: u64,
	pub token: Address,
	pub needed: U256,
	pub balance: U256,
}

impl Reservations {
	pub fn new() -> Self {
		Self::default()
	}

	/// Holds every requested amount for `key`, or nothing.
	///
	/// A previous hold of the same key is replaced. On shortfall the error
	/// names the first asset that cannot be covered.
	pub async fn reserve(&self, key: &str, holds: Vec<Hold>) -> Result<(), String> {
		let mut ledger = self.ledger.lock().await;
		ledger.release(key);

		for hold in &holds {
			let asset = (hold.chain_id, hold.token.clone());
			let reserved = ledger.totals.get(&asset).copied().unwrap_or_default();
			let available = hold.balance.saturating_sub(reserved);
			if available < hold.needed {
				return Err(format!(
					"insufficient {} on chain {}: have {}, reserved {}, need {}",
					hold.token, hold.chain_id, hold.balance, reserved, hold.needed
				));
			}
		}

		let mut entries = Vec::with_capacity(holds.len());
		for hold in holds {
			let asset = (hold.chain_id, hold.token);
			let total = ledger.totals.entry(asset.clone()).or_default();
			*total = total.saturating_add(hold.needed);
			entries.push((asset, hold.needed));
		}
		ledger.held.insert(key.to_string(), entries);
		Ok(())
	}

	pub async fn release(&self, key: &str) {
		self.ledger.lock().await.release(key);
	}

	/// Amount of `token` on `chain_id` currently held.
	pub async fn reserved(&self, chain_id: u64, token: &Address) -> U256 {
		self.ledger
			.lock()
			.await
			.totals
			.get(&(chain_id, token.clone()))
			.copied()
			.unwrap_or_default()
	}
}
