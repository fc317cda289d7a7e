//! Built-in rules, selectable by name from `[protocols.<name>.rules].order`.

use alloy_primitives::U256;
use async_trait::async_trait;
use solver_types::{Address, AssetAmount, Intent, RuleOutcome};
use std::collections::BTreeMap;

use super::{Hold, Rule, RuleContext};

/// Resolves a configured rule name.
pub fn canonical_rule(name: &str) -> Option<Box<dyn Rule>> {
	let rule: Box<dyn Rule> = match name {
		"not_already_filled" => Box::new(NotAlreadyFilled),
		"token_allow_list" => Box::new(TokenAllowList),
		"sender_block_list" => Box::new(SenderBlockList),
		"fill_deadline" => Box::new(FillDeadline),
		"amount_bounds" => Box::new(AmountBounds),
		"solvency" => Box::new(Solvency),
		"profitability" => Box::new(Profitability),
		_ => return None,
	};
	Some(rule)
}

/// Sums amounts per (chain, token).
fn aggregate(assets: &[AssetAmount]) -> Result<BTreeMap<(u64, Address), U256>, String> {
	let mut totals: BTreeMap<(u64, Address), U256> = BTreeMap::new();
	for asset in assets {
		let total = totals.entry((asset.chain_id, asset.token.clone())).or_default();
		*total = total
			.checked_add(asset.amount)
			.ok_or_else(|| format!("amount overflow for token {}", asset.token))?;
	}
	Ok(totals)
}

fn sum(assets: &[AssetAmount]) -> Option<U256> {
	assets
		.iter()
		.try_fold(U256::ZERO, |acc, a| acc.checked_add(a.amount))
}

pub struct NotAlreadyFilled;

#[async_trait]
impl Rule for NotAlreadyFilled {
	fn name(&self) -> &str {
		"not_already_filled"
	}

	async fn evaluate(&self, intent: &Intent, ctx: &RuleContext) -> RuleOutcome {
		match ctx.checkpoints.is_processed(&ctx.protocol, &intent.order_id).await {
			Ok(false) => RuleOutcome::Pass,
			Ok(true) => RuleOutcome::reject("order already processed"),
			Err(e) => RuleOutcome::reject(format!("cannot read processed set: {}", e)),
		}
	}
}

pub struct TokenAllowList;

#[async_trait]
impl Rule for TokenAllowList {
	fn name(&self) -> &str {
		"token_allow_list"
	}

	async fn evaluate(&self, intent: &Intent, ctx: &RuleContext) -> RuleOutcome {
		for asset in intent.inputs.iter().chain(&intent.outputs) {
			if ctx.config.token(asset.chain_id, &asset.token).is_none() {
				return RuleOutcome::reject(format!(
					"token {} not allowed on chain {}",
					asset.token, asset.chain_id
				));
			}
		}
		RuleOutcome::Pass
	}
}

pub struct SenderBlockList;

#[async_trait]
impl Rule for SenderBlockList {
	fn name(&self) -> &str {
		"sender_block_list"
	}

	async fn evaluate(&self, intent: &Intent, ctx: &RuleContext) -> RuleOutcome {
		if ctx.config.blocked_senders.contains(&intent.user) {
			return RuleOutcome::reject(format!("sender {} is blocked", intent.user));
		}
		RuleOutcome::Pass
	}
}

pub struct FillDeadline;

#[async_trait]
impl Rule for FillDeadline {
	fn name(&self) -> &str {
		"fill_deadline"
	}

	async fn evaluate(&self, intent: &Intent, ctx: &RuleContext) -> RuleOutcome {
		let Some(deadline) = intent.fill_deadline else {
			return RuleOutcome::Pass;
		};
		let earliest = ctx.now.saturating_add(ctx.config.deadline_buffer_secs);
		if deadline < earliest {
			return RuleOutcome::reject(format!(
				"fill deadline {} is within {}s of now ({})",
				deadline, ctx.config.deadline_buffer_secs, ctx.now
			));
		}
		RuleOutcome::Pass
	}
}

pub struct AmountBounds;

#[async_trait]
impl Rule for AmountBounds {
	fn name(&self) -> &str {
		"amount_bounds"
	}

	async fn evaluate(&self, intent: &Intent, ctx: &RuleContext) -> RuleOutcome {
		for output in &intent.outputs {
			if output.amount.is_zero() {
				return RuleOutcome::reject(format!("zero output amount for token {}", output.token));
			}
			let Some(bounds) = ctx.config.token(output.chain_id, &output.token) else {
				continue;
			};
			if let Some(min) = bounds.min_amount.filter(|min| output.amount < *min) {
				return RuleOutcome::reject(format!(
					"output {} of {} below minimum {}",
					output.amount, output.token, min
				));
			}
			if let Some(max) = bounds.max_amount.filter(|max| output.amount > *max) {
				return RuleOutcome::reject(format!(
					"output {} of {} above maximum {}",
					output.amount, output.token, max
				));
			}
		}
		RuleOutcome::Pass
	}
}

/// Checks outputs against the balance left after other accepted intents,
/// and holds them for this intent when they fit.
pub struct Solvency;

#[async_trait]
impl Rule for Solvency {
	fn name(&self) -> &str {
		"solvency"
	}

	async fn evaluate(&self, intent: &Intent, ctx: &RuleContext) -> RuleOutcome {
		let required = match aggregate(&intent.outputs) {
			Ok(required) => required,
			Err(reason) => return RuleOutcome::reject(reason),
		};
		let mut holds = Vec::with_capacity(required.len());
		for ((chain_id, token), needed) in required {
			match ctx.solver_balance(chain_id, &token).await {
				Ok(balance) => holds.push(Hold {
					chain_id,
					token,
					needed,
					balance,
				}),
				Err(e) => {
					return RuleOutcome::reject(format!(
						"cannot read balance of {} on chain {}: {}",
						token, chain_id, e
					));
				}
			}
		}
		match ctx.reservations.reserve(&intent.key(), holds).await {
			Ok(()) => RuleOutcome::Pass,
			Err(reason) => RuleOutcome::reject(reason),
		}
	}
}

/// Treats inputs and outputs as the same denomination.
pub struct Profitability;

#[async_trait]
impl Rule for Profitability {
	fn name(&self) -> &str {
		"profitability"
	}

	async fn evaluate(&self, intent: &Intent, ctx: &RuleContext) -> RuleOutcome {
		let (Some(inputs), Some(outputs)) = (sum(&intent.inputs), sum(&intent.outputs)) else {
			return RuleOutcome::reject("amount overflow");
		};
		let Some(reward) = inputs.checked_sub(outputs) else {
			return RuleOutcome::reject(format!("inputs {} below outputs {}", inputs, outputs));
		};
		let margin = outputs
			.checked_mul(U256::from(ctx.config.min_profit_bps))
			.map(|v| v / U256::from(10_000u64));
		let Some(cost) = margin.and_then(|m| m.checked_add(ctx.config.fill_cost)) else {
			return RuleOutcome::reject("cost overflow");
		};
		if reward < cost {
			return RuleOutcome::reject(format!("reward {} below expected cost {}", reward, cost));
		}
		RuleOutcome::Pass
	}
}
