//! Per-key async locks that are released from the map once unused.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub(crate) struct KeyLocks {
	locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Holds the lock for one key. Dropping it removes the key's entry when no
/// other task holds or waits for it.
pub(crate) struct KeyGuard<'a> {
	locks: &'a DashMap<String, Arc<Mutex<()>>>,
	key: String,
	lock: Arc<Mutex<()>>,
	guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
	pub fn new() -> Self {
		Self {
			locks: DashMap::new(),
		}
	}

	pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
		let lock = self
			.locks
			.entry(key.to_string())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone();
		let guard = lock.clone().lock_owned().await;
		KeyGuard {
			locks: &self.locks,
			key: key.to_string(),
			lock,
			guard: Some(guard),
		}
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.locks.len()
	}
}

impl Drop for KeyGuard<'_> {
	fn drop(&mut self) {
		self.guard.take();
		// Owners left: the map entry and `self.lock`.
		self.locks.remove_if(&self.key, |_, lock| {
			Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn test_entry_removed_after_release() {
		let locks = KeyLocks::new();
		for i in 0..100 {
			let _guard = locks.lock(&format!("order:{}", i)).await;
		}
		assert_eq!(locks.len(), 0);
	}

	#[tokio::test]
	async fn test_waiter_keeps_entry_alive() {
		let locks = Arc::new(KeyLocks::new());
		let first = locks.lock("k").await;

		let waiter = {
			let locks = locks.clone();
			tokio::spawn(async move {
				let _guard = locks.lock("k").await;
				tokio::time::sleep(Duration::from_millis(10)).await;
			})
		};
		tokio::time::sleep(Duration::from_millis(10)).await;
		drop(first);
		assert_eq!(locks.len(), 1);

		waiter.await.unwrap();
		assert_eq!(locks.len(), 0);
	}
}
