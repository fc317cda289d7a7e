//! Small helpers shared across crates.

use sha3::{Digest, Keccak256};

/// Current unix timestamp in seconds. Returns 0 if the clock is before the epoch.
pub fn current_timestamp() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

/// Shortens a hex identifier for log output.
pub fn truncate_id(id: &str) -> String {
	let id = id.strip_prefix("0x").unwrap_or(id);
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

/// Keccak-256 digest, hex encoded.
pub fn keccak_hex(bytes: &[u8]) -> String {
	hex::encode(Keccak256::digest(bytes))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("0xa1"), "a1");
		assert_eq!(truncate_id("0x0123456789abcdef"), "01234567..");
	}

	#[test]
	fn test_keccak_hex_is_stable() {
		// keccak256("") is a well known constant.
		assert_eq!(
			keccak_hex(b""),
			"c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
		);
	}
}
