//! Tuning values for a local vnode.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{ChordError, Result};

/// Largest finger table the 64-bit identifier space supports.
pub const MAX_FINGERS: u32 = 64;

/// Intervals are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VNodeConfig {
	pub min_stabilize_interval: u64,
	pub max_stabilize_interval: u64,
	pub fix_finger_interval: u64,
	pub check_predecessor_interval: u64,
	/// Only a single successor slot is maintained.
	pub max_successors: u32,
	pub max_fingers: u32,
}

impl Default for VNodeConfig {
	fn default() -> Self {
		Self {
			min_stabilize_interval: 15_000,
			max_stabilize_interval: 45_000,
			fix_finger_interval: 15_000,
			check_predecessor_interval: 15_000,
			max_successors: 1,
			max_fingers: 6,
		}
	}
}

impl VNodeConfig {
	/// Load a config from a JSON file. Missing fields take their defaults.
	pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		let raw = std::fs::read_to_string(path)?;
		let config: VNodeConfig = serde_json::from_str(&raw)
			.map_err(|e| ChordError::Config(e.to_string()))?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if self.max_fingers == 0 || self.max_fingers > MAX_FINGERS {
			return Err(ChordError::Config(format!(
				"max_fingers must be in 1..={MAX_FINGERS}, got {}",
				self.max_fingers
			)));
		}
		if self.max_successors != 1 {
			return Err(ChordError::Config(format!(
				"only one successor slot is supported, got {}",
				self.max_successors
			)));
		}
		if self.min_stabilize_interval > self.max_stabilize_interval {
			return Err(ChordError::Config(format!(
				"min_stabilize_interval ({}) exceeds max_stabilize_interval ({})",
				self.min_stabilize_interval, self.max_stabilize_interval
			)));
		}
		let intervals = [
			self.min_stabilize_interval,
			self.fix_finger_interval,
			self.check_predecessor_interval,
		];
		if intervals.contains(&0) {
			return Err(ChordError::Config("intervals must be non-zero".into()));
		}
		Ok(())
	}

	/// A jittered stabilize delay in [min, max).
	pub fn stabilize_delay(&self) -> Duration {
		let ms = crate::chord_id::random_interval(self.min_stabilize_interval, self.max_stabilize_interval);
		Duration::from_millis(ms)
	}

	pub fn fix_finger_delay(&self) -> Duration {
		Duration::from_millis(self.fix_finger_interval)
	}

	pub fn check_predecessor_delay(&self) -> Duration {
		Duration::from_millis(self.check_predecessor_interval)
	}
}
