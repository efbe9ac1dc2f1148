use std::{fmt::Debug, hash::Hash};

use rand::Rng;
use sha1::{Digest, Sha1};

/// Hashes arbitrary bytes onto the ring. The first eight bytes of the
/// SHA-1 digest are read as a little endian u64.
pub fn hash(data: &[u8]) -> u64 {
	let digest = Sha1::digest(data);
	let mut head = [0u8; 8];
	head.copy_from_slice(&digest[..8]);
	u64::from_le_bytes(head)
}

/// A ChordId is a point around the chord ring. It must be able to be compared with other ChordId's, calculate
/// what the ChordId of a finger of given index should be, and determine the index after a given index.
pub trait ChordId: Copy + Eq + Ord + Hash + Send + Sync + Debug + 'static {
	/// Number of bits in the identifier space.
	const BITS: u32;

	/// Clockwise distance from `self` to `other`.
	fn distance_to(&self, other: &Self) -> Self;

	/// Calculate the ChordId of finger `index` (1-based): self + 2^(index - 1).
	fn calculate_finger(&self, index: u32) -> Self;

	/// Calculate the next index, given the previous index.
	/// Wraps back to one after reaching `max`.
	fn next_index(prev_index: u32, max: u32) -> u32 {
		if prev_index >= max {
			1
		} else {
			prev_index + 1
		}
	}

	/// Tests if self is in the range (lower, upper], walking clockwise from lower.
	/// When lower == upper the range covers the whole ring.
	fn is_between(&self, lower: &Self, upper: &Self) -> bool {
		if lower == upper {
			return true;
		}
		self != lower && lower.distance_to(self) <= lower.distance_to(upper)
	}

	/// Tests if self is in the open range (lower, upper).
	fn is_strictly_between(&self, lower: &Self, upper: &Self) -> bool {
		self != upper && self.is_between(lower, upper)
	}
}

impl ChordId for u64 {
	const BITS: u32 = 64;

	fn distance_to(&self, other: &Self) -> Self {
		other.wrapping_sub(*self)
	}

	fn calculate_finger(&self, index: u32) -> Self {
		let offset = 1u64.checked_shl(index.saturating_sub(1)).unwrap_or(0);
		self.wrapping_add(offset)
	}
}

impl ChordId for u8 {
	const BITS: u32 = 8;

	fn distance_to(&self, other: &Self) -> Self {
		other.wrapping_sub(*self)
	}

	fn calculate_finger(&self, index: u32) -> Self {
		let offset = 1u8.checked_shl(index.saturating_sub(1)).unwrap_or(0);
		self.wrapping_add(offset)
	}
}

/// Picks a uniform value in [low, high). Returns `low` for an empty range.
pub fn random_interval(low: u64, high: u64) -> u64 {
	if high <= low {
		return low;
	}
	rand::thread_rng().gen_range(low..high)
}
