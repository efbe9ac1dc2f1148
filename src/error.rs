//! Error types for ring maintenance and lookups.

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, ChordError>;

/// Errors surfaced by vnode operations, local or remote.
#[derive(Debug, thiserror::Error)]
pub enum ChordError {
	/// A remote peer could not be reached, or the connection to it broke.
	#[error("cannot reach {address}: {reason}")]
	NetworkUnreachable { address: String, reason: String },

	/// A peer answered with something that does not fit the request.
	#[error("protocol error: {0}")]
	Protocol(String),

	/// The vnode has no predecessor. This is a valid state, not a fault.
	#[error("vnode has no predecessor")]
	NoPredecessor,

	/// Finger numbers are 1-based and bounded by the finger table length.
	#[error("finger index {index} outside [1, {max}]")]
	FingerIndexInvalid { index: u32, max: u32 },

	/// A lookup could not be completed.
	#[error("lookup could not be resolved: {0}")]
	RingUnresolved(String),

	/// A lifecycle operation was called in the wrong state.
	#[error("vnode is {actual}, expected {expected}")]
	InvalidState { expected: &'static str, actual: &'static str },

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

impl ChordError {
	pub(crate) fn unreachable(address: &str, reason: impl ToString) -> Self {
		ChordError::NetworkUnreachable {
			address: address.to_string(),
			reason: reason.to_string(),
		}
	}

	/// Is this a liveness failure rather than an answer from the peer?
	pub fn is_unreachable(&self) -> bool {
		matches!(self, ChordError::NetworkUnreachable { .. } | ChordError::Io(_))
	}
}

/// Error form carried over the wire. Kinds map back onto `ChordError`
/// variants on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
	/// Names the address that could not be reached, which may lie past
	/// the peer sending the error.
	NetworkUnreachable { address: String },
	Protocol,
	NoPredecessor,
	FingerIndexInvalid,
	RingUnresolved,
	Other,
}

impl From<&ChordError> for RemoteErrorKind {
	fn from(err: &ChordError) -> Self {
		match err {
			ChordError::NetworkUnreachable { address, .. } => RemoteErrorKind::NetworkUnreachable { address: address.clone() },
			ChordError::Protocol(_) => RemoteErrorKind::Protocol,
			ChordError::NoPredecessor => RemoteErrorKind::NoPredecessor,
			ChordError::FingerIndexInvalid { .. } => RemoteErrorKind::FingerIndexInvalid,
			ChordError::RingUnresolved(_) => RemoteErrorKind::RingUnresolved,
			_ => RemoteErrorKind::Other,
		}
	}
}

impl RemoteErrorKind {
	/// Rebuild a local error from a kind reported by `peer`.
	pub(crate) fn into_error(self, peer: &str, msg: String) -> ChordError {
		match self {
			RemoteErrorKind::NoPredecessor => ChordError::NoPredecessor,
			RemoteErrorKind::NetworkUnreachable { address } => ChordError::NetworkUnreachable {
				address,
				reason: format!("{msg} (reported by {peer})"),
			},
			RemoteErrorKind::RingUnresolved => ChordError::RingUnresolved(msg),
			RemoteErrorKind::FingerIndexInvalid
			| RemoteErrorKind::Protocol
			| RemoteErrorKind::Other => ChordError::Protocol(format!("{peer} reported: {msg}")),
		}
	}
}
