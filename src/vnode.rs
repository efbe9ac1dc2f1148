use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;

use crate::{chord_id::{hash, ChordId}, error::Result};

/// Shared handle to any ring participant, local or remote.
pub type VNodeRef = Arc<dyn VNode>;

/// The operations every ring participant answers. The ring algorithms only
/// ever talk to other participants through this trait, so a hop may be an
/// in-process vnode or a peer across the network.
#[async_trait]
pub trait VNode: Send + Sync + Debug {
	/// host:port, the only persistent identity of a vnode.
	fn address(&self) -> &str;

	/// Position on the ring, derived from the address.
	fn id(&self) -> u64 {
		hash(self.address().as_bytes())
	}

	/// Tests if this node lies in (low, high] clockwise.
	fn is_between(&self, low: &dyn VNode, high: &dyn VNode) -> bool {
		self.id().is_between(&low.id(), &high.id())
	}

	/// Find the vnode responsible for `id`.
	async fn find_successor(&self, id: u64) -> Result<VNodeRef>;

	/// Tell this vnode that `candidate` might be its predecessor.
	async fn notify(&self, candidate: VNodeRef) -> Result<()>;

	async fn ping(&self) -> Result<()>;

	/// Fails with `ChordError::NoPredecessor` when none is known.
	async fn get_predecessor(&self) -> Result<VNodeRef>;
}

/// Two references name the same participant.
pub fn same_node(a: &dyn VNode, b: &dyn VNode) -> bool {
	a.id() == b.id()
}
