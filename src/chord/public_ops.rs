use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::{
	chord_id::ChordId,
	error::{ChordError, Result},
	vnode::{same_node, VNode, VNodeRef},
};

use super::LocalVNode;


#[async_trait]
impl VNode for LocalVNode{

	fn address(&self) -> &str{
		&self.inner.address
	}

	fn id(&self) -> u64{
		self.inner.id
	}

	/// Recursive lookup. Errors from later hops are returned unchanged.
	#[instrument(skip(self))]
	async fn find_successor(&self, id: u64) -> Result<VNodeRef>{
		let successor = self.current_successor().await?;

		// id falls between us and our successor, so the successor owns it
		if id.is_between(&self.id(), &successor.id()) {
			debug!(successor = successor.address(), "successor owns id");
			return Ok(successor);
		}

		let hop = self.closest_preceding_node(id).await;
		if same_node(hop.as_ref(), self) {
			debug!("no closer finger, answering with self");
			return Ok(self.to_ref());
		}

		debug!(hop = hop.address(), "forwarding lookup");
		hop.find_successor(id).await
	}

	/// Adopts `candidate` as predecessor if there is none, or if it sits
	/// strictly between the current predecessor and this vnode.
	#[instrument(skip_all, fields(candidate = candidate.address()))]
	async fn notify(&self, candidate: VNodeRef) -> Result<()>{
		if same_node(candidate.as_ref(), self) {
			return Ok(());
		}

		let mut state = self.inner.state.write().await;
		let adopt = match &state.predecessor {
			None => true,
			Some(predecessor) => candidate.id().is_strictly_between(&predecessor.id(), &self.id()),
		};
		if adopt {
			info!("updated predecessor");
			state.predecessor = Some(candidate);
		}
		Ok(())
	}

	async fn ping(&self) -> Result<()>{
		Ok(())
	}

	async fn get_predecessor(&self) -> Result<VNodeRef>{
		self.inner.state.read().await
			.predecessor
			.clone()
			.ok_or(ChordError::NoPredecessor)
	}
}


impl LocalVNode{

	/// Scans the finger table from the farthest finger back for a node
	/// strictly between this vnode and `id`. Falls back to self.
	pub async fn closest_preceding_node(&self, id: u64) -> VNodeRef{
		let state = self.inner.state.read().await;
		for finger in state.fingers.iter().rev().flatten() {
			if finger.id().is_strictly_between(&self.id(), &id) {
				return finger.clone();
			}
		}
		drop(state);
		self.to_ref()
	}
}
