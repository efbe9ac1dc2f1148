#![allow(dead_code)]

use std::future::Future;

use chord_ring::{LocalVNode, VNode, VNodeConfig};
use tokio::time::{sleep, timeout, Duration};


/// Intervals short enough for tests to converge in well under a second.
pub fn fast_config() -> VNodeConfig{
	VNodeConfig{
		min_stabilize_interval: 10,
		max_stabilize_interval: 30,
		fix_finger_interval: 5,
		check_predecessor_interval: 20,
		max_successors: 1,
		max_fingers: 64,
	}
}

/// Builds `qty` in-process vnodes. The first creates the ring, the rest
/// join through it. No background routines are started.
pub async fn make_nodes(qty: usize, config: VNodeConfig) -> Vec<LocalVNode>{
	let mut v: Vec<LocalVNode> = Vec::new();
	for i in 0..qty{
		let addr = format!("192.168.0.10:{}", 2000 + i);
		let node = LocalVNode::new(addr, config.clone()).expect("config should be valid");
		if i == 0{
			node.create().await.expect("create should succeed");
		}else{
			node.join(v[0].to_ref()).await.expect("join should succeed");
		}
		v.push(node);
	}
	v
}

/// Runs stabilize on every vnode, in order, until the ring is consistent.
pub async fn stabilize_until_consistent(nodes: &[LocalVNode], max_rounds: usize) -> bool{
	for _ in 0..max_rounds{
		if is_consistent(nodes).await{
			return true;
		}
		for node in nodes{
			node.stabilize().await.expect("stabilize should succeed");
		}
	}
	is_consistent(nodes).await
}

pub async fn fix_all_fingers(nodes: &[LocalVNode]){
	for node in nodes{
		for index in 1..=node.config().max_fingers{
			node.fix_finger(index).await.expect("fix finger should succeed");
		}
	}
}

/// Every vnode's successor and predecessor match the sorted order of ids.
pub async fn is_consistent(nodes: &[LocalVNode]) -> bool{
	let ids = sorted_ids(nodes);
	for node in nodes{
		let pos = ids.iter().position(|id| *id == node.id()).expect("node id is listed");
		let next = ids[(pos + 1) % ids.len()];
		let prev = ids[(pos + ids.len() - 1) % ids.len()];

		match node.successor().await{
			Some(succ) if succ.id() == next => {},
			_ => return false,
		}
		match node.predecessor().await{
			Some(pred) if pred.id() == prev => {},
			_ => return false,
		}
	}
	true
}

pub fn sorted_ids(nodes: &[LocalVNode]) -> Vec<u64>{
	let mut ids: Vec<u64> = nodes.iter().map(|n| n.id()).collect();
	ids.sort_unstable();
	ids
}

/// The id of the vnode owning `target`: the first id clockwise at or after it.
pub fn owner_of(ids: &[u64], target: u64) -> u64{
	ids.iter().copied().find(|id| *id >= target).unwrap_or(ids[0])
}

/// Polls `check` until it holds or `limit` passes.
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>,
{
	timeout(limit, async{
		loop{
			if check().await{
				return;
			}
			sleep(Duration::from_millis(20)).await;
		}
	}).await.is_ok()
}
