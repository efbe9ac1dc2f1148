mod common;

use std::sync::Arc;

use chord_ring::{hash, ChordError, LocalVNode, RemoteVNode, Ring, TransportClient, TransportServer, VNode, VNodeConfig};
use tokio::time::Duration;


fn all_vnodes(rings: &[&Ring]) -> Vec<LocalVNode>{
	rings.iter().flat_map(|ring| ring.vnodes().iter().cloned()).collect()
}

#[tokio::test]
async fn networked_pair_forms_a_cycle(){
	let first = Ring::create(1, "127.0.0.1:0", common::fast_config()).await.unwrap();
	let introducer = first.vnodes()[0].address().to_string();
	let second = Ring::join(1, "127.0.0.1:0", &introducer, common::fast_config()).await.unwrap();

	let v = all_vnodes(&[&first, &second]);
	let converged = common::wait_until(Duration::from_secs(10), || common::is_consistent(&v)).await;
	assert!(converged, "pair did not converge");

	let a = &v[0];
	let b = &v[1];
	assert_eq!(a.successor().await.unwrap().address(), b.address());
	assert_eq!(b.successor().await.unwrap().address(), a.address());

	// the ring's own client reaches the other host
	let peer = RemoteVNode::new(b.address(), first.client().clone());
	assert_eq!(peer.get_predecessor().await.unwrap().address(), a.address());

	second.shutdown().await;
	first.shutdown().await;
}

#[tokio::test]
async fn lookups_agree_across_hosts(){
	let first = Ring::create(3, "127.0.0.1:0", common::fast_config()).await.unwrap();
	let introducer = first.vnodes()[1].address().to_string();
	let second = Ring::join(2, "127.0.0.1:0", &introducer, common::fast_config()).await.unwrap();

	let v = all_vnodes(&[&first, &second]);
	let converged = common::wait_until(Duration::from_secs(15), || common::is_consistent(&v)).await;
	assert!(converged, "ring did not converge");

	let ids = common::sorted_ids(&v);
	for i in 0..20{
		let key = format!("key-{i}");
		let expected = common::owner_of(&ids, hash(key.as_bytes()));
		for node in &v{
			let owner = node.lookup(&key).await.unwrap();
			assert_eq!(hash(owner.as_bytes()), expected, "{} disagrees on {key}", node.address());
		}
		assert_eq!(hash(first.lookup(&key).await.unwrap().as_bytes()), expected);
		assert_eq!(hash(second.lookup(&key).await.unwrap().as_bytes()), expected);
	}

	second.shutdown().await;
	first.shutdown().await;
}

#[tokio::test]
async fn dead_predecessor_is_cleared(){
	let first = Ring::create(1, "127.0.0.1:0", common::fast_config()).await.unwrap();
	let introducer = first.vnodes()[0].address().to_string();
	let second = Ring::join(1, "127.0.0.1:0", &introducer, common::fast_config()).await.unwrap();

	let v = all_vnodes(&[&first, &second]);
	assert!(common::wait_until(Duration::from_secs(10), || common::is_consistent(&v)).await);

	let survivor = first.vnodes()[0].clone();
	second.shutdown().await;

	let cleared = common::wait_until(Duration::from_secs(5), || async{
		survivor.predecessor().await.is_none()
	}).await;
	assert!(cleared, "dead predecessor was not cleared");

	first.shutdown().await;
}

#[tokio::test]
async fn join_through_unreachable_introducer_fails(){
	let dead = TransportServer::bind("127.0.0.1:0").await.unwrap().address().to_string();
	let err = Ring::join(1, "127.0.0.1:0", &dead, common::fast_config()).await.unwrap_err();
	assert!(err.is_unreachable(), "unexpected error: {err}");
}

#[tokio::test]
async fn remote_proxy_mirrors_the_local_vnode(){
	let server = TransportServer::bind("127.0.0.1:0").await.unwrap();
	let local = LocalVNode::new(server.address(), VNodeConfig::default()).unwrap();
	local.create().await.unwrap();
	let client = Arc::new(TransportClient::new());
	let handle = server.serve(local.to_ref(), client.clone());

	let remote = RemoteVNode::new(handle.address(), client.clone());
	assert_eq!(remote.id(), local.id());
	remote.ping().await.unwrap();
	assert!(matches!(remote.get_predecessor().await, Err(ChordError::NoPredecessor)));
	assert_eq!(remote.find_successor(12345).await.unwrap().address(), local.address());

	// a notify over the wire arrives as a remote candidate
	let other = RemoteVNode::new("127.0.0.1:1", client.clone());
	remote.notify(Arc::new(other)).await.unwrap();
	assert_eq!(remote.get_predecessor().await.unwrap().address(), "127.0.0.1:1");
	assert_eq!(local.predecessor().await.unwrap().address(), "127.0.0.1:1");

	handle.shutdown().await;
	assert!(remote.ping().await.unwrap_err().is_unreachable());
}
