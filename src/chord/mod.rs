use crate::{
	config::VNodeConfig,
	error::{ChordError, Result},
	vnode::{VNode, VNodeRef},
	chord_id::hash,
};

use std::{fmt, sync::Arc};

use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use tracing::{info, info_span, warn, Instrument, Span};


mod state;
pub use state::{Lifecycle, VNodeSnapshot};
use state::ChordState;

mod private_ops;
mod public_ops;


/// A vnode hosted in this process. Cloning is cheap and every clone refers
/// to the same vnode.
#[derive(Clone)]
pub struct LocalVNode{
	inner: Arc<Inner>,
}

struct Inner{
	// Core data
	address: String,
	id: u64,
	config: VNodeConfig,
	state: RwLock<ChordState>,

	// Background routines, present while Active
	routines: Mutex<Option<Routines>>,

	span: Span,
}

/// Each routine has its own stop channel and observes it only while waiting
/// for its next tick.
struct Routines{
	stop_stabilize: oneshot::Sender<()>,
	stop_fix_finger: oneshot::Sender<()>,
	stop_check_predecessor: oneshot::Sender<()>,
	handles: Vec<JoinHandle<()>>,
}

impl LocalVNode{

	/// Creates a vnode at `address`. The address is fixed for the vnode's
	/// lifetime; when listening on an ephemeral port, pass the resolved
	/// address.
	pub fn new(address: impl Into<String>, config: VNodeConfig) -> Result<Self>{
		config.validate()?;
		let address = address.into();
		let id = hash(address.as_bytes());
		let span = info_span!("vnode", addr = %address, id);
		let state = RwLock::new(ChordState::new(config.max_fingers));

		Ok(LocalVNode{
			inner: Arc::new(Inner{
				address,
				id,
				config,
				state,
				routines: Mutex::new(None),
				span,
			}),
		})
	}

	pub fn config(&self) -> &VNodeConfig{
		&self.inner.config
	}

	/// This vnode as a capability handle.
	pub fn to_ref(&self) -> VNodeRef{
		Arc::new(self.clone())
	}

	/// Creates a new ring containing only this vnode.
	pub async fn create(&self) -> Result<()>{
		{
			let mut state = self.inner.state.write().await;
			expect_lifecycle(state.lifecycle, Lifecycle::Uninitialized)?;
			state.predecessor = None;
			state.set_successor(self.to_ref());
			state.lifecycle = Lifecycle::Created;
		}
		info!(parent: &self.inner.span, "created new ring");
		Ok(())
	}

	/// Joins the ring `introducer` belongs to. Failing to reach the
	/// introducer aborts the join and leaves the vnode uninitialized.
	pub async fn join(&self, introducer: VNodeRef) -> Result<()>{
		async {
			expect_lifecycle(self.lifecycle().await, Lifecycle::Uninitialized)?;
			info!(introducer = introducer.address(), "joining ring");

			let successor = introducer.find_successor(self.id()).await?;
			{
				let mut state = self.inner.state.write().await;
				expect_lifecycle(state.lifecycle, Lifecycle::Uninitialized)?;
				state.predecessor = None;
				state.set_successor(successor.clone());
				state.lifecycle = Lifecycle::Joined;
			}
			info!(successor = successor.address(), "found first successor");

			// Optimistic hint, the successor checks it on its own.
			if let Err(e) = successor.notify(self.to_ref()).await{
				warn!(error = %e, successor = successor.address(), "could not notify successor after join");
			}
			Ok::<(), ChordError>(())
		}
		.instrument(self.inner.span.clone())
		.await
	}

	/// Starts the stabilize, fix-finger and check-predecessor routines.
	pub async fn start(&self) -> Result<()>{
		let mut routines = self.inner.routines.lock().await;
		{
			let mut state = self.inner.state.write().await;
			match state.lifecycle{
				Lifecycle::Created | Lifecycle::Joined => state.lifecycle = Lifecycle::Active,
				other => return Err(ChordError::InvalidState{ expected: "created or joined", actual: other.as_str() }),
			}
		}

		let (stop_stabilize, stabilize_rx) = oneshot::channel();
		let (stop_fix_finger, fix_finger_rx) = oneshot::channel();
		let (stop_check_predecessor, check_predecessor_rx) = oneshot::channel();

		let span = self.inner.span.clone();
		let handles = vec![
			tokio::spawn(self.clone().stabilize_routine(stabilize_rx).instrument(span.clone())),
			tokio::spawn(self.clone().fix_fingers_routine(fix_finger_rx).instrument(span.clone())),
			tokio::spawn(self.clone().check_predecessor_routine(check_predecessor_rx).instrument(span)),
		];

		*routines = Some(Routines{
			stop_stabilize,
			stop_fix_finger,
			stop_check_predecessor,
			handles,
		});
		info!(parent: &self.inner.span, "background routines started");
		Ok(())
	}

	/// Signals the background routines and waits for them to finish, then
	/// forgets all routing state. An in-flight call is not interrupted. The
	/// vnode cannot be restarted.
	pub async fn stop(&self){
		let routines = self.inner.routines.lock().await.take();
		{
			let mut state = self.inner.state.write().await;
			if state.lifecycle == Lifecycle::Stopped{
				return;
			}
			state.lifecycle = Lifecycle::Stopped;
		}

		if let Some(routines) = routines{
			// A routine that already exited has dropped its receiver.
			let _ = routines.stop_stabilize.send(());
			let _ = routines.stop_fix_finger.send(());
			let _ = routines.stop_check_predecessor.send(());
			for handle in routines.handles{
				if let Err(e) = handle.await{
					warn!(parent: &self.inner.span, error = %e, "background routine ended abnormally");
				}
			}
		}

		// A created vnode is its own successor; drop those references.
		{
			let mut state = self.inner.state.write().await;
			state.successor = None;
			state.predecessor = None;
			state.fingers.iter_mut().for_each(|finger| *finger = None);
		}
		info!(parent: &self.inner.span, "vnode stopped");
	}

	/// Hashes `key` and resolves the address of the vnode owning it.
	pub async fn lookup(&self, key: &str) -> Result<String>{
		let id = hash(key.as_bytes());
		info!(parent: &self.inner.span, key, id, "lookup");
		self.lookup_id(id).await
	}

	/// Resolves the address of the vnode owning `id`.
	pub async fn lookup_id(&self, id: u64) -> Result<String>{
		let span = self.inner.span.clone();
		async {
			match self.find_successor(id).await{
				Ok(owner) => {
					info!(id, owner = owner.address(), "lookup resolved");
					Ok(owner.address().to_string())
				},
				Err(e) => {
					warn!(id, error = %e, "lookup failed");
					Err(ChordError::RingUnresolved(e.to_string()))
				},
			}
		}
		.instrument(span)
		.await
	}

	pub async fn lifecycle(&self) -> Lifecycle{
		self.inner.state.read().await.lifecycle
	}

	pub async fn successor(&self) -> Option<VNodeRef>{
		self.inner.state.read().await.successor.clone()
	}

	pub async fn predecessor(&self) -> Option<VNodeRef>{
		self.inner.state.read().await.predecessor.clone()
	}

	/// Finger `index` (1-based), if it has been computed.
	pub async fn finger(&self, index: u32) -> Result<Option<VNodeRef>>{
		self.check_finger_index(index)?;
		Ok(self.inner.state.read().await.fingers[index as usize - 1].clone())
	}

	pub async fn snapshot(&self) -> VNodeSnapshot{
		let state = self.inner.state.read().await;
		VNodeSnapshot::capture(&self.inner.address, self.inner.id, &state)
	}

	fn check_finger_index(&self, index: u32) -> Result<()>{
		let max = self.inner.config.max_fingers;
		if index < 1 || index > max{
			return Err(ChordError::FingerIndexInvalid{ index, max });
		}
		Ok(())
	}

	/// The successor slot. Empty before Create/Join and after Stop.
	async fn current_successor(&self) -> Result<VNodeRef>{
		let state = self.inner.state.read().await;
		state.successor.clone().ok_or(ChordError::InvalidState{
			expected: "created or joined",
			actual: state.lifecycle.as_str(),
		})
	}
}

fn expect_lifecycle(actual: Lifecycle, expected: Lifecycle) -> Result<()>{
	if actual != expected{
		return Err(ChordError::InvalidState{ expected: expected.as_str(), actual: actual.as_str() });
	}
	Ok(())
}

impl fmt::Debug for LocalVNode{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
		f.debug_struct("LocalVNode")
			.field("address", &self.inner.address)
			.field("id", &self.inner.id)
			.finish()
	}
}
