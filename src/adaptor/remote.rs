use std::{fmt, sync::Arc};

use async_trait::async_trait;

use super::{Request, Response, TransportClient};
use crate::{error::{ChordError, Result}, vnode::{VNode, VNodeRef}};


/// A vnode living behind the transport. Holds nothing but the address; the
/// id is recomputed from it on every use.
#[derive(Clone)]
pub struct RemoteVNode{
	address: String,
	client: Arc<TransportClient>,
}

impl RemoteVNode{
	pub fn new(address: impl Into<String>, client: Arc<TransportClient>) -> Self{
		Self{
			address: address.into(),
			client,
		}
	}

	fn peer(&self, address: String) -> VNodeRef{
		Arc::new(RemoteVNode::new(address, self.client.clone()))
	}

	fn unexpected(&self, procedure: &str, response: Response) -> ChordError{
		ChordError::Protocol(format!("{} answered {procedure} with {response:?}", self.address))
	}

	async fn expect_address(&self, procedure: &str, request: Request) -> Result<VNodeRef>{
		match self.client.call(&self.address, request).await?{
			Response::Address{ address } => Ok(self.peer(address)),
			other => Err(self.unexpected(procedure, other)),
		}
	}

	async fn expect_empty(&self, procedure: &str, request: Request) -> Result<()>{
		match self.client.call(&self.address, request).await?{
			Response::Empty => Ok(()),
			other => Err(self.unexpected(procedure, other)),
		}
	}
}

#[async_trait]
impl VNode for RemoteVNode{
	fn address(&self) -> &str{
		&self.address
	}

	async fn find_successor(&self, id: u64) -> Result<VNodeRef>{
		self.expect_address("FindSuccessor", Request::FindSuccessor{ id }).await
	}

	async fn notify(&self, candidate: VNodeRef) -> Result<()>{
		let address = candidate.address().to_string();
		self.expect_empty("Notify", Request::Notify{ address }).await
	}

	async fn ping(&self) -> Result<()>{
		self.expect_empty("Ping", Request::Ping).await
	}

	async fn get_predecessor(&self) -> Result<VNodeRef>{
		self.expect_address("GetPredecessor", Request::GetPredecessor).await
	}
}

impl fmt::Debug for RemoteVNode{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
		f.debug_tuple("RemoteVNode").field(&self.address).finish()
	}
}
