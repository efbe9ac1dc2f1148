use serde::{Serialize, Deserialize};

use crate::error::{ChordError, RemoteErrorKind};

pub mod tcp_adaptor;
pub use tcp_adaptor::{ServerHandle, TransportClient, TransportServer};

mod remote;
pub use remote::RemoteVNode;


/// The four remote procedures. Nodes are always named by address; ids are
/// recomputed on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request{
	FindSuccessor{id: u64},
	Notify{address: String},
	Ping,
	GetPredecessor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response{
	/// Reply to FindSuccessor and GetPredecessor.
	Address{address: String},
	/// Reply to Notify and Ping.
	Empty,
	Error{kind: RemoteErrorKind, msg: String},
}

impl Response{
	pub(crate) fn from_error(err: &ChordError) -> Self{
		let msg = match err{
			ChordError::NetworkUnreachable{ reason, .. } => reason.clone(),
			other => other.to_string(),
		};
		Response::Error{ kind: err.into(), msg }
	}
}

/// A request or response tagged with the id that pairs them on a connection.
#[derive(Debug, Serialize, Deserialize)]
pub struct Frame<T>{
	pub seq: u64,
	pub body: T,
}
