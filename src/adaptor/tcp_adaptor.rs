use std::{collections::HashMap, fmt, io::{self, ErrorKind}, sync::{Arc, atomic::{AtomicBool, AtomicU64, Ordering}}};

use super::{Frame, RemoteVNode, Request, Response};
use crate::{error::{ChordError, Result}, vnode::{VNode, VNodeRef}};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Deserializer, error::Category};
use tokio::{io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt}, net::{TcpListener, TcpStream, tcp::{OwnedReadHalf, OwnedWriteHalf}}, select, sync::{oneshot, Mutex}, task::{JoinHandle, JoinSet}};
use tracing::{debug, info, info_span, instrument, warn, Instrument};

/// Upper bound on a single buffered frame.
const MAX_FRAME_LEN: usize = 1024 * 1024;


/// Reads a stream of concatenated JSON frames.
pub(crate) struct FrameReader<R>{
	stream: R,
	buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R>{
	pub fn new(stream: R) -> Self{
		Self{
			stream,
			buffer: Vec::new(),
		}
	}

	/// Cancel safe: bytes are only consumed once appended to the buffer.
	pub async fn read<T: DeserializeOwned>(&mut self) -> io::Result<T>{
		loop{
			// attempt to deserialize buffer
			let (result, offset) = {
				let mut deserializer = Deserializer::from_slice(self.buffer.as_slice()).into_iter::<T>();
				let result = deserializer.next();
				(result, deserializer.byte_offset())
			};

			match result{
				Some(Ok(msg)) => {
					self.buffer.drain(..offset);
					return Ok(msg);
				},
				// more information may arrive later
				Some(Err(ref e)) if e.classify() == Category::Eof => {},
				Some(Err(e)) => {
					return Err(io::Error::new(ErrorKind::InvalidData, e));
				},
				None => {},
			}

			if self.buffer.len() > MAX_FRAME_LEN{
				return Err(io::Error::new(ErrorKind::InvalidData, "frame exceeds size limit"));
			}

			// else, read bytes into buffer
			let mut tmp_buf = [0u8; 1024];
			match self.stream.read(&mut tmp_buf).await{
				Ok(0) => {
					return Err(io::Error::from(ErrorKind::UnexpectedEof));
				},
				Ok(len) => {
					self.buffer.extend_from_slice(&tmp_buf[..len]);
				},
				Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
				Err(e) => return Err(e),
			}
		}
	}
}

pub(crate) async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(stream: &mut W, msg: &T) -> io::Result<()>{
	let mut raw_data = serde_json::to_vec(msg)?;
	raw_data.push(b'\n');
	stream.write_all(&raw_data).await?;
	stream.flush().await
}


type Waiting = HashMap<u64, oneshot::Sender<Result<Response>>>;

/// State shared between a connection's callers and its reader task.
#[derive(Default)]
struct Shared{
	closed: AtomicBool,
	waiting: Mutex<Waiting>,
}

impl Shared{
	/// Marks the connection dead and fails every outstanding call.
	async fn close(&self, address: &str, err: &io::Error){
		let mut waiting = self.waiting.lock().await;
		self.closed.store(true, Ordering::SeqCst);
		for (_, tx) in waiting.drain(){
			let reason = if err.kind() == ErrorKind::InvalidData{
				ChordError::Protocol(format!("malformed reply from {address}: {err}"))
			}else{
				ChordError::unreachable(address, err)
			};
			let _ = tx.send(Err(reason));
		}
	}
}

/// One connection to a remote address. Calls are tagged with a sequence
/// number so any number of them can be in flight at once.
struct Connection{
	address: String,
	writer: Mutex<OwnedWriteHalf>,
	shared: Arc<Shared>,
	next_seq: AtomicU64,
	reader: JoinHandle<()>,
}

impl Connection{
	/// Connects and probes the peer with a Ping. Either failing fails the open.
	async fn open(address: &str) -> Result<Arc<Self>>{
		let stream = TcpStream::connect(address).await
			.map_err(|e| ChordError::unreachable(address, e))?;
		let (read_half, write_half) = stream.into_split();

		let shared = Arc::new(Shared::default());
		let reader = tokio::spawn(Self::read_replies(address.to_string(), FrameReader::new(read_half), shared.clone()));

		let conn = Arc::new(Connection{
			address: address.to_string(),
			writer: Mutex::new(write_half),
			shared,
			next_seq: AtomicU64::new(1),
			reader,
		});

		match conn.call(Request::Ping).await{
			Ok(Response::Empty) => {
				debug!(address, "connected");
				Ok(conn)
			},
			Ok(other) => Err(ChordError::Protocol(format!("{address} answered ping with {other:?}"))),
			Err(e) => Err(ChordError::unreachable(address, format!("liveness probe failed: {e}"))),
		}
	}

	fn is_closed(&self) -> bool{
		self.shared.closed.load(Ordering::SeqCst)
	}

	async fn call(&self, request: Request) -> Result<Response>{
		let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		{
			let mut waiting = self.shared.waiting.lock().await;
			if self.is_closed(){
				return Err(ChordError::unreachable(&self.address, "connection closed"));
			}
			waiting.insert(seq, tx);
		}

		let written = {
			let mut writer = self.writer.lock().await;
			write_frame(&mut *writer, &Frame{ seq, body: request }).await
		};
		if let Err(e) = written{
			self.shared.close(&self.address, &e).await;
		}

		match rx.await{
			Ok(Ok(Response::Error{ kind, msg })) => Err(kind.into_error(&self.address, msg)),
			Ok(result) => result,
			Err(_) => Err(ChordError::unreachable(&self.address, "connection closed before reply")),
		}
	}

	async fn read_replies(address: String, mut reader: FrameReader<OwnedReadHalf>, shared: Arc<Shared>){
		let err = loop{
			match reader.read::<Frame<Response>>().await{
				Ok(frame) => {
					match shared.waiting.lock().await.remove(&frame.seq){
						Some(tx) => {
							let _ = tx.send(Ok(frame.body));
						},
						None => debug!(address, seq = frame.seq, "reply for unknown request"),
					}
				},
				Err(e) => break e,
			}
		};
		debug!(address, error = %err, "connection closed");
		shared.close(&address, &err).await;
	}
}

impl Drop for Connection{
	fn drop(&mut self){
		self.reader.abort();
	}
}


/// Client side of the transport. Opens one connection per remote address
/// on first use and reuses it. A connection that breaks is dropped from the
/// pool; the next call to that address connects again.
#[derive(Default)]
pub struct TransportClient{
	connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl TransportClient{
	pub fn new() -> Self{
		Self::default()
	}

	/// Sends `request` to `address` and waits for the reply. Error replies
	/// come back as the matching `ChordError`.
	pub async fn call(&self, address: &str, request: Request) -> Result<Response>{
		let conn = self.connection(address).await?;
		let result = conn.call(request).await;
		if result.is_err() && conn.is_closed(){
			self.evict(address, &conn).await;
		}
		result
	}

	async fn connection(&self, address: &str) -> Result<Arc<Connection>>{
		{
			let mut connections = self.connections.lock().await;
			match connections.get(address){
				Some(conn) if !conn.is_closed() => return Ok(conn.clone()),
				Some(_) => {
					connections.remove(address);
					debug!(address, "evicted broken connection");
				},
				None => {},
			}
		}

		// Connect without holding the pool, a slow peer must not stall calls to others.
		let conn = Connection::open(address).await?;
		let mut connections = self.connections.lock().await;
		match connections.get(address){
			Some(existing) if !existing.is_closed() => Ok(existing.clone()),
			_ => {
				connections.insert(address.to_string(), conn.clone());
				Ok(conn)
			},
		}
	}

	async fn evict(&self, address: &str, conn: &Arc<Connection>){
		let mut connections = self.connections.lock().await;
		if connections.get(address).map_or(false, |c| Arc::ptr_eq(c, conn)){
			connections.remove(address);
			debug!(address, "evicted broken connection");
		}
	}
}

impl fmt::Debug for TransportClient{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
		f.debug_struct("TransportClient").finish_non_exhaustive()
	}
}


/// A bound listener, not yet serving. Binding first lets the caller learn
/// the resolved address before creating the vnode that will own it.
#[derive(Debug)]
pub struct TransportServer{
	listener: TcpListener,
	address: String,
}

impl TransportServer{
	/// Binds `address`. Port 0 picks an ephemeral port; see `address()`.
	pub async fn bind(address: &str) -> Result<Self>{
		let listener = TcpListener::bind(address).await?;
		let address = listener.local_addr()?.to_string();
		info!(address, "listening");
		Ok(Self{ listener, address })
	}

	/// The resolved listen address.
	pub fn address(&self) -> &str{
		&self.address
	}

	/// Serves `vnode` on every accepted connection until shut down. Notify
	/// candidates arriving over the wire are wrapped as remote vnodes using
	/// `client`.
	pub fn serve(self, vnode: VNodeRef, client: Arc<TransportClient>) -> ServerHandle{
		let address = self.address.clone();
		let span = info_span!("server", addr = %address);
		let handle = tokio::spawn(accept_loop(self.listener, vnode, client).instrument(span));
		ServerHandle{ address, handle }
	}
}

/// Handle to a running server.
#[derive(Debug)]
pub struct ServerHandle{
	address: String,
	handle: JoinHandle<()>,
}

impl ServerHandle{
	pub fn address(&self) -> &str{
		&self.address
	}

	/// Stops accepting and closes every served connection.
	pub async fn shutdown(self){
		self.handle.abort();
		let _ = self.handle.await;
		info!(address = self.address, "server shut down");
	}
}

async fn accept_loop(listener: TcpListener, vnode: VNodeRef, client: Arc<TransportClient>){
	// Dropping the set aborts every connection task.
	let mut connections = JoinSet::new();
	loop{
		select! {
			accepted = listener.accept() => {
				match accepted{
					Ok((stream, peer)) => {
						let span = info_span!("conn", peer = %peer);
						connections.spawn(serve_connection(stream, vnode.clone(), client.clone()).instrument(span));
					},
					Err(e) => warn!(error = %e, "accept failed"),
				}
			},
			Some(_) = connections.join_next(), if !connections.is_empty() => {},
		}
	}
}

async fn serve_connection(stream: TcpStream, vnode: VNodeRef, client: Arc<TransportClient>){
	let (read_half, write_half) = stream.into_split();
	let mut reader = FrameReader::new(read_half);
	let writer = Arc::new(Mutex::new(write_half));
	let mut requests = JoinSet::new();

	loop{
		select! {
			incoming = reader.read::<Frame<Request>>() => {
				match incoming{
					Ok(Frame{ seq, body }) => {
						let vnode = vnode.clone();
						let client = client.clone();
						let writer = writer.clone();
						requests.spawn(async move{
							let body = dispatch(vnode.as_ref(), &client, body).await;
							let mut writer = writer.lock().await;
							if let Err(e) = write_frame(&mut *writer, &Frame{ seq, body }).await{
								debug!(error = %e, "could not write reply");
							}
						}.in_current_span());
					},
					Err(e) => {
						debug!(error = %e, "peer disconnected");
						break;
					},
				}
			},
			Some(_) = requests.join_next(), if !requests.is_empty() => {},
		}
	}
}

/// Runs one request against the served vnode.
#[instrument(skip(vnode, client))]
async fn dispatch(vnode: &dyn VNode, client: &Arc<TransportClient>, request: Request) -> Response{
	let result = match request{
		Request::FindSuccessor{ id } => vnode.find_successor(id).await
			.map(|node| Response::Address{ address: node.address().to_string() }),
		Request::Notify{ address } => {
			let candidate: VNodeRef = Arc::new(RemoteVNode::new(address, client.clone()));
			vnode.notify(candidate).await.map(|()| Response::Empty)
		},
		Request::Ping => vnode.ping().await.map(|()| Response::Empty),
		Request::GetPredecessor => vnode.get_predecessor().await
			.map(|node| Response::Address{ address: node.address().to_string() }),
	};
	result.unwrap_or_else(|e| Response::from_error(&e))
}


#[cfg(test)]
mod tests{
	use super::*;
	use crate::{chord::LocalVNode, config::VNodeConfig};

	#[tokio::test]
	async fn frames_survive_partial_writes(){
		let (mut tx, rx) = tokio::io::duplex(64);
		let mut reader = FrameReader::new(rx);

		let raw = serde_json::to_vec(&Frame{ seq: 7, body: Request::FindSuccessor{ id: u64::MAX } }).unwrap();
		let (head, tail) = raw.split_at(5);
		let tail = tail.to_vec();
		tx.write_all(head).await.unwrap();
		let writer = tokio::spawn(async move{
			tokio::task::yield_now().await;
			tx.write_all(&tail).await.unwrap();
			write_frame(&mut tx, &Frame{ seq: 8, body: Request::Ping }).await.unwrap();
			tx
		});

		let first: Frame<Request> = reader.read().await.unwrap();
		assert_eq!(first.seq, 7);
		assert_eq!(first.body, Request::FindSuccessor{ id: u64::MAX });
		let second: Frame<Request> = reader.read().await.unwrap();
		assert_eq!(second.seq, 8);
		assert_eq!(second.body, Request::Ping);

		drop(writer.await.unwrap());
		let eof = reader.read::<Frame<Request>>().await.unwrap_err();
		assert_eq!(eof.kind(), ErrorKind::UnexpectedEof);
	}

	#[tokio::test]
	async fn malformed_frames_are_rejected(){
		let (mut tx, rx) = tokio::io::duplex(64);
		let mut reader = FrameReader::new(rx);
		tx.write_all(b"{\"seq\": \"nope\"}").await.unwrap();
		let err = reader.read::<Frame<Request>>().await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::InvalidData);
	}

	async fn served_vnode() -> (LocalVNode, ServerHandle, Arc<TransportClient>){
		let server = TransportServer::bind("127.0.0.1:0").await.unwrap();
		let vnode = LocalVNode::new(server.address(), VNodeConfig::default()).unwrap();
		vnode.create().await.unwrap();
		let client = Arc::new(TransportClient::new());
		let handle = server.serve(vnode.to_ref(), client.clone());
		(vnode, handle, client)
	}

	#[tokio::test]
	async fn calls_reach_the_served_vnode(){
		let (vnode, handle, client) = served_vnode().await;
		let address = handle.address().to_string();

		assert_eq!(client.call(&address, Request::Ping).await.unwrap(), Response::Empty);
		assert_eq!(
			client.call(&address, Request::FindSuccessor{ id: 42 }).await.unwrap(),
			Response::Address{ address: address.clone() },
		);
		assert!(matches!(
			client.call(&address, Request::GetPredecessor).await,
			Err(ChordError::NoPredecessor)
		));

		// the connection is reused
		assert_eq!(client.connections.lock().await.len(), 1);

		handle.shutdown().await;
		vnode.stop().await;
	}

	#[tokio::test]
	async fn concurrent_calls_share_one_connection(){
		let (_vnode, handle, client) = served_vnode().await;
		let address = handle.address().to_string();

		let mut calls = JoinSet::new();
		for id in 0..32u64{
			let client = client.clone();
			let address = address.clone();
			calls.spawn(async move{ client.call(&address, Request::FindSuccessor{ id: id * 1000 }).await });
		}
		while let Some(result) = calls.join_next().await{
			assert_eq!(result.unwrap().unwrap(), Response::Address{ address: address.clone() });
		}
		assert_eq!(client.connections.lock().await.len(), 1);
		handle.shutdown().await;
	}

	#[tokio::test]
	async fn unreachable_peer_fails_the_call(){
		// bind then drop to get a port nobody listens on
		let address = TransportServer::bind("127.0.0.1:0").await.unwrap().address().to_string();
		let client = TransportClient::new();
		let err = client.call(&address, Request::Ping).await.unwrap_err();
		assert!(err.is_unreachable());
		assert!(client.connections.lock().await.is_empty());
	}

	#[tokio::test]
	async fn broken_connection_is_evicted(){
		let (_vnode, handle, client) = served_vnode().await;
		let address = handle.address().to_string();
		client.call(&address, Request::Ping).await.unwrap();

		handle.shutdown().await;
		let err = client.call(&address, Request::Ping).await.unwrap_err();
		assert!(err.is_unreachable());
		assert!(client.connections.lock().await.is_empty());
	}
}
