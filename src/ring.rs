//! Starts the vnodes of one host and wires them into a ring.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::{
	adaptor::{RemoteVNode, ServerHandle, TransportClient, TransportServer},
	chord::{LocalVNode, VNodeSnapshot},
	config::VNodeConfig,
	error::{ChordError, Result},
	vnode::VNodeRef,
};


/// The vnodes hosted by this process, each with its own transport server.
#[derive(Debug)]
pub struct Ring{
	vnodes: Vec<LocalVNode>,
	servers: Mutex<Vec<ServerHandle>>,
	client: Arc<TransportClient>,
}

impl Ring{

	/// Creates a new ring in vnode 0 and joins the remaining vnodes through it.
	#[instrument(skip(config))]
	pub async fn create(workers: usize, host: &str, config: VNodeConfig) -> Result<Self>{
		let ring = Self::spawn(workers, host, config).await?;
		let result: Result<()> = async{
			let first = &ring.vnodes[0];
			first.create().await?;
			first.start().await?;

			let introducer = first.to_ref();
			for vnode in &ring.vnodes[1..]{
				ring.join_vnode(vnode, introducer.clone()).await?;
			}
			Ok(())
		}.await;
		ring.finish(result).await?;
		info!(workers, "created ring");
		Ok(ring)
	}

	/// Joins every vnode to the existing ring reachable at `introducer`.
	#[instrument(skip(config))]
	pub async fn join(workers: usize, host: &str, introducer: &str, config: VNodeConfig) -> Result<Self>{
		let ring = Self::spawn(workers, host, config).await?;
		let introducer: VNodeRef = Arc::new(RemoteVNode::new(introducer, ring.client.clone()));
		let result: Result<()> = async{
			for vnode in &ring.vnodes{
				ring.join_vnode(vnode, introducer.clone()).await?;
			}
			Ok(())
		}.await;
		ring.finish(result).await?;
		info!(workers, "joined ring");
		Ok(ring)
	}

	/// Tears the half-built ring down again if bootstrapping failed.
	async fn finish(&self, result: Result<()>) -> Result<()>{
		if let Err(e) = &result{
			warn!(error = %e, "bootstrap failed, shutting down");
			self.shutdown().await;
		}
		result
	}

	/// Binds a server per vnode and builds the vnodes on the resolved
	/// addresses. Nothing is created or joined yet.
	async fn spawn(workers: usize, host: &str, config: VNodeConfig) -> Result<Self>{
		if workers == 0{
			return Err(ChordError::Config("at least one worker is required".into()));
		}
		config.validate()?;

		let client = Arc::new(TransportClient::new());
		let mut vnodes = Vec::with_capacity(workers);
		let mut servers = Vec::with_capacity(workers);
		for index in 0..workers{
			match Self::spawn_worker(host, index, &config, &client).await{
				Ok((vnode, server)) => {
					vnodes.push(vnode);
					servers.push(server);
				},
				Err(e) => {
					warn!(worker = index, error = %e, "could not start worker, stopping the others");
					for server in servers{
						server.shutdown().await;
					}
					return Err(e);
				},
			}
		}

		Ok(Ring{
			vnodes,
			servers: Mutex::new(servers),
			client,
		})
	}

	async fn spawn_worker(host: &str, index: usize, config: &VNodeConfig, client: &Arc<TransportClient>) -> Result<(LocalVNode, ServerHandle)>{
		let server = TransportServer::bind(&worker_address(host, index)?).await?;
		let vnode = LocalVNode::new(server.address(), config.clone())?;
		let handle = server.serve(vnode.to_ref(), client.clone());
		Ok((vnode, handle))
	}

	async fn join_vnode(&self, vnode: &LocalVNode, introducer: VNodeRef) -> Result<()>{
		vnode.join(introducer).await?;
		vnode.start().await
	}

	pub fn vnodes(&self) -> &[LocalVNode]{
		&self.vnodes
	}

	pub fn client(&self) -> &Arc<TransportClient>{
		&self.client
	}

	/// Resolves the owner of `key`, starting from the first local vnode.
	pub async fn lookup(&self, key: &str) -> Result<String>{
		self.vnodes[0].lookup(key).await
	}

	pub async fn snapshots(&self) -> Vec<VNodeSnapshot>{
		let mut snapshots = Vec::with_capacity(self.vnodes.len());
		for vnode in &self.vnodes{
			snapshots.push(vnode.snapshot().await);
		}
		snapshots
	}

	/// Stops every vnode's routines, then its server.
	pub async fn shutdown(&self){
		for vnode in &self.vnodes{
			vnode.stop().await;
		}
		for server in self.servers.lock().await.drain(..){
			server.shutdown().await;
		}
		info!("ring shut down");
	}
}

/// Listen address of worker `index`. Port 0 stays ephemeral for every
/// worker, any other port is offset by the worker index.
fn worker_address(host: &str, index: usize) -> Result<String>{
	let (name, port) = host.rsplit_once(':')
		.ok_or_else(|| ChordError::Config(format!("host {host:?} is not host:port")))?;
	let port: u16 = port.parse()
		.map_err(|_| ChordError::Config(format!("host {host:?} has an invalid port")))?;
	if port == 0{
		return Ok(host.to_string());
	}
	let port = u16::try_from(index).ok()
		.and_then(|offset| port.checked_add(offset))
		.ok_or_else(|| ChordError::Config(format!("no port left for worker {index} of {host}")))?;
	Ok(format!("{name}:{port}"))
}


#[cfg(test)]
mod tests{
	use super::*;

	#[test]
	fn worker_ports_are_offset(){
		assert_eq!(worker_address("127.0.0.1:8000", 0).unwrap(), "127.0.0.1:8000");
		assert_eq!(worker_address("127.0.0.1:8000", 3).unwrap(), "127.0.0.1:8003");
		assert_eq!(worker_address("127.0.0.1:0", 3).unwrap(), "127.0.0.1:0");
		assert_eq!(worker_address("[::1]:9000", 1).unwrap(), "[::1]:9001");
	}

	/// Finds a port whose neighbour is free too, and holds the neighbour.
	fn port_below_a_taken_one() -> (u16, std::net::TcpListener){
		loop{
			let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
			let port = taken.local_addr().unwrap().port() - 1;
			if port > 0 && std::net::TcpListener::bind(("127.0.0.1", port)).is_ok(){
				return (port, taken);
			}
		}
	}

	#[tokio::test]
	async fn failed_bind_stops_workers_already_started(){
		let (port, _taken) = port_below_a_taken_one();
		let host = format!("127.0.0.1:{port}");

		let err = Ring::create(2, &host, VNodeConfig::default()).await.unwrap_err();
		assert!(matches!(err, ChordError::Io(_)), "unexpected error: {err}");

		// worker 0 bound `port` before worker 1 failed; it must be gone again
		assert!(tokio::net::TcpStream::connect(&host).await.is_err());
		assert!(std::net::TcpListener::bind(&host).is_ok());
	}

	#[test]
	fn bad_hosts_are_rejected(){
		assert!(worker_address("localhost", 0).is_err());
		assert!(worker_address("localhost:http", 0).is_err());
		assert!(worker_address("localhost:65535", 1).is_err());
	}
}
